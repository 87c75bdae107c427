//! Configuration module.
//!
//! Provides `AppConfig` (top-level settings), sub-configs for the audio
//! session, ducking and timers, `AppPaths` for the platform config
//! directory, and TOML persistence via `AppConfig::load` / `AppConfig::save`.

pub mod paths;
pub mod settings;

pub use paths::AppPaths;
pub use settings::{AppConfig, AudioConfig, DuckingConfig, TimerConfig};
