//! Media volume ducking while the assistant speaks.
//!
//! This module provides:
//! * [`MediaVolume`]: per-application volume capability (object-safe).
//! * [`PactlMixer`]: PulseAudio / PipeWire implementation.
//! * [`NullMixer`]: used when ducking is disabled.
//! * [`DuckingCoordinator`]: depth-counted lower/restore driven by
//!   [`SpeechEvent`]s.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use voice_assistant_core::ducking::{DuckingCoordinator, PactlMixer};
//!
//! let duck = DuckingCoordinator::new(Arc::new(PactlMixer::default()), "spotify", 0.2);
//! duck.on_speech_start();
//! // … play TTS …
//! duck.on_speech_end();
//! ```

pub mod coordinator;
pub mod mixer;
pub mod pactl;

pub use coordinator::{DuckingCoordinator, DuckingState, SpeechEvent};
pub use mixer::{MediaVolume, NullMixer, StreamVolume, VolumeError, VolumeSnapshot};
pub use pactl::PactlMixer;
