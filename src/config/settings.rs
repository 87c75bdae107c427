//! Application settings structs, defaults and TOML persistence.
//!
//! All structs implement `Serialize`, `Deserialize`, `Default` and `Clone`
//! so they can be round-tripped through TOML files and shared across threads.

use std::time::Duration;

use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};

use super::AppPaths;
use crate::timer::MAX_DELAY_SECS;

// ---------------------------------------------------------------------------
// AudioConfig
// ---------------------------------------------------------------------------

/// Settings for the duplex audio session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Capture device name; `None` means the system default.
    pub input_device: Option<String>,
    /// Playback device name; `None` means the system default.
    pub output_device: Option<String>,
    /// Milliseconds of microphone audio discarded after the assistant stops
    /// speaking, so the tail of the TTS output is not captured.
    pub post_speech_guard_ms: u64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            input_device: None,
            output_device: None,
            post_speech_guard_ms: 200,
        }
    }
}

impl AudioConfig {
    pub fn post_speech_guard(&self) -> Duration {
        Duration::from_millis(self.post_speech_guard_ms)
    }
}

// ---------------------------------------------------------------------------
// DuckingConfig
// ---------------------------------------------------------------------------

/// Media volume ducking while the assistant speaks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DuckingConfig {
    /// Whether ducking is active at all.  When `false` the coordinator runs
    /// against a mixer that does nothing.
    pub enabled: bool,
    /// Application whose output is lowered, matched against the mixer's
    /// application name or process binary (e.g. `"spotify"`).
    pub app_name: String,
    /// Absolute volume (0.0 – 1.0) the application is lowered to.
    pub duck_level: f32,
}

impl Default for DuckingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            app_name: "spotify".into(),
            duck_level: 0.2,
        }
    }
}

// ---------------------------------------------------------------------------
// TimerConfig
// ---------------------------------------------------------------------------

/// Limits applied to countdown requests coming from the tool layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimerConfig {
    /// Shortest accepted countdown in seconds.
    pub min_delay_secs: u64,
    /// Longest accepted countdown in seconds.
    pub max_delay_secs: u64,
    /// Delay used when a request does not specify one.
    pub default_delay_secs: u64,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            min_delay_secs: 1,
            max_delay_secs: 3600,
            default_delay_secs: 5,
        }
    }
}

impl TimerConfig {
    /// Reject limits the scheduler cannot honour: `min <= default <= max`
    /// and `max` no longer than the scheduler's own ceiling.
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.min_delay_secs <= self.default_delay_secs
                && self.default_delay_secs <= self.max_delay_secs,
            "timer delays must satisfy min ({}) <= default ({}) <= max ({})",
            self.min_delay_secs,
            self.default_delay_secs,
            self.max_delay_secs
        );
        ensure!(
            self.max_delay_secs <= MAX_DELAY_SECS,
            "timer max_delay_secs ({}) exceeds the supported {MAX_DELAY_SECS}",
            self.max_delay_secs
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// AppConfig  (top-level)
// ---------------------------------------------------------------------------

/// Top-level application configuration, serialised as `settings.toml`.
///
/// # Persistence
///
/// ```rust,no_run
/// use voice_assistant_core::config::AppConfig;
///
/// // Load (returns Default when file is missing)
/// let config = AppConfig::load().unwrap();
///
/// // Modify and save
/// // config.save().unwrap();
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Capture / playback device settings.
    pub audio: AudioConfig,
    /// Media ducking settings.
    pub ducking: DuckingConfig,
    /// Countdown limits.
    pub timer: TimerConfig,
}

impl AppConfig {
    /// Load configuration from the platform-appropriate `settings.toml`.
    ///
    /// Returns `Ok(AppConfig::default())` when the file does not exist yet
    /// (first-run scenario) so callers never need to special-case a missing
    /// file.
    pub fn load() -> Result<Self> {
        Self::load_from(&AppPaths::new().settings_file)
    }

    /// Load from an explicit path (useful for tests).
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config
            .timer
            .validate()
            .with_context(|| format!("invalid [timer] section in {}", path.display()))?;
        Ok(config)
    }

    /// Save configuration to the platform-appropriate `settings.toml`,
    /// creating parent directories as needed.
    pub fn save(&self) -> Result<()> {
        self.save_to(&AppPaths::new().settings_file)
    }

    /// Save to an explicit path (useful for tests).
    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn round_trip_toml() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("settings.toml");

        let original = AppConfig::default();
        original.save_to(&path).expect("save");

        let loaded = AppConfig::load_from(&path).expect("load");

        assert_eq!(original.audio.input_device, loaded.audio.input_device);
        assert_eq!(
            original.audio.post_speech_guard_ms,
            loaded.audio.post_speech_guard_ms
        );
        assert_eq!(original.ducking.enabled, loaded.ducking.enabled);
        assert_eq!(original.ducking.app_name, loaded.ducking.app_name);
        assert_eq!(original.ducking.duck_level, loaded.ducking.duck_level);
        assert_eq!(original.timer.max_delay_secs, loaded.timer.max_delay_secs);
    }

    /// `load_from` on a non-existent path must return `Default` without error.
    #[test]
    fn load_missing_returns_default() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("nonexistent.toml");

        let config = AppConfig::load_from(&path).expect("should not error");
        assert_eq!(config.ducking.app_name, DuckingConfig::default().app_name);
        assert_eq!(config.timer.default_delay_secs, 5);
    }

    #[test]
    fn default_values() {
        let cfg = AppConfig::default();

        assert!(cfg.audio.input_device.is_none());
        assert!(cfg.audio.output_device.is_none());
        assert_eq!(cfg.audio.post_speech_guard(), Duration::from_millis(200));
        assert!(cfg.ducking.enabled);
        assert!((cfg.ducking.duck_level - 0.2).abs() < f32::EPSILON);
        assert_eq!(cfg.timer.min_delay_secs, 1);
        assert_eq!(cfg.timer.max_delay_secs, 3600);
        assert_eq!(cfg.timer.default_delay_secs, 5);
    }

    /// A file that only sets one section keeps defaults for the rest.
    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("partial.toml");
        std::fs::write(&path, "[ducking]\napp_name = \"vlc\"\n").expect("write");

        let cfg = AppConfig::load_from(&path).expect("load");
        assert_eq!(cfg.ducking.app_name, "vlc");
        assert!(cfg.ducking.enabled);
        assert_eq!(cfg.timer.max_delay_secs, 3600);
        assert_eq!(cfg.audio.post_speech_guard_ms, 200);
    }

    #[test]
    fn round_trip_modified_values() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("modified.toml");

        let mut cfg = AppConfig::default();
        cfg.audio.input_device = Some("USB Microphone".into());
        cfg.ducking.enabled = false;
        cfg.ducking.duck_level = 0.35;
        cfg.timer.max_delay_secs = 600;

        cfg.save_to(&path).expect("save");
        let loaded = AppConfig::load_from(&path).expect("load");

        assert_eq!(loaded.audio.input_device.as_deref(), Some("USB Microphone"));
        assert!(!loaded.ducking.enabled);
        assert!((loaded.ducking.duck_level - 0.35).abs() < f32::EPSILON);
        assert_eq!(loaded.timer.max_delay_secs, 600);
    }

    #[test]
    fn timer_limits_beyond_scheduler_ceiling_are_rejected() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("huge.toml");
        std::fs::write(&path, "[timer]\nmax_delay_secs = 9223372036854775807\n")
            .expect("write");

        let err = AppConfig::load_from(&path).unwrap_err();
        assert!(format!("{err:#}").contains("max_delay_secs"));
    }

    #[test]
    fn timer_limits_must_be_ordered() {
        let mut timer = TimerConfig::default();
        assert!(timer.validate().is_ok());

        timer.default_delay_secs = 0;
        assert!(timer.validate().is_err());

        timer = TimerConfig {
            min_delay_secs: 10,
            max_delay_secs: 5,
            default_delay_secs: 7,
        };
        assert!(timer.validate().is_err());
    }
}
