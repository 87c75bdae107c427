//! Per-application volume capability.
//!
//! [`MediaVolume`] reads and writes the output volume of one named
//! application through the platform mixer, leaving the system master volume
//! alone.  An application that is not running is not an error: `get_volume`
//! returns `Ok(None)` and `set_volume` returns `Ok(false)`.

use thiserror::Error;

// ---------------------------------------------------------------------------
// VolumeError
// ---------------------------------------------------------------------------

/// Errors raised by a mixer backend.
#[derive(Debug, Error)]
pub enum VolumeError {
    /// The mixer could not be reached (tool missing, non-zero exit, …).
    #[error("mixer command failed: {0}")]
    Command(String),

    /// The mixer answered with something we could not understand.
    #[error("failed to parse mixer output: {0}")]
    Parse(#[from] serde_json::Error),

    /// A volume outside `0.0..=1.0` was requested.
    #[error("volume {0} is outside 0.0..=1.0")]
    OutOfRange(f32),
}

impl From<std::io::Error> for VolumeError {
    fn from(e: std::io::Error) -> Self {
        VolumeError::Command(e.to_string())
    }
}

// ---------------------------------------------------------------------------
// MediaVolume trait
// ---------------------------------------------------------------------------

/// Object-safe, thread-safe access to one application's output volume.
///
/// Volumes are linear fractions in `0.0..=1.0`.
pub trait MediaVolume: Send + Sync {
    /// Current volume of `app`, or `None` when it is not playing.
    fn get_volume(&self, app: &str) -> Result<Option<f32>, VolumeError>;

    /// Set the volume of `app`.  Returns `false` when it is not running.
    fn set_volume(&self, app: &str, volume: f32) -> Result<bool, VolumeError>;

    /// Capture everything needed to put `app` back exactly as it is now.
    ///
    /// `None` when the app is not playing.  Backends that only know one
    /// level per app keep the default.
    fn snapshot(&self, app: &str) -> Result<Option<VolumeSnapshot>, VolumeError> {
        Ok(self.get_volume(app)?.map(VolumeSnapshot::uniform))
    }

    /// Write a snapshot back.  Returns `false` when nothing was left to
    /// restore.
    fn restore(&self, app: &str, snapshot: &VolumeSnapshot) -> Result<bool, VolumeError> {
        self.set_volume(app, snapshot.level)
    }
}

// ---------------------------------------------------------------------------
// VolumeSnapshot
// ---------------------------------------------------------------------------

/// Pre-duck volume of one application.
#[derive(Debug, Clone, PartialEq)]
pub struct VolumeSnapshot {
    /// Loudest playing level, in `0.0..=1.0`.  Compared against the duck
    /// level.
    pub level: f32,
    /// Raw per-stream volumes keyed by the backend's stream id.  Empty when
    /// the backend restores through `level` alone.
    pub streams: Vec<StreamVolume>,
}

/// One stream's volume in the backend's native units (may exceed 100%).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamVolume {
    pub id: u32,
    pub raw: u32,
}

impl VolumeSnapshot {
    pub fn uniform(level: f32) -> Self {
        Self {
            level,
            streams: Vec::new(),
        }
    }
}

// Compile-time assertion: Box<dyn MediaVolume> must be constructible.
const _: fn() = || {
    fn _assert_object_safe(_: Box<dyn MediaVolume>) {}
};

/// Reject volumes outside `0.0..=1.0` (and NaN).
pub fn check_range(volume: f32) -> Result<f32, VolumeError> {
    if (0.0..=1.0).contains(&volume) {
        Ok(volume)
    } else {
        Err(VolumeError::OutOfRange(volume))
    }
}

// ---------------------------------------------------------------------------
// NullMixer
// ---------------------------------------------------------------------------

/// Mixer used when ducking is disabled: every application looks absent.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullMixer;

impl MediaVolume for NullMixer {
    fn get_volume(&self, _app: &str) -> Result<Option<f32>, VolumeError> {
        Ok(None)
    }

    fn set_volume(&self, _app: &str, _volume: f32) -> Result<bool, VolumeError> {
        Ok(false)
    }
}
