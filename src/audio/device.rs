//! Hardware seam for the audio session.
//!
//! [`AudioBackend`] opens one capture or one playback stream at a time and
//! hands back an [`OpenStream`].  The stream stays open for as long as its
//! [`StreamHandle`] is alive; dropping the handle closes the device.
//!
//! The production implementation is [`crate::audio::CpalBackend`]; tests
//! substitute an in-memory fake.

use std::fmt;
use std::sync::mpsc;

use thiserror::Error;

use super::buffer::PlaybackQueue;

// ---------------------------------------------------------------------------
// Direction
// ---------------------------------------------------------------------------

/// Which way audio flows through a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Microphone capture.
    Input,
    /// Speaker playback.
    Output,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Input => f.write_str("input"),
            Direction::Output => f.write_str("output"),
        }
    }
}

// ---------------------------------------------------------------------------
// AudioChunk / StreamFormat
// ---------------------------------------------------------------------------

/// A single buffer of captured audio as delivered by the device callback.
///
/// Samples are interleaved `f32` in the range `[-1.0, 1.0]`.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    /// Interleaved PCM samples in `[-1.0, 1.0]`.
    pub samples: Vec<f32>,
    /// Sample rate of this chunk in Hz (e.g. 44100, 48000, 16000).
    pub sample_rate: u32,
    /// Number of interleaved channels (1 = mono, 2 = stereo, …).
    pub channels: u16,
}

/// Negotiated format of an open stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

// ---------------------------------------------------------------------------
// DeviceError
// ---------------------------------------------------------------------------

/// Errors raised while opening or running a device stream.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("no {0} device found on the default audio host")]
    NoDevice(Direction),

    #[error("failed to enumerate audio devices: {0}")]
    Enumerate(#[from] cpal::DevicesError),

    #[error("failed to query default stream config: {0}")]
    DefaultConfig(#[from] cpal::DefaultStreamConfigError),

    #[error("failed to build stream: {0}")]
    BuildStream(cpal::BuildStreamError),

    #[error("failed to start stream: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),

    /// The device is present but refused to open (held by another process,
    /// permission denied, …).
    #[error("{0} device is busy")]
    Busy(Direction),

    /// The channel was stopped while its device was still opening.
    #[error("{0} channel was stopped while its device was opening")]
    Interrupted(Direction),

    /// The OS thread hosting the stream could not be spawned or exited
    /// before the stream was ready.
    #[error("audio stream thread failed: {0}")]
    Thread(String),
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Keeps an opened device stream alive.  Dropping it closes the stream.
pub trait StreamHandle: Send {
    /// `false` once the device reported a fatal stream error or the stream
    /// was torn down underneath us.
    fn is_alive(&self) -> bool;
}

/// A successfully opened stream plus its negotiated format.
pub struct OpenStream {
    pub handle: Box<dyn StreamHandle>,
    pub format: StreamFormat,
}

impl fmt::Debug for OpenStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenStream")
            .field("format", &self.format)
            .field("alive", &self.handle.is_alive())
            .finish()
    }
}

/// Capability to open capture and playback devices.
///
/// Capture and playback are opened through separate calls and never share
/// a device handle, so one side failing cannot take the other down.
pub trait AudioBackend: Send + Sync {
    /// Open the capture device; every hardware buffer is forwarded on `tx`.
    fn open_capture(&self, tx: mpsc::Sender<AudioChunk>) -> Result<OpenStream, DeviceError>;

    /// Open the playback device; the stream pulls samples from `queue`.
    fn open_playback(&self, queue: PlaybackQueue) -> Result<OpenStream, DeviceError>;
}

// Compile-time assertion: Box<dyn AudioBackend> must be constructible.
const _: fn() = || {
    fn _assert_object_safe(_: Box<dyn AudioBackend>) {}
};
