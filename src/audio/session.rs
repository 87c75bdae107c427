//! Duplex audio session: one capture channel and one playback channel that
//! live and die independently.
//!
//! Playback is the channel the assistant promises to deliver on, so a failed
//! [`AudioSession::start_output`] is a hard error.  Capture is optional: a
//! missing or busy microphone is logged once and the session carries on in
//! output-only mode.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use super::channel::{ChannelState, InputChannel, OutputChannel};
use super::device::{AudioBackend, AudioChunk, DeviceError};

// ---------------------------------------------------------------------------
// SessionError
// ---------------------------------------------------------------------------

/// Errors surfaced by the session to its callers.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The playback device could not be opened; speech cannot be delivered.
    #[error("playback unavailable: {0}")]
    OutputDevice(#[from] DeviceError),

    /// Audio was written while the playback channel was not running.
    #[error("playback channel is not running")]
    OutputNotRunning,
}

// ---------------------------------------------------------------------------
// AudioSession
// ---------------------------------------------------------------------------

/// Owns the input and output channels of one assistant session.
pub struct AudioSession {
    input: InputChannel,
    output: OutputChannel,
    /// Set after the first capture failure so later ones stay quiet.
    input_warned: AtomicBool,
}

impl AudioSession {
    /// Build a session whose channels open devices through `backend`.
    /// Nothing is opened until a `start_*` call.
    pub fn new(backend: Arc<dyn AudioBackend>) -> Self {
        Self::from_channels(
            InputChannel::new(Arc::clone(&backend)),
            OutputChannel::new(backend),
        )
    }

    pub fn from_channels(input: InputChannel, output: OutputChannel) -> Self {
        Self {
            input,
            output,
            input_warned: AtomicBool::new(false),
        }
    }

    /// Start microphone capture.
    ///
    /// Never fails: returns `false` when the capture device is missing or
    /// busy, in which case the session continues output-only.
    pub fn start_input(&self) -> bool {
        match self.input.start() {
            Ok(()) => {
                self.input_warned.store(false, Ordering::SeqCst);
                true
            }
            Err(e) => {
                if !self.input_warned.swap(true, Ordering::SeqCst) {
                    log::warn!("microphone unavailable ({e}); continuing in output-only mode");
                } else {
                    log::debug!("microphone still unavailable: {e}");
                }
                false
            }
        }
    }

    /// Start speaker playback.
    ///
    /// # Errors
    ///
    /// [`SessionError::OutputDevice`] when the playback device cannot be
    /// opened.  The input channel is not touched either way.
    pub fn start_output(&self) -> Result<(), SessionError> {
        self.output.start().map_err(|e| {
            log::error!("speaker unavailable: {e}");
            SessionError::from(e)
        })
    }

    /// Start both channels: output first, then input regardless of whether
    /// output succeeded.  Returns the output result.
    pub fn start(&self) -> Result<(), SessionError> {
        let output = self.start_output();
        self.start_input();
        output
    }

    pub fn stop_input(&self) {
        self.input.stop();
    }

    pub fn stop_output(&self) {
        self.output.stop();
    }

    /// Stop both channels whatever their state.  Never fails.
    pub fn shutdown(&self) {
        self.input.stop();
        self.output.stop();
        log::info!("audio session shut down");
    }

    pub fn is_input_available(&self) -> bool {
        self.input.is_available()
    }

    pub fn is_output_available(&self) -> bool {
        self.output.is_available()
    }

    pub fn input_state(&self) -> ChannelState {
        self.input.state()
    }

    pub fn output_state(&self) -> ChannelState {
        self.output.state()
    }

    /// Next captured chunk, if any.  Always `None` in output-only mode.
    pub fn read_input(&self) -> Option<AudioChunk> {
        self.input.read()
    }

    /// Queue speech samples for playback; returns how many were accepted.
    ///
    /// # Errors
    ///
    /// [`SessionError::OutputNotRunning`] when playback is down.
    pub fn write_output(&self, samples: &[f32]) -> Result<usize, SessionError> {
        self.output
            .write(samples)
            .ok_or(SessionError::OutputNotRunning)
    }

    /// Drop queued speech (barge-in).
    pub fn clear_output(&self) {
        self.output.clear();
    }

    /// Discard microphone audio for `guard` so the tail of the speech just
    /// played is not captured.
    pub fn suppress_input_for(&self, guard: Duration) {
        if !guard.is_zero() {
            self.input.suppress_for(guard);
        }
    }

    pub fn input(&self) -> &InputChannel {
        &self.input
    }

    pub fn output(&self) -> &OutputChannel {
        &self.output
    }
}

impl Drop for AudioSession {
    fn drop(&mut self) {
        self.input.stop();
        self.output.stop();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
