//! Duplex audio session: independent capture and playback channels.
//!
//! # Layout
//!
//! ```text
//! AudioSession
//!   ├─ InputChannel  (own lock, own state) ──open_capture──▶ AudioBackend
//!   └─ OutputChannel (own lock, own state) ──open_playback─▶ AudioBackend
//!                         │                                     │
//!                         └──── PlaybackQueue ◀── cpal callback ┘
//! ```
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use voice_assistant_core::audio::{AudioSession, CpalBackend};
//!
//! let session = AudioSession::new(Arc::new(CpalBackend::default()));
//! session.start_output().expect("no speaker");
//! if !session.start_input() {
//!     // output-only mode
//! }
//! session.write_output(&[0.0; 480]).unwrap();
//! session.shutdown();
//! ```

pub mod backend;
pub mod buffer;
pub mod channel;
pub mod device;
pub mod session;

pub use backend::CpalBackend;
pub use buffer::PlaybackQueue;
pub use channel::{ChannelState, InputChannel, OutputChannel};
pub use device::{
    AudioBackend, AudioChunk, DeviceError, Direction, OpenStream, StreamFormat, StreamHandle,
};
pub use session::{AudioSession, SessionError};
