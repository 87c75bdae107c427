//! Real-time core of a voice assistant.
//!
//! * [`audio`]: duplex audio session with independent capture and playback.
//! * [`ducking`]: lowers a media application's volume while the assistant
//!   speaks and restores it afterwards.
//! * [`timer`]: cancellable countdowns that fire exactly once.
//! * [`config`]: TOML settings and platform paths.

pub mod audio;
pub mod config;
pub mod ducking;
pub mod timer;
