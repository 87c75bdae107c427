//! Production [`AudioBackend`] built on top of `cpal`.
//!
//! `cpal::Stream` is not `Send` on every platform, so each opened stream
//! lives on its own OS thread.  The thread builds the stream, reports the
//! negotiated format back to the caller, then parks until the returned
//! handle is dropped.  The stream's error callback clears a shared liveness
//! flag when the device disappears.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use super::buffer::PlaybackQueue;
use super::device::{
    AudioBackend, AudioChunk, DeviceError, Direction, OpenStream, StreamFormat, StreamHandle,
};
use crate::config::AudioConfig;

// ---------------------------------------------------------------------------
// ThreadStream
// ---------------------------------------------------------------------------

/// RAII handle for a stream hosted on a dedicated thread.
///
/// Dropping it disconnects the stop channel; the thread then drops the
/// `cpal::Stream` (stopping the hardware) and exits.
struct ThreadStream {
    alive: Arc<AtomicBool>,
    stop_tx: Option<mpsc::Sender<()>>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl StreamHandle for ThreadStream {
    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }
}

impl Drop for ThreadStream {
    fn drop(&mut self) {
        drop(self.stop_tx.take());
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("audio stream thread panicked during shutdown");
            }
        }
    }
}

/// Spawn a thread that runs `build`, keeps the resulting stream alive and
/// waits for the handle to be dropped.
fn spawn_stream<F>(name: &str, build: F) -> Result<OpenStream, DeviceError>
where
    F: FnOnce(Arc<AtomicBool>) -> Result<(cpal::Stream, StreamFormat), DeviceError>
        + Send
        + 'static,
{
    let alive = Arc::new(AtomicBool::new(true));
    let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<StreamFormat, DeviceError>>(1);
    let (stop_tx, stop_rx) = mpsc::channel::<()>();

    let alive_thread = Arc::clone(&alive);
    let thread = std::thread::Builder::new()
        .name(name.into())
        .spawn(move || {
            let (stream, format) = match build(Arc::clone(&alive_thread)) {
                Ok(opened) => opened,
                Err(e) => {
                    alive_thread.store(false, Ordering::SeqCst);
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            let _ = ready_tx.send(Ok(format));

            // Blocks until the handle side of the channel is dropped.
            let _ = stop_rx.recv();
            drop(stream);
            alive_thread.store(false, Ordering::SeqCst);
        })
        .map_err(|e| DeviceError::Thread(e.to_string()))?;

    match ready_rx.recv() {
        Ok(Ok(format)) => Ok(OpenStream {
            handle: Box::new(ThreadStream {
                alive,
                stop_tx: Some(stop_tx),
                thread: Some(thread),
            }),
            format,
        }),
        Ok(Err(e)) => {
            let _ = thread.join();
            Err(e)
        }
        Err(_) => {
            let _ = thread.join();
            Err(DeviceError::Thread(format!(
                "{name} exited before the stream was ready"
            )))
        }
    }
}

/// Error callback shared by both directions.  Only a vanished device is
/// fatal; other backend errors are logged and the stream keeps running.
fn stream_error_handler(
    direction: Direction,
    alive: Arc<AtomicBool>,
) -> impl FnMut(cpal::StreamError) + Send + 'static {
    move |err: cpal::StreamError| match err {
        cpal::StreamError::DeviceNotAvailable => {
            log::error!("{direction} device disappeared: {err}");
            alive.store(false, Ordering::SeqCst);
        }
        other => log::error!("cpal {direction} stream error: {other}"),
    }
}

/// ALSA and friends report a device held by another process as
/// `DeviceNotAvailable` at build time.
fn build_error(direction: Direction, err: cpal::BuildStreamError) -> DeviceError {
    match err {
        cpal::BuildStreamError::DeviceNotAvailable => DeviceError::Busy(direction),
        other => DeviceError::BuildStream(other),
    }
}

// ---------------------------------------------------------------------------
// Device lookup
// ---------------------------------------------------------------------------

/// Find a device by name, falling back to the host default when the named
/// device is missing.
fn find_device(
    host: &cpal::Host,
    direction: Direction,
    name: Option<&str>,
) -> Result<cpal::Device, DeviceError> {
    if let Some(name) = name {
        let mut devices: Box<dyn Iterator<Item = cpal::Device>> = match direction {
            Direction::Input => Box::new(host.input_devices()?),
            Direction::Output => Box::new(host.output_devices()?),
        };
        if let Some(device) = devices.find(|d| d.name().ok().as_deref() == Some(name)) {
            log::info!("using {direction} device '{name}'");
            return Ok(device);
        }
        log::warn!("{direction} device '{name}' not found, falling back to default");
    }

    let default = match direction {
        Direction::Input => host.default_input_device(),
        Direction::Output => host.default_output_device(),
    };
    default.ok_or(DeviceError::NoDevice(direction))
}

// ---------------------------------------------------------------------------
// CpalBackend
// ---------------------------------------------------------------------------

/// Opens capture/playback devices on the default `cpal` host.
#[derive(Debug, Clone, Default)]
pub struct CpalBackend {
    input_device: Option<String>,
    output_device: Option<String>,
}

impl CpalBackend {
    /// `None` selects the system default for that direction.
    pub fn new(input_device: Option<String>, output_device: Option<String>) -> Self {
        Self {
            input_device,
            output_device,
        }
    }

    pub fn from_config(config: &AudioConfig) -> Self {
        Self::new(config.input_device.clone(), config.output_device.clone())
    }

    /// Names of all devices for `direction` on the default host.
    pub fn list_devices(direction: Direction) -> Result<Vec<String>, DeviceError> {
        let host = cpal::default_host();
        let names: Vec<String> = match direction {
            Direction::Input => host.input_devices()?.filter_map(|d| d.name().ok()).collect(),
            Direction::Output => host.output_devices()?.filter_map(|d| d.name().ok()).collect(),
        };
        log::debug!("found {} {direction} devices", names.len());
        Ok(names)
    }
}

impl AudioBackend for CpalBackend {
    fn open_capture(&self, tx: mpsc::Sender<AudioChunk>) -> Result<OpenStream, DeviceError> {
        let requested = self.input_device.clone();

        spawn_stream("audio-capture", move |alive| {
            let host = cpal::default_host();
            let device = find_device(&host, Direction::Input, requested.as_deref())?;
            let supported = device.default_input_config()?;

            let format = StreamFormat {
                sample_rate: supported.sample_rate().0,
                channels: supported.channels(),
            };
            let config: cpal::StreamConfig = supported.into();

            let stream = device.build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    // Ignore send errors; the channel may have been stopped.
                    let _ = tx.send(AudioChunk {
                        samples: data.to_vec(),
                        sample_rate: format.sample_rate,
                        channels: format.channels,
                    });
                },
                stream_error_handler(Direction::Input, alive),
                None,
            )
            .map_err(|e| build_error(Direction::Input, e))?;
            stream.play()?;

            log::info!(
                "capture stream started ({} Hz, {} ch)",
                format.sample_rate,
                format.channels
            );
            Ok((stream, format))
        })
    }

    fn open_playback(&self, queue: PlaybackQueue) -> Result<OpenStream, DeviceError> {
        let requested = self.output_device.clone();

        spawn_stream("audio-playback", move |alive| {
            let host = cpal::default_host();
            let device = find_device(&host, Direction::Output, requested.as_deref())?;
            let supported = device.default_output_config()?;

            let format = StreamFormat {
                sample_rate: supported.sample_rate().0,
                channels: supported.channels(),
            };
            let config: cpal::StreamConfig = supported.into();

            let stream = device.build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    queue.fill(data);
                },
                stream_error_handler(Direction::Output, alive),
                None,
            )
            .map_err(|e| build_error(Direction::Output, e))?;
            stream.play()?;

            log::info!(
                "playback stream started ({} Hz, {} ch)",
                format.sample_rate,
                format.channels
            );
            Ok((stream, format))
        })
    }
}
