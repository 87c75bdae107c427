//! Single-direction audio channels.
//!
//! [`InputChannel`] and [`OutputChannel`] each own their own lock, their own
//! [`ChannelState`] and at most one open stream.  They are constructed
//! separately and never touch each other's state, so capture can fail, stop
//! or restart without any effect on playback (and vice versa).
//!
//! ```text
//! Uninitialized ──start──▶ Starting ──ok──▶ Running ──stop──▶ Stopped
//!                               │              │                 │
//!                               └──err──▶ Failed ◀──device lost──┘ (restart)
//! ```
//!
//! The channel lock is not held while the backend opens a device, so state
//! queries and `stop` stay responsive and report `Starting` meanwhile.  A
//! `stop` during the open bumps the slot's generation; the open then sees a
//! stale generation, closes the stream it got and reports
//! [`DeviceError::Interrupted`].

use std::sync::{mpsc, Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use super::buffer::PlaybackQueue;
use super::device::{
    AudioBackend, AudioChunk, DeviceError, Direction, OpenStream, StreamFormat, StreamHandle,
};

// ---------------------------------------------------------------------------
// ChannelState
// ---------------------------------------------------------------------------

/// Lifecycle of one audio channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelState {
    /// Never started.
    #[default]
    Uninitialized,
    /// The device is being opened.
    Starting,
    /// The stream is open and delivering audio.
    Running,
    /// Opening failed or the device disappeared while running.
    Failed,
    /// Stopped explicitly after running.
    Stopped,
}

impl ChannelState {
    /// A short human-readable label suitable for status output.
    pub fn label(&self) -> &'static str {
        match self {
            ChannelState::Uninitialized => "uninitialized",
            ChannelState::Starting => "starting",
            ChannelState::Running => "running",
            ChannelState::Failed => "failed",
            ChannelState::Stopped => "stopped",
        }
    }
}

// ---------------------------------------------------------------------------
// Slot (state shared by both directions)
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Slot {
    state: ChannelState,
    stream: Option<Box<dyn StreamHandle>>,
    format: Option<StreamFormat>,
    /// Bumped by a stop that lands while the device is opening.
    generation: u64,
}

impl Slot {
    /// Demote a running channel whose stream has died to `Failed`.
    fn refresh(&mut self, direction: Direction) {
        if self.state != ChannelState::Running {
            return;
        }
        let alive = self.stream.as_ref().is_some_and(|s| s.is_alive());
        if !alive {
            log::warn!("{direction} stream lost; channel marked unavailable");
            self.stream = None;
            self.format = None;
            self.state = ChannelState::Failed;
        }
    }

    fn is_running(&mut self, direction: Direction) -> bool {
        self.refresh(direction);
        self.state == ChannelState::Running
    }

    /// Mark the slot `Starting` and return the generation the open belongs to.
    fn begin(&mut self) -> u64 {
        self.state = ChannelState::Starting;
        self.generation
    }

    /// Record the outcome of an open begun at `generation`.
    fn settle(
        &mut self,
        direction: Direction,
        generation: u64,
        opened: Result<OpenStream, DeviceError>,
    ) -> Result<(), DeviceError> {
        if self.generation != generation {
            log::info!("{direction} channel stopped while its device was opening");
            return Err(DeviceError::Interrupted(direction));
        }
        match opened {
            Ok(open) => {
                self.stream = Some(open.handle);
                self.format = Some(open.format);
                self.state = ChannelState::Running;
                Ok(())
            }
            Err(e) => {
                self.state = ChannelState::Failed;
                Err(e)
            }
        }
    }

    /// Close the stream if one is open, or abandon an open in progress.  A
    /// channel without either is left untouched.
    fn stop(&mut self, direction: Direction) -> bool {
        if self.state == ChannelState::Starting {
            self.generation = self.generation.wrapping_add(1);
            self.state = ChannelState::Stopped;
            log::info!("{direction} channel stopped during start");
            return true;
        }
        match self.stream.take() {
            Some(stream) => {
                drop(stream);
                self.format = None;
                self.state = ChannelState::Stopped;
                log::info!("{direction} channel stopped");
                true
            }
            None => {
                log::debug!("{direction} channel stop ignored (state: {})", self.state.label());
                false
            }
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// InputChannel
// ---------------------------------------------------------------------------

#[derive(Default)]
struct InputSlot {
    slot: Slot,
    rx: Option<mpsc::Receiver<AudioChunk>>,
    /// Chunks read before this instant are discarded.
    suppress_until: Option<Instant>,
}

/// Microphone capture channel.
pub struct InputChannel {
    backend: Arc<dyn AudioBackend>,
    inner: Mutex<InputSlot>,
    /// Serialises `start` calls; never taken by anything else.
    start_gate: Mutex<()>,
}

impl InputChannel {
    pub fn new(backend: Arc<dyn AudioBackend>) -> Self {
        Self {
            backend,
            inner: Mutex::new(InputSlot::default()),
            start_gate: Mutex::new(()),
        }
    }

    /// Open the capture device.  Starting a channel that is already running
    /// is a no-op.  Blocks for as long as the backend takes to open the
    /// device, without holding the channel lock.
    ///
    /// # Errors
    ///
    /// Returns the backend's [`DeviceError`] (the channel is left `Failed`),
    /// or [`DeviceError::Interrupted`] when `stop` ran during the open.
    pub fn start(&self) -> Result<(), DeviceError> {
        let _gate = lock(&self.start_gate);
        let generation = {
            let mut inner = lock(&self.inner);
            if inner.slot.is_running(Direction::Input) {
                return Ok(());
            }
            inner.slot.begin()
        };

        let (tx, rx) = mpsc::channel::<AudioChunk>();
        let opened = self.backend.open_capture(tx);

        let mut inner = lock(&self.inner);
        let result = inner.slot.settle(Direction::Input, generation, opened);
        inner.rx = result.is_ok().then_some(rx);
        result
    }

    /// Close the capture device.  Idempotent.
    pub fn stop(&self) {
        let mut inner = lock(&self.inner);
        inner.slot.stop(Direction::Input);
        inner.rx = None;
        inner.suppress_until = None;
    }

    pub fn is_available(&self) -> bool {
        lock(&self.inner).slot.is_running(Direction::Input)
    }

    pub fn state(&self) -> ChannelState {
        let mut inner = lock(&self.inner);
        inner.slot.refresh(Direction::Input);
        inner.slot.state
    }

    pub fn format(&self) -> Option<StreamFormat> {
        lock(&self.inner).slot.format
    }

    /// Take the next captured chunk without blocking.
    ///
    /// Returns `None` when nothing is queued, the channel is not running, or
    /// input is currently suppressed (queued chunks are then discarded).
    pub fn read(&self) -> Option<AudioChunk> {
        let mut inner = lock(&self.inner);
        if !inner.slot.is_running(Direction::Input) {
            return None;
        }

        if let Some(until) = inner.suppress_until {
            if Instant::now() < until {
                if let Some(rx) = inner.rx.as_ref() {
                    while rx.try_recv().is_ok() {}
                }
                return None;
            }
            inner.suppress_until = None;
        }

        let received = match inner.rx.as_ref() {
            Some(rx) => rx.try_recv(),
            None => return None,
        };
        match received {
            Ok(chunk) => Some(chunk),
            Err(mpsc::TryRecvError::Empty) => None,
            Err(mpsc::TryRecvError::Disconnected) => {
                log::warn!("capture stream closed its sender; channel marked unavailable");
                inner.slot.stream = None;
                inner.slot.format = None;
                inner.slot.state = ChannelState::Failed;
                inner.rx = None;
                None
            }
        }
    }

    /// Discard captured audio for `duration` from now.
    pub fn suppress_for(&self, duration: Duration) {
        lock(&self.inner).suppress_until = Some(Instant::now() + duration);
    }
}

// ---------------------------------------------------------------------------
// OutputChannel
// ---------------------------------------------------------------------------

/// Speaker playback channel.
pub struct OutputChannel {
    backend: Arc<dyn AudioBackend>,
    inner: Mutex<Slot>,
    start_gate: Mutex<()>,
    queue: PlaybackQueue,
}

impl OutputChannel {
    pub fn new(backend: Arc<dyn AudioBackend>) -> Self {
        Self::with_queue(backend, PlaybackQueue::default())
    }

    pub fn with_queue(backend: Arc<dyn AudioBackend>, queue: PlaybackQueue) -> Self {
        Self {
            backend,
            inner: Mutex::new(Slot::default()),
            start_gate: Mutex::new(()),
            queue,
        }
    }

    /// Open the playback device.  Starting a running channel is a no-op.
    /// The channel lock is released while the device opens.
    ///
    /// # Errors
    ///
    /// Returns the backend's [`DeviceError`] (the channel is left `Failed`),
    /// or [`DeviceError::Interrupted`] when `stop` ran during the open.
    pub fn start(&self) -> Result<(), DeviceError> {
        let _gate = lock(&self.start_gate);
        let generation = {
            let mut slot = lock(&self.inner);
            if slot.is_running(Direction::Output) {
                return Ok(());
            }
            slot.begin()
        };

        let opened = self.backend.open_playback(self.queue.clone());
        lock(&self.inner).settle(Direction::Output, generation, opened)
    }

    /// Close the playback device and drop anything still queued.  Idempotent.
    pub fn stop(&self) {
        let mut slot = lock(&self.inner);
        if slot.stop(Direction::Output) {
            self.queue.clear();
        }
    }

    pub fn is_available(&self) -> bool {
        lock(&self.inner).is_running(Direction::Output)
    }

    pub fn state(&self) -> ChannelState {
        let mut slot = lock(&self.inner);
        slot.refresh(Direction::Output);
        slot.state
    }

    pub fn format(&self) -> Option<StreamFormat> {
        lock(&self.inner).format
    }

    /// Queue interleaved samples for playback; returns how many were
    /// accepted.  `None` when the channel is not running.
    pub fn write(&self, samples: &[f32]) -> Option<usize> {
        if !self.is_available() {
            return None;
        }
        let accepted = self.queue.push(samples);
        if accepted < samples.len() {
            log::warn!(
                "playback queue full ({} samples); dropped {}",
                self.queue.capacity(),
                samples.len() - accepted
            );
        }
        Some(accepted)
    }

    /// Drop queued samples without closing the device.
    pub fn clear(&self) {
        self.queue.clear();
    }

    /// Samples still waiting to be played.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    // -----------------------------------------------------------------------
    // Test doubles
    // -----------------------------------------------------------------------

    pub(crate) struct FakeStream {
        pub(crate) alive: Arc<AtomicBool>,
    }

    impl StreamHandle for FakeStream {
        fn is_alive(&self) -> bool {
            self.alive.load(Ordering::SeqCst)
        }
    }

    /// In-memory backend whose devices can be made to fail or disappear.
    #[derive(Default)]
    pub(crate) struct FakeBackend {
        pub(crate) fail_input: AtomicBool,
        pub(crate) fail_output: AtomicBool,
        pub(crate) input_opens: AtomicUsize,
        pub(crate) output_opens: AtomicUsize,
        pub(crate) input_alive: Mutex<Option<Arc<AtomicBool>>>,
        pub(crate) output_alive: Mutex<Option<Arc<AtomicBool>>>,
        pub(crate) capture_tx: Mutex<Option<mpsc::Sender<AudioChunk>>>,
        pub(crate) playback_queue: Mutex<Option<PlaybackQueue>>,
    }

    impl FakeBackend {
        pub(crate) fn kill_input(&self) {
            if let Some(alive) = self.input_alive.lock().unwrap().as_ref() {
                alive.store(false, Ordering::SeqCst);
            }
        }

        pub(crate) fn kill_output(&self) {
            if let Some(alive) = self.output_alive.lock().unwrap().as_ref() {
                alive.store(false, Ordering::SeqCst);
            }
        }

        pub(crate) fn emit(&self, samples: &[f32]) {
            let tx = self.capture_tx.lock().unwrap();
            tx.as_ref()
                .expect("capture not open")
                .send(AudioChunk {
                    samples: samples.to_vec(),
                    sample_rate: 16_000,
                    channels: 1,
                })
                .unwrap();
        }
    }

    impl AudioBackend for FakeBackend {
        fn open_capture(&self, tx: mpsc::Sender<AudioChunk>) -> Result<OpenStream, DeviceError> {
            self.input_opens.fetch_add(1, Ordering::SeqCst);
            if self.fail_input.load(Ordering::SeqCst) {
                return Err(DeviceError::Busy(Direction::Input));
            }
            let alive = Arc::new(AtomicBool::new(true));
            *self.input_alive.lock().unwrap() = Some(Arc::clone(&alive));
            *self.capture_tx.lock().unwrap() = Some(tx);
            Ok(OpenStream {
                handle: Box::new(FakeStream { alive }),
                format: StreamFormat {
                    sample_rate: 16_000,
                    channels: 1,
                },
            })
        }

        fn open_playback(&self, queue: PlaybackQueue) -> Result<OpenStream, DeviceError> {
            self.output_opens.fetch_add(1, Ordering::SeqCst);
            if self.fail_output.load(Ordering::SeqCst) {
                return Err(DeviceError::NoDevice(Direction::Output));
            }
            let alive = Arc::new(AtomicBool::new(true));
            *self.output_alive.lock().unwrap() = Some(Arc::clone(&alive));
            *self.playback_queue.lock().unwrap() = Some(queue);
            Ok(OpenStream {
                handle: Box::new(FakeStream { alive }),
                format: StreamFormat {
                    sample_rate: 48_000,
                    channels: 2,
                },
            })
        }
    }

    // -----------------------------------------------------------------------
    // Tests
    // -----------------------------------------------------------------------

    #[test]
    fn new_channels_are_uninitialized() {
        let backend: Arc<dyn AudioBackend> = Arc::new(FakeBackend::default());
        let input = InputChannel::new(Arc::clone(&backend));
        let output = OutputChannel::new(backend);
        assert_eq!(input.state(), ChannelState::Uninitialized);
        assert_eq!(output.state(), ChannelState::Uninitialized);
        assert!(!input.is_available());
        assert!(!output.is_available());
    }

    #[test]
    fn start_then_stop_input() {
        let backend = Arc::new(FakeBackend::default());
        let input = InputChannel::new(backend.clone());

        input.start().unwrap();
        assert_eq!(input.state(), ChannelState::Running);
        assert_eq!(input.format().map(|f| f.sample_rate), Some(16_000));

        input.stop();
        assert_eq!(input.state(), ChannelState::Stopped);
        assert!(input.format().is_none());
    }

    #[test]
    fn start_running_channel_does_not_reopen() {
        let backend = Arc::new(FakeBackend::default());
        let output = OutputChannel::new(backend.clone());
        output.start().unwrap();
        output.start().unwrap();
        assert_eq!(backend.output_opens.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failed_start_marks_failed() {
        let backend = Arc::new(FakeBackend::default());
        backend.fail_input.store(true, Ordering::SeqCst);
        let input = InputChannel::new(backend.clone());

        let err = input.start().unwrap_err();
        assert!(matches!(err, DeviceError::Busy(Direction::Input)));
        assert_eq!(input.state(), ChannelState::Failed);
        assert!(input.read().is_none());
    }

    #[test]
    fn stop_is_idempotent() {
        let backend = Arc::new(FakeBackend::default());
        let input = InputChannel::new(backend.clone());

        input.stop();
        assert_eq!(input.state(), ChannelState::Uninitialized);

        input.start().unwrap();
        input.stop();
        input.stop();
        assert_eq!(input.state(), ChannelState::Stopped);
    }

    #[test]
    fn restart_after_stop() {
        let backend = Arc::new(FakeBackend::default());
        let output = OutputChannel::new(backend.clone());
        output.start().unwrap();
        output.stop();
        output.start().unwrap();
        assert_eq!(output.state(), ChannelState::Running);
        assert_eq!(backend.output_opens.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn lost_device_demotes_to_failed() {
        let backend = Arc::new(FakeBackend::default());
        let output = OutputChannel::new(backend.clone());
        output.start().unwrap();

        backend.kill_output();
        assert!(!output.is_available());
        assert_eq!(output.state(), ChannelState::Failed);
        assert!(output.write(&[0.1]).is_none());
    }

    #[test]
    fn read_returns_captured_chunks_in_order() {
        let backend = Arc::new(FakeBackend::default());
        let input = InputChannel::new(backend.clone());
        input.start().unwrap();

        backend.emit(&[0.1, 0.2]);
        backend.emit(&[0.3]);

        assert_eq!(input.read().unwrap().samples, vec![0.1, 0.2]);
        assert_eq!(input.read().unwrap().samples, vec![0.3]);
        assert!(input.read().is_none());
    }

    #[test]
    fn suppressed_input_discards_chunks() {
        let backend = Arc::new(FakeBackend::default());
        let input = InputChannel::new(backend.clone());
        input.start().unwrap();

        input.suppress_for(Duration::from_secs(60));
        backend.emit(&[0.5; 4]);
        assert!(input.read().is_none());

        // Closing the window must not bring the discarded chunk back.
        input.suppress_for(Duration::ZERO);
        assert!(input.read().is_none());

        backend.emit(&[0.25]);
        assert_eq!(input.read().unwrap().samples, vec![0.25]);
    }

    #[test]
    fn write_feeds_playback_queue() {
        let backend = Arc::new(FakeBackend::default());
        let output = OutputChannel::with_queue(backend.clone(), PlaybackQueue::new(4));
        assert!(output.write(&[0.1]).is_none());

        output.start().unwrap();
        assert_eq!(output.write(&[0.1, 0.2, 0.3, 0.4, 0.5]), Some(4));
        assert_eq!(output.pending(), 4);

        let queue = backend.playback_queue.lock().unwrap().clone().unwrap();
        let mut out = [0.0_f32; 2];
        queue.fill(&mut out);
        assert_eq!(out, [0.1, 0.2]);

        output.clear();
        assert_eq!(output.pending(), 0);
    }

    #[test]
    fn stop_output_drops_queued_audio() {
        let backend = Arc::new(FakeBackend::default());
        let output = OutputChannel::new(backend.clone());
        output.start().unwrap();
        output.write(&[0.1; 32]);
        output.stop();
        assert_eq!(output.pending(), 0);
    }

    /// Backend whose opens block until the test lets them through.
    struct GatedBackend {
        devices: FakeBackend,
        opening: Mutex<mpsc::Sender<()>>,
        release: Mutex<mpsc::Receiver<()>>,
    }

    impl GatedBackend {
        fn new() -> (Self, mpsc::Receiver<()>, mpsc::Sender<()>) {
            let (opening_tx, opening_rx) = mpsc::channel();
            let (release_tx, release_rx) = mpsc::channel();
            let backend = Self {
                devices: FakeBackend::default(),
                opening: Mutex::new(opening_tx),
                release: Mutex::new(release_rx),
            };
            (backend, opening_rx, release_tx)
        }

        fn wait_for_release(&self) {
            self.opening.lock().unwrap().send(()).unwrap();
            self.release.lock().unwrap().recv().unwrap();
        }
    }

    impl AudioBackend for GatedBackend {
        fn open_capture(&self, tx: mpsc::Sender<AudioChunk>) -> Result<OpenStream, DeviceError> {
            self.wait_for_release();
            self.devices.open_capture(tx)
        }

        fn open_playback(&self, queue: PlaybackQueue) -> Result<OpenStream, DeviceError> {
            self.wait_for_release();
            self.devices.open_playback(queue)
        }
    }

    #[test]
    fn state_is_starting_while_device_opens() {
        let (backend, opening, release) = GatedBackend::new();
        let input = InputChannel::new(Arc::new(backend));

        std::thread::scope(|s| {
            let starter = s.spawn(|| input.start());

            opening.recv().unwrap();
            assert_eq!(input.state(), ChannelState::Starting);
            assert!(!input.is_available());
            assert!(input.read().is_none());

            release.send(()).unwrap();
            starter.join().unwrap().unwrap();
        });
        assert_eq!(input.state(), ChannelState::Running);
    }

    #[test]
    fn stop_during_open_wins() {
        let (backend, opening, release) = GatedBackend::new();
        let backend = Arc::new(backend);
        let output = OutputChannel::new(backend.clone());

        std::thread::scope(|s| {
            let starter = s.spawn(|| output.start());

            opening.recv().unwrap();
            output.stop();
            assert_eq!(output.state(), ChannelState::Stopped);

            release.send(()).unwrap();
            let err = starter.join().unwrap().unwrap_err();
            assert!(matches!(err, DeviceError::Interrupted(Direction::Output)));
        });

        assert_eq!(output.state(), ChannelState::Stopped);
        assert!(output.write(&[0.1]).is_none());
        assert_eq!(backend.devices.output_opens.load(Ordering::SeqCst), 1);

        // A fresh start afterwards opens normally.
        std::thread::scope(|s| {
            let starter = s.spawn(|| output.start());
            opening.recv().unwrap();
            release.send(()).unwrap();
            starter.join().unwrap().unwrap();
        });
        assert_eq!(output.state(), ChannelState::Running);
    }
}
