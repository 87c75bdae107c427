//! Lowers a media player while the assistant speaks and restores it after.
//!
//! Overlapping utterances are handled with a nesting depth rather than a
//! flag:
//!
//! ```text
//! start  depth 0→1   snapshot volume, remember it, set duck level
//! start  depth n→n+1 nothing
//! end    depth n→n-1 nothing
//! end    depth 1→0   restore the snapshot, forget it
//! end    depth 0     logged and ignored
//! ```
//!
//! Every transition runs under one mutex, including the mixer calls, so a
//! start racing an end can never capture the ducked level as the restore
//! target.  Mixer failures are logged and swallowed.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;

use super::mixer::{MediaVolume, VolumeSnapshot};
use crate::config::DuckingConfig;

// ---------------------------------------------------------------------------
// Events / state
// ---------------------------------------------------------------------------

/// TTS lifecycle events delivered by the conversational runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeechEvent {
    Started,
    Ended,
}

/// Whether a speech episode is in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuckingState {
    Idle,
    Ducked,
}

#[derive(Debug, Default)]
struct Episode {
    depth: u32,
    /// Volume to write back when the outermost episode ends.  `None` when
    /// nothing was lowered (app absent, already quiet, or mixer failure).
    restore_to: Option<VolumeSnapshot>,
}

// ---------------------------------------------------------------------------
// DuckingCoordinator
// ---------------------------------------------------------------------------

pub struct DuckingCoordinator {
    mixer: Arc<dyn MediaVolume>,
    app_name: String,
    duck_level: f32,
    episode: Mutex<Episode>,
}

impl DuckingCoordinator {
    /// `duck_level` is clamped to `0.0..=1.0`.
    pub fn new(mixer: Arc<dyn MediaVolume>, app_name: impl Into<String>, duck_level: f32) -> Self {
        let duck_level = if duck_level.is_nan() {
            0.0
        } else {
            duck_level.clamp(0.0, 1.0)
        };
        Self {
            mixer,
            app_name: app_name.into(),
            duck_level,
            episode: Mutex::new(Episode::default()),
        }
    }

    pub fn from_config(config: &DuckingConfig, mixer: Arc<dyn MediaVolume>) -> Self {
        Self::new(mixer, config.app_name.clone(), config.duck_level)
    }

    fn episode(&self) -> MutexGuard<'_, Episode> {
        self.episode.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The assistant started speaking.
    pub fn on_speech_start(&self) {
        let mut ep = self.episode();
        ep.depth = ep.depth.saturating_add(1);
        if ep.depth > 1 {
            log::debug!("nested speech start (depth {})", ep.depth);
            return;
        }

        let snapshot = match self.mixer.snapshot(&self.app_name) {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => {
                log::debug!("'{}' not playing; nothing to duck", self.app_name);
                return;
            }
            Err(e) => {
                log::debug!("reading '{}' volume failed (ducking skipped): {e}", self.app_name);
                return;
            }
        };

        let current = snapshot.level;
        if current <= self.duck_level {
            log::debug!("'{}' already at {current:.2}; not ducking", self.app_name);
            return;
        }

        match self.mixer.set_volume(&self.app_name, self.duck_level) {
            Ok(true) => {
                ep.restore_to = Some(snapshot);
                log::info!(
                    "'{}' volume ducked: {current:.2} -> {:.2}",
                    self.app_name,
                    self.duck_level
                );
            }
            Ok(false) => log::debug!("'{}' exited before it could be ducked", self.app_name),
            Err(e) => log::debug!("ducking '{}' failed: {e}", self.app_name),
        }
    }

    /// The assistant finished speaking.
    pub fn on_speech_end(&self) {
        let mut ep = self.episode();
        if ep.depth == 0 {
            log::debug!("speech end without a matching start; ignored");
            return;
        }

        ep.depth -= 1;
        if ep.depth > 0 {
            log::debug!("nested speech end (depth {})", ep.depth);
            return;
        }

        let Some(target) = ep.restore_to.take() else {
            return;
        };
        match self.mixer.restore(&self.app_name, &target) {
            Ok(true) => log::info!("'{}' volume restored to {:.2}", self.app_name, target.level),
            Ok(false) => log::debug!("'{}' exited before restore", self.app_name),
            Err(e) => log::debug!("restoring '{}' volume failed: {e}", self.app_name),
        }
    }

    /// Apply one lifecycle event.
    pub fn handle(&self, event: SpeechEvent) {
        match event {
            SpeechEvent::Started => self.on_speech_start(),
            SpeechEvent::Ended => self.on_speech_end(),
        }
    }

    /// `true` while at least one speech episode is open.
    pub fn currently_ducked(&self) -> bool {
        self.episode().depth > 0
    }

    pub fn state(&self) -> DuckingState {
        if self.currently_ducked() {
            DuckingState::Ducked
        } else {
            DuckingState::Idle
        }
    }

    pub fn depth(&self) -> u32 {
        self.episode().depth
    }

    /// Level that will be written back when the episode ends, if any.
    pub fn restore_target(&self) -> Option<f32> {
        self.episode().restore_to.as_ref().map(|s| s.level)
    }

    /// Consume events until the sender side is dropped.
    ///
    /// Mixer calls may block (they shell out), so each event is applied on
    /// the blocking pool; events are still applied strictly in order.
    pub async fn run(self: Arc<Self>, mut events: mpsc::Receiver<SpeechEvent>) {
        while let Some(event) = events.recv().await {
            let this = Arc::clone(&self);
            if let Err(e) = tokio::task::spawn_blocking(move || this.handle(event)).await {
                log::error!("ducking task failed on {event:?}: {e}");
            }
        }
        log::debug!("speech event channel closed; ducking coordinator stopped");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ducking::mixer::VolumeError;
    use std::sync::atomic::{AtomicBool, Ordering};

    // -----------------------------------------------------------------------
    // Test doubles
    // -----------------------------------------------------------------------

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Get,
        Set(f32),
    }

    /// Records every call; `volume == None` means the app is not running.
    struct FakeMixer {
        volume: Mutex<Option<f32>>,
        calls: Mutex<Vec<Call>>,
        fail: AtomicBool,
    }

    impl FakeMixer {
        fn playing_at(v: f32) -> Arc<Self> {
            Arc::new(Self {
                volume: Mutex::new(Some(v)),
                calls: Mutex::new(Vec::new()),
                fail: AtomicBool::new(false),
            })
        }

        fn not_running() -> Arc<Self> {
            Arc::new(Self {
                volume: Mutex::new(None),
                calls: Mutex::new(Vec::new()),
                fail: AtomicBool::new(false),
            })
        }

        fn sets(&self) -> Vec<f32> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter_map(|c| match c {
                    Call::Set(v) => Some(*v),
                    Call::Get => None,
                })
                .collect()
        }

        fn volume(&self) -> Option<f32> {
            *self.volume.lock().unwrap()
        }
    }

    impl MediaVolume for FakeMixer {
        fn get_volume(&self, _app: &str) -> Result<Option<f32>, VolumeError> {
            self.calls.lock().unwrap().push(Call::Get);
            if self.fail.load(Ordering::SeqCst) {
                return Err(VolumeError::Command("mixer offline".into()));
            }
            Ok(*self.volume.lock().unwrap())
        }

        fn set_volume(&self, _app: &str, volume: f32) -> Result<bool, VolumeError> {
            self.calls.lock().unwrap().push(Call::Set(volume));
            if self.fail.load(Ordering::SeqCst) {
                return Err(VolumeError::Command("mixer offline".into()));
            }
            let mut v = self.volume.lock().unwrap();
            match v.as_mut() {
                Some(slot) => {
                    *slot = volume;
                    Ok(true)
                }
                None => Ok(false),
            }
        }
    }

    fn coordinator(mixer: &Arc<FakeMixer>) -> DuckingCoordinator {
        DuckingCoordinator::new(mixer.clone(), "player", 0.2)
    }

    // -----------------------------------------------------------------------
    // Tests
    // -----------------------------------------------------------------------

    #[test]
    fn single_episode_ducks_and_restores() {
        let mixer = FakeMixer::playing_at(0.8);
        let duck = coordinator(&mixer);

        duck.on_speech_start();
        assert!(duck.currently_ducked());
        assert_eq!(duck.state(), DuckingState::Ducked);
        assert_eq!(mixer.volume(), Some(0.2));
        assert_eq!(duck.restore_target(), Some(0.8));

        duck.on_speech_end();
        assert!(!duck.currently_ducked());
        assert_eq!(mixer.volume(), Some(0.8));
        assert_eq!(mixer.sets(), vec![0.2, 0.8]);
        assert!(duck.restore_target().is_none());
    }

    #[test]
    fn three_starts_then_three_ends_duck_once_restore_once() {
        let mixer = FakeMixer::playing_at(0.6);
        let duck = coordinator(&mixer);

        for _ in 0..3 {
            duck.on_speech_start();
        }
        assert_eq!(duck.depth(), 3);
        assert_eq!(mixer.sets(), vec![0.2]);

        duck.on_speech_end();
        duck.on_speech_end();
        assert_eq!(mixer.sets(), vec![0.2], "restored before outermost end");
        assert!(duck.currently_ducked());

        duck.on_speech_end();
        assert_eq!(mixer.sets(), vec![0.2, 0.6]);
        assert_eq!(mixer.volume(), Some(0.6));
    }

    #[test]
    fn nested_start_does_not_recapture_ducked_level() {
        let mixer = FakeMixer::playing_at(0.9);
        let duck = coordinator(&mixer);

        duck.on_speech_start();
        duck.on_speech_start();
        duck.on_speech_end();
        duck.on_speech_start();
        duck.on_speech_end();
        duck.on_speech_end();

        assert_eq!(mixer.volume(), Some(0.9));
        assert_eq!(
            mixer
                .calls
                .lock()
                .unwrap()
                .iter()
                .filter(|c| **c == Call::Get)
                .count(),
            1
        );
    }

    #[test]
    fn end_at_depth_zero_is_ignored() {
        let mixer = FakeMixer::playing_at(0.7);
        let duck = coordinator(&mixer);

        duck.on_speech_end();
        duck.on_speech_end();
        assert_eq!(duck.depth(), 0);
        assert!(mixer.calls.lock().unwrap().is_empty());

        // A later episode still works normally.
        duck.on_speech_start();
        duck.on_speech_end();
        assert_eq!(mixer.sets(), vec![0.2, 0.7]);
    }

    #[test]
    fn app_not_running_is_noop() {
        let mixer = FakeMixer::not_running();
        let duck = coordinator(&mixer);

        duck.on_speech_start();
        assert!(duck.currently_ducked());
        duck.on_speech_end();
        assert!(mixer.sets().is_empty());
    }

    #[test]
    fn already_quiet_app_is_left_alone() {
        let mixer = FakeMixer::playing_at(0.1);
        let duck = coordinator(&mixer);

        duck.on_speech_start();
        duck.on_speech_end();
        assert!(mixer.sets().is_empty());
        assert_eq!(mixer.volume(), Some(0.1));
    }

    #[test]
    fn mixer_failure_is_swallowed() {
        let mixer = FakeMixer::playing_at(0.5);
        mixer.fail.store(true, Ordering::SeqCst);
        let duck = coordinator(&mixer);

        duck.on_speech_start();
        duck.on_speech_end();
        assert_eq!(duck.depth(), 0);
        assert!(mixer.sets().is_empty());
    }

    #[test]
    fn restore_failure_still_clears_target() {
        let mixer = FakeMixer::playing_at(0.5);
        let duck = coordinator(&mixer);

        duck.on_speech_start();
        mixer.fail.store(true, Ordering::SeqCst);
        duck.on_speech_end();
        assert!(duck.restore_target().is_none());

        // Next episode captures a fresh value.
        mixer.fail.store(false, Ordering::SeqCst);
        *mixer.volume.lock().unwrap() = Some(0.4);
        duck.on_speech_start();
        assert_eq!(duck.restore_target(), Some(0.4));
    }

    #[test]
    fn restore_overwrites_external_change() {
        let mixer = FakeMixer::playing_at(0.8);
        let duck = coordinator(&mixer);

        duck.on_speech_start();
        *mixer.volume.lock().unwrap() = Some(0.3);
        duck.on_speech_end();
        assert_eq!(mixer.volume(), Some(0.8));
    }

    #[test]
    fn duck_level_is_clamped() {
        let mixer = FakeMixer::playing_at(0.8);
        let duck = DuckingCoordinator::new(mixer.clone(), "player", 4.0);
        duck.on_speech_start();
        assert!(mixer.sets().is_empty(), "0.8 is below a 1.0 duck level");
    }

    /// N concurrent starts then N concurrent ends from many threads:
    /// exactly one duck write and one restore.
    #[test]
    fn concurrent_overlapping_episodes() {
        let mixer = FakeMixer::playing_at(0.75);
        let duck = Arc::new(coordinator(&mixer));

        let spawn_all = |f: fn(&DuckingCoordinator)| {
            let handles: Vec<_> = (0..16)
                .map(|_| {
                    let d = Arc::clone(&duck);
                    std::thread::spawn(move || f(d.as_ref()))
                })
                .collect();
            for h in handles {
                h.join().unwrap();
            }
        };

        spawn_all(DuckingCoordinator::on_speech_start);
        assert_eq!(duck.depth(), 16);
        spawn_all(DuckingCoordinator::on_speech_end);

        assert_eq!(duck.depth(), 0);
        assert_eq!(mixer.sets(), vec![0.2, 0.75]);
    }

    /// Interleaved start/end pairs from many threads never leave the depth
    /// negative or the volume ducked.
    #[test]
    fn concurrent_interleaved_pairs_end_restored() {
        let mixer = FakeMixer::playing_at(0.66);
        let duck = Arc::new(coordinator(&mixer));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let d = Arc::clone(&duck);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        d.on_speech_start();
                        d.on_speech_end();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(duck.depth(), 0);
        assert_eq!(mixer.volume(), Some(0.66));
        let sets = mixer.sets();
        assert_eq!(sets.len() % 2, 0);
        assert!(sets.chunks(2).all(|pair| pair == [0.2, 0.66]));
    }

    #[tokio::test]
    async fn run_applies_events_in_order() {
        let mixer = FakeMixer::playing_at(0.9);
        let duck = Arc::new(coordinator(&mixer));
        let (tx, rx) = mpsc::channel(8);

        let task = tokio::spawn(Arc::clone(&duck).run(rx));
        for event in [
            SpeechEvent::Started,
            SpeechEvent::Started,
            SpeechEvent::Ended,
            SpeechEvent::Ended,
            SpeechEvent::Ended,
        ] {
            tx.send(event).await.unwrap();
        }
        drop(tx);
        task.await.unwrap();

        assert_eq!(duck.depth(), 0);
        assert_eq!(mixer.sets(), vec![0.2, 0.9]);
    }
}
