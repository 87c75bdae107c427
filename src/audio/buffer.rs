//! Bounded FIFO of `f32` samples feeding the playback stream.
//!
//! Writers append interleaved samples; the device callback pulls exactly as
//! many samples as the hardware buffer needs and pads with silence on
//! underrun.  Unlike a capture ring buffer, a full queue rejects new samples
//! instead of overwriting queued speech.
//!
//! # Example
//!
//! ```rust
//! use voice_assistant_core::audio::PlaybackQueue;
//!
//! let queue = PlaybackQueue::new(4);
//! assert_eq!(queue.push(&[0.1, 0.2, 0.3, 0.4, 0.5]), 4); // last sample rejected
//!
//! let mut out = [1.0_f32; 6];
//! queue.fill(&mut out);
//! assert_eq!(out, [0.1, 0.2, 0.3, 0.4, 0.0, 0.0]);
//! ```

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

/// Default capacity: 10 s of 48 kHz stereo.
pub const DEFAULT_PLAYBACK_CAPACITY: usize = 48_000 * 2 * 10;

/// Thread-shared playback FIFO.  Cheap to clone (`Arc` clone).
#[derive(Clone)]
pub struct PlaybackQueue {
    inner: Arc<Mutex<VecDeque<f32>>>,
    capacity: usize,
}

impl PlaybackQueue {
    /// Create an empty queue holding at most `capacity` samples.
    ///
    /// # Panics
    ///
    /// Panics if `capacity == 0`.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "PlaybackQueue capacity must be > 0");
        Self {
            inner: Arc::new(Mutex::new(VecDeque::with_capacity(capacity.min(65_536)))),
            capacity,
        }
    }

    /// Append as many of `samples` as fit; returns the number accepted.
    pub fn push(&self, samples: &[f32]) -> usize {
        let mut q = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let room = self.capacity - q.len();
        let accepted = room.min(samples.len());
        q.extend(&samples[..accepted]);
        accepted
    }

    /// Fill `out` from the head of the queue, writing silence past the end
    /// of the queued data.  Called from the device callback.
    pub fn fill(&self, out: &mut [f32]) {
        let mut q = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        for slot in out.iter_mut() {
            *slot = q.pop_front().unwrap_or(0.0);
        }
    }

    /// Drop everything queued (barge-in / channel stop).
    pub fn clear(&self) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Number of samples waiting to be played.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for PlaybackQueue {
    fn default() -> Self {
        Self::new(DEFAULT_PLAYBACK_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_queue_is_empty() {
        let q = PlaybackQueue::new(8);
        assert!(q.is_empty());
        assert_eq!(q.capacity(), 8);
    }

    #[test]
    #[should_panic]
    fn zero_capacity_panics() {
        let _ = PlaybackQueue::new(0);
    }

    #[test]
    fn fill_preserves_order_across_calls() {
        let q = PlaybackQueue::new(8);
        q.push(&[1.0, 2.0, 3.0]);
        q.push(&[4.0]);

        let mut out = [0.0_f32; 2];
        q.fill(&mut out);
        assert_eq!(out, [1.0, 2.0]);
        q.fill(&mut out);
        assert_eq!(out, [3.0, 4.0]);
        assert!(q.is_empty());
    }

    #[test]
    fn underrun_writes_silence() {
        let q = PlaybackQueue::new(8);
        let mut out = [0.7_f32; 3];
        q.fill(&mut out);
        assert_eq!(out, [0.0, 0.0, 0.0]);
    }

    #[test]
    fn full_queue_rejects_instead_of_overwriting() {
        let q = PlaybackQueue::new(3);
        assert_eq!(q.push(&[1.0, 2.0]), 2);
        assert_eq!(q.push(&[3.0, 4.0]), 1);
        assert_eq!(q.push(&[5.0]), 0);

        let mut out = [0.0_f32; 3];
        q.fill(&mut out);
        assert_eq!(out, [1.0, 2.0, 3.0]);
    }

    #[test]
    fn clones_share_storage() {
        let q = PlaybackQueue::new(4);
        let writer = q.clone();
        writer.push(&[0.5]);
        assert_eq!(q.len(), 1);
        q.clear();
        assert!(writer.is_empty());
    }
}
