//! Countdown scheduler with exactly-once firing.
//!
//! # Architecture
//!
//! ```text
//! create / cancel / list_active ──lock──▶ Registry ◀──lock── driver loop
//!                                            │                  │
//!                        wake (Notify) ──────┴──────────────▶ sleep_until(nearest deadline)
//!                                                               │
//!                                              Pending → Firing (under lock)
//!                                                               │
//!                                            tokio::spawn(fire) per timer, lock released
//!                                                               │
//!                                     FireHandler::on_fire → Firing → Fired (under lock)
//! ```
//!
//! One driver task owns the wait.  It always sleeps until the nearest
//! pending deadline and is woken early when a nearer timer is created.
//! The Pending → Firing and Pending → Cancelled transitions both happen
//! under the registry lock, so whichever of expiry and `cancel` takes the
//! lock first wins and the other observes the result.  Handlers run on
//! their own tasks without the lock; a slow or failing handler delays no
//! other timer.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::types::{Timer, TimerId, TimerPayload, TimerStatus};

/// How many finished timers are remembered for [`TimerScheduler::status`].
const HISTORY_LEN: usize = 64;

/// Longest delay [`TimerScheduler::create_after`] accepts (one year).
pub const MAX_DELAY_SECS: u64 = 366 * 24 * 60 * 60;

// ---------------------------------------------------------------------------
// TimerError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum TimerError {
    /// The scheduler was shut down; no new timers are accepted.
    #[error("timer scheduler has shut down")]
    ShutDown,

    /// A countdown request asked for a delay outside the configured range.
    #[error("delay must be between {min} and {max} seconds (got {got})")]
    InvalidDelay { got: u64, min: u64, max: u64 },

    /// A countdown command could not be parsed as a tool invocation.
    #[error("invalid countdown command: {0}")]
    InvalidCommand(String),
}

// ---------------------------------------------------------------------------
// FireHandler trait
// ---------------------------------------------------------------------------

/// Receives each timer exactly once when it fires.
///
/// Errors and panics are logged by the scheduler; the timer still ends up
/// `Fired` and is never retried.
#[async_trait]
pub trait FireHandler: Send + Sync {
    async fn on_fire(&self, timer: Timer) -> anyhow::Result<()>;
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Registry {
    next_id: u64,
    /// Pending and Firing timers.
    timers: HashMap<TimerId, Timer>,
    /// Most recent terminal outcomes, oldest first.
    history: VecDeque<(TimerId, TimerStatus)>,
    closed: bool,
}

impl Registry {
    fn next_deadline(&self) -> Option<Instant> {
        self.timers
            .values()
            .filter(|t| t.status == TimerStatus::Pending)
            .map(|t| t.deadline)
            .min()
    }

    /// Move every pending timer whose deadline has passed to `Firing` and
    /// return snapshots in deadline order.
    fn take_due(&mut self, now: Instant) -> Vec<Timer> {
        let mut due: Vec<Timer> = self
            .timers
            .values_mut()
            .filter(|t| t.status == TimerStatus::Pending && t.deadline <= now)
            .map(|t| {
                t.status = TimerStatus::Firing;
                t.clone()
            })
            .collect();
        due.sort_by_key(|t| (t.deadline, t.id));
        due
    }

    fn finish(&mut self, id: TimerId, status: TimerStatus) {
        self.timers.remove(&id);
        if self.history.len() == HISTORY_LEN {
            self.history.pop_front();
        }
        self.history.push_back((id, status));
    }
}

struct Shared {
    registry: Mutex<Registry>,
    wake: Notify,
    handler: Arc<dyn FireHandler>,
}

impl Shared {
    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ---------------------------------------------------------------------------
// TimerScheduler
// ---------------------------------------------------------------------------

/// Owns all countdowns of one assistant session.
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use std::time::Duration;
/// use async_trait::async_trait;
/// use voice_assistant_core::timer::{FireHandler, Timer, TimerPayload, TimerScheduler};
///
/// struct Print;
///
/// #[async_trait]
/// impl FireHandler for Print {
///     async fn on_fire(&self, timer: Timer) -> anyhow::Result<()> {
///         println!("{}", timer.payload.description);
///         Ok(())
///     }
/// }
///
/// # async fn example() {
/// let scheduler = TimerScheduler::start(Arc::new(Print));
/// let id = scheduler
///     .create_after(Duration::from_secs(10), TimerPayload::reminder("tea is ready"))
///     .unwrap();
/// assert!(scheduler.cancel(id));
/// # }
/// ```
pub struct TimerScheduler {
    shared: Arc<Shared>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl TimerScheduler {
    /// Spawn the driver task and return the scheduler.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn start(handler: Arc<dyn FireHandler>) -> Self {
        let shared = Arc::new(Shared {
            registry: Mutex::new(Registry::default()),
            wake: Notify::new(),
            handler,
        });
        let driver = tokio::spawn(drive(Arc::clone(&shared)));
        Self {
            shared,
            driver: Mutex::new(Some(driver)),
        }
    }

    /// Schedule `payload` to fire at `deadline`.  A deadline in the past
    /// fires on the driver's next turn.
    pub fn create(&self, deadline: Instant, payload: TimerPayload) -> Result<TimerId, TimerError> {
        let mut reg = self.shared.registry();
        if reg.closed {
            return Err(TimerError::ShutDown);
        }

        reg.next_id += 1;
        let id = TimerId(reg.next_id);
        let now = Instant::now();
        let rearm = reg.next_deadline().map_or(true, |nearest| deadline < nearest);

        reg.timers.insert(
            id,
            Timer {
                id,
                created_at: now.min(deadline),
                deadline,
                payload,
                status: TimerStatus::Pending,
            },
        );
        drop(reg);

        log::info!(
            "timer {id} scheduled in {:.1}s",
            deadline.saturating_duration_since(now).as_secs_f64()
        );
        if rearm {
            self.shared.wake.notify_one();
        }
        Ok(id)
    }

    /// Schedule `payload` to fire `delay` from now.
    ///
    /// # Errors
    ///
    /// [`TimerError::InvalidDelay`] when `delay` exceeds [`MAX_DELAY_SECS`],
    /// or [`TimerError::ShutDown`].
    pub fn create_after(
        &self,
        delay: Duration,
        payload: TimerPayload,
    ) -> Result<TimerId, TimerError> {
        let deadline = Some(delay)
            .filter(|d| d.as_secs() <= MAX_DELAY_SECS)
            .and_then(|d| Instant::now().checked_add(d))
            .ok_or(TimerError::InvalidDelay {
                got: delay.as_secs(),
                min: 0,
                max: MAX_DELAY_SECS,
            })?;
        self.create(deadline, payload)
    }

    /// Cancel a pending timer.
    ///
    /// Returns `false` when the timer is unknown, already finished, or has
    /// begun firing (too late: the handler will still run exactly once).
    pub fn cancel(&self, id: TimerId) -> bool {
        let mut reg = self.shared.registry();
        match reg.timers.get(&id).map(|t| t.status) {
            Some(TimerStatus::Pending) => {
                reg.finish(id, TimerStatus::Cancelled);
                drop(reg);
                log::info!("timer {id} cancelled");
                self.shared.wake.notify_one();
                true
            }
            Some(status) => {
                log::info!("timer {id} could not be cancelled: already {}", status.label());
                false
            }
            None => {
                log::debug!("cancel for unknown or finished timer {id}");
                false
            }
        }
    }

    /// Pending timers ordered by ascending deadline.
    pub fn list_active(&self) -> Vec<Timer> {
        let reg = self.shared.registry();
        let mut active: Vec<Timer> = reg
            .timers
            .values()
            .filter(|t| t.status == TimerStatus::Pending)
            .cloned()
            .collect();
        drop(reg);
        active.sort_by_key(|t| (t.deadline, t.id));
        active
    }

    /// Current status of `id`.  Finished timers are remembered for a while;
    /// `None` means the id was never issued or has been forgotten.
    pub fn status(&self, id: TimerId) -> Option<TimerStatus> {
        let reg = self.shared.registry();
        reg.timers.get(&id).map(|t| t.status).or_else(|| {
            reg.history
                .iter()
                .rev()
                .find(|(hid, _)| *hid == id)
                .map(|(_, status)| *status)
        })
    }

    /// Cancel every pending timer and stop the driver.  Handlers already
    /// running are left to finish.  Later `create` calls fail.
    pub fn shutdown(&self) {
        let mut reg = self.shared.registry();
        if reg.closed {
            return;
        }
        reg.closed = true;
        let pending: Vec<TimerId> = reg
            .timers
            .values()
            .filter(|t| t.status == TimerStatus::Pending)
            .map(|t| t.id)
            .collect();
        for id in &pending {
            reg.finish(*id, TimerStatus::Cancelled);
        }
        drop(reg);

        self.shared.wake.notify_one();
        log::info!("timer scheduler shut down ({} pending cancelled)", pending.len());
    }

    /// Wait for the driver task to exit after [`shutdown`](Self::shutdown).
    pub async fn join(&self) {
        let driver = self
            .driver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(driver) = driver {
            if let Err(e) = driver.await {
                log::error!("timer driver task failed: {e}");
            }
        }
    }
}

impl Drop for TimerScheduler {
    fn drop(&mut self) {
        self.shared.registry().closed = true;
        self.shared.wake.notify_one();
    }
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

async fn drive(shared: Arc<Shared>) {
    loop {
        let (due, next) = {
            let mut reg = shared.registry();
            if reg.closed {
                break;
            }
            let due = reg.take_due(Instant::now());
            (due, reg.next_deadline())
        };

        for timer in due {
            tokio::spawn(fire(Arc::clone(&shared), timer));
        }

        // `notify_one` stores a permit when nobody is waiting, so a timer
        // created between the unlock above and this await is not missed.
        match next {
            Some(deadline) => {
                tokio::select! {
                    _ = tokio::time::sleep_until(deadline) => {}
                    _ = shared.wake.notified() => {}
                }
            }
            None => shared.wake.notified().await,
        }
    }
    log::debug!("timer driver stopped");
}

async fn fire(shared: Arc<Shared>, timer: Timer) {
    let id = timer.id;
    log::info!("timer {id} firing");

    let handler = Arc::clone(&shared.handler);
    match tokio::spawn(async move { handler.on_fire(timer).await }).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => log::error!("timer {id} handler failed: {e:#}"),
        Err(e) if e.is_panic() => log::error!("timer {id} handler panicked"),
        Err(e) => log::error!("timer {id} handler did not complete: {e}"),
    }

    shared.registry().finish(id, TimerStatus::Fired);
    log::debug!("timer {id} fired");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
