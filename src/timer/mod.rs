//! Countdown / reminder scheduling.
//!
//! This module provides:
//! * [`TimerScheduler`]: one driver task, many cancellable countdowns,
//!   exactly-once firing.
//! * [`FireHandler`]: async callback invoked for each fired timer.
//! * [`ReminderDispatcher`]: handler that speaks reminders and runs
//!   follow-up tools through [`Announcer`] / [`ToolInvoker`].
//! * [`CountdownTools`]: the `timer.*` tool surface with delay limits and
//!   command parsing.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use voice_assistant_core::config::TimerConfig;
//! use voice_assistant_core::timer::{
//!     CountdownTools, LogAnnouncer, ReminderDispatcher, TimerScheduler,
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let dispatcher = ReminderDispatcher::new(Arc::new(LogAnnouncer));
//!     let scheduler = Arc::new(TimerScheduler::start(Arc::new(dispatcher)));
//!     let tools = CountdownTools::new(scheduler, TimerConfig::default());
//!
//!     let started = tools.start_countdown("{}", Some(10), "take a break").unwrap();
//!     println!("{}", started.message);
//! }
//! ```

pub mod dispatch;
pub mod scheduler;
pub mod tools;
pub mod types;

pub use dispatch::{reminder_text, Announcer, LogAnnouncer, ReminderDispatcher, ToolInvoker};
pub use scheduler::{FireHandler, TimerError, TimerScheduler, MAX_DELAY_SECS};
pub use tools::{parse_command, ActiveTimerInfo, ActiveTimers, CancelOutcome, CountdownTools, StartedCountdown};
pub use types::{Timer, TimerId, TimerPayload, TimerStatus, ToolInvocation};
