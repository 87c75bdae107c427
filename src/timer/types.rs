//! Timer entity and its status machine.
//!
//! ```text
//! Pending ──deadline reached──▶ Firing ──callback returned──▶ Fired
//!    │
//!    └──cancel──▶ Cancelled
//! ```
//!
//! `Fired` and `Cancelled` are terminal.  A `Firing` timer can no longer be
//! cancelled.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

// ---------------------------------------------------------------------------
// TimerId
// ---------------------------------------------------------------------------

/// Identifier unique for the lifetime of one scheduler.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct TimerId(pub u64);

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// TimerStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerStatus {
    Pending,
    Firing,
    Fired,
    Cancelled,
}

impl TimerStatus {
    /// `true` for states a timer never leaves.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TimerStatus::Fired | TimerStatus::Cancelled)
    }

    pub fn label(&self) -> &'static str {
        match self {
            TimerStatus::Pending => "pending",
            TimerStatus::Firing => "firing",
            TimerStatus::Fired => "fired",
            TimerStatus::Cancelled => "cancelled",
        }
    }
}

// ---------------------------------------------------------------------------
// Payload
// ---------------------------------------------------------------------------

/// A tool call to perform when the timer fires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    /// Registered tool name, e.g. `"audio_speaker.set_volume"`.
    pub name: String,
    /// Tool arguments (a JSON object).
    #[serde(default = "empty_object")]
    pub arguments: serde_json::Value,
}

fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

impl ToolInvocation {
    pub fn new(name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }
}

/// What a timer carries.  The scheduler never looks inside.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimerPayload {
    /// Reminder text spoken when the timer fires (may be empty).
    pub description: String,
    /// Optional follow-up tool call.
    pub tool: Option<ToolInvocation>,
}

impl TimerPayload {
    /// A plain spoken reminder.
    pub fn reminder(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            tool: None,
        }
    }

    /// A delayed tool call, with an optional description.
    pub fn tool(invocation: ToolInvocation, description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            tool: Some(invocation),
        }
    }
}

// ---------------------------------------------------------------------------
// Timer
// ---------------------------------------------------------------------------

/// Snapshot of one countdown.
#[derive(Debug, Clone)]
pub struct Timer {
    pub id: TimerId,
    pub created_at: Instant,
    pub deadline: Instant,
    pub payload: TimerPayload,
    pub status: TimerStatus,
}

impl Timer {
    /// Full countdown length.
    pub fn total(&self) -> Duration {
        self.deadline.saturating_duration_since(self.created_at)
    }

    /// Time left until the deadline (zero once passed).
    pub fn remaining(&self, now: Instant) -> Duration {
        self.deadline.saturating_duration_since(now)
    }

    /// Fraction of the countdown elapsed, in `0.0..=1.0`.
    pub fn progress(&self, now: Instant) -> f64 {
        let total = self.total().as_secs_f64();
        if total <= 0.0 {
            return 1.0;
        }
        let elapsed = now.saturating_duration_since(self.created_at).as_secs_f64();
        (elapsed / total).clamp(0.0, 1.0)
    }
}
