//! Countdown tool surface exposed to the AI backend.
//!
//! Three operations mirror the tools the assistant can call:
//!
//! | Tool                       | Method                                   |
//! |----------------------------|------------------------------------------|
//! | `timer.start_countdown`    | [`CountdownTools::start_countdown`]      |
//! | `timer.cancel_countdown`   | [`CountdownTools::cancel_countdown`]     |
//! | `timer.get_active_timers`  | [`CountdownTools::get_active_timers`]    |
//!
//! `start_countdown` takes a `command` string that is either empty / `{}`
//! (reminder mode) or a JSON tool call such as
//! `{"name": "audio_speaker.set_volume", "arguments": {"volume": 50}}`.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use super::scheduler::{TimerError, TimerScheduler};
use super::types::{TimerId, TimerPayload, TimerStatus, ToolInvocation};
use crate::config::TimerConfig;

// ---------------------------------------------------------------------------
// Command parsing
// ---------------------------------------------------------------------------

/// Parse a countdown `command`.
///
/// Returns `Ok(None)` for reminder mode.  `arguments` may also arrive as a
/// JSON-encoded string, which is decoded.
pub fn parse_command(command: &str) -> Result<Option<ToolInvocation>, TimerError> {
    let trimmed = command.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    let value: serde_json::Value = serde_json::from_str(trimmed)
        .map_err(|e| TimerError::InvalidCommand(format!("not JSON: {e}")))?;
    let obj = value
        .as_object()
        .ok_or_else(|| TimerError::InvalidCommand("expected a JSON object".into()))?;
    if obj.is_empty() {
        return Ok(None);
    }

    let name = obj
        .get("name")
        .and_then(|n| n.as_str())
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .ok_or_else(|| TimerError::InvalidCommand("missing tool \"name\"".into()))?;

    let arguments = match obj.get("arguments") {
        None | Some(serde_json::Value::Null) => serde_json::json!({}),
        Some(serde_json::Value::String(s)) if s.trim().is_empty() => serde_json::json!({}),
        Some(serde_json::Value::String(s)) => serde_json::from_str(s)
            .map_err(|e| TimerError::InvalidCommand(format!("arguments: {e}")))?,
        Some(other) => other.clone(),
    };
    if !arguments.is_object() {
        return Err(TimerError::InvalidCommand(
            "\"arguments\" must be a JSON object".into(),
        ));
    }

    Ok(Some(ToolInvocation::new(name, arguments)))
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct StartedCountdown {
    pub success: bool,
    pub timer_id: TimerId,
    pub delay: u64,
    pub description: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CancelOutcome {
    pub success: bool,
    pub timer_id: TimerId,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActiveTimerInfo {
    pub timer_id: TimerId,
    pub description: String,
    pub command: Option<ToolInvocation>,
    pub delay: f64,
    pub remaining_time: f64,
    pub progress: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActiveTimers {
    pub success: bool,
    pub total_active_timers: usize,
    pub timers: Vec<ActiveTimerInfo>,
}

// ---------------------------------------------------------------------------
// CountdownTools
// ---------------------------------------------------------------------------

pub struct CountdownTools {
    scheduler: Arc<TimerScheduler>,
    limits: TimerConfig,
}

impl CountdownTools {
    pub fn new(scheduler: Arc<TimerScheduler>, limits: TimerConfig) -> Self {
        Self { scheduler, limits }
    }

    /// `timer.start_countdown`.  `delay` defaults to the configured value.
    ///
    /// # Errors
    ///
    /// [`TimerError::InvalidDelay`], [`TimerError::InvalidCommand`] or
    /// [`TimerError::ShutDown`].
    pub fn start_countdown(
        &self,
        command: &str,
        delay: Option<u64>,
        description: &str,
    ) -> Result<StartedCountdown, TimerError> {
        let delay = delay.unwrap_or(self.limits.default_delay_secs);
        let (min, max) = (self.limits.min_delay_secs, self.limits.max_delay_secs);
        if delay < min || delay > max {
            return Err(TimerError::InvalidDelay { got: delay, min, max });
        }

        let payload = match parse_command(command)? {
            Some(tool) => TimerPayload::tool(tool, description),
            None => TimerPayload::reminder(description),
        };
        let timer_id = self
            .scheduler
            .create_after(Duration::from_secs(delay), payload)?;

        Ok(StartedCountdown {
            success: true,
            timer_id,
            delay,
            description: description.to_string(),
            message: format!("Countdown {timer_id} started, fires in {delay} seconds"),
        })
    }

    /// `timer.cancel_countdown`.  A lost race is reported, not raised.
    pub fn cancel_countdown(&self, timer_id: u64) -> CancelOutcome {
        let id = TimerId(timer_id);
        if self.scheduler.cancel(id) {
            return CancelOutcome {
                success: true,
                timer_id: id,
                message: format!("Countdown {id} cancelled"),
            };
        }

        let message = match self.scheduler.status(id) {
            Some(TimerStatus::Firing) => {
                format!("Could not cancel countdown {id}: it is already firing")
            }
            Some(TimerStatus::Fired) => {
                format!("Could not cancel countdown {id}: it has already fired")
            }
            Some(TimerStatus::Cancelled) => format!("Countdown {id} was already cancelled"),
            // An id unknown to `cancel` that was issued just afterwards.
            Some(TimerStatus::Pending) | None => format!("No countdown with id {timer_id}"),
        };
        CancelOutcome {
            success: false,
            timer_id: id,
            message,
        }
    }

    /// `timer.get_active_timers`.
    pub fn get_active_timers(&self) -> ActiveTimers {
        let now = Instant::now();
        let timers: Vec<ActiveTimerInfo> = self
            .scheduler
            .list_active()
            .into_iter()
            .map(|t| ActiveTimerInfo {
                timer_id: t.id,
                delay: round2(t.total().as_secs_f64()),
                remaining_time: round2(t.remaining(now).as_secs_f64()),
                progress: round2(t.progress(now)),
                description: t.payload.description,
                command: t.payload.tool,
            })
            .collect();

        ActiveTimers {
            success: true,
            total_active_timers: timers.len(),
            timers,
        }
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
