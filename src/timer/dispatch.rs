//! Turns fired timers into user-facing output.
//!
//! [`ReminderDispatcher`] is the [`FireHandler`] the runtime registers with
//! the scheduler.  For each timer it runs the optional follow-up tool through
//! a [`ToolInvoker`] and then speaks the reminder through an [`Announcer`].
//! Both collaborators live outside this crate's core.

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;

use super::scheduler::FireHandler;
use super::types::Timer;

// ---------------------------------------------------------------------------
// Collaborator traits
// ---------------------------------------------------------------------------

/// Delivers reminder text to the user (TTS, notification, console …).
#[async_trait]
pub trait Announcer: Send + Sync {
    async fn announce(&self, text: &str) -> anyhow::Result<()>;
}

/// Calls a registered tool by name.
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    async fn invoke(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> anyhow::Result<serde_json::Value>;
}

/// Announcer that only writes to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAnnouncer;

#[async_trait]
impl Announcer for LogAnnouncer {
    async fn announce(&self, text: &str) -> anyhow::Result<()> {
        log::info!("reminder: {text}");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ReminderDispatcher
// ---------------------------------------------------------------------------

pub struct ReminderDispatcher {
    announcer: Arc<dyn Announcer>,
    tools: Option<Arc<dyn ToolInvoker>>,
}

impl ReminderDispatcher {
    pub fn new(announcer: Arc<dyn Announcer>) -> Self {
        Self {
            announcer,
            tools: None,
        }
    }

    /// Enable tool-execution timers.
    pub fn with_tools(mut self, tools: Arc<dyn ToolInvoker>) -> Self {
        self.tools = Some(tools);
        self
    }
}

/// Text spoken when `timer` fires.
pub fn reminder_text(timer: &Timer) -> String {
    let description = timer.payload.description.trim();
    if !description.is_empty() {
        return description.to_string();
    }
    match &timer.payload.tool {
        Some(tool) => format!("Timer {} finished, ran {}", timer.id, tool.name),
        None => format!("Timer {} finished", timer.id),
    }
}

#[async_trait]
impl FireHandler for ReminderDispatcher {
    async fn on_fire(&self, timer: Timer) -> anyhow::Result<()> {
        let tool_result = match (&timer.payload.tool, &self.tools) {
            (Some(call), Some(tools)) => {
                log::info!("timer {} invoking tool {}", timer.id, call.name);
                tools
                    .invoke(&call.name, call.arguments.clone())
                    .await
                    .map(|result| log::debug!("tool {} returned {result}", call.name))
                    .with_context(|| format!("tool {} failed", call.name))
            }
            (Some(call), None) => Err(anyhow::anyhow!(
                "timer {} wants tool {} but no tool invoker is registered",
                timer.id,
                call.name
            )),
            (None, _) => Ok(()),
        };

        // The reminder is spoken even when the tool call failed.
        let announced = self
            .announcer
            .announce(&reminder_text(&timer))
            .await
            .context("announcing reminder failed");

        tool_result.and(announced)
    }
}
