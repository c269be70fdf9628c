use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::error::Result;

/// Every lifecycle point the scheduler reports.
///
/// The wire names (`scheduler:run:start`, …) are what external buses see.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HookEvent {
    /// A tick began. Payload: `date`.
    #[serde(rename = "scheduler:run:start")]
    RunStart,
    /// All due tasks of a tick were dispatched. Payload: `date`, `dueCount`.
    #[serde(rename = "scheduler:run:complete")]
    RunComplete,
    /// A task callback is about to run. Payload: `name`, `startTime`.
    #[serde(rename = "scheduler:task:start")]
    TaskStart,
    /// A task callback returned successfully. Payload: `name`, `duration`.
    #[serde(rename = "scheduler:task:success")]
    TaskSuccess,
    /// A task callback failed. Payload: `name`, `error`, `duration`.
    #[serde(rename = "scheduler:task:failure")]
    TaskFailure,
}

impl HookEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            HookEvent::RunStart => "scheduler:run:start",
            HookEvent::RunComplete => "scheduler:run:complete",
            HookEvent::TaskStart => "scheduler:task:start",
            HookEvent::TaskSuccess => "scheduler:task:success",
            HookEvent::TaskFailure => "scheduler:task:failure",
        }
    }
}

impl fmt::Display for HookEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observer injected into the scheduler.
///
/// Implementations must not block for long: notifications are delivered
/// inline on the task that produced them. There is no error channel back to
/// the caller.
pub trait HookSink: Send + Sync {
    fn notify(&self, event: HookEvent, payload: serde_json::Value);
}

/// The runtime context passed into every hook invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookContext {
    pub event: HookEvent,
    pub payload: serde_json::Value,
    /// Unix timestamp (ms) when the event was created.
    pub timestamp: u64,
}

impl HookContext {
    pub fn new(event: HookEvent, payload: serde_json::Value) -> Self {
        let timestamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;

        Self {
            event,
            payload,
            timestamp,
        }
    }
}

/// Synchronous hook handler.
pub trait HookHandler: Send + Sync {
    fn handle(&self, ctx: &HookContext) -> Result<()>;
}

impl<F> HookHandler for F
where
    F: Fn(&HookContext) -> Result<()> + Send + Sync,
{
    fn handle(&self, ctx: &HookContext) -> Result<()> {
        self(ctx)
    }
}

/// A registered hook binding a name, event filter, and handler.
pub struct HookDefinition {
    /// Unique name used for deregistration and log correlation.
    pub name: String,
    pub event: HookEvent,
    pub handler: Arc<dyn HookHandler>,
    /// Lower value = earlier execution. Ties broken by registration order.
    pub priority: i32,
}

impl HookDefinition {
    pub fn new(name: impl Into<String>, event: HookEvent, handler: Arc<dyn HookHandler>) -> Self {
        Self {
            name: name.into(),
            event,
            handler,
            priority: 0,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}
