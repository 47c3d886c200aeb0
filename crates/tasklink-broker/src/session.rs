use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;

use crate::{
    config::{BrokerConfig, Route},
    error::BrokerError,
    event::{SessionEvent, TaskEvent},
};

/// Per-task options
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TaskOptions {
    /// Ask the worker to report when it starts executing the task
    pub track_started: bool,
    /// Fire and forget; no result is tracked
    pub ignore_result: bool,
    /// Routing overrides for this task only
    pub route: Route,
}

impl TaskOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track_started(mut self, track_started: bool) -> Self {
        self.track_started = track_started;
        self
    }

    pub fn ignore_result(mut self, ignore_result: bool) -> Self {
        self.ignore_result = ignore_result;
        self
    }

    pub fn queue(mut self, queue: impl Into<String>) -> Self {
        self.route.queue = Some(queue.into());
        self
    }

    pub fn exchange(mut self, exchange: impl Into<String>) -> Self {
        self.route.exchange = Some(exchange.into());
        self
    }

    pub fn routing_key(mut self, routing_key: impl Into<String>) -> Self {
        self.route.routing_key = Some(routing_key.into());
        self
    }
}

/// One task submission
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskRequest {
    pub name: String,
    pub args: Vec<serde_json::Value>,
    pub kwargs: serde_json::Map<String, serde_json::Value>,
    pub options: TaskOptions,
}

/// Result stream of a submitted task.
pub struct TaskHandle {
    pub task_id: String,
    pub events: mpsc::UnboundedReceiver<TaskEvent>,
}

impl std::fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("task_id", &self.task_id)
            .finish_non_exhaustive()
    }
}

/// A live broker session plus the stream of its lifecycle events.
pub struct SessionParts {
    pub session: Arc<dyn Session>,
    pub events: mpsc::UnboundedReceiver<SessionEvent>,
}

/// Entry point of a task-queue client library.
pub trait Broker: Send + Sync {
    /// Open a session. Connection progress is reported on
    /// [`SessionParts::events`], never by blocking here.
    fn create_session(&self, config: &BrokerConfig) -> Result<SessionParts, BrokerError>;
}

pub trait Session: Send + Sync {
    /// Publish a task.
    ///
    /// `Ok(None)` means the session is not tracking a result for this
    /// request (for instance when `ignore_result` is set).
    fn send_task(&self, request: &TaskRequest) -> Result<Option<TaskHandle>, BrokerError>;

    /// Raise `error` on the underlying transport so that its reconnect logic
    /// runs.
    fn emit_error(&self, error: BrokerError);
}
