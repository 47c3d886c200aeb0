use std::{collections::HashMap, sync::Arc};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::{
    config::{BrokerConfig, ResolvedRoute},
    error::BrokerError,
    event::{FailureMessage, SessionEvent, TaskEvent, TaskEventKind},
    session::{Broker, Session, SessionParts, TaskHandle, TaskRequest},
};

/// A task published through a [`MemoryBroker`] session
#[derive(Debug, Clone)]
pub struct SentTask {
    /// `None` when no result stream was handed out
    pub task_id: Option<String>,
    pub request: TaskRequest,
    pub route: ResolvedRoute,
    pub sent_at: DateTime<Utc>,
}

#[derive(Default)]
struct State {
    refuse_sessions: Option<BrokerError>,
    untracked: bool,
    auto_reconnect: bool,
    fail_publish: Option<BrokerError>,
    session_events: Option<mpsc::UnboundedSender<SessionEvent>>,
    configs: Vec<BrokerConfig>,
    sent: Vec<SentTask>,
    forced_errors: Vec<BrokerError>,
    tasks: HashMap<String, mpsc::UnboundedSender<TaskEvent>>,
    last_task_id: Option<String>,
}

/// In-process broker.
///
/// Nothing is delivered to workers: the broker records what was published and
/// lets the caller drive session and task events by hand.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<State>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every `create_session` call fail with `error`.
    pub fn refuse_sessions(self, error: BrokerError) -> Self {
        self.state.lock().refuse_sessions = Some(error);
        self
    }

    /// Hand out no result streams, as a session configured without a result
    /// backend would.
    pub fn untracked(self) -> Self {
        self.state.lock().untracked = true;
        self
    }

    /// Answer an injected error with `Error` followed by `Connect`, the way
    /// an auto-reconnecting transport would.
    pub fn auto_reconnect(self) -> Self {
        self.state.lock().auto_reconnect = true;
        self
    }

    /// Make `send_task` fail with `error` until cleared with `None`.
    pub fn set_fail_publish(&self, error: Option<BrokerError>) {
        self.state.lock().fail_publish = error;
    }

    /// Push a lifecycle event to the most recent session.
    ///
    /// Returns `false` when there is no session or its listener is gone.
    pub fn emit(&self, event: SessionEvent) -> bool {
        let state = self.state.lock();
        match &state.session_events {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }

    pub fn connect(&self) -> bool {
        self.emit(SessionEvent::Connect)
    }

    pub fn end(&self) -> bool {
        self.emit(SessionEvent::End)
    }

    pub fn error(&self, message: impl Into<String>) -> bool {
        self.emit(SessionEvent::Error(BrokerError::Connection(message.into())))
    }

    pub fn sessions_created(&self) -> usize {
        self.state.lock().configs.len()
    }

    pub fn last_config(&self) -> Option<BrokerConfig> {
        self.state.lock().configs.last().cloned()
    }

    /// Every task published so far. The log grows until drained with
    /// [`MemoryBroker::take_sent`].
    pub fn sent(&self) -> Vec<SentTask> {
        self.state.lock().sent.clone()
    }

    /// Drain the published-task log.
    pub fn take_sent(&self) -> Vec<SentTask> {
        std::mem::take(&mut self.state.lock().sent)
    }

    pub fn forced_errors(&self) -> Vec<BrokerError> {
        self.state.lock().forced_errors.clone()
    }

    /// Controller for the result stream of `task_id`, until a terminal event
    /// has been emitted on it.
    pub fn task(&self, task_id: &str) -> Option<TaskController> {
        let state = self.state.lock();
        state.tasks.get(task_id).map(|tx| TaskController {
            task_id: task_id.to_owned(),
            events: tx.clone(),
            state: self.state.clone(),
        })
    }

    /// Controller for the most recently published tracked task.
    pub fn last_task(&self) -> Option<TaskController> {
        let task_id = self.state.lock().last_task_id.clone()?;
        self.task(&task_id)
    }
}

impl Broker for MemoryBroker {
    fn create_session(&self, config: &BrokerConfig) -> Result<SessionParts, BrokerError> {
        let mut state = self.state.lock();
        if let Some(error) = &state.refuse_sessions {
            log::debug!("Refusing session for {}", config.broker_url);
            return Err(error.clone());
        }

        let (tx, rx) = mpsc::unbounded_channel();
        state.session_events = Some(tx);
        state.configs.push(config.clone());
        log::debug!("Created memory session for {}", config.broker_url);

        let session = MemorySession {
            config: config.clone(),
            state: self.state.clone(),
        };

        Ok(SessionParts {
            session: Arc::new(session),
            events: rx,
        })
    }
}

struct MemorySession {
    config: BrokerConfig,
    state: Arc<Mutex<State>>,
}

impl Session for MemorySession {
    fn send_task(&self, request: &TaskRequest) -> Result<Option<TaskHandle>, BrokerError> {
        let mut state = self.state.lock();
        if let Some(error) = &state.fail_publish {
            return Err(error.clone());
        }

        let route = self.config.route_for(&request.name, &request.options.route);
        let tracked = !state.untracked && !request.options.ignore_result;

        let handle = tracked.then(|| {
            let (tx, rx) = mpsc::unbounded_channel();
            let task_id = Uuid::new_v4().to_string();
            state.tasks.insert(task_id.clone(), tx);
            state.last_task_id = Some(task_id.clone());
            TaskHandle {
                task_id,
                events: rx,
            }
        });

        log::trace!(
            "Published {} to queue {} (routing key {})",
            request.name,
            route.queue,
            route.routing_key
        );

        state.sent.push(SentTask {
            task_id: handle.as_ref().map(|h| h.task_id.clone()),
            request: request.clone(),
            route,
            sent_at: Utc::now(),
        });

        Ok(handle)
    }

    fn emit_error(&self, error: BrokerError) {
        let mut state = self.state.lock();
        log::debug!("Session error injected: {error}");
        state.forced_errors.push(error.clone());

        if state.auto_reconnect {
            if let Some(tx) = &state.session_events {
                if tx.send(SessionEvent::Error(error)).is_err()
                    || tx.send(SessionEvent::Connect).is_err()
                {
                    log::debug!("Session listener gone, skipping reconnect");
                }
            }
        }
    }
}

/// Drives the result stream of one task published to a [`MemoryBroker`].
#[derive(Clone)]
pub struct TaskController {
    task_id: String,
    events: mpsc::UnboundedSender<TaskEvent>,
    state: Arc<Mutex<State>>,
}

impl TaskController {
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Returns `false` once the listener has gone away.
    ///
    /// A terminal event unregisters the task, so the stream closes once the
    /// last controller is dropped.
    pub fn emit(&self, event: TaskEvent) -> bool {
        let terminal = event.kind().is_terminal();
        let delivered = self.events.send(event).is_ok();
        if terminal {
            self.state.lock().tasks.remove(&self.task_id);
        }
        delivered
    }

    pub fn started(&self) -> bool {
        self.emit(TaskEvent::Started)
    }

    pub fn succeed(&self, result: serde_json::Value) -> bool {
        self.emit(TaskEvent::success(result))
    }

    /// Emit one of the terminal failure events.
    pub fn fail(&self, kind: TaskEventKind, message: FailureMessage) -> bool {
        match TaskEvent::terminal_failure(kind, message) {
            Some(event) => self.emit(event),
            None => false,
        }
    }

    /// Close the result stream without a terminal event.
    pub fn close(self) {
        self.state.lock().tasks.remove(&self.task_id);
    }
}
