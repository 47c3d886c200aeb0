use serde_json::{Map, Value};
use tasklink_broker::{TaskOptions, TaskRequest};

use crate::{
    completion::{self, Completion},
    connection::Connection,
    diagnostics::CallEvent,
};

mod listeners;

use listeners::Listeners;

/// What an invocation hands back.
#[derive(Debug)]
#[must_use = "an unobserved result completion hides task failures"]
pub enum Dispatch {
    /// Fire-and-forget, or the session tracks no result for this call
    Untracked,
    Result(Completion<Value>),
    /// `track_started` was requested
    Tracked {
        started: Completion<bool>,
        result: Completion<Value>,
    },
}

impl Dispatch {
    pub fn is_untracked(&self) -> bool {
        matches!(self, Self::Untracked)
    }

    /// The result completion, discarding any started completion.
    pub fn into_result(self) -> Option<Completion<Value>> {
        match self {
            Self::Untracked => None,
            Self::Result(result) | Self::Tracked { result, .. } => Some(result),
        }
    }

    /// `(started, result)` when `track_started` was requested.
    pub fn into_pair(self) -> Option<(Completion<bool>, Completion<Value>)> {
        match self {
            Self::Tracked { started, result } => Some((started, result)),
            Self::Untracked | Self::Result(_) => None,
        }
    }
}

/// A task name and options bound to a connection.
///
/// Nothing is sent until [`Task::apply`] or [`Task::call`]; a task can be
/// applied any number of times.
#[derive(Debug)]
pub struct Task<'a> {
    connection: &'a Connection,
    name: String,
    options: TaskOptions,
}

impl<'a> Task<'a> {
    pub(crate) fn new(connection: &'a Connection, name: String, options: TaskOptions) -> Self {
        Self {
            connection,
            name,
            options,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &TaskOptions {
        &self.options
    }

    pub fn call(&self, args: Vec<Value>) -> Dispatch {
        self.apply(args, Map::new())
    }

    /// Submit the task.
    ///
    /// With `ignore_result` the call is fire-and-forget and returns
    /// [`Dispatch::Untracked`], even if `track_started` was also set.
    /// Otherwise failures never escape synchronously: they arrive through the
    /// returned completions.
    pub fn apply(&self, args: Vec<Value>, kwargs: Map<String, Value>) -> Dispatch {
        let request = TaskRequest {
            name: self.name.clone(),
            args,
            kwargs,
            options: self.options.clone(),
        };

        if self.options.ignore_result {
            self.fire_and_forget(&request);
            return Dispatch::Untracked;
        }

        let client = self.connection.name();
        let diagnostics = self.connection.diagnostics();

        let (started_resolver, started) = if self.options.track_started {
            let (resolver, completion) = completion::channel();
            (Some(resolver), Some(completion))
        } else {
            (None, None)
        };
        let (result_resolver, result) = completion::channel();
        let mut listeners = Listeners::new(
            client,
            &self.name,
            diagnostics,
            started_resolver,
            result_resolver,
        );

        match self.connection.ready_session() {
            None => listeners.on_not_ready(),
            Some((session, runtime)) => match session.send_task(&request) {
                Err(source) => listeners.on_submit_failed(source),
                Ok(None) => {
                    listeners.on_submitted();
                    return Dispatch::Untracked;
                }
                Ok(Some(handle)) => {
                    listeners.set_task_id(&handle.task_id);
                    listeners.on_submitted();
                    runtime.spawn(listeners.run(handle.events));
                }
            },
        }

        match started {
            Some(started) => Dispatch::Tracked { started, result },
            None => Dispatch::Result(result),
        }
    }

    fn fire_and_forget(&self, request: &TaskRequest) {
        let client = self.connection.name();
        let diagnostics = self.connection.diagnostics();

        let Some((session, _)) = self.connection.ready_session() else {
            diagnostics.call(client, &self.name, None, CallEvent::DroppedNotConnected, None);
            return;
        };

        match session.send_task(request) {
            Ok(handle) => diagnostics.call(
                client,
                &self.name,
                handle.as_ref().map(|h| h.task_id.as_str()),
                CallEvent::Submitted,
                None,
            ),
            Err(e) => diagnostics.call(client, &self.name, None, CallEvent::Failed, Some(&e)),
        }
    }
}
