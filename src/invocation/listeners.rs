use serde_json::Value;
use tasklink_broker::{BrokerError, FailureMessage, TaskEvent, TaskEventKind};
use tokio::sync::mpsc;

use crate::{
    completion::Resolver,
    diagnostics::{CallEvent, Diagnostics, call_statement},
    error::ClientError,
};

/// Turns one task's result stream into settled completions.
///
/// The started resolver exists only when `track_started` was requested. It
/// is always settled before the result resolver, so a caller never sees a
/// result while `started` is still pending.
pub(crate) struct Listeners {
    client: String,
    task: String,
    task_id: Option<String>,
    diagnostics: Diagnostics,
    started: Option<Resolver<bool>>,
    result: Resolver<Value>,
}

impl Listeners {
    pub(crate) fn new(
        client: &str,
        task: &str,
        diagnostics: Diagnostics,
        started: Option<Resolver<bool>>,
        result: Resolver<Value>,
    ) -> Self {
        Self {
            client: client.to_owned(),
            task: task.to_owned(),
            task_id: None,
            diagnostics,
            started,
            result,
        }
    }

    pub(crate) fn set_task_id(&mut self, task_id: &str) {
        self.task_id = Some(task_id.to_owned());
    }

    /// Consume events until a terminal one arrives or the stream ends.
    pub(crate) async fn run(mut self, mut events: mpsc::UnboundedReceiver<TaskEvent>) {
        while let Some(event) = events.recv().await {
            if self.on_event(event) {
                return;
            }
        }
        self.on_stream_closed();
    }

    /// Returns `true` once the event was terminal.
    pub(crate) fn on_event(&mut self, event: TaskEvent) -> bool {
        let kind = event.kind();
        match event {
            TaskEvent::Started => self.on_started(),
            TaskEvent::Success(message) => self.on_success(message.result),
            TaskEvent::Failure(message)
            | TaskEvent::Revoked(message)
            | TaskEvent::Rejected(message)
            | TaskEvent::Ignored(message) => self.on_failure(kind, &message),
        }
        kind.is_terminal()
    }

    /// The connection was not ready; nothing reached the broker.
    pub(crate) fn on_not_ready(&mut self) {
        self.call(CallEvent::NotConnected, None);
        let message = self.statement(CallEvent::NotConnected);
        self.fail_all(ClientError::NotReady(message));
    }

    pub(crate) fn on_submit_failed(&mut self, source: BrokerError) {
        self.call(CallEvent::Failed, Some(&source));
        let message = self.statement("Call failed. Could not publish task");
        self.fail_all(ClientError::Submit { message, source });
    }

    pub(crate) fn on_submitted(&self) {
        self.call(CallEvent::Submitted, None);
    }

    fn on_started(&mut self) {
        let Some(started) = self.started.as_mut() else {
            return;
        };
        self.diagnostics.call(
            &self.client,
            &self.task,
            self.task_id.as_deref(),
            CallEvent::Started,
            None,
        );
        if started.is_resolved() {
            return;
        }
        Self::settle(started.resolve(true), "started");
    }

    fn on_success(&mut self, result: Value) {
        if let Some(started) = self.started.as_mut() {
            if !started.is_resolved() {
                self.diagnostics.call(
                    &self.client,
                    &self.task,
                    self.task_id.as_deref(),
                    CallEvent::StartForced,
                    None,
                );
                Self::settle(started.resolve(true), "started");
            }
        }

        self.call(CallEvent::Succeeded, Some(&result));
        Self::settle(self.result.resolve(result), "result");
    }

    fn on_failure(&mut self, kind: TaskEventKind, message: &FailureMessage) {
        let summary = format!("{} [{}]", CallEvent::Failed, message.status);
        if self.diagnostics.is_enabled() {
            match &message.traceback {
                Some(traceback) => {
                    self.call(CallEvent::Failed, Some(&format_args!("[{kind}] {traceback}")));
                }
                None => self.call(CallEvent::Failed, Some(&format_args!("[{kind}]"))),
            }
        }

        let error = ClientError::TaskFailed {
            message: self.statement(summary),
            status: message.status.clone(),
            traceback: message.traceback.clone(),
        };
        self.fail_all(error);
    }

    fn on_stream_closed(&mut self) {
        if self.result.is_resolved() {
            return;
        }
        self.call(CallEvent::Failed, Some(&"result stream closed"));
        let message = self.statement("Call failed. Result stream closed before completion");
        self.fail_all(ClientError::StreamClosed(message));
    }

    /// `started`, when still pending, fails with the same error as the result.
    fn fail_all(&mut self, error: ClientError) {
        if let Some(started) = self.started.as_mut() {
            if !started.is_resolved() {
                Self::settle(started.reject(error.clone()), "started");
            }
        }
        Self::settle(self.result.reject(error), "result");
    }

    fn settle(outcome: Result<(), ClientError>, which: &str) {
        if let Err(e) = outcome {
            log::warn!("Ignoring second resolution of {which} completion: {e}");
        }
    }

    fn statement(&self, message: impl std::fmt::Display) -> String {
        call_statement(&self.client, &self.task, self.task_id.as_deref(), message)
    }

    fn call(&self, event: CallEvent, detail: Option<&dyn std::fmt::Display>) {
        self.diagnostics.call(
            &self.client,
            &self.task,
            self.task_id.as_deref(),
            event,
            detail,
        );
    }
}
