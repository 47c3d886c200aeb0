use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter};

use crate::error::BrokerError;

/// Lifecycle events emitted by a broker session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Connect,
    Error(BrokerError),
    End,
}

/// Payload of a `success` event.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SuccessMessage {
    pub result: serde_json::Value,
}

/// Payload of every terminal failure event.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct FailureMessage {
    /// Remote status string, e.g. `FAILURE` or `REVOKED`
    pub status: String,
    pub traceback: Option<String>,
}

impl FailureMessage {
    pub fn new(status: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            traceback: None,
        }
    }

    pub fn with_traceback(mut self, traceback: impl Into<String>) -> Self {
        self.traceback = Some(traceback.into());
        self
    }
}

/// Events on a single task's result stream.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "event", content = "message", rename_all = "lowercase")]
pub enum TaskEvent {
    Started,
    Success(SuccessMessage),
    Failure(FailureMessage),
    Revoked(FailureMessage),
    Rejected(FailureMessage),
    Ignored(FailureMessage),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
pub enum TaskEventKind {
    #[strum(to_string = "started")]
    Started,
    #[strum(to_string = "success")]
    Success,
    #[strum(to_string = "failure")]
    Failure,
    #[strum(to_string = "revoked")]
    Revoked,
    #[strum(to_string = "rejected")]
    Rejected,
    #[strum(to_string = "ignored")]
    Ignored,
}

impl TaskEventKind {
    /// `failure`, `revoked`, `rejected` and `ignored` all end a task without
    /// a result.
    pub fn is_terminal_failure(self) -> bool {
        matches!(
            self,
            Self::Failure | Self::Revoked | Self::Rejected | Self::Ignored
        )
    }

    pub fn is_terminal(self) -> bool {
        self == Self::Success || self.is_terminal_failure()
    }
}

impl TaskEvent {
    pub fn kind(&self) -> TaskEventKind {
        match self {
            Self::Started => TaskEventKind::Started,
            Self::Success(_) => TaskEventKind::Success,
            Self::Failure(_) => TaskEventKind::Failure,
            Self::Revoked(_) => TaskEventKind::Revoked,
            Self::Rejected(_) => TaskEventKind::Rejected,
            Self::Ignored(_) => TaskEventKind::Ignored,
        }
    }

    /// Build the terminal failure event of the given kind.
    ///
    /// Returns `None` for `started` and `success`.
    pub fn terminal_failure(kind: TaskEventKind, message: FailureMessage) -> Option<Self> {
        match kind {
            TaskEventKind::Failure => Some(Self::Failure(message)),
            TaskEventKind::Revoked => Some(Self::Revoked(message)),
            TaskEventKind::Rejected => Some(Self::Rejected(message)),
            TaskEventKind::Ignored => Some(Self::Ignored(message)),
            TaskEventKind::Started | TaskEventKind::Success => None,
        }
    }

    pub fn success(result: serde_json::Value) -> Self {
        Self::Success(SuccessMessage { result })
    }
}
