use std::time::Duration;

use tasklink_broker::{BrokerError, ConfigError};

/// Errors surfaced by connections and task invocations.
///
/// `Clone` because one failure may be delivered to both the started and the
/// result handle of an invocation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    /// `connect` called on a connection that already owns a session
    #[error("TaskClient[{name}] - Already connected")]
    AlreadyConnected { name: String },

    /// A call was attempted while the connection was not connected
    #[error("{0}")]
    NotReady(String),

    #[error("TaskClient[{name}] - Broker connection failed: {source}")]
    BrokerConnect {
        name: String,
        #[source]
        source: BrokerError,
    },

    /// The task ended with a non-success terminal event
    #[error("{message}")]
    TaskFailed {
        message: String,
        status: String,
        traceback: Option<String>,
    },

    #[error("{message}: {source}")]
    Submit {
        message: String,
        #[source]
        source: BrokerError,
    },

    /// The result stream ended before any terminal event
    #[error("{0}")]
    StreamClosed(String),

    /// The resolving side went away without resolving
    #[error("Completion abandoned before resolution")]
    Abandoned,

    #[error("Completion already resolved")]
    DoubleResolution,

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Invalid broker config: {0}")]
    Config(String),
}

impl ClientError {
    pub fn is_not_ready(&self) -> bool {
        matches!(self, Self::NotReady(_))
    }

    /// Remote status for `TaskFailed`, e.g. `FAILURE`
    pub fn status(&self) -> Option<&str> {
        match self {
            Self::TaskFailed { status, .. } => Some(status),
            _ => None,
        }
    }

    pub fn traceback(&self) -> Option<&str> {
        match self {
            Self::TaskFailed { traceback, .. } => traceback.as_deref(),
            _ => None,
        }
    }
}

impl From<ConfigError> for ClientError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e.to_string())
    }
}
