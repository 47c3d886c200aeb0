//! Task-queue session contract
//!
//! Describes what `tasklink` needs from a task-queue client library: opening
//! a session, publishing tasks, and the event streams a session and each task
//! produce. Also ships the session configuration and an in-memory broker.

pub mod config;
pub mod error;
pub mod event;
pub mod memory;
pub mod session;

pub use config::{BrokerConfig, ResolvedRoute, Route};
pub use error::{BrokerError, ConfigError};
pub use event::{FailureMessage, SessionEvent, SuccessMessage, TaskEvent, TaskEventKind};
pub use memory::{MemoryBroker, SentTask, TaskController};
pub use session::{Broker, Session, SessionParts, TaskHandle, TaskOptions, TaskRequest};
