//! Client adapter for a Celery-style task queue.
//!
//! A [`Connection`] owns one broker session, keeps it alive across clean
//! broker shutdowns, and turns each task invocation into completions for
//! "started" and "result". A [`ClientRegistry`] shares connections by name.
//!
//! The broker itself is abstracted by [`tasklink_broker::Broker`]; the
//! in-memory [`MemoryBroker`] is enough to exercise everything here.

pub mod completion;
pub mod connection;
pub mod diagnostics;
pub mod error;
pub mod invocation;
pub mod registry;

pub use completion::{Completion, Outcome, Resolver};
pub use connection::{Connection, ConnectionState, ReconnectPolicy};
pub use diagnostics::{DEBUG_ENV, Diagnostics};
pub use error::ClientError;
pub use invocation::{Dispatch, Task};
pub use registry::ClientRegistry;

pub use tasklink_broker::{
    Broker, BrokerConfig, BrokerError, MemoryBroker, Route, Session, TaskEvent, TaskEventKind,
    TaskOptions,
};

/// Install the `env_logger` backend.
///
/// `level` overrides `RUST_LOG`. Calling this more than once is harmless.
pub fn setup_logging(level: Option<log::LevelFilter>) {
    let mut builder = env_logger::Builder::from_default_env();
    if let Some(level) = level {
        builder.filter_level(level);
    }

    if builder.try_init().is_err() {
        log::debug!("Logger already initialized, keeping the existing one");
    }
}
