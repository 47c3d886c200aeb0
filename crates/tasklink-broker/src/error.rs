/// Errors raised by a broker session.
///
/// Cloneable so the same failure can be replayed to every listener that
/// observes it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BrokerError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("publish error: {0}")]
    Publish(String),

    #[error("session closed")]
    Closed,

    /// Injected by the client to make the session run its reconnect logic.
    #[error("forced reconnect after clean close")]
    ForcedReconnect,
}

/// Errors produced while loading or validating a [`crate::BrokerConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value {value:?} for {key}")]
    InvalidValue { key: &'static str, value: String },

    #[error("missing required setting {0}")]
    Missing(&'static str),

    #[error("route for task {0:?} names no queue, exchange or routing key")]
    EmptyRoute(String),
}
