use strum_macros::Display;

/// Decide whether a session that just ended should be pushed into its
/// reconnect path.
///
/// Some brokers only auto-reconnect after an error. A clean shutdown on the
/// broker side (a stopped RabbitMQ, for instance) ends the session with no
/// error, which would leave the connection down for good. When the session
/// ends and no error was seen since the last connect, an error is injected so
/// the transport retries.
pub fn force_reconnect_on_clean_close(errored: bool) -> bool {
    !errored
}

/// What a [`crate::Connection`] does when its session ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display)]
pub enum ReconnectPolicy {
    /// Apply [`force_reconnect_on_clean_close`]
    #[default]
    #[strum(to_string = "force-on-clean-close")]
    ForceOnCleanClose,
    /// Leave reconnection entirely to the session
    #[strum(to_string = "passive")]
    Passive,
}

impl ReconnectPolicy {
    pub fn should_force(self, errored: bool) -> bool {
        match self {
            Self::ForceOnCleanClose => force_reconnect_on_clean_close(errored),
            Self::Passive => false,
        }
    }
}
