use std::sync::{
    Arc, OnceLock,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

use parking_lot::Mutex;
use serde_json::{Map, Value};
use strum_macros::Display;
use tasklink_broker::{Broker, BrokerConfig, BrokerError, Session, SessionEvent, TaskOptions};
use tokio::{
    runtime::Handle,
    sync::{mpsc, watch},
};

use crate::{
    completion::{self, Completion, Resolver},
    diagnostics::{ClientEvent, Diagnostics},
    error::ClientError,
    invocation::{Dispatch, Task},
};

pub mod reconnect;

pub use reconnect::{ReconnectPolicy, force_reconnect_on_clean_close};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ConnectionState {
    #[strum(to_string = "disconnected")]
    Disconnected,
    #[strum(to_string = "connected")]
    Connected,
    /// Not connected, and the session reported an error since it last was
    #[strum(to_string = "errored")]
    Errored,
}

/// State shared between a [`Connection`] and its event pump.
///
/// Only the pump writes `state` and `errored`. An error does not take a
/// connected session down; only `end` does.
struct Shared {
    state: watch::Sender<ConnectionState>,
    errored: AtomicBool,
    forced_reconnects: AtomicUsize,
    session: Mutex<Option<Arc<dyn Session>>>,
    runtime: OnceLock<Handle>,
}

/// One named connection to a broker.
///
/// Owns at most one session for its whole life. Session events are consumed
/// on a Tokio task; calls read the resulting state but never write it.
pub struct Connection {
    name: String,
    broker: Arc<dyn Broker>,
    diagnostics: Diagnostics,
    policy: ReconnectPolicy,
    runtime: Option<Handle>,
    shared: Arc<Shared>,
}

impl Connection {
    pub fn new(name: impl Into<String>, broker: Arc<dyn Broker>) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);

        Self {
            name: name.into(),
            broker,
            diagnostics: Diagnostics::from_env(),
            policy: ReconnectPolicy::default(),
            runtime: None,
            shared: Arc::new(Shared {
                state,
                errored: AtomicBool::new(false),
                forced_reconnects: AtomicUsize::new(0),
                session: Mutex::new(None),
                runtime: OnceLock::new(),
            }),
        }
    }

    pub fn with_diagnostics(mut self, diagnostics: Diagnostics) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    pub fn with_reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Run event pumps on `runtime` instead of the ambient one, which lets
    /// `connect` be called from threads outside any runtime.
    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn diagnostics(&self) -> Diagnostics {
        self.diagnostics
    }

    /// Open the broker session.
    ///
    /// Returns as soon as the session exists. The returned completion
    /// resolves on the first `connect` or `error` event: drop it for
    /// fire-and-forget use, await or [`Completion::wait`] on it to block
    /// until the broker answers.
    pub fn connect(&self, config: &BrokerConfig) -> Result<Completion<()>, ClientError> {
        let mut slot = self.shared.session.lock();
        if slot.is_some() {
            return Err(ClientError::AlreadyConnected {
                name: self.name.clone(),
            });
        }

        config.validate()?;

        let runtime = match &self.runtime {
            Some(handle) => handle.clone(),
            None => Handle::try_current().map_err(|e| {
                ClientError::Config(format!("no Tokio runtime to drive the session: {e}"))
            })?,
        };

        let parts = self
            .broker
            .create_session(config)
            .map_err(|source| ClientError::BrokerConnect {
                name: self.name.clone(),
                source,
            })?;
        *slot = Some(parts.session);
        drop(slot);

        let runtime = self.shared.runtime.get_or_init(|| runtime);
        let (resolver, completion) = completion::channel();
        runtime.spawn(self.pump().run(parts.events, resolver));

        Ok(completion)
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Whether the session reported an error since it last connected.
    ///
    /// Independent of [`Connection::state`]: a connected session that saw an
    /// error keeps accepting calls until it ends.
    pub fn is_errored(&self) -> bool {
        self.shared.errored.load(Ordering::SeqCst)
    }

    /// Watch state transitions
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Number of errors injected to force a reconnect
    pub fn forced_reconnects(&self) -> usize {
        self.shared.forced_reconnects.load(Ordering::SeqCst)
    }

    /// Bind a task name and options without submitting anything.
    pub fn create_task(&self, name: impl Into<String>, options: TaskOptions) -> Task<'_> {
        Task::new(self, name.into(), options)
    }

    /// Submit `name` with positional arguments.
    pub fn call(&self, name: &str, args: Vec<Value>, options: TaskOptions) -> Dispatch {
        self.create_task(name, options).call(args)
    }

    /// Submit `name` with positional and keyword arguments.
    pub fn apply(
        &self,
        name: &str,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
        options: TaskOptions,
    ) -> Dispatch {
        self.create_task(name, options).apply(args, kwargs)
    }

    /// The live session, only while connected.
    pub(crate) fn ready_session(&self) -> Option<(Arc<dyn Session>, Handle)> {
        if !self.is_connected() {
            return None;
        }
        let session = self.shared.session.lock().clone()?;
        let runtime = self.shared.runtime.get()?.clone();
        Some((session, runtime))
    }

    fn pump(&self) -> EventPump {
        EventPump {
            name: self.name.clone(),
            diagnostics: self.diagnostics,
            policy: self.policy,
            shared: self.shared.clone(),
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

/// Applies session events to a connection's shared state.
struct EventPump {
    name: String,
    diagnostics: Diagnostics,
    policy: ReconnectPolicy,
    shared: Arc<Shared>,
}

impl EventPump {
    async fn run(
        self,
        mut events: mpsc::UnboundedReceiver<SessionEvent>,
        mut first: Resolver<()>,
    ) {
        while let Some(event) = events.recv().await {
            self.handle(&event);

            if first.is_resolved() {
                continue;
            }
            let settled = match event {
                SessionEvent::Connect => first.resolve(()),
                SessionEvent::Error(source) => first.reject(ClientError::BrokerConnect {
                    name: self.name.clone(),
                    source,
                }),
                SessionEvent::End => continue,
            };
            if let Err(e) = settled {
                log::warn!("Connect completion for {} not settled: {e}", self.name);
            }
        }

        log::debug!("Session event stream for {} ended", self.name);
        self.shared.state.send_replace(ConnectionState::Disconnected);
        if !first.is_resolved() {
            let closed = ClientError::BrokerConnect {
                name: self.name.clone(),
                source: BrokerError::Closed,
            };
            if let Err(e) = first.reject(closed) {
                log::warn!("Connect completion for {} not settled: {e}", self.name);
            }
        }
    }

    /// Apply one event. Runs before the connect completion is settled, so a
    /// resolved completion always observes the new state.
    fn handle(&self, event: &SessionEvent) {
        match event {
            SessionEvent::Connect => {
                self.diagnostics
                    .client(&self.name, ClientEvent::Connected, None);
                self.shared.errored.store(false, Ordering::SeqCst);
                self.shared.state.send_replace(ConnectionState::Connected);
            }
            SessionEvent::Error(error) => {
                self.diagnostics
                    .client(&self.name, ClientEvent::ConnectionError, Some(error));
                self.shared.errored.store(true, Ordering::SeqCst);
                self.shared.state.send_if_modified(|state| match state {
                    ConnectionState::Connected | ConnectionState::Errored => false,
                    ConnectionState::Disconnected => {
                        *state = ConnectionState::Errored;
                        true
                    }
                });
            }
            SessionEvent::End => {
                self.diagnostics
                    .client(&self.name, ClientEvent::ConnectionClosed, None);

                let errored = self.shared.errored.load(Ordering::SeqCst);
                if self.policy.should_force(errored) {
                    self.force_reconnect();
                }
                self.shared.state.send_replace(ConnectionState::Disconnected);
            }
        }
    }

    fn force_reconnect(&self) {
        let session = self.shared.session.lock().clone();
        let Some(session) = session else {
            return;
        };

        self.diagnostics
            .client(&self.name, ClientEvent::ForcingReconnect, None);
        self.shared.forced_reconnects.fetch_add(1, Ordering::SeqCst);
        session.emit_error(BrokerError::ForcedReconnect);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tasklink_broker::MemoryBroker;

    fn connection(broker: &MemoryBroker) -> Connection {
        Connection::new("test", Arc::new(broker.clone())).with_diagnostics(Diagnostics::new(true))
    }

    async fn wait_for_state(conn: &Connection, expected: ConnectionState) {
        let mut rx = conn.subscribe();
        tokio::time::timeout(Duration::from_secs(1), rx.wait_for(|s| *s == expected))
            .await
            .expect("state transition timed out")
            .expect("state channel closed");
    }

    #[tokio::test]
    async fn test_new_connection_is_disconnected() {
        let broker = MemoryBroker::new();
        let conn = connection(&broker);
        assert_eq!(conn.name(), "test");
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert!(!conn.is_connected());
        assert!(conn.ready_session().is_none());
    }

    #[tokio::test]
    async fn test_blocking_connect_succeeds_on_connect_event() {
        let broker = MemoryBroker::new();
        let conn = connection(&broker);

        let connecting = conn
            .connect(&BrokerConfig::new("amqp://"))
            .expect("Failed to start connect");
        assert!(broker.connect());

        assert_eq!(connecting.await, Ok(()));
        wait_for_state(&conn, ConnectionState::Connected).await;
        assert!(conn.ready_session().is_some());
    }

    #[tokio::test]
    async fn test_blocking_connect_fails_on_first_error() {
        let broker = MemoryBroker::new();
        let conn = connection(&broker);

        let connecting = conn
            .connect(&BrokerConfig::default())
            .expect("Failed to start connect");
        assert!(broker.error("ECONNREFUSED"));

        let err = connecting.await.expect_err("connect should fail");
        assert!(matches!(
            err,
            ClientError::BrokerConnect {
                source: BrokerError::Connection(_),
                ..
            }
        ));
        wait_for_state(&conn, ConnectionState::Errored).await;
    }

    #[tokio::test]
    async fn test_connect_twice_is_rejected() {
        let broker = MemoryBroker::new();
        let conn = connection(&broker);

        let _connecting = conn
            .connect(&BrokerConfig::default())
            .expect("Failed to start connect");
        let err = conn
            .connect(&BrokerConfig::default())
            .expect_err("second connect must fail");
        assert_eq!(
            err,
            ClientError::AlreadyConnected {
                name: "test".to_owned()
            }
        );
        assert_eq!(broker.sessions_created(), 1);
    }

    #[tokio::test]
    async fn test_connect_validates_config() {
        let broker = MemoryBroker::new();
        let conn = connection(&broker);

        let err = conn
            .connect(&BrokerConfig::new(""))
            .expect_err("empty url must fail");
        assert!(matches!(err, ClientError::Config(_)));
        assert_eq!(broker.sessions_created(), 0);
    }

    #[tokio::test]
    async fn test_refused_session_allows_retry() {
        let broker =
            MemoryBroker::new().refuse_sessions(BrokerError::Connection("refused".to_owned()));
        let conn = connection(&broker);

        let err = conn
            .connect(&BrokerConfig::default())
            .expect_err("refused session");
        assert!(matches!(err, ClientError::BrokerConnect { .. }));
        // no session was created, so a second attempt is not "already connected"
        let err = conn
            .connect(&BrokerConfig::default())
            .expect_err("still refused");
        assert!(matches!(err, ClientError::BrokerConnect { .. }));
    }

    #[tokio::test]
    async fn test_clean_end_forces_exactly_one_reconnect() {
        let broker = MemoryBroker::new();
        let conn = connection(&broker);

        let connecting = conn
            .connect(&BrokerConfig::default())
            .expect("Failed to start connect");
        assert!(broker.connect());
        connecting.await.expect("connect");

        assert!(broker.end());
        wait_for_state(&conn, ConnectionState::Disconnected).await;
        assert_eq!(broker.forced_errors(), vec![BrokerError::ForcedReconnect]);
        assert_eq!(conn.forced_reconnects(), 1);

        // not permanently down: the next connect event brings it back
        assert!(broker.connect());
        wait_for_state(&conn, ConnectionState::Connected).await;
    }

    #[tokio::test]
    async fn test_error_while_connected_keeps_accepting_calls() {
        let broker = MemoryBroker::new();
        let conn = connection(&broker);

        let connecting = conn
            .connect(&BrokerConfig::default())
            .expect("Failed to start connect");
        assert!(broker.connect());
        connecting.await.expect("connect");

        assert!(broker.error("channel error"));
        tokio::time::timeout(Duration::from_secs(1), async {
            while !conn.is_errored() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("error event not applied");

        assert_eq!(conn.state(), ConnectionState::Connected);
        assert!(conn.ready_session().is_some());

        // a fresh connect clears the flag
        assert!(broker.connect());
        tokio::time::timeout(Duration::from_secs(1), async {
            while conn.is_errored() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("connect event not applied");
    }

    #[tokio::test]
    async fn test_end_after_error_does_not_force_reconnect() {
        let broker = MemoryBroker::new();
        let conn = connection(&broker);

        let connecting = conn
            .connect(&BrokerConfig::default())
            .expect("Failed to start connect");
        assert!(broker.connect());
        connecting.await.expect("connect");

        assert!(broker.error("socket hang up"));
        assert!(broker.end());
        wait_for_state(&conn, ConnectionState::Disconnected).await;

        assert!(broker.forced_errors().is_empty());
        assert_eq!(conn.forced_reconnects(), 0);
    }

    #[tokio::test]
    async fn test_passive_policy_never_forces() {
        let broker = MemoryBroker::new();
        let conn = connection(&broker).with_reconnect_policy(ReconnectPolicy::Passive);

        let connecting = conn
            .connect(&BrokerConfig::default())
            .expect("Failed to start connect");
        assert!(broker.connect());
        connecting.await.expect("connect");

        assert!(broker.end());
        wait_for_state(&conn, ConnectionState::Disconnected).await;
        assert!(broker.forced_errors().is_empty());
    }

    #[tokio::test]
    async fn test_auto_reconnecting_session_recovers() {
        let broker = MemoryBroker::new().auto_reconnect();
        let conn = connection(&broker);

        let connecting = conn
            .connect(&BrokerConfig::default())
            .expect("Failed to start connect");
        assert!(broker.connect());
        connecting.await.expect("connect");

        let mut states = conn.subscribe();
        assert!(broker.end());

        // End -> forced error -> Error -> Connect
        tokio::time::timeout(Duration::from_secs(1), async {
            let mut seen = Vec::new();
            while states.changed().await.is_ok() {
                let state = *states.borrow_and_update();
                seen.push(state);
                if state == ConnectionState::Connected {
                    break;
                }
            }
            seen
        })
        .await
        .expect("reconnect timed out");

        assert!(conn.is_connected());
        assert_eq!(broker.forced_errors().len(), 1);
    }

    #[test]
    fn test_connect_without_runtime_is_an_error() {
        let broker = MemoryBroker::new();
        let conn = connection(&broker);
        let err = conn
            .connect(&BrokerConfig::default())
            .expect_err("no runtime available");
        assert!(matches!(err, ClientError::Config(_)));
        assert_eq!(broker.sessions_created(), 0);
    }

    #[test]
    fn test_blocking_connect_from_plain_thread() {
        let runtime = tokio::runtime::Runtime::new().expect("Failed to build runtime");
        let broker = MemoryBroker::new();
        let conn = connection(&broker).with_runtime(runtime.handle().clone());

        let connecting = conn
            .connect(&BrokerConfig::default())
            .expect("Failed to start connect");
        assert!(broker.connect());
        assert_eq!(connecting.wait(), Ok(()));
    }
}
