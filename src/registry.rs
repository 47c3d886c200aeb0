use std::{collections::HashMap, sync::Arc};

use parking_lot::RwLock;
use tasklink_broker::Broker;

use crate::connection::Connection;

/// Name-keyed table of connections, so separate parts of an application can
/// share one connection per broker.
///
/// Registering a name twice replaces the earlier entry. Lookups of unknown
/// names return `None`.
#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: RwLock<HashMap<String, Arc<Connection>>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `connection` under its own name, returning what it replaced.
    pub fn register(&self, connection: Connection) -> Option<Arc<Connection>> {
        self.insert(Arc::new(connection))
    }

    /// Build a connection named `name` over `broker` and register it.
    ///
    /// The connection is not connected yet.
    pub fn create(&self, name: &str, broker: Arc<dyn Broker>) -> Arc<Connection> {
        let connection = Arc::new(Connection::new(name, broker));
        if self.insert(connection.clone()).is_some() {
            log::debug!("Replaced registered client {name}");
        }
        connection
    }

    /// Store an already shared connection under its own name.
    pub fn insert(&self, connection: Arc<Connection>) -> Option<Arc<Connection>> {
        let name = connection.name().to_owned();
        self.clients.write().insert(name, connection)
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<Connection>> {
        self.clients.read().get(name).cloned()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.clients.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.clients.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.read().is_empty()
    }

    pub fn clear(&self) {
        self.clients.write().clear();
    }
}
