//! The live set of registered connections, keyed by handle.
//!
//! Handles are unique: a second connection announcing a handle that is
//! already registered is rejected, never silently merged or replaced.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::RwLock;

use crate::connection::{Connection, ConnectionId};

/// Errors that can occur during registry operations.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    /// Another live connection already holds this handle.
    #[error("handle '{0}' is already in use")]
    DuplicateHandle(String),
    /// No connection is registered under this handle.
    #[error("no connection registered as '{0}'")]
    NotFound(String),
}

/// Thread-safe handle → connection map.
pub struct Registry {
    connections: RwLock<HashMap<String, Connection>>,
    next_id: AtomicU64,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Allocates the next connection id. Ids increase with each call.
    pub fn next_id(&self) -> ConnectionId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Registers a connection under its handle.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::DuplicateHandle`] if the handle is taken.
    pub async fn register(&self, connection: Connection) -> Result<(), RegistryError> {
        let mut conns = self.connections.write().await;
        if conns.contains_key(connection.handle()) {
            return Err(RegistryError::DuplicateHandle(
                connection.handle().to_string(),
            ));
        }
        conns.insert(connection.handle().to_string(), connection);
        drop(conns);
        Ok(())
    }

    /// Removes a handle, returning its connection if it was registered.
    /// Removing an absent handle does nothing.
    pub async fn unregister(&self, handle: &str) -> Option<Connection> {
        let mut conns = self.connections.write().await;
        conns.remove(handle)
    }

    /// Looks up the connection registered under `handle`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] if no such handle is registered.
    pub async fn lookup(&self, handle: &str) -> Result<Connection, RegistryError> {
        let conns = self.connections.read().await;
        conns
            .get(handle)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(handle.to_string()))
    }

    /// Returns every registered connection at call time, in registration
    /// order. Later registry changes do not affect the returned list.
    pub async fn snapshot_all(&self) -> Vec<Connection> {
        let conns = self.connections.read().await;
        let mut snapshot: Vec<Connection> = conns.values().cloned().collect();
        drop(conns);
        snapshot.sort_by_key(Connection::id);
        snapshot
    }

    /// Returns every registered handle, in registration order.
    pub async fn handles(&self) -> Vec<String> {
        self.snapshot_all()
            .await
            .into_iter()
            .map(|c| c.handle().to_string())
            .collect()
    }

    #[cfg(test)]
    pub(crate) async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    #[cfg(test)]
    pub(crate) async fn is_empty(&self) -> bool {
        self.connections.read().await.is_empty()
    }
}
