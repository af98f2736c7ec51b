//! Destination resolution for chat lines and files.
//!
//! Every routing decision is made against a registry snapshot taken at
//! dispatch time. Delivery to each destination is independent: a destination
//! whose writer has stopped is logged and skipped.

use std::sync::Arc;

use crate::connection::Connection;
use crate::notice;
use crate::registry::Registry;

/// Errors reported by directed routing.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RouteError {
    /// The named recipient is not registered or has just disconnected.
    #[error("recipient '{0}' not found")]
    RecipientNotFound(String),
}

/// Routes lines between registered connections.
#[derive(Clone)]
pub struct Router {
    registry: Arc<Registry>,
}

impl Router {
    #[must_use]
    pub const fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    /// Queues `text` for every registered connection except `sender`.
    ///
    /// Returns the number of connections the line was queued for.
    pub async fn broadcast(&self, sender: &str, text: &str) -> usize {
        let mut delivered = 0;
        for conn in self.broadcast_set(sender).await {
            match conn.send_line(text) {
                Ok(()) => delivered += 1,
                Err(e) => tracing::debug!(sender = %sender, error = %e, "skipping closed destination"),
            }
        }
        delivered
    }

    /// Queues `text` for every registered connection, sender or not.
    pub async fn announce(&self, text: &str) -> usize {
        let mut delivered = 0;
        for conn in self.registry.snapshot_all().await {
            if conn.send_line(text).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    /// Queues `text` for the single connection registered as `recipient`.
    ///
    /// If there is no such connection, `sender` is told so and nobody else
    /// is affected.
    ///
    /// # Errors
    ///
    /// Returns [`RouteError::RecipientNotFound`] after notifying the sender.
    pub async fn direct(&self, sender: &str, recipient: &str, text: &str) -> Result<(), RouteError> {
        let delivered = match self.registry.lookup(recipient).await {
            Ok(conn) => conn.send_line(text).is_ok(),
            Err(_) => false,
        };
        if delivered {
            return Ok(());
        }
        tracing::debug!(sender = %sender, recipient = %recipient, "directed message to unknown handle");
        self.notify(sender, notice::USER_NOT_FOUND).await;
        Err(RouteError::RecipientNotFound(recipient.to_string()))
    }

    /// Handles of every registered connection, in registration order.
    pub async fn list_active(&self) -> Vec<String> {
        self.registry.handles().await
    }

    /// Queues a single line for `handle`. Returns whether it was queued.
    pub async fn notify(&self, handle: &str, text: &str) -> bool {
        match self.registry.lookup(handle).await {
            Ok(conn) => conn.send_line(text).is_ok(),
            Err(_) => false,
        }
    }

    /// Every registered connection except `sender`.
    pub async fn broadcast_set(&self, sender: &str) -> Vec<Connection> {
        self.registry
            .snapshot_all()
            .await
            .into_iter()
            .filter(|c| c.handle() != sender)
            .collect()
    }

    /// The connection registered as `recipient`, if any.
    ///
    /// # Errors
    ///
    /// Returns [`RouteError::RecipientNotFound`] if it is not registered.
    pub async fn resolve(&self, recipient: &str) -> Result<Connection, RouteError> {
        self.registry
            .lookup(recipient)
            .await
            .map_err(|_| RouteError::RecipientNotFound(recipient.to_string()))
    }
}
