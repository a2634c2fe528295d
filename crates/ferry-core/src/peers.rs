//! Peer registry.
//!
//! Maps an authenticated peer ID to the connection currently bound to it.
//! Binding an ID that is already taken moves it to the new connection.

use bytes::Bytes;
use dashmap::DashMap;
use ferry_protocol::Message;
use std::sync::{Arc, Weak};
use thiserror::Error;
use tracing::{debug, trace};

use crate::connection::{Connection, ConnectionState};
use crate::metrics;
use crate::sender::SendError;

/// An authenticated peer identifier.
pub type PeerId = String;

/// Peer registry errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PeerError {
    /// The peer ID is empty.
    #[error("Peer ID cannot be empty")]
    EmptyId,

    /// The connection is closing and cannot be bound.
    #[error("Connection is closed")]
    ConnectionClosed,
}

/// Registry of bound peer IDs.
#[derive(Debug, Default)]
pub struct PeerRegistry {
    peers: DashMap<PeerId, Weak<Connection>>,
}

impl PeerRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `peer_id` to `connection`.
    ///
    /// Returns the connection that previously held the ID, if it is still
    /// alive and is not `connection` itself.
    ///
    /// # Errors
    ///
    /// Returns an error if the ID is empty or the connection is no longer
    /// open.
    pub fn bind(
        &self,
        peer_id: impl Into<PeerId>,
        connection: &Arc<Connection>,
    ) -> Result<Option<Arc<Connection>>, PeerError> {
        let peer_id = peer_id.into();
        if peer_id.is_empty() {
            return Err(PeerError::EmptyId);
        }

        // Held until the entry is inserted so a concurrent close either
        // sees the binding or is seen by it.
        let mut current = connection.peer_id.lock();
        if matches!(
            connection.state(),
            ConnectionState::Closing | ConnectionState::Closed
        ) {
            return Err(PeerError::ConnectionClosed);
        }

        // A connection holds one peer ID at a time.
        if let Some(old_id) = current.replace(peer_id.clone()) {
            if old_id != peer_id {
                self.peers
                    .remove_if(&old_id, |_, bound| std::ptr::eq(bound.as_ptr(), Arc::as_ptr(connection)));
            }
        }

        let previous = self
            .peers
            .insert(peer_id.clone(), Arc::downgrade(connection))
            .and_then(|weak| weak.upgrade())
            .filter(|prev| !Arc::ptr_eq(prev, connection));
        drop(current);

        if let Some(prev) = &previous {
            debug!(peer = %peer_id, old = %prev.id(), new = %connection.id(), "Peer ID rebound");
        } else {
            debug!(peer = %peer_id, connection = %connection.id(), "Peer ID bound");
        }

        metrics::set_active_peers(self.peers.len());
        Ok(previous)
    }

    /// Remove the binding held by `connection`.
    ///
    /// A binding that has since moved to another connection is left alone.
    /// Returns `true` if an entry was removed.
    pub fn unbind(&self, connection: &Connection) -> bool {
        let Some(peer_id) = connection.peer_id.lock().take() else {
            return false;
        };

        let removed = self
            .peers
            .remove_if(&peer_id, |_, bound| std::ptr::eq(bound.as_ptr(), connection))
            .is_some();
        if removed {
            debug!(peer = %peer_id, connection = %connection.id(), "Peer ID unbound");
        }

        metrics::set_active_peers(self.peers.len());
        removed
    }

    /// Get the live connection bound to `peer_id`.
    #[must_use]
    pub fn get(&self, peer_id: &str) -> Option<Arc<Connection>> {
        self.peers.get(peer_id).and_then(|entry| entry.upgrade())
    }

    /// Check if `peer_id` is bound.
    #[must_use]
    pub fn contains(&self, peer_id: &str) -> bool {
        self.get(peer_id).is_some()
    }

    /// Number of bound peer IDs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// Check if no peer IDs are bound.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Send a message to the connection bound to `peer_id`.
    ///
    /// Returns `Ok(false)` if no live connection holds the ID.
    ///
    /// # Errors
    ///
    /// Returns the sender's error if the message was not admitted.
    pub fn send_to(&self, peer_id: &str, message: &Message) -> Result<bool, SendError> {
        match self.get(peer_id) {
            Some(conn) => conn.send(message).map(|()| true),
            None => {
                trace!(peer = %peer_id, "Send to unknown peer");
                Ok(false)
            }
        }
    }

    /// Send an encoded envelope to every bound peer.
    ///
    /// Returns the number of connections that accepted it.
    pub fn broadcast(&self, payload: &Bytes) -> usize {
        // Collect first so no shard lock is held while sending.
        let targets: Vec<Arc<Connection>> = self
            .peers
            .iter()
            .filter_map(|entry| entry.value().upgrade())
            .collect();

        targets
            .iter()
            .filter(|conn| conn.send_encoded(payload.clone()).is_ok())
            .count()
    }
}
