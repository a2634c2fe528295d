//! Room abstraction for Ferry.
//!
//! Rooms are named groups of connections used for fan-out broadcast. A room
//! holds weak references only; it never keeps a connection alive.

use ferry_transport::ConnectionId;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tracing::debug;

use crate::connection::Connection;

/// Maximum room ID length.
pub const MAX_ROOM_ID_LENGTH: usize = 256;

/// A room identifier.
pub type RoomId = String;

/// Validate a room ID.
///
/// # Errors
///
/// Returns an error message if the room ID is invalid.
pub fn validate_room_id(id: &str) -> Result<(), &'static str> {
    if id.is_empty() {
        return Err("Room ID cannot be empty");
    }
    if id.len() > MAX_ROOM_ID_LENGTH {
        return Err("Room ID too long");
    }
    // Printable ASCII only
    if !id.chars().all(|c| c.is_ascii() && !c.is_ascii_control()) {
        return Err("Room ID contains invalid characters");
    }
    Ok(())
}

/// A set of connections sharing a room ID.
#[derive(Debug)]
pub struct Room {
    id: RoomId,
    members: HashMap<ConnectionId, Weak<Connection>>,
}

impl Room {
    /// Create an empty room.
    #[must_use]
    pub fn new(id: impl Into<RoomId>) -> Self {
        Self {
            id: id.into(),
            members: HashMap::new(),
        }
    }

    /// Get the room ID.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Get the number of members.
    #[must_use]
    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Check if a connection is a member.
    #[must_use]
    pub fn contains(&self, connection_id: &ConnectionId) -> bool {
        self.members.contains_key(connection_id)
    }

    /// Add a member.
    ///
    /// Returns `true` if the connection was not already a member.
    pub fn insert(&mut self, connection: &Arc<Connection>) -> bool {
        let added = self
            .members
            .insert(connection.id().clone(), Arc::downgrade(connection))
            .is_none();
        if added {
            debug!(room = %self.id, connection = %connection.id(), "Connection joined room");
        }
        added
    }

    /// Remove a member.
    ///
    /// Returns `true` if the connection was a member.
    pub fn remove(&mut self, connection_id: &ConnectionId) -> bool {
        let removed = self.members.remove(connection_id).is_some();
        if removed {
            debug!(room = %self.id, connection = %connection_id, "Connection left room");
        }
        removed
    }

    /// Live members, excluding `exclude`.
    #[must_use]
    pub fn members_except(&self, exclude: Option<&ConnectionId>) -> Vec<Arc<Connection>> {
        self.members
            .iter()
            .filter(|(id, _)| Some(*id) != exclude)
            .filter_map(|(_, member)| member.upgrade())
            .collect()
    }

    /// Member connection IDs.
    #[must_use]
    pub fn member_ids(&self) -> Vec<ConnectionId> {
        self.members.keys().cloned().collect()
    }

    /// Check if the room has no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}
