//! Room registry for Ferry.
//!
//! The registry maps room IDs to [`Room`]s. Every mutation happens under a
//! single lock, so a connection is in at most one room and a room with no
//! members is removed in the same step that empties it.

use bytes::Bytes;
use ferry_transport::ConnectionId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, trace};

use crate::connection::{Connection, ConnectionState};
use crate::metrics;
use crate::room::{validate_room_id, Room, RoomId};

/// Room registry errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RoomError {
    /// Invalid room ID.
    #[error("Invalid room ID: {0}")]
    InvalidRoom(&'static str),

    /// The connection is closing and cannot join rooms.
    #[error("Connection is closed")]
    ConnectionClosed,
}

/// Registry of active rooms.
#[derive(Debug, Default)]
pub struct RoomRegistry {
    rooms: Mutex<HashMap<RoomId, Room>>,
}

impl RoomRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Put `connection` in `room_id`, leaving any previous room.
    ///
    /// Joining the room the connection is already in is a no-op. Returns
    /// the room that was left, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the room ID is invalid or the connection is no
    /// longer open.
    pub fn join(&self, room_id: &str, connection: &Arc<Connection>) -> Result<Option<RoomId>, RoomError> {
        validate_room_id(room_id).map_err(RoomError::InvalidRoom)?;

        let mut rooms = self.rooms.lock();
        if matches!(
            connection.state(),
            ConnectionState::Closing | ConnectionState::Closed
        ) {
            return Err(RoomError::ConnectionClosed);
        }

        let mut current = connection.room_id.lock();
        if current.as_deref() == Some(room_id) {
            rooms
                .entry(room_id.to_string())
                .or_insert_with(|| Room::new(room_id))
                .insert(connection);
            return Ok(None);
        }

        let previous = current.take();
        if let Some(prev) = &previous {
            Self::remove_member(&mut rooms, prev, connection.id());
        }

        rooms
            .entry(room_id.to_string())
            .or_insert_with(|| {
                debug!(room = %room_id, "Creating room");
                Room::new(room_id)
            })
            .insert(connection);
        *current = Some(room_id.to_string());

        metrics::set_active_rooms(rooms.len());
        Ok(previous)
    }

    /// Remove `connection` from its room.
    ///
    /// Returns the room that was left, or `None` if the connection was not
    /// in a room.
    pub fn leave(&self, connection: &Connection) -> Option<RoomId> {
        let mut rooms = self.rooms.lock();
        let room_id = connection.room_id.lock().take()?;

        Self::remove_member(&mut rooms, &room_id, connection.id());
        metrics::set_active_rooms(rooms.len());
        Some(room_id)
    }

    fn remove_member(rooms: &mut HashMap<RoomId, Room>, room_id: &str, connection_id: &ConnectionId) {
        if let Some(room) = rooms.get_mut(room_id) {
            room.remove(connection_id);
            if room.is_empty() {
                rooms.remove(room_id);
                debug!(room = %room_id, "Deleted empty room");
            }
        }
    }

    /// Send an encoded envelope to every member of `room_id` except
    /// `exclude`.
    ///
    /// Unknown rooms are skipped. A failed delivery to one member does not
    /// affect the others. Returns the number of members that accepted the
    /// payload.
    pub fn broadcast(&self, room_id: &str, payload: &Bytes, exclude: Option<&ConnectionId>) -> usize {
        let members = match self.rooms.lock().get(room_id) {
            Some(room) => room.members_except(exclude),
            None => {
                trace!(room = %room_id, "Broadcast to non-existent room");
                return 0;
            }
        };

        let mut delivered = 0;
        for member in &members {
            match member.send_encoded(payload.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    trace!(room = %room_id, connection = %member.id(), error = %e, "Broadcast delivery skipped");
                }
            }
        }

        trace!(room = %room_id, recipients = delivered, "Broadcast");
        delivered
    }

    /// Check if a room exists.
    #[must_use]
    pub fn room_exists(&self, room_id: &str) -> bool {
        self.rooms.lock().contains_key(room_id)
    }

    /// Get the number of members in a room.
    #[must_use]
    pub fn member_count(&self, room_id: &str) -> usize {
        self.rooms
            .lock()
            .get(room_id)
            .map(Room::member_count)
            .unwrap_or(0)
    }

    /// Get the connection IDs in a room.
    #[must_use]
    pub fn members(&self, room_id: &str) -> Vec<ConnectionId> {
        self.rooms
            .lock()
            .get(room_id)
            .map(Room::member_ids)
            .unwrap_or_default()
    }

    /// Get the number of rooms.
    #[must_use]
    pub fn room_count(&self) -> usize {
        self.rooms.lock().len()
    }

    /// Get all room IDs.
    #[must_use]
    pub fn room_ids(&self) -> Vec<RoomId> {
        self.rooms.lock().keys().cloned().collect()
    }
}
