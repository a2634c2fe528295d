//! Shared registries handed to every handler.

use ferry_protocol::{EnvelopeCodec, EnvelopeError, Message};
use ferry_transport::ConnectionId;
use std::sync::Arc;

use crate::peers::PeerRegistry;
use crate::rooms::RoomRegistry;

/// Process-wide state shared by all connections.
#[derive(Debug)]
pub struct Hub {
    peers: PeerRegistry,
    rooms: RoomRegistry,
    codec: Arc<EnvelopeCodec>,
}

impl Hub {
    /// Create a hub encoding with `codec`.
    #[must_use]
    pub fn new(codec: Arc<EnvelopeCodec>) -> Self {
        Self {
            peers: PeerRegistry::new(),
            rooms: RoomRegistry::new(),
            codec,
        }
    }

    /// Get the peer registry.
    #[must_use]
    pub fn peers(&self) -> &PeerRegistry {
        &self.peers
    }

    /// Get the room registry.
    #[must_use]
    pub fn rooms(&self) -> &RoomRegistry {
        &self.rooms
    }

    /// Get the envelope codec.
    #[must_use]
    pub fn codec(&self) -> &Arc<EnvelopeCodec> {
        &self.codec
    }

    /// Encode `message` once and send it to `room_id`, skipping `exclude`.
    ///
    /// # Errors
    ///
    /// Returns an error if the message cannot be encoded.
    pub fn broadcast_to_room(
        &self,
        room_id: &str,
        message: &Message,
        exclude: Option<&ConnectionId>,
    ) -> Result<usize, EnvelopeError> {
        let payload = self.codec.encode(message)?;
        Ok(self.rooms.broadcast(room_id, &payload, exclude))
    }

    /// Encode `message` once and send it to every bound peer.
    ///
    /// # Errors
    ///
    /// Returns an error if the message cannot be encoded.
    pub fn broadcast_to_peers(&self, message: &Message) -> Result<usize, EnvelopeError> {
        let payload = self.codec.encode(message)?;
        Ok(self.peers.broadcast(&payload))
    }
}
