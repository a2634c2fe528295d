//! Per-connection state.
//!
//! A [`Connection`] owns its [`Sender`] and [`WorkQueue`]; both are cleared
//! when the connection closes. Registries only ever hold weak references.

use bytes::Bytes;
use ferry_protocol::{EnvelopeCodec, Message};
use ferry_transport::{ConnectionId, Socket};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use crate::peers::PeerId;
use crate::room::RoomId;
use crate::sender::{SendError, Sender, SenderConfig};
use crate::work_queue::WorkQueue;

/// Lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ConnectionState {
    /// Accepted, resources not yet attached.
    Connecting = 0,
    /// Accepting inbound messages.
    Open = 1,
    /// Cleanup in progress.
    Closing = 2,
    /// All resources released.
    Closed = 3,
}

impl From<u8> for ConnectionState {
    fn from(value: u8) -> Self {
        match value {
            0 => ConnectionState::Connecting,
            1 => ConnectionState::Open,
            2 => ConnectionState::Closing,
            _ => ConnectionState::Closed,
        }
    }
}

/// One client session.
pub struct Connection {
    id: ConnectionId,
    socket: Arc<dyn Socket>,
    state: AtomicU8,
    alive: AtomicBool,
    pub(crate) peer_id: Mutex<Option<PeerId>>,
    pub(crate) room_id: Mutex<Option<RoomId>>,
    sender: Arc<Sender>,
    work: Arc<WorkQueue>,
}

impl Connection {
    /// Create a connection over `socket` in the `Connecting` state.
    #[must_use]
    pub fn new(
        socket: Arc<dyn Socket>,
        codec: Arc<EnvelopeCodec>,
        sender_config: SenderConfig,
        concurrency: usize,
    ) -> Arc<Self> {
        let sender = Sender::new(Arc::clone(&socket), codec, sender_config);
        Arc::new(Self {
            id: socket.id().clone(),
            socket,
            state: AtomicU8::new(ConnectionState::Connecting as u8),
            alive: AtomicBool::new(true),
            peer_id: Mutex::new(None),
            room_id: Mutex::new(None),
            sender,
            work: WorkQueue::new(concurrency),
        })
    }

    /// Get the connection ID.
    #[must_use]
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Get the underlying socket.
    #[must_use]
    pub fn socket(&self) -> &Arc<dyn Socket> {
        &self.socket
    }

    /// Get the outbound pipeline.
    #[must_use]
    pub fn sender(&self) -> &Arc<Sender> {
        &self.sender
    }

    /// Get the inbound work queue.
    #[must_use]
    pub fn work_queue(&self) -> &Arc<WorkQueue> {
        &self.work
    }

    /// Get the lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state.load(Ordering::SeqCst).into()
    }

    /// Check if the connection accepts inbound messages.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    pub(crate) fn set_state(&self, state: ConnectionState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    /// Atomically move from `from` to `to`. Returns `false` if the
    /// connection was not in `from`.
    pub(crate) fn transition(&self, from: ConnectionState, to: ConnectionState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Move to `Closing` from any earlier state. Returns `false` if the
    /// connection is already closing or closed.
    pub(crate) fn begin_close(&self) -> bool {
        self.state
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |state| {
                match ConnectionState::from(state) {
                    ConnectionState::Connecting | ConnectionState::Open => {
                        Some(ConnectionState::Closing as u8)
                    }
                    ConnectionState::Closing | ConnectionState::Closed => None,
                }
            })
            .is_ok()
    }

    /// Record a heartbeat reply.
    pub fn mark_alive(&self) {
        self.alive.store(true, Ordering::SeqCst);
    }

    /// Clear the liveness flag, returning its previous value.
    pub(crate) fn take_alive(&self) -> bool {
        self.alive.swap(false, Ordering::SeqCst)
    }

    /// Check the liveness flag.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Peer ID bound by authentication, if any.
    #[must_use]
    pub fn peer_id(&self) -> Option<PeerId> {
        self.peer_id.lock().clone()
    }

    /// Room this connection is in, if any.
    #[must_use]
    pub fn room_id(&self) -> Option<RoomId> {
        self.room_id.lock().clone()
    }

    /// Encrypt and queue a message for this connection.
    ///
    /// # Errors
    ///
    /// See [`Sender::send_object`].
    pub fn send(&self, message: &Message) -> Result<(), SendError> {
        self.sender.send_object(message)
    }

    /// Queue an already-encoded envelope for this connection.
    ///
    /// # Errors
    ///
    /// See [`Sender::send_encoded`].
    pub fn send_encoded(&self, payload: Bytes) -> Result<(), SendError> {
        self.sender.send_encoded(payload)
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("alive", &self.is_alive())
            .field("peer_id", &self.peer_id())
            .field("room_id", &self.room_id())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_protocol::EnvelopeKey;
    use ferry_transport::memory;

    fn connection() -> Arc<Connection> {
        let (socket, _peer) = memory::pair_with_id("conn-test");
        let codec = Arc::new(EnvelopeCodec::new(&EnvelopeKey::generate()));
        Connection::new(socket, codec, SenderConfig::default(), 4)
    }

    #[test]
    fn test_new_connection_defaults() {
        let conn = connection();
        assert_eq!(conn.id().as_str(), "conn-test");
        assert_eq!(conn.state(), ConnectionState::Connecting);
        assert!(conn.is_alive());
        assert!(conn.peer_id().is_none());
        assert!(conn.room_id().is_none());
        assert_eq!(conn.work_queue().limit(), 4);
    }

    #[test]
    fn test_state_transitions() {
        let conn = connection();
        conn.set_state(ConnectionState::Open);
        assert!(conn.is_open());

        assert!(conn.transition(ConnectionState::Open, ConnectionState::Closing));
        assert!(!conn.transition(ConnectionState::Open, ConnectionState::Closing));
        assert_eq!(conn.state(), ConnectionState::Closing);
    }

    #[test]
    fn test_begin_close_once() {
        let conn = connection();
        assert!(conn.begin_close());
        assert!(!conn.begin_close());
        conn.set_state(ConnectionState::Closed);
        assert!(!conn.begin_close());
    }

    #[test]
    fn test_liveness_flag() {
        let conn = connection();
        assert!(conn.take_alive());
        assert!(!conn.take_alive());
        conn.mark_alive();
        assert!(conn.is_alive());
    }
}
