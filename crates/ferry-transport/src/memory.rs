//! In-process transport.
//!
//! [`MemorySocket`] implements [`Socket`] without any network underneath.
//! Everything written to it shows up on the paired [`MemoryPeer`], and the
//! reported send buffer can be set by hand to simulate a slow client. It is
//! used by the core test suites and benchmarks.

use bytes::Bytes;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::traits::{ConnectionId, Socket, TransportError};

/// What the peer observes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemoryEvent {
    /// A data frame.
    Data(Bytes),
    /// A heartbeat ping.
    Ping,
    /// A graceful close.
    Close {
        /// Close code.
        code: u16,
        /// Close reason.
        reason: String,
    },
    /// A forced termination.
    Terminate,
}

/// Socket half of an in-memory connection.
#[derive(Debug)]
pub struct MemorySocket {
    id: ConnectionId,
    is_open: AtomicBool,
    buffered: AtomicUsize,
    events: mpsc::UnboundedSender<MemoryEvent>,
}

/// Observer half of an in-memory connection.
#[derive(Debug)]
pub struct MemoryPeer {
    events: mpsc::UnboundedReceiver<MemoryEvent>,
}

/// Create a connected socket/peer pair.
#[must_use]
pub fn pair() -> (Arc<MemorySocket>, MemoryPeer) {
    pair_with_id(ConnectionId::generate())
}

/// Create a connected socket/peer pair with a fixed connection ID.
#[must_use]
pub fn pair_with_id(id: impl Into<ConnectionId>) -> (Arc<MemorySocket>, MemoryPeer) {
    let (events, rx) = mpsc::unbounded_channel();
    let socket = Arc::new(MemorySocket {
        id: id.into(),
        is_open: AtomicBool::new(true),
        buffered: AtomicUsize::new(0),
        events,
    });
    (socket, MemoryPeer { events: rx })
}

impl MemorySocket {
    /// Set the simulated transport buffer size.
    pub fn set_buffered_amount(&self, bytes: usize) {
        self.buffered.store(bytes, Ordering::SeqCst);
    }

    /// Mark the socket closed as if the peer went away.
    pub fn disconnect(&self) {
        self.is_open.store(false, Ordering::SeqCst);
    }
}

impl Socket for MemorySocket {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    fn is_open(&self) -> bool {
        self.is_open.load(Ordering::SeqCst)
    }

    fn buffered_amount(&self) -> usize {
        self.buffered.load(Ordering::SeqCst)
    }

    fn send(&self, payload: Bytes) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::ConnectionClosed);
        }
        self.events
            .send(MemoryEvent::Data(payload))
            .map_err(|_| TransportError::ConnectionClosed)
    }

    fn ping(&self) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::ConnectionClosed);
        }
        self.events
            .send(MemoryEvent::Ping)
            .map_err(|_| TransportError::ConnectionClosed)
    }

    fn close(&self, code: u16, reason: &str) -> Result<(), TransportError> {
        if !self.is_open.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        self.events
            .send(MemoryEvent::Close {
                code,
                reason: reason.to_string(),
            })
            .map_err(|_| TransportError::ConnectionClosed)
    }

    fn terminate(&self) {
        self.is_open.store(false, Ordering::SeqCst);
        let _ = self.events.send(MemoryEvent::Terminate);
    }
}

impl MemoryPeer {
    /// Wait for the next event.
    ///
    /// Returns `None` once the socket is dropped and all events are drained.
    pub async fn recv(&mut self) -> Option<MemoryEvent> {
        self.events.recv().await
    }

    /// Take the next event if one is ready.
    pub fn try_recv(&mut self) -> Option<MemoryEvent> {
        self.events.try_recv().ok()
    }

    /// Wait for the next data frame, skipping pings.
    ///
    /// Returns `None` if the connection closes first.
    pub async fn recv_data(&mut self) -> Option<Bytes> {
        loop {
            match self.events.recv().await? {
                MemoryEvent::Data(payload) => return Some(payload),
                MemoryEvent::Ping => continue,
                MemoryEvent::Close { .. } | MemoryEvent::Terminate => return None,
            }
        }
    }

    /// Drain every event that is ready right now.
    pub fn drain(&mut self) -> Vec<MemoryEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_pair_delivers_in_order() {
        let (socket, mut peer) = pair_with_id("mem-1");
        assert_eq!(socket.id().as_str(), "mem-1");

        socket.send(Bytes::from_static(b"one")).unwrap();
        socket.ping().unwrap();
        socket.send(Bytes::from_static(b"two")).unwrap();

        assert_eq!(peer.recv_data().await.unwrap(), Bytes::from_static(b"one"));
        assert_eq!(peer.recv_data().await.unwrap(), Bytes::from_static(b"two"));
    }

    #[test]
    fn test_memory_close_is_once() {
        let (socket, mut peer) = pair();

        socket.close(1000, "bye").unwrap();
        socket.close(1000, "again").unwrap();
        assert!(!socket.is_open());
        assert!(socket.send(Bytes::from_static(b"late")).is_err());

        assert_eq!(
            peer.drain(),
            vec![MemoryEvent::Close {
                code: 1000,
                reason: "bye".to_string()
            }]
        );
    }

    #[test]
    fn test_memory_buffered_amount() {
        let (socket, _peer) = pair();
        assert_eq!(socket.buffered_amount(), 0);
        socket.set_buffered_amount(4096);
        assert_eq!(socket.buffered_amount(), 4096);
    }
}
