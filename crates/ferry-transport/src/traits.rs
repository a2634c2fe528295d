//! Transport abstraction traits for Ferry.
//!
//! A [`Socket`] is the outbound half of one client connection. Every method
//! is non-blocking so the send pipeline never awaits the network; inbound
//! traffic arrives separately as [`InboundEvent`]s.

use bytes::Bytes;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

/// Atomic counter keeping generated IDs unique within one process.
static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Unique identifier for a connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub String);

impl ConnectionId {
    /// Create a new connection ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a unique connection ID.
    #[must_use]
    pub fn generate() -> Self {
        use std::time::{SystemTime, UNIX_EPOCH};
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        let counter = ID_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self(format!("conn_{:x}_{:x}", timestamp, counter))
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ConnectionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive data.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Why a connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseInfo {
    /// Close code, if the peer sent one.
    pub code: Option<u16>,
    /// Close reason text.
    pub reason: String,
}

impl CloseInfo {
    /// Create close info with a code and reason.
    #[must_use]
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            reason: reason.into(),
        }
    }

    /// Close info for a stream that ended without a close frame.
    #[must_use]
    pub fn abnormal(reason: impl Into<String>) -> Self {
        Self::new(ferry_protocol::close::ABNORMAL, reason)
    }
}

impl fmt::Display for CloseInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "{} {}", code, self.reason),
            None => write!(f, "{}", self.reason),
        }
    }
}

/// Something that happened on the inbound half of a connection.
#[derive(Debug)]
pub enum InboundEvent {
    /// A data frame (text or binary) carrying an envelope.
    Data(Bytes),
    /// Heartbeat reply.
    Pong,
    /// The connection ended.
    Closed(CloseInfo),
    /// Low-level fault; the connection is no longer usable.
    Error(TransportError),
}

/// The outbound half of an active connection.
pub trait Socket: Send + Sync {
    /// Get the connection's unique identifier.
    fn id(&self) -> &ConnectionId;

    /// Check if the connection is still open for writing.
    fn is_open(&self) -> bool;

    /// Bytes handed to the transport but not yet written to the network.
    fn buffered_amount(&self) -> usize;

    /// Queue a data frame for transmission.
    fn send(&self, payload: Bytes) -> Result<(), TransportError>;

    /// Send a protocol-level ping.
    fn ping(&self) -> Result<(), TransportError>;

    /// Start a graceful close with the given code and reason.
    fn close(&self, code: u16, reason: &str) -> Result<(), TransportError>;

    /// Drop the connection immediately without a close handshake.
    fn terminate(&self);

    /// Get the remote address of the connection, if available.
    fn remote_addr(&self) -> Option<String> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_generation() {
        let id1 = ConnectionId::generate();
        let id2 = ConnectionId::generate();
        assert_ne!(id1, id2);
        assert!(id1.as_str().starts_with("conn_"));
    }

    #[test]
    fn test_connection_id_from_string() {
        let id: ConnectionId = "test-id".into();
        assert_eq!(id.as_str(), "test-id");
    }

    #[test]
    fn test_close_info_display() {
        assert_eq!(CloseInfo::new(1003, "protocol_violation").to_string(), "1003 protocol_violation");
        assert_eq!(CloseInfo::abnormal("stream ended").code, Some(1006));
    }
}
