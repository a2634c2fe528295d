//! WebSocket close codes used by Ferry.
//!
//! See RFC 6455 section 7.4.1.

/// Normal closure.
pub const NORMAL: u16 = 1000;

/// The server is going away (shutdown).
pub const GOING_AWAY: u16 = 1001;

/// The peer sent data that could not be decoded.
pub const PROTOCOL_VIOLATION: u16 = 1003;

/// No close frame was received (dead or terminated peer).
pub const ABNORMAL: u16 = 1006;

/// A frame exceeded the size limit.
pub const MESSAGE_TOO_BIG: u16 = 1009;

/// Close reason sent with [`PROTOCOL_VIOLATION`].
///
/// Decryption and JSON failures share this reason so the peer cannot tell
/// them apart.
pub const PROTOCOL_VIOLATION_REASON: &str = "protocol_violation";
