//! # ferry-protocol
//!
//! Wire format for the Ferry realtime engine.
//!
//! Every frame on the wire is an encrypted envelope around a JSON message:
//!
//! - [`Message`] - the logical `{type, requestId?, data?, error?, status?}` schema
//! - [`EnvelopeCodec`] - JSON serialization plus ChaCha20-Poly1305 sealing
//! - [`close`] - close codes shared by server and clients
//!
//! ## Example
//!
//! ```rust
//! use ferry_protocol::{EnvelopeCodec, EnvelopeKey, Message};
//!
//! let codec = EnvelopeCodec::new(&EnvelopeKey::generate());
//!
//! let wire = codec.encode(&Message::request("echo")).unwrap();
//! let decoded = codec.decode(&wire).unwrap();
//! assert_eq!(decoded.kind(), Some("echo"));
//! ```

pub mod close;
pub mod envelope;
pub mod message;

pub use envelope::{
    DecodeError, EnvelopeCodec, EnvelopeError, EnvelopeKey, KeyError, MAX_FRAME_SIZE,
};
pub use message::{Message, Status};
