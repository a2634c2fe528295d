//! # ferry-transport
//!
//! Transport abstraction layer for the Ferry realtime engine.
//!
//! This crate provides a unified interface over the wire:
//!
//! - **WebSocket** - axum WebSocket connections, split into a writer task and
//!   an inbound event reader
//! - **Memory** - an in-process socket for tests and benchmarks
//!
//! ## Transport Abstraction
//!
//! Outbound traffic goes through the non-blocking [`Socket`] trait, inbound
//! traffic arrives as [`InboundEvent`]s, allowing the connection manager to
//! be protocol-agnostic.
//!
//! ```rust,ignore
//! use ferry_transport::{websocket, InboundEvent};
//!
//! async fn handle(ws: axum::extract::ws::WebSocket) {
//!     let (socket, mut inbound) = websocket::split(ws, None);
//!     loop {
//!         match inbound.next().await {
//!             InboundEvent::Data(envelope) => { /* decode and dispatch */ }
//!             InboundEvent::Pong => { /* mark alive */ }
//!             InboundEvent::Closed(_) | InboundEvent::Error(_) => break,
//!         }
//!     }
//! }
//! ```

pub mod memory;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use traits::{CloseInfo, ConnectionId, InboundEvent, Socket, TransportError};

#[cfg(feature = "websocket")]
pub use websocket::{WebSocketInbound, WebSocketSocket};
