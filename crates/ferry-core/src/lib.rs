//! # ferry-core
//!
//! Connection management for the Ferry realtime engine.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **Connection** - per-client state: lifecycle, liveness, room and peer ID
//! - **WorkQueue** - bounded per-connection handler concurrency
//! - **Sender** - byte-capped outbound queue with batched flushing
//! - **Rooms** - room membership and fan-out broadcast
//! - **Peers** - authenticated peer ID to connection lookup
//! - **Dispatch** - immutable message type to handler table
//! - **Lifecycle** - accept, inbound routing, heartbeat and cleanup
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │   Socket    │────▶│  Lifecycle  │────▶│  Dispatch   │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!        ▲                   │                   │
//!        │                   ▼                   ▼
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │   Sender    │◀────│ Connection  │────▶│  WorkQueue  │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!                            ▲
//!                            │
//!                     ┌─────────────┐
//!                     │ Hub (rooms, │
//!                     │    peers)   │
//!                     └─────────────┘
//! ```

pub mod connection;
pub mod dispatch;
pub mod hub;
pub mod lifecycle;
pub mod metrics;
pub mod peers;
pub mod room;
pub mod rooms;
pub mod sender;
pub mod work_queue;

pub use connection::{Connection, ConnectionState};
pub use dispatch::{DispatchError, DispatchTable, DispatchTableBuilder, Handler, HandlerError, HandlerResult};
pub use hub::Hub;
pub use lifecycle::{ConnectionManager, Inbound, ManagerConfig, ManagerStats};
pub use peers::{PeerError, PeerId, PeerRegistry};
pub use room::{Room, RoomId};
pub use rooms::{RoomError, RoomRegistry};
pub use sender::{SendError, Sender, SenderConfig};
pub use work_queue::{JobError, JobHandle, WorkQueue};

// Handlers implement `Handler` with `#[async_trait]`.
pub use async_trait::async_trait;
