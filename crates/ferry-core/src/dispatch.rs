//! Message-type dispatch.
//!
//! A [`DispatchTable`] maps message types to [`Handler`]s. It is built once
//! and never changes afterwards.

use async_trait::async_trait;
use ferry_protocol::{EnvelopeError, Message};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;

use crate::connection::Connection;
use crate::hub::Hub;
use crate::peers::PeerError;
use crate::rooms::RoomError;
use crate::sender::SendError;

/// Errors a handler can fail with.
///
/// The text is logged on the server and never sent to the client.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Handler-specific failure.
    #[error("{0}")]
    Failed(String),

    /// A reply could not be queued.
    #[error("Send failed: {0}")]
    Send(#[from] SendError),

    /// A payload could not be encoded.
    #[error("Encode failed: {0}")]
    Encode(#[from] EnvelopeError),

    /// A room operation was refused.
    #[error("Room error: {0}")]
    Room(#[from] RoomError),

    /// A peer binding was refused.
    #[error("Peer error: {0}")]
    Peer(#[from] PeerError),
}

impl HandlerError {
    /// Create a handler-specific failure.
    pub fn failed(msg: impl Into<String>) -> Self {
        HandlerError::Failed(msg.into())
    }
}

/// Result returned by handlers.
pub type HandlerResult = Result<(), HandlerError>;

/// Processes one message type.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    /// Handle `message` received on `connection`.
    async fn handle(&self, connection: Arc<Connection>, message: Message, hub: Arc<Hub>) -> HandlerResult;
}

#[async_trait]
impl<F, Fut> Handler for F
where
    F: Fn(Arc<Connection>, Message, Arc<Hub>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    async fn handle(&self, connection: Arc<Connection>, message: Message, hub: Arc<Hub>) -> HandlerResult {
        (self)(connection, message, hub).await
    }
}

/// Dispatch errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    /// No handler is registered for the message type.
    #[error("Unsupported message type: {}", .0.as_deref().unwrap_or("<none>"))]
    Unsupported(Option<String>),
}

/// Immutable mapping from message type to handler.
#[derive(Clone, Default)]
pub struct DispatchTable {
    handlers: Arc<HashMap<String, Arc<dyn Handler>>>,
}

impl DispatchTable {
    /// Start building a table.
    #[must_use]
    pub fn builder() -> DispatchTableBuilder {
        DispatchTableBuilder::default()
    }

    /// Find the handler for `kind`.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Unsupported`] if `kind` is missing or has no
    /// handler.
    pub fn resolve(&self, kind: Option<&str>) -> Result<Arc<dyn Handler>, DispatchError> {
        kind.and_then(|k| self.handlers.get(k))
            .cloned()
            .ok_or_else(|| DispatchError::Unsupported(kind.map(str::to_owned)))
    }

    /// Check if `kind` has a handler.
    #[must_use]
    pub fn contains(&self, kind: &str) -> bool {
        self.handlers.contains_key(kind)
    }

    /// Registered message types.
    #[must_use]
    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    /// Number of registered handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Check if no handlers are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for DispatchTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchTable")
            .field("kinds", &self.kinds())
            .finish()
    }
}

/// Builder for [`DispatchTable`].
#[derive(Default)]
pub struct DispatchTableBuilder {
    handlers: HashMap<String, Arc<dyn Handler>>,
}

impl DispatchTableBuilder {
    /// Register `handler` for `kind`, replacing any earlier registration.
    #[must_use]
    pub fn route<H: Handler>(mut self, kind: impl Into<String>, handler: H) -> Self {
        self.handlers.insert(kind.into(), Arc::new(handler));
        self
    }

    /// Freeze the table.
    #[must_use]
    pub fn build(self) -> DispatchTable {
        DispatchTable {
            handlers: Arc::new(self.handlers),
        }
    }
}
