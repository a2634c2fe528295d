//! Backpressure-aware outbound pipeline for one connection.
//!
//! Payloads are encrypted once on admission and held in a FIFO bounded by a
//! byte cap. Admission fails instead of growing the queue when the cap would
//! be exceeded. A flush task drains the queue in batches, yielding to the
//! scheduler between batches and backing off while the transport's own
//! buffer is above the cap.

use bytes::Bytes;
use ferry_protocol::{EnvelopeCodec, EnvelopeError, Message};
use ferry_transport::Socket;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, trace};

use crate::metrics;

/// Default per-connection byte cap (512 KiB).
pub const DEFAULT_BYTE_CAP: usize = 512 * 1024;

/// Default number of payloads written per flush tick.
pub const DEFAULT_FLUSH_BATCH: usize = 32;

/// Pause between flush attempts while the transport buffer is saturated.
const SATURATED_BACKOFF: Duration = Duration::from_millis(5);

/// Sender configuration.
#[derive(Debug, Clone)]
pub struct SenderConfig {
    /// Maximum bytes queued, and the transport buffer level above which
    /// flushing pauses.
    pub byte_cap: usize,
    /// Maximum payloads written per flush tick.
    pub flush_batch: usize,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            byte_cap: DEFAULT_BYTE_CAP,
            flush_batch: DEFAULT_FLUSH_BATCH,
        }
    }
}

/// Reasons a payload was not admitted.
#[derive(Debug, Error)]
pub enum SendError {
    /// The message could not be encoded.
    #[error("Encoding failed: {0}")]
    Encode(#[from] EnvelopeError),

    /// Admitting the payload would exceed the byte cap.
    #[error("Send queue full: {queued} queued + {size} > {cap} bytes")]
    Overloaded {
        /// Bytes already queued.
        queued: usize,
        /// Size of the rejected payload.
        size: usize,
        /// Configured cap.
        cap: usize,
    },

    /// The sender was cleared because the connection closed.
    #[error("Connection closed")]
    Closed,
}

#[derive(Default)]
struct SendState {
    queue: VecDeque<Bytes>,
    queued_bytes: usize,
    flushing: bool,
    closed: bool,
}

/// Per-connection outbound queue with byte-cap admission control.
pub struct Sender {
    socket: Arc<dyn Socket>,
    codec: Arc<EnvelopeCodec>,
    config: SenderConfig,
    state: Mutex<SendState>,
}

impl Sender {
    /// Create a sender writing to `socket`.
    #[must_use]
    pub fn new(socket: Arc<dyn Socket>, codec: Arc<EnvelopeCodec>, config: SenderConfig) -> Arc<Self> {
        Arc::new(Self {
            socket,
            codec,
            config,
            state: Mutex::new(SendState::default()),
        })
    }

    /// Encode, encrypt and enqueue a message.
    ///
    /// Encoding failures leave the queue untouched.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails, the byte cap would be exceeded,
    /// or the sender is closed.
    pub fn send_object(self: &Arc<Self>, message: &Message) -> Result<(), SendError> {
        let payload = self.codec.encode(message)?;
        self.send_encoded(payload)
    }

    /// Enqueue an already-encoded envelope.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the byte cap would be exceeded or the sender is
    /// closed.
    pub fn send_encoded(self: &Arc<Self>, payload: Bytes) -> Result<(), SendError> {
        let size = payload.len();
        let schedule = {
            let mut state = self.state.lock();
            if state.closed {
                return Err(SendError::Closed);
            }

            if state.queued_bytes + size > self.config.byte_cap {
                let err = SendError::Overloaded {
                    queued: state.queued_bytes,
                    size,
                    cap: self.config.byte_cap,
                };
                drop(state);
                debug!(connection = %self.socket.id(), error = %err, "Dropping outbound message");
                metrics::record_send_rejected();
                return Err(err);
            }

            state.queue.push_back(payload);
            state.queued_bytes += size;
            !std::mem::replace(&mut state.flushing, true)
        };

        if schedule {
            let sender = Arc::clone(self);
            tokio::spawn(async move { sender.run_flush().await });
        }

        Ok(())
    }

    /// Discard every queued payload and refuse new ones.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.queue.clear();
        state.queued_bytes = 0;
        state.closed = true;
    }

    /// Bytes currently queued.
    #[must_use]
    pub fn queued_bytes(&self) -> usize {
        self.state.lock().queued_bytes
    }

    /// Payloads currently queued.
    #[must_use]
    pub fn queued_len(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Check if the sender has been cleared.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    async fn run_flush(self: Arc<Self>) {
        loop {
            // Yield so other connections get scheduled between batches.
            tokio::task::yield_now().await;

            match self.flush() {
                Flush::Done => break,
                Flush::More => {}
                Flush::Saturated => tokio::time::sleep(SATURATED_BACKOFF).await,
            }
        }
    }

    /// Write up to one batch. Clears the flushing flag when nothing remains
    /// that can be written.
    fn flush(&self) -> Flush {
        let mut state = self.state.lock();
        let mut sent = 0;
        let mut saturated = false;

        while sent < self.config.flush_batch && self.socket.is_open() {
            if self.socket.buffered_amount() > self.config.byte_cap {
                saturated = true;
                break;
            }
            let Some(payload) = state.queue.pop_front() else {
                break;
            };
            state.queued_bytes -= payload.len();

            if let Err(e) = self.socket.send(payload) {
                debug!(connection = %self.socket.id(), error = %e, "Transport rejected payload");
                break;
            }
            sent += 1;
        }

        trace!(connection = %self.socket.id(), sent, remaining = state.queue.len(), "Flushed batch");

        if state.queue.is_empty() || !self.socket.is_open() {
            state.flushing = false;
            Flush::Done
        } else if saturated {
            Flush::Saturated
        } else {
            Flush::More
        }
    }
}

enum Flush {
    Done,
    More,
    Saturated,
}
