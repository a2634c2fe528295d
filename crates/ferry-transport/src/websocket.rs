//! WebSocket transport implementation.
//!
//! This module adapts an upgraded axum [`WebSocket`] into a [`Socket`] plus
//! an inbound event reader. Outbound frames go through an unbounded channel
//! to a dedicated writer task; the bytes sitting in that channel are reported
//! as [`Socket::buffered_amount`], which plays the role of the kernel send
//! buffer for backpressure decisions.

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, trace, warn};

use crate::traits::{CloseInfo, ConnectionId, InboundEvent, Socket, TransportError};

/// Commands for the writer task.
#[derive(Debug)]
enum Outbound {
    Data(Bytes),
    Ping,
    Close(u16, String),
}

/// Outbound half of a WebSocket connection.
pub struct WebSocketSocket {
    id: ConnectionId,
    outbound: mpsc::UnboundedSender<Outbound>,
    buffered: Arc<AtomicUsize>,
    is_open: Arc<AtomicBool>,
    shutdown: watch::Sender<bool>,
    remote_addr: Option<SocketAddr>,
}

/// Inbound half of a WebSocket connection.
pub struct WebSocketInbound {
    id: ConnectionId,
    stream: SplitStream<WebSocket>,
    is_open: Arc<AtomicBool>,
    shutdown: watch::Receiver<bool>,
}

/// Split an upgraded WebSocket into its outbound [`Socket`] and inbound
/// reader, spawning the writer task.
///
/// Must be called from within a tokio runtime.
pub fn split(
    socket: WebSocket,
    remote_addr: Option<SocketAddr>,
) -> (Arc<WebSocketSocket>, WebSocketInbound) {
    let id = ConnectionId::generate();
    let (sink, stream) = socket.split();
    let (outbound, commands) = mpsc::unbounded_channel();
    let (shutdown, shutdown_rx) = watch::channel(false);
    let buffered = Arc::new(AtomicUsize::new(0));
    let is_open = Arc::new(AtomicBool::new(true));

    tokio::spawn(write_loop(
        id.clone(),
        sink,
        commands,
        Arc::clone(&buffered),
        Arc::clone(&is_open),
        shutdown.subscribe(),
    ));

    let socket = Arc::new(WebSocketSocket {
        id: id.clone(),
        outbound,
        buffered,
        is_open: Arc::clone(&is_open),
        shutdown,
        remote_addr,
    });

    let inbound = WebSocketInbound {
        id,
        stream,
        is_open,
        shutdown: shutdown_rx,
    };

    (socket, inbound)
}

fn to_ws_message(payload: Bytes) -> Message {
    match String::from_utf8(payload.to_vec()) {
        Ok(text) => Message::Text(text),
        Err(e) => Message::Binary(e.into_bytes()),
    }
}

async fn write_loop(
    id: ConnectionId,
    mut sink: SplitSink<WebSocket, Message>,
    mut commands: mpsc::UnboundedReceiver<Outbound>,
    buffered: Arc<AtomicUsize>,
    is_open: Arc<AtomicBool>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let command = tokio::select! {
            biased;
            // Only an explicit terminate; a dropped socket drains first.
            Ok(()) = shutdown.changed() => {
                debug!(connection = %id, "Writer terminated");
                break;
            }
            command = commands.recv() => command,
        };

        match command {
            Some(Outbound::Data(payload)) => {
                let len = payload.len();
                let result = sink.send(to_ws_message(payload)).await;
                buffered.fetch_sub(len, Ordering::SeqCst);
                if let Err(e) = result {
                    warn!(connection = %id, error = %e, "WebSocket write failed");
                    break;
                }
                trace!(connection = %id, bytes = len, "Frame written");
            }
            Some(Outbound::Ping) => {
                if let Err(e) = sink.send(Message::Ping(Vec::new())).await {
                    debug!(connection = %id, error = %e, "Ping failed");
                    break;
                }
            }
            Some(Outbound::Close(code, reason)) => {
                let frame = CloseFrame {
                    code,
                    reason: reason.into(),
                };
                if let Err(e) = sink.send(Message::Close(Some(frame))).await {
                    debug!(connection = %id, error = %e, "Close frame failed");
                }
                break;
            }
            None => {
                let _ = sink.close().await;
                break;
            }
        }
    }

    is_open.store(false, Ordering::SeqCst);
}

impl Socket for WebSocketSocket {
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

        let len = payload.len();
        self.buffered.fetch_add(len, Ordering::SeqCst);
        self.outbound.send(Outbound::Data(payload)).map_err(|_| {
            self.buffered.fetch_sub(len, Ordering::SeqCst);
            TransportError::ConnectionClosed
        })
    }

    fn ping(&self) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::ConnectionClosed);
        }

        self.outbound
            .send(Outbound::Ping)
            .map_err(|_| TransportError::ConnectionClosed)
    }

    fn close(&self, code: u16, reason: &str) -> Result<(), TransportError> {
        if !self.is_open.swap(false, Ordering::SeqCst) {
            return Ok(()); // Already closing
        }

        self.outbound
            .send(Outbound::Close(code, reason.to_string()))
            .map_err(|_| TransportError::ConnectionClosed)
    }

    fn terminate(&self) {
        self.is_open.store(false, Ordering::SeqCst);
        self.shutdown.send_replace(true);
    }

    fn remote_addr(&self) -> Option<String> {
        self.remote_addr.map(|addr| addr.to_string())
    }
}

impl WebSocketInbound {
    /// Get the connection ID shared with the outbound half.
    #[must_use]
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Wait for the next inbound event.
    ///
    /// Pings are answered by the WebSocket layer and never surface here.
    /// After [`InboundEvent::Closed`] or [`InboundEvent::Error`] the reader
    /// should be dropped.
    pub async fn next(&mut self) -> InboundEvent {
        loop {
            let message = tokio::select! {
                biased;
                _ = self.shutdown.changed() => {
                    return InboundEvent::Closed(CloseInfo::abnormal("terminated"));
                }
                message = self.stream.next() => message,
            };

            match message {
                Some(Ok(Message::Text(text))) => return InboundEvent::Data(Bytes::from(text)),
                Some(Ok(Message::Binary(data))) => return InboundEvent::Data(Bytes::from(data)),
                Some(Ok(Message::Pong(_))) => return InboundEvent::Pong,
                Some(Ok(Message::Ping(_))) => {}
                Some(Ok(Message::Close(frame))) => {
                    debug!(connection = %self.id, "Received close frame");
                    self.is_open.store(false, Ordering::SeqCst);
                    let info = frame
                        .map(|f| CloseInfo::new(f.code, f.reason.into_owned()))
                        .unwrap_or(CloseInfo {
                            code: None,
                            reason: String::new(),
                        });
                    return InboundEvent::Closed(info);
                }
                Some(Err(e)) => {
                    self.is_open.store(false, Ordering::SeqCst);
                    return InboundEvent::Error(TransportError::ReceiveFailed(e.to_string()));
                }
                None => {
                    debug!(connection = %self.id, "WebSocket stream ended");
                    self.is_open.store(false, Ordering::SeqCst);
                    return InboundEvent::Closed(CloseInfo::abnormal("stream ended"));
                }
            }
        }
    }
}
