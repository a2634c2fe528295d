//! Connection lifecycle manager.
//!
//! The manager owns every live [`Connection`] and drives it through
//! `Connecting -> Open -> Closing -> Closed`. It decodes inbound envelopes,
//! dispatches them onto the connection's work queue, runs the heartbeat and
//! releases all per-connection resources on close.

use dashmap::DashMap;
use ferry_protocol::{close, EnvelopeCodec, Message};
use ferry_transport::{CloseInfo, ConnectionId, Socket, TransportError};
use serde::Serialize;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, trace, warn};

use crate::connection::{Connection, ConnectionState};
use crate::dispatch::{DispatchTable, HandlerError};
use crate::hub::Hub;
use crate::metrics;
use crate::sender::SenderConfig;
use crate::work_queue::{JobError, DEFAULT_CONCURRENCY};

/// Default heartbeat interval.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Manager configuration.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Handler jobs allowed to run at once per connection.
    pub work_concurrency: usize,
    /// Outbound queue settings.
    pub sender: SenderConfig,
    /// Time between heartbeat pings.
    pub heartbeat_interval: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            work_concurrency: DEFAULT_CONCURRENCY,
            sender: SenderConfig::default(),
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
        }
    }
}

/// Live counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ManagerStats {
    /// Registered connections.
    pub connections: usize,
    /// Rooms with at least one member.
    pub rooms: usize,
    /// Bound peer IDs.
    pub peers: usize,
}

/// What happened to an inbound envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inbound {
    /// The connection was not open.
    Ignored,
    /// Decoding failed and the connection was closed.
    Rejected,
    /// No handler for the type; an error reply was sent.
    Unsupported,
    /// A handler job was submitted.
    Queued,
}

/// Owns connections and routes their traffic.
pub struct ConnectionManager {
    hub: Arc<Hub>,
    dispatch: DispatchTable,
    config: ManagerConfig,
    connections: DashMap<ConnectionId, Arc<Connection>>,
}

impl ConnectionManager {
    /// Create a manager.
    #[must_use]
    pub fn new(codec: Arc<EnvelopeCodec>, dispatch: DispatchTable, config: ManagerConfig) -> Arc<Self> {
        info!(
            handlers = dispatch.len(),
            concurrency = config.work_concurrency,
            byte_cap = config.sender.byte_cap,
            heartbeat_ms = config.heartbeat_interval.as_millis() as u64,
            "Creating connection manager"
        );
        Arc::new(Self {
            hub: Arc::new(Hub::new(codec)),
            dispatch,
            config,
            connections: DashMap::new(),
        })
    }

    /// Get the shared registries.
    #[must_use]
    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    /// Get the configuration.
    #[must_use]
    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Look up a registered connection.
    #[must_use]
    pub fn get(&self, id: &ConnectionId) -> Option<Arc<Connection>> {
        self.connections.get(id).map(|c| Arc::clone(c.value()))
    }

    /// Number of registered connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Get live counts.
    #[must_use]
    pub fn stats(&self) -> ManagerStats {
        ManagerStats {
            connections: self.connections.len(),
            rooms: self.hub.rooms().room_count(),
            peers: self.hub.peers().len(),
        }
    }

    /// Register a freshly upgraded socket and open it.
    pub fn accept(&self, socket: Arc<dyn Socket>) -> Arc<Connection> {
        let remote = socket.remote_addr();
        let conn = Connection::new(
            socket,
            Arc::clone(self.hub.codec()),
            self.config.sender.clone(),
            self.config.work_concurrency,
        );
        self.connections.insert(conn.id().clone(), Arc::clone(&conn));
        conn.set_state(ConnectionState::Open);

        metrics::record_connection();
        info!(connection = %conn.id(), remote = ?remote, "Connection opened");
        conn
    }

    /// Process one inbound data frame.
    ///
    /// Must be called from within a tokio runtime.
    pub fn handle_inbound(&self, conn: &Arc<Connection>, payload: &[u8]) -> Inbound {
        if !conn.is_open() {
            trace!(connection = %conn.id(), state = ?conn.state(), "Ignoring frame on inactive connection");
            return Inbound::Ignored;
        }
        metrics::record_message(payload.len(), "inbound");

        let message = match self.hub.codec().decode(payload) {
            Ok(message) => message,
            Err(e) => {
                warn!(connection = %conn.id(), kind = e.kind(), error = %e, "Undecodable envelope");
                metrics::record_decode_error(e.kind());
                self.reject(conn);
                return Inbound::Rejected;
            }
        };

        let handler = match self.dispatch.resolve(message.kind()) {
            Ok(handler) => handler,
            Err(e) => {
                debug!(connection = %conn.id(), error = %e, "No handler");
                if let Err(e) = conn.send(&Message::unsupported(message.kind())) {
                    debug!(connection = %conn.id(), error = %e, "Unsupported reply dropped");
                }
                return Inbound::Unsupported;
            }
        };

        let kind = message.kind.clone();
        trace!(connection = %conn.id(), kind = ?kind, "Queueing handler");

        let hub = Arc::clone(&self.hub);
        let target = Arc::clone(conn);
        let job = conn.work_queue().submit(async move {
            let started = Instant::now();
            let result = handler.handle(target, message, hub).await;
            metrics::record_handler_latency(started.elapsed().as_secs_f64());
            result
        });

        let conn = Arc::clone(conn);
        tokio::spawn(async move {
            let failure = match job.await {
                Ok(Ok(())) | Err(JobError::Discarded | JobError::Closed) => return,
                // A shed or late reply is dropped silently.
                Ok(Err(HandlerError::Send(e))) => {
                    debug!(connection = %conn.id(), kind = ?kind, error = %e, "Handler reply dropped");
                    return;
                }
                Ok(Err(e)) => {
                    warn!(connection = %conn.id(), kind = ?kind, error = %e, "Handler failed");
                    "error"
                }
                Err(JobError::Panicked) => {
                    error!(connection = %conn.id(), kind = ?kind, "Handler panicked");
                    "panic"
                }
            };

            metrics::record_handler_error(failure);
            if let Err(e) = conn.send(&Message::handler_error(kind.as_deref())) {
                debug!(connection = %conn.id(), error = %e, "Handler error reply dropped");
            }
        });

        Inbound::Queued
    }

    /// Record a heartbeat reply.
    pub fn handle_pong(&self, conn: &Connection) {
        trace!(connection = %conn.id(), "Pong");
        conn.mark_alive();
    }

    /// Handle a transport fault by closing the connection.
    pub fn handle_transport_error(&self, conn: &Arc<Connection>, err: &TransportError) {
        warn!(connection = %conn.id(), error = %err, "Transport error");
        conn.socket().terminate();
        self.close(conn, CloseInfo::abnormal(err.to_string()));
    }

    /// Close after a protocol violation. No reply is sent.
    fn reject(&self, conn: &Arc<Connection>) {
        if let Err(e) = conn
            .socket()
            .close(close::PROTOCOL_VIOLATION, close::PROTOCOL_VIOLATION_REASON)
        {
            debug!(connection = %conn.id(), error = %e, "Close frame not sent");
        }
        self.close(
            conn,
            CloseInfo::new(close::PROTOCOL_VIOLATION, close::PROTOCOL_VIOLATION_REASON),
        );
    }

    /// Release every resource held by `conn`.
    ///
    /// Leaves its room, drops its peer binding, clears its sender and work
    /// queue and unregisters it. Running handler jobs finish on their own;
    /// their replies are refused by the cleared sender. Safe to call any
    /// number of times; returns `true` only for the call that did the work.
    pub fn close(&self, conn: &Arc<Connection>, info: CloseInfo) -> bool {
        if !conn.begin_close() {
            return false;
        }

        let room = self.hub.rooms().leave(conn);
        self.hub.peers().unbind(conn);
        conn.sender().clear();
        let discarded = conn.work_queue().close();
        self.connections
            .remove_if(conn.id(), |_, registered| Arc::ptr_eq(registered, conn));
        conn.set_state(ConnectionState::Closed);

        metrics::record_disconnection();
        info!(
            connection = %conn.id(),
            code = ?info.code,
            reason = %info.reason,
            room = ?room,
            discarded,
            "Connection closed"
        );
        true
    }

    /// Close every connection with `1001 Going Away`.
    pub fn shutdown(&self) {
        let conns: Vec<Arc<Connection>> = self.connections.iter().map(|c| Arc::clone(c.value())).collect();
        info!(connections = conns.len(), "Closing all connections");

        for conn in conns {
            if let Err(e) = conn.socket().close(close::GOING_AWAY, "server shutdown") {
                debug!(connection = %conn.id(), error = %e, "Close frame not sent");
            }
            self.close(&conn, CloseInfo::new(close::GOING_AWAY, "server shutdown"));
        }
    }

    /// Run one heartbeat round.
    ///
    /// Open connections that did not answer the previous ping are terminated
    /// and closed; the rest are pinged. Returns the number terminated.
    pub fn heartbeat_tick(&self) -> usize {
        let conns: Vec<Arc<Connection>> = self.connections.iter().map(|c| Arc::clone(c.value())).collect();
        let mut terminated = 0;

        for conn in conns.iter().filter(|c| c.is_open()) {
            if !conn.take_alive() {
                warn!(connection = %conn.id(), "Heartbeat missed, terminating");
                metrics::record_heartbeat_termination();
                conn.socket().terminate();
                self.close(conn, CloseInfo::abnormal("heartbeat timeout"));
                terminated += 1;
                continue;
            }

            if let Err(e) = conn.socket().ping() {
                debug!(connection = %conn.id(), error = %e, "Ping failed");
            }
        }

        trace!(checked = conns.len(), terminated, "Heartbeat");
        terminated
    }

    /// Spawn the heartbeat loop.
    ///
    /// The task ends on its own once the manager is dropped.
    pub fn spawn_heartbeat(self: &Arc<Self>) -> JoinHandle<()> {
        let manager: Weak<Self> = Arc::downgrade(self);
        let period = self.config.heartbeat_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(manager) = manager.upgrade() else {
                    break;
                };
                manager.heartbeat_tick();
            }
        })
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("dispatch", &self.dispatch)
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::HandlerResult;
    use crate::sender::SendError;
    use ferry_protocol::{EnvelopeKey, Status};
    use ferry_transport::memory::{self, MemoryEvent, MemoryPeer};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn echo(conn: Arc<Connection>, msg: Message, _hub: Arc<Hub>) -> HandlerResult {
        let data = msg.data.clone().unwrap_or_default();
        conn.send(&Message::success(&msg, data))?;
        Ok(())
    }

    async fn fail(_conn: Arc<Connection>, _msg: Message, _hub: Arc<Hub>) -> HandlerResult {
        Err(HandlerError::failed("database unavailable"))
    }

    async fn explode(_conn: Arc<Connection>, _msg: Message, _hub: Arc<Hub>) -> HandlerResult {
        panic!("handler bug");
    }

    async fn join(conn: Arc<Connection>, msg: Message, hub: Arc<Hub>) -> HandlerResult {
        let room = msg.data_str("roomId").unwrap_or_default().to_string();
        hub.rooms().join(&room, &conn)?;
        Ok(())
    }

    struct Fixture {
        manager: Arc<ConnectionManager>,
        codec: Arc<EnvelopeCodec>,
    }

    impl Fixture {
        fn new(dispatch: DispatchTable) -> Self {
            Self::with_config(dispatch, ManagerConfig::default())
        }

        fn with_config(dispatch: DispatchTable, config: ManagerConfig) -> Self {
            let codec = Arc::new(EnvelopeCodec::new(&EnvelopeKey::from_bytes([9u8; 32])));
            Self {
                manager: ConnectionManager::new(Arc::clone(&codec), dispatch, config),
                codec,
            }
        }

        fn connect(&self, id: &str) -> (Arc<Connection>, MemoryPeer) {
            let (socket, peer) = memory::pair_with_id(id);
            (self.manager.accept(socket), peer)
        }

        fn send(&self, conn: &Arc<Connection>, msg: &Message) -> Inbound {
            let payload = self.codec.encode(msg).unwrap();
            self.manager.handle_inbound(conn, &payload)
        }

        async fn reply(&self, peer: &mut MemoryPeer) -> Message {
            let payload = peer.recv_data().await.unwrap();
            self.codec.decode(&payload).unwrap()
        }
    }

    fn table() -> DispatchTable {
        DispatchTable::builder()
            .route("echo", echo)
            .route("fail", fail)
            .route("explode", explode)
            .route("room.join", join)
            .build()
    }

    #[tokio::test]
    async fn test_accept_opens_and_registers() {
        let fx = Fixture::new(table());
        let (conn, _peer) = fx.connect("a");

        assert_eq!(conn.state(), ConnectionState::Open);
        assert!(conn.is_alive());
        assert!(fx.manager.get(conn.id()).is_some());
        assert_eq!(fx.manager.stats().connections, 1);
    }

    #[tokio::test]
    async fn test_echo_round_trip() {
        let fx = Fixture::new(table());
        let (conn, mut peer) = fx.connect("a");

        let request = Message::request("echo")
            .with_request_id("r1")
            .with_data(json!({"hello": "world"}));
        assert_eq!(fx.send(&conn, &request), Inbound::Queued);

        let reply = fx.reply(&mut peer).await;
        assert_eq!(reply.kind(), Some("echo"));
        assert_eq!(reply.request_id.as_deref(), Some("r1"));
        assert_eq!(reply.status, Some(Status::Success));
        assert_eq!(reply.data, Some(json!({"hello": "world"})));
    }

    #[tokio::test]
    async fn test_unknown_type_replies_without_job() {
        let fx = Fixture::new(table());
        let (conn, mut peer) = fx.connect("a");

        assert_eq!(fx.send(&conn, &Message::request("bogus")), Inbound::Unsupported);
        assert_eq!(conn.work_queue().pending() + conn.work_queue().active(), 0);

        let reply = fx.reply(&mut peer).await;
        assert_eq!(
            serde_json::to_value(&reply).unwrap(),
            json!({"type": "bogus", "error": "Unsupported message type"})
        );
    }

    #[tokio::test]
    async fn test_known_type_with_mistyped_request_id_is_dispatched() {
        let fx = Fixture::new(table());
        let (conn, mut peer) = fx.connect("a");

        let payload = fx
            .codec
            .seal(br#"{"type":"echo","requestId":7,"data":1}"#)
            .unwrap();
        assert_eq!(fx.manager.handle_inbound(&conn, &payload), Inbound::Queued);

        let reply = fx.reply(&mut peer).await;
        assert_eq!(reply.kind(), Some("echo"));
        assert_eq!(reply.status, Some(Status::Success));
        assert_eq!(reply.data, Some(json!(1)));
    }

    #[tokio::test]
    async fn test_handler_failure_sends_one_generic_error() {
        let fx = Fixture::new(table());
        let (conn, mut peer) = fx.connect("a");

        fx.send(&conn, &Message::request("fail").with_request_id("r9"));

        let reply = fx.reply(&mut peer).await;
        assert_eq!(
            serde_json::to_value(&reply).unwrap(),
            json!({"type": "fail", "error": "handler_error"})
        );

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(peer.drain().is_empty());
        assert!(conn.is_open());
    }

    #[tokio::test]
    async fn test_shed_reply_is_not_reported_as_failure() {
        let config = ManagerConfig {
            sender: SenderConfig {
                byte_cap: 4096,
                ..SenderConfig::default()
            },
            ..ManagerConfig::default()
        };
        let fx = Fixture::with_config(table(), config);
        let (conn, mut peer) = fx.connect("a");

        fx.send(&conn, &Message::request("echo").with_data(json!("x".repeat(5000))));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(peer.drain().is_empty());
        assert!(conn.is_open());

        // Replies under the cap still go out.
        fx.send(&conn, &Message::request("echo").with_data(json!("small")));
        let reply = fx.reply(&mut peer).await;
        assert_eq!(reply.data, Some(json!("small")));
        assert_eq!(reply.status, Some(Status::Success));
    }

    #[tokio::test]
    async fn test_reply_after_close_is_dropped() {
        let fx = Fixture::new(table());
        let (conn, mut peer) = fx.connect("a");

        fx.manager.close(&conn, CloseInfo::abnormal("gone"));
        let outcome = echo(Arc::clone(&conn), Message::request("echo"), Arc::clone(fx.manager.hub())).await;
        assert!(matches!(outcome, Err(HandlerError::Send(SendError::Closed))));

        tokio::task::yield_now().await;
        assert!(peer.drain().is_empty());
    }

    #[tokio::test]
    async fn test_handler_panic_is_isolated() {
        let fx = Fixture::new(table());
        let (conn, mut peer) = fx.connect("a");

        fx.send(&conn, &Message::request("explode"));
        let reply = fx.reply(&mut peer).await;
        assert_eq!(reply.error.as_deref(), Some("handler_error"));
        assert_eq!(reply.kind(), Some("explode"));

        // The connection keeps serving requests.
        fx.send(&conn, &Message::request("echo").with_data(json!(1)));
        let reply = fx.reply(&mut peer).await;
        assert_eq!(reply.data, Some(json!(1)));
        assert!(conn.is_open());
    }

    #[tokio::test]
    async fn test_decrypt_failure_closes_without_reply() {
        let fx = Fixture::new(table());
        let (conn, mut peer) = fx.connect("a");

        let outcome = fx.manager.handle_inbound(&conn, b"definitely not an envelope");
        assert_eq!(outcome, Inbound::Rejected);
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert!(fx.manager.get(conn.id()).is_none());

        assert_eq!(
            peer.drain(),
            vec![MemoryEvent::Close {
                code: close::PROTOCOL_VIOLATION,
                reason: close::PROTOCOL_VIOLATION_REASON.to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn test_invalid_json_closes_like_decrypt_failure() {
        let fx = Fixture::new(table());
        let (conn, mut peer) = fx.connect("a");

        let payload = fx.codec.seal(b"{not json").unwrap();
        assert_eq!(fx.manager.handle_inbound(&conn, &payload), Inbound::Rejected);
        assert!(matches!(
            peer.drain().as_slice(),
            [MemoryEvent::Close { code, .. }] if *code == close::PROTOCOL_VIOLATION
        ));
    }

    #[tokio::test]
    async fn test_frames_after_close_are_ignored() {
        let fx = Fixture::new(table());
        let (conn, mut peer) = fx.connect("a");

        assert!(fx.manager.close(&conn, CloseInfo::new(close::NORMAL, "bye")));
        assert_eq!(fx.send(&conn, &Message::request("echo")), Inbound::Ignored);
        assert_eq!(fx.send(&conn, &Message::request("bogus")), Inbound::Ignored);

        tokio::task::yield_now().await;
        assert!(peer.drain().is_empty());
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_releases_everything() {
        let fx = Fixture::new(table());
        let (conn, _peer) = fx.connect("a");
        fx.manager.hub().rooms().join("r1", &conn).unwrap();
        fx.manager.hub().peers().bind("alice", &conn).unwrap();

        assert!(fx.manager.close(&conn, CloseInfo::abnormal("gone")));
        assert!(!fx.manager.close(&conn, CloseInfo::abnormal("gone again")));

        assert_eq!(conn.state(), ConnectionState::Closed);
        assert!(!fx.manager.hub().rooms().room_exists("r1"));
        assert!(!fx.manager.hub().peers().contains("alice"));
        assert!(conn.sender().is_closed());
        assert!(conn.work_queue().is_closed());
        assert_eq!(
            fx.manager.stats(),
            ManagerStats {
                connections: 0,
                rooms: 0,
                peers: 0
            }
        );
    }

    #[tokio::test]
    async fn test_room_broadcast_excludes_sender() {
        let fx = Fixture::new(table());
        let (a, mut pa) = fx.connect("a");
        let (b, mut pb) = fx.connect("b");
        let (c, mut pc) = fx.connect("c");

        for conn in [&a, &b, &c] {
            fx.send(conn, &Message::request("room.join").with_data(json!({"roomId": "r1"})));
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(fx.manager.hub().rooms().member_count("r1"), 3);

        let p = Message::request("room.message").with_data(json!({"text": "hi"}));
        let sent = fx
            .manager
            .hub()
            .broadcast_to_room("r1", &p, Some(a.id()))
            .unwrap();
        assert_eq!(sent, 2);

        assert_eq!(fx.reply(&mut pb).await, p);
        assert_eq!(fx.reply(&mut pc).await, p);
        tokio::task::yield_now().await;
        assert!(pa.drain().is_empty());
    }

    #[tokio::test]
    async fn test_close_discards_queued_jobs() {
        let started = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&started);
        let slow = move |_conn: Arc<Connection>, _msg: Message, _hub: Arc<Hub>| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok::<(), HandlerError>(())
            }
        };
        let config = ManagerConfig {
            work_concurrency: 1,
            ..ManagerConfig::default()
        };
        let fx = Fixture::with_config(DispatchTable::builder().route("slow", slow).build(), config);
        let (conn, mut peer) = fx.connect("a");

        for _ in 0..5 {
            assert_eq!(fx.send(&conn, &Message::request("slow")), Inbound::Queued);
        }
        tokio::task::yield_now().await;
        fx.manager.close(&conn, CloseInfo::abnormal("gone"));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(started.load(Ordering::SeqCst), 1);
        assert!(peer.drain().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_terminates_silent_connection() {
        let interval = Duration::from_secs(30);
        let config = ManagerConfig {
            heartbeat_interval: interval,
            ..ManagerConfig::default()
        };
        let fx = Fixture::with_config(table(), config);
        let (silent, mut silent_peer) = fx.connect("silent");
        let (responsive, mut responsive_peer) = fx.connect("responsive");
        let _heartbeat = fx.manager.spawn_heartbeat();

        // Check between heartbeat rounds.
        tokio::time::sleep(interval / 2).await;
        for _ in 0..4 {
            tokio::time::sleep(interval).await;
            // Answer every ping on the responsive side.
            while let Some(event) = responsive_peer.try_recv() {
                if event == MemoryEvent::Ping {
                    fx.manager.handle_pong(&responsive);
                }
            }
        }

        assert_eq!(silent.state(), ConnectionState::Closed);
        assert!(silent_peer.drain().contains(&MemoryEvent::Terminate));
        assert!(responsive.is_open());
        assert_eq!(fx.manager.connection_count(), 1);
    }

    #[tokio::test]
    async fn test_heartbeat_tick_within_two_rounds() {
        let fx = Fixture::new(table());
        let (conn, mut peer) = fx.connect("a");

        assert_eq!(fx.manager.heartbeat_tick(), 0);
        assert_eq!(peer.try_recv(), Some(MemoryEvent::Ping));
        assert!(conn.is_open());

        assert_eq!(fx.manager.heartbeat_tick(), 1);
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert_eq!(peer.try_recv(), Some(MemoryEvent::Terminate));
    }

    #[tokio::test]
    async fn test_shutdown_closes_all() {
        let fx = Fixture::new(table());
        let (a, mut pa) = fx.connect("a");
        let (b, _pb) = fx.connect("b");

        fx.manager.shutdown();

        assert_eq!(a.state(), ConnectionState::Closed);
        assert_eq!(b.state(), ConnectionState::Closed);
        assert_eq!(fx.manager.connection_count(), 0);
        assert_eq!(
            pa.try_recv(),
            Some(MemoryEvent::Close {
                code: close::GOING_AWAY,
                reason: "server shutdown".to_string()
            })
        );
    }
}
