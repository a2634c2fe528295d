//! Built-in message handlers.
//!
//! Every handler sends at most one reply to the caller. Client mistakes
//! (missing fields, bad room IDs) get a typed error reply; anything else is
//! returned as a [`ferry_core::HandlerError`] and surfaces as `handler_error`.

use ferry_core::{Connection, DispatchTable, HandlerResult, Hub, RoomError};
use ferry_protocol::Message;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

/// Message type of room broadcasts delivered to members.
pub const ROOM_MESSAGE: &str = "room.message";

/// Message type of peer broadcasts delivered to bound peers.
pub const PEERS_MESSAGE: &str = "peers.message";

/// Build the server's dispatch table.
#[must_use]
pub fn dispatch_table() -> DispatchTable {
    DispatchTable::builder()
        .route("echo", echo)
        .route("identify", identify)
        .route("room.join", room_join)
        .route("room.leave", room_leave)
        .route("room.broadcast", room_broadcast)
        .route("peers.broadcast", peers_broadcast)
        .build()
}

fn reply_error(conn: &Connection, request: &Message, error: &str) -> HandlerResult {
    conn.send(&Message::error(request, error))?;
    Ok(())
}

/// Reply with the request's data.
async fn echo(conn: Arc<Connection>, msg: Message, _hub: Arc<Hub>) -> HandlerResult {
    let data = msg.data.clone().unwrap_or(Value::Null);
    conn.send(&Message::success(&msg, data))?;
    Ok(())
}

/// Bind `data.peerId` to the caller.
async fn identify(conn: Arc<Connection>, msg: Message, hub: Arc<Hub>) -> HandlerResult {
    let Some(peer_id) = msg.data_str("peerId").filter(|id| !id.is_empty()) else {
        return reply_error(&conn, &msg, "Missing peerId");
    };

    if let Some(previous) = hub.peers().bind(peer_id, &conn)? {
        debug!(peer = %peer_id, previous = %previous.id(), "Peer ID moved to new connection");
    }

    conn.send(&Message::success(&msg, json!({ "peerId": peer_id })))?;
    Ok(())
}

/// Put the caller in `data.roomId`.
async fn room_join(conn: Arc<Connection>, msg: Message, hub: Arc<Hub>) -> HandlerResult {
    let Some(room_id) = msg.data_str("roomId") else {
        return reply_error(&conn, &msg, "Missing roomId");
    };

    match hub.rooms().join(room_id, &conn) {
        Ok(_) => {}
        Err(e @ RoomError::InvalidRoom(_)) => return reply_error(&conn, &msg, &e.to_string()),
        Err(e) => return Err(e.into()),
    }

    let members = hub.rooms().member_count(room_id);
    conn.send(&Message::success(
        &msg,
        json!({ "roomId": room_id, "members": members }),
    ))?;
    Ok(())
}

/// Take the caller out of its room.
async fn room_leave(conn: Arc<Connection>, msg: Message, hub: Arc<Hub>) -> HandlerResult {
    let left = hub.rooms().leave(&conn);
    conn.send(&Message::success(&msg, json!({ "roomId": left })))?;
    Ok(())
}

/// Relay `data` to the rest of the caller's room.
async fn room_broadcast(conn: Arc<Connection>, msg: Message, hub: Arc<Hub>) -> HandlerResult {
    let Some(room_id) = conn.room_id() else {
        return reply_error(&conn, &msg, "Not in a room");
    };

    let relay = Message::request(ROOM_MESSAGE).with_data(msg.data.clone().unwrap_or(Value::Null));
    let recipients = hub.broadcast_to_room(&room_id, &relay, Some(conn.id()))?;

    conn.send(&Message::success(&msg, json!({ "recipients": recipients })))?;
    Ok(())
}

/// Relay `data` to every identified peer.
async fn peers_broadcast(conn: Arc<Connection>, msg: Message, hub: Arc<Hub>) -> HandlerResult {
    if conn.peer_id().is_none() {
        return reply_error(&conn, &msg, "Wrong peerId");
    }

    let relay = Message::request(PEERS_MESSAGE).with_data(msg.data.clone().unwrap_or(Value::Null));
    let recipients = hub.broadcast_to_peers(&relay)?;

    conn.send(&Message::success(&msg, json!({ "recipients": recipients })))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_core::{ConnectionManager, ManagerConfig};
    use ferry_protocol::{EnvelopeCodec, EnvelopeKey, Status};
    use ferry_transport::memory::{self, MemoryPeer};

    struct Harness {
        manager: Arc<ConnectionManager>,
        codec: Arc<EnvelopeCodec>,
    }

    impl Harness {
        fn new() -> Self {
            let codec = Arc::new(EnvelopeCodec::new(&EnvelopeKey::generate()));
            Self {
                manager: ConnectionManager::new(
                    Arc::clone(&codec),
                    dispatch_table(),
                    ManagerConfig::default(),
                ),
                codec,
            }
        }

        fn connect(&self, id: &str) -> (Arc<Connection>, MemoryPeer) {
            let (socket, peer) = memory::pair_with_id(id);
            (self.manager.accept(socket), peer)
        }

        async fn request(&self, conn: &Arc<Connection>, peer: &mut MemoryPeer, msg: Message) -> Message {
            let payload = self.codec.encode(&msg).unwrap();
            self.manager.handle_inbound(conn, &payload);
            self.next(peer).await
        }

        async fn next(&self, peer: &mut MemoryPeer) -> Message {
            let payload = peer.recv_data().await.unwrap();
            self.codec.decode(&payload).unwrap()
        }
    }

    fn join(room: &str) -> Message {
        Message::request("room.join").with_data(json!({ "roomId": room }))
    }

    #[tokio::test]
    async fn test_echo() {
        let h = Harness::new();
        let (conn, mut peer) = h.connect("a");

        let reply = h
            .request(&conn, &mut peer, Message::request("echo").with_request_id("1").with_data(json!("hi")))
            .await;
        assert_eq!(reply.status, Some(Status::Success));
        assert_eq!(reply.request_id.as_deref(), Some("1"));
        assert_eq!(reply.data, Some(json!("hi")));
    }

    #[tokio::test]
    async fn test_identify_binds_peer() {
        let h = Harness::new();
        let (conn, mut peer) = h.connect("a");

        let reply = h
            .request(&conn, &mut peer, Message::request("identify").with_data(json!({ "peerId": "alice" })))
            .await;
        assert_eq!(reply.data, Some(json!({ "peerId": "alice" })));
        assert_eq!(conn.peer_id().as_deref(), Some("alice"));
        assert!(h.manager.hub().peers().contains("alice"));

        let reply = h.request(&conn, &mut peer, Message::request("identify")).await;
        assert_eq!(reply.error.as_deref(), Some("Missing peerId"));
    }

    #[tokio::test]
    async fn test_room_join_and_leave() {
        let h = Harness::new();
        let (conn, mut peer) = h.connect("a");

        let reply = h.request(&conn, &mut peer, join("r1")).await;
        assert_eq!(reply.data, Some(json!({ "roomId": "r1", "members": 1 })));
        assert_eq!(conn.room_id().as_deref(), Some("r1"));

        let reply = h.request(&conn, &mut peer, join("")).await;
        assert!(reply.is_error());
        assert_eq!(conn.room_id().as_deref(), Some("r1"));

        let reply = h.request(&conn, &mut peer, Message::request("room.leave")).await;
        assert_eq!(reply.data, Some(json!({ "roomId": "r1" })));
        assert!(!h.manager.hub().rooms().room_exists("r1"));
    }

    #[tokio::test]
    async fn test_room_broadcast_reaches_others() {
        let h = Harness::new();
        let (a, mut pa) = h.connect("a");
        let (b, mut pb) = h.connect("b");
        let (c, mut pc) = h.connect("c");
        h.request(&a, &mut pa, join("r1")).await;
        h.request(&b, &mut pb, join("r1")).await;
        h.request(&c, &mut pc, join("r1")).await;

        let reply = h
            .request(&a, &mut pa, Message::request("room.broadcast").with_data(json!({ "text": "hi" })))
            .await;
        assert_eq!(reply.data, Some(json!({ "recipients": 2 })));

        for peer in [&mut pb, &mut pc] {
            let relayed = h.next(peer).await;
            assert_eq!(relayed.kind(), Some(ROOM_MESSAGE));
            assert_eq!(relayed.data, Some(json!({ "text": "hi" })));
        }

        tokio::task::yield_now().await;
        assert!(pa.drain().is_empty());
    }

    #[tokio::test]
    async fn test_room_broadcast_requires_room() {
        let h = Harness::new();
        let (conn, mut peer) = h.connect("a");

        let reply = h.request(&conn, &mut peer, Message::request("room.broadcast")).await;
        assert_eq!(reply.error.as_deref(), Some("Not in a room"));
    }

    #[tokio::test]
    async fn test_peers_broadcast_requires_identity() {
        let h = Harness::new();
        let (a, mut pa) = h.connect("a");
        let (b, mut pb) = h.connect("b");

        let reply = h.request(&a, &mut pa, Message::request("peers.broadcast")).await;
        assert_eq!(reply.error.as_deref(), Some("Wrong peerId"));

        h.request(&a, &mut pa, Message::request("identify").with_data(json!({ "peerId": "alice" })))
            .await;
        h.request(&b, &mut pb, Message::request("identify").with_data(json!({ "peerId": "bob" })))
            .await;

        let reply = h
            .request(&a, &mut pa, Message::request("peers.broadcast").with_data(json!(42)))
            .await;
        // The relay to the caller is queued before the reply.
        assert_eq!(reply.kind(), Some(PEERS_MESSAGE));
        let reply = h.next(&mut pa).await;
        assert_eq!(reply.data, Some(json!({ "recipients": 2 })));

        let relayed = h.next(&mut pb).await;
        assert_eq!(relayed.kind(), Some(PEERS_MESSAGE));
        assert_eq!(relayed.data, Some(json!(42)));
    }
}
