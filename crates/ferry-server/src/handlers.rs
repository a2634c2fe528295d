//! HTTP and WebSocket handlers for the Ferry server.
//!
//! This module wires the connection manager to axum: the WebSocket route,
//! the health check, the heartbeat task and graceful shutdown.

use crate::config::Config;
use crate::metrics;
use crate::services;
use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use ferry_core::{ConnectionManager, Inbound};
use ferry_protocol::EnvelopeCodec;
use ferry_transport::{websocket, CloseInfo, InboundEvent};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

/// Shared server state.
pub struct AppState {
    /// The connection manager.
    pub manager: Arc<ConnectionManager>,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create app state with the built-in handlers.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured key is malformed.
    pub fn new(config: Config) -> Result<Self> {
        let key = config.envelope_key()?;
        let codec = Arc::new(EnvelopeCodec::new(&key));
        let manager = ConnectionManager::new(codec, services::dispatch_table(), config.manager_config());

        Ok(Self { manager, config })
    }
}

/// Build the axum router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(&state.config.transport.websocket_path, get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Run the HTTP/WebSocket server until Ctrl-C.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let state = Arc::new(AppState::new(config.clone())?);

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(&config.host, config.metrics.port) {
            error!("Failed to start metrics server: {:#}", e);
        }
    }

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("Ferry server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    serve(listener, state, shutdown_signal()).await
}

/// Serve on `listener` until `shutdown` completes, then close every
/// connection.
///
/// # Errors
///
/// Returns an error if the server fails.
pub async fn serve(
    listener: TcpListener,
    state: Arc<AppState>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let heartbeat = state.manager.spawn_heartbeat();
    let manager = Arc::clone(&state.manager);
    let app = router(state);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown.await;
        info!("Shutting down");
        manager.shutdown();
    })
    .await
    .context("Server error")?;

    heartbeat.abort();
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.manager.stats();
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "connections": stats.connections,
        "rooms": stats.rooms,
        "peers": stats.peers,
    }))
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let limit = state.config.transport.max_message_size;
    ws.max_message_size(limit)
        .max_frame_size(limit)
        .on_upgrade(move |socket| handle_websocket(socket, addr, state))
}

/// Drive one WebSocket connection until it closes.
async fn handle_websocket(ws: WebSocket, addr: SocketAddr, state: Arc<AppState>) {
    let (socket, mut inbound) = websocket::split(ws, Some(addr));
    let manager = &state.manager;
    let conn = manager.accept(socket);

    debug!(connection = %conn.id(), remote = %addr, "WebSocket connected");

    loop {
        match inbound.next().await {
            InboundEvent::Data(payload) => {
                if manager.handle_inbound(&conn, &payload) == Inbound::Rejected {
                    break;
                }
            }
            InboundEvent::Pong => manager.handle_pong(&conn),
            InboundEvent::Closed(info) => {
                manager.close(&conn, info);
                break;
            }
            InboundEvent::Error(e) => {
                manager.handle_transport_error(&conn, &e);
                break;
            }
        }

        // Closed elsewhere: heartbeat or shutdown.
        if !conn.is_open() {
            break;
        }
    }

    manager.close(&conn, CloseInfo::abnormal("reader stopped"));
    debug!(connection = %conn.id(), "WebSocket disconnected");
}
