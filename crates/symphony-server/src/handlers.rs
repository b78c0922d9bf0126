//! HTTP handlers for the Symphony server.
//!
//! This module wires the WebSocket endpoint to the hub and exposes the
//! health and statistics endpoints.

use crate::auth::AuthenticatedUser;
use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::Result;
use axum::{
    extract::{
        ws::{WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use symphony_core::{ChatService, Hub, MemoryChatService};
use symphony_protocol::UserId;
use symphony_transport::WebSocketTransport;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

/// Shared server state.
pub struct AppState {
    /// The chat hub.
    pub hub: Arc<Hub>,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create app state backed by an in-memory chat service.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self::with_chat_service(config, Arc::new(MemoryChatService::new()))
    }

    /// Create app state backed by the given chat service.
    #[must_use]
    pub fn with_chat_service(config: Config, chats: Arc<dyn ChatService>) -> Self {
        Self {
            hub: Arc::new(Hub::with_config(chats, config.hub_config())),
            config,
        }
    }
}

/// Build the HTTP router.
pub fn router(state: Arc<AppState>) -> Router {
    let websocket_path = state.config.websocket_path.clone();

    Router::new()
        .route(&websocket_path, get(ws_handler))
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler))
        .with_state(state)
}

/// Run the HTTP/WebSocket server until Ctrl-C.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let state = Arc::new(AppState::new(config.clone()));

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
        metrics::spawn_stats_reporter(
            state.hub.clone(),
            Duration::from_millis(config.metrics.stats_interval_ms.max(1)),
        );
    }

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;

    info!("Symphony server listening on {}", addr);
    info!("WebSocket endpoint: ws://{}{}", addr, config.websocket_path);

    serve(listener, state, shutdown_signal()).await
}

/// Serve on a bound listener until `shutdown` resolves.
///
/// # Errors
///
/// Returns an error if serving fails.
pub async fn serve<F>(listener: TcpListener, state: Arc<AppState>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = router(state);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Registry statistics handler.
async fn stats_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.hub.stats().await;
    metrics::set_registry_stats(&stats);
    Json(stats)
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    AuthenticatedUser(user): AuthenticatedUser,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    debug!(user = %user, remote = %addr, "WebSocket upgrade");

    ws.max_message_size(state.config.limits.max_message_size)
        .on_upgrade(move |socket| handle_websocket(socket, user, addr, state))
}

/// Hand an upgraded socket to the hub and hold it until it closes.
async fn handle_websocket(socket: WebSocket, user: UserId, addr: SocketAddr, state: Arc<AppState>) {
    let _metrics_guard = ConnectionMetricsGuard::new();

    let transport = WebSocketTransport::new(socket).with_remote_addr(addr);
    let connection = state.hub.connect(Box::new(transport), user).await;

    connection.closed().await;
    debug!(
        user = %user,
        connection = %connection.id(),
        reason = ?connection.close_reason(),
        "WebSocket disconnected"
    );
}
