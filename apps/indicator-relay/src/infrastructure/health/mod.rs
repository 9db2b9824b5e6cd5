//! Health Check, Metrics and Stream Endpoint
//!
//! HTTP endpoint for health checks, Prometheus metrics and the downstream
//! broadcast stream.
//!
//! # Endpoints
//!
//! - `GET /health` - JSON health status
//! - `GET /healthz` - liveness probe (simple OK)
//! - `GET /readyz` - readiness probe (at least one symbol connected)
//! - `GET /metrics` - Prometheus metrics in text format
//! - `GET /stream` - WebSocket carrying every published `{event, payload}`

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;

use crate::application::services::{IndicatorRelay, RelayHealth};
use crate::infrastructure::broadcast::{Broadcast, BroadcastHub};
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Overall status.
    pub status: HealthStatus,
    /// Service version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Connected `/stream` consumers.
    pub stream_clients: usize,
    /// Connections, proxies, subscriptions and values.
    #[serde(flatten)]
    pub relay: RelayHealth,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Every symbol is connected.
    Healthy,
    /// Some symbols are connected.
    Degraded,
    /// No symbol is connected.
    Unhealthy,
}

/// Source of relay health snapshots.
pub trait HealthSource: Send + Sync {
    /// Current snapshot.
    fn health(&self) -> RelayHealth;
}

impl HealthSource for IndicatorRelay {
    fn health(&self) -> RelayHealth {
        Self::health(self)
    }
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    source: Arc<dyn HealthSource>,
    hub: Arc<BroadcastHub>,
    cancel: CancellationToken,
}

impl HealthServerState {
    /// Create new health server state. `cancel` also closes `/stream` sockets.
    #[must_use]
    pub fn new(
        version: String,
        source: Arc<dyn HealthSource>,
        hub: Arc<BroadcastHub>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            source,
            hub,
            cancel,
        }
    }
}

// =============================================================================
// Health Server
// =============================================================================

/// Health check HTTP server.
pub struct HealthServer {
    port: u16,
    state: Arc<HealthServerState>,
}

impl HealthServer {
    /// Create a new health server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HealthServerState>) -> Self {
        Self { port, state }
    }

    /// Bind the configured port and serve until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HealthServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Health server listening");
        serve(listener, self.state).await
    }
}

/// Serve on an already bound listener until the state's token is cancelled.
///
/// # Errors
///
/// Returns `HealthServerError::ServerFailed` on a fatal server error.
pub async fn serve(
    listener: TcpListener,
    state: Arc<HealthServerState>,
) -> Result<(), HealthServerError> {
    let cancel = state.cancel.clone();
    axum::serve(listener, router(state))
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await
        .map_err(|e| HealthServerError::ServerFailed(e.to_string()))?;

    tracing::info!("Health server stopped");
    Ok(())
}

fn router(state: Arc<HealthServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .route("/stream", get(stream_handler))
        .with_state(state)
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let response = build_health_response(&state);
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let health = state.source.health();
    if health.connections.iter().any(|c| c.connected) {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                handle.render(),
            )
        },
    )
}

async fn stream_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<HealthServerState>>,
) -> impl IntoResponse {
    // Subscribe before upgrading so nothing published after the handshake is missed.
    let rx = state.hub.subscribe();
    let cancel = state.cancel.clone();
    ws.on_upgrade(move |socket| forward_stream(socket, rx, cancel))
}

async fn forward_stream(
    mut socket: WebSocket,
    mut rx: broadcast::Receiver<Arc<Broadcast>>,
    cancel: CancellationToken,
) {
    tracing::debug!("Stream consumer connected");
    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                let _ = socket.send(Message::Close(None)).await;
                break;
            }
            message = rx.recv() => match message {
                Ok(message) => {
                    let text = match serde_json::to_string(&*message) {
                        Ok(text) => text,
                        Err(e) => {
                            tracing::warn!(error = %e, "Could not serialize broadcast");
                            continue;
                        }
                    };
                    if socket.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Stream consumer lagging, skipping messages");
                }
                Err(RecvError::Closed) => break,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
    tracing::debug!("Stream consumer disconnected");
}

fn build_health_response(state: &HealthServerState) -> HealthResponse {
    let relay = state.source.health();
    HealthResponse {
        status: determine_health_status(&relay),
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        stream_clients: state.hub.receiver_count(),
        relay,
    }
}

fn determine_health_status(health: &RelayHealth) -> HealthStatus {
    let total = health.connections.len();
    let connected = health.connections.iter().filter(|c| c.connected).count();

    match connected {
        0 => HealthStatus::Unhealthy,
        n if n == total => HealthStatus::Healthy,
        _ => HealthStatus::Degraded,
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Health server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use futures_util::StreamExt;
    use serde_json::{Value, json};

    use super::*;
    use crate::application::ports::{BroadcastPort, EventKind};
    use crate::application::services::ConnectionStatus;
    use crate::domain::subscription::SubscriptionStats;

    struct Fixed(Vec<bool>);

    impl HealthSource for Fixed {
        fn health(&self) -> RelayHealth {
            RelayHealth {
                connections: self
                    .0
                    .iter()
                    .enumerate()
                    .map(|(i, &connected)| ConnectionStatus {
                        symbol: format!("S{i}"),
                        connected,
                        proxy: connected.then(|| "http://10.0.0.1:3128/".to_string()),
                        reconnect_attempts: u32::from(!connected),
                    })
                    .collect(),
                proxies: Vec::new(),
                subscriptions: SubscriptionStats::default(),
                values: 0,
            }
        }
    }

    async fn start(
        connected: Vec<bool>,
    ) -> (SocketAddr, Arc<BroadcastHub>, CancellationToken) {
        let hub = Arc::new(BroadcastHub::with_defaults());
        let cancel = CancellationToken::new();
        let state = Arc::new(HealthServerState::new(
            "test".into(),
            Arc::new(Fixed(connected)),
            Arc::clone(&hub),
            cancel.clone(),
        ));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve(listener, state));
        (addr, hub, cancel)
    }

    #[test]
    fn health_status_serialization() {
        assert_eq!(
            serde_json::to_string(&HealthStatus::Degraded).unwrap(),
            "\"degraded\""
        );
    }

    #[test]
    fn status_follows_connected_symbols() {
        assert_eq!(
            determine_health_status(&Fixed(vec![true, true]).health()),
            HealthStatus::Healthy
        );
        assert_eq!(
            determine_health_status(&Fixed(vec![true, false]).health()),
            HealthStatus::Degraded
        );
        assert_eq!(
            determine_health_status(&Fixed(vec![false, false]).health()),
            HealthStatus::Unhealthy
        );
        assert_eq!(
            determine_health_status(&Fixed(Vec::new()).health()),
            HealthStatus::Unhealthy
        );
    }

    #[tokio::test]
    async fn health_and_readiness_endpoints() {
        let (addr, _hub, cancel) = start(vec![true, false]).await;

        let health: Value = reqwest::get(format!("http://{addr}/health"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(health["status"], "degraded");
        assert_eq!(health["connections"][1]["reconnectAttempts"], 1);

        let ready = reqwest::get(format!("http://{addr}/readyz")).await.unwrap();
        assert_eq!(ready.status(), reqwest::StatusCode::OK);

        cancel.cancel();
    }

    #[tokio::test]
    async fn not_ready_without_connections() {
        let (addr, _hub, cancel) = start(vec![false]).await;

        let ready = reqwest::get(format!("http://{addr}/readyz")).await.unwrap();
        assert_eq!(ready.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);
        let health = reqwest::get(format!("http://{addr}/health")).await.unwrap();
        assert_eq!(health.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);

        cancel.cancel();
    }

    #[tokio::test]
    async fn stream_forwards_published_envelopes() {
        let (addr, hub, cancel) = start(vec![true]).await;

        let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/stream"))
            .await
            .unwrap();
        hub.publish(EventKind::LiveData, json!({"symbol": "X", "marketPrice": 1.5}));

        let frame = ws.next().await.unwrap().unwrap();
        let envelope: Value = serde_json::from_str(frame.to_text().unwrap()).unwrap();
        assert_eq!(
            envelope,
            json!({"event": "live-data", "payload": {"symbol": "X", "marketPrice": 1.5}})
        );

        cancel.cancel();
    }
}
