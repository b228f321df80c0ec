//! `RippleServer`: Axum HTTP + WebSocket relay server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::errors::ServerError;
use crate::health::{self, HealthResponse};
use crate::metrics::{WS_UPGRADE_REJECTIONS_TOTAL, detached_handle, render};
use crate::page;
use crate::registry::Registry;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::connection::ConnectionId;
use crate::websocket::session::run_session;

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Participant registry shared by all sessions.
    pub registry: Arc<Registry>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// Runtime configuration.
    pub config: Arc<ServerConfig>,
    /// When the server started.
    pub start_time: Instant,
    /// Live WebSocket connections, registered or not.
    pub live_connections: Arc<AtomicUsize>,
    /// Prometheus handle for `/metrics`.
    pub metrics: PrometheusHandle,
}

/// The relay server.
pub struct RippleServer {
    config: Arc<ServerConfig>,
    registry: Arc<Registry>,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
    live_connections: Arc<AtomicUsize>,
    metrics: PrometheusHandle,
}

impl RippleServer {
    /// Create a new server with a detached metrics handle.
    pub fn new(config: ServerConfig) -> Self {
        let registry = Arc::new(Registry::with_drop_threshold(config.max_dropped_messages));
        Self {
            config: Arc::new(config),
            registry,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            start_time: Instant::now(),
            live_connections: Arc::new(AtomicUsize::new(0)),
            metrics: detached_handle(),
        }
    }

    /// Render `/metrics` from `handle` (usually the globally installed recorder).
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = handle;
        self
    }

    /// Build the Axum router with all routes.
    ///
    /// Anything that is not `GET /chat`, `/health` or `/metrics` is treated
    /// as a WebSocket upgrade.
    pub fn router(&self) -> Router {
        let state = AppState {
            registry: Arc::clone(&self.registry),
            shutdown: Arc::clone(&self.shutdown),
            config: Arc::clone(&self.config),
            start_time: self.start_time,
            live_connections: Arc::clone(&self.live_connections),
            metrics: self.metrics.clone(),
        };

        Router::new()
            .route("/chat", get(page::chat_page).fallback(ws_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .fallback(ws_handler)
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Bind `host:port` and serve until shutdown.
    ///
    /// Returns the bound address (useful with port `0`) and the serve task.
    pub async fn listen(&self) -> Result<(SocketAddr, JoinHandle<()>), ServerError> {
        let bind = self.config.bind_addr();
        let listener = TcpListener::bind(&bind)
            .await
            .map_err(|source| ServerError::Bind {
                addr: bind.clone(),
                source,
            })?;
        let addr = listener.local_addr().map_err(ServerError::LocalAddr)?;
        let router = self.router();
        let token = self.shutdown.token();

        info!(%addr, max_connections = self.config.max_connections, "relay listening");
        let handle = tokio::spawn(async move {
            let served = axum::serve(listener, router)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
            if let Err(source) = served {
                error!(error = %ServerError::Serve { addr, source }, "server stopped");
            } else {
                info!(%addr, "server stopped");
            }
        });
        Ok((addr, handle))
    }

    /// Get the participant registry.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Live WebSocket connections.
    pub fn connection_count(&self) -> usize {
        self.live_connections.load(Ordering::Relaxed)
    }
}

/// Holds one of the `max_connections` slots until dropped.
struct ConnectionSlot(Arc<AtomicUsize>);

impl ConnectionSlot {
    fn acquire(live: &Arc<AtomicUsize>, max: usize) -> Option<Self> {
        let _ = live
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < max).then_some(n + 1)
            })
            .ok()?;
        Some(Self(Arc::clone(live)))
    }
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        let _ = self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Fallback: upgrade to a relay session.
async fn ws_handler(
    State(state): State<AppState>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let upgrade = match upgrade {
        Ok(upgrade) => upgrade,
        Err(rejection) => {
            debug!(reason = %rejection, "request is not a websocket upgrade");
            counter!(WS_UPGRADE_REJECTIONS_TOTAL, "reason" => "not_upgrade").increment(1);
            return (StatusCode::BAD_REQUEST, "Not found").into_response();
        }
    };

    if state.shutdown.is_shutting_down() {
        counter!(WS_UPGRADE_REJECTIONS_TOTAL, "reason" => "shutting_down").increment(1);
        return (StatusCode::SERVICE_UNAVAILABLE, "Shutting down").into_response();
    }

    let Some(slot) = ConnectionSlot::acquire(&state.live_connections, state.config.max_connections)
    else {
        warn!(max = state.config.max_connections, "connection limit reached");
        counter!(WS_UPGRADE_REJECTIONS_TOTAL, "reason" => "capacity").increment(1);
        return (StatusCode::SERVICE_UNAVAILABLE, "Too many connections").into_response();
    };

    let id = ConnectionId::new();
    let token = state.shutdown.child_token();
    upgrade
        .max_message_size(state.config.max_message_size)
        .on_failed_upgrade(|e| warn!(error = %e, "websocket upgrade failed"))
        .on_upgrade(move |socket| async move {
            let _slot = slot;
            run_session(socket, id, state.registry, state.config, token).await;
        })
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.shutdown.is_shutting_down(),
        state.live_connections.load(Ordering::Relaxed),
        state.registry.len(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        [("content-type", "text/plain; version=0.0.4")],
        render(&state.metrics),
    )
}
