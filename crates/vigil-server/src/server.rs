//! `RelayServer`: Axum HTTP + WebSocket server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use vigil_core::ConnectionId;
use vigil_core::protocol::RelayEvent;

use crate::config::ServerConfig;
use crate::health::{self, HealthResponse, RelayCounts};
use crate::metrics::WS_UPGRADES_REJECTED_TOTAL;
use crate::relay::liveness::LivenessMonitor;
use crate::relay::registry::SessionRegistry;
use crate::relay::router::MessageRouter;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::broadcast::{BroadcastManager, Delivery};
use crate::websocket::session::{SessionContext, run_ws_session};

/// Notice broadcast to every connection before the server stops.
pub const SHUTDOWN_MESSAGE: &str = "Server is shutting down";

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Handed to each connection task.
    pub session: SessionContext,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus render handle.
    pub metrics: PrometheusHandle,
    /// One permit per live WebSocket; upgrades without a permit get 503.
    pub connection_slots: Arc<Semaphore>,
    /// Upgrade limit.
    pub max_connections: usize,
    /// Largest accepted frame.
    pub max_message_size: usize,
}

/// The relay server.
pub struct RelayServer {
    config: ServerConfig,
    registry: Arc<SessionRegistry>,
    router: Arc<MessageRouter>,
    broadcast: Arc<BroadcastManager>,
    shutdown: Arc<ShutdownCoordinator>,
    connection_slots: Arc<Semaphore>,
    metrics: PrometheusHandle,
    start_time: Instant,
}

impl RelayServer {
    /// Create a new server.
    pub fn new(config: ServerConfig, metrics: PrometheusHandle) -> Self {
        let registry = Arc::new(SessionRegistry::new());
        let broadcast = Arc::new(BroadcastManager::new());
        let router = Arc::new(MessageRouter::new(registry.clone(), broadcast.clone()));
        Self {
            connection_slots: Arc::new(Semaphore::new(config.max_connections)),
            config,
            registry,
            router,
            broadcast,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            metrics,
            start_time: Instant::now(),
        }
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            session: SessionContext {
                router: self.router.clone(),
                broadcast: self.broadcast.clone(),
                heartbeat_interval: self.config.heartbeat_interval(),
                heartbeat_timeout: self.config.heartbeat_timeout(),
                send_queue_capacity: self.config.send_queue_capacity,
                shutdown: self.shutdown.token(),
            },
            shutdown: self.shutdown.clone(),
            start_time: self.start_time,
            metrics: self.metrics.clone(),
            connection_slots: self.connection_slots.clone(),
            max_connections: self.config.max_connections,
            max_message_size: self.config.max_message_size,
        };

        Router::new()
            .route("/", get(ws_handler))
            .route("/ws", get(ws_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(state)
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
    }

    /// Bind, start the liveness monitor, and serve until shutdown.
    ///
    /// Returns the bound address and the serve task.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let listener = TcpListener::bind(self.config.bind_addr()).await?;
        let addr = listener.local_addr()?;

        let monitor = LivenessMonitor::new(self.registry.clone(), self.config.sweep_interval());
        self.shutdown.track(tokio::spawn(monitor.run(self.shutdown.token())));

        let app = self.router();
        let token = self.shutdown.token();
        let handle = tokio::spawn(async move {
            let serve = axum::serve(listener, app)
                .with_graceful_shutdown(async move { token.cancelled().await });
            if let Err(e) = serve.await {
                error!(error = %e, "server stopped with error");
            }
        });

        info!(%addr, "relay listening");
        Ok((addr, handle))
    }

    /// Tell every client the server is going away, then cancel all tasks.
    pub async fn shutdown_gracefully(&self, timeout: Option<Duration>) -> Delivery {
        let delivery = self
            .broadcast
            .broadcast_all(&RelayEvent::ServerShutdown {
                message: SHUTDOWN_MESSAGE.to_owned(),
            })
            .await;
        info!(
            notified = delivery.delivered,
            failed = delivery.failed,
            "shutdown notice sent"
        );
        self.shutdown.graceful_shutdown(timeout).await;
        delivery
    }

    /// Get the broadcast manager.
    pub fn broadcast(&self) -> &Arc<BroadcastManager> {
        &self.broadcast
    }

    /// Get the message router.
    pub fn message_router(&self) -> &Arc<MessageRouter> {
        &self.router
    }

    /// Get the session registry.
    pub fn registry(&self) -> &Arc<SessionRegistry> {
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
}

/// GET /ws and GET /
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    if state.shutdown.is_shutting_down() {
        counter!(WS_UPGRADES_REJECTED_TOTAL, "reason" => "shutdown").increment(1);
        return (StatusCode::SERVICE_UNAVAILABLE, "server is shutting down").into_response();
    }
    let Ok(slot) = state.connection_slots.clone().try_acquire_owned() else {
        warn!(limit = state.max_connections, "connection limit reached");
        counter!(WS_UPGRADES_REJECTED_TOTAL, "reason" => "limit").increment(1);
        return (StatusCode::SERVICE_UNAVAILABLE, "too many connections").into_response();
    };

    let conn_id = ConnectionId::generate();
    let ctx = state.session;
    ws.max_message_size(state.max_message_size)
        .on_upgrade(move |socket| async move {
            run_ws_session(socket, conn_id, ctx).await;
            drop(slot);
        })
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let router = &state.session.router;
    let counts = RelayCounts {
        connections: state.session.broadcast.connection_count().await,
        sessions: router.registry().len(),
        problems: router.problems().len(),
        suggestions: router.suggestions().len(),
    };
    Json(health::health_check(
        state.start_time,
        counts,
        state.shutdown.is_shutting_down(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> String {
    state.metrics.render()
}
