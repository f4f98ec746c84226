//! `FleetServer`: axum HTTP + WebSocket front end for the hub.

use std::net::SocketAddr;
use std::time::Instant;

use axum::Router;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use fleetpulse_settings::ServerSettings;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use crate::config::PumpConfig;
use crate::health::{self, HealthResponse};
use crate::websocket::hub::Hub;
use crate::websocket::pump::serve_connection;

/// Shared state accessible from axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// The hub new connections register with.
    pub hub: Hub,
    /// Timeouts applied to every client's pumps.
    pub pump: PumpConfig,
    /// Root shutdown token.
    pub shutdown: CancellationToken,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus handle, when metrics are enabled.
    pub metrics: Option<PrometheusHandle>,
}

/// The FleetPulse HTTP server.
pub struct FleetServer {
    settings: ServerSettings,
    state: AppState,
}

impl FleetServer {
    /// Create a server in front of `hub`. Cancelling `shutdown` stops the listener.
    pub fn new(
        settings: ServerSettings,
        hub: Hub,
        pump: PumpConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            settings,
            state: AppState {
                hub,
                pump,
                shutdown,
                start_time: Instant::now(),
                metrics: None,
            },
        }
    }

    /// Serve `/metrics` from `handle`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.state.metrics = Some(handle);
        self
    }

    /// Build the router with all routes and layers.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/ws", get(ws_handler))
            .route("/ws/telemetry", get(ws_handler))
            .route("/health", get(health_handler))
            .route("/healthz", get(health_handler))
            .route("/readyz", get(ready_handler))
            .route("/metrics", get(metrics_handler))
            .layer(TraceLayer::new_for_http())
            .layer(cors_layer(&self.settings.cors_allowed_origins))
            .with_state(self.state.clone())
    }

    /// Bind the listener and serve until the shutdown token fires.
    ///
    /// Returns the bound address (useful with port `0`) and the serve task.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let bind = format!("{}:{}", self.settings.host, self.settings.port);
        let listener = TcpListener::bind(&bind).await?;
        let addr = listener.local_addr()?;
        let router = self.router();
        let shutdown = self.state.shutdown.clone();

        let handle = tokio::spawn(async move {
            let result = axum::serve(listener, router)
                .with_graceful_shutdown(shutdown.cancelled_owned())
                .await;
            match result {
                Ok(()) => info!("http server stopped"),
                Err(err) => error!(error = %err, "http server failed"),
            }
        });
        info!(%addr, "http server listening");
        Ok((addr, handle))
    }

    /// The hub behind this server.
    pub fn hub(&self) -> &Hub {
        &self.state.hub
    }
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    }
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(%origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods(Any)
        .allow_headers(Any)
}

/// GET /ws, /ws/telemetry
async fn ws_handler(
    State(state): State<AppState>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    match upgrade {
        Ok(ws) => ws
            .on_failed_upgrade(|err| warn!(error = %err, "websocket upgrade failed"))
            .on_upgrade(move |socket| accept(socket, state))
            .into_response(),
        Err(rejection) => {
            debug!(error = %rejection, "rejected websocket upgrade");
            rejection.into_response()
        }
    }
}

async fn accept(socket: WebSocket, state: AppState) {
    match serve_connection(state.hub, socket, &state.pump).await {
        Ok(tasks) => debug!(client_id = %tasks.id, "websocket pumps started"),
        Err(err) => warn!(error = %err, "dropping websocket connection"),
    }
}

/// GET /health, /healthz
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.hub.client_count(),
        state.shutdown.is_cancelled(),
    ))
}

/// GET /readyz: 503 once shutdown has begun.
async fn ready_handler(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let shutting_down = state.shutdown.is_cancelled() || state.hub.is_closed();
    let status = if shutting_down {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    let body = health::health_check(state.start_time, state.hub.client_count(), shutting_down);
    (status, Json(body))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match state.metrics {
        Some(handle) => handle.render().into_response(),
        None => (StatusCode::NOT_FOUND, "metrics disabled").into_response(),
    }
}
