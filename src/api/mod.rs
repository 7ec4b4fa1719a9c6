//! REST API and WebSocket server for the hub
//!
//! ## Endpoints
//!
//! - `POST /api/v1/reports` - Submit a report (202 queued or dropped, 4xx rejected)
//! - `GET /api/v1/agents` - Every known agent with status and history
//! - `GET /api/v1/agents/:id` - One agent
//! - `GET /api/v1/health` - Health check
//! - `GET /api/v1/stats` - Ingest and fan-out counters
//! - `WS /api/v1/stream` - Snapshot followed by live state changes
//!
//! `POST /api/metrics` and `GET /api/metrics` stay mounted for older agents.

pub mod error;
pub mod routes;
pub mod state;
pub mod types;
pub mod websocket;

pub use error::{ApiError, ApiResult};
pub use state::ApiState;
pub use types::{
    AgentsResponse, HealthResponse, IngestRequest, IngestResponse, StatsResponse, StreamMessage,
};

use std::net::SocketAddr;

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Request, State},
    http::{StatusCode, header::AUTHORIZATION},
    middleware::{Next, from_fn_with_state},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use crate::config::ApiSection;

/// API server configuration
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub bind_addr: SocketAddr,

    /// Require `Authorization: Bearer <token>` on every route
    pub auth_token: Option<String>,

    /// Enable permissive CORS for browser dashboards
    pub enable_cors: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        ApiSection::default().into()
    }
}

impl From<ApiSection> for ApiConfig {
    fn from(section: ApiSection) -> Self {
        Self {
            bind_addr: section.bind,
            auth_token: section.auth_token,
            enable_cors: section.enable_cors,
        }
    }
}

/// Build the router with every route and layer applied
pub fn router(config: &ApiConfig, state: ApiState) -> Router {
    let mut app = Router::new()
        .route("/api/v1/health", get(routes::health::health_check))
        .route("/api/v1/stats", get(routes::stats::get_stats))
        .route("/api/v1/reports", post(routes::reports::submit_report))
        .route("/api/v1/agents", get(routes::agents::list_agents))
        .route("/api/v1/agents/:id", get(routes::agents::get_agent))
        .route(
            "/api/metrics",
            post(routes::reports::submit_report).get(routes::agents::list_agents),
        )
        .route("/api/v1/stream", get(websocket::websocket_handler))
        // report bodies are bounded by admission.max_payload_bytes instead
        .layer(DefaultBodyLimit::disable())
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if config.enable_cors {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
        app = app.layer(cors);
    }

    if let Some(token) = config.auth_token.clone() {
        app = app.layer(from_fn_with_state(token, require_bearer));
    }

    app
}

/// Operator token check in front of every route
///
/// Agent ids inside reports are still taken at face value.
async fn require_bearer(
    State(expected): State<String>,
    request: Request,
    next: Next,
) -> Response {
    let presented = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.strip_prefix("Bearer "));

    let rejection = match presented {
        None => Some((StatusCode::UNAUTHORIZED, "missing authorization header")),
        Some(None) => Some((StatusCode::UNAUTHORIZED, "expected 'Bearer <token>'")),
        Some(Some(token)) if token != expected => Some((StatusCode::FORBIDDEN, "invalid token")),
        Some(Some(_)) => None,
    };

    let Some((status, message)) = rejection else {
        return next.run(request).await;
    };

    debug!(path = %request.uri().path(), %status, "unauthorized request");
    (status, Json(json!({ "error": message }))).into_response()
}

/// Spawn the API server
///
/// Binds before returning, so the returned address is already accepting
/// connections. Port 0 picks a free port.
pub async fn spawn_api_server(config: ApiConfig, state: ApiState) -> anyhow::Result<SocketAddr> {
    info!("starting API server on {}", config.bind_addr);

    let app = router(&config, state);

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    let addr = listener.local_addr()?;

    info!("API server listening on {}", addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("API server error: {}", e);
        }
    });

    Ok(addr)
}
