//! clawdeck-gateway: REST API + WebSocket event push.
//!
//! Provides:
//! - REST routes for scheduled tasks (list/get/create/update/run/delete
//!   and execution logs) and dashboard reads (stats, agents, work
//!   items, events)
//! - WebSocket endpoint that pushes a dashboard snapshot on connect and
//!   live events afterwards
//! - Bearer token authentication
//! - Housekeeping loops: stats broadcast, usage threshold alerts, daily
//!   retention cleanup

pub mod handlers;
pub mod jobs;
pub mod ws;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::{Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use tower_http::cors::CorsLayer;
use tracing::info;

use clawdeck_config::ClawdeckConfig;
use clawdeck_scheduler::TaskScheduler;
use clawdeck_storage::DashboardStore;
use ws::EventHub;

/// Shared gateway state.
pub struct GatewayState {
    pub store: Arc<DashboardStore>,
    pub scheduler: Arc<TaskScheduler>,
    pub hub: Arc<EventHub>,
    pub config: ClawdeckConfig,
}

/// Build the router over prepared state. Split out so tests can drive
/// handlers without binding a socket.
pub fn build_router(state: Arc<GatewayState>) -> Router {
    let api = Router::new()
        .route(
            "/scheduled-tasks",
            get(handlers::list_scheduled_tasks).post(handlers::create_scheduled_task),
        )
        .route(
            "/scheduled-tasks/{id}",
            get(handlers::get_scheduled_task)
                .patch(handlers::update_scheduled_task)
                .delete(handlers::delete_scheduled_task),
        )
        .route("/scheduled-tasks/{id}/run", post(handlers::run_scheduled_task))
        .route("/scheduled-tasks/{id}/logs", get(handlers::get_task_logs))
        .route("/stats", get(handlers::get_stats))
        .route("/agents", get(handlers::get_agents))
        .route("/tasks", get(handlers::get_work_items))
        .route("/events", get(handlers::get_events))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .route("/health", get(handlers::health))
        .route("/ws", get(ws::ws_handler))
        .nest("/api", api)
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Start the gateway server: bind, spawn housekeeping, serve requests.
pub async fn start_gateway(
    state: Arc<GatewayState>,
    port_override: Option<u16>,
) -> anyhow::Result<()> {
    let host = state.config.gateway.host.clone();
    let port = port_override.unwrap_or(state.config.gateway.port);

    let _housekeeping = jobs::spawn_housekeeping(state.clone());

    let app = build_router(state);

    let addr: SocketAddr = format!("{host}:{port}").parse()?;
    info!("Gateway listening on {addr}");
    info!("  REST:      http://{addr}/api");
    info!("  WebSocket: ws://{addr}/ws");
    info!("  Health:    http://{addr}/health");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Bearer token check for the REST surface. A gateway without a
/// configured token is open (trusted-network default, like the rest of
/// the dashboard stack).
async fn require_auth(
    State(state): State<Arc<GatewayState>>,
    request: Request,
    next: Next,
) -> Response {
    if let Some(expected) = &state.config.gateway.auth_token {
        match extract_bearer_token(request.headers()) {
            Some(token) if token == expected => {}
            _ => {
                tracing::warn!("API authentication failed");
                return StatusCode::UNAUTHORIZED.into_response();
            }
        }
    }
    next.run(request).await
}

/// Extract bearer token from Authorization header.
pub(crate) fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}
