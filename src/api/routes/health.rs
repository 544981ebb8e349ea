//! Health Routes
//!
//! Health check endpoints for monitoring and Kubernetes probes.
//!
//! - GET /health/live - Liveness probe (process is alive)
//! - GET /health/ready - Readiness probe (expected nodes registered)
//! - GET /health - Full health status

use axum::{extract::State, http::StatusCode, Json};
use std::sync::Arc;

use crate::api::dto::HealthResponse;
use crate::api::error::ApiResult;
use crate::api::routes::blocking;
use crate::api::state::AppState;

/// GET /health/live
///
/// Kubernetes liveness probe.
/// Returns 200 if the process is alive, no dependency checks.
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}

/// GET /health/ready
///
/// Returns 200 once the master has as many nodes as it waits for.
pub async fn readiness(State(state): State<Arc<AppState>>) -> StatusCode {
    match registered_nodes(&state).await {
        Ok(nodes) if nodes >= state.master.settings().expected_nodes => StatusCode::OK,
        _ => StatusCode::SERVICE_UNAVAILABLE,
    }
}

/// GET /health
///
/// Full health status with component details.
pub async fn full_health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let expected_nodes = state.master.settings().expected_nodes;
    let nodes = registered_nodes(&state).await.ok();
    let keep_alive_expired = state.master.keep_alive_expired();

    let status = match nodes {
        Some(n) if n >= expected_nodes && !keep_alive_expired => "healthy",
        Some(n) if n > 0 => "degraded",
        _ => "unhealthy",
    };

    Json(HealthResponse {
        status: status.to_string(),
        nodes: nodes.unwrap_or(0),
        expected_nodes,
        keep_alive_expired,
        uptime_seconds: state.uptime_seconds(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn registered_nodes(state: &AppState) -> ApiResult<usize> {
    let master = Arc::clone(&state.master);
    blocking(move || master.node_count()).await
}
