//! Cluster Routes
//!
//! - GET /api/v1/stats - Cluster statistics
//! - GET /api/v1/nodes - Registered nodes
//! - POST /api/v1/keepalive - Reset the master watchdog
//! - POST /api/v1/flush - Drain reordering buffers on every node
//! - POST /api/v1/clear - Drop all stored data
//! - POST /api/v1/capture - Enable or disable capture on every listener
//! - POST /api/v1/nodes/:id/exception - Report an exception raised on a node
//! - POST /api/v1/nodes/:id/monitor - Push resource measurements of a node

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use std::sync::Arc;

use crate::api::dto::{
    CaptureRequest, CaptureResponse, ExceptionReport, FlushResponse, NodesResponse,
    StatsResponse, StatusResponse,
};
use crate::api::error::{ApiError, ApiResult};
use crate::api::routes::blocking;
use crate::api::state::AppState;
use crate::grid::MonitorData;

#[derive(Debug, Default, Deserialize)]
pub struct StatsParams {
    /// Return the statistics of the last stats cycle instead of polling nodes
    #[serde(default)]
    pub cached: bool,
}

/// GET /api/v1/stats
pub async fn get_stats(
    State(state): State<Arc<AppState>>,
    Query(params): Query<StatsParams>,
) -> ApiResult<Json<StatsResponse>> {
    let master = Arc::clone(&state.master);
    let stats = if params.cached {
        master.stats()?
    } else {
        blocking(move || master.update_stats()).await?
    };
    Ok(Json(StatsResponse::new(stats, state.master.capture_enabled())))
}

/// GET /api/v1/nodes
pub async fn list_nodes(State(state): State<Arc<AppState>>) -> ApiResult<Json<NodesResponse>> {
    let master = Arc::clone(&state.master);
    let nodes = blocking(move || master.nodes()).await?;
    Ok(Json(NodesResponse {
        total: nodes.len(),
        nodes,
    }))
}

/// POST /api/v1/keepalive
pub async fn keep_alive(State(state): State<Arc<AppState>>) -> ApiResult<Json<StatusResponse>> {
    state.master.keep_alive()?;
    Ok(Json(StatusResponse::ok()))
}

/// POST /api/v1/flush
pub async fn flush(State(state): State<Arc<AppState>>) -> ApiResult<Json<FlushResponse>> {
    let master = Arc::clone(&state.master);
    let flushed = blocking(move || master.flush()).await?;
    Ok(Json(FlushResponse {
        status: "ok".to_string(),
        flushed,
    }))
}

/// POST /api/v1/clear
pub async fn clear(State(state): State<Arc<AppState>>) -> ApiResult<Json<StatusResponse>> {
    let master = Arc::clone(&state.master);
    blocking(move || master.clear()).await?;
    tracing::info!("Cluster cleared via API");
    Ok(Json(StatusResponse::ok()))
}

/// POST /api/v1/capture
pub async fn set_capture(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CaptureRequest>,
) -> ApiResult<Json<CaptureResponse>> {
    let master = Arc::clone(&state.master);
    blocking(move || master.send_enable_capture(request.enabled)).await?;
    Ok(Json(CaptureResponse {
        enabled: state.master.capture_enabled(),
    }))
}

fn check_node(state: &AppState, node_id: u32) -> ApiResult<()> {
    if state.master.nodes()?.iter().any(|n| n.node_id == node_id) {
        Ok(())
    } else {
        Err(ApiError::NotFound(format!("Node {}", node_id)))
    }
}

/// POST /api/v1/nodes/:id/exception
pub async fn report_exception(
    State(state): State<Arc<AppState>>,
    Path(node_id): Path<u32>,
    Json(report): Json<ExceptionReport>,
) -> ApiResult<Json<StatusResponse>> {
    check_node(&state, node_id)?;
    let master = Arc::clone(&state.master);
    blocking(move || master.node_exception(node_id, &report.message)).await?;
    Ok(Json(StatusResponse::ok()))
}

/// POST /api/v1/nodes/:id/monitor
pub async fn report_monitor_data(
    State(state): State<Arc<AppState>>,
    Path(node_id): Path<u32>,
    Json(data): Json<MonitorData>,
) -> ApiResult<Json<StatusResponse>> {
    check_node(&state, node_id)?;
    let master = Arc::clone(&state.master);
    blocking(move || master.push_monitor_data(node_id, &data)).await?;
    Ok(Json(StatusResponse::ok()))
}
