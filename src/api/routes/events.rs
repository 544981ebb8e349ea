//! Event Routes
//!
//! - POST /api/v1/events - Batch ingest into the local node
//! - POST /api/v1/counts - Event histogram over a time range
//! - POST /api/v1/browse - Page of events around a timestamp or a cursor
//! - POST /api/v1/behaviors/counts - Events per behavior

use axum::{extract::State, http::StatusCode, Json};
use std::sync::Arc;

use crate::api::dto::{
    format_timestamp, BehaviorCountsRequest, BehaviorCountsResponse, BrowseRequest,
    BrowseResponse, BrowsedEvent, CountsRequest, CountsResponse, Direction, IngestRequest,
    IngestResponse,
};
use crate::api::error::{ApiError, ApiResult};
use crate::api::routes::blocking;
use crate::api::state::AppState;
use crate::grid::{BrowsePosition, GridEvent};

/// Upper bound on histogram buckets per request
const MAX_SLOTS: usize = 100_000;

/// POST /api/v1/events
///
/// Hand a batch to the local node. Events arriving too late for the
/// reordering window are dropped by the node and reported in `dropped`.
pub async fn ingest_events(
    State(state): State<Arc<AppState>>,
    Json(req): Json<IngestRequest>,
) -> ApiResult<(StatusCode, Json<IngestResponse>)> {
    if req.is_empty() {
        return Err(ApiError::Validation("Empty batch".to_string()));
    }
    let max_batch = state.config.max_batch;
    if req.len() > max_batch {
        return Err(ApiError::Validation(format!(
            "Batch size exceeds maximum of {} records",
            max_batch
        )));
    }

    let mut objects = Vec::with_capacity(req.objects.len());
    for object in req.objects {
        let data = serde_json::to_vec(&object.data)
            .map_err(|e| ApiError::Validation(format!("Invalid object data: {}", e)))?;
        objects.push((object.id, object.timestamp, data));
    }

    let accepted = req.events.len();
    let stored_objects = objects.len();
    let node = Arc::clone(&state.node);
    let master = Arc::clone(&state.master);
    let (classes, refs, events) = (req.classes, req.refs, req.events);
    let (hosts, threads) = (req.hosts, req.threads);

    let dropped = blocking(move || {
        for host in hosts {
            master.register_host(host)?;
        }
        for thread in threads {
            master.register_thread(thread)?;
        }
        let before = node.stats().dropped_events_count;
        for class in classes {
            node.register_class(class.class_id, class.loader_id, &class.name)?;
        }
        for (id, timestamp, data) in objects {
            node.register_object(id, timestamp, data)?;
        }
        for r in refs {
            node.register_ref(r.id, r.timestamp, r.class_id)?;
        }
        node.push_events(events)?;
        Ok(node.stats().dropped_events_count.saturating_sub(before))
    })
    .await?;

    tracing::debug!(accepted, dropped, objects = stored_objects, "Batch ingested");

    let status = if dropped == 0 { "ok" } else { "partial" };
    Ok((
        StatusCode::CREATED,
        Json(IngestResponse {
            status: status.to_string(),
            accepted,
            dropped,
            objects: stored_objects,
        }),
    ))
}

/// POST /api/v1/counts
pub async fn event_counts(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CountsRequest>,
) -> ApiResult<Json<CountsResponse>> {
    if req.t2 <= req.t1 {
        return Err(ApiError::Validation("t2 must be greater than t1".to_string()));
    }
    if req.slots == 0 || req.slots > MAX_SLOTS {
        return Err(ApiError::Validation(format!(
            "slots must be between 1 and {}",
            MAX_SLOTS
        )));
    }

    let master = Arc::clone(&state.master);
    let counts = blocking(move || master.event_counts(&req.filter, req.t1, req.t2, req.slots)).await?;
    Ok(Json(CountsResponse {
        total: counts.iter().sum(),
        counts,
    }))
}

/// POST /api/v1/browse
///
/// A full page carries `next_cursor`. Passing it back as `cursor`, with the
/// same direction, continues exactly after the page, even inside a run of
/// events sharing one timestamp.
pub async fn browse(
    State(state): State<Arc<AppState>>,
    Json(req): Json<BrowseRequest>,
) -> ApiResult<Json<BrowseResponse>> {
    if req.count == 0 || req.count > state.config.max_batch {
        return Err(ApiError::Validation(format!(
            "count must be between 1 and {}",
            state.config.max_batch
        )));
    }

    let master = Arc::clone(&state.master);
    let BrowseRequest {
        filter,
        timestamp,
        count,
        direction,
        cursor,
    } = req;
    let (events, position): (Vec<GridEvent>, BrowsePosition) = blocking(move || {
        let mut browser = master.create_browser(&filter)?;
        let events = match (direction, cursor) {
            (Direction::Forward, Some(cursor)) => {
                browser.seek(cursor);
                browser.next_batch(count)?
            }
            (Direction::Forward, None) => {
                browser.set_next_timestamp(timestamp);
                browser.next_batch(count)?
            }
            (Direction::Backward, Some(cursor)) => {
                browser.seek(cursor);
                browser.previous_batch(count)?
            }
            (Direction::Backward, None) => {
                browser.set_previous_timestamp(timestamp);
                browser.previous_batch(count)?
            }
        };
        Ok((events, browser.position()))
    })
    .await?;

    let next_cursor = (events.len() == count).then_some(position);

    Ok(Json(BrowseResponse {
        events: events
            .into_iter()
            .map(|e| BrowsedEvent {
                node_id: e.node_id,
                time: format_timestamp(e.event.timestamp),
                event: e.event,
            })
            .collect(),
        next_cursor,
    }))
}

/// POST /api/v1/behaviors/counts
pub async fn behavior_counts(
    State(state): State<Arc<AppState>>,
    Json(req): Json<BehaviorCountsRequest>,
) -> ApiResult<Json<BehaviorCountsResponse>> {
    if req.behavior_ids.len() > state.config.max_batch {
        return Err(ApiError::Validation(format!(
            "At most {} behaviors per request",
            state.config.max_batch
        )));
    }
    let master = Arc::clone(&state.master);
    let counts = blocking(move || master.event_count_at_behaviors(&req.behavior_ids)).await?;
    Ok(Json(BehaviorCountsResponse { counts }))
}
