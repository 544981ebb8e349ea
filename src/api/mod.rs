//! Tracegrid REST API
//!
//! HTTP API over the grid master and the local database node, built with Axum.
//!
//! # Endpoints
//!
//! ## Cluster
//! - `GET /api/v1/stats` - Cluster statistics (`?cached=true` skips polling nodes)
//! - `GET /api/v1/nodes` - Registered nodes with their last statistics
//! - `POST /api/v1/keepalive` - Reset the master watchdog
//! - `POST /api/v1/flush` - Drain reordering buffers on every node
//! - `POST /api/v1/clear` - Drop all stored data
//! - `POST /api/v1/capture` - Enable or disable capture (`{"enabled": bool}`)
//! - `POST /api/v1/nodes/:id/exception` - Report a node exception to listeners
//! - `POST /api/v1/nodes/:id/monitor` - Forward node measurements to listeners
//!
//! ## Events
//! - `POST /api/v1/events` - Batch ingest into the local node
//! - `POST /api/v1/counts` - Event histogram
//! - `POST /api/v1/browse` - Page of events from a timestamp
//! - `POST /api/v1/behaviors/counts` - Events per behavior
//!
//! ## Objects
//! - `GET /api/v1/objects/:id` - Registered value and class of an object
//!
//! ## Health
//! - `GET /health/live` - Liveness probe
//! - `GET /health/ready` - Readiness probe
//! - `GET /health` - Full health status

pub mod dto;
pub mod error;
pub mod routes;
pub mod state;

pub use error::{ApiError, ApiResult};
pub use state::{ApiConfig, AppState};

use axum::{
    http::HeaderValue,
    routing::{get, post},
    Router,
};
use std::future::Future;
use std::sync::Arc;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

/// Build the API router with all routes and middleware
pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        // Cluster routes
        .route("/stats", get(routes::cluster::get_stats))
        .route("/nodes", get(routes::cluster::list_nodes))
        .route("/keepalive", post(routes::cluster::keep_alive))
        .route("/flush", post(routes::cluster::flush))
        .route("/clear", post(routes::cluster::clear))
        .route("/capture", post(routes::cluster::set_capture))
        .route("/nodes/:id/exception", post(routes::cluster::report_exception))
        .route("/nodes/:id/monitor", post(routes::cluster::report_monitor_data))
        // Event routes
        .route("/events", post(routes::events::ingest_events))
        .route("/counts", post(routes::events::event_counts))
        .route("/browse", post(routes::events::browse))
        .route("/behaviors/counts", post(routes::events::behavior_counts))
        // Object routes
        .route("/objects/:id", get(routes::objects::get_object));

    let health_routes = Router::new()
        .route("/live", get(routes::health::liveness))
        .route("/ready", get(routes::health::readiness))
        .route("/", get(routes::health::full_health));

    let cors = cors_layer(&state.config.cors_origins);
    let shared_state = Arc::new(state);

    Router::new()
        .nest("/api/v1", api_routes)
        .nest("/health", health_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(shared_state)
}

/// Permissive when no origin is configured
fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() {
        return CorsLayer::permissive();
    }
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(tower_http::cors::Any)
        .allow_headers(tower_http::cors::Any)
}

/// Start the API server, returning once `shutdown` completes
pub async fn serve(
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), ApiError> {
    let addr = state.config.addr();
    let router = build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Tracegrid API listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| ApiError::Internal(format!("Server error: {}", e)))?;

    tracing::info!("Tracegrid API shut down gracefully");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{DatabaseNode, DatabaseSettings};
    use crate::grid::{GridMaster, LocalNodeConnector, MasterSettings};
    use crate::storage::{Event, EventKind, ObjectId};
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use serde_json::{json, Value};
    use tower::util::ServiceExt;

    fn create_test_state(register: bool) -> AppState {
        let node = DatabaseNode::new("test-host", DatabaseSettings::default()).unwrap();
        let master = GridMaster::new(MasterSettings::default());
        if register {
            master
                .register_node(Arc::new(LocalNodeConnector::new(Arc::clone(&node))))
                .unwrap();
        }
        AppState::new(master, node, ApiConfig::default())
    }

    fn create_test_app() -> Router {
        build_router(create_test_state(true))
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn field_write(timestamp: u64, thread_id: u32) -> Event {
        Event::new(
            timestamp,
            1,
            thread_id,
            EventKind::FieldWrite {
                field: 7,
                target: None,
                value: None,
            },
        )
        .at(3, 0)
    }

    /// Ingest `events` and flush them into the indexes
    async fn ingest(app: &Router, events: Vec<Event>) {
        let response = app
            .clone()
            .oneshot(post("/api/v1/events", json!({ "events": events })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let response = app
            .clone()
            .oneshot(post("/api/v1/flush", json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_health_live() {
        let app = create_test_app();
        let response = app.oneshot(get("/health/live")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_health_ready() {
        let app = create_test_app();
        let response = app.oneshot(get("/health/ready")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_not_ready_without_nodes() {
        let app = build_router(create_test_state(false));
        let response = app.clone().oneshot(get("/health/ready")).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let response = app.oneshot(get("/health")).await.unwrap();
        assert_eq!(body_json(response).await["status"], "unhealthy");
    }

    #[tokio::test]
    async fn test_health_full() {
        let app = create_test_app();
        let response = app.oneshot(get("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["nodes"], 1);
    }

    #[tokio::test]
    async fn test_ingest_then_stats() {
        let app = create_test_app();
        ingest(&app, vec![field_write(10, 1), field_write(30, 1), field_write(20, 2)]).await;

        let response = app.oneshot(get("/api/v1/stats")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["events_count"], 3);
        assert_eq!(body["first_timestamp"], 10);
        assert_eq!(body["last_timestamp"], 30);
        assert_eq!(body["nodes_count"], 1);
    }

    #[tokio::test]
    async fn test_list_nodes() {
        let app = create_test_app();
        let response = app.oneshot(get("/api/v1/nodes")).await.unwrap();
        let body = body_json(response).await;
        assert_eq!(body["total"], 1);
        assert_eq!(body["nodes"][0]["hostname"], "test-host");
        assert_eq!(body["nodes"][0]["node_id"], 1);
    }

    #[tokio::test]
    async fn test_empty_batch_rejected() {
        let app = create_test_app();
        let response = app
            .oneshot(post("/api/v1/events", json!({ "events": [] })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_invalid_json() {
        let app = create_test_app();
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/events")
                    .header("Content-Type", "application/json")
                    .body(Body::from("not json"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_counts() {
        let app = create_test_app();
        ingest(&app, (0..10).map(|i| field_write(i * 10, 1)).collect()).await;

        let response = app
            .clone()
            .oneshot(post(
                "/api/v1/counts",
                json!({ "filter": { "field": 7 }, "t1": 0, "t2": 100, "slots": 2 }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["total"], 10);

        let response = app
            .oneshot(post("/api/v1/counts", json!({ "t1": 50, "t2": 50, "slots": 2 })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_browse_forward_and_backward() {
        let app = create_test_app();
        ingest(&app, vec![field_write(10, 1), field_write(40, 1), field_write(20, 2), field_write(30, 2)]).await;

        let response = app
            .clone()
            .oneshot(post("/api/v1/browse", json!({ "timestamp": 15, "count": 2 })))
            .await
            .unwrap();
        let body = body_json(response).await;
        let timestamps: Vec<u64> = body["events"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["event"]["timestamp"].as_u64().unwrap())
            .collect();
        assert_eq!(timestamps, vec![20, 30]);
        assert_eq!(body["next_cursor"]["timestamp"], 30);

        let response = app
            .oneshot(post(
                "/api/v1/browse",
                json!({ "timestamp": 30, "count": 10, "direction": "backward" }),
            ))
            .await
            .unwrap();
        let body = body_json(response).await;
        let timestamps: Vec<u64> = body["events"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["event"]["timestamp"].as_u64().unwrap())
            .collect();
        assert_eq!(timestamps, vec![10, 20, 30]);
        assert!(body["next_cursor"].is_null());
    }

    fn page_timestamps(body: &Value) -> Vec<u64> {
        body["events"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["event"]["timestamp"].as_u64().unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_browse_cursor_keeps_events_sharing_a_timestamp() {
        let app = create_test_app();
        ingest(&app, vec![field_write(10, 1), field_write(20, 1), field_write(20, 2), field_write(30, 1)]).await;

        let mut seen = Vec::new();
        let mut request = json!({ "count": 2 });
        loop {
            let response = app.clone().oneshot(post("/api/v1/browse", request.clone())).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            let body = body_json(response).await;
            seen.extend(page_timestamps(&body));
            if body["next_cursor"].is_null() {
                break;
            }
            request["cursor"] = body["next_cursor"].clone();
        }
        assert_eq!(seen, vec![10, 20, 20, 30]);

        // backward from the end, two at a time
        let mut seen = Vec::new();
        let mut request = json!({ "count": 2, "timestamp": 30, "direction": "backward" });
        loop {
            let response = app.clone().oneshot(post("/api/v1/browse", request.clone())).await.unwrap();
            let body = body_json(response).await;
            let mut page = page_timestamps(&body);
            page.extend(seen);
            seen = page;
            if body["next_cursor"].is_null() {
                break;
            }
            request["cursor"] = body["next_cursor"].clone();
        }
        assert_eq!(seen, vec![10, 20, 20, 30]);
    }

    #[tokio::test]
    async fn test_capture_toggle() {
        let app = create_test_app();
        let response = app
            .clone()
            .oneshot(post("/api/v1/capture", json!({ "enabled": true })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["enabled"], true);

        let response = app.oneshot(get("/api/v1/stats?cached=true")).await.unwrap();
        assert_eq!(body_json(response).await["capture_enabled"], true);
    }

    #[tokio::test]
    async fn test_node_reports() {
        let app = create_test_app();
        let response = app
            .clone()
            .oneshot(post("/api/v1/nodes/1/exception", json!({ "message": "out of memory" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .clone()
            .oneshot(post("/api/v1/nodes/1/monitor", json!({ "values": { "heap": 0.75 } })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(post("/api/v1/nodes/9/exception", json!({ "message": "lost" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_behavior_counts() {
        let app = create_test_app();
        ingest(&app, vec![field_write(10, 1), field_write(20, 1)]).await;

        let response = app
            .oneshot(post("/api/v1/behaviors/counts", json!({ "behavior_ids": [3, 4] })))
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["counts"], json!([2, 0]));
    }

    #[tokio::test]
    async fn test_objects() {
        let app = create_test_app();
        let class_id = ObjectId::new(1, 1);
        let object_id = ObjectId::new(1, 5);
        let response = app
            .clone()
            .oneshot(post(
                "/api/v1/events",
                json!({
                    "classes": [{ "class_id": class_id, "loader_id": ObjectId::new(1, 0), "name": "Point" }],
                    "objects": [{ "id": object_id, "timestamp": 10, "data": { "x": 1 } }],
                    "refs": [{ "id": object_id, "timestamp": 10, "class_id": class_id }],
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        app.clone()
            .oneshot(post("/api/v1/flush", json!({})))
            .await
            .unwrap();

        let response = app.clone().oneshot(get("/api/v1/objects/1:5")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["id"], "1:5");
        assert_eq!(body["data"]["x"], 1);
        assert_eq!(body["class"]["name"], "Point");

        let response = app.clone().oneshot(get("/api/v1/objects/1:6")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app.oneshot(get("/api/v1/objects/nope")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_clear_and_keepalive() {
        let app = create_test_app();
        ingest(&app, vec![field_write(10, 1)]).await;

        let response = app
            .clone()
            .oneshot(post("/api/v1/keepalive", json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .clone()
            .oneshot(post("/api/v1/clear", json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app.oneshot(get("/api/v1/stats")).await.unwrap();
        assert_eq!(body_json(response).await["events_count"], 0);
    }
}
