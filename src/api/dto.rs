//! Data Transfer Objects
//!
//! Request and response types for the API endpoints.
//! Responses also derive `Deserialize` so the CLI can decode them.

use chrono::{DateTime, SecondsFormat};
use serde::{Deserialize, Serialize};

use crate::db::{EventFilter, LoadedClass};
use crate::grid::{BrowsePosition, ClusterStats, HostInfo, NodeInfo, ThreadInfo};
use crate::storage::{Event, ObjectId};

/// Render a nanosecond timestamp as RFC 3339
pub fn format_timestamp(nanos: u64) -> Option<String> {
    let nanos = i64::try_from(nanos).ok()?;
    Some(DateTime::from_timestamp_nanos(nanos).to_rfc3339_opts(SecondsFormat::Nanos, true))
}

// ============================================
// INGEST DTOs
// ============================================

/// An object value registered with the node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectRecord {
    pub id: ObjectId,
    pub timestamp: u64,
    /// Arbitrary JSON, stored as its serialized bytes
    pub data: serde_json::Value,
}

/// Links an object to its class
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefRecord {
    pub id: ObjectId,
    pub timestamp: u64,
    pub class_id: ObjectId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassRecord {
    pub class_id: ObjectId,
    pub loader_id: ObjectId,
    pub name: String,
}

/// Batch ingest request
///
/// Classes are registered first, then objects and references, then events.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct IngestRequest {
    #[serde(default)]
    pub events: Vec<Event>,
    #[serde(default)]
    pub objects: Vec<ObjectRecord>,
    #[serde(default)]
    pub refs: Vec<RefRecord>,
    #[serde(default)]
    pub classes: Vec<ClassRecord>,
    #[serde(default)]
    pub hosts: Vec<HostInfo>,
    #[serde(default)]
    pub threads: Vec<ThreadInfo>,
}

impl IngestRequest {
    pub fn len(&self) -> usize {
        self.events.len() + self.objects.len() + self.refs.len() + self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0 && self.hosts.is_empty() && self.threads.is_empty()
    }
}

/// Batch ingest response
#[derive(Debug, Serialize, Deserialize)]
pub struct IngestResponse {
    /// Status: "ok" or "partial"
    pub status: String,
    /// Number of events handed to the node
    pub accepted: usize,
    /// Events the node dropped while this batch was ingested
    pub dropped: u64,
    pub objects: usize,
}

// ============================================
// QUERY DTOs
// ============================================

/// Histogram request: `slots` buckets over `[t1, t2)`
#[derive(Debug, Serialize, Deserialize)]
pub struct CountsRequest {
    #[serde(default)]
    pub filter: EventFilter,
    pub t1: u64,
    pub t2: u64,
    pub slots: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CountsResponse {
    pub counts: Vec<u64>,
    pub total: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Forward,
    Backward,
}

/// Page of events starting at a timestamp, or at a cursor from an earlier page
#[derive(Debug, Serialize, Deserialize)]
pub struct BrowseRequest {
    #[serde(default)]
    pub filter: EventFilter,
    /// Forward: first event at or after; backward: last event at or before
    #[serde(default)]
    pub timestamp: u64,
    #[serde(default = "default_browse_count")]
    pub count: usize,
    #[serde(default)]
    pub direction: Direction,
    /// Takes precedence over `timestamp`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<BrowsePosition>,
}

fn default_browse_count() -> usize {
    100
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BrowsedEvent {
    pub node_id: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    pub event: Event,
}

/// Events in chronological order whichever direction was browsed
#[derive(Debug, Serialize, Deserialize)]
pub struct BrowseResponse {
    pub events: Vec<BrowsedEvent>,
    /// Cursor to pass as the next request's `cursor`; absent once the
    /// browse ran out of events
    pub next_cursor: Option<BrowsePosition>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BehaviorCountsRequest {
    pub behavior_ids: Vec<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BehaviorCountsResponse {
    pub counts: Vec<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ObjectResponse {
    /// Id rendered as `host:sequence`
    pub id: String,
    pub raw_id: u64,
    pub data: Option<serde_json::Value>,
    pub class: Option<LoadedClass>,
}

// ============================================
// CLUSTER DTOs
// ============================================

#[derive(Debug, Serialize, Deserialize)]
pub struct StatsResponse {
    #[serde(flatten)]
    pub stats: ClusterStats,
    pub first_time: Option<String>,
    pub last_time: Option<String>,
    pub capture_enabled: bool,
}

impl StatsResponse {
    pub fn new(stats: ClusterStats, capture_enabled: bool) -> Self {
        let has_events = stats.events_count > 0;
        Self {
            first_time: has_events.then(|| format_timestamp(stats.first_timestamp)).flatten(),
            last_time: has_events.then(|| format_timestamp(stats.last_timestamp)).flatten(),
            stats,
            capture_enabled,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NodesResponse {
    pub nodes: Vec<NodeInfo>,
    pub total: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FlushResponse {
    pub status: String,
    /// Entries drained from the reordering buffers of all nodes
    pub flushed: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CaptureRequest {
    pub enabled: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CaptureResponse {
    pub enabled: bool,
}

/// Exception raised on a node, forwarded to every listener
#[derive(Debug, Serialize, Deserialize)]
pub struct ExceptionReport {
    pub message: String,
}

/// Acknowledgement of an action without a payload
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
}

impl StatusResponse {
    pub fn ok() -> Self {
        Self {
            status: "ok".to_string(),
        }
    }
}

// ============================================
// HEALTH DTOs
// ============================================

/// Full health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Overall status: healthy, degraded, unhealthy
    pub status: String,
    pub nodes: usize,
    pub expected_nodes: usize,
    pub keep_alive_expired: bool,
    /// Server uptime in seconds
    pub uptime_seconds: u64,
    /// Application version
    pub version: String,
}
