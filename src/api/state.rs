//! Application State
//!
//! Shared state accessible by all API handlers.
//! Wrapped in Arc for thread-safe sharing across async tasks.

use crate::db::DatabaseNode;
use crate::grid::GridMaster;
use std::sync::Arc;
use std::time::Instant;

pub use crate::config::ApiConfig;

/// Shared application state for all handlers
#[derive(Clone)]
pub struct AppState {
    /// Master of the cluster; serves every query
    pub master: Arc<GridMaster>,
    /// Node receiving ingested events
    pub node: Arc<DatabaseNode>,
    /// API configuration
    pub config: Arc<ApiConfig>,
    /// Server start time for uptime tracking
    pub start_time: Instant,
}

impl AppState {
    pub fn new(master: Arc<GridMaster>, node: Arc<DatabaseNode>, config: ApiConfig) -> Self {
        Self {
            master,
            node,
            config: Arc::new(config),
            start_time: Instant::now(),
        }
    }

    /// Get server uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
