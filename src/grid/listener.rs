//! Master listeners
//!
//! Delivery is best effort. A listener that fails twice within the grace
//! window is evicted; a single failure is tolerated.

use crate::grid::stats::ClusterStats;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Resource measurements pushed by a node
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MonitorData {
    pub values: BTreeMap<String, f64>,
}

impl MonitorData {
    pub fn with(mut self, name: impl Into<String>, value: f64) -> Self {
        self.values.insert(name.into(), value);
        self
    }
}

/// Receives notifications from the master
pub trait MasterListener: Send + Sync {
    fn events_received(&self, stats: &ClusterStats) -> anyhow::Result<()>;

    fn exception(&self, node_id: u32, message: &str) -> anyhow::Result<()>;

    fn monitor_data(&self, node_id: u32, data: &MonitorData) -> anyhow::Result<()>;

    fn capture_enabled(&self, enabled: bool) -> anyhow::Result<()>;
}

/// Handle returned by listener registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ListenerId(pub u64);

pub(crate) struct ListenerEntry {
    pub id: ListenerId,
    pub listener: Arc<dyn MasterListener>,
    first_failure: Option<Instant>,
}

impl ListenerEntry {
    pub fn new(id: ListenerId, listener: Arc<dyn MasterListener>) -> Self {
        Self {
            id,
            listener,
            first_failure: None,
        }
    }

    /// Record a delivery outcome; false when the listener must be evicted
    pub fn record(&mut self, success: bool, now: Instant, grace: Duration) -> bool {
        if success {
            self.first_failure = None;
            return true;
        }
        match self.first_failure {
            Some(first) if now.saturating_duration_since(first) <= grace => false,
            _ => {
                self.first_failure = Some(now);
                true
            }
        }
    }
}
