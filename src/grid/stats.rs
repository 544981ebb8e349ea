//! Cluster statistics

use crate::db::NodeStats;
use serde::{Deserialize, Serialize};

/// Statistics of the whole cluster, reduced from per-node statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterStats {
    pub nodes_count: usize,
    pub threads_count: usize,
    pub events_count: u64,
    pub dropped_events_count: u64,
    pub unordered_events_count: u64,
    pub objects_count: u64,
    pub objects_store_size: u64,
    pub first_timestamp: u64,
    pub last_timestamp: u64,
}

impl ClusterStats {
    /// Sum counts; first timestamp is the minimum and last the maximum over
    /// nodes holding events. Without such a node both collapse to the same value.
    pub fn reduce<'a>(nodes: impl IntoIterator<Item = &'a NodeStats>) -> Self {
        let mut stats = ClusterStats::default();
        let mut first = u64::MAX;
        let mut last = 0u64;

        for node in nodes {
            stats.nodes_count += 1;
            stats.events_count += node.events_count;
            stats.dropped_events_count += node.dropped_events_count;
            stats.unordered_events_count += node.unordered_events_count;
            stats.objects_count += node.objects_count;
            stats.objects_store_size += node.objects_store_size;
            if node.events_count > 0 {
                first = first.min(node.first_timestamp);
                last = last.max(node.last_timestamp);
            }
        }

        if first == u64::MAX {
            first = last;
        }
        stats.first_timestamp = first;
        stats.last_timestamp = last;
        stats
    }

    /// True when anything a listener displays has changed
    pub fn differs_from(&self, other: &ClusterStats) -> bool {
        self.events_count != other.events_count
            || self.dropped_events_count != other.dropped_events_count
            || self.objects_store_size != other.objects_store_size
            || self.first_timestamp != other.first_timestamp
            || self.last_timestamp != other.last_timestamp
            || self.threads_count != other.threads_count
    }
}
