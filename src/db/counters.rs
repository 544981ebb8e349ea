//! Per-node ingestion counters
//!
//! Counters are shared between the databases of a node and read by stats
//! collection without taking the node lock.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct DatabaseCounters {
    events_processed: AtomicU64,
    events_dropped: AtomicU64,
    events_unordered: AtomicU64,
    objects_processed: AtomicU64,
    objects_dropped: AtomicU64,
    objects_unordered: AtomicU64,
    objects_count: AtomicU64,
    objects_store_size: AtomicU64,
}

/// Point-in-time copy of [`DatabaseCounters`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterValues {
    pub events_processed: u64,
    pub events_dropped: u64,
    pub events_unordered: u64,
    pub objects_processed: u64,
    pub objects_dropped: u64,
    pub objects_unordered: u64,
    pub objects_count: u64,
    pub objects_store_size: u64,
}

impl DatabaseCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn event_processed(&self) {
        self.events_processed.fetch_add(1, Ordering::Relaxed);
    }

    /// Account for events loaded from a snapshot
    pub(crate) fn events_restored(&self, count: u64) {
        self.events_processed.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn event_dropped(&self) -> u64 {
        self.events_dropped.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn event_unordered(&self) {
        self.events_unordered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn object_processed(&self) {
        self.objects_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn object_dropped(&self) -> u64 {
        self.objects_dropped.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn object_unordered(&self) {
        self.objects_unordered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn object_stored(&self, size: usize) {
        self.objects_count.fetch_add(1, Ordering::Relaxed);
        self.objects_store_size
            .fetch_add(size as u64, Ordering::Relaxed);
    }

    pub fn values(&self) -> CounterValues {
        CounterValues {
            events_processed: self.events_processed.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            events_unordered: self.events_unordered.load(Ordering::Relaxed),
            objects_processed: self.objects_processed.load(Ordering::Relaxed),
            objects_dropped: self.objects_dropped.load(Ordering::Relaxed),
            objects_unordered: self.objects_unordered.load(Ordering::Relaxed),
            objects_count: self.objects_count.load(Ordering::Relaxed),
            objects_store_size: self.objects_store_size.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        for counter in [
            &self.events_processed,
            &self.events_dropped,
            &self.events_unordered,
            &self.objects_processed,
            &self.objects_dropped,
            &self.objects_unordered,
            &self.objects_count,
            &self.objects_store_size,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}
