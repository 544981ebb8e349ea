//! Per-node databases
//!
//! - **event_db**: [`EventDatabase`], reordering, primary list and secondary indexes
//! - **objects_db**: [`ObjectsDatabase`], object state and classes of one host
//! - **node**: [`DatabaseNode`], the databases of a node plus its flusher thread
//! - **cursor** / **filter**: event selection and bidirectional browsing
//! - **flush**: cancellation and shutdown primitives
//!
//! # Architecture
//!
//! ```text
//!                 ┌───────────── DatabaseNode ─────────────┐
//! push_event ───→ │ EventDatabase                          │
//! register_*  ──→ │ ObjectsDatabase[host 0..255]           │ ←── flusher thread
//!                 │ shared PagedFile for object indexes    │     (flush / flush_old)
//!                 └────────────────────────────────────────┘
//! ```

pub mod counters;
pub mod cursor;
pub mod event_db;
pub mod filter;
pub mod flush;
pub mod indexes;
pub mod node;
pub mod objects_db;

pub use counters::{CounterValues, DatabaseCounters};
pub use cursor::{EventBrowser, EventCursor, EventRef};
pub use event_db::{CountPlan, EventDatabase};
pub use filter::EventFilter;
pub use flush::{FlushMonitor, ShutdownSignal};
pub use node::{DatabaseNode, NodeStats};
pub use objects_db::{LoadedClass, ObjectsDatabase};

use crate::config::Config;
use crate::storage::{PageLayout, StorageResult};
use std::time::Duration;

/// Tuning of the databases of one node
#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub layout: PageLayout,
    pub max_index_levels: usize,
    pub event_buffer_size: usize,
    pub thread_buffer_size: usize,
    pub objects_buffer_size: usize,
    /// Records drained between cancellation checks
    pub flush_check_interval: usize,
    /// Idle period before the flusher drains; zero disables autoflush
    pub autoflush_delay: Duration,
}

impl DatabaseSettings {
    pub fn from_config(config: &Config) -> StorageResult<Self> {
        Ok(Self {
            layout: PageLayout::new(config.storage.page_size, config.storage.page_pointer_bits)?,
            max_index_levels: config.storage.max_index_levels,
            event_buffer_size: config.reorder.event_buffer_size,
            thread_buffer_size: config.reorder.thread_buffer_size,
            objects_buffer_size: config.reorder.objects_buffer_size,
            flush_check_interval: config.node.flush_check_interval,
            autoflush_delay: Duration::from_secs(config.node.autoflush_delay_secs),
        })
    }
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            layout: PageLayout::default(),
            max_index_levels: crate::index::MAX_INDEX_LEVELS,
            event_buffer_size: 100_000,
            thread_buffer_size: 100_000,
            objects_buffer_size: 1000,
            flush_check_interval: 16,
            autoflush_delay: Duration::from_secs(2),
        }
    }
}
