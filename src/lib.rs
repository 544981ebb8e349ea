//! # Tracegrid
//!
//! Storage and query engine for execution traces. Events arrive from many
//! producer threads, are reordered into timestamp order, appended to paged
//! hierarchical indexes and queried across a cluster of database nodes.
//!
//! ## Modules
//!
//! - [`storage`]: Event types, paged file and record log
//! - [`index`]: Hierarchical append-only indexes
//! - [`reorder`]: Bounded reordering buffers
//! - [`db`]: Event and object databases, database node
//! - [`grid`]: Grid master, node connectors, merged browsing
//! - [`api`]: REST API server with Axum
//! - [`config`]: TOML configuration
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tracegrid::db::{DatabaseNode, DatabaseSettings, EventFilter};
//! use tracegrid::grid::{GridMaster, LocalNodeConnector, MasterSettings};
//! use tracegrid::storage::{Event, EventKind};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let node = DatabaseNode::new("localhost", DatabaseSettings::default())?;
//!     let master = GridMaster::new(MasterSettings::default());
//!     master.register_node(Arc::new(LocalNodeConnector::new(Arc::clone(&node))))?;
//!
//!     node.push_event(Event::new(10, 1, 1, EventKind::LocalWrite { variable: 2, value: None }))?;
//!     master.flush()?;
//!
//!     let mut browser = master.create_browser(&EventFilter::Variable(2))?;
//!     while let Some(found) = browser.next()? {
//!         println!("node {}: {:?}", found.node_id, found.event);
//!     }
//!
//!     node.shutdown()?;
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod config;
pub mod db;
pub mod grid;
pub mod index;
pub mod reorder;
pub mod storage;

// Re-export top-level types for convenience
pub use storage::{Event, EventKind, ObjectId, StorageError, StorageResult};

pub use db::{DatabaseNode, DatabaseSettings, EventFilter, NodeStats};

pub use grid::{ClusterStats, GridBrowser, GridMaster, LocalNodeConnector, MasterSettings, NodeConnector};

pub use api::{build_router, serve, ApiError, AppState};

pub use config::{Config, ConfigError, LoggingConfig};
