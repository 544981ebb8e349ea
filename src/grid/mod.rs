//! Cluster coordination
//!
//! - **master**: [`GridMaster`], node registry, watchdog, stats and query fan-out
//! - **connector**: [`NodeConnector`], the boundary between master and nodes
//! - **browser**: [`GridBrowser`], events of all nodes merged in timestamp order
//! - **listener**: [`MasterListener`] notifications and eviction
//! - **stats**: [`ClusterStats`] reduction

pub mod browser;
pub mod connector;
pub mod listener;
pub mod master;
pub mod stats;

pub use browser::{BrowsePosition, GridBrowser, GridEvent};
pub use connector::{LocalNodeConnector, NodeConnector};
pub use listener::{ListenerId, MasterListener, MonitorData};
pub use master::{GridMaster, HostInfo, MasterSettings, NodeInfo, ThreadInfo};
pub use stats::ClusterStats;
