//! Master to node boundary

use crate::db::{DatabaseNode, EventBrowser, EventFilter, LoadedClass, NodeStats};
use crate::storage::{ObjectId, StorageResult};
use std::sync::Arc;

/// Operations the master performs on a registered node
///
/// Calls may block; the master bounds the ones it fans out with a timeout.
pub trait NodeConnector: Send + Sync {
    fn hostname(&self) -> String;

    /// Called once the master has assigned an id
    fn set_node_id(&self, node_id: u32);

    fn stats(&self) -> StorageResult<NodeStats>;

    fn flush(&self) -> StorageResult<usize>;

    fn clear(&self) -> StorageResult<()>;

    fn event_counts(&self, filter: &EventFilter, t1: u64, t2: u64, slots: usize) -> StorageResult<Vec<u64>>;

    fn create_browser(&self, filter: &EventFilter) -> StorageResult<EventBrowser>;

    fn event_count_at_behaviors(&self, behavior_ids: &[u32]) -> StorageResult<Vec<u64>>;

    fn registered_object(&self, id: ObjectId) -> StorageResult<Option<Vec<u8>>>;

    fn object_type(&self, id: ObjectId) -> StorageResult<Option<LoadedClass>>;
}

/// Connector to a node living in the master's process
pub struct LocalNodeConnector {
    node: Arc<DatabaseNode>,
}

impl LocalNodeConnector {
    pub fn new(node: Arc<DatabaseNode>) -> Self {
        Self { node }
    }

    pub fn node(&self) -> &Arc<DatabaseNode> {
        &self.node
    }
}

impl NodeConnector for LocalNodeConnector {
    fn hostname(&self) -> String {
        self.node.hostname().to_string()
    }

    fn set_node_id(&self, node_id: u32) {
        self.node.set_node_id(node_id);
    }

    fn stats(&self) -> StorageResult<NodeStats> {
        Ok(self.node.stats())
    }

    fn flush(&self) -> StorageResult<usize> {
        self.node.flush()
    }

    fn clear(&self) -> StorageResult<()> {
        self.node.clear()
    }

    fn event_counts(&self, filter: &EventFilter, t1: u64, t2: u64, slots: usize) -> StorageResult<Vec<u64>> {
        self.node.event_counts(filter, t1, t2, slots)
    }

    fn create_browser(&self, filter: &EventFilter) -> StorageResult<EventBrowser> {
        self.node.create_browser(filter)
    }

    fn event_count_at_behaviors(&self, behavior_ids: &[u32]) -> StorageResult<Vec<u64>> {
        self.node.event_count_at_behaviors(behavior_ids)
    }

    fn registered_object(&self, id: ObjectId) -> StorageResult<Option<Vec<u8>>> {
        self.node.registered_object(id)
    }

    fn object_type(&self, id: ObjectId) -> StorageResult<Option<LoadedClass>> {
        self.node.object_type(id)
    }
}
