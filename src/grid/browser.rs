//! Cluster-wide event browsing
//!
//! Events from all nodes are merged by `(timestamp, node id, pointer)`,
//! which breaks timestamp ties deterministically. Like the union cursor, the
//! browser keeps a boundary and re-seeks each node browser around it.
//!
//! The boundary is a [`BrowsePosition`]. It names nodes by id, so a position
//! taken from one browser can resume another one over the same cluster.

use crate::db::{EventBrowser, EventRef};
use crate::storage::{Event, StorageResult};
use serde::{Deserialize, Serialize};

/// A point between two events of the merged order
///
/// `next` returns the first event at or after the position, `previous` the
/// last event before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BrowsePosition {
    pub timestamp: u64,
    pub node_id: u32,
    pub pointer: u64,
}

impl BrowsePosition {
    /// Before every event at or after `timestamp`
    pub fn at(timestamp: u64) -> Self {
        Self {
            timestamp,
            node_id: 0,
            pointer: 0,
        }
    }

    pub const MAX: Self = Self {
        timestamp: u64::MAX,
        node_id: u32::MAX,
        pointer: u64::MAX,
    };

    /// Position right after the event at `self`
    fn successor(self) -> Self {
        if let Some(pointer) = self.pointer.checked_add(1) {
            return Self { pointer, ..self };
        }
        if let Some(node_id) = self.node_id.checked_add(1) {
            return Self {
                node_id,
                pointer: 0,
                ..self
            };
        }
        match self.timestamp.checked_add(1) {
            Some(timestamp) => Self::at(timestamp),
            None => Self::MAX,
        }
    }
}

/// An event together with the id of the node that stored it
#[derive(Debug, Clone, PartialEq)]
pub struct GridEvent {
    pub node_id: u32,
    pub event: Event,
}

pub struct GridBrowser {
    /// Sorted by node id
    browsers: Vec<(u32, EventBrowser)>,
    boundary: BrowsePosition,
}

impl GridBrowser {
    /// Merge per-node browsers, each tagged with its node id
    pub fn new(mut browsers: Vec<(u32, EventBrowser)>) -> Self {
        browsers.sort_unstable_by_key(|(node_id, _)| *node_id);
        Self {
            browsers,
            boundary: BrowsePosition::at(0),
        }
    }

    /// Position of the boundary within the reference order of node `node_id`
    fn node_target(&self, node_id: u32) -> EventRef {
        let b = self.boundary;
        if node_id > b.node_id {
            EventRef::at(b.timestamp)
        } else if node_id == b.node_id {
            EventRef {
                timestamp: b.timestamp,
                pointer: b.pointer,
            }
        } else {
            match b.timestamp.checked_add(1) {
                Some(timestamp) => EventRef::at(timestamp),
                None => EventRef::MAX,
            }
        }
    }

    /// Closest reference past the boundary and the index of its browser
    fn step(&mut self, forward: bool) -> StorageResult<Option<(BrowsePosition, usize)>> {
        let mut best: Option<(BrowsePosition, usize)> = None;
        for index in 0..self.browsers.len() {
            let node_id = self.browsers[index].0;
            let target = self.node_target(node_id);
            let browser = &mut self.browsers[index].1;
            browser.seek(target)?;
            let found = if forward {
                browser.next_ref()?
            } else {
                browser.previous_ref()?
            };
            let Some(found) = found else {
                continue;
            };
            let candidate = BrowsePosition {
                timestamp: found.timestamp,
                node_id,
                pointer: found.pointer,
            };
            let better = match best {
                None => true,
                Some((b, _)) if forward => candidate < b,
                Some((b, _)) => candidate > b,
            };
            if better {
                best = Some((candidate, index));
            }
        }
        Ok(best)
    }

    fn load(&self, found: BrowsePosition, index: usize) -> StorageResult<GridEvent> {
        let (node_id, browser) = &self.browsers[index];
        let event = browser.load(EventRef {
            timestamp: found.timestamp,
            pointer: found.pointer,
        })?;
        Ok(GridEvent {
            node_id: *node_id,
            event,
        })
    }

    pub fn next(&mut self) -> StorageResult<Option<GridEvent>> {
        let Some((found, index)) = self.step(true)? else {
            return Ok(None);
        };
        self.boundary = found.successor();
        self.load(found, index).map(Some)
    }

    pub fn previous(&mut self) -> StorageResult<Option<GridEvent>> {
        let Some((found, index)) = self.step(false)? else {
            return Ok(None);
        };
        self.boundary = found;
        self.load(found, index).map(Some)
    }

    /// Current boundary; [`GridBrowser::seek`] to it to resume exactly here
    pub fn position(&self) -> BrowsePosition {
        self.boundary
    }

    pub fn seek(&mut self, position: BrowsePosition) {
        self.boundary = position;
    }

    /// Position so that `next()` returns the first event at or after `timestamp`
    pub fn set_next_timestamp(&mut self, timestamp: u64) {
        self.boundary = BrowsePosition::at(timestamp);
    }

    /// Position so that `previous()` returns the last event at or before `timestamp`
    pub fn set_previous_timestamp(&mut self, timestamp: u64) {
        self.boundary = match timestamp.checked_add(1) {
            Some(after) => BrowsePosition::at(after),
            None => BrowsePosition::MAX,
        };
    }

    pub fn next_batch(&mut self, count: usize) -> StorageResult<Vec<GridEvent>> {
        let mut events = Vec::with_capacity(count.min(1024));
        while events.len() < count {
            match self.next()? {
                Some(event) => events.push(event),
                None => break,
            }
        }
        Ok(events)
    }

    /// Up to `count` events backward, returned in chronological order
    pub fn previous_batch(&mut self, count: usize) -> StorageResult<Vec<GridEvent>> {
        let mut events = Vec::with_capacity(count.min(1024));
        while events.len() < count {
            match self.previous()? {
                Some(event) => events.push(event),
                None => break,
            }
        }
        events.reverse();
        Ok(events)
    }

    pub fn node_count(&self) -> usize {
        self.browsers.len()
    }
}
