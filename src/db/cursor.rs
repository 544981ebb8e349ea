//! Bidirectional event cursors
//!
//! A cursor sits between two event references. `next()` returns the
//! reference after it and moves past it; `previous()` the one before.
//! References are ordered by `(timestamp, pointer)`. Since events are
//! stored in processing order, that order agrees with every index.
//!
//! ```text
//! IndexCursor        one secondary index, optional role filter
//! UnionCursor        merge of children, duplicates removed      (Or)
//! IntersectionCursor leapfrog join of children                  (And)
//! EmptyCursor        nothing
//! ```
//!
//! Cursors hold only `Arc`s to the paged file and event store, so they are
//! used without the database lock.

use crate::index::{EventTuple, IndexView, TupleIterator};
use crate::storage::{Event, EventStore, StorageResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Position of an event in its node: timestamp plus event store pointer
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventRef {
    pub timestamp: u64,
    pub pointer: u64,
}

impl EventRef {
    pub const MIN: EventRef = EventRef {
        timestamp: 0,
        pointer: 0,
    };

    pub const MAX: EventRef = EventRef {
        timestamp: u64::MAX,
        pointer: u64::MAX,
    };

    /// Smallest reference at `timestamp`
    pub fn at(timestamp: u64) -> Self {
        EventRef {
            timestamp,
            pointer: 0,
        }
    }

    /// Immediate successor in reference order
    pub fn successor(self) -> Self {
        match self.pointer.checked_add(1) {
            Some(pointer) => EventRef { pointer, ..self },
            None => EventRef {
                timestamp: self.timestamp.saturating_add(1),
                pointer: 0,
            },
        }
    }
}

pub trait EventCursor: Send {
    fn next(&mut self) -> StorageResult<Option<EventRef>>;

    fn previous(&mut self) -> StorageResult<Option<EventRef>>;

    /// Reposition before the first reference `>= target`
    fn seek(&mut self, target: EventRef) -> StorageResult<()>;
}

/// Cursor over one index, collapsing repeated references to the same event
pub struct IndexCursor<T: EventTuple> {
    view: IndexView<T>,
    iter: TupleIterator<T>,
    role: Option<u8>,
}

impl<T: EventTuple> IndexCursor<T> {
    pub fn new(view: IndexView<T>, role: Option<u8>) -> StorageResult<Self> {
        let iter = view.tuple_iterator(0)?;
        Ok(Self { view, iter, role })
    }

    fn accepts(&self, tuple: &T) -> bool {
        self.role.map_or(true, |role| tuple.role() == role)
    }
}

fn event_ref<T: EventTuple>(tuple: &T) -> EventRef {
    EventRef {
        timestamp: tuple.key(),
        pointer: tuple.pointer(),
    }
}

impl<T: EventTuple> EventCursor for IndexCursor<T> {
    fn next(&mut self) -> StorageResult<Option<EventRef>> {
        loop {
            let Some(tuple) = self.iter.next()? else {
                return Ok(None);
            };
            let found = event_ref(&tuple);
            let mut accepted = self.accepts(&tuple);

            // one event may be indexed several times under different roles
            while let Some(twin) = self.iter.peek_next()? {
                if event_ref(&twin) != found {
                    break;
                }
                accepted |= self.accepts(&twin);
                self.iter.next()?;
            }
            if accepted {
                return Ok(Some(found));
            }
        }
    }

    fn previous(&mut self) -> StorageResult<Option<EventRef>> {
        loop {
            let Some(tuple) = self.iter.previous()? else {
                return Ok(None);
            };
            let found = event_ref(&tuple);
            let mut accepted = self.accepts(&tuple);

            while let Some(twin) = self.iter.peek_previous()? {
                if event_ref(&twin) != found {
                    break;
                }
                accepted |= self.accepts(&twin);
                self.iter.previous()?;
            }
            if accepted {
                return Ok(Some(found));
            }
        }
    }

    fn seek(&mut self, target: EventRef) -> StorageResult<()> {
        self.iter = self.view.tuple_iterator(target.timestamp)?;
        while let Some(tuple) = self.iter.peek_next()? {
            if event_ref(&tuple) >= target {
                break;
            }
            self.iter.next()?;
        }
        Ok(())
    }
}

/// Cursor over no event
pub struct EmptyCursor;

impl EventCursor for EmptyCursor {
    fn next(&mut self) -> StorageResult<Option<EventRef>> {
        Ok(None)
    }

    fn previous(&mut self) -> StorageResult<Option<EventRef>> {
        Ok(None)
    }

    fn seek(&mut self, _target: EventRef) -> StorageResult<()> {
        Ok(())
    }
}

/// Events present in any child
///
/// The position is kept as a boundary reference; each step re-seeks the
/// children to it, so children never need to agree on a direction.
pub struct UnionCursor {
    children: Vec<Box<dyn EventCursor>>,
    boundary: EventRef,
}

impl UnionCursor {
    pub fn new(children: Vec<Box<dyn EventCursor>>) -> Self {
        Self {
            children,
            boundary: EventRef::MIN,
        }
    }
}

impl EventCursor for UnionCursor {
    fn next(&mut self) -> StorageResult<Option<EventRef>> {
        let mut best: Option<EventRef> = None;
        for child in &mut self.children {
            child.seek(self.boundary)?;
            if let Some(found) = child.next()? {
                best = Some(best.map_or(found, |b| b.min(found)));
            }
        }
        if let Some(found) = best {
            self.boundary = found.successor();
        }
        Ok(best)
    }

    fn previous(&mut self) -> StorageResult<Option<EventRef>> {
        let mut best: Option<EventRef> = None;
        for child in &mut self.children {
            child.seek(self.boundary)?;
            if let Some(found) = child.previous()? {
                best = Some(best.map_or(found, |b| b.max(found)));
            }
        }
        if let Some(found) = best {
            self.boundary = found;
        }
        Ok(best)
    }

    fn seek(&mut self, target: EventRef) -> StorageResult<()> {
        self.boundary = target;
        Ok(())
    }
}

/// Events present in every child, found by leapfrogging
pub struct IntersectionCursor {
    children: Vec<Box<dyn EventCursor>>,
    boundary: EventRef,
}

impl IntersectionCursor {
    /// `children` must not be empty
    pub fn new(children: Vec<Box<dyn EventCursor>>) -> Self {
        Self {
            children,
            boundary: EventRef::MIN,
        }
    }
}

impl EventCursor for IntersectionCursor {
    fn next(&mut self) -> StorageResult<Option<EventRef>> {
        let mut target = self.boundary;
        'search: loop {
            for child in &mut self.children {
                child.seek(target)?;
                match child.next()? {
                    None => {
                        self.boundary = EventRef::MAX;
                        return Ok(None);
                    }
                    Some(found) if found > target => {
                        target = found;
                        continue 'search;
                    }
                    Some(_) => {}
                }
            }
            self.boundary = target.successor();
            return Ok(Some(target));
        }
    }

    fn previous(&mut self) -> StorageResult<Option<EventRef>> {
        // largest reference below the boundary common to all children
        let mut limit = self.boundary;
        'search: loop {
            let mut candidate: Option<EventRef> = None;
            for child in &mut self.children {
                child.seek(limit)?;
                match child.previous()? {
                    None => {
                        self.boundary = EventRef::MIN;
                        return Ok(None);
                    }
                    Some(found) => match candidate {
                        None => candidate = Some(found),
                        Some(c) if found == c => {}
                        Some(c) => {
                            limit = c.min(found).successor();
                            continue 'search;
                        }
                    },
                }
            }
            if let Some(found) = candidate {
                self.boundary = found;
            }
            return Ok(candidate);
        }
    }

    fn seek(&mut self, target: EventRef) -> StorageResult<()> {
        self.boundary = target;
        Ok(())
    }
}

/// Iterates the events selected by a filter on one node
pub struct EventBrowser {
    cursor: Box<dyn EventCursor>,
    store: Arc<EventStore>,
}

impl EventBrowser {
    pub fn new(cursor: Box<dyn EventCursor>, store: Arc<EventStore>) -> Self {
        Self { cursor, store }
    }

    pub fn next_ref(&mut self) -> StorageResult<Option<EventRef>> {
        self.cursor.next()
    }

    pub fn previous_ref(&mut self) -> StorageResult<Option<EventRef>> {
        self.cursor.previous()
    }

    pub fn seek(&mut self, target: EventRef) -> StorageResult<()> {
        self.cursor.seek(target)
    }

    pub fn load(&self, event: EventRef) -> StorageResult<Event> {
        self.store.get(event.pointer)
    }

    pub fn next(&mut self) -> StorageResult<Option<Event>> {
        match self.cursor.next()? {
            Some(found) => self.load(found).map(Some),
            None => Ok(None),
        }
    }

    pub fn previous(&mut self) -> StorageResult<Option<Event>> {
        match self.cursor.previous()? {
            Some(found) => self.load(found).map(Some),
            None => Ok(None),
        }
    }

    pub fn has_next(&mut self) -> StorageResult<bool> {
        let found = self.cursor.next()?;
        if found.is_some() {
            self.cursor.previous()?;
        }
        Ok(found.is_some())
    }

    pub fn has_previous(&mut self) -> StorageResult<bool> {
        let found = self.cursor.previous()?;
        if found.is_some() {
            self.cursor.next()?;
        }
        Ok(found.is_some())
    }

    /// Position so that `next()` returns the first event at or after `timestamp`
    pub fn set_next_timestamp(&mut self, timestamp: u64) -> StorageResult<()> {
        self.cursor.seek(EventRef::at(timestamp))
    }

    /// Position so that `previous()` returns the last event at or before `timestamp`
    pub fn set_previous_timestamp(&mut self, timestamp: u64) -> StorageResult<()> {
        match timestamp.checked_add(1) {
            Some(after) => self.cursor.seek(EventRef::at(after)),
            None => self.cursor.seek(EventRef::MAX),
        }
    }

    /// Up to `count` events forward
    pub fn next_batch(&mut self, count: usize) -> StorageResult<Vec<Event>> {
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
    pub fn previous_batch(&mut self, count: usize) -> StorageResult<Vec<Event>> {
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
}
