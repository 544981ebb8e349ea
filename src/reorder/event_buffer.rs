//! Event reordering across many producer threads
//!
//! Each producer thread emits events in timestamp order, but threads reach
//! the node over independent paths, so the merged stream is disordered.
//!
//! ```text
//!                  ts >= last_in_order
//! push(event) ─┬──────────────────────→ main ring ─────────┐
//!              │   ts <  last_in_order                      ├─ min ─→ pop()
//!              └──────────────────────→ per-thread rings ──┘
//!                                        (one per host/thread)
//! ```
//!
//! A late event can only be reordered while nothing newer has been popped:
//! anything older than the last popped timestamp is dropped and reported.

use crate::reorder::ring::Ring;
use crate::storage::Event;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Why an event could not be reordered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Older than an event already handed to storage
    TooLate,
    /// Older than a late event previously buffered for the same thread
    SameThread,
    /// The thread's late-event buffer is full
    Full,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            DropReason::TooLate => "too late",
            DropReason::SameThread => "same thread",
            DropReason::Full => "full",
        };
        f.write_str(reason)
    }
}

/// An event the buffer refused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("event at {timestamp} dropped ({reason}), last valid timestamp {last_valid}")]
pub struct EventDropped {
    /// Timestamp the event had to reach to be accepted
    pub last_valid: u64,
    pub timestamp: u64,
    pub reason: DropReason,
}

#[derive(Debug)]
struct ThreadBuffer {
    ring: Ring<Event>,
    last_added: u64,
}

#[derive(Debug)]
pub struct EventReorderingBuffer {
    in_order: Ring<Event>,
    threads: HashMap<u64, ThreadBuffer>,
    thread_capacity: usize,
    /// (timestamp, thread key) of the oldest late event
    next_late: Option<(u64, u64)>,
    late_count: usize,
    last_in_order: u64,
    last_retrieved: u64,
}

impl EventReorderingBuffer {
    pub fn new(capacity: usize, thread_capacity: usize) -> Self {
        Self {
            in_order: Ring::new(capacity),
            threads: HashMap::new(),
            thread_capacity,
            next_late: None,
            late_count: 0,
            last_in_order: 0,
            last_retrieved: 0,
        }
    }

    pub fn push(&mut self, event: Event) -> Result<(), EventDropped> {
        let timestamp = event.timestamp;
        if timestamp < self.last_retrieved {
            return Err(EventDropped {
                last_valid: self.last_retrieved,
                timestamp,
                reason: DropReason::TooLate,
            });
        }

        if timestamp >= self.last_in_order {
            self.last_in_order = timestamp;
            self.in_order.push(event);
            return Ok(());
        }

        let key = event.thread_key();
        let capacity = self.thread_capacity;
        let thread = self.threads.entry(key).or_insert_with(|| ThreadBuffer {
            ring: Ring::new(capacity),
            last_added: 0,
        });

        if timestamp < thread.last_added {
            return Err(EventDropped {
                last_valid: thread.last_added,
                timestamp,
                reason: DropReason::SameThread,
            });
        }
        if thread.ring.is_full() {
            return Err(EventDropped {
                last_valid: self.last_retrieved,
                timestamp,
                reason: DropReason::Full,
            });
        }

        thread.last_added = timestamp;
        thread.ring.push(event);
        self.late_count += 1;
        if self.next_late.map_or(true, |(next, _)| timestamp < next) {
            self.next_late = Some((timestamp, key));
        }
        Ok(())
    }

    /// Next event in non-decreasing timestamp order
    pub fn pop(&mut self) -> Option<Event> {
        let take_late = match (self.in_order.peek(), self.next_late) {
            (_, None) => false,
            (None, Some(_)) => true,
            (Some(head), Some((late, _))) => late < head.timestamp,
        };

        let event = if take_late {
            self.pop_late()
        } else {
            self.in_order.pop()
        }?;
        self.last_retrieved = event.timestamp;
        Some(event)
    }

    fn pop_late(&mut self) -> Option<Event> {
        let (_, key) = self.next_late?;
        let event = self.threads.get_mut(&key)?.ring.pop()?;
        self.late_count -= 1;

        self.next_late = self
            .threads
            .iter()
            .filter_map(|(&key, thread)| thread.ring.peek().map(|e| (e.timestamp, key)))
            .min();
        Some(event)
    }

    /// True when the caller must drain before pushing again
    pub fn is_full(&self) -> bool {
        self.in_order.is_full()
    }

    pub fn is_empty(&self) -> bool {
        self.in_order.is_empty() && self.late_count == 0
    }

    pub fn len(&self) -> usize {
        self.in_order.len() + self.late_count
    }

    /// Timestamp of the next event `pop` would return
    pub fn next_timestamp(&self) -> Option<u64> {
        let head = self.in_order.peek().map(|e| e.timestamp);
        match (head, self.next_late) {
            (Some(head), Some((late, _))) => Some(head.min(late)),
            (head, late) => head.or(late.map(|(ts, _)| ts)),
        }
    }

    /// True when no late event is pending and the oldest in-order event is
    /// more than `max_age` older than the newest one
    pub fn is_next_event_flushable(&self, max_age: u64) -> bool {
        if self.late_count > 0 {
            return false;
        }
        self.in_order
            .peek()
            .is_some_and(|head| self.last_in_order.saturating_sub(head.timestamp) > max_age)
    }

    pub fn last_retrieved(&self) -> u64 {
        self.last_retrieved
    }

    pub fn clear(&mut self) {
        self.in_order.clear();
        self.threads.clear();
        self.next_late = None;
        self.late_count = 0;
        self.last_in_order = 0;
        self.last_retrieved = 0;
    }
}
