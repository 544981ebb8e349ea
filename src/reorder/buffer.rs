//! Reordering for a single monotonic-id stream
//!
//! Entries at or above the highest id pushed so far go to a FIFO; entries
//! below it go to a min-heap. `pop` returns the smaller of the two heads,
//! so a stream that is only slightly out of order drains sorted by id.

use crate::reorder::ring::Ring;
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

/// An entry that can be reordered
pub trait Sequenced {
    /// Ordering key
    fn id(&self) -> u64;

    /// Arrival time, used for age based flushing
    fn timestamp(&self) -> u64;
}

/// Heap slot ordered by id only
#[derive(Debug)]
struct ById<E>(E);

impl<E: Sequenced> PartialEq for ById<E> {
    fn eq(&self, other: &Self) -> bool {
        self.0.id() == other.0.id()
    }
}

impl<E: Sequenced> Eq for ById<E> {}

impl<E: Sequenced> PartialOrd for ById<E> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<E: Sequenced> Ord for ById<E> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.id().cmp(&other.0.id())
    }
}

#[derive(Debug)]
pub struct ReorderingBuffer<E: Sequenced> {
    in_order: Ring<E>,
    out_of_order: BinaryHeap<Reverse<ById<E>>>,
    capacity: usize,
    last_pushed_id: u64,
    newest_timestamp: u64,
}

impl<E: Sequenced> ReorderingBuffer<E> {
    pub fn new(capacity: usize) -> Self {
        let in_order = Ring::new(capacity);
        Self {
            capacity: in_order.capacity(),
            in_order,
            out_of_order: BinaryHeap::new(),
            last_pushed_id: 0,
            newest_timestamp: 0,
        }
    }

    /// Buffer an entry; never drops
    pub fn push(&mut self, entry: E) {
        self.newest_timestamp = self.newest_timestamp.max(entry.timestamp());

        let id = entry.id();
        if id < self.last_pushed_id {
            self.out_of_order.push(Reverse(ById(entry)));
        } else {
            self.last_pushed_id = id;
            self.in_order.push(entry);
        }
    }

    /// Next entry in non-decreasing id order
    pub fn pop(&mut self) -> Option<E> {
        let take_heap = match (self.in_order.peek(), self.out_of_order.peek()) {
            (None, _) => true,
            (Some(head), Some(Reverse(ById(late)))) => late.id() < head.id(),
            (Some(_), None) => false,
        };

        if take_heap {
            self.out_of_order.pop().map(|Reverse(ById(entry))| entry)
        } else {
            self.in_order.pop()
        }
    }

    /// The next entry to pop, if any
    pub fn peek(&self) -> Option<&E> {
        match (self.in_order.peek(), self.out_of_order.peek()) {
            (Some(head), Some(Reverse(ById(late)))) if late.id() < head.id() => Some(late),
            (Some(head), _) => Some(head),
            (None, late) => late.map(|Reverse(ById(entry))| entry),
        }
    }

    /// True when the owner must drain before pushing again
    pub fn is_full(&self) -> bool {
        self.in_order.is_full() || self.out_of_order.len() >= self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.in_order.is_empty() && self.out_of_order.is_empty()
    }

    pub fn len(&self) -> usize {
        self.in_order.len() + self.out_of_order.len()
    }

    /// True when the next entry is more than `max_age` older than the newest push
    pub fn is_next_entry_flushable(&self, max_age: u64) -> bool {
        self.peek()
            .is_some_and(|next| self.newest_timestamp.saturating_sub(next.timestamp()) > max_age)
    }

    pub fn clear(&mut self) {
        self.in_order.clear();
        self.out_of_order.clear();
        self.last_pushed_id = 0;
        self.newest_timestamp = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Entry {
        id: u64,
        ts: u64,
    }

    impl Sequenced for Entry {
        fn id(&self) -> u64 {
            self.id
        }

        fn timestamp(&self) -> u64 {
            self.ts
        }
    }

    fn drain(buffer: &mut ReorderingBuffer<Entry>) -> Vec<u64> {
        std::iter::from_fn(|| buffer.pop()).map(|e| e.id).collect()
    }

    #[test]
    fn test_slightly_disordered_ids_drain_sorted() {
        let mut buffer = ReorderingBuffer::new(100);
        for id in [1, 2, 5, 3, 4, 8, 6, 7, 9] {
            buffer.push(Entry { id, ts: id * 10 });
        }
        assert_eq!(buffer.len(), 9);
        assert_eq!(drain(&mut buffer), (1..=9).collect::<Vec<_>>());
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_full_when_either_side_reaches_capacity() {
        let mut buffer = ReorderingBuffer::new(3);
        buffer.push(Entry { id: 10, ts: 0 });
        buffer.push(Entry { id: 11, ts: 0 });
        assert!(!buffer.is_full());
        buffer.push(Entry { id: 12, ts: 0 });
        assert!(buffer.is_full());

        let mut buffer = ReorderingBuffer::new(3);
        buffer.push(Entry { id: 10, ts: 0 });
        for id in 1..=3 {
            buffer.push(Entry { id, ts: 0 });
        }
        assert!(buffer.is_full());
        assert_eq!(buffer.pop().map(|e| e.id), Some(1));
        assert!(!buffer.is_full());
    }

    #[test]
    fn test_flushable_by_age() {
        let mut buffer = ReorderingBuffer::new(10);
        assert!(!buffer.is_next_entry_flushable(0));

        buffer.push(Entry { id: 1, ts: 100 });
        buffer.push(Entry { id: 2, ts: 150 });
        buffer.push(Entry { id: 3, ts: 400 });
        assert!(buffer.is_next_entry_flushable(250));
        assert!(!buffer.is_next_entry_flushable(300));

        buffer.pop();
        buffer.pop();
        assert!(!buffer.is_next_entry_flushable(0));
    }
}
