//! Approximate histogram counting
//!
//! Every internal tuple that has a following sibling roots a complete
//! subtree: all pages below it were sealed full, so it covers exactly
//! `T0 * TU^(level - 1)` leaf tuples, where `T0` and `TU` are the leaf and
//! internal tuples per page. The counter descends depth first. A complete
//! subtree lying inside `[k1, k2)` whose key span is at most half a bucket
//! is credited without being read, its count spread over the buckets it
//! overlaps in proportion to the overlap. Anything wider, partial, or
//! straddling the range bounds is drilled into, down to exact leaf counts.
//!
//! Totals are therefore exact; only the split of a subtree between two
//! neighbouring buckets is interpolated.

use crate::index::tuple::{IndexTuple, InternalTuple};
use crate::storage::{PageId, PageLayout, PagedFile, StorageResult};

pub(crate) struct TupleCounter<'a> {
    file: &'a PagedFile,
    layout: PageLayout,
    k1: u64,
    k2: u64,
    slots: usize,
    width: f64,
    leaf_bits: usize,
    internal_bits: usize,
    /// Leaf tuples under a complete subtree rooted at each level
    subtree_sizes: Vec<f64>,
    counts: Vec<f64>,
}

impl<'a> TupleCounter<'a> {
    pub fn new(
        file: &'a PagedFile,
        leaf_bits: usize,
        root_level: usize,
        k1: u64,
        k2: u64,
        slots: usize,
    ) -> Self {
        let layout = file.layout();
        let internal_bits = InternalTuple::bits(&layout);
        let leaf_fanout = layout.tuples_per_page(leaf_bits) as f64;
        let internal_fanout = layout.tuples_per_page(internal_bits) as f64;

        let subtree_sizes = (0..=root_level)
            .map(|level| match level {
                0 => 1.0,
                _ => leaf_fanout * internal_fanout.powi(level as i32 - 1),
            })
            .collect();

        Self {
            file,
            layout,
            k1,
            k2,
            slots,
            width: (k2 - k1) as f64 / slots as f64,
            leaf_bits,
            internal_bits,
            subtree_sizes,
            counts: vec![0.0; slots],
        }
    }

    /// Count the tree rooted at `root`, returning one total per bucket
    pub fn count(mut self, root: PageId, root_level: usize) -> StorageResult<Vec<u64>> {
        self.count_page(root, root_level, None)?;
        Ok(round_preserving_total(&self.counts))
    }

    /// Returns false once a key at or beyond `k2` has been seen
    fn count_page(&mut self, id: PageId, level: usize, upper: Option<u64>) -> StorageResult<bool> {
        let page = self.file.get(id)?;
        let count = page.tuple_count();

        if level == 0 {
            for i in 0..count {
                let key = page.key_at(i, self.leaf_bits);
                if key >= self.k2 {
                    return Ok(false);
                }
                if key >= self.k1 {
                    let slot = self.slot(key);
                    self.counts[slot] += 1.0;
                }
            }
            return Ok(true);
        }

        for i in 0..count {
            let start = page.key_at(i, self.internal_bits);
            if start >= self.k2 {
                return Ok(false);
            }
            let end = if i + 1 < count {
                Some(page.key_at(i + 1, self.internal_bits))
            } else {
                upper
            };

            if let Some(end) = end {
                if end < self.k1 {
                    continue;
                }
                if start >= self.k1 && end < self.k2 && ((end - start) as f64) <= self.width / 2.0 {
                    self.apportion(self.subtree_sizes[level], start, end);
                    continue;
                }
            }

            let child = InternalTuple::read(&mut page.reader(i, self.internal_bits), &self.layout);
            if !self.count_page(child.page, level - 1, end)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn slot(&self, key: u64) -> usize {
        let offset = (key - self.k1) as u128 * self.slots as u128;
        let slot = (offset / (self.k2 - self.k1) as u128) as usize;
        slot.min(self.slots - 1)
    }

    /// First key of bucket `slot`; `bucket_start(slots) == k2`
    fn bucket_start(&self, slot: usize) -> u64 {
        let span = (self.k2 - self.k1) as u128;
        let slots = self.slots as u128;
        self.k1 + ((slot as u128 * span + slots - 1) / slots) as u64
    }

    fn apportion(&mut self, count: f64, start: u64, end: u64) {
        if end == start {
            let slot = self.slot(start);
            self.counts[slot] += count;
            return;
        }

        let span = (end - start) as f64;
        for slot in self.slot(start)..=self.slot(end) {
            let lo = start.max(self.bucket_start(slot));
            let hi = end.min(self.bucket_start(slot + 1));
            if hi > lo {
                self.counts[slot] += count * (hi - lo) as f64 / span;
            }
        }
    }
}

/// Round fractional bucket counts so that they still add up to the rounded total
fn round_preserving_total(counts: &[f64]) -> Vec<u64> {
    let total = counts.iter().sum::<f64>().round() as u64;
    let mut result: Vec<u64> = counts.iter().map(|c| c.max(0.0).floor() as u64).collect();
    let assigned: u64 = result.iter().sum();

    let mut remainders: Vec<(usize, f64)> = counts
        .iter()
        .enumerate()
        .map(|(i, c)| (i, c - c.floor()))
        .collect();
    remainders.sort_by(|a, b| b.1.total_cmp(&a.1));

    for (i, _) in remainders
        .into_iter()
        .take(total.saturating_sub(assigned) as usize)
    {
        result[i] += 1;
    }
    result
}
