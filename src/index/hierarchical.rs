//! Hierarchical paged index
//!
//! Maps monotonically increasing keys to fixed-size tuples. Level 0 holds
//! the leaf tuples; each level above holds one [`InternalTuple`] per page
//! of the level below, keyed by that page's first key.
//!
//! ```text
//! level 2            [k0 ─────────────── k40]
//!                     │                   │
//! level 1      [k0 ─ k8 ─ k16 ─ ...]   [k40 ─ ...]
//!               │    │
//! level 0     [k0..k7][k8..k15][k16..] ...   (open tail page)
//! ```
//!
//! Exactly one page per level is open; a page is sealed, and immutable
//! from then on, when its successor is allocated. Parent levels are
//! created lazily, so the tree grows by at most one level per sealed page.
//!
//! Persisted metadata (see [`HierarchicalIndex::write_to`]):
//! ```text
//! root_page        pointer_bits
//! first_leaf_page  pointer_bits
//! last_key         64
//! leaf_count       32
//! root_level       log2_ceil(MAX_INDEX_LEVELS)
//! per level (MAX_INDEX_LEVELS times):
//!   page           pointer_bits   (0 = level absent)
//!   bit_offset     log2_ceil(page_bits)
//! ```

use crate::index::counter::TupleCounter;
use crate::index::finder::{self, Located, Match, NoMatch};
use crate::index::iterator::TupleIterator;
use crate::index::tuple::{IndexTuple, InternalTuple};
use crate::index::writer::{Rollover, TupleWriter};
use crate::storage::{log2_ceil, BitReader, BitWriter, PageId, PageLayout, PagedFile};
use crate::storage::{StorageError, StorageResult};
use std::marker::PhantomData;
use std::sync::Arc;

/// Hard upper bound on tree height
pub const MAX_INDEX_LEVELS: usize = 6;

/// A read-only handle on an index, usable without holding the index's owner
///
/// The view captures the root at creation time. Keys added later are still
/// reachable through the leaf chain, so a view never misses data.
pub struct IndexView<T: IndexTuple> {
    file: Arc<PagedFile>,
    root_page: PageId,
    root_level: usize,
    first_leaf_page: PageId,
    _tuple: PhantomData<fn() -> T>,
}

impl<T: IndexTuple> Clone for IndexView<T> {
    fn clone(&self) -> Self {
        Self {
            file: Arc::clone(&self.file),
            root_page: self.root_page,
            root_level: self.root_level,
            first_leaf_page: self.first_leaf_page,
            _tuple: PhantomData,
        }
    }
}

impl<T: IndexTuple> IndexView<T> {
    /// Iterator positioned before the first tuple with a key `>= key`
    pub fn tuple_iterator(&self, key: u64) -> StorageResult<TupleIterator<T>> {
        let layout = self.file.layout();
        let page_id = if key == 0 {
            self.first_leaf_page
        } else {
            self.descend(key, &layout)?
        };

        let page = self.file.get(page_id)?;
        let index = finder::find(&page, T::bits(&layout), key, Match::First, NoMatch::After)
            .map(|located| located.index)
            .unwrap_or_else(|| page.tuple_count());

        Ok(TupleIterator::new(Arc::clone(&self.file), page, index))
    }

    /// Leaf page that holds, or immediately precedes, the first key `>= key`
    fn descend(&self, key: u64, layout: &PageLayout) -> StorageResult<PageId> {
        let internal_bits = InternalTuple::bits(layout);
        let mut page_id = self.root_page;

        for _ in (1..=self.root_level).rev() {
            let page = self.file.get(page_id)?;
            let index = match finder::find(&page, internal_bits, key, Match::First, NoMatch::Before)
            {
                // equal keys may also end the previous child
                Some(Located { index, exact: true }) => index.checked_sub(1),
                Some(Located { index, .. }) => Some(index),
                None => None,
            };

            // nothing below `key` on this page: its leftmost child still bounds the search
            let index = match index {
                Some(index) => index,
                None if page.tuple_count() > 0 => 0,
                None => return Ok(self.first_leaf_page),
            };
            page_id = InternalTuple::read(&mut page.reader(index, internal_bits), layout).page;
        }
        Ok(page_id)
    }

    /// First tuple with a key `>= key`; with `exact`, only a tuple whose key is `key`
    pub fn tuple_at(&self, key: u64, exact: bool) -> StorageResult<Option<T>> {
        let tuple = self.tuple_iterator(key)?.next()?;
        Ok(tuple.filter(|t| !exact || t.key() == key))
    }

    /// Approximate tuple counts over `slots` equal buckets of `[k1, k2)`
    pub fn fast_count_tuples(&self, k1: u64, k2: u64, slots: usize) -> StorageResult<Vec<u64>> {
        if k1 >= k2 || slots == 0 {
            return Ok(vec![0; slots]);
        }
        let leaf_bits = T::bits(&self.file.layout());
        TupleCounter::new(&self.file, leaf_bits, self.root_level, k1, k2, slots)
            .count(self.root_page, self.root_level)
    }
}

/// Multi-level paged index over tuples of type `T`
pub struct HierarchicalIndex<T: IndexTuple> {
    name: String,
    file: Arc<PagedFile>,
    max_levels: usize,
    root_page: PageId,
    root_level: usize,
    first_leaf_page: PageId,
    last_key: u64,
    leaf_count: u64,
    writers: [Option<TupleWriter>; MAX_INDEX_LEVELS],
    _tuple: PhantomData<fn() -> T>,
}

impl<T: IndexTuple> HierarchicalIndex<T> {
    /// Create an empty index whose first leaf page is allocated in `file`
    pub fn new(
        name: impl Into<String>,
        file: Arc<PagedFile>,
        max_levels: usize,
    ) -> StorageResult<Self> {
        let max_levels = checked_levels(max_levels)?;
        let leaf = TupleWriter::create(&file, T::bits(&file.layout()))?;
        let first = leaf.page();

        let mut writers: [Option<TupleWriter>; MAX_INDEX_LEVELS] = std::array::from_fn(|_| None);
        writers[0] = Some(leaf);

        Ok(Self {
            name: name.into(),
            file,
            max_levels,
            root_page: first,
            root_level: 0,
            first_leaf_page: first,
            last_key: 0,
            leaf_count: 0,
            writers,
            _tuple: PhantomData,
        })
    }

    /// Append a tuple
    ///
    /// # Panics
    ///
    /// If `tuple.key()` is smaller than the last added key. Upstream
    /// reordering guarantees monotonic keys; a violation would silently
    /// corrupt every range query over this index.
    pub fn add(&mut self, tuple: T) -> StorageResult<()> {
        let key = tuple.key();
        assert!(
            self.leaf_count == 0 || key >= self.last_key,
            "index {}: key {} added after {}",
            self.name,
            key,
            self.last_key
        );

        let file = Arc::clone(&self.file);
        let rollover = self.writer_mut(0)?.append(&file, &tuple)?;
        self.last_key = key;
        self.leaf_count += 1;

        match rollover {
            Some(rollover) => self.propagate(0, rollover),
            None => Ok(()),
        }
    }

    fn writer_mut(&mut self, level: usize) -> StorageResult<&mut TupleWriter> {
        let name = &self.name;
        self.writers[level].as_mut().ok_or_else(|| {
            StorageError::Corruption(format!("index {}: no writer at level {}", name, level))
        })
    }

    /// Record a sealed page of `level` one level up
    fn propagate(&mut self, level: usize, rollover: Rollover) -> StorageResult<()> {
        let parent = level + 1;

        if level == self.root_level {
            if parent >= self.max_levels {
                return Err(StorageError::CapacityExhausted(format!(
                    "index {}: tree height limit of {} levels reached",
                    self.name, self.max_levels
                )));
            }
            let writer = TupleWriter::create(&self.file, InternalTuple::bits(&self.file.layout()))?;
            self.root_page = writer.page();
            self.root_level = parent;
            self.writers[parent] = Some(writer);

            tracing::trace!(index = %self.name, levels = parent + 1, "Index grew a level");

            self.append_internal(
                parent,
                InternalTuple {
                    key: rollover.sealed_first_key,
                    page: rollover.sealed,
                },
            )?;
        }

        self.append_internal(
            parent,
            InternalTuple {
                key: rollover.opened_first_key,
                page: rollover.opened,
            },
        )
    }

    fn append_internal(&mut self, level: usize, tuple: InternalTuple) -> StorageResult<()> {
        let file = Arc::clone(&self.file);
        match self.writer_mut(level)?.append(&file, &tuple)? {
            Some(rollover) => self.propagate(level, rollover),
            None => Ok(()),
        }
    }

    /// Snapshot handle for lock-free reads
    pub fn view(&self) -> IndexView<T> {
        IndexView {
            file: Arc::clone(&self.file),
            root_page: self.root_page,
            root_level: self.root_level,
            first_leaf_page: self.first_leaf_page,
            _tuple: PhantomData,
        }
    }

    pub fn tuple_iterator(&self, key: u64) -> StorageResult<TupleIterator<T>> {
        self.view().tuple_iterator(key)
    }

    pub fn tuple_at(&self, key: u64, exact: bool) -> StorageResult<Option<T>> {
        self.view().tuple_at(key, exact)
    }

    pub fn fast_count_tuples(&self, k1: u64, k2: u64, slots: usize) -> StorageResult<Vec<u64>> {
        self.view().fast_count_tuples(k1, k2, slots)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn leaf_count(&self) -> u64 {
        self.leaf_count
    }

    pub fn last_key(&self) -> u64 {
        self.last_key
    }

    /// Number of levels, leaves included
    pub fn height(&self) -> usize {
        self.root_level + 1
    }

    /// Width of the metadata written by [`HierarchicalIndex::write_to`]
    pub fn metadata_bits(layout: &PageLayout) -> usize {
        let pointer = layout.pointer_bits();
        2 * pointer
            + 64
            + 32
            + log2_ceil(MAX_INDEX_LEVELS as u64)
            + MAX_INDEX_LEVELS * (pointer + log2_ceil(layout.page_bits() as u64))
    }

    /// Persist the recoverable state of the index
    ///
    /// The leaf count is stored on 32 bits and saturates.
    pub fn write_to(&self, writer: &mut BitWriter<'_>) {
        let layout = self.file.layout();
        let pointer = layout.pointer_bits();
        let offset_bits = log2_ceil(layout.page_bits() as u64);

        writer.write(self.root_page as u64, pointer);
        writer.write(self.first_leaf_page as u64, pointer);
        writer.write(self.last_key, 64);
        writer.write(self.leaf_count.min(u32::MAX as u64), 32);
        writer.write(self.root_level as u64, log2_ceil(MAX_INDEX_LEVELS as u64));

        for slot in &self.writers {
            let (page, position) = slot
                .as_ref()
                .map(|w| (w.page(), w.position()))
                .unwrap_or((0, 0));
            writer.write(page as u64, pointer);
            writer.write(position as u64, offset_bits);
        }
    }

    /// Metadata as a standalone byte buffer
    pub fn to_bytes(&self) -> Vec<u8> {
        let bits = Self::metadata_bits(&self.file.layout());
        let mut buf = vec![0u8; (bits + 7) / 8];
        self.write_to(&mut BitWriter::new(&mut buf, 0));
        buf
    }

    /// Reopen an index from metadata written by [`HierarchicalIndex::write_to`]
    pub fn from_struct(
        name: impl Into<String>,
        file: Arc<PagedFile>,
        max_levels: usize,
        reader: &mut BitReader<'_>,
    ) -> StorageResult<Self> {
        let name = name.into();
        let max_levels = checked_levels(max_levels)?;
        let layout = file.layout();
        let pointer = layout.pointer_bits();
        let offset_bits = log2_ceil(layout.page_bits() as u64);

        let root_page = reader.read(pointer) as PageId;
        let first_leaf_page = reader.read(pointer) as PageId;
        let last_key = reader.read(64);
        let leaf_count = reader.read(32);
        let root_level = reader.read(log2_ceil(MAX_INDEX_LEVELS as u64)) as usize;

        if root_level >= max_levels {
            return Err(StorageError::Corruption(format!(
                "index {}: root level {} exceeds limit of {} levels",
                name, root_level, max_levels
            )));
        }

        let mut writers: [Option<TupleWriter>; MAX_INDEX_LEVELS] = std::array::from_fn(|_| None);
        for (level, slot) in writers.iter_mut().enumerate() {
            let page = reader.read(pointer) as PageId;
            let position = reader.read(offset_bits) as usize;
            if page == 0 {
                continue;
            }
            let tuple_bits = match level {
                0 => T::bits(&layout),
                _ => InternalTuple::bits(&layout),
            };
            *slot = Some(TupleWriter::resume(&file, page, position, tuple_bits)?);
        }

        if let Some(level) = (0..=root_level).find(|&l| writers[l].is_none()) {
            return Err(StorageError::Corruption(format!(
                "index {}: missing writer for level {}",
                name, level
            )));
        }

        Ok(Self {
            name,
            file,
            max_levels,
            root_page,
            root_level,
            first_leaf_page,
            last_key,
            leaf_count,
            writers,
            _tuple: PhantomData,
        })
    }
}

fn checked_levels(max_levels: usize) -> StorageResult<usize> {
    if (1..=MAX_INDEX_LEVELS).contains(&max_levels) {
        Ok(max_levels)
    } else {
        Err(StorageError::Config(format!(
            "max index levels must be within 1..={}, got {}",
            MAX_INDEX_LEVELS, max_levels
        )))
    }
}
