//! Per-level tuple writer
//!
//! A writer owns the open tail page of one index level. When that page is
//! full it allocates a successor, links the two through their trailers and
//! reports the rollover so the index can add a tuple one level up. The
//! sealed page is never written again.

use crate::index::tuple::IndexTuple;
use crate::storage::{BitWriter, PageId, PagedFile, StorageResult};

/// A page was sealed and a new one opened by an append
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Rollover {
    pub sealed: PageId,
    pub sealed_first_key: u64,
    pub opened: PageId,
    pub opened_first_key: u64,
}

#[derive(Debug, Clone)]
pub(crate) struct TupleWriter {
    page: PageId,
    /// Bit offset of the next tuple in `page`
    position: usize,
    first_key: Option<u64>,
    tuple_bits: usize,
    capacity: usize,
}

impl TupleWriter {
    /// Start a level on a freshly allocated page
    pub fn create(file: &PagedFile, tuple_bits: usize) -> StorageResult<Self> {
        let page = file.create_page()?;
        Ok(Self::at(file, page, 0, tuple_bits, None))
    }

    /// Resume writing at a persisted cursor
    pub fn resume(
        file: &PagedFile,
        page: PageId,
        position: usize,
        tuple_bits: usize,
    ) -> StorageResult<Self> {
        let first_key = if position > 0 {
            Some(file.get(page)?.key_at(0, tuple_bits))
        } else {
            None
        };
        Ok(Self::at(file, page, position, tuple_bits, first_key))
    }

    fn at(
        file: &PagedFile,
        page: PageId,
        position: usize,
        tuple_bits: usize,
        first_key: Option<u64>,
    ) -> Self {
        Self {
            page,
            position,
            first_key,
            tuple_bits,
            capacity: file.layout().tuples_per_page(tuple_bits),
        }
    }

    pub fn page(&self) -> PageId {
        self.page
    }

    pub fn position(&self) -> usize {
        self.position
    }

    /// Append a tuple, sealing the current page first if it is full
    pub fn append<T: IndexTuple>(
        &mut self,
        file: &PagedFile,
        tuple: &T,
    ) -> StorageResult<Option<Rollover>> {
        let layout = file.layout();
        let key = tuple.key();
        let mut rollover = None;

        if self.position / self.tuple_bits >= self.capacity {
            let sealed = self.page;
            let opened = file.create_page()?;
            // back link first: a reader can only reach `opened` through `sealed`
            file.update(opened, |buf| layout.write_prev(buf, sealed))?;
            file.update(sealed, |buf| layout.write_next(buf, opened))?;

            rollover = Some(Rollover {
                sealed,
                sealed_first_key: self.first_key.unwrap_or(key),
                opened,
                opened_first_key: key,
            });
            self.page = opened;
            self.position = 0;
            self.first_key = None;
        }

        let position = self.position;
        let count = position / self.tuple_bits + 1;
        file.update(self.page, |buf| {
            let mut writer = BitWriter::new(buf, position);
            tuple.write(&mut writer, &layout);
            layout.write_count(buf, count);
        })?;

        self.first_key.get_or_insert(key);
        self.position += self.tuple_bits;
        Ok(rollover)
    }
}
