//! Bidirectional tuple iterator
//!
//! The iterator is a cursor sitting between two tuples of one index level:
//! `next()` returns the tuple after the cursor and moves past it,
//! `previous()` returns the tuple before it and moves back, so `next()`
//! followed by `previous()` yields the same tuple twice.
//!
//! Iteration follows the prev/next links in page trailers and never takes
//! a lock beyond the brief snapshot of each page. When the cursor reaches
//! the end of a page that has no successor yet, the page is re-read once,
//! since the open tail page may have grown since it was snapshotted.

use crate::index::tuple::IndexTuple;
use crate::storage::{Page, PageLayout, PagedFile, StorageResult};
use std::marker::PhantomData;
use std::sync::Arc;

pub struct TupleIterator<T: IndexTuple> {
    file: Arc<PagedFile>,
    layout: PageLayout,
    page: Page,
    index: usize,
    tuple_bits: usize,
    _tuple: PhantomData<fn() -> T>,
}

impl<T: IndexTuple> TupleIterator<T> {
    /// Cursor placed before the tuple at `index` of `page`
    pub(crate) fn new(file: Arc<PagedFile>, page: Page, index: usize) -> Self {
        let layout = file.layout();
        Self {
            tuple_bits: T::bits(&layout),
            file,
            layout,
            page,
            index,
            _tuple: PhantomData,
        }
    }

    fn tuple_at(&self, index: usize) -> T {
        T::read(&mut self.page.reader(index, self.tuple_bits), &self.layout)
    }

    pub fn next(&mut self) -> StorageResult<Option<T>> {
        let mut refreshed = false;
        loop {
            if self.index < self.page.tuple_count() {
                let tuple = self.tuple_at(self.index);
                self.index += 1;
                return Ok(Some(tuple));
            }

            match self.page.next() {
                Some(next) => {
                    self.page = self.file.get(next)?;
                    self.index = 0;
                    refreshed = false;
                }
                None if !refreshed => {
                    self.page = self.file.get(self.page.id())?;
                    refreshed = true;
                }
                None => return Ok(None),
            }
        }
    }

    pub fn previous(&mut self) -> StorageResult<Option<T>> {
        loop {
            if self.index > 0 {
                self.index -= 1;
                return Ok(Some(self.tuple_at(self.index)));
            }

            match self.page.prev() {
                Some(prev) => {
                    self.page = self.file.get(prev)?;
                    self.index = self.page.tuple_count();
                }
                None => return Ok(None),
            }
        }
    }

    pub fn peek_next(&mut self) -> StorageResult<Option<T>> {
        let tuple = self.next()?;
        if tuple.is_some() {
            self.previous()?;
        }
        Ok(tuple)
    }

    pub fn peek_previous(&mut self) -> StorageResult<Option<T>> {
        let tuple = self.previous()?;
        if tuple.is_some() {
            self.next()?;
        }
        Ok(tuple)
    }

    pub fn has_next(&mut self) -> StorageResult<bool> {
        Ok(self.peek_next()?.is_some())
    }

    pub fn has_previous(&mut self) -> StorageResult<bool> {
        Ok(self.peek_previous()?.is_some())
    }
}
