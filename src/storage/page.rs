//! Paged file
//!
//! Fixed-size pages addressed by 1-based ids; id 0 means "no page".
//! Each page holds a packed run of same-size tuples followed by a trailer:
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │ TUPLES (tuple_bits each, bit-packed)    │
//! │   ...                                   │
//! ├─────────────────────────────────────────┤
//! │ TRAILER (end of page)                   │
//! │   tuple_count: 16 bits                  │
//! │   prev_page:   pointer_bits             │
//! │   next_page:   pointer_bits             │
//! └─────────────────────────────────────────┘
//! ```
//!
//! Pages are shared as `Arc` snapshots. Writers go through copy-on-write,
//! so a reader holding a snapshot of the open tail page never observes a
//! half-written tuple; it refreshes the snapshot to see newer tuples.
//!
//! Snapshot file layout:
//! ```text
//! ┌─────────────────────────────────────────┐
//! │ HEADER (64 bytes)                       │
//! │   magic: [u8; 4] = "TGPF"               │
//! │   version: u16                          │
//! │   page_size: u32                        │
//! │   pointer_bits: u8                      │
//! │   page_count: u32                       │
//! │   data_checksum: u32                    │
//! │   reserved                              │
//! │   header_checksum: u32                  │
//! ├─────────────────────────────────────────┤
//! │ PAGES (page_count * page_size)          │
//! └─────────────────────────────────────────┘
//! ```

use crate::storage::bits::{read_bits, write_bits, BitReader};
use crate::storage::error::{StorageError, StorageResult};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::sync::{Arc, RwLock};

/// 1-based page id; 0 is the null page
pub type PageId = u32;

const COUNT_BITS: usize = 16;

const FILE_MAGIC: [u8; 4] = *b"TGPF";
const FILE_VERSION: u16 = 1;
const HEADER_SIZE: usize = 64;

/// Geometry shared by every page of a file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageLayout {
    page_size: usize,
    pointer_bits: usize,
}

impl PageLayout {
    pub const MIN_PAGE_SIZE: usize = 128;
    pub const MAX_PAGE_SIZE: usize = 65536;

    /// Create a layout, validating page size and pointer width
    pub fn new(page_size: usize, pointer_bits: usize) -> StorageResult<Self> {
        if !(8..=32).contains(&pointer_bits) {
            return Err(StorageError::Config(format!(
                "page pointer bits must be within 8..=32, got {}",
                pointer_bits
            )));
        }
        if !(Self::MIN_PAGE_SIZE..=Self::MAX_PAGE_SIZE).contains(&page_size) {
            return Err(StorageError::Config(format!(
                "page size must be within {}..={} bytes, got {}",
                Self::MIN_PAGE_SIZE,
                Self::MAX_PAGE_SIZE,
                page_size
            )));
        }
        Ok(Self {
            page_size,
            pointer_bits,
        })
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn pointer_bits(&self) -> usize {
        self.pointer_bits
    }

    pub fn page_bits(&self) -> usize {
        self.page_size * 8
    }

    /// Bits available for tuples
    pub fn payload_bits(&self) -> usize {
        self.page_bits() - COUNT_BITS - 2 * self.pointer_bits
    }

    pub fn tuples_per_page(&self, tuple_bits: usize) -> usize {
        self.payload_bits() / tuple_bits
    }

    /// Highest page id addressable with the configured pointer width
    pub fn max_pages(&self) -> u64 {
        (1u64 << self.pointer_bits) - 1
    }

    fn count_offset(&self) -> usize {
        self.payload_bits()
    }

    fn prev_offset(&self) -> usize {
        self.count_offset() + COUNT_BITS
    }

    fn next_offset(&self) -> usize {
        self.prev_offset() + self.pointer_bits
    }

    pub(crate) fn read_count(&self, buf: &[u8]) -> usize {
        read_bits(buf, self.count_offset(), COUNT_BITS) as usize
    }

    pub(crate) fn write_count(&self, buf: &mut [u8], count: usize) {
        write_bits(buf, self.count_offset(), count as u64, COUNT_BITS);
    }

    pub(crate) fn read_prev(&self, buf: &[u8]) -> PageId {
        read_bits(buf, self.prev_offset(), self.pointer_bits) as PageId
    }

    pub(crate) fn write_prev(&self, buf: &mut [u8], page: PageId) {
        write_bits(buf, self.prev_offset(), page as u64, self.pointer_bits);
    }

    pub(crate) fn read_next(&self, buf: &[u8]) -> PageId {
        read_bits(buf, self.next_offset(), self.pointer_bits) as PageId
    }

    pub(crate) fn write_next(&self, buf: &mut [u8], page: PageId) {
        write_bits(buf, self.next_offset(), page as u64, self.pointer_bits);
    }
}

impl Default for PageLayout {
    fn default() -> Self {
        Self {
            page_size: 4096,
            pointer_bits: 32,
        }
    }
}

/// Immutable snapshot of one page
#[derive(Debug, Clone)]
pub struct Page {
    id: PageId,
    layout: PageLayout,
    data: Arc<Vec<u8>>,
}

impl Page {
    pub fn id(&self) -> PageId {
        self.id
    }

    pub fn tuple_count(&self) -> usize {
        self.layout.read_count(&self.data)
    }

    pub fn prev(&self) -> Option<PageId> {
        Some(self.layout.read_prev(&self.data)).filter(|&id| id != 0)
    }

    pub fn next(&self) -> Option<PageId> {
        Some(self.layout.read_next(&self.data)).filter(|&id| id != 0)
    }

    /// Key of the tuple at `index`; every tuple starts with its 64-bit key
    pub fn key_at(&self, index: usize, tuple_bits: usize) -> u64 {
        read_bits(&self.data, index * tuple_bits, 64)
    }

    /// Reader positioned at the tuple at `index`
    pub fn reader(&self, index: usize, tuple_bits: usize) -> BitReader<'_> {
        BitReader::new(&self.data, index * tuple_bits)
    }

    pub fn layout(&self) -> &PageLayout {
        &self.layout
    }
}

/// An in-memory paged file that can be snapshotted to disk
#[derive(Debug)]
pub struct PagedFile {
    layout: PageLayout,
    pages: RwLock<Vec<Arc<Vec<u8>>>>,
}

impl PagedFile {
    pub fn new(layout: PageLayout) -> Self {
        Self {
            layout,
            pages: RwLock::new(Vec::new()),
        }
    }

    pub fn layout(&self) -> PageLayout {
        self.layout
    }

    /// Allocate a zeroed page
    pub fn create_page(&self) -> StorageResult<PageId> {
        let mut pages = self.pages.write()?;
        if pages.len() as u64 >= self.layout.max_pages() {
            return Err(StorageError::CapacityExhausted(format!(
                "{}-bit page pointers address at most {} pages",
                self.layout.pointer_bits,
                self.layout.max_pages()
            )));
        }
        pages.push(Arc::new(vec![0u8; self.layout.page_size]));
        Ok(pages.len() as PageId)
    }

    /// Snapshot a page
    pub fn get(&self, id: PageId) -> StorageResult<Page> {
        let pages = self.pages.read()?;
        let data = id
            .checked_sub(1)
            .and_then(|index| pages.get(index as usize))
            .cloned()
            .ok_or_else(|| StorageError::Corruption(format!("dangling page id {}", id)))?;

        Ok(Page {
            id,
            layout: self.layout,
            data,
        })
    }

    /// Mutate a page in place, copying it first if a reader holds a snapshot
    pub fn update<R>(&self, id: PageId, f: impl FnOnce(&mut [u8]) -> R) -> StorageResult<R> {
        let mut pages = self.pages.write()?;
        let slot = id
            .checked_sub(1)
            .and_then(|index| pages.get_mut(index as usize))
            .ok_or_else(|| StorageError::Corruption(format!("dangling page id {}", id)))?;

        Ok(f(Arc::make_mut(slot).as_mut_slice()))
    }

    pub fn page_count(&self) -> StorageResult<usize> {
        Ok(self.pages.read()?.len())
    }

    pub fn size_bytes(&self) -> StorageResult<u64> {
        Ok(self.page_count()? as u64 * self.layout.page_size as u64)
    }

    /// Write every page to `path`
    pub fn save(&self, path: impl AsRef<Path>) -> StorageResult<()> {
        let pages = self.pages.read()?;

        let mut hasher = crc32fast::Hasher::new();
        for page in pages.iter() {
            hasher.update(page);
        }
        let data_checksum = hasher.finalize();

        let mut header = [0u8; HEADER_SIZE];
        header[0..4].copy_from_slice(&FILE_MAGIC);
        header[4..6].copy_from_slice(&FILE_VERSION.to_le_bytes());
        header[6..10].copy_from_slice(&(self.layout.page_size as u32).to_le_bytes());
        header[10] = self.layout.pointer_bits as u8;
        header[11..15].copy_from_slice(&(pages.len() as u32).to_le_bytes());
        header[15..19].copy_from_slice(&data_checksum.to_le_bytes());
        let checksum = crc32fast::hash(&header[0..60]);
        header[60..64].copy_from_slice(&checksum.to_le_bytes());

        let file = File::create(path.as_ref())?;
        let mut writer = BufWriter::new(file);
        writer.write_all(&header)?;
        for page in pages.iter() {
            writer.write_all(page)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()?;

        tracing::debug!(
            path = %path.as_ref().display(),
            pages = pages.len(),
            "Saved paged file"
        );
        Ok(())
    }

    /// Load a file written by [`PagedFile::save`]
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let file = File::open(path.as_ref())?;
        let mut reader = BufReader::new(file);

        let mut header = [0u8; HEADER_SIZE];
        reader.read_exact(&mut header)?;

        let stored = u32::from_le_bytes([header[60], header[61], header[62], header[63]]);
        let computed = crc32fast::hash(&header[0..60]);
        if stored != computed {
            return Err(StorageError::Corruption(format!(
                "Page file header checksum mismatch: stored={}, computed={}",
                stored, computed
            )));
        }
        if header[0..4] != FILE_MAGIC {
            return Err(StorageError::Corruption("Invalid page file magic".to_string()));
        }
        let version = u16::from_le_bytes([header[4], header[5]]);
        if version != FILE_VERSION {
            return Err(StorageError::Corruption(format!(
                "Unsupported page file version: {}",
                version
            )));
        }

        let page_size = u32::from_le_bytes([header[6], header[7], header[8], header[9]]) as usize;
        let layout = PageLayout::new(page_size, header[10] as usize)?;
        let page_count =
            u32::from_le_bytes([header[11], header[12], header[13], header[14]]) as usize;
        let data_checksum = u32::from_le_bytes([header[15], header[16], header[17], header[18]]);

        let mut hasher = crc32fast::Hasher::new();
        let mut pages = Vec::with_capacity(page_count);
        for _ in 0..page_count {
            let mut page = vec![0u8; page_size];
            reader.read_exact(&mut page)?;
            hasher.update(&page);
            pages.push(Arc::new(page));
        }
        if hasher.finalize() != data_checksum {
            return Err(StorageError::Corruption(
                "Page file data checksum mismatch".to_string(),
            ));
        }

        Ok(Self {
            layout,
            pages: RwLock::new(pages),
        })
    }
}
