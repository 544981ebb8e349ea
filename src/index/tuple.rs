//! Index tuple codecs
//!
//! Every tuple begins with its 64-bit key, so page search can read keys
//! without knowing the tuple type.

use crate::storage::{BitReader, BitWriter, PageId, PageLayout};
use std::fmt::Debug;

/// A fixed-width record stored in index pages
pub trait IndexTuple: Clone + Debug + Send + Sync + 'static {
    /// Encoded width in bits for the given page geometry
    fn bits(layout: &PageLayout) -> usize;

    fn key(&self) -> u64;

    fn write(&self, writer: &mut BitWriter<'_>, layout: &PageLayout);

    fn read(reader: &mut BitReader<'_>, layout: &PageLayout) -> Self;
}

/// Leaf tuples that reference an event in the event log
pub trait EventTuple: IndexTuple {
    fn pointer(&self) -> u64;

    /// Role code, 0 when the index carries no roles
    fn role(&self) -> u8 {
        0
    }
}

/// Key plus a 64-bit record pointer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StdTuple {
    pub key: u64,
    pub pointer: u64,
}

impl IndexTuple for StdTuple {
    fn bits(_layout: &PageLayout) -> usize {
        128
    }

    fn key(&self) -> u64 {
        self.key
    }

    fn write(&self, writer: &mut BitWriter<'_>, _layout: &PageLayout) {
        writer.write(self.key, 64);
        writer.write(self.pointer, 64);
    }

    fn read(reader: &mut BitReader<'_>, _layout: &PageLayout) -> Self {
        let key = reader.read(64);
        let pointer = reader.read(64);
        Self { key, pointer }
    }
}

impl EventTuple for StdTuple {
    fn pointer(&self) -> u64 {
        self.pointer
    }
}

/// Standard tuple with the role the indexed value played in the event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoleTuple {
    pub key: u64,
    pub pointer: u64,
    pub role: u8,
}

impl IndexTuple for RoleTuple {
    fn bits(_layout: &PageLayout) -> usize {
        136
    }

    fn key(&self) -> u64 {
        self.key
    }

    fn write(&self, writer: &mut BitWriter<'_>, _layout: &PageLayout) {
        writer.write(self.key, 64);
        writer.write(self.pointer, 64);
        writer.write(self.role as u64, 8);
    }

    fn read(reader: &mut BitReader<'_>, _layout: &PageLayout) -> Self {
        let key = reader.read(64);
        let pointer = reader.read(64);
        let role = reader.read(8) as u8;
        Self { key, pointer, role }
    }
}

impl EventTuple for RoleTuple {
    fn pointer(&self) -> u64 {
        self.pointer
    }

    fn role(&self) -> u8 {
        self.role
    }
}

/// Object reference: object sequence id to the sequence id of its class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefTuple {
    pub key: u64,
    pub class_id: u64,
}

impl IndexTuple for RefTuple {
    fn bits(_layout: &PageLayout) -> usize {
        128
    }

    fn key(&self) -> u64 {
        self.key
    }

    fn write(&self, writer: &mut BitWriter<'_>, _layout: &PageLayout) {
        writer.write(self.key, 64);
        writer.write(self.class_id, 64);
    }

    fn read(reader: &mut BitReader<'_>, _layout: &PageLayout) -> Self {
        let key = reader.read(64);
        let class_id = reader.read(64);
        Self { key, class_id }
    }
}

/// Non-leaf tuple: first key of a child page and the child's id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InternalTuple {
    pub key: u64,
    pub page: PageId,
}

impl IndexTuple for InternalTuple {
    fn bits(layout: &PageLayout) -> usize {
        64 + layout.pointer_bits()
    }

    fn key(&self) -> u64 {
        self.key
    }

    fn write(&self, writer: &mut BitWriter<'_>, layout: &PageLayout) {
        writer.write(self.key, 64);
        writer.write(self.page as u64, layout.pointer_bits());
    }

    fn read(reader: &mut BitReader<'_>, layout: &PageLayout) -> Self {
        let key = reader.read(64);
        let page = reader.read(layout.pointer_bits()) as PageId;
        Self { key, page }
    }
}
