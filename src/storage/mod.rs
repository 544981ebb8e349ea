//! Storage primitives
//!
//! This module provides the building blocks shared by every index and database:
//!
//! - **types**: Event model (Event, EventKind, ObjectId, roles)
//! - **bits**: Bit-level packing used by page layouts
//! - **page**: Fixed-size pages in a shared paged file
//! - **log**: Append-only record log holding serialized events and objects
//! - **error**: Error types
//!
//! # Architecture
//!
//! ```text
//! Write Path:
//!   Event → EventStore (bincode, pointer) → index tuples → PagedFile pages
//!
//! Read Path:
//!   Index descent → page snapshots → tuple pointers → EventStore
//! ```

pub mod bits;
pub mod error;
pub mod log;
pub mod page;
pub mod types;

// Re-export commonly used types
pub use bits::{log2_ceil, BitReader, BitWriter};
pub use error::{StorageError, StorageResult};
pub use log::{EventStore, RecordLog};
pub use page::{Page, PageId, PageLayout, PagedFile};
pub use types::{
    thread_key, BehaviorRole, Event, EventKind, EventKindTag, Location, ObjectId, ObjectRole,
};
