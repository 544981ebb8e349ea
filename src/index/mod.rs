//! Hierarchical index structures
//!
//! Every index in TraceGrid is a [`HierarchicalIndex`]: fixed-width tuples
//! packed into pages of a shared [`PagedFile`](crate::storage::PagedFile),
//! with one level of internal tuples per page of the level below.
//!
//! - **tuple**: Tuple codecs (standard, role, reference, internal)
//! - **finder**: Binary search within a page
//! - **writer**: Append-only per-level page writer
//! - **iterator**: Bidirectional cursor over the leaf chain
//! - **counter**: Approximate histogram over a key range
//! - **hierarchical**: The index itself and its lock-free views
//! - **index_set**: Lazily created indexes keyed by an indexed value
//!
//! # Architecture
//!
//! ```text
//! add(tuple) → leaf writer ──(page full)──→ parent writer ──→ ... root
//!
//! tuple_iterator(key):
//!   root ──find──→ internal ──find──→ leaf page ──→ TupleIterator
//!                                                  ⇄ prev/next links
//! ```

mod counter;
pub mod finder;
pub mod hierarchical;
pub mod index_set;
pub mod iterator;
pub mod tuple;
mod writer;

pub use finder::{Located, Match, NoMatch};
pub use hierarchical::{HierarchicalIndex, IndexView, MAX_INDEX_LEVELS};
pub use index_set::IndexSet;
pub use iterator::TupleIterator;
pub use tuple::{EventTuple, IndexTuple, InternalTuple, RefTuple, RoleTuple, StdTuple};
