//! Ingestion reordering
//!
//! Producers deliver records that are ordered locally but disordered
//! globally. The buffers here hold a bounded window of records and hand
//! them back in order, dropping (and reporting) what arrives too late.
//!
//! - **buffer**: [`ReorderingBuffer`] for one monotonic-id stream (objects, references)
//! - **event_buffer**: [`EventReorderingBuffer`] merging many producer threads
//! - **ring**: Bounded FIFO shared by both

pub mod buffer;
pub mod event_buffer;
pub mod ring;

pub use buffer::{ReorderingBuffer, Sequenced};
pub use event_buffer::{DropReason, EventDropped, EventReorderingBuffer};
pub use ring::Ring;
