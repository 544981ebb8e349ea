//! Storage error types
//!
//! Defines all errors that can occur in the storage layer. Dropped entries
//! and cancelled flushes are not errors: they surface as counters and as
//! early returns respectively.

use thiserror::Error;

/// Errors that can occur in the storage layer
#[derive(Error, Debug)]
pub enum StorageError {
    /// I/O operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Data corruption detected (checksum mismatch, invalid magic, dangling page, etc.)
    #[error("Corrupt data: {0}")]
    Corruption(String),

    /// Page pointer space or tree height exhausted; the index cannot grow further
    #[error("Capacity exhausted: {0}")]
    CapacityExhausted(String),

    /// A node registration was refused by the master's policy
    #[error("Node rejected: {0}")]
    NodeRejected(String),

    /// Nodes disagree about data that must live on exactly one of them
    #[error("Inconsistent cluster: {0}")]
    InconsistentCluster(String),

    /// Requested record does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Lock acquisition failed
    #[error("Lock error: {0}")]
    Lock(String),
}

impl From<bincode::Error> for StorageError {
    fn from(err: bincode::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for StorageError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        StorageError::Lock(err.to_string())
    }
}

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;
