//! API Routes
//!
//! Route handlers organized by functionality. Master and node calls take
//! locks and may wait on other nodes, so handlers run them through
//! [`blocking`] instead of on the async workers.

pub mod cluster;
pub mod events;
pub mod health;
pub mod objects;

use crate::api::error::{ApiError, ApiResult};
use crate::storage::StorageResult;

/// Run a storage call on the blocking thread pool
pub(crate) async fn blocking<T, F>(task: F) -> ApiResult<T>
where
    F: FnOnce() -> StorageResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|e| ApiError::Internal(format!("Task failed: {}", e)))?
        .map_err(ApiError::from)
}
