//! Reading store abstraction.
//!
//! Backends own their synchronization: every call is one atomic unit with
//! respect to all other calls on the same store, so callers never lock.

use std::sync::Arc;

use thermolog_common::{NewReading, Reading};
use thiserror::Error;

/// Number of readings served by the history endpoint unless configured otherwise.
pub const DEFAULT_HISTORY_LIMIT: usize = 100;

/// Storage errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Store is closed")]
    Closed,

    #[error("Storage task failed: {0}")]
    Task(String),
}

/// Durable, ordered, concurrency-safe persistence of sensor readings.
///
/// # Implementations
///
/// - `SqliteStore` -- file-backed or in-memory SQLite
pub trait ReadingStore: Send + Sync {
    /// Append a reading and return its id.
    ///
    /// Ids are strictly increasing in insertion order. The row is durable
    /// once this returns.
    fn append(&self, reading: &NewReading) -> Result<i64, StoreError>;

    /// The most recently appended reading, or `None` if the store is empty.
    fn latest(&self) -> Result<Option<Reading>, StoreError>;

    /// Up to `limit` most recent readings, newest first.
    fn history(&self, limit: usize) -> Result<Vec<Reading>, StoreError>;

    /// Total number of stored readings.
    fn count(&self) -> Result<usize, StoreError>;

    /// Release the underlying storage handle.
    ///
    /// Every later call fails with [`StoreError::Closed`].
    fn close(&self) -> Result<(), StoreError>;
}

/// Shareable store handle.
pub type SharedStore = Arc<dyn ReadingStore>;

/// Run a store operation on the blocking thread pool.
///
/// SQLite calls block; running them here keeps a slow disk from stalling
/// the subscriber loop or the HTTP workers.
pub async fn run_blocking<T, F>(store: &SharedStore, op: F) -> Result<T, StoreError>
where
    T: Send + 'static,
    F: FnOnce(&dyn ReadingStore) -> Result<T, StoreError> + Send + 'static,
{
    let store = Arc::clone(store);
    tokio::task::spawn_blocking(move || op(store.as_ref()))
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
}
