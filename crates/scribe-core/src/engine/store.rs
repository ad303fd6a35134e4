use async_trait::async_trait;

use crate::engine::types::{NewTask, StoreError, StoredTask, TaskPatch, TaskStatus};

/// Filters for the durable listing used by the HTTP API.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub group_id: Option<String>,
}

/// The engine's boundary with durable storage.
///
/// The engine treats the store as an opaque read/update interface keyed by
/// `task_id`; it never depends on the backing schema beyond the fields of
/// [`StoredTask`]. The server provides the SQLite implementation; tests
/// provide an in-memory one.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Persist a freshly created task (status starts as `pending`).
    async fn insert(&self, task: NewTask) -> Result<(), StoreError>;

    /// Read one row; `Ok(None)` when the id is unknown.
    async fn fetch(&self, task_id: &str) -> Result<Option<StoredTask>, StoreError>;

    /// Apply a partial update to one row.
    ///
    /// Returns [`StoreError::NotFound`] when the id is unknown; an empty
    /// patch is a no-op.
    async fn apply(&self, task_id: &str, patch: TaskPatch) -> Result<(), StoreError>;

    /// All rows currently in `status`, oldest first.
    ///
    /// Recovery relies on the ascending order to rebuild the FIFO in
    /// original admission order.
    async fn list_by_status(&self, status: TaskStatus) -> Result<Vec<StoredTask>, StoreError>;

    /// Filtered listing for the API, newest first.
    async fn list_recent(&self, filter: TaskFilter) -> Result<Vec<StoredTask>, StoreError>;

    /// Delete one row; returns `true` when a row was removed.
    async fn delete(&self, task_id: &str) -> Result<bool, StoreError>;
}
