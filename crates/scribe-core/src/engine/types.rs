use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifecycle state of a transcription task.
///
/// Transitions run `Pending → Queued → Processing → {Completed | Failed |
/// Cancelled}`. A task may move to `Cancelled` from any non-terminal state.
/// The only backward edge is applied by startup recovery, which re-queues
/// tasks that were durably `Processing` when the process died.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TaskStatus {
    /// Created, not yet admitted to the queue.
    Pending,
    /// Admitted, waiting for the processing slot.
    Queued,
    /// Holds the slot; the external tool is running.
    Processing,
    /// Finished successfully; `result` is populated.
    Completed,
    /// Finished with an error; `error_message` is populated.
    Failed,
    /// Stopped on request before completing.
    Cancelled,
}

impl TaskStatus {
    /// Returns `true` once the task can no longer change state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// Returns `true` while a cancellation request is still meaningful.
    pub fn is_cancellable(&self) -> bool {
        matches!(
            self,
            TaskStatus::Pending | TaskStatus::Queued | TaskStatus::Processing
        )
    }

    /// Returns `true` for the states shown in the active-task listing.
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }
}

/// The in-memory record for a single task, owned by the registry.
///
/// `progress` is non-decreasing within a run. `queue_position` is `Some`
/// exactly while `status == Queued` and always reflects the task's 1-based
/// rank in the current FIFO.
#[derive(Debug, Clone)]
pub struct TaskRecord {
    pub task_id: String,
    pub filename: String,
    pub group_id: Option<String>,
    pub status: TaskStatus,
    pub progress: u8,
    pub current_step: String,
    pub queue_position: Option<u32>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub estimated_completion_time: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub result: Option<serde_json::Value>,
}

/// A partial update applied to a task's durable row.
///
/// `None` fields are left unchanged. `queue_position` is doubly optional so
/// a patch can distinguish "leave as is" (`None`) from "clear to NULL"
/// (`Some(None)`).
#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    pub status: Option<TaskStatus>,
    pub progress: Option<u8>,
    pub current_step: Option<String>,
    pub queue_position: Option<Option<u32>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub estimated_completion_time: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub result: Option<serde_json::Value>,
    pub title: Option<String>,
    pub language: Option<String>,
    pub audio_path: Option<String>,
    pub srt_path: Option<String>,
    pub extra_metadata: Option<serde_json::Value>,
}

impl TaskPatch {
    /// Returns `true` when no field is populated.
    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.progress.is_none()
            && self.current_step.is_none()
            && self.queue_position.is_none()
            && self.started_at.is_none()
            && self.completed_at.is_none()
            && self.estimated_completion_time.is_none()
            && self.error_message.is_none()
            && self.result.is_none()
            && self.title.is_none()
            && self.language.is_none()
            && self.audio_path.is_none()
            && self.srt_path.is_none()
            && self.extra_metadata.is_none()
    }
}

/// Fields persisted when a task is first created.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub task_id: String,
    pub title: Option<String>,
    pub filename: String,
    pub group_id: Option<String>,
    pub audio_path: Option<String>,
    pub srt_path: Option<String>,
    pub language: Option<String>,
    pub extra_metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// A full durable row as read back from storage.
#[derive(Debug, Clone)]
pub struct StoredTask {
    pub task_id: String,
    pub title: Option<String>,
    pub filename: String,
    pub group_id: Option<String>,
    pub status: TaskStatus,
    pub progress: u8,
    pub current_step: String,
    pub queue_position: Option<u32>,
    pub audio_path: Option<String>,
    pub srt_path: Option<String>,
    pub language: Option<String>,
    pub error_message: Option<String>,
    pub result: Option<serde_json::Value>,
    pub extra_metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub estimated_completion_time: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// A progress report emitted by the job runner's worker thread.
///
/// Updates cross the thread boundary over an unbounded channel and are
/// applied to the registry and the durable store by a single writer task,
/// so the worker never blocks on a lock or a database handle.
#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    pub task_id: String,
    pub progress: u8,
    pub step: String,
    pub eta: Option<DateTime<Utc>>,
}

/// Errors surfaced by the durable-store boundary.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The referenced row does not exist.
    #[error("task not found: {task_id}")]
    NotFound { task_id: String },

    /// The backing store failed; the message carries the driver detail.
    #[error("storage backend: {0}")]
    Backend(String),
}

/// Errors produced by the orchestration engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The referenced task is not in the registry.
    #[error("task not found: {task_id}")]
    TaskNotFound { task_id: String },

    /// Cancellation was requested for a task already in a terminal state.
    #[error("task {task_id} is {status}, which cannot be cancelled")]
    NotCancellable { task_id: String, status: TaskStatus },

    /// The durable store rejected an operation.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The external tool could not be started.
    #[error("failed to spawn `{command}`: {message}")]
    Spawn { command: String, message: String },

    /// The external tool exited unsuccessfully.
    #[error("transcription tool exited with {code}: {detail}")]
    ToolFailed { code: String, detail: String },

    /// An expected output artifact was not produced.
    #[error("missing output: {0}")]
    MissingOutput(String),

    /// Filesystem operation failed.
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// The blocking worker for a task panicked.
    #[error("worker thread panicked while running task {task_id}")]
    WorkerPanic { task_id: String },
}
