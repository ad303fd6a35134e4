use serde::Serialize;
use utoipa::ToSchema;

use scribe_core::{StoredTask, TaskRecord};

/// Live view of one task, served from the in-memory registry.
#[derive(Debug, Serialize, ToSchema)]
pub struct TaskResponse {
    pub task_id: String,
    pub filename: String,
    pub group_id: Option<String>,
    pub status: String,
    pub progress: u8,
    pub current_step: String,
    /// 1-based place in the waiting line; absent once processing starts.
    pub queue_position: Option<u32>,
    pub created_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub estimated_completion_time: Option<String>,
    pub error_message: Option<String>,
    pub result: Option<serde_json::Value>,
}

impl From<TaskRecord> for TaskResponse {
    fn from(record: TaskRecord) -> Self {
        Self {
            task_id: record.task_id,
            filename: record.filename,
            group_id: record.group_id,
            status: record.status.to_string(),
            progress: record.progress,
            current_step: record.current_step,
            queue_position: record.queue_position,
            created_at: record.created_at.to_rfc3339(),
            started_at: record.started_at.map(|t| t.to_rfc3339()),
            completed_at: record.completed_at.map(|t| t.to_rfc3339()),
            estimated_completion_time: record
                .estimated_completion_time
                .map(|t| t.to_rfc3339()),
            error_message: record.error_message,
            result: record.result,
        }
    }
}

/// Durable rows answer status polls after a restart dropped the live entry.
impl From<StoredTask> for TaskResponse {
    fn from(row: StoredTask) -> Self {
        Self {
            task_id: row.task_id,
            filename: row.filename,
            group_id: row.group_id,
            status: row.status.to_string(),
            progress: row.progress,
            current_step: row.current_step,
            queue_position: row.queue_position,
            created_at: row.created_at.to_rfc3339(),
            started_at: row.started_at.map(|t| t.to_rfc3339()),
            completed_at: row.completed_at.map(|t| t.to_rfc3339()),
            estimated_completion_time: row
                .estimated_completion_time
                .map(|t| t.to_rfc3339()),
            error_message: row.error_message,
            result: row.result,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct ActiveTasksResponse {
    pub count: usize,
    pub tasks: Vec<TaskResponse>,
}
