use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use scribe_core::StoredTask;

/// Returned with HTTP 202 when an upload has been accepted.
#[derive(Serialize, ToSchema)]
pub struct SubmitResponse {
    pub task_id: String,
    pub status: String,
    pub message: String,
    /// Poll this path for progress.
    pub status_url: String,
}

/// One durable transcription record.
#[derive(Serialize, ToSchema)]
pub struct TranscriptionResponse {
    pub task_id: String,
    pub title: Option<String>,
    pub filename: String,
    pub group_id: Option<String>,
    pub status: String,
    pub progress: u8,
    pub current_step: String,
    pub queue_position: Option<u32>,
    pub language: Option<String>,
    pub error_message: Option<String>,
    pub result: Option<serde_json::Value>,
    pub extra_metadata: Option<serde_json::Value>,
    pub created_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub estimated_completion_time: Option<String>,
    pub updated_at: String,
}

impl From<StoredTask> for TranscriptionResponse {
    fn from(row: StoredTask) -> Self {
        Self {
            task_id: row.task_id,
            title: row.title,
            filename: row.filename,
            group_id: row.group_id,
            status: row.status.to_string(),
            progress: row.progress,
            current_step: row.current_step,
            queue_position: row.queue_position,
            language: row.language,
            error_message: row.error_message,
            result: row.result,
            extra_metadata: row.extra_metadata,
            created_at: row.created_at.to_rfc3339(),
            started_at: row.started_at.map(|t| t.to_rfc3339()),
            completed_at: row.completed_at.map(|t| t.to_rfc3339()),
            estimated_completion_time: row
                .estimated_completion_time
                .map(|t| t.to_rfc3339()),
            updated_at: row.updated_at.to_rfc3339(),
        }
    }
}

/// Query filters for the listing endpoint.
#[derive(Deserialize, ToSchema, IntoParams)]
pub struct ListQuery {
    /// Filter by lifecycle status (`pending`, `queued`, `processing`,
    /// `completed`, `failed`, `cancelled`).
    pub status: Option<String>,
    /// Filter by the submitter-chosen group label.
    pub group_id: Option<String>,
}

/// Caller-editable metadata; everything else is owned by the engine.
#[derive(Deserialize, ToSchema, Validate)]
pub struct UpdateTranscriptionRequest {
    #[validate(length(min = 1, max = 200))]
    pub title: Option<String>,
    #[validate(length(min = 2, max = 16))]
    pub language: Option<String>,
}
