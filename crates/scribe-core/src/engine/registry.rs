use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::engine::types::{TaskRecord, TaskStatus};

/// Step label a task carries before any progress arrives.
pub const STEP_WAITING: &str = "Waiting to start";

/// Centralized, thread-safe in-memory registry of task records.
///
/// Uses a `tokio::sync::RwLock<HashMap>` so many readers (status endpoints)
/// can observe tasks concurrently while the engine's writers update them.
/// Lifecycle markers are first-terminal-wins: once a record reaches a
/// terminal state every later mark or progress write is refused, which is
/// what keeps a late progress report from resurrecting a cancelled task.
#[derive(Debug, Clone, Default)]
pub struct TaskRegistry {
    inner: Arc<RwLock<HashMap<String, TaskRecord>>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a fresh `Pending` record and return its generated id.
    pub async fn create_task(&self, filename: &str, group_id: Option<&str>) -> String {
        let task_id = Uuid::new_v4().to_string();
        let record = TaskRecord {
            task_id: task_id.clone(),
            filename: filename.to_string(),
            group_id: group_id.map(str::to_string),
            status: TaskStatus::Pending,
            progress: 0,
            current_step: STEP_WAITING.to_string(),
            queue_position: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            estimated_completion_time: None,
            error_message: None,
            result: None,
        };
        self.inner.write().await.insert(task_id.clone(), record);
        task_id
    }

    /// Reinsert a record reconstructed from durable storage.
    ///
    /// Recovery preserves `task_id`, `filename`, `group_id` and `created_at`
    /// from the stored row; the record re-enters the state machine as
    /// `Pending` and is re-admitted through the normal queue path.
    pub async fn insert_restored(&self, record: TaskRecord) {
        self.inner
            .write()
            .await
            .insert(record.task_id.clone(), record);
    }

    /// Pure lookup; returns a clone of the record.
    pub async fn get_task(&self, task_id: &str) -> Option<TaskRecord> {
        self.inner.read().await.get(task_id).cloned()
    }

    /// Overwrite progress, step label and the advisory completion estimate.
    ///
    /// No-op (returning `false`) when the task is unknown or already
    /// terminal.
    pub async fn update_progress(
        &self,
        task_id: &str,
        progress: u8,
        step: &str,
        eta: Option<DateTime<Utc>>,
    ) -> bool {
        let mut guard = self.inner.write().await;
        let Some(record) = guard.get_mut(task_id) else {
            return false;
        };
        if record.status.is_terminal() {
            return false;
        }
        record.progress = progress;
        record.current_step = step.to_string();
        if eta.is_some() {
            record.estimated_completion_time = eta;
        }
        true
    }

    /// Mark a task admitted to the queue at the given 1-based position.
    pub async fn mark_queued(&self, task_id: &str, position: u32) -> bool {
        let mut guard = self.inner.write().await;
        let Some(record) = guard.get_mut(task_id) else {
            return false;
        };
        if record.status.is_terminal() {
            return false;
        }
        record.status = TaskStatus::Queued;
        record.queue_position = Some(position);
        true
    }

    /// Refresh the reported position of a task that is still waiting.
    pub async fn set_queue_position(&self, task_id: &str, position: u32) {
        if let Some(record) = self.inner.write().await.get_mut(task_id) {
            if record.status == TaskStatus::Queued {
                record.queue_position = Some(position);
            }
        }
    }

    /// Promote a task into the processing slot; sets `started_at` once.
    pub async fn mark_processing(&self, task_id: &str) -> bool {
        let mut guard = self.inner.write().await;
        let Some(record) = guard.get_mut(task_id) else {
            return false;
        };
        if record.status.is_terminal() {
            return false;
        }
        record.status = TaskStatus::Processing;
        record.queue_position = None;
        if record.started_at.is_none() {
            record.started_at = Some(Utc::now());
        }
        true
    }

    /// Terminal transition: success with a result payload.
    pub async fn mark_completed(&self, task_id: &str, result: serde_json::Value) -> bool {
        self.mark_terminal(task_id, TaskStatus::Completed, |record| {
            record.progress = 100;
            record.current_step = "Completed".to_string();
            record.result = Some(result);
        })
        .await
    }

    /// Terminal transition: failure with a captured message.
    pub async fn mark_failed(&self, task_id: &str, error: &str) -> bool {
        let error = error.to_string();
        self.mark_terminal(task_id, TaskStatus::Failed, |record| {
            record.current_step = "Failed".to_string();
            record.error_message = Some(error);
        })
        .await
    }

    /// Terminal transition: cancelled on request.
    pub async fn mark_cancelled(&self, task_id: &str) -> bool {
        self.mark_terminal(task_id, TaskStatus::Cancelled, |record| {
            record.current_step = "Cancelled".to_string();
        })
        .await
    }

    /// Records whose status is not yet terminal, for the active listing.
    pub async fn active_tasks(&self) -> Vec<TaskRecord> {
        let guard = self.inner.read().await;
        let mut tasks: Vec<TaskRecord> = guard
            .values()
            .filter(|record| record.status.is_active())
            .cloned()
            .collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        tasks
    }

    async fn mark_terminal(
        &self,
        task_id: &str,
        status: TaskStatus,
        apply: impl FnOnce(&mut TaskRecord),
    ) -> bool {
        let mut guard = self.inner.write().await;
        let Some(record) = guard.get_mut(task_id) else {
            return false;
        };
        if record.status.is_terminal() {
            return false;
        }
        record.status = status;
        record.queue_position = None;
        record.estimated_completion_time = None;
        record.completed_at = Some(Utc::now());
        apply(record);
        true
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn create_then_lookup() {
        let registry = TaskRegistry::new();
        let id = registry.create_task("meeting1.mp3", Some("g1")).await;

        let record = registry.get_task(&id).await.expect("record exists");
        assert_eq!(record.status, TaskStatus::Pending);
        assert_eq!(record.filename, "meeting1.mp3");
        assert_eq!(record.group_id.as_deref(), Some("g1"));
        assert_eq!(record.progress, 0);
        assert_eq!(record.current_step, STEP_WAITING);
        assert!(record.queue_position.is_none());
    }

    #[tokio::test]
    async fn progress_updates_are_refused_after_terminal() {
        let registry = TaskRegistry::new();
        let id = registry.create_task("a.mp3", None).await;

        assert!(registry.update_progress(&id, 40, "Transcribing audio", None).await);
        assert!(registry.mark_cancelled(&id).await);
        assert!(!registry.update_progress(&id, 80, "Transcribing audio", None).await);

        let record = registry.get_task(&id).await.expect("record exists");
        assert_eq!(record.status, TaskStatus::Cancelled);
        assert_eq!(record.progress, 40);
    }

    #[tokio::test]
    async fn first_terminal_transition_wins() {
        let registry = TaskRegistry::new();
        let id = registry.create_task("a.mp3", None).await;

        assert!(registry.mark_cancelled(&id).await);
        assert!(!registry.mark_completed(&id, serde_json::json!({})).await);
        assert!(!registry.mark_failed(&id, "late failure").await);

        let record = registry.get_task(&id).await.expect("record exists");
        assert_eq!(record.status, TaskStatus::Cancelled);
        assert!(record.error_message.is_none());
    }

    #[tokio::test]
    async fn started_at_is_set_once() {
        let registry = TaskRegistry::new();
        let id = registry.create_task("a.mp3", None).await;

        registry.mark_queued(&id, 1).await;
        registry.mark_processing(&id).await;
        let first = registry.get_task(&id).await.unwrap().started_at;
        assert!(first.is_some());

        registry.mark_processing(&id).await;
        let second = registry.get_task(&id).await.unwrap().started_at;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn completion_pins_progress_and_result() {
        let registry = TaskRegistry::new();
        let id = registry.create_task("a.mp3", None).await;
        registry.mark_queued(&id, 1).await;
        registry.mark_processing(&id).await;

        let payload = serde_json::json!({ "srt_path": "/out/a.srt" });
        assert!(registry.mark_completed(&id, payload.clone()).await);

        let record = registry.get_task(&id).await.expect("record exists");
        assert_eq!(record.status, TaskStatus::Completed);
        assert_eq!(record.progress, 100);
        assert_eq!(record.result, Some(payload));
        assert!(record.completed_at.is_some());
        assert!(record.queue_position.is_none());
    }

    #[tokio::test]
    async fn active_listing_skips_terminal_tasks() {
        let registry = TaskRegistry::new();
        let keep = registry.create_task("keep.mp3", None).await;
        let done = registry.create_task("done.mp3", None).await;
        registry.mark_queued(&done, 1).await;
        registry.mark_processing(&done).await;
        registry.mark_completed(&done, serde_json::json!({})).await;

        let active = registry.active_tasks().await;
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].task_id, keep);
    }
}
