use tracing::{info, warn};

use crate::engine::orchestrator::Orchestrator;
use crate::engine::registry::STEP_WAITING;
use crate::engine::types::{StoredTask, TaskPatch, TaskRecord, TaskStatus};

/// Step label written onto rows that were mid-run when the process died.
const STEP_INTERRUPTED: &str = "Interrupted, re-queued";

impl Orchestrator {
    /// Rebuild queue state from durable rows after a restart.
    ///
    /// Two passes, in FIFO-preserving order: rows still `queued` (oldest
    /// first) are re-admitted as they were, then rows stuck in `processing`
    /// are repaired back to `queued` behind them. Everything is best-effort;
    /// a failure to restore one task is logged and must not block the rest.
    /// Returns the number of tasks put back in line.
    pub async fn recover(&self) -> usize {
        let mut restored = 0;

        match self.inner.store.list_by_status(TaskStatus::Queued).await {
            Ok(rows) => {
                for row in rows {
                    if self.restore_and_admit(&row, None).await {
                        restored += 1;
                    }
                }
            }
            Err(e) => warn!(error = %e, "recovery could not list queued tasks"),
        }

        match self.inner.store.list_by_status(TaskStatus::Processing).await {
            Ok(rows) => {
                for row in rows {
                    // Interrupted mid-run: no process survived the restart,
                    // so the durable state is rewritten and the work redone.
                    if self.restore_and_admit(&row, Some(STEP_INTERRUPTED)).await {
                        restored += 1;
                    }
                }
            }
            Err(e) => warn!(error = %e, "recovery could not list interrupted tasks"),
        }

        if restored > 0 {
            info!(restored, "recovery re-admitted interrupted tasks");
            self.ensure_processor_started();
        }
        restored
    }

    async fn restore_and_admit(&self, row: &StoredTask, note: Option<&str>) -> bool {
        let record = TaskRecord {
            task_id: row.task_id.clone(),
            filename: row.filename.clone(),
            group_id: row.group_id.clone(),
            status: TaskStatus::Pending,
            progress: 0,
            current_step: note.unwrap_or(STEP_WAITING).to_string(),
            queue_position: None,
            created_at: row.created_at,
            started_at: None,
            completed_at: None,
            estimated_completion_time: None,
            error_message: None,
            result: None,
        };
        self.inner.registry.insert_restored(record).await;

        if let Some(note) = note {
            self.inner
                .patch_store(
                    &row.task_id,
                    TaskPatch {
                        status: Some(TaskStatus::Queued),
                        current_step: Some(note.to_string()),
                        progress: Some(0),
                        ..Default::default()
                    },
                )
                .await;
        }

        match self.admit(&row.task_id).await {
            Ok(position) => {
                info!(task_id = %row.task_id, position, "re-admitted task");
                true
            }
            Err(e) => {
                warn!(task_id = %row.task_id, error = %e, "could not re-admit task");
                false
            }
        }
    }
}
