use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::warn;

use crate::engine::registry::TaskRegistry;
use crate::engine::store::TaskStore;
use crate::engine::types::{ProgressUpdate, TaskPatch};

/// Spawn the single writer that applies progress reports.
///
/// Worker threads never touch the registry or the store themselves; they
/// send [`ProgressUpdate`]s into this channel and the writer applies them
/// on the runtime. The registry is the gate: an update it refuses (unknown
/// task, or one already in a terminal state) is dropped without reaching
/// the store, so late reports from a dying process cannot resurrect a
/// finished row.
pub(crate) fn spawn_update_writer(
    registry: TaskRegistry,
    store: Arc<dyn TaskStore>,
) -> mpsc::UnboundedSender<ProgressUpdate> {
    let (tx, mut rx) = mpsc::unbounded_channel::<ProgressUpdate>();
    tokio::spawn(async move {
        while let Some(update) = rx.recv().await {
            let applied = registry
                .update_progress(&update.task_id, update.progress, &update.step, update.eta)
                .await;
            if !applied {
                continue;
            }
            let patch = TaskPatch {
                progress: Some(update.progress),
                current_step: Some(update.step),
                estimated_completion_time: update.eta,
                ..Default::default()
            };
            if let Err(e) = store.apply(&update.task_id, patch).await {
                warn!(task_id = %update.task_id, error = %e, "progress write failed");
            }
        }
    });
    tx
}
