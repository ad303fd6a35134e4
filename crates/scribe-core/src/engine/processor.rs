use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::engine::orchestrator::Inner;
use crate::engine::runner::{JobOutcome, JobSpec};
use crate::engine::types::{EngineError, StoredTask, TaskPatch, TaskStatus};
use crate::services::subtitle;

/// Sleep between polls while the queue is empty or the slot is taken.
const IDLE_SLEEP: Duration = Duration::from_secs(1);

/// Pause after an iteration that failed for an unexpected reason, so a
/// persistent storage problem cannot spin the loop hot.
const ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// The queue processor: drains the FIFO one task at a time, forever.
///
/// Each iteration either runs exactly one task to a terminal state or
/// sleeps. Whatever happens inside a run, the slot is released and the
/// cancellation flag is dropped before the next iteration, so a single
/// bad task can never wedge the queue.
pub(crate) async fn run(inner: Arc<Inner>) {
    info!("queue processor started");
    loop {
        let Some(taken) = inner.queue.dequeue_next() else {
            tokio::time::sleep(IDLE_SLEEP).await;
            continue;
        };
        inner.apply_renumbering(&taken.renumbered).await;

        let task_id = taken.task_id;
        let result = process_one(&inner, &task_id).await;

        inner.queue.release(&task_id);
        inner.flags.remove(&task_id);

        if let Err(e) = result {
            error!(task_id, error = %e, "processing iteration failed");
            tokio::time::sleep(ERROR_BACKOFF).await;
        }
    }
}

/// Drive one task from the head of the queue to a terminal state.
async fn process_one(inner: &Inner, task_id: &str) -> Result<(), EngineError> {
    // The flag exists before the status flips to processing, so any cancel
    // arriving from here on can reach the run.
    let cancel = inner.flags.create(task_id);

    if !inner.registry.mark_processing(task_id).await {
        // Cancelled between admission and dequeue; nothing to run.
        info!(task_id, "task no longer runnable, skipping");
        return Ok(());
    }
    inner
        .patch_store(
            task_id,
            TaskPatch {
                status: Some(TaskStatus::Processing),
                queue_position: Some(None),
                started_at: Some(Utc::now()),
                ..Default::default()
            },
        )
        .await;
    info!(task_id, "task started processing");

    let row = match inner.store.fetch(task_id).await {
        Ok(Some(row)) => row,
        Ok(None) => {
            finish_failure(inner, task_id, None, "task has no durable record").await;
            return Ok(());
        }
        Err(e) => {
            finish_failure(inner, task_id, None, &format!("storage read failed: {e}")).await;
            return Err(e.into());
        }
    };
    let Some(audio_path) = row.audio_path.clone() else {
        finish_failure(inner, task_id, None, "task has no recorded audio file").await;
        return Ok(());
    };

    let spec = JobSpec {
        task_id: task_id.to_string(),
        audio_path: PathBuf::from(audio_path),
        output_dir: inner.output_dir.clone(),
        language: row.language.clone(),
    };

    match inner.executor.run(spec, cancel).await {
        Ok(JobOutcome::Completed { srt_path }) => {
            finish_success(inner, task_id, &row, srt_path).await;
        }
        Ok(JobOutcome::Cancelled) => {
            // The cancel path already wrote the terminal state.
            info!(task_id, "run stopped by cancellation");
            cleanup_partial(inner, &row).await;
        }
        Err(e) => {
            finish_failure(inner, task_id, Some(&row), &e.to_string()).await;
        }
    }
    Ok(())
}

/// Post-processing after a clean tool exit: move the subtitle to its
/// permanent name, optionally summarize it, then mark the task completed.
async fn finish_success(inner: &Inner, task_id: &str, row: &StoredTask, produced: PathBuf) {
    let final_path = match &row.srt_path {
        Some(stored) if Path::new(stored) != produced.as_path() => {
            let target = PathBuf::from(stored);
            match tokio::fs::rename(&produced, &target).await {
                Ok(()) => target,
                Err(e) => {
                    warn!(task_id, error = %e, "could not move subtitle into place");
                    produced
                }
            }
        }
        Some(stored) => PathBuf::from(stored),
        None => produced,
    };

    let summary = summarize(inner, task_id, &final_path).await;

    let srt_file = final_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let mut result = serde_json::json!({
        "audio_file": row.audio_path,
        "srt_file": srt_file,
        "srt_path": final_path.to_string_lossy(),
    });
    if let Some(summary) = summary {
        result["summary"] = serde_json::Value::String(summary);
    }

    if inner.registry.mark_completed(task_id, result.clone()).await {
        inner
            .patch_store(
                task_id,
                TaskPatch {
                    status: Some(TaskStatus::Completed),
                    progress: Some(100),
                    current_step: Some("Completed".to_string()),
                    queue_position: Some(None),
                    completed_at: Some(Utc::now()),
                    result: Some(result),
                    srt_path: Some(final_path.to_string_lossy().to_string()),
                    ..Default::default()
                },
            )
            .await;
        info!(task_id, "task completed");
    } else {
        info!(task_id, "completion discarded, task already reached a terminal state");
    }
}

/// Best-effort summary of the finished transcript. Never fails the task.
async fn summarize(inner: &Inner, task_id: &str, srt_path: &Path) -> Option<String> {
    let client = inner.summary.as_ref()?;
    if !client.is_available().await {
        debug!(task_id, "summary service unreachable, skipping");
        return None;
    }
    let srt = match tokio::fs::read_to_string(srt_path).await {
        Ok(srt) => srt,
        Err(e) => {
            warn!(task_id, error = %e, "could not read subtitle for summary");
            return None;
        }
    };
    let text = subtitle::extract_text(&srt);
    if text.is_empty() {
        return None;
    }
    match client.generate(&text).await {
        Ok(summary) => Some(summary),
        Err(e) => {
            warn!(task_id, error = %e, "summary generation failed");
            None
        }
    }
}

async fn finish_failure(inner: &Inner, task_id: &str, row: Option<&StoredTask>, error: &str) {
    if inner.registry.mark_failed(task_id, error).await {
        inner
            .patch_store(
                task_id,
                TaskPatch {
                    status: Some(TaskStatus::Failed),
                    current_step: Some("Failed".to_string()),
                    queue_position: Some(None),
                    completed_at: Some(Utc::now()),
                    error_message: Some(error.to_string()),
                    ..Default::default()
                },
            )
            .await;
        error!(task_id, error, "task failed");
    }
    if let Some(row) = row {
        cleanup_partial(inner, row).await;
    }
}

/// Remove the tool's stem-named subtitle if one was left behind. Failures
/// are logged and swallowed.
async fn cleanup_partial(inner: &Inner, row: &StoredTask) {
    let Some(audio) = &row.audio_path else {
        return;
    };
    let Some(stem) = Path::new(audio).file_stem() else {
        return;
    };
    let candidate = inner
        .output_dir
        .join(format!("{}.srt", stem.to_string_lossy()));
    match tokio::fs::remove_file(&candidate).await {
        Ok(()) => debug!(path = %candidate.display(), "removed partial output"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %candidate.display(), error = %e, "partial output cleanup failed"),
    }
}
