use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::engine::processor;
use crate::engine::queue::{QueueSnapshot, SlotQueue};
use crate::engine::registry::TaskRegistry;
use crate::engine::runner::{CancelFlag, JobExecutor, JobRunner, RunnerConfig};
use crate::engine::store::TaskStore;
use crate::engine::types::{EngineError, StoreError, TaskPatch, TaskRecord, TaskStatus};
use crate::engine::updates::spawn_update_writer;
use crate::services::summary::SummaryClient;

/// Cancellation flags for runs that are in flight, keyed by task id.
///
/// The processor creates a flag right before it starts a run; the cancel
/// path flips it from another task. Missing entries are fine on both
/// sides: a flag that was never created means the run never started.
#[derive(Default)]
pub(crate) struct CancelFlags {
    inner: Mutex<HashMap<String, CancelFlag>>,
}

impl CancelFlags {
    pub(crate) fn create(&self, task_id: &str) -> CancelFlag {
        let flag: CancelFlag = Arc::new(AtomicBool::new(false));
        if let Ok(mut map) = self.inner.lock() {
            map.insert(task_id.to_string(), Arc::clone(&flag));
        }
        flag
    }

    pub(crate) fn set(&self, task_id: &str) {
        if let Ok(map) = self.inner.lock() {
            if let Some(flag) = map.get(task_id) {
                flag.store(true, Ordering::Relaxed);
            }
        }
    }

    pub(crate) fn remove(&self, task_id: &str) {
        if let Ok(mut map) = self.inner.lock() {
            map.remove(task_id);
        }
    }
}

/// Shared state behind the [`Orchestrator`] facade.
pub(crate) struct Inner {
    pub(crate) registry: TaskRegistry,
    pub(crate) queue: SlotQueue,
    pub(crate) store: Arc<dyn TaskStore>,
    pub(crate) executor: Arc<dyn JobExecutor>,
    pub(crate) summary: Option<SummaryClient>,
    pub(crate) flags: CancelFlags,
    pub(crate) output_dir: PathBuf,
    started: AtomicBool,
}

impl Inner {
    /// Mirror a queue renumbering into the registry and the durable store.
    pub(crate) async fn apply_renumbering(&self, pairs: &[(String, u32)]) {
        for (task_id, position) in pairs {
            self.registry.set_queue_position(task_id, *position).await;
            self.patch_store(
                task_id,
                TaskPatch {
                    queue_position: Some(Some(*position)),
                    ..Default::default()
                },
            )
            .await;
        }
    }

    /// Best-effort durable update; the in-memory record stays authoritative
    /// for the current process. A missing row (a task that failed before it
    /// was ever persisted) is not an error.
    pub(crate) async fn patch_store(&self, task_id: &str, patch: TaskPatch) {
        match self.store.apply(task_id, patch).await {
            Ok(()) => {}
            Err(StoreError::NotFound { .. }) => {}
            Err(e) => warn!(task_id, error = %e, "durable update failed"),
        }
    }
}

/// Coordinates the task registry, the single-slot queue, the durable store
/// and the job executor.
///
/// Cheap to clone; all clones share one engine. The processor loop is
/// spawned lazily by the first admission (or by recovery) and runs for the
/// life of the process.
#[derive(Clone)]
pub struct Orchestrator {
    pub(crate) inner: Arc<Inner>,
}

impl Orchestrator {
    /// Assemble an engine around an arbitrary executor.
    ///
    /// Used directly by tests; production code goes through
    /// [`Orchestrator::with_runner`].
    pub fn new(
        registry: TaskRegistry,
        store: Arc<dyn TaskStore>,
        executor: Arc<dyn JobExecutor>,
        summary: Option<SummaryClient>,
        output_dir: PathBuf,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry,
                queue: SlotQueue::new(),
                store,
                executor,
                summary,
                flags: CancelFlags::default(),
                output_dir,
                started: AtomicBool::new(false),
            }),
        }
    }

    /// Assemble the production engine: a [`JobRunner`] wired to a progress
    /// writer that feeds both the registry and the durable store.
    ///
    /// Must be called from within a tokio runtime.
    pub fn with_runner(
        store: Arc<dyn TaskStore>,
        runner: RunnerConfig,
        summary: Option<SummaryClient>,
        output_dir: PathBuf,
    ) -> Self {
        let registry = TaskRegistry::new();
        let updates = spawn_update_writer(registry.clone(), Arc::clone(&store));
        let executor = Arc::new(JobRunner::new(runner, updates));
        Self::new(registry, store, executor, summary, output_dir)
    }

    /// Create a fresh `Pending` record and return its id.
    ///
    /// The record exists from this moment so status polls work while the
    /// caller is still converting and persisting the upload.
    pub async fn create_task(&self, filename: &str, group_id: Option<&str>) -> String {
        self.inner.registry.create_task(filename, group_id).await
    }

    /// Admit a task to the waiting line and make sure the processor runs.
    ///
    /// Returns the task's 1-based queue position. Re-admitting a task that
    /// is already waiting (or already holds the slot) is a no-op that
    /// reports its current position, `0` if it is the one being processed.
    pub async fn admit(&self, task_id: &str) -> Result<u32, EngineError> {
        let record = self
            .inner
            .registry
            .get_task(task_id)
            .await
            .ok_or_else(|| EngineError::TaskNotFound {
                task_id: task_id.to_string(),
            })?;
        if record.status.is_terminal() {
            debug!(task_id, status = %record.status, "ignoring admission of finished task");
            return Ok(0);
        }

        let position = match self.inner.queue.enqueue(task_id) {
            Some(position) => {
                self.inner.registry.mark_queued(task_id, position).await;
                self.inner
                    .patch_store(
                        task_id,
                        TaskPatch {
                            status: Some(TaskStatus::Queued),
                            queue_position: Some(Some(position)),
                            ..Default::default()
                        },
                    )
                    .await;
                info!(task_id, position, "task queued");
                position
            }
            None => record.queue_position.unwrap_or(0),
        };

        self.ensure_processor_started();
        Ok(position)
    }

    /// Cancel a task wherever it currently is.
    ///
    /// The terminal mark is written before any process is touched, so a
    /// crash mid-kill still leaves the task durably cancelled. Running
    /// tools get the polite-then-forceful stop; waiting tasks are pulled
    /// out of the FIFO and everyone behind them is renumbered.
    pub async fn cancel_task(&self, task_id: &str) -> Result<(), EngineError> {
        let record = self
            .inner
            .registry
            .get_task(task_id)
            .await
            .ok_or_else(|| EngineError::TaskNotFound {
                task_id: task_id.to_string(),
            })?;
        if record.status.is_terminal() {
            return Err(EngineError::NotCancellable {
                task_id: task_id.to_string(),
                status: record.status,
            });
        }

        if !self.inner.registry.mark_cancelled(task_id).await {
            // Lost the race with another terminal transition.
            let status = self
                .inner
                .registry
                .get_task(task_id)
                .await
                .map(|r| r.status)
                .unwrap_or(record.status);
            return Err(EngineError::NotCancellable {
                task_id: task_id.to_string(),
                status,
            });
        }

        self.inner
            .patch_store(
                task_id,
                TaskPatch {
                    status: Some(TaskStatus::Cancelled),
                    current_step: Some("Cancelled".to_string()),
                    queue_position: Some(None),
                    completed_at: Some(Utc::now()),
                    ..Default::default()
                },
            )
            .await;

        // The same sequence covers every pre-terminal state: the flag stops
        // a run at its next output line, abort kills a live process within
        // the grace period, and the queue removal handles a waiting task.
        self.inner.flags.set(task_id);
        self.inner.executor.abort(task_id).await;
        if let Some(removal) = self.inner.queue.remove_if_queued(task_id) {
            self.inner.apply_renumbering(&removal.renumbered).await;
        }

        info!(task_id, previous = %record.status, "task cancelled");
        Ok(())
    }

    /// Mark a task failed before it ever reached the queue.
    ///
    /// Used when upload conversion fails: the record exists in the registry
    /// but may have no durable row yet.
    pub async fn fail_task(&self, task_id: &str, error: &str) {
        if self.inner.registry.mark_failed(task_id, error).await {
            self.inner
                .patch_store(
                    task_id,
                    TaskPatch {
                        status: Some(TaskStatus::Failed),
                        current_step: Some("Failed".to_string()),
                        error_message: Some(error.to_string()),
                        completed_at: Some(Utc::now()),
                        ..Default::default()
                    },
                )
                .await;
        }
    }

    /// Lookup in the in-memory registry.
    pub async fn get_task(&self, task_id: &str) -> Option<TaskRecord> {
        self.inner.registry.get_task(task_id).await
    }

    /// Non-terminal tasks, oldest first.
    pub async fn active_tasks(&self) -> Vec<TaskRecord> {
        self.inner.registry.active_tasks().await
    }

    /// `true` while nothing holds the processing slot.
    pub fn is_slot_available(&self) -> bool {
        self.inner.queue.is_slot_available()
    }

    /// Read-only view of the queue for diagnostics.
    pub fn queue_snapshot(&self) -> QueueSnapshot {
        self.inner.queue.snapshot()
    }

    /// Access to the shared registry, for wiring progress writers in tests.
    pub fn registry(&self) -> TaskRegistry {
        self.inner.registry.clone()
    }

    /// Start the processor loop if it is not already running.
    pub fn ensure_processor_started(&self) {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("starting queue processor");
        tokio::spawn(processor::run(Arc::clone(&self.inner)));
    }
}
