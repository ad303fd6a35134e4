pub mod engine;
pub mod services;

pub use engine::orchestrator::Orchestrator;
pub use engine::registry::STEP_WAITING;
pub use engine::runner::{JobExecutor, JobOutcome, JobSpec, RunnerConfig};
pub use engine::store::{TaskFilter, TaskStore};
pub use engine::types::{
    EngineError, NewTask, StoreError, StoredTask, TaskPatch, TaskRecord, TaskStatus,
};
pub use services::summary::SummaryClient;
