//! SQLite implementation of [`scribe_core::TaskStore`].
//!
//! Uses [`sqlx`] with the `sqlite` feature.  Migrations are run automatically
//! on startup via [`SqliteStore::connect`].
//!
//! # Migrations path
//!
//! `sqlx::migrate!("./migrations")` resolves the path **at compile time**
//! relative to `CARGO_MANIFEST_DIR` (the crate root), so the directory is
//! embedded into the binary.  The database file location is determined at
//! runtime by the `SCRIBE_DATABASE_URL` environment variable and is **not**
//! related to the current working directory at runtime.
//!
//! # Queries
//!
//! The `sqlx::query` (runtime-verified) form is used deliberately so that no
//! `DATABASE_URL` environment variable is needed at compile time. Timestamps
//! are stored as RFC 3339 strings, `result` and `extra_metadata` as JSON
//! text.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use tracing::warn;

use scribe_core::{
    NewTask, STEP_WAITING, StoreError, StoredTask, TaskFilter, TaskPatch, TaskStatus, TaskStore,
};

/// Column list shared by every SELECT so `row_to_task` sees one shape.
const TASK_COLUMNS: &str = "task_id, title, filename, group_id, status, progress, current_step, \
     queue_position, audio_path, srt_path, language, error_message, result, extra_metadata, \
     created_at, started_at, completed_at, estimated_completion_time, updated_at";

/// SQLite-backed transcription task store.
#[derive(Clone, Debug)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the SQLite database at `url` and run pending migrations.
    ///
    /// `url` should be a sqlx-compatible SQLite URL, e.g. `"sqlite://scribe.db"`.
    /// The database file is created when missing so first start needs no
    /// manual setup.
    pub async fn connect(url: &str) -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        // Path is resolved relative to CARGO_MANIFEST_DIR at compile time.
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl TaskStore for SqliteStore {
    async fn insert(&self, task: NewTask) -> Result<(), StoreError> {
        let created_at = task.created_at.to_rfc3339();
        sqlx::query(
            "INSERT INTO transcriptions \
             (task_id, title, filename, group_id, status, progress, current_step, \
              audio_path, srt_path, language, extra_metadata, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        )
        .bind(&task.task_id)
        .bind(&task.title)
        .bind(&task.filename)
        .bind(&task.group_id)
        .bind(TaskStatus::Pending.to_string())
        .bind(0_i64)
        .bind(STEP_WAITING)
        .bind(&task.audio_path)
        .bind(&task.srt_path)
        .bind(&task.language)
        .bind(task.extra_metadata.as_ref().map(|v| v.to_string()))
        .bind(&created_at)
        .bind(&created_at)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn fetch(&self, task_id: &str) -> Result<Option<StoredTask>, StoreError> {
        let sql = format!("SELECT {TASK_COLUMNS} FROM transcriptions WHERE task_id = ?1");
        let row: Option<TaskRow> = sqlx::query_as(&sql)
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        Ok(row.map(TaskRow::into_task))
    }

    async fn apply(&self, task_id: &str, patch: TaskPatch) -> Result<(), StoreError> {
        if patch.is_empty() {
            return Ok(());
        }

        let mut builder = QueryBuilder::<Sqlite>::new("UPDATE transcriptions SET ");
        let mut fields = builder.separated(", ");
        if let Some(status) = patch.status {
            fields.push("status = ").push_bind_unseparated(status.to_string());
        }
        if let Some(progress) = patch.progress {
            fields.push("progress = ").push_bind_unseparated(progress as i64);
        }
        if let Some(step) = patch.current_step {
            fields.push("current_step = ").push_bind_unseparated(step);
        }
        if let Some(position) = patch.queue_position {
            fields
                .push("queue_position = ")
                .push_bind_unseparated(position.map(|p| p as i64));
        }
        if let Some(at) = patch.started_at {
            fields.push("started_at = ").push_bind_unseparated(at.to_rfc3339());
        }
        if let Some(at) = patch.completed_at {
            fields.push("completed_at = ").push_bind_unseparated(at.to_rfc3339());
        }
        if let Some(at) = patch.estimated_completion_time {
            fields
                .push("estimated_completion_time = ")
                .push_bind_unseparated(at.to_rfc3339());
        }
        if let Some(message) = patch.error_message {
            fields.push("error_message = ").push_bind_unseparated(message);
        }
        if let Some(result) = patch.result {
            fields.push("result = ").push_bind_unseparated(result.to_string());
        }
        if let Some(title) = patch.title {
            fields.push("title = ").push_bind_unseparated(title);
        }
        if let Some(language) = patch.language {
            fields.push("language = ").push_bind_unseparated(language);
        }
        if let Some(path) = patch.audio_path {
            fields.push("audio_path = ").push_bind_unseparated(path);
        }
        if let Some(path) = patch.srt_path {
            fields.push("srt_path = ").push_bind_unseparated(path);
        }
        if let Some(extra) = patch.extra_metadata {
            fields
                .push("extra_metadata = ")
                .push_bind_unseparated(extra.to_string());
        }
        fields
            .push("updated_at = ")
            .push_bind_unseparated(Utc::now().to_rfc3339());

        builder.push(" WHERE task_id = ").push_bind(task_id);

        let outcome = builder
            .build()
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        if outcome.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                task_id: task_id.to_string(),
            });
        }
        Ok(())
    }

    async fn list_by_status(&self, status: TaskStatus) -> Result<Vec<StoredTask>, StoreError> {
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM transcriptions WHERE status = ?1 ORDER BY created_at ASC"
        );
        let rows: Vec<TaskRow> = sqlx::query_as(&sql)
            .bind(status.to_string())
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        Ok(rows.into_iter().map(TaskRow::into_task).collect())
    }

    async fn list_recent(&self, filter: TaskFilter) -> Result<Vec<StoredTask>, StoreError> {
        let mut builder =
            QueryBuilder::<Sqlite>::new(format!("SELECT {TASK_COLUMNS} FROM transcriptions"));
        let mut has_where = false;
        if let Some(status) = filter.status {
            builder.push(" WHERE status = ").push_bind(status.to_string());
            has_where = true;
        }
        if let Some(group) = filter.group_id {
            builder.push(if has_where { " AND " } else { " WHERE " });
            builder.push("group_id = ").push_bind(group);
        }
        builder.push(" ORDER BY created_at DESC");

        let rows: Vec<TaskRow> = builder
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        Ok(rows.into_iter().map(TaskRow::into_task).collect())
    }

    async fn delete(&self, task_id: &str) -> Result<bool, StoreError> {
        let outcome = sqlx::query("DELETE FROM transcriptions WHERE task_id = ?1")
            .bind(task_id)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(outcome.rows_affected() > 0)
    }
}

// ── row mapping ───────────────────────────────────────────────────────────────

fn backend(e: sqlx::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

/// Raw row shape as stored; decode failures surface as `sqlx::Error`.
#[derive(sqlx::FromRow)]
struct TaskRow {
    task_id: String,
    title: Option<String>,
    filename: String,
    group_id: Option<String>,
    status: String,
    progress: i64,
    current_step: String,
    queue_position: Option<i64>,
    audio_path: Option<String>,
    srt_path: Option<String>,
    language: Option<String>,
    error_message: Option<String>,
    result: Option<String>,
    extra_metadata: Option<String>,
    created_at: String,
    started_at: Option<String>,
    completed_at: Option<String>,
    estimated_completion_time: Option<String>,
    updated_at: String,
}

impl TaskRow {
    /// Convert into the engine's [`StoredTask`], tolerating legacy values:
    /// a bad timestamp falls back to "now", a bad status to `failed`, bad
    /// JSON to `None`. Every fallback is logged so corrupt rows are visible
    /// in ops.
    fn into_task(self) -> StoredTask {
        let status = self.status.parse::<TaskStatus>().unwrap_or_else(|_| {
            warn!(task_id = %self.task_id, status = %self.status, "unknown status in task row");
            TaskStatus::Failed
        });

        StoredTask {
            status,
            title: self.title,
            filename: self.filename,
            group_id: self.group_id,
            progress: self.progress.clamp(0, 100) as u8,
            current_step: self.current_step,
            queue_position: self.queue_position.and_then(|p| u32::try_from(p).ok()),
            audio_path: self.audio_path,
            srt_path: self.srt_path,
            language: self.language,
            error_message: self.error_message,
            result: parse_json(&self.task_id, self.result),
            extra_metadata: parse_json(&self.task_id, self.extra_metadata),
            created_at: parse_datetime(&self.task_id, self.created_at),
            started_at: parse_opt_datetime(self.started_at),
            completed_at: parse_opt_datetime(self.completed_at),
            estimated_completion_time: parse_opt_datetime(self.estimated_completion_time),
            updated_at: parse_datetime(&self.task_id, self.updated_at),
            task_id: self.task_id,
        }
    }
}

fn parse_datetime(task_id: &str, raw: String) -> DateTime<Utc> {
    raw.parse::<DateTime<Utc>>().unwrap_or_else(|_| {
        warn!(task_id = %task_id, raw = %raw, "unparseable timestamp in task row");
        Utc::now()
    })
}

fn parse_opt_datetime(raw: Option<String>) -> Option<DateTime<Utc>> {
    raw.and_then(|s| s.parse::<DateTime<Utc>>().ok())
}

fn parse_json(task_id: &str, raw: Option<String>) -> Option<serde_json::Value> {
    let raw = raw?;
    match serde_json::from_str(&raw) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(task_id = %task_id, error = %e, "unparseable JSON in task row");
            None
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────────
