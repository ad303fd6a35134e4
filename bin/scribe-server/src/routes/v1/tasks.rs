//! Task status and cancellation endpoints.
//!
//! Status reads prefer the live in-memory registry and fall back to the
//! durable row, so polls keep answering after a server restart dropped the
//! live entry.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use tracing::info;
use utoipa::OpenApi;

use scribe_core::{EngineError, TaskStore};

use crate::error::ServerError;
use crate::schemas::v1::task::{ActiveTasksResponse, TaskResponse};
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(
    paths(list_active_tasks, get_task, cancel_task),
    components(schemas(TaskResponse, ActiveTasksResponse))
)]
pub struct TasksApi;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/tasks", get(list_active_tasks))
        .route("/tasks/{id}", get(get_task))
        .route("/tasks/{id}/cancel", post(cancel_task))
}

#[utoipa::path(
    get,
    path = "/v1/tasks",
    tag = "tasks",
    responses(
        (status = 200, description = "Tasks that are pending, queued, or processing", body = ActiveTasksResponse),
    )
)]
pub async fn list_active_tasks(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ActiveTasksResponse>, ServerError> {
    let tasks: Vec<TaskResponse> = state
        .engine
        .active_tasks()
        .await
        .into_iter()
        .map(TaskResponse::from)
        .collect();
    Ok(Json(ActiveTasksResponse {
        count: tasks.len(),
        tasks,
    }))
}

#[utoipa::path(
    get,
    path = "/v1/tasks/{id}",
    tag = "tasks",
    params(
        ("id" = String, Path, description = "ID of the task to retrieve")
    ),
    responses(
        (status = 200, description = "Task retrieved", body = TaskResponse),
        (status = 404, description = "Task not found"),
        (status = 500, description = "Backend error"),
    )
)]
pub async fn get_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<TaskResponse>, ServerError> {
    if let Some(record) = state.engine.get_task(&id).await {
        return Ok(Json(record.into()));
    }

    // The registry forgets tasks across restarts; the durable row keeps
    // answering history polls.
    let row = state
        .store
        .fetch(&id)
        .await?
        .ok_or_else(|| ServerError::NotFound(format!("task {id} not found")))?;
    Ok(Json(row.into()))
}

#[utoipa::path(
    post,
    path = "/v1/tasks/{id}/cancel",
    tag = "tasks",
    params(
        ("id" = String, Path, description = "ID of the task to cancel")
    ),
    responses(
        (status = 200, description = "Task cancelled"),
        (status = 404, description = "Task not found"),
        (status = 409, description = "Task is already terminal"),
        (status = 500, description = "Backend error"),
    )
)]
pub async fn cancel_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ServerError> {
    match state.engine.cancel_task(&id).await {
        Ok(()) => {
            info!(task_id = %id, "task cancelled");
            Ok(Json(serde_json::json!({ "task_id": id, "status": "cancelled" })))
        }
        Err(EngineError::TaskNotFound { .. }) => {
            // Unknown to the registry; the durable row decides between a
            // finished-before-restart task and a genuinely unknown id.
            match state.store.fetch(&id).await? {
                Some(row) => Err(ServerError::Conflict(format!(
                    "task {id} is {}, which cannot be cancelled",
                    row.status
                ))),
                None => Err(ServerError::NotFound(format!("task {id} not found"))),
            }
        }
        Err(e) => Err(e.into()),
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────────
