//! Health / heartbeat endpoint.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{Value, json};
use std::sync::Arc;
use utoipa::OpenApi;

use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(paths(get_health))]
pub struct HealthApi;

/// Register health-check routes.
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/health", get(get_health))
}

/// Heartbeat endpoint.
///
/// Returns liveness plus a queue snapshot with HTTP 200. Load-balancers and
/// monitoring systems should poll this endpoint; it never touches the
/// database or the network.
#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses(
        (status = 200, description = "Server is healthy", body = Value)
    )
)]
pub async fn get_health(State(state): State<Arc<AppState>>) -> Json<Value> {
    let queue = state.engine.queue_snapshot();
    Json(json!({
        "status":  "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "queue_depth": queue.fifo.len(),
        "slot_available": queue.current.is_none(),
        "summary_enabled": state.summary.is_some(),
    }))
}

// ── Tests ──────────────────────────────────────────────────────────────────────
