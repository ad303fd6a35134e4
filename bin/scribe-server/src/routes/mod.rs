//! Axum router construction.
//!
//! [`build`] assembles the complete application router, including:
//! - Middleware layers (CORS, per-request trace-ID injection)
//! - Optional Swagger UI / OpenAPI spec endpoint (disable with `SCRIBE_ENABLE_SWAGGER=false`)
//! - Health / heartbeat route
//! - Transcription API under `/v1`

pub mod doc;
mod health;
mod v1;

use axum::extract::DefaultBodyLimit;
use axum::{Router, middleware};
use std::sync::Arc;
use tower::ServiceBuilder;
use utoipa_swagger_ui::SwaggerUi;

use crate::middleware::{cors, trace};
use crate::state::AppState;

// ── Router builder ────────────────────────────────────────────────────────────

/// Build the complete Axum [`Router`] for the application.
pub fn build(state: Arc<AppState>) -> Router {
    let api_router = Router::new()
        .merge(health::router())
        .nest("/v1", v1::router());

    let mut app = Router::new().merge(api_router);

    // ── Swagger UI ────────────────────────────────────────────────────────────
    // Enabled by default; disable with SCRIBE_ENABLE_SWAGGER=false in production
    // to avoid exposing the API structure to potential attackers.
    let api_doc = doc::get_docs();

    if state.config.enable_swagger {
        app = app.merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", api_doc));
    }

    app
        // Uploads are capped here; everything else is far below the limit.
        .layer(DefaultBodyLimit::max(
            state.config.max_upload_mb * 1024 * 1024,
        ))
        // Outermost layers execute first on the way in.
        .layer(ServiceBuilder::new().layer(cors::cors_layer(state.clone())))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            trace::trace_middleware,
        ))
        .with_state(state)
}

// ── Test support ────────────────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;

    use scribe_core::{Orchestrator, RunnerConfig};

    use crate::config::Config;
    use crate::db::sqlite::SqliteStore;
    use crate::state::AppState;

    /// Fresh state backed by a throwaway SQLite file. The runner points at a
    /// binary that cannot exist, so any job that reaches the slot fails fast
    /// instead of invoking a real transcription tool.
    pub(crate) async fn state() -> (Arc<AppState>, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("tempdir");
        let database_url = format!("sqlite://{}", dir.path().join("scribe.db").display());
        let output_dir = dir.path().join("transcripts");

        let config = Config {
            host: "127.0.0.1".to_string(),
            port: 0,
            database_url: database_url.clone(),
            upload_dir: dir.path().join("uploads").display().to_string(),
            output_dir: output_dir.display().to_string(),
            whisper_bin: "/nonexistent/whisperx".to_string(),
            whisper_model: "tiny".to_string(),
            hf_token: None,
            summary_url: String::new(),
            summary_model: "test".to_string(),
            cors_allowed_origins: None,
            max_upload_mb: 8,
            log_level: "info".to_string(),
            log_json: false,
            log_dir: None,
            enable_swagger: false,
        };

        let store = Arc::new(SqliteStore::connect(&database_url).await.expect("store"));
        let engine = Orchestrator::with_runner(
            store.clone(),
            RunnerConfig {
                tool_bin: config.whisper_bin.clone(),
                model: config.whisper_model.clone(),
                ..RunnerConfig::default()
            },
            None,
            output_dir,
        );

        let state = Arc::new(AppState {
            config: Arc::new(config),
            store,
            engine,
            summary: None,
        });
        (state, dir)
    }
}
