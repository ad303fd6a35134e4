//! Shared application state injected into every Axum handler.

use std::sync::Arc;

use scribe_core::{Orchestrator, SummaryClient};

use crate::config::Config;
use crate::db::sqlite::SqliteStore;

/// State shared across all HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration (env-derived).
    pub config: Arc<Config>,
    /// Durable task store backing the engine and the listing endpoints.
    pub store: Arc<SqliteStore>,
    /// The single-slot transcription engine.
    pub engine: Orchestrator,
    /// Summarization client, `None` when disabled by configuration.
    pub summary: Option<SummaryClient>,
}
