//! scribe-server – entry point.
//!
//! Startup order:
//! 1. Parse configuration from environment variables.
//! 2. Initialise structured tracing (JSON in production, pretty in dev).
//! 3. Open the SQLite database and run pending migrations.
//! 4. Prepare working directories and probe for ffmpeg.
//! 5. Build the summary client (optional) and the orchestration engine.
//! 6. Recover tasks interrupted by the previous shutdown.
//! 7. Build the Axum router and start the HTTP server with graceful shutdown.

mod config;
mod db;
mod error;
mod middleware;
mod routes;
mod schemas;
mod state;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;

use scribe_core::services::audio;
use scribe_core::{Orchestrator, RunnerConfig, SummaryClient};

use crate::config::Config;
use crate::db::sqlite::SqliteStore;
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Configuration ───────────────────────────────────────────────────────
    let cfg = Config::from_env();

    // ── 2. Tracing ─────────────────────────────────────────────────────────────
    // Build the log-level filter, warning loudly if the configured value is
    // not a valid tracing filter expression.
    let env_filter = match tracing_subscriber::EnvFilter::try_from_default_env() {
        Ok(f) => f,
        Err(_) => match cfg.log_level.parse::<tracing_subscriber::EnvFilter>() {
            Ok(f) => f,
            Err(e) => {
                eprintln!(
                    "WARN: SCRIBE_LOG='{}' is not a valid tracing filter ({}); \
                     falling back to 'info'",
                    cfg.log_level, e
                );
                tracing_subscriber::EnvFilter::new("info")
            }
        },
    };

    // The guard flushes buffered log lines on drop; hold it for the whole run.
    let _log_guard = init_tracing(&cfg, env_filter);

    info!(version = env!("CARGO_PKG_VERSION"), "scribe-server starting");

    // ── 3. Database ────────────────────────────────────────────────────────────
    let store = Arc::new(SqliteStore::connect(&cfg.database_url).await?);
    info!(database_url = %cfg.database_url, "database ready");

    // ── 4. Working directories and ffmpeg ──────────────────────────────────────
    tokio::fs::create_dir_all(&cfg.upload_dir).await?;
    tokio::fs::create_dir_all(&cfg.output_dir).await?;
    if let Err(e) = audio::ensure_ffmpeg().await {
        warn!(error = %e, "ffmpeg unavailable; non-mp3 uploads will be rejected");
    }

    // ── 5. Summary client and engine ───────────────────────────────────────────
    let summary = (!cfg.summary_url.is_empty())
        .then(|| SummaryClient::new(&cfg.summary_url, &cfg.summary_model));
    match &summary {
        Some(client) => {
            if client.is_available().await {
                info!(url = %cfg.summary_url, model = %cfg.summary_model, "summary service reachable");
            } else {
                warn!(url = %cfg.summary_url, "summary service unreachable; summaries will be skipped");
            }
        }
        None => info!("summary generation disabled (SCRIBE_SUMMARY_URL is empty)"),
    }

    let engine = Orchestrator::with_runner(
        store.clone(),
        RunnerConfig {
            tool_bin: cfg.whisper_bin.clone(),
            model: cfg.whisper_model.clone(),
            hf_token: cfg.hf_token.clone(),
            ..RunnerConfig::default()
        },
        summary.clone(),
        PathBuf::from(&cfg.output_dir),
    );

    // ── 6. Recovery ────────────────────────────────────────────────────────────
    let recovered = engine.recover().await;
    if recovered > 0 {
        info!(recovered, "re-queued tasks from the previous run");
    }

    // ── 7. Shared application state ────────────────────────────────────────────
    let state = Arc::new(AppState {
        config: Arc::new(cfg.clone()),
        store,
        engine,
        summary,
    });

    // ── 8. HTTP server with graceful shutdown ──────────────────────────────────
    let app = routes::build(Arc::clone(&state));
    let addr: SocketAddr = cfg.bind_address().parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("scribe-server stopped");
    Ok(())
}

/// Initialise the global tracing subscriber.
///
/// Returns the appender guard when logging to a rolling file; the caller
/// must keep it alive or buffered lines are lost.
fn init_tracing(cfg: &Config, env_filter: tracing_subscriber::EnvFilter) -> Option<WorkerGuard> {
    match &cfg.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "scribe-server.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let subscriber = tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_target(true)
                .with_thread_ids(true)
                .with_writer(writer)
                .with_ansi(false);
            if cfg.log_json {
                subscriber.json().init();
            } else {
                subscriber.init();
            }
            Some(guard)
        }
        None => {
            let subscriber = tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_target(true)
                .with_thread_ids(true);
            if cfg.log_json {
                subscriber.json().init();
            } else {
                subscriber.init();
            }
            None
        }
    }
}

/// Returns a future that resolves when SIGINT (Ctrl-C) or SIGTERM is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to install CTRL+C signal handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => warn!(error = %e, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c   => {}
        _ = terminate => {}
    }

    info!("shutdown signal received; starting graceful shutdown");
}
