//! Server configuration, loaded from environment variables at startup.

/// Runtime configuration for scribe-server.
///
/// Every field has a sensible default so the server works out-of-the-box
/// without any environment variables set.
#[derive(Debug, Clone)]
pub struct Config {
    /// Interface to bind (default: `"0.0.0.0"`).
    pub host: String,

    /// TCP port to bind (default: `8000`).
    pub port: u16,

    /// SQLite (or other) database URL (default: `"sqlite://scribe.db"`).
    /// Supports any sqlx-compatible connection string – swap the scheme to
    /// migrate to Postgres (`postgres://…`) or MySQL (`mysql://…`).
    pub database_url: String,

    /// Directory where uploaded audio files are stored
    /// (default: `"uploads"`).
    pub upload_dir: String,

    /// Directory where subtitle files are written (default: `"transcripts"`).
    pub output_dir: String,

    /// Executable invoked for each transcription run
    /// (default: `"whisperx"`, resolved via `PATH`).
    pub whisper_bin: String,

    /// Whisper model identifier (default: `"large-v2"`).
    pub whisper_model: String,

    /// Hugging Face token for the diarization pipeline. Speaker
    /// diarization is skipped when unset.
    pub hf_token: Option<String>,

    /// Base URL of the summarization service (default:
    /// `"http://localhost:11434"`). Set to an empty string to disable
    /// summaries entirely.
    pub summary_url: String,

    /// Model name requested from the summarization service
    /// (default: `"deepseek-r1:14b"`).
    pub summary_model: String,

    /// Comma-separated list of allowed CORS origins. Unset means wildcard.
    pub cors_allowed_origins: Option<String>,

    /// Upload size cap in megabytes (default: `512`).
    pub max_upload_mb: usize,

    /// `tracing` filter string, e.g. `"info"` or `"debug,sqlx=warn"`.
    pub log_level: String,

    /// When `true`, emit log records as newline-delimited JSON.
    pub log_json: bool,

    /// When set, also write daily-rolling log files into this directory.
    pub log_dir: Option<String>,

    /// Serve Swagger UI at `/swagger-ui` (default: `true`; disable with
    /// `SCRIBE_ENABLE_SWAGGER=false` in production).
    pub enable_swagger: bool,
}

impl Config {
    /// Build [`Config`] from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self {
            host: env_or("SCRIBE_HOST", "0.0.0.0"),
            port: parse_env("SCRIBE_PORT", 8000),
            database_url: env_or("SCRIBE_DATABASE_URL", "sqlite://scribe.db"),
            upload_dir: env_or("SCRIBE_UPLOAD_DIR", "uploads"),
            output_dir: env_or("SCRIBE_OUTPUT_DIR", "transcripts"),
            whisper_bin: env_or("SCRIBE_WHISPER_BIN", "whisperx"),
            whisper_model: env_or("SCRIBE_WHISPER_MODEL", "large-v2"),
            hf_token: env_opt("SCRIBE_HF_TOKEN"),
            summary_url: env_or("SCRIBE_SUMMARY_URL", "http://localhost:11434"),
            summary_model: env_or("SCRIBE_SUMMARY_MODEL", "deepseek-r1:14b"),
            cors_allowed_origins: env_opt("SCRIBE_CORS_ORIGINS"),
            max_upload_mb: parse_env("SCRIBE_MAX_UPLOAD_MB", 512),
            log_level: env_or("SCRIBE_LOG", "info"),
            log_json: std::env::var("SCRIBE_LOG_JSON")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            log_dir: env_opt("SCRIBE_LOG_DIR"),
            enable_swagger: std::env::var("SCRIBE_ENABLE_SWAGGER")
                .map(|v| v != "0" && !v.eq_ignore_ascii_case("false"))
                .unwrap_or(true),
        }
    }

    /// `host:port` string accepted by [`std::net::SocketAddr`] parsing.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

// ── private helpers ──────────────────────────────────────────────────────────

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_owned())
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
