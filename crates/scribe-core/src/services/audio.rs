use std::path::{Path, PathBuf};

use ffmpeg_sidecar::command::FfmpegCommand;
use ffmpeg_sidecar::event::FfmpegEvent;
use thiserror::Error;
use tracing::{error, info};

/// Upload extensions accepted for transcription.
pub const SUPPORTED_EXTENSIONS: [&str; 7] = ["mp3", "wav", "mp4", "m4a", "flac", "ogg", "webm"];

/// Longest filesystem stem derived from a user-supplied title.
const MAX_TITLE_STEM: usize = 50;

#[derive(Debug, Error)]
pub enum AudioError {
    #[error("unsupported file extension: {0}")]
    UnsupportedExtension(String),

    #[error("audio conversion failed: {0}")]
    Conversion(String),

    #[error("ffmpeg unavailable: {0}")]
    Tooling(String),

    #[error("conversion worker panicked")]
    Worker,
}

/// Lowercased extension of a filename, if it has one.
pub fn extension_of(filename: &str) -> Option<String> {
    Path::new(filename)
        .extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
}

/// `true` when the filename carries one of the supported media extensions.
pub fn is_supported_extension(filename: &str) -> bool {
    extension_of(filename)
        .map(|ext| SUPPORTED_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

/// Turn a user-supplied title into a safe filename stem.
///
/// Keeps alphanumerics, `-` and `_`, maps spaces to `_`, drops everything
/// else, and bounds the length. Falls back to `untitled` when nothing
/// usable remains.
pub fn sanitize_title(title: &str) -> String {
    let stem: String = title
        .chars()
        .filter_map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                Some(c)
            } else if c == ' ' {
                Some('_')
            } else {
                None
            }
        })
        .take(MAX_TITLE_STEM)
        .collect();
    if stem.is_empty() {
        "untitled".to_string()
    } else {
        stem
    }
}

/// Fetch a local ffmpeg build if none is on the PATH.
///
/// Called once at startup; conversion fails later anyway if the binary is
/// genuinely unobtainable.
pub async fn ensure_ffmpeg() -> Result<(), AudioError> {
    tokio::task::spawn_blocking(|| {
        ffmpeg_sidecar::download::auto_download().map_err(|e| AudioError::Tooling(e.to_string()))
    })
    .await
    .map_err(|_| AudioError::Worker)?
}

/// Convert an uploaded media file to 192 kbps MP3 for the transcriber.
///
/// ffmpeg is blocking and CPU-bound, so the conversion runs on a worker
/// thread. Returns the destination path on success.
pub async fn convert_to_mp3(source: &Path, dest: &Path) -> Result<PathBuf, AudioError> {
    let source = source.to_path_buf();
    let dest = dest.to_path_buf();
    tokio::task::spawn_blocking(move || convert_blocking(&source, &dest))
        .await
        .map_err(|_| AudioError::Worker)?
}

fn convert_blocking(source: &Path, dest: &Path) -> Result<PathBuf, AudioError> {
    info!(source = %source.display(), dest = %dest.display(), "converting upload to mp3");

    let source_arg = source
        .to_str()
        .ok_or_else(|| AudioError::Conversion("source path is not valid UTF-8".to_string()))?;
    let dest_arg = dest
        .to_str()
        .ok_or_else(|| AudioError::Conversion("destination path is not valid UTF-8".to_string()))?;

    let mut failures: Vec<String> = Vec::new();
    FfmpegCommand::new()
        .hide_banner()
        .overwrite()
        .input(source_arg)
        .args(["-vn", "-acodec", "libmp3lame", "-b:a", "192k", "-q:a", "2"])
        .output(dest_arg)
        .spawn()
        .map_err(|e| AudioError::Conversion(format!("spawning ffmpeg: {e}")))?
        .iter()
        .map_err(|e| AudioError::Conversion(format!("reading ffmpeg output: {e}")))?
        .for_each(|event| match event {
            FfmpegEvent::Error(e) => {
                error!("ffmpeg error: {e}");
                failures.push(e);
            }
            FfmpegEvent::Done => info!("ffmpeg finished: {}", dest.display()),
            _ => {}
        });

    if !failures.is_empty() {
        return Err(AudioError::Conversion(failures.join("; ")));
    }
    if !dest.is_file() {
        return Err(AudioError::Conversion(format!(
            "ffmpeg produced no output at {}",
            dest.display()
        )));
    }
    Ok(dest.to_path_buf())
}
