//! Transcription upload and durable-record endpoints.
//!
//! `POST /transcriptions` is the write path: validate the upload, stage the
//! audio (converting to mp3 when needed), insert the durable row, then admit
//! the task to the single-slot queue. Everything after the 202 happens in
//! the engine's processor loop.

use std::path::Path as FsPath;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::multipart::Field;
use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde_json::json;
use tracing::{debug, error, info, warn};
use utoipa::OpenApi;
use validator::Validate;

use scribe_core::services::audio::{self, SUPPORTED_EXTENSIONS};
use scribe_core::services::subtitle;
use scribe_core::{NewTask, TaskFilter, TaskPatch, TaskStatus, TaskStore};

use crate::error::ServerError;
use crate::schemas::v1::transcription::{
    ListQuery, SubmitResponse, TranscriptionResponse, UpdateTranscriptionRequest,
};
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(
    paths(
        submit_transcription,
        list_transcriptions,
        get_transcription,
        update_transcription,
        delete_transcription,
        get_transcript_text
    ),
    components(schemas(SubmitResponse, TranscriptionResponse, UpdateTranscriptionRequest))
)]
pub struct TranscriptionsApi;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/transcriptions",
            post(submit_transcription).get(list_transcriptions),
        )
        .route(
            "/transcriptions/{id}",
            get(get_transcription)
                .patch(update_transcription)
                .delete(delete_transcription),
        )
        .route("/transcriptions/{id}/text", get(get_transcript_text))
}

#[utoipa::path(
    post,
    path = "/v1/transcriptions",
    tag = "transcriptions",
    request_body(
        content_type = "multipart/form-data",
        description = "`file` (required); optional `title`, `language`, `group_id` text fields"
    ),
    responses(
        (status = 202, description = "Transcription accepted and queued", body = SubmitResponse),
        (status = 400, description = "Missing file or unsupported file type"),
        (status = 500, description = "Upload could not be stored or converted"),
    )
)]
pub async fn submit_transcription(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<SubmitResponse>), ServerError> {
    let mut upload: Option<(String, Bytes)> = None;
    let mut title: Option<String> = None;
    let mut language: Option<String> = None;
    let mut group_id: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ServerError::BadRequest(format!("invalid multipart body: {e}")))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "file" => {
                let filename = field
                    .file_name()
                    .map(|n| n.to_string())
                    .unwrap_or_else(|| "upload".to_string());
                let bytes = field.bytes().await.map_err(|e| {
                    ServerError::BadRequest(format!("could not read upload: {e}"))
                })?;
                upload = Some((filename, bytes));
            }
            "title" => title = read_text_field(field).await?,
            "language" => language = read_text_field(field).await?,
            "group_id" => group_id = read_text_field(field).await?,
            other => debug!(field = %other, "ignoring unknown multipart field"),
        }
    }

    let (original_filename, bytes) = upload
        .ok_or_else(|| ServerError::BadRequest("missing multipart field 'file'".to_string()))?;
    if bytes.is_empty() {
        return Err(ServerError::BadRequest("uploaded file is empty".to_string()));
    }

    // Strip any client-sent directory components.
    let safe_name = FsPath::new(&original_filename)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "upload".to_string());

    if !audio::is_supported_extension(&safe_name) {
        return Err(ServerError::BadRequest(format!(
            "unsupported file type '{safe_name}'; supported extensions: {}",
            SUPPORTED_EXTENSIONS.join(", ")
        )));
    }
    let ext = audio::extension_of(&safe_name).unwrap_or_default();

    let task_id = state
        .engine
        .create_task(&safe_name, group_id.as_deref())
        .await;

    let upload_dir = FsPath::new(&state.config.upload_dir).to_path_buf();
    tokio::fs::create_dir_all(&upload_dir)
        .await
        .map_err(|e| ServerError::Internal(format!("could not create upload dir: {e}")))?;
    tokio::fs::create_dir_all(&state.config.output_dir)
        .await
        .map_err(|e| ServerError::Internal(format!("could not create output dir: {e}")))?;

    let upload_path = upload_dir.join(format!("{task_id}_{safe_name}"));
    tokio::fs::write(&upload_path, &bytes)
        .await
        .map_err(|e| ServerError::Internal(format!("could not store upload: {e}")))?;

    let file_size = bytes.len();
    let stem = FsPath::new(&safe_name)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| task_id.clone());

    // Everything downstream expects mp3; transcode other formats up front.
    let (audio_path, converted) = if ext == "mp3" {
        (upload_path.clone(), false)
    } else {
        let mp3_path = upload_dir.join(format!("{task_id}_{stem}.mp3"));
        match audio::convert_to_mp3(&upload_path, &mp3_path).await {
            Ok(path) => {
                if let Err(e) = tokio::fs::remove_file(&upload_path).await {
                    warn!(task_id = %task_id, error = %e, "could not remove pre-conversion upload");
                }
                (path, true)
            }
            Err(e) => {
                error!(task_id = %task_id, error = %e, "audio conversion failed");
                state
                    .engine
                    .fail_task(&task_id, "Audio conversion failed")
                    .await;
                return Err(ServerError::Internal(format!(
                    "audio conversion failed: {e}"
                )));
            }
        }
    };

    let safe_title = audio::sanitize_title(title.as_deref().unwrap_or(&stem));
    let srt_path =
        FsPath::new(&state.config.output_dir).join(format!("{task_id}_{safe_title}.srt"));

    let extra_metadata = json!({
        "file_size": file_size,
        "original_filename": safe_name,
        "original_format": ext,
        "converted_to_mp3": converted,
    });

    state
        .store
        .insert(NewTask {
            task_id: task_id.clone(),
            title,
            filename: safe_name.clone(),
            group_id,
            audio_path: Some(audio_path.to_string_lossy().to_string()),
            srt_path: Some(srt_path.to_string_lossy().to_string()),
            language,
            extra_metadata: Some(extra_metadata),
            created_at: Utc::now(),
        })
        .await?;

    let position = state.engine.admit(&task_id).await?;
    info!(task_id = %task_id, filename = %safe_name, position, "transcription accepted");

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            status: "queued".to_string(),
            message: format!("Transcription queued at position {position}"),
            status_url: format!("/v1/tasks/{task_id}"),
            task_id,
        }),
    ))
}

#[utoipa::path(
    get,
    path = "/v1/transcriptions",
    tag = "transcriptions",
    params(ListQuery),
    responses(
        (status = 200, description = "Durable records, newest first", body = [TranscriptionResponse]),
        (status = 400, description = "Unknown status filter"),
    )
)]
pub async fn list_transcriptions(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<TranscriptionResponse>>, ServerError> {
    let status = query
        .status
        .map(|s| {
            s.parse::<TaskStatus>()
                .map_err(|_| ServerError::BadRequest(format!("unknown status filter: {s}")))
        })
        .transpose()?;

    let rows = state
        .store
        .list_recent(TaskFilter {
            status,
            group_id: query.group_id,
        })
        .await?;
    Ok(Json(
        rows.into_iter().map(TranscriptionResponse::from).collect(),
    ))
}

#[utoipa::path(
    get,
    path = "/v1/transcriptions/{id}",
    tag = "transcriptions",
    params(
        ("id" = String, Path, description = "ID of the transcription to retrieve")
    ),
    responses(
        (status = 200, description = "Transcription retrieved", body = TranscriptionResponse),
        (status = 404, description = "Transcription not found"),
    )
)]
pub async fn get_transcription(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<TranscriptionResponse>, ServerError> {
    let row = state
        .store
        .fetch(&id)
        .await?
        .ok_or_else(|| ServerError::NotFound(format!("transcription {id} not found")))?;
    Ok(Json(row.into()))
}

#[utoipa::path(
    patch,
    path = "/v1/transcriptions/{id}",
    tag = "transcriptions",
    params(
        ("id" = String, Path, description = "ID of the transcription to update")
    ),
    request_body = UpdateTranscriptionRequest,
    responses(
        (status = 200, description = "Transcription updated", body = TranscriptionResponse),
        (status = 400, description = "Validation failed or nothing to update"),
        (status = 404, description = "Transcription not found"),
    )
)]
pub async fn update_transcription(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(request): Json<UpdateTranscriptionRequest>,
) -> Result<Json<TranscriptionResponse>, ServerError> {
    request
        .validate()
        .map_err(|e| ServerError::BadRequest(e.to_string()))?;
    if request.title.is_none() && request.language.is_none() {
        return Err(ServerError::BadRequest("nothing to update".to_string()));
    }

    state
        .store
        .apply(
            &id,
            TaskPatch {
                title: request.title,
                language: request.language,
                ..Default::default()
            },
        )
        .await?;

    let row = state
        .store
        .fetch(&id)
        .await?
        .ok_or_else(|| ServerError::NotFound(format!("transcription {id} not found")))?;
    Ok(Json(row.into()))
}

#[utoipa::path(
    delete,
    path = "/v1/transcriptions/{id}",
    tag = "transcriptions",
    params(
        ("id" = String, Path, description = "ID of the transcription to delete")
    ),
    responses(
        (status = 200, description = "Transcription deleted"),
        (status = 404, description = "Transcription not found"),
        (status = 409, description = "Task is still active; cancel it first"),
    )
)]
pub async fn delete_transcription(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let row = state
        .store
        .fetch(&id)
        .await?
        .ok_or_else(|| ServerError::NotFound(format!("transcription {id} not found")))?;

    if row.status.is_active() {
        return Err(ServerError::Conflict(format!(
            "task {id} is {}; cancel it before deleting",
            row.status
        )));
    }

    // Artifacts are best-effort: a missing file must not block the delete.
    for path in [row.audio_path.as_deref(), row.srt_path.as_deref()]
        .into_iter()
        .flatten()
    {
        if let Err(e) = tokio::fs::remove_file(path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(task_id = %id, path = %path, error = %e, "could not remove artifact");
            }
        }
    }

    if !state.store.delete(&id).await? {
        return Err(ServerError::NotFound(format!(
            "transcription {id} not found"
        )));
    }
    info!(task_id = %id, "transcription deleted");
    Ok(Json(json!({ "task_id": id, "status": "deleted" })))
}

#[utoipa::path(
    get,
    path = "/v1/transcriptions/{id}/text",
    tag = "transcriptions",
    params(
        ("id" = String, Path, description = "ID of the transcription to read")
    ),
    responses(
        (status = 200, description = "Plain transcript text", body = String),
        (status = 404, description = "Transcription or subtitle file not found"),
        (status = 409, description = "Transcription is not completed yet"),
    )
)]
pub async fn get_transcript_text(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<String, ServerError> {
    let row = state
        .store
        .fetch(&id)
        .await?
        .ok_or_else(|| ServerError::NotFound(format!("transcription {id} not found")))?;

    if row.status != TaskStatus::Completed {
        return Err(ServerError::Conflict(format!(
            "transcript not ready (status: {})",
            row.status
        )));
    }
    let srt_path = row
        .srt_path
        .ok_or_else(|| ServerError::NotFound("no subtitle file recorded".to_string()))?;
    let srt = tokio::fs::read_to_string(&srt_path).await.map_err(|e| {
        warn!(task_id = %id, path = %srt_path, error = %e, "subtitle file unreadable");
        ServerError::NotFound("subtitle file missing".to_string())
    })?;

    Ok(subtitle::extract_text(&srt))
}

// ── private helpers ──────────────────────────────────────────────────────────

/// Read an optional text field, treating whitespace-only values as absent.
async fn read_text_field(field: Field<'_>) -> Result<Option<String>, ServerError> {
    let value = field
        .text()
        .await
        .map_err(|e| ServerError::BadRequest(format!("invalid multipart field: {e}")))?;
    let value = value.trim().to_string();
    Ok(if value.is_empty() { None } else { Some(value) })
}

// ── Tests ──────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod test {
    use super::*;
    use crate::routes::{self, testing};
    use axum::body::Body;
    use axum::http::{Request, header};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    const BOUNDARY: &str = "scribe-test-boundary";

    fn multipart_upload(filename: &str, content: &[u8]) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; \
                 filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(content);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
        body
    }

    fn upload_request(filename: &str, content: &[u8]) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/v1/transcriptions")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(multipart_upload(filename, content)))
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn unsupported_file_types_are_rejected() {
        let (state, _dir) = testing::state().await;
        let app = routes::build(state);

        let response = app
            .oneshot(upload_request("notes.txt", b"hello"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert!(
            body["error"]
                .as_str()
                .unwrap_or("")
                .contains("unsupported file type")
        );
    }

    #[tokio::test]
    async fn uploads_without_a_file_field_are_rejected() {
        let (state, _dir) = testing::state().await;
        let app = routes::build(state);

        let body = format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"title\"\r\n\r\nStandup\r\n--{BOUNDARY}--\r\n"
        );
        let request = Request::builder()
            .method("POST")
            .uri("/v1/transcriptions")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn mp3_uploads_are_accepted_and_queued() {
        let (state, _dir) = testing::state().await;
        let app = routes::build(state.clone());

        let response = app
            .clone()
            .oneshot(upload_request("standup.mp3", b"ID3fakeaudio"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let body = body_json(response).await;
        let task_id = body["task_id"].as_str().unwrap().to_string();
        assert_eq!(body["status"], "queued");
        assert_eq!(
            body["status_url"],
            format!("/v1/tasks/{task_id}").as_str()
        );

        // The durable row exists before the 202 is returned.
        let row = state.store.fetch(&task_id).await.unwrap().unwrap();
        assert_eq!(row.filename, "standup.mp3");
        assert_eq!(row.extra_metadata.unwrap()["converted_to_mp3"], false);

        // And the status endpoint answers immediately.
        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/v1/tasks/{task_id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn listing_returns_submitted_rows_newest_first() {
        let (state, _dir) = testing::state().await;
        let app = routes::build(state);

        let response = app
            .clone()
            .oneshot(upload_request("first.mp3", b"audio"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/v1/transcriptions")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        let rows = body.as_array().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["filename"], "first.mp3");
    }

    #[tokio::test]
    async fn listing_rejects_unknown_status_filters() {
        let (state, _dir) = testing::state().await;
        let app = routes::build(state);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/v1/transcriptions?status=bogus")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn patch_validates_and_applies_metadata_edits() {
        let (state, _dir) = testing::state().await;
        let app = routes::build(state);

        let response = app
            .clone()
            .oneshot(upload_request("sync.mp3", b"audio"))
            .await
            .unwrap();
        let task_id = body_json(response).await["task_id"]
            .as_str()
            .unwrap()
            .to_string();

        // Empty title fails validation.
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("PATCH")
                    .uri(format!("/v1/transcriptions/{task_id}"))
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"title": ""}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .oneshot(
                Request::builder()
                    .method("PATCH")
                    .uri(format!("/v1/transcriptions/{task_id}"))
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"title": "Renamed", "language": "en"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["title"], "Renamed");
        assert_eq!(body["language"], "en");
    }

    #[tokio::test]
    async fn patching_an_unknown_transcription_is_not_found() {
        let (state, _dir) = testing::state().await;
        let app = routes::build(state);

        let response = app
            .oneshot(
                Request::builder()
                    .method("PATCH")
                    .uri("/v1/transcriptions/ghost")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"title": "x"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn transcript_text_is_conflict_until_completed() {
        let (state, _dir) = testing::state().await;
        let app = routes::build(state);

        let response = app
            .clone()
            .oneshot(upload_request("talk.mp3", b"audio"))
            .await
            .unwrap();
        let task_id = body_json(response).await["task_id"]
            .as_str()
            .unwrap()
            .to_string();

        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/v1/transcriptions/{task_id}/text"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        // Queued, processing, or failed-fast; never a transcript.
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn delete_refuses_active_rows_then_removes_terminal_ones() {
        let (state, _dir) = testing::state().await;
        let app = routes::build(state.clone());

        state
            .store
            .insert(NewTask {
                task_id: "t-queued".to_string(),
                title: None,
                filename: "q.mp3".to_string(),
                group_id: None,
                audio_path: None,
                srt_path: None,
                language: None,
                extra_metadata: None,
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        state
            .store
            .apply(
                "t-queued",
                TaskPatch {
                    status: Some(TaskStatus::Queued),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let delete_request = || {
            Request::builder()
                .method("DELETE")
                .uri("/v1/transcriptions/t-queued")
                .body(Body::empty())
                .unwrap()
        };

        let response = app.clone().oneshot(delete_request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        state
            .store
            .apply(
                "t-queued",
                TaskPatch {
                    status: Some(TaskStatus::Cancelled),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let response = app.clone().oneshot(delete_request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app.oneshot(delete_request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
