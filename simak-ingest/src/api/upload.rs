//! Transcript upload: POST /transcripts
//!
//! The handler only records the upload and enqueues it. Parsing happens in
//! the worker pool; the caller follows progress through the import log.

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Query, State},
    http::{HeaderMap, StatusCode},
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use uuid::Uuid;

use crate::{
    db::import_logs,
    error::{ApiError, ApiResult},
    models::{ImportStatus, TranscriptJobPayload},
    AppState,
};

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";

/// Roles allowed to upload transcripts
pub const UPLOAD_ROLES: [&str; 2] = ["UPM", "KAPRODI"];

/// Largest accepted upload
pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// File name recorded when the caller does not give one
const DEFAULT_FILE_NAME: &str = "transcript";

#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    pub file_name: Option<String>,
}

/// POST /transcripts response
#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub log_id: String,
    pub job_id: Uuid,
    pub status: ImportStatus,
    pub message: String,
}

/// Authenticated caller, as asserted by the upstream auth layer
struct Caller {
    user_id: String,
    role: String,
}

fn caller_from_headers(headers: &HeaderMap) -> ApiResult<Caller> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };

    let user_id = header(USER_ID_HEADER)
        .ok_or_else(|| ApiError::Unauthorized("missing caller identity".to_string()))?;
    let role = header(USER_ROLE_HEADER)
        .ok_or_else(|| ApiError::Unauthorized("missing caller role".to_string()))?;

    Ok(Caller { user_id, role })
}

/// POST /transcripts?file_name=<name>
///
/// Body is the raw file. Returns 202 once the job is queued.
pub async fn upload_transcript(
    State(state): State<AppState>,
    Query(query): Query<UploadQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<UploadResponse>)> {
    let caller = caller_from_headers(&headers)?;
    if !UPLOAD_ROLES.contains(&caller.role.to_ascii_uppercase().as_str()) {
        return Err(ApiError::Forbidden(format!(
            "role {} may not upload transcripts",
            caller.role
        )));
    }

    if body.is_empty() {
        return Err(ApiError::BadRequest("No file uploaded".to_string()));
    }

    let file_name = query
        .file_name
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| DEFAULT_FILE_NAME.to_string());

    let log = import_logs::create_import_log(&state.db, &file_name, &caller.user_id).await?;

    let payload = TranscriptJobPayload::new(&body, &file_name, &caller.user_id, Some(log.id.clone()));
    let job_id = match state.queue.enqueue(&payload).await {
        Ok(job_id) => job_id,
        Err(e) => {
            error!(log_id = %log.id, error = %e, "Failed to enqueue transcript job");
            if let Err(e) = import_logs::mark_failed(&state.db, &log.id, "Queue Error").await {
                error!(log_id = %log.id, error = %e, "Failed to mark import log FAILED");
            }
            return Err(ApiError::Internal("Failed to queue file processing".to_string()));
        }
    };

    info!(
        log_id = %log.id,
        job_id = %job_id,
        file_name = %file_name,
        bytes = body.len(),
        "Transcript upload queued"
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(UploadResponse {
            log_id: log.id,
            job_id,
            status: ImportStatus::Pending,
            message: "File queued successfully".to_string(),
        }),
    ))
}

/// Build upload routes
pub fn upload_routes() -> Router<AppState> {
    Router::new()
        .route("/transcripts", post(upload_transcript))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
}
