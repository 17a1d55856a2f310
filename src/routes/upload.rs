//! Chunked upload endpoint.
//!
//! Guard order is fixed: identity, then the Session-Id/X-File-Uid pair,
//! then the multipart body, and only then the lock marker, so a request
//! rejected for bad metadata never creates the marker. The lock guard
//! stays alive for the rest of the request and the marker disappears on
//! every exit path including chunk failures.

use axum::extract::multipart::Field;
use axum::extract::{FromRequest, Multipart, Request, State};
use axum::http::HeaderMap;
use axum::routing::post;
use axum::{Json, Router};

use crate::auth;
use crate::error::{AppError, Result};
use crate::state::AppState;
use crate::upload::{upload_key, ChunkMeta, ChunkResponse, LockError, UploadError, UploadLock, UploadStatus};

const MISSING_HEADERS: &str = "Session-Id and X-File-Uid must be given in header";
const CONCURRENT_UPLOAD: &str = "Uploading the same file in two threads";

pub fn router() -> Router<AppState> {
    Router::new().route("/upload/", post(upload_chunk).get(upload_status))
}

fn upload_headers(headers: &HeaderMap) -> Result<(String, String)> {
    let session_id = headers
        .get("session-id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let file_uid = headers
        .get("x-file-uid")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if session_id.is_empty() || file_uid.is_empty() {
        return Err(AppError::BadRequest(MISSING_HEADERS.to_string()));
    }
    Ok((session_id.to_string(), file_uid.to_string()))
}

async fn identified_key(state: &AppState, headers: &HeaderMap) -> Result<String> {
    if auth::resolve_identity(state.db(), headers, None).await?.is_none() {
        return Err(AppError::Unauthorized);
    }
    let (session_id, file_uid) = upload_headers(headers)?;
    Ok(upload_key(
        &session_id,
        &file_uid,
        &state.config().auth.secret_key,
    ))
}

async fn acquire_lock(state: &AppState, key: &str) -> Result<UploadLock> {
    match UploadLock::acquire(&state.config().storage.upload_dir, key).await {
        Ok(lock) => Ok(lock),
        Err(LockError::AlreadyLocked) => Err(AppError::BadRequest(CONCURRENT_UPLOAD.to_string())),
        Err(LockError::Io(e)) => Err(AppError::Upload(UploadError::Io(e))),
    }
}

async fn upload_chunk(
    State(state): State<AppState>,
    request: Request,
) -> Result<Json<ChunkResponse>> {
    let headers = request.headers().clone();
    let key = identified_key(&state, &headers).await?;

    // Metadata problems must surface before the lock file is created.
    let multipart = Multipart::from_request(request, &())
        .await
        .map_err(|_| AppError::Upload(UploadError::MalformedMetadata))?;
    let (meta, data) = read_chunk_fields(multipart).await?;

    let _lock = acquire_lock(&state, &key).await?;
    let response = state.uploader().accept_chunk(&key, &meta, &data).await?;
    Ok(Json(response))
}

async fn upload_status(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<UploadStatus>> {
    let key = identified_key(&state, &headers).await?;
    let _lock = acquire_lock(&state, &key).await?;
    let status = state.uploader().status(&key).await?;
    Ok(Json(status))
}

async fn numeric_field(field: Field<'_>) -> Result<u64> {
    let text = field
        .text()
        .await
        .map_err(|_| AppError::Upload(UploadError::MalformedMetadata))?;
    text.trim()
        .parse()
        .map_err(|_| AppError::Upload(UploadError::MalformedMetadata))
}

async fn read_chunk_fields(mut multipart: Multipart) -> Result<(ChunkMeta, Vec<u8>)> {
    let mut total_size = None;
    let mut chunk_size = None;
    let mut chunk_number = None;
    let mut current_chunk_size = None;
    let mut filename = None;
    let mut payload = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|_| AppError::Upload(UploadError::MalformedMetadata))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "_totalSize" => total_size = Some(numeric_field(field).await?),
            "_chunkSize" => chunk_size = Some(numeric_field(field).await?),
            "_chunkNumber" => chunk_number = Some(numeric_field(field).await?),
            "_currentChunkSize" => current_chunk_size = Some(numeric_field(field).await?),
            "file" => {
                filename = Some(field.file_name().unwrap_or("").to_string());
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|_| AppError::Upload(UploadError::MalformedMetadata))?;
                payload = Some(bytes.to_vec());
            }
            _ => {}
        }
    }

    let (
        Some(total_size),
        Some(chunk_size),
        Some(chunk_number),
        Some(current_chunk_size),
        Some(filename),
        Some(payload),
    ) = (
        total_size,
        chunk_size,
        chunk_number,
        current_chunk_size,
        filename,
        payload,
    )
    else {
        return Err(AppError::Upload(UploadError::MalformedMetadata));
    };

    Ok((
        ChunkMeta {
            total_size,
            chunk_size,
            chunk_number,
            current_chunk_size,
            filename,
        },
        payload,
    ))
}
