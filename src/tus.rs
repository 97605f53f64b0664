//! Resumable upload endpoints
//!
//! File-backed, resume-by-offset uploads. The wire protocol is the minimal
//! creation/HEAD/PATCH subset with `Upload-Length`, `Upload-Offset` and
//! `Upload-Metadata` headers; the pipeline only cares about the two hooks:
//! creation (session precondition + policy re-check) and finish (record
//! update + job publish). Bytes accumulate in `{UPLOAD_PATH}/{uploadId}`
//! with the declared length in a `.info` sidecar.

use crate::state::AppState;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::routing::{head, post};
use axum::Router;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use common::models::video::{TranscodeJob, UploadType, VideoPatch, VideoStatus};
use common::response::ApiError;
use job_queue::VIDEO_PROCESSING_QUEUE;
use media_core::validate_upload;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{error, info};

const TUS_VERSION: &str = "1.0.0";

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/tus", post(create_upload))
        .route("/tus/{id}", head(upload_offset).patch(append_chunk))
}

/// Sidecar persisted next to the data file at creation time.
#[derive(Debug, Serialize, Deserialize)]
struct UploadInfo {
    upload_id: String,
    filename: String,
    upload_length: u64,
}

/// Parse `Upload-Metadata`: comma-separated `key base64value` pairs.
fn parse_upload_metadata(header: &str) -> HashMap<String, String> {
    let mut metadata = HashMap::new();
    for pair in header.split(',') {
        let mut parts = pair.trim().splitn(2, ' ');
        let Some(key) = parts.next().filter(|k| !k.is_empty()) else {
            continue;
        };
        let value = parts
            .next()
            .and_then(|raw| BASE64.decode(raw.trim()).ok())
            .and_then(|bytes| String::from_utf8(bytes).ok())
            .unwrap_or_default();
        metadata.insert(key.to_string(), value);
    }
    metadata
}

fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u64>().ok())
}

fn tus_headers(offset: u64, length: Option<u64>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert("Tus-Resumable", HeaderValue::from_static(TUS_VERSION));
    headers.insert("Upload-Offset", HeaderValue::from(offset));
    if let Some(length) = length {
        headers.insert("Upload-Length", HeaderValue::from(length));
    }
    headers.insert("Cache-Control", HeaderValue::from_static("no-store"));
    headers
}

async fn read_info(state: &AppState, upload_id: &str) -> Result<UploadInfo, ApiError> {
    let raw = fs::read(state.upload_info_path(upload_id))
        .await
        .map_err(|_| ApiError::NotFound(format!("No resumable upload for id {upload_id}")))?;
    serde_json::from_slice(&raw)
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("corrupt upload sidecar: {e}")))
}

/// Creation hook: the referenced record must exist and still be uploading,
/// and the declared length must pass the same policy as session creation.
async fn create_upload(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<(StatusCode, HeaderMap), ApiError> {
    let upload_length = header_u64(&headers, "Upload-Length")
        .ok_or_else(|| ApiError::Validation("Upload-Length header is required".to_string()))?;

    let metadata = headers
        .get("Upload-Metadata")
        .and_then(|value| value.to_str().ok())
        .map(parse_upload_metadata)
        .unwrap_or_default();
    let upload_id = metadata
        .get("uploadId")
        .cloned()
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ApiError::Validation("uploadId metadata is required".to_string()))?;

    let record = state
        .store
        .get(&upload_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("No upload session for id {upload_id}")))?;
    if record.status != VideoStatus::Uploading {
        return Err(ApiError::StateConflict(format!(
            "Upload session is {}, expected uploading",
            record.status.as_str()
        )));
    }

    validate_upload(
        &record.filename,
        upload_length as i64,
        UploadType::Resumable,
        &state.upload_policy(),
    )
    .map_err(|e| ApiError::Validation(e.to_string()))?;

    fs::write(state.upload_data_path(&upload_id), b"")
        .await
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("failed to create upload file: {e}")))?;

    let info = UploadInfo {
        upload_id: upload_id.clone(),
        filename: record.filename.clone(),
        upload_length,
    };
    let encoded = serde_json::to_vec(&info)
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("failed to encode sidecar: {e}")))?;
    fs::write(state.upload_info_path(&upload_id), encoded)
        .await
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("failed to write sidecar: {e}")))?;

    info!(upload_id = %upload_id, upload_length, "resumable upload created");

    let mut response_headers = tus_headers(0, Some(upload_length));
    let location = format!("{}/api/v1/tus/{}", state.config.vellum_host, upload_id);
    response_headers.insert(
        "Location",
        HeaderValue::from_str(&location)
            .map_err(|e| ApiError::Internal(anyhow::anyhow!("bad location header: {e}")))?,
    );

    Ok((StatusCode::CREATED, response_headers))
}

/// Offset probe used by clients to resume after an interruption.
async fn upload_offset(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<(StatusCode, HeaderMap), ApiError> {
    let info = read_info(&state, &id).await?;
    let offset = fs::metadata(state.upload_data_path(&id))
        .await
        .map(|m| m.len())
        .map_err(|_| ApiError::NotFound(format!("No resumable upload for id {id}")))?;

    Ok((StatusCode::OK, tus_headers(offset, Some(info.upload_length))))
}

/// Append a chunk at the declared offset. Completing the declared length
/// fires the finish hook: progress reset to 0 and the job published.
async fn append_chunk(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, HeaderMap), ApiError> {
    let info = read_info(&state, &id).await?;
    let record = state
        .store
        .get(&id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("No upload session for id {id}")))?;
    if record.status != VideoStatus::Uploading {
        return Err(ApiError::StateConflict(format!(
            "Upload session is {}, expected uploading",
            record.status.as_str()
        )));
    }

    let declared_offset = header_u64(&headers, "Upload-Offset")
        .ok_or_else(|| ApiError::Validation("Upload-Offset header is required".to_string()))?;

    let data_path = state.upload_data_path(&id);
    let current_offset = fs::metadata(&data_path)
        .await
        .map(|m| m.len())
        .map_err(|_| ApiError::NotFound(format!("No resumable upload for id {id}")))?;

    if declared_offset != current_offset {
        return Err(ApiError::StateConflict(format!(
            "Upload-Offset {declared_offset} does not match current offset {current_offset}"
        )));
    }

    let new_offset = current_offset + body.len() as u64;
    if new_offset > info.upload_length {
        return Err(ApiError::Validation(format!(
            "Chunk overruns the declared length of {} bytes",
            info.upload_length
        )));
    }

    let mut file = fs::OpenOptions::new()
        .append(true)
        .open(&data_path)
        .await
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("failed to open upload file: {e}")))?;
    file.write_all(&body)
        .await
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("failed to append chunk: {e}")))?;
    file.flush()
        .await
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("failed to flush chunk: {e}")))?;

    if new_offset == info.upload_length {
        finish_upload(&state, &record.id, &data_path).await?;
    }

    Ok((StatusCode::NO_CONTENT, tus_headers(new_offset, Some(info.upload_length))))
}

/// Finish hook: the record shows "bytes complete" (progress back to 0) and
/// the worker takes over via the queue.
async fn finish_upload(
    state: &AppState,
    upload_id: &str,
    data_path: &std::path::Path,
) -> Result<(), ApiError> {
    let record = state
        .store
        .get(upload_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("No upload session for id {upload_id}")))?;

    // Bytes are complete; progress winds back to 0 for the processing run.
    state
        .store
        .update(upload_id, VideoPatch::progress(0))
        .await?;

    let job = TranscodeJob {
        upload_id: record.id.clone(),
        file_path: data_path.to_path_buf(),
        filename: record.filename.clone(),
        packager: record.packager.clone(),
        callback_url: record.callback_url.clone(),
        s3_path: record.s3_path.clone(),
        upload_to_s3: record.upload_to_s3,
    };
    state
        .queue
        .publish(VIDEO_PROCESSING_QUEUE, &job)
        .await
        .map_err(|e| {
            error!(upload_id = %upload_id, error = %e, "failed to enqueue finished upload");
            ApiError::Internal(e)
        })?;

    info!(upload_id = %upload_id, "resumable upload finished, job queued");
    Ok(())
}
