//! Direct upload ingress
//!
//! One-shot multipart upload for clients that do not speak the resumable
//! protocol. The file part is streamed to a temp file under a hard byte
//! cap, re-validated against the policy, renamed so its basename is the
//! upload id, and handed to the queue. Any failure deletes the temp file.

use crate::state::AppState;
use axum::extract::multipart::Field;
use axum::extract::{Multipart, Path, State};
use axum::Json;
use common::models::video::{TranscodeJob, UploadType, VideoStatus};
use common::response::{ApiError, ApiResponse};
use job_queue::VIDEO_PROCESSING_QUEUE;
use media_core::{format_limit, validate_upload, DIRECT_MAX_FILE_SIZE};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{error, info};
use uuid::Uuid;
use video_manager::cleanup::remove_file_quiet;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectUploadResponse {
    pub upload_id: String,
    pub filename: String,
    pub status: &'static str,
}

pub async fn direct_upload(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    mut multipart: Multipart,
) -> Result<Json<ApiResponse<DirectUploadResponse>>, ApiError> {
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

    let mut received: Option<(PathBuf, u64)> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::Validation(format!("Invalid multipart body: {e}")))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let temp_path = state
            .config
            .upload_path
            .join(format!("{}.part", Uuid::new_v4()));
        match save_field(field, &temp_path).await {
            Ok(size) => {
                received = Some((temp_path, size));
                break;
            }
            Err(e) => {
                remove_file_quiet(&temp_path).await;
                return Err(e);
            }
        }
    }

    let (temp_path, size) = received
        .ok_or_else(|| ApiError::Validation("Multipart field 'file' is required".to_string()))?;

    // Second validation pass, this time against the bytes that actually
    // arrived rather than the numbers the client declared.
    if let Err(e) = validate_upload(
        &record.filename,
        size as i64,
        UploadType::Direct,
        &state.upload_policy(),
    ) {
        remove_file_quiet(&temp_path).await;
        return Err(ApiError::Validation(e.to_string()));
    }

    let final_path = state.upload_data_path(&record.id);
    if let Err(e) = fs::rename(&temp_path, &final_path).await {
        remove_file_quiet(&temp_path).await;
        return Err(ApiError::Internal(anyhow::anyhow!(
            "failed to move upload into place: {e}"
        )));
    }

    let job = TranscodeJob {
        upload_id: record.id.clone(),
        file_path: final_path.clone(),
        filename: record.filename.clone(),
        packager: record.packager.clone(),
        callback_url: record.callback_url.clone(),
        s3_path: record.s3_path.clone(),
        upload_to_s3: record.upload_to_s3,
    };
    if let Err(e) = state.queue.publish(VIDEO_PROCESSING_QUEUE, &job).await {
        error!(upload_id = %record.id, error = %e, "failed to enqueue direct upload");
        remove_file_quiet(&final_path).await;
        return Err(ApiError::Internal(e));
    }

    info!(upload_id = %record.id, size, "direct upload accepted");

    Ok(Json(ApiResponse::success(
        "Upload received, processing queued",
        DirectUploadResponse {
            upload_id: record.id,
            filename: record.filename,
            status: "processing",
        },
    )))
}

/// Stream one multipart field to disk under the direct-upload byte cap.
async fn save_field(mut field: Field<'_>, path: &std::path::Path) -> Result<u64, ApiError> {
    let mut file = fs::File::create(path)
        .await
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("failed to create temp file: {e}")))?;

    let mut written: u64 = 0;
    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|e| ApiError::Validation(format!("Upload stream aborted: {e}")))?
    {
        written += chunk.len() as u64;
        if written > DIRECT_MAX_FILE_SIZE {
            return Err(ApiError::Validation(format!(
                "File size exceeds the {} limit for direct uploads",
                format_limit(DIRECT_MAX_FILE_SIZE)
            )));
        }
        file.write_all(&chunk)
            .await
            .map_err(|e| ApiError::Internal(anyhow::anyhow!("failed to write upload: {e}")))?;
    }

    file.flush()
        .await
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("failed to flush upload: {e}")))?;

    if written == 0 {
        return Err(ApiError::Validation("Uploaded file is empty".to_string()));
    }

    Ok(written)
}
