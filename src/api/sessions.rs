//! Upload session creation
//!
//! Mints the upload id, persists the fresh record and hands the client the
//! URLs it will need: where to push bytes now and where the playlist will
//! live once processing finishes.

use crate::state::AppState;
use axum::extract::State;
use axum::Json;
use common::models::video::{UploadType, VideoRecord};
use common::response::{ApiError, ApiResponse};
use common::urls::{object_prefix, public_object_url, sanitize_s3_path};
use media_core::validate_upload;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Advisory session lifetime returned to clients. Sessions are not
/// actively expired; late bytes for an `uploading` record are accepted.
const SESSION_EXPIRES_IN: u32 = 3600;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    pub filename: String,
    pub filesize: i64,
    #[serde(rename = "type", default)]
    pub upload_type: UploadType,
    pub callback_url: Option<String>,
    pub s3_path: Option<String>,
    #[serde(default)]
    pub upload_to_s3: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionResponse {
    pub upload_id: String,
    pub upload_url: String,
    pub video_url: String,
    pub expires_in: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mp4_url: Option<String>,
}

pub async fn create_session(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateSessionRequest>,
) -> Result<Json<ApiResponse<CreateSessionResponse>>, ApiError> {
    validate_upload(
        &request.filename,
        request.filesize,
        request.upload_type,
        &state.upload_policy(),
    )
    .map_err(|e| ApiError::Validation(e.to_string()))?;

    let s3_path = match request.s3_path.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(raw) => Some(sanitize_s3_path(raw).ok_or_else(|| {
            ApiError::Validation(
                "s3Path may only contain letters, digits, '/', '_' and '-'".to_string(),
            )
        })?),
    };

    let upload_id = Uuid::new_v4().to_string();
    let record = VideoRecord::new_session(
        upload_id.clone(),
        request.filename.clone(),
        request.callback_url.clone(),
        s3_path.clone(),
        request.upload_to_s3,
        request.upload_type,
    );
    state.store.create(&record).await?;

    let host = &state.config.vellum_host;
    let upload_url = match request.upload_type {
        UploadType::Resumable => format!("{host}/api/v1/tus/{upload_id}"),
        UploadType::Direct => format!("{host}/api/v1/video/{upload_id}/upload"),
    };

    let prefix = object_prefix(s3_path.as_deref(), &upload_id);
    let bucket = &state.config.s3.bucket;
    let endpoint = &state.config.s3.endpoint;
    let video_url = public_object_url(bucket, endpoint, &format!("{prefix}/index.m3u8"));
    let mp4_url = request
        .upload_to_s3
        .then(|| public_object_url(bucket, endpoint, &format!("{prefix}/video.mp4")));

    info!(
        upload_id = %upload_id,
        filename = %request.filename,
        upload_type = ?request.upload_type,
        "upload session created"
    );

    Ok(Json(ApiResponse::success(
        "Upload session created",
        CreateSessionResponse {
            upload_id,
            upload_url,
            video_url,
            expires_in: SESSION_EXPIRES_IN,
            mp4_url,
        },
    )))
}
