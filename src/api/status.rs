//! Status and listing endpoints

use crate::state::AppState;
use axum::extract::{Path, State};
use axum::Json;
use chrono::{DateTime, Utc};
use common::models::video::{CallbackStatus, VideoRecord};
use common::response::{ApiError, ApiResponse};
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackStatusResponse {
    pub callback_url: Option<String>,
    pub callback_status: CallbackStatus,
    pub callback_retry_count: i64,
    pub callback_last_attempt: Option<DateTime<Utc>>,
}

async fn fetch_record(state: &AppState, id: &str) -> Result<VideoRecord, ApiError> {
    state
        .store
        .get(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("No video record for id {id}")))
}

pub async fn video_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<VideoRecord>>, ApiError> {
    let record = fetch_record(&state, &id).await?;
    Ok(Json(ApiResponse::success("Video status", record)))
}

pub async fn callback_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<CallbackStatusResponse>>, ApiError> {
    let record = fetch_record(&state, &id).await?;
    Ok(Json(ApiResponse::success(
        "Callback status",
        CallbackStatusResponse {
            callback_url: record.callback_url,
            callback_status: record.callback_status,
            callback_retry_count: record.callback_retry_count,
            callback_last_attempt: record.callback_last_attempt,
        },
    )))
}

pub async fn list_videos(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<Vec<VideoRecord>>>, ApiError> {
    let records = state.store.list_all().await?;
    Ok(Json(ApiResponse::success("Video records", records)))
}
