//! Video record model and job payload
//!
//! `VideoRecord` is the single persistent entity of the pipeline, keyed by
//! the upload id minted at session creation. All wire shapes serialize as
//! camelCase to match the public API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::path::PathBuf;

/// Upper bound on webhook delivery attempts per record.
pub const MAX_CALLBACK_ATTEMPTS: i64 = 4;

/// Lifecycle state of a video record.
///
/// Progression is `uploading -> processing -> {completed | failed}`; the
/// only sanctioned backward edge is `failed -> processing` on an explicit
/// retry via queue redelivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum VideoStatus {
    Uploading,
    Processing,
    Completed,
    Failed,
}

impl VideoStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uploading => "uploading",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// Webhook delivery state. `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum CallbackStatus {
    Pending,
    Completed,
    Failed,
}

/// How the bytes arrive. Routing hint only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum UploadType {
    #[serde(alias = "tus")]
    Resumable,
    Direct,
}

impl Default for UploadType {
    fn default() -> Self {
        Self::Resumable
    }
}

/// The persistent per-video record.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct VideoRecord {
    pub id: String,
    pub filename: String,
    pub status: VideoStatus,
    pub progress: i64,
    pub stream_url: Option<String>,
    pub thumbnail_url: Option<String>,
    pub mp4_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub packager: String,
    pub callback_url: Option<String>,
    pub callback_status: CallbackStatus,
    pub callback_retry_count: i64,
    pub callback_last_attempt: Option<DateTime<Utc>>,
    pub s3_path: Option<String>,
    pub upload_to_s3: bool,
    pub upload_type: UploadType,
}

impl VideoRecord {
    /// Fresh record as created by the session manager.
    pub fn new_session(
        id: String,
        filename: String,
        callback_url: Option<String>,
        s3_path: Option<String>,
        upload_to_s3: bool,
        upload_type: UploadType,
    ) -> Self {
        Self {
            id,
            filename,
            status: VideoStatus::Uploading,
            progress: 0,
            stream_url: None,
            thumbnail_url: None,
            mp4_url: None,
            created_at: Utc::now(),
            completed_at: None,
            error: None,
            packager: "ffmpeg".to_string(),
            callback_url,
            callback_status: CallbackStatus::Pending,
            callback_retry_count: 0,
            callback_last_attempt: None,
            s3_path,
            upload_to_s3,
            upload_type,
        }
    }
}

/// Partial update applied through the store's typed update operation.
///
/// `None` fields are left untouched. Setting `status` to `Completed` also
/// stamps `completed_at` inside the store.
#[derive(Debug, Clone, Default)]
pub struct VideoPatch {
    pub status: Option<VideoStatus>,
    pub progress: Option<i64>,
    pub stream_url: Option<String>,
    pub thumbnail_url: Option<String>,
    pub mp4_url: Option<String>,
    pub error: Option<String>,
}

impl VideoPatch {
    pub fn progress(progress: i64) -> Self {
        Self {
            progress: Some(progress),
            ..Default::default()
        }
    }

    pub fn completed(
        stream_url: String,
        thumbnail_url: Option<String>,
        mp4_url: Option<String>,
    ) -> Self {
        Self {
            status: Some(VideoStatus::Completed),
            progress: Some(100),
            stream_url: Some(stream_url),
            thumbnail_url,
            mp4_url,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: Some(VideoStatus::Failed),
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

/// Job message published to the processing queue when an upload finishes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscodeJob {
    pub upload_id: String,
    pub file_path: PathBuf,
    pub filename: String,
    pub packager: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callback_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub s3_path: Option<String>,
    #[serde(default)]
    pub upload_to_s3: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_serializes_camel_case() {
        let record = VideoRecord::new_session(
            "abc".to_string(),
            "a.mp4".to_string(),
            None,
            None,
            false,
            UploadType::Resumable,
        );
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["status"], "uploading");
        assert_eq!(value["uploadType"], "resumable");
        assert!(value.get("callbackRetryCount").is_some());
        assert!(value.get("callback_retry_count").is_none());
    }

    #[test]
    fn test_upload_type_accepts_tus_alias() {
        let parsed: UploadType = serde_json::from_str("\"tus\"").unwrap();
        assert_eq!(parsed, UploadType::Resumable);
        let parsed: UploadType = serde_json::from_str("\"direct\"").unwrap();
        assert_eq!(parsed, UploadType::Direct);
    }

    #[test]
    fn test_job_roundtrip_omits_empty_options() {
        let job = TranscodeJob {
            upload_id: "x".to_string(),
            file_path: PathBuf::from("/tmp/x"),
            filename: "a.mp4".to_string(),
            packager: "ffmpeg".to_string(),
            callback_url: None,
            s3_path: None,
            upload_to_s3: false,
        };
        let value = serde_json::to_value(&job).unwrap();
        assert!(value.get("callbackUrl").is_none());
        assert!(value.get("s3Path").is_none());

        let back: TranscodeJob = serde_json::from_value(value).unwrap();
        assert_eq!(back.upload_id, "x");
        assert!(!back.upload_to_s3);
    }
}
