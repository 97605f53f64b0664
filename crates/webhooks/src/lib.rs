//! Webhook dispatcher
//!
//! Delivers terminal-state callbacks with a bounded retry budget. Delivery
//! is at-least-once from the receiver's view: the first attempt happens
//! inline at the end of a job, later attempts come from the sweeper. A
//! webhook outcome never feeds back into the job's own state; only the
//! callback fields on the record move.

use anyhow::Result;
use common::models::video::{CallbackStatus, VideoRecord, VideoStatus, MAX_CALLBACK_ATTEMPTS};
use serde::Serialize;
use std::time::Duration;
use tracing::{info, warn};
use video_store::VideoStore;

/// Per-request timeout for callback POSTs.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// How often the sweeper re-drives undelivered callbacks.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Wire payload POSTed to the callback URL.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackPayload {
    pub video_id: String,
    pub filename: String,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mp4_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CallbackPayload {
    /// Payload for a record in a terminal state.
    pub fn for_record(record: &VideoRecord) -> Self {
        match record.status {
            VideoStatus::Failed => Self {
                video_id: record.id.clone(),
                filename: record.filename.clone(),
                status: "failed",
                stream_url: None,
                thumbnail_url: None,
                mp4_url: None,
                error: record.error.clone(),
            },
            _ => Self {
                video_id: record.id.clone(),
                filename: record.filename.clone(),
                status: "completed",
                stream_url: record.stream_url.clone(),
                thumbnail_url: record.thumbnail_url.clone(),
                mp4_url: record.mp4_url.clone(),
                error: None,
            },
        }
    }
}

/// Callback dispatcher. Cheap to clone.
#[derive(Clone)]
pub struct WebhookDispatcher {
    http: reqwest::Client,
    store: VideoStore,
}

impl WebhookDispatcher {
    pub fn new(store: VideoStore) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { http, store }
    }

    /// Attempt one delivery for the record, applying the outcome rules.
    ///
    /// Records without a callback URL, with a terminal callback status, or
    /// with an exhausted budget are skipped. The returned status reflects
    /// the record after the attempt.
    pub async fn dispatch(&self, record: &VideoRecord) -> Result<CallbackStatus> {
        let Some(url) = record.callback_url.as_deref() else {
            return Ok(record.callback_status);
        };
        if record.callback_status != CallbackStatus::Pending
            || record.callback_retry_count >= MAX_CALLBACK_ATTEMPTS
        {
            return Ok(record.callback_status);
        }

        let payload = CallbackPayload::for_record(record);
        let delivered = match self.http.post(url).json(&payload).send().await {
            Ok(response) => {
                let ok = response.status() == reqwest::StatusCode::OK;
                if !ok {
                    warn!(
                        upload_id = %record.id,
                        status = %response.status(),
                        "callback rejected"
                    );
                }
                ok
            }
            Err(e) => {
                warn!(upload_id = %record.id, error = %e, "callback request failed");
                false
            }
        };

        let status = self
            .store
            .record_callback_attempt(&record.id, delivered)
            .await?;

        info!(
            upload_id = %record.id,
            delivered,
            callback_status = ?status,
            "callback attempt recorded"
        );
        Ok(status)
    }

    /// Periodically re-drive callbacks that are still pending.
    ///
    /// Runs forever; store errors are logged and the next tick retries.
    pub async fn run_sweeper(self, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; skip it so a fresh boot does not
        // race the inline first attempts.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let pending = match self.store.list_pending_callbacks().await {
                Ok(pending) => pending,
                Err(e) => {
                    warn!(error = %e, "callback sweep query failed");
                    continue;
                }
            };

            for record in pending {
                if let Err(e) = self.dispatch(&record).await {
                    warn!(upload_id = %record.id, error = %e, "callback sweep attempt failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::Router;
    use common::models::video::{UploadType, VideoPatch};
    use sqlx::sqlite::SqlitePoolOptions;
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    async fn store() -> VideoStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        video_store::MIGRATOR.run(&pool).await.unwrap();
        VideoStore::new(pool)
    }

    async fn completed_record(store: &VideoStore, id: &str, callback_url: &str) -> VideoRecord {
        let record = VideoRecord::new_session(
            id.to_string(),
            "a.mp4".to_string(),
            Some(callback_url.to_string()),
            None,
            false,
            UploadType::Resumable,
        );
        store.create(&record).await.unwrap();
        store.try_acquire_for_processing(id).await.unwrap();
        store
            .update(
                id,
                VideoPatch::completed(
                    "https://b.s3/x/index.m3u8".into(),
                    Some("https://b.s3/x/thumbnail.jpg".into()),
                    None,
                ),
            )
            .await
            .unwrap();
        store.get(id).await.unwrap().unwrap()
    }

    /// Loopback receiver that fails the first `failures` requests with 500.
    async fn spawn_receiver(failures: usize) -> (SocketAddr, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let state = hits.clone();

        let app = Router::new()
            .route(
                "/hook",
                post(move |State(hits): State<Arc<AtomicUsize>>| async move {
                    let n = hits.fetch_add(1, Ordering::SeqCst);
                    if n < failures {
                        StatusCode::INTERNAL_SERVER_ERROR
                    } else {
                        StatusCode::OK
                    }
                }),
            )
            .with_state(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });
        (addr, hits)
    }

    #[test]
    fn test_payload_shapes() {
        let mut record = VideoRecord::new_session(
            "vid-1".to_string(),
            "a.mp4".to_string(),
            Some("http://cb".to_string()),
            None,
            false,
            UploadType::Resumable,
        );
        record.status = VideoStatus::Completed;
        record.stream_url = Some("https://b.s3/vid-1/index.m3u8".to_string());
        record.thumbnail_url = Some("https://b.s3/vid-1/thumbnail.jpg".to_string());

        let value = serde_json::to_value(CallbackPayload::for_record(&record)).unwrap();
        assert_eq!(value["videoId"], "vid-1");
        assert_eq!(value["status"], "completed");
        assert_eq!(value["streamUrl"], "https://b.s3/vid-1/index.m3u8");
        assert!(value.get("mp4Url").is_none());
        assert!(value.get("error").is_none());

        record.status = VideoStatus::Failed;
        record.error = Some("transcode failed".to_string());
        let value = serde_json::to_value(CallbackPayload::for_record(&record)).unwrap();
        assert_eq!(value["status"], "failed");
        assert_eq!(value["error"], "transcode failed");
        assert!(value.get("streamUrl").is_none());
    }

    #[tokio::test]
    async fn test_failure_then_recovery() {
        let store = store().await;
        let (addr, hits) = spawn_receiver(1).await;
        let url = format!("http://{}/hook", addr);
        let record = completed_record(&store, "v1", &url).await;

        let dispatcher = WebhookDispatcher::new(store.clone());

        // First attempt gets a 500: still pending, one retry consumed.
        let status = dispatcher.dispatch(&record).await.unwrap();
        assert_eq!(status, CallbackStatus::Pending);
        let record = store.get("v1").await.unwrap().unwrap();
        assert_eq!(record.callback_retry_count, 1);
        assert!(record.callback_last_attempt.is_some());

        // Sweep-style second attempt succeeds and is terminal.
        let status = dispatcher.dispatch(&record).await.unwrap();
        assert_eq!(status, CallbackStatus::Completed);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        let record = store.get("v1").await.unwrap().unwrap();
        assert!(record.callback_retry_count <= MAX_CALLBACK_ATTEMPTS);

        // Terminal status: no further POSTs.
        dispatcher.dispatch(&record).await.unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_retry_budget_exhaustion() {
        let store = store().await;
        let (addr, hits) = spawn_receiver(usize::MAX).await;
        let url = format!("http://{}/hook", addr);
        completed_record(&store, "v1", &url).await;

        let dispatcher = WebhookDispatcher::new(store.clone());

        for _ in 0..MAX_CALLBACK_ATTEMPTS {
            let record = store.get("v1").await.unwrap().unwrap();
            dispatcher.dispatch(&record).await.unwrap();
        }

        let record = store.get("v1").await.unwrap().unwrap();
        assert_eq!(record.callback_status, CallbackStatus::Failed);
        assert_eq!(record.callback_retry_count, MAX_CALLBACK_ATTEMPTS);
        assert_eq!(hits.load(Ordering::SeqCst), MAX_CALLBACK_ATTEMPTS as usize);

        // Exhausted: the dispatcher refuses to POST again.
        dispatcher.dispatch(&record).await.unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), MAX_CALLBACK_ATTEMPTS as usize);
    }

    #[tokio::test]
    async fn test_unreachable_receiver_counts_as_failure() {
        let store = store().await;
        // Nothing listens on this port.
        let record = completed_record(&store, "v1", "http://127.0.0.1:1/hook").await;

        let dispatcher = WebhookDispatcher::new(store.clone());
        let status = dispatcher.dispatch(&record).await.unwrap();
        assert_eq!(status, CallbackStatus::Pending);

        let record = store.get("v1").await.unwrap().unwrap();
        assert_eq!(record.callback_retry_count, 1);
    }

    #[tokio::test]
    async fn test_records_without_callback_are_skipped() {
        let store = store().await;
        let record = VideoRecord::new_session(
            "v1".to_string(),
            "a.mp4".to_string(),
            None,
            None,
            false,
            UploadType::Resumable,
        );
        store.create(&record).await.unwrap();

        let dispatcher = WebhookDispatcher::new(store.clone());
        let status = dispatcher.dispatch(&record).await.unwrap();
        assert_eq!(status, CallbackStatus::Pending);
        let record = store.get("v1").await.unwrap().unwrap();
        assert_eq!(record.callback_retry_count, 0);
    }
}
