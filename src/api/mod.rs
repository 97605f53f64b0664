//! HTTP surface
//!
//! `/api/v1` carries the bearer-protected session, ingress and status
//! endpoints plus the resumable-upload routes (guarded by their session
//! preconditions instead of the bearer token). `/health` is open.

pub mod ingress;
pub mod sessions;
pub mod status;

use crate::auth;
use crate::state::AppState;
use crate::tus;
use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::{get, post};
use axum::{Json, Router};
use common::response::ApiResponse;
use media_core::DIRECT_MAX_FILE_SIZE;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub fn router(state: Arc<AppState>) -> Router {
    let protected = Router::new()
        .route("/video/create", post(sessions::create_session))
        .route("/video/{id}/upload", post(ingress::direct_upload))
        .route("/video/{id}/status", get(status::video_status))
        .route("/video/{id}/callback-status", get(status::callback_status))
        .route("/videos", get(status::list_videos))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_bearer,
        ));

    let api = protected.merge(tus::routes()).layer(DefaultBodyLimit::max(
        DIRECT_MAX_FILE_SIZE as usize + 1024 * 1024,
    ));

    Router::new()
        .nest("/api/v1", api)
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> Json<ApiResponse<&'static str>> {
    Json(ApiResponse::success("ok", "alive"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use common::config::{AmqpConfig, Config, S3Config};
    use http_body_util::BodyExt;
    use job_queue::JobQueue;
    use sqlx::sqlite::SqlitePoolOptions;
    use tower::util::ServiceExt;
    use video_store::VideoStore;

    const API_KEY: &str = "test-api-key";

    async fn test_state() -> Arc<AppState> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        video_store::MIGRATOR.run(&pool).await.unwrap();

        let config = Arc::new(Config {
            server_port: 0,
            upload_path: std::env::temp_dir().join("vellum-api-tests"),
            max_file_size: 100 * 1024 * 1024,
            allowed_file_types: vec!["video/mp4".to_string(), "video/quicktime".to_string()],
            s3: S3Config {
                access_key: "ak".to_string(),
                secret_key: "sk".to_string(),
                endpoint: "s3.example.com".to_string(),
                region: "us-east-1".to_string(),
                bucket: "clips".to_string(),
            },
            amqp: AmqpConfig {
                user: "guest".to_string(),
                password: "guest".to_string(),
                host: "localhost".to_string(),
            },
            api_key: API_KEY.to_string(),
            vellum_host: "http://localhost:8080".to_string(),
            database_path: ":memory:".to_string(),
        });

        Arc::new(AppState {
            config: config.clone(),
            store: VideoStore::new(pool),
            queue: Arc::new(JobQueue::new(&config.amqp)),
        })
    }

    fn authed_json_post(path: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(path)
            .header(header::AUTHORIZATION, format!("Bearer {API_KEY}"))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_requires_bearer_token() {
        let app = router(test_state().await);

        let request = Request::builder()
            .method("GET")
            .uri("/api/v1/videos")
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let request = Request::builder()
            .method("GET")
            .uri("/api/v1/videos")
            .header(header::AUTHORIZATION, "Bearer wrong-key")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_health_is_open() {
        let app = router(test_state().await);
        let request = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_create_session_resumable() {
        let state = test_state().await;
        let app = router(state.clone());

        let response = app
            .oneshot(authed_json_post(
                "/api/v1/video/create",
                serde_json::json!({
                    "filename": "a.mp4",
                    "filesize": 10485760,
                    "type": "tus"
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["status"], "success");
        let data = &body["data"];
        let upload_id = data["uploadId"].as_str().unwrap();
        assert!(data["uploadUrl"]
            .as_str()
            .unwrap()
            .ends_with(&format!("/api/v1/tus/{upload_id}")));
        assert_eq!(
            data["videoUrl"].as_str().unwrap(),
            &format!("https://clips.s3.example.com/{upload_id}/index.m3u8")
        );
        assert_eq!(data["expiresIn"], 3600);
        assert!(data.get("mp4Url").is_none());

        // The record exists and is uploading.
        let record = state.store.get(upload_id).await.unwrap().unwrap();
        assert_eq!(record.filename, "a.mp4");
        assert_eq!(record.progress, 0);
    }

    #[tokio::test]
    async fn test_create_session_direct_with_mp4() {
        let app = router(test_state().await);

        let response = app
            .oneshot(authed_json_post(
                "/api/v1/video/create",
                serde_json::json!({
                    "filename": "a.mp4",
                    "filesize": 1048576,
                    "type": "direct",
                    "uploadToS3": true
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        let data = &body["data"];
        let upload_id = data["uploadId"].as_str().unwrap();
        assert!(data["uploadUrl"]
            .as_str()
            .unwrap()
            .ends_with(&format!("/api/v1/video/{upload_id}/upload")));
        assert!(data["mp4Url"]
            .as_str()
            .unwrap()
            .ends_with(&format!("{upload_id}/video.mp4")));
    }

    #[tokio::test]
    async fn test_create_session_oversize_direct() {
        let app = router(test_state().await);

        let response = app
            .oneshot(authed_json_post(
                "/api/v1/video/create",
                serde_json::json!({
                    "filename": "b.mp4",
                    "filesize": 262144000,
                    "type": "direct"
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = body_json(response).await;
        assert_eq!(body["status"], "error");
        assert!(body["message"].as_str().unwrap().contains("200MB"));
    }

    #[tokio::test]
    async fn test_create_session_rejects_bad_s3_path() {
        let app = router(test_state().await);

        let response = app
            .oneshot(authed_json_post(
                "/api/v1/video/create",
                serde_json::json!({
                    "filename": "a.mp4",
                    "filesize": 1024,
                    "s3Path": "../etc"
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_create_session_custom_prefix() {
        let app = router(test_state().await);

        let response = app
            .oneshot(authed_json_post(
                "/api/v1/video/create",
                serde_json::json!({
                    "filename": "a.mp4",
                    "filesize": 1024,
                    "s3Path": "/v2/media"
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        let data = &body["data"];
        let upload_id = data["uploadId"].as_str().unwrap();
        assert!(data["videoUrl"]
            .as_str()
            .unwrap()
            .contains(&format!("/v2/media/{upload_id}/index.m3u8")));
    }

    #[tokio::test]
    async fn test_status_unknown_id_is_404() {
        let app = router(test_state().await);

        let request = Request::builder()
            .uri("/api/v1/video/nope/status")
            .header(header::AUTHORIZATION, format!("Bearer {API_KEY}"))
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    fn multipart_upload(path: &str) -> Request<Body> {
        let boundary = "vellumtestboundary";
        let body = format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; \
             filename=\"a.mp4\"\r\nContent-Type: video/mp4\r\n\r\nfakebytes\r\n--{boundary}--\r\n"
        );
        Request::builder()
            .method("POST")
            .uri(path)
            .header(header::AUTHORIZATION, format!("Bearer {API_KEY}"))
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={boundary}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn test_direct_upload_unknown_id_is_404() {
        let app = router(test_state().await);
        let response = app
            .oneshot(multipart_upload("/api/v1/video/missing/upload"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_direct_upload_wrong_state_is_409() {
        let state = test_state().await;
        let app = router(state.clone());

        let record = common::models::video::VideoRecord::new_session(
            "busy-1".to_string(),
            "a.mp4".to_string(),
            None,
            None,
            false,
            common::models::video::UploadType::Direct,
        );
        state.store.create(&record).await.unwrap();
        state
            .store
            .try_acquire_for_processing("busy-1")
            .await
            .unwrap();

        let response = app
            .oneshot(multipart_upload("/api/v1/video/busy-1/upload"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_video_status_returns_full_record() {
        let state = test_state().await;
        let app = router(state.clone());

        let record = common::models::video::VideoRecord::new_session(
            "vid-1".to_string(),
            "a.mp4".to_string(),
            Some("http://cb.example/hook".to_string()),
            None,
            false,
            common::models::video::UploadType::Resumable,
        );
        state.store.create(&record).await.unwrap();

        let request = Request::builder()
            .uri("/api/v1/video/vid-1/status")
            .header(header::AUTHORIZATION, format!("Bearer {API_KEY}"))
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        let data = &body["data"];
        assert_eq!(data["id"], "vid-1");
        assert_eq!(data["status"], "uploading");
        assert_eq!(data["callbackStatus"], "pending");
        assert_eq!(data["callbackRetryCount"], 0);

        let request = Request::builder()
            .uri("/api/v1/video/vid-1/callback-status")
            .header(header::AUTHORIZATION, format!("Bearer {API_KEY}"))
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        let body = body_json(response).await;
        assert_eq!(body["data"]["callbackUrl"], "http://cb.example/hook");
    }
}
