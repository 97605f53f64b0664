//! vellum-stream: video upload and HLS processing service
//!
//! One process hosts the HTTP ingress surface and one queue worker. A
//! video travels: session creation -> resumable or direct upload ->
//! durable queue -> probe -> FFmpeg -> object-store publication -> webhook
//! -> cleanup, with the record store carrying the authoritative state.

mod api;
mod auth;
mod state;
mod tus;
mod worker;

use anyhow::{Context, Result};
use common::config::Config;
use job_queue::JobQueue;
use object_store::ObjectStorePublisher;
use sqlx::sqlite::SqlitePoolOptions;
use state::AppState;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use video_manager::cleanup::run_upload_sweeper;
use video_manager::pipeline::PipelineContext;
use video_manager::FFmpegTools;
use video_store::VideoStore;
use webhooks::{WebhookDispatcher, SWEEP_INTERVAL};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = Arc::new(Config::from_env()?);
    tokio::fs::create_dir_all(&config.upload_path)
        .await
        .context("failed to create upload directory")?;

    // Store first: an unopenable store is an irrecoverable startup failure.
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&format!("sqlite:{}?mode=rwc", config.database_path))
        .await
        .context("failed to open video record store")?;
    video_store::MIGRATOR
        .run(&pool)
        .await
        .context("failed to run store migrations")?;
    let store = VideoStore::new(pool);

    // Broker next: bounded retries, then give up with a non-zero exit.
    let queue = Arc::new(JobQueue::new(&config.amqp));
    queue.connect().await?;

    let tools = FFmpegTools::default();
    if let Err(e) = tools.verify().await {
        warn!(error = %e, "ffmpeg unavailable; jobs will fail until it is installed");
    }

    let publisher = ObjectStorePublisher::new(&config.s3).await;
    let dispatcher = WebhookDispatcher::new(store.clone());

    let pipeline = PipelineContext {
        store: store.clone(),
        publisher,
        tools,
        config: config.clone(),
    };
    tokio::spawn(worker::run_worker(
        pipeline,
        dispatcher.clone(),
        queue.clone(),
    ));
    tokio::spawn(dispatcher.clone().run_sweeper(SWEEP_INTERVAL));
    tokio::spawn(run_upload_sweeper(
        store.clone(),
        config.upload_path.clone(),
    ));

    let app_state = Arc::new(AppState {
        config: config.clone(),
        store,
        queue,
    });
    let app = api::router(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    info!(%addr, "vellum-stream listening");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    axum::serve(listener, app).await.context("server exited")?;

    Ok(())
}
