//! Per-job processing pipeline
//!
//! Drives a single upload from "file on disk" to "published HLS tree":
//! probe, transcode (with the one-shot re-encode fallback), thumbnail,
//! optional MP4 leg, publication, metadata. The record row is re-checked
//! at entry and again before publication so a duplicate or racing actor
//! can never double-publish.

use crate::ffmpeg::{extract_thumbnail, render_mp4, run_hls_transcode, FFmpegTools};
use crate::probe::{probe_source, SourceProbe, TranscodeStrategy};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::config::Config;
use common::models::video::{TranscodeJob, VideoStatus};
use common::urls::{object_prefix, public_object_url};
use object_store::{ObjectStorePublisher, ProgressSink};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use video_store::VideoStore;

/// Everything a worker needs to run jobs.
#[derive(Clone)]
pub struct PipelineContext {
    pub store: VideoStore,
    pub publisher: ObjectStorePublisher,
    pub tools: FFmpegTools,
    pub config: Arc<Config>,
}

/// What a pipeline run produced.
#[derive(Debug)]
pub enum PipelineResult {
    /// The record was already completed (duplicate delivery or a racing
    /// actor); nothing was transcoded or published.
    AlreadyCompleted { stream_url: String },
    Finished(PipelineOutcome),
}

#[derive(Debug)]
pub struct PipelineOutcome {
    pub stream_url: String,
    pub thumbnail_url: Option<String>,
    pub mp4_url: Option<String>,
    pub strategy: TranscodeStrategy,
}

/// Sidecar metadata published next to the playlist.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactMetadata {
    pub name: String,
    pub packager: String,
    pub created_at: DateTime<Utc>,
    pub source: String,
    pub has_thumbnail: bool,
    pub transcoding_strategy: String,
    pub source_codecs: SourceCodecs,
    pub hls_compatible: bool,
}

#[derive(Debug, Serialize)]
pub struct SourceCodecs {
    pub video: String,
    pub audio: String,
    pub profile: String,
}

impl ArtifactMetadata {
    fn new(job: &TranscodeJob, probe: &SourceProbe, strategy: TranscodeStrategy, has_thumbnail: bool) -> Self {
        Self {
            name: job.filename.clone(),
            packager: job.packager.clone(),
            created_at: Utc::now(),
            source: job.filename.clone(),
            has_thumbnail,
            transcoding_strategy: strategy.as_str().to_string(),
            source_codecs: SourceCodecs {
                video: probe.video_codec.clone(),
                audio: probe
                    .audio_codec
                    .clone()
                    .unwrap_or_else(|| "none".to_string()),
                profile: probe
                    .video_profile
                    .clone()
                    .unwrap_or_else(|| "unknown".to_string()),
            },
            hls_compatible: probe.is_hls_compatible(),
        }
    }
}

/// Scratch directory for one job's artifacts.
pub fn work_dir_for(upload_id: &str) -> Result<PathBuf> {
    Ok(std::env::current_dir()
        .context("working directory unavailable")?
        .join("controllers")
        .join("videos")
        .join(upload_id))
}

/// Streams publication progress into the record row.
struct StoreProgress<'a> {
    store: &'a VideoStore,
    upload_id: &'a str,
}

#[async_trait]
impl ProgressSink for StoreProgress<'_> {
    async fn publish_progress(&self, percent: i64) {
        if let Err(e) = self.store.set_progress(self.upload_id, percent).await {
            warn!(upload_id = %self.upload_id, error = %e, "progress update failed");
        }
    }
}

/// Run the transcode-and-publish pipeline for one job.
///
/// Called by the worker after the atomic acquire succeeded, so the record
/// is in `processing` on entry. Returns the published stream URL (or the
/// existing one when the record turns out to be completed already).
pub async fn transcode_and_upload(
    ctx: &PipelineContext,
    job: &TranscodeJob,
) -> Result<PipelineResult> {
    let record = ctx
        .store
        .get(&job.upload_id)
        .await?
        .context("record missing for queued job")?;

    if record.status == VideoStatus::Completed {
        let stream_url = record
            .stream_url
            .context("completed record has no stream url")?;
        info!(upload_id = %job.upload_id, "record already completed, skipping");
        return Ok(PipelineResult::AlreadyCompleted { stream_url });
    }

    // A lingering error marks this as the retry of a failed run.
    if record.error.is_some() {
        info!(upload_id = %job.upload_id, "re-driving previously failed job");
        ctx.store.reset_for_retry(&job.upload_id).await?;
    }

    let work_dir = work_dir_for(&job.upload_id)?;
    tokio::fs::create_dir_all(&work_dir)
        .await
        .context("Failed to create work directory")?;

    let probe = probe_source(&ctx.tools.ffprobe, &job.file_path).await;
    let mut strategy = probe.recommended_strategy();

    // Transcode, falling back once to a full re-encode when a copy-based
    // strategy fails on a source that lied about its compatibility.
    match run_hls_transcode(&ctx.tools, strategy, &job.file_path, &work_dir).await {
        Ok(_) => {}
        Err(e) if strategy != TranscodeStrategy::Reencode => {
            warn!(
                upload_id = %job.upload_id,
                strategy = strategy.as_str(),
                error = %e,
                "transcode failed, retrying with full re-encode"
            );
            strategy = TranscodeStrategy::Reencode;
            run_hls_transcode(&ctx.tools, strategy, &job.file_path, &work_dir)
                .await
                .context("transcode failed after re-encode fallback")?;
        }
        Err(e) => return Err(e.context("transcode failed")),
    }
    ctx.store.set_progress(&job.upload_id, 60).await?;

    let thumbnail_path = work_dir.join("thumbnail.jpg");
    let has_thumbnail = match extract_thumbnail(&ctx.tools, &job.file_path, &thumbnail_path).await {
        Ok(()) => true,
        Err(e) => {
            warn!(upload_id = %job.upload_id, error = %e, "thumbnail extraction failed");
            false
        }
    };
    ctx.store.set_progress(&job.upload_id, 75).await?;

    let prefix = object_prefix(job.s3_path.as_deref(), &job.upload_id);
    let bucket = &ctx.config.s3.bucket;
    let endpoint = &ctx.config.s3.endpoint;

    // Optional MP4 leg. Failures here are logged and swallowed; the HLS
    // rendition is the product, the MP4 is a convenience.
    let mut mp4_published = false;
    let mut mp4_direct_source = None;
    if job.upload_to_s3 {
        if probe.is_mp4_container() {
            // Source is already MP4; upload it verbatim after the tree.
            mp4_direct_source = Some(job.file_path.clone());
        } else {
            let mp4_path = work_dir.join("video.mp4");
            match render_mp4(&ctx.tools, &job.file_path, &mp4_path).await {
                Ok(()) => mp4_published = true,
                Err(e) => {
                    warn!(upload_id = %job.upload_id, error = %e, "MP4 render failed");
                }
            }
        }
    }

    // Another actor may have finished this record while FFmpeg ran.
    if let Some(current) = ctx.store.get(&job.upload_id).await? {
        if current.status == VideoStatus::Completed {
            let stream_url = current
                .stream_url
                .context("completed record has no stream url")?;
            info!(upload_id = %job.upload_id, "record completed mid-run, skipping publication");
            return Ok(PipelineResult::AlreadyCompleted { stream_url });
        }
    }

    let pre_publish_progress = match strategy {
        TranscodeStrategy::Reencode => 80,
        _ => 85,
    };
    ctx.store
        .set_progress(&job.upload_id, pre_publish_progress)
        .await?;

    let sink = StoreProgress {
        store: &ctx.store,
        upload_id: &job.upload_id,
    };
    ctx.publisher
        .publish_tree(&work_dir, &prefix, Some(&sink))
        .await
        .context("artifact publication failed")?;

    if let Some(source) = mp4_direct_source {
        let key = format!("{prefix}/video.mp4");
        match ctx.publisher.put_file(&source, &key).await {
            Ok(()) => mp4_published = true,
            Err(e) => {
                warn!(upload_id = %job.upload_id, error = %e, "MP4 source upload failed");
            }
        }
    }

    let metadata = ArtifactMetadata::new(job, &probe, strategy, has_thumbnail);
    let metadata_path = work_dir.join("metadata.json");
    tokio::fs::write(
        &metadata_path,
        serde_json::to_vec_pretty(&metadata).context("Failed to encode metadata")?,
    )
    .await
    .context("Failed to write metadata.json")?;
    ctx.publisher
        .put_file(&metadata_path, &format!("{prefix}/metadata.json"))
        .await
        .context("metadata publication failed")?;

    let stream_url = public_object_url(bucket, endpoint, &format!("{prefix}/index.m3u8"));
    let thumbnail_url = has_thumbnail
        .then(|| public_object_url(bucket, endpoint, &format!("{prefix}/thumbnail.jpg")));
    let mp4_url =
        mp4_published.then(|| public_object_url(bucket, endpoint, &format!("{prefix}/video.mp4")));

    info!(
        upload_id = %job.upload_id,
        strategy = strategy.as_str(),
        stream_url = %stream_url,
        "pipeline finished"
    );

    Ok(PipelineResult::Finished(PipelineOutcome {
        stream_url,
        thumbnail_url,
        mp4_url,
        strategy,
    }))
}
