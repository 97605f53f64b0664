//! Queue worker
//!
//! Consumes transcode jobs with prefetch 1 and drives each one through the
//! pipeline. The message is acknowledged immediately after the atomic
//! acquire: from that point the record row is the idempotency key, so a
//! redelivered message can never cause a second FFmpeg run on a job that
//! made real progress.

use common::models::video::{TranscodeJob, VideoPatch, VideoStatus};
use job_queue::{
    Acker, BasicAckOptions, BasicNackOptions, JobQueue, VIDEO_PROCESSING_QUEUE,
};
use std::sync::Arc;
use tracing::{error, info, warn};
use video_manager::cleanup::cleanup_job_artifacts;
use video_manager::pipeline::{transcode_and_upload, work_dir_for, PipelineContext, PipelineResult};
use webhooks::WebhookDispatcher;

pub async fn run_worker(
    ctx: PipelineContext,
    dispatcher: WebhookDispatcher,
    queue: Arc<JobQueue>,
) {
    let ctx = Arc::new(ctx);
    let dispatcher = Arc::new(dispatcher);

    queue
        .consume(VIDEO_PROCESSING_QUEUE, "vellum-worker", move |job, acker| {
            let ctx = ctx.clone();
            let dispatcher = dispatcher.clone();
            async move {
                handle_delivery(&ctx, &dispatcher, job, acker).await;
            }
        })
        .await;
}

async fn handle_delivery(
    ctx: &PipelineContext,
    dispatcher: &WebhookDispatcher,
    job: TranscodeJob,
    acker: Acker,
) {
    let upload_id = job.upload_id.clone();

    let acquired = match ctx.store.try_acquire_for_processing(&upload_id).await {
        Ok((acquired, record)) => {
            // The guard ran; the broker's copy is no longer needed either way.
            if let Err(e) = acker.ack(BasicAckOptions::default()).await {
                error!(upload_id = %upload_id, error = %e, "failed to ack delivery");
            }
            if !acquired {
                info!(
                    upload_id = %upload_id,
                    status = ?record.map(|r| r.status),
                    "duplicate delivery skipped"
                );
                return;
            }
            true
        }
        Err(e) => {
            // Store unavailable: leave the message with the broker.
            error!(upload_id = %upload_id, error = %e, "processing acquire failed");
            if let Err(e) = acker
                .nack(BasicNackOptions {
                    requeue: true,
                    ..BasicNackOptions::default()
                })
                .await
            {
                error!(upload_id = %upload_id, error = %e, "failed to nack delivery");
            }
            false
        }
    };
    if !acquired {
        return;
    }

    info!(upload_id = %upload_id, filename = %job.filename, "job started");

    match transcode_and_upload(ctx, &job).await {
        Ok(PipelineResult::AlreadyCompleted { stream_url }) => {
            info!(upload_id = %upload_id, stream_url = %stream_url, "job was already completed");
        }
        Ok(PipelineResult::Finished(outcome)) => {
            let patch = VideoPatch::completed(
                outcome.stream_url,
                outcome.thumbnail_url,
                outcome.mp4_url,
            );
            if let Err(e) = ctx.store.update(&upload_id, patch).await {
                error!(upload_id = %upload_id, error = %e, "failed to mark job completed");
            } else {
                info!(
                    upload_id = %upload_id,
                    strategy = outcome.strategy.as_str(),
                    "job completed"
                );
            }
        }
        Err(e) => {
            error!(upload_id = %upload_id, error = %format!("{e:#}"), "job failed");
            if let Err(e) = ctx.store.mark_failed(&upload_id, &format!("{e:#}")).await {
                error!(upload_id = %upload_id, error = %e, "failed to record job failure");
            }
        }
    }

    // First callback attempt, inline. Failures stay on the record and the
    // sweeper picks them up; nothing here can change the job outcome.
    match ctx.store.get(&upload_id).await {
        Ok(Some(record))
            if matches!(record.status, VideoStatus::Completed | VideoStatus::Failed) =>
        {
            if let Err(e) = dispatcher.dispatch(&record).await {
                warn!(upload_id = %upload_id, error = %e, "inline callback attempt failed");
            }
        }
        Ok(_) => {}
        Err(e) => warn!(upload_id = %upload_id, error = %e, "could not load record for callback"),
    }

    // Unconditional cleanup, both terminal states.
    let sidecar = ctx.config.upload_path.join(format!("{upload_id}.info"));
    match work_dir_for(&upload_id) {
        Ok(work_dir) => cleanup_job_artifacts(&job.file_path, &sidecar, &work_dir).await,
        Err(e) => warn!(upload_id = %upload_id, error = %e, "work dir unresolvable for cleanup"),
    }
}
