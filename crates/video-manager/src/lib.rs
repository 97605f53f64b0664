//! Video processing core
//!
//! This crate owns everything between "bytes landed on disk" and "artifacts
//! live in the object store":
//! - Codec probing and transcoding strategy selection
//! - FFmpeg invocation (HLS, thumbnail, optional MP4 render)
//! - The per-job pipeline with its idempotency re-checks
//! - Best-effort cleanup of job artifacts

pub mod cleanup;
pub mod ffmpeg;
pub mod pipeline;
pub mod probe;

pub use ffmpeg::FFmpegTools;
pub use pipeline::{transcode_and_upload, PipelineContext, PipelineResult};
pub use probe::{probe_source, SourceProbe, TranscodeStrategy};
