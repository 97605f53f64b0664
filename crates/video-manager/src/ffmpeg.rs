//! FFmpeg invocation layer
//!
//! Every command is built as an argument vector (paths with spaces stay
//! intact) and executed as an awaited child process. Command builders are
//! separated from execution so the exact flag sets stay unit-testable.

use crate::probe::TranscodeStrategy;
use anyhow::{Context, Result};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{info, warn};

/// Locations of the ffmpeg/ffprobe binaries.
#[derive(Debug, Clone)]
pub struct FFmpegTools {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
}

impl Default for FFmpegTools {
    fn default() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
        }
    }
}

impl FFmpegTools {
    /// Check that both binaries run. Called once at startup; a missing
    /// binary is reported but does not prevent the server from accepting
    /// uploads (jobs will fail with a recorded error instead).
    pub async fn verify(&self) -> Result<()> {
        for binary in [&self.ffmpeg, &self.ffprobe] {
            let output = Command::new(binary)
                .arg("-version")
                .output()
                .await
                .with_context(|| format!("Failed to execute {:?}", binary))?;
            if !output.status.success() {
                anyhow::bail!("{:?} is not working", binary);
            }
        }
        info!("ffmpeg and ffprobe verified");
        Ok(())
    }
}

/// Codec arguments for one transcoding strategy.
fn strategy_args(strategy: TranscodeStrategy) -> &'static [&'static str] {
    match strategy {
        TranscodeStrategy::Copy => &["-c", "copy"],
        TranscodeStrategy::Selective => &["-c:v", "copy", "-c:a", "aac", "-b:a", "128k"],
        TranscodeStrategy::Reencode => &[
            "-c:v", "libx264", "-preset", "medium", "-crf", "23", "-c:a", "aac", "-b:a", "128k",
        ],
    }
}

/// Full argument vector for the HLS transcode.
pub fn hls_args(strategy: TranscodeStrategy, source: &Path, playlist: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["-y".into(), "-i".into(), source.into()];
    args.extend(strategy_args(strategy).iter().map(OsString::from));
    args.extend(
        [
            "-start_number",
            "0",
            "-hls_time",
            "3",
            "-hls_list_size",
            "0",
            "-f",
            "hls",
        ]
        .iter()
        .map(OsString::from),
    );
    args.push(playlist.into());
    args
}

/// Argument vector for the single-frame thumbnail grab at one second in.
pub fn thumbnail_args(source: &Path, output: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        "-y".into(),
        "-ss".into(),
        "00:00:01.000".into(),
        "-i".into(),
        source.into(),
    ];
    args.extend(["-vframes", "1"].iter().map(OsString::from));
    args.push(output.into());
    args
}

/// Argument vector for the progressive MP4 render.
pub fn mp4_args(source: &Path, output: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["-y".into(), "-i".into(), source.into()];
    args.extend(
        [
            "-c:v",
            "libx264",
            "-preset",
            "medium",
            "-crf",
            "23",
            "-c:a",
            "aac",
            "-b:a",
            "128k",
            "-movflags",
            "+faststart",
        ]
        .iter()
        .map(OsString::from),
    );
    args.push(output.into());
    args
}

async fn run_ffmpeg(tools: &FFmpegTools, args: Vec<OsString>, what: &str) -> Result<()> {
    let output = Command::new(&tools.ffmpeg)
        .args(&args)
        .output()
        .await
        .with_context(|| format!("Failed to execute ffmpeg for {what}"))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        // ffmpeg spews progress on stderr; keep only the tail for the error.
        let tail: String = stderr
            .lines()
            .rev()
            .take(5)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect::<Vec<_>>()
            .join("\n");
        anyhow::bail!("ffmpeg {what} failed ({}): {tail}", output.status);
    }

    Ok(())
}

/// Transcode the source into an HLS playlist + segments inside `work_dir`.
///
/// Verifies the playlist actually exists afterwards; an FFmpeg run that
/// exits zero without producing it still counts as a failure.
pub async fn run_hls_transcode(
    tools: &FFmpegTools,
    strategy: TranscodeStrategy,
    source: &Path,
    work_dir: &Path,
) -> Result<PathBuf> {
    let playlist = work_dir.join("index.m3u8");
    info!(
        strategy = strategy.as_str(),
        source = ?source,
        "starting HLS transcode"
    );

    run_ffmpeg(tools, hls_args(strategy, source, &playlist), "HLS transcode").await?;

    if !playlist.exists() {
        anyhow::bail!("playlist was not created: {:?}", playlist);
    }

    Ok(playlist)
}

/// Extract a thumbnail frame. The caller treats failure as non-fatal.
pub async fn extract_thumbnail(tools: &FFmpegTools, source: &Path, output: &Path) -> Result<()> {
    run_ffmpeg(tools, thumbnail_args(source, output), "thumbnail").await?;

    if !output.exists() {
        warn!(output = ?output, "thumbnail file missing after extraction");
        anyhow::bail!("thumbnail file was not created");
    }
    Ok(())
}

/// Render a progressive MP4 next to the HLS artifacts.
pub async fn render_mp4(tools: &FFmpegTools, source: &Path, output: &Path) -> Result<()> {
    run_ffmpeg(tools, mp4_args(source, output), "MP4 render").await?;

    if !output.exists() {
        anyhow::bail!("MP4 file was not created");
    }
    Ok(())
}
