//! Codec probing and strategy selection
//!
//! Runs ffprobe against the source and decides how much work FFmpeg has to
//! do: nothing but remuxing (`copy`), re-encoding only the audio
//! (`selective`), or a full re-encode. A failed probe never fails the job;
//! it degrades to the full re-encode with codecs reported as unknown.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use tokio::process::Command;
use tracing::{debug, warn};

/// H.264 profiles browsers play back natively inside HLS.
const COMPATIBLE_PROFILES: &[&str] = &["baseline", "main", "high", "constrained baseline"];

/// How FFmpeg will be driven for this source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscodeStrategy {
    /// Both streams already HLS-compatible; remux only.
    Copy,
    /// Video compatible, audio is not; copy video, re-encode audio to AAC.
    Selective,
    /// Full re-encode with libx264 + AAC.
    Reencode,
}

impl TranscodeStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Copy => "copy",
            Self::Selective => "selective",
            Self::Reencode => "reencode",
        }
    }
}

/// What ffprobe learned about the source.
#[derive(Debug, Clone)]
pub struct SourceProbe {
    pub video_codec: String,
    pub audio_codec: Option<String>,
    pub video_profile: Option<String>,
    pub video_level: Option<i64>,
    pub container: String,
}

impl SourceProbe {
    /// Probe result used when ffprobe fails or emits garbage.
    pub fn unknown() -> Self {
        Self {
            video_codec: "unknown".to_string(),
            audio_codec: Some("unknown".to_string()),
            video_profile: None,
            video_level: None,
            container: "unknown".to_string(),
        }
    }

    fn video_compatible(&self) -> bool {
        if !self.video_codec.eq_ignore_ascii_case("h264") {
            return false;
        }
        match self.video_profile.as_deref() {
            Some(profile) => {
                let profile = profile.to_ascii_lowercase();
                COMPATIBLE_PROFILES.contains(&profile.as_str())
            }
            None => false,
        }
    }

    fn audio_compatible(&self) -> bool {
        match self.audio_codec.as_deref() {
            Some(codec) => codec.eq_ignore_ascii_case("aac"),
            // No audio stream: nothing to re-encode.
            None => true,
        }
    }

    /// Source can go straight into an HLS playlist without re-encoding.
    pub fn is_hls_compatible(&self) -> bool {
        self.video_compatible() && self.audio_compatible()
    }

    pub fn recommended_strategy(&self) -> TranscodeStrategy {
        if self.video_compatible() {
            if self.audio_compatible() {
                TranscodeStrategy::Copy
            } else {
                TranscodeStrategy::Selective
            }
        } else {
            TranscodeStrategy::Reencode
        }
    }

    /// The MP4 leg can reuse the source file verbatim.
    pub fn is_mp4_container(&self) -> bool {
        // ffprobe reports demuxer lists like "mov,mp4,m4a,3gp,3g2,mj2".
        self.container
            .split(',')
            .any(|name| name.trim().eq_ignore_ascii_case("mp4"))
    }
}

#[derive(Debug, Deserialize)]
struct FFprobeOutput {
    format: FFprobeFormat,
    streams: Vec<FFprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FFprobeFormat {
    format_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FFprobeStream {
    codec_type: String,
    codec_name: Option<String>,
    profile: Option<String>,
    level: Option<i64>,
}

/// Parse raw ffprobe JSON into a [`SourceProbe`].
pub fn parse_probe_output(json: &str) -> Result<SourceProbe> {
    let probe: FFprobeOutput =
        serde_json::from_str(json).context("Failed to parse ffprobe JSON output")?;

    let video = probe
        .streams
        .iter()
        .find(|s| s.codec_type == "video")
        .ok_or_else(|| anyhow::anyhow!("No video stream found"))?;
    let audio = probe.streams.iter().find(|s| s.codec_type == "audio");

    Ok(SourceProbe {
        video_codec: video
            .codec_name
            .clone()
            .unwrap_or_else(|| "unknown".to_string()),
        audio_codec: audio.and_then(|s| s.codec_name.clone()),
        video_profile: video.profile.clone(),
        video_level: video.level,
        container: probe
            .format
            .format_name
            .unwrap_or_else(|| "unknown".to_string()),
    })
}

/// Probe the source file. Infallible by design: any failure degrades to
/// [`SourceProbe::unknown`], which forces the re-encode strategy.
pub async fn probe_source(ffprobe: &Path, source: &Path) -> SourceProbe {
    let output = Command::new(ffprobe)
        .args([
            "-v",
            "error",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ])
        .arg(source)
        .output()
        .await;

    let output = match output {
        Ok(output) if output.status.success() => output,
        Ok(output) => {
            warn!(
                source = ?source,
                stderr = %String::from_utf8_lossy(&output.stderr),
                "ffprobe failed, falling back to re-encode"
            );
            return SourceProbe::unknown();
        }
        Err(e) => {
            warn!(source = ?source, error = %e, "ffprobe could not be executed");
            return SourceProbe::unknown();
        }
    };

    match parse_probe_output(&String::from_utf8_lossy(&output.stdout)) {
        Ok(probe) => {
            debug!(
                video = %probe.video_codec,
                audio = ?probe.audio_codec,
                profile = ?probe.video_profile,
                container = %probe.container,
                "source probed"
            );
            probe
        }
        Err(e) => {
            warn!(source = ?source, error = %e, "unusable ffprobe output");
            SourceProbe::unknown()
        }
    }
}
