//! Object-store publisher
//!
//! Recursively uploads a finished work directory under a key prefix.
//! Uploads run in batches of 5 concurrent PUTs with a short yield between
//! batches so a large segment tree does not storm the store with small
//! objects. All objects are public-read.

use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::config::Credentials;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::ObjectCannedAcl;
use aws_sdk_s3::Client;
use common::config::S3Config;
use common::urls::sdk_endpoint_url;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info};

/// Concurrent PUTs per batch.
const BATCH_SIZE: usize = 5;

/// Pause between batches. Crude admission control against small-object storms.
const BATCH_PAUSE: Duration = Duration::from_millis(100);

/// Publication maps into this progress band on the owning record.
const PROGRESS_BAND_START: i64 = 80;
const PROGRESS_BAND_END: i64 = 95;

/// Receiver for coarse publication progress (the record row, in practice).
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn publish_progress(&self, percent: i64);
}

/// Content type for a published artifact, by extension.
pub fn content_type_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("m3u8") => "application/vnd.apple.mpegurl",
        Some("ts") => "video/MP2T",
        Some("m4s") => "video/iso.segment",
        Some("mp4") => "video/mp4",
        Some("mpd") => "application/dash+xml",
        Some("vtt") => "text/vtt",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        _ => "application/octet-stream",
    }
}

/// Progress value due after `done` of `total` files, if an update is due.
///
/// Small trees (<= 10 files) report nothing; larger ones report every 5
/// files, mapped into the 80-95 band and clamped at 95.
pub fn map_publish_progress(done: usize, total: usize) -> Option<i64> {
    if total <= 10 || done == 0 || done % 5 != 0 {
        return None;
    }
    let span = (PROGRESS_BAND_END - PROGRESS_BAND_START) as f64;
    let value = PROGRESS_BAND_START + ((done as f64 / total as f64) * span).round() as i64;
    Some(value.min(PROGRESS_BAND_END))
}

/// Handle to the object store. Cheap to clone.
#[derive(Clone)]
pub struct ObjectStorePublisher {
    client: Client,
    bucket: String,
}

impl ObjectStorePublisher {
    pub async fn new(config: &S3Config) -> Self {
        let credentials = Credentials::new(
            config.access_key.clone(),
            config.secret_key.clone(),
            None,
            None,
            "vellum-stream",
        );
        let shared = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .credentials_provider(credentials)
            .endpoint_url(sdk_endpoint_url(&config.endpoint))
            .load()
            .await;

        Self {
            client: Client::new(&shared),
            bucket: config.bucket.clone(),
        }
    }

    /// PUT a single local file under `key`, public-read.
    pub async fn put_file(&self, local: &Path, key: &str) -> Result<()> {
        let body = ByteStream::from_path(local)
            .await
            .with_context(|| format!("Failed to read {:?}", local))?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .acl(ObjectCannedAcl::PublicRead)
            .content_type(content_type_for(local))
            .body(body)
            .send()
            .await
            .with_context(|| format!("Failed to upload object {}", key))?;

        debug!(key, "object uploaded");
        Ok(())
    }

    /// Recursively publish every regular file under `dir` below `prefix`.
    ///
    /// Returns the number of files uploaded. Any PUT failure aborts the
    /// publication and surfaces as an error.
    pub async fn publish_tree(
        &self,
        dir: &Path,
        prefix: &str,
        progress: Option<&dyn ProgressSink>,
    ) -> Result<usize> {
        let files = collect_files(dir).await?;
        let total = files.len();
        info!(prefix, total, "publishing artifact tree");

        let mut done = 0;
        let mut batches = files.chunks(BATCH_SIZE).peekable();
        while let Some(batch) = batches.next() {
            let puts = batch.iter().map(|path| async move {
                let key = object_key(dir, path, prefix)?;
                self.put_file(path, &key).await
            });
            futures_util::future::try_join_all(puts).await?;

            done += batch.len();
            if let (Some(sink), Some(percent)) = (progress, map_publish_progress(done, total)) {
                sink.publish_progress(percent).await;
            }

            if batches.peek().is_some() {
                sleep(BATCH_PAUSE).await;
            }
        }

        info!(prefix, total, "artifact tree published");
        Ok(total)
    }
}

/// Object key for `path` relative to the tree root, under `prefix`.
fn object_key(root: &Path, path: &Path, prefix: &str) -> Result<String> {
    let relative = path
        .strip_prefix(root)
        .with_context(|| format!("{:?} is outside the tree root", path))?;
    let mut key = String::from(prefix);
    for component in relative.components() {
        key.push('/');
        key.push_str(
            component
                .as_os_str()
                .to_str()
                .context("non-UTF8 path in artifact tree")?,
        );
    }
    Ok(key)
}

/// All regular files under `dir`, sorted for deterministic upload order.
async fn collect_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut pending = vec![dir.to_path_buf()];

    while let Some(current) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&current)
            .await
            .with_context(|| format!("Failed to read directory {:?}", current))?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                pending.push(path);
            } else if file_type.is_file() {
                files.push(path);
            }
        }
    }

    files.sort();
    Ok(files)
}
