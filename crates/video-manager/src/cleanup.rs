//! Cleanup of job artifacts
//!
//! Runs after both terminal states and never alters the job outcome:
//! every removal is best-effort, and a file that is already gone is an
//! expected case, not an error.

use common::models::video::VideoStatus;
use std::path::Path;
use std::time::{Duration, SystemTime};
use tokio::fs;
use tracing::{info, warn};
use video_store::VideoStore;

/// Remove a file, tolerating its absence.
pub async fn remove_file_quiet(path: &Path) {
    match fs::remove_file(path).await {
        Ok(()) => info!(path = ?path, "removed file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!(path = ?path, "file already gone");
        }
        Err(e) => warn!(path = ?path, error = %e, "failed to remove file"),
    }
}

/// Remove a directory tree, tolerating its absence.
pub async fn remove_dir_quiet(path: &Path) {
    match fs::remove_dir_all(path).await {
        Ok(()) => info!(path = ?path, "removed directory"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!(path = ?path, "directory already gone");
        }
        Err(e) => warn!(path = ?path, error = %e, "failed to remove directory"),
    }
}

/// Remove everything a finished job left behind: the uploaded source, the
/// resumable sidecar, and the transcoder work directory. All three run
/// concurrently.
pub async fn cleanup_job_artifacts(source: &Path, sidecar: &Path, work_dir: &Path) {
    tokio::join!(
        remove_file_quiet(source),
        remove_file_quiet(sidecar),
        remove_dir_quiet(work_dir),
    );
}

/// Delete upload-directory entries older than `max_age` whose record is
/// gone or terminal. Live sessions (`uploading`) and in-flight jobs
/// (`processing`) keep their files.
pub async fn sweep_stale_uploads(
    store: &VideoStore,
    upload_path: &Path,
    max_age: Duration,
) -> std::io::Result<usize> {
    let now = SystemTime::now();
    let mut removed = 0;

    let mut entries = match fs::read_dir(upload_path).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if !entry.file_type().await?.is_file() {
            continue;
        }

        let old_enough = entry
            .metadata()
            .await
            .ok()
            .and_then(|m| m.modified().ok())
            .and_then(|modified| now.duration_since(modified).ok())
            .map(|age| age > max_age)
            .unwrap_or(false);
        if !old_enough {
            continue;
        }

        // Upload files are named after their upload id, with optional
        // ".info"/".part" suffixes.
        let upload_id = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string();

        let live = match store.get(&upload_id).await {
            Ok(Some(record)) => matches!(
                record.status,
                VideoStatus::Uploading | VideoStatus::Processing
            ),
            Ok(None) => false,
            Err(e) => {
                warn!(error = %e, "stale-upload sweep could not check record, keeping file");
                true
            }
        };

        if !live {
            remove_file_quiet(&path).await;
            removed += 1;
        }
    }

    if removed > 0 {
        info!(removed, "stale upload files swept");
    }
    Ok(removed)
}

/// Hourly sweep of abandoned upload files older than a day.
pub async fn run_upload_sweeper(store: VideoStore, upload_path: std::path::PathBuf) {
    const SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);
    const MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);

    let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        ticker.tick().await;
        if let Err(e) = sweep_stale_uploads(&store, &upload_path, MAX_AGE).await {
            warn!(error = %e, "stale-upload sweep failed");
        }
    }
}
