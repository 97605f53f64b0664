//! Shared application state

use common::config::Config;
use job_queue::JobQueue;
use media_core::UploadPolicy;
use std::path::PathBuf;
use std::sync::Arc;
use video_store::VideoStore;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: VideoStore,
    pub queue: Arc<JobQueue>,
}

impl AppState {
    pub fn upload_policy(&self) -> UploadPolicy {
        UploadPolicy {
            max_resumable_size: self.config.max_file_size,
            allowed_types: self.config.allowed_file_types.clone(),
        }
    }

    /// Where an upload's bytes accumulate.
    pub fn upload_data_path(&self, upload_id: &str) -> PathBuf {
        self.config.upload_path.join(upload_id)
    }

    /// Resumable-upload sidecar holding the declared length.
    pub fn upload_info_path(&self, upload_id: &str) -> PathBuf {
        self.config.upload_path.join(format!("{upload_id}.info"))
    }
}
