//! Shared foundation for the vellum-stream workspace
//!
//! This crate holds the pieces every other crate needs:
//! - Environment-driven configuration
//! - The `VideoRecord` model and its status enums
//! - The JSON response envelope and API error type
//! - Object-store URL and key-prefix helpers

pub mod config;
pub mod models;
pub mod response;
pub mod urls;

pub use config::{AmqpConfig, Config, S3Config};
pub use models::video::{
    CallbackStatus, TranscodeJob, UploadType, VideoPatch, VideoRecord, VideoStatus,
    MAX_CALLBACK_ATTEMPTS,
};
pub use response::{ApiError, ApiResponse};
