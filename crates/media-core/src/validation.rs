//! File validation utilities
//!
//! Checks are ordered and collected rather than short-circuited: the caller
//! gets every violated rule as a `{field, message}` pair, and the API layer
//! joins them into a single human-readable line.

use common::models::video::UploadType;
use serde::Serialize;
use thiserror::Error;

/// Hard ceiling for one-shot direct uploads. Policy, not configuration.
pub const DIRECT_MAX_FILE_SIZE: u64 = 200 * 1024 * 1024;

/// A single violated validation rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

/// Every rule an upload violated, in check order. Displays as the single
/// human-readable line the API surfaces.
#[derive(Debug, Clone, Error)]
#[error("{}", describe_errors(.errors))]
pub struct ValidationErrors {
    pub errors: Vec<FieldError>,
}

impl FieldError {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// Configured part of the upload policy.
#[derive(Debug, Clone)]
pub struct UploadPolicy {
    /// Ceiling for resumable uploads, in bytes.
    pub max_resumable_size: u64,
    /// Normalized MIME allow-list.
    pub allowed_types: Vec<String>,
}

/// Fold MIME synonyms onto their canonical video type.
pub fn normalize_mime(mime: &str) -> String {
    let lowered = mime.to_ascii_lowercase();
    match lowered.as_str() {
        "application/mp4" | "audio/mp4" | "video/x-m4v" | "video/mpeg4-generic" => {
            "video/mp4".to_string()
        }
        _ => lowered,
    }
}

/// Derive the normalized MIME type from a filename suffix.
pub fn mime_for_filename(filename: &str) -> Option<String> {
    mime_guess::from_path(filename)
        .first()
        .map(|m| normalize_mime(m.essence_str()))
}

/// Render a byte ceiling the way error messages quote it ("200MB").
pub fn format_limit(bytes: u64) -> String {
    format!("{}MB", bytes / (1024 * 1024))
}

/// Validate an upload request against the policy.
///
/// Runs at session creation with the declared size and again at ingress
/// with the observed size.
pub fn validate_upload(
    filename: &str,
    filesize: i64,
    upload_type: UploadType,
    policy: &UploadPolicy,
) -> Result<(), ValidationErrors> {
    let mut errors = Vec::new();

    if filename.trim().is_empty() {
        errors.push(FieldError::new("filename", "Filename must not be empty"));
    } else {
        match mime_for_filename(filename) {
            None => errors.push(FieldError::new(
                "filename",
                format!("Cannot determine file type from filename: {filename}"),
            )),
            Some(mime) => {
                if !policy.allowed_types.iter().any(|t| t == &mime) {
                    errors.push(FieldError::new(
                        "filename",
                        format!(
                            "File type {} is not allowed (allowed: {})",
                            mime,
                            policy.allowed_types.join(", ")
                        ),
                    ));
                }
            }
        }
    }

    if filesize <= 0 {
        errors.push(FieldError::new(
            "filesize",
            "File size must be a positive integer",
        ));
    } else {
        let size = filesize as u64;
        match upload_type {
            UploadType::Resumable => {
                if size > policy.max_resumable_size {
                    errors.push(FieldError::new(
                        "filesize",
                        format!(
                            "File size exceeds the {} limit for resumable uploads",
                            format_limit(policy.max_resumable_size)
                        ),
                    ));
                }
            }
            UploadType::Direct => {
                if size > DIRECT_MAX_FILE_SIZE {
                    errors.push(FieldError::new(
                        "filesize",
                        format!(
                            "File size exceeds the {} limit for direct uploads",
                            format_limit(DIRECT_MAX_FILE_SIZE)
                        ),
                    ));
                }
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ValidationErrors { errors })
    }
}

/// Join validation errors into the single line the API surfaces.
fn describe_errors(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(|e| e.message.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> UploadPolicy {
        UploadPolicy {
            max_resumable_size: 100 * 1024 * 1024,
            allowed_types: vec!["video/mp4".to_string(), "video/quicktime".to_string()],
        }
    }

    #[test]
    fn test_accepts_valid_upload() {
        assert!(validate_upload("a.mp4", 10_485_760, UploadType::Resumable, &policy()).is_ok());
        assert!(validate_upload("clip.mov", 1024, UploadType::Direct, &policy()).is_ok());
    }

    #[test]
    fn test_size_exactly_at_ceiling_passes() {
        let p = policy();
        assert!(validate_upload("a.mp4", (100 * 1024 * 1024) as i64, UploadType::Resumable, &p).is_ok());
        assert!(validate_upload("a.mp4", DIRECT_MAX_FILE_SIZE as i64, UploadType::Direct, &p).is_ok());
    }

    #[test]
    fn test_one_byte_over_ceiling_fails_naming_limit() {
        let p = policy();

        let failure =
            validate_upload("a.mp4", (100 * 1024 * 1024 + 1) as i64, UploadType::Resumable, &p)
                .unwrap_err();
        assert_eq!(failure.errors.len(), 1);
        assert_eq!(failure.errors[0].field, "filesize");
        assert!(failure.errors[0].message.contains("100MB"));
        // Display is the line the API surfaces.
        assert!(failure.to_string().contains("100MB"));

        let failure =
            validate_upload("a.mp4", (DIRECT_MAX_FILE_SIZE + 1) as i64, UploadType::Direct, &p)
                .unwrap_err();
        assert!(failure.errors[0].message.contains("200MB"));
    }

    #[test]
    fn test_oversize_direct_scenario() {
        // 250MB one-shot upload must be rejected with a message naming 200MB.
        let failure = validate_upload("b.mp4", 262_144_000, UploadType::Direct, &policy()).unwrap_err();
        assert!(failure.errors.iter().any(|e| e.message.contains("200MB")));
    }

    #[test]
    fn test_empty_filename_and_bad_size_collected_in_order() {
        let failure = validate_upload("", 0, UploadType::Resumable, &policy()).unwrap_err();
        assert_eq!(failure.errors.len(), 2);
        assert_eq!(failure.errors[0].field, "filename");
        assert_eq!(failure.errors[1].field, "filesize");
        // Both messages land in the surfaced line, in order.
        let line = failure.to_string();
        assert!(line.find("Filename").unwrap() < line.find("positive integer").unwrap());
    }

    #[test]
    fn test_unknown_extension_rejected() {
        let failure = validate_upload("notes.txt", 1024, UploadType::Resumable, &policy()).unwrap_err();
        assert_eq!(failure.errors[0].field, "filename");

        let failure = validate_upload("noext", 1024, UploadType::Resumable, &policy()).unwrap_err();
        assert!(failure.errors[0].message.contains("Cannot determine"));
    }

    #[test]
    fn test_mime_normalization() {
        assert_eq!(normalize_mime("application/mp4"), "video/mp4");
        assert_eq!(normalize_mime("VIDEO/MP4"), "video/mp4");
        assert_eq!(normalize_mime("video/x-m4v"), "video/mp4");
        assert_eq!(normalize_mime("video/webm"), "video/webm");
    }

    #[test]
    fn test_mime_for_filename() {
        assert_eq!(mime_for_filename("a.mp4").as_deref(), Some("video/mp4"));
        assert_eq!(mime_for_filename("a.mov").as_deref(), Some("video/quicktime"));
        assert_eq!(mime_for_filename("a.m4v").as_deref(), Some("video/mp4"));
        assert_eq!(mime_for_filename("a"), None);
    }

    #[test]
    fn test_validator_symmetry() {
        // What passes at session creation passes again at ingress for the
        // same (filename, filesize) pair.
        let p = policy();
        let cases = [("a.mp4", 1_i64), ("a.mp4", 10_485_760), ("clip.mov", 99)];
        for (name, size) in cases {
            let first = validate_upload(name, size, UploadType::Resumable, &p).is_ok();
            let second = validate_upload(name, size, UploadType::Resumable, &p).is_ok();
            assert_eq!(first, second);
        }
    }

    #[test]
    fn test_format_limit() {
        assert_eq!(format_limit(100 * 1024 * 1024), "100MB");
        assert_eq!(format_limit(200 * 1024 * 1024), "200MB");
    }
}
