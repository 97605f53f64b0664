//! Upload policy checks
//!
//! Validates the `(filename, filesize, upload type)` triple both at session
//! creation and again when bytes actually arrive, so a client cannot get a
//! permissive session by declaring false numbers up front.

pub mod validation;

pub use validation::{
    format_limit, mime_for_filename, normalize_mime, validate_upload, FieldError, UploadPolicy,
    ValidationErrors, DIRECT_MAX_FILE_SIZE,
};
