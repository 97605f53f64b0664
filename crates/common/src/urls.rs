//! Object-store key prefixes and public URLs
//!
//! The key prefix computed at session creation and the one used by the
//! publisher must resolve to the same objects, so both sides share these
//! helpers.

/// Sanitize a caller-supplied object-store path.
///
/// Leading and trailing `/` are trimmed; the remainder must be non-empty
/// and consist only of `[A-Za-z0-9/_-]`. Anything else (including `..`
/// traversal) is rejected.
pub fn sanitize_s3_path(raw: &str) -> Option<String> {
    let trimmed = raw.trim().trim_matches('/');
    if trimmed.is_empty() {
        return None;
    }
    let valid = trimmed
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '_' | '-'));
    if !valid || trimmed.contains("..") {
        return None;
    }
    Some(trimmed.to_string())
}

/// Key prefix for a video's artifacts: `{s3_path}/{id}` or just `{id}`.
pub fn object_prefix(s3_path: Option<&str>, upload_id: &str) -> String {
    match s3_path {
        Some(path) if !path.is_empty() => format!("{}/{}", path, upload_id),
        _ => upload_id.to_string(),
    }
}

/// Public virtual-host-style URL for an object: `{bucket}.{endpoint}/{key}`.
///
/// The configured endpoint may carry a scheme; it is reused when present,
/// https otherwise.
pub fn public_object_url(bucket: &str, endpoint: &str, key: &str) -> String {
    let (scheme, host) = split_endpoint(endpoint);
    format!("{}://{}.{}/{}", scheme, bucket, host, key)
}

fn split_endpoint(endpoint: &str) -> (&str, &str) {
    if let Some(host) = endpoint.strip_prefix("https://") {
        ("https", host.trim_end_matches('/'))
    } else if let Some(host) = endpoint.strip_prefix("http://") {
        ("http", host.trim_end_matches('/'))
    } else {
        ("https", endpoint.trim_end_matches('/'))
    }
}

/// Endpoint URL for the S3 SDK; a scheme is required there.
pub fn sdk_endpoint_url(endpoint: &str) -> String {
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        endpoint.trim_end_matches('/').to_string()
    } else {
        format!("https://{}", endpoint.trim_end_matches('/'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_accepts_plain_paths() {
        assert_eq!(sanitize_s3_path("v2/media").as_deref(), Some("v2/media"));
        assert_eq!(sanitize_s3_path("/v2/media/").as_deref(), Some("v2/media"));
        assert_eq!(sanitize_s3_path("a_b-c/d").as_deref(), Some("a_b-c/d"));
    }

    #[test]
    fn test_sanitize_rejects_traversal_and_garbage() {
        assert!(sanitize_s3_path("../etc").is_none());
        assert!(sanitize_s3_path("a b").is_none());
        assert!(sanitize_s3_path("a/../b").is_none());
        assert!(sanitize_s3_path("//").is_none());
        assert!(sanitize_s3_path("").is_none());
        assert!(sanitize_s3_path("pa$h").is_none());
    }

    #[test]
    fn test_prefix_round_trip() {
        // The URL advertised at session creation and the key written by the
        // publisher must agree for any accepted s3 path.
        let path = sanitize_s3_path("/v2/media/").unwrap();
        let prefix = object_prefix(Some(&path), "abc-123");
        assert_eq!(prefix, "v2/media/abc-123");

        let url = public_object_url("clips", "s3.example.com", &format!("{prefix}/index.m3u8"));
        assert_eq!(url, "https://clips.s3.example.com/v2/media/abc-123/index.m3u8");

        assert_eq!(object_prefix(None, "abc-123"), "abc-123");
    }

    #[test]
    fn test_endpoint_scheme_handling() {
        assert_eq!(
            public_object_url("b", "http://minio.local:9000", "k"),
            "http://b.minio.local:9000/k"
        );
        assert_eq!(sdk_endpoint_url("s3.example.com"), "https://s3.example.com");
        assert_eq!(
            sdk_endpoint_url("http://minio.local:9000/"),
            "http://minio.local:9000"
        );
    }
}
