//! Response body classification and decoding.
//!
//! Bodies are classified by declared content type, then decoded. A decode
//! failure never reaches the caller: the body falls back to empty and the
//! classification to unknown.

use tracing::debug;

use crate::types::{Body, BodyKind};

/// Classify a body by its declared content type.
pub fn classify(content_type: Option<&str>) -> BodyKind {
    let Some(content_type) = content_type else {
        return BodyKind::Unknown;
    };
    // Strip parameters like `; charset=utf-8`.
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();

    if mime.contains("json") {
        return BodyKind::Json;
    }
    if mime.starts_with("text/")
        || mime.contains("xml")
        || mime.contains("javascript")
        || mime.contains("x-www-form-urlencoded")
    {
        return BodyKind::Text;
    }
    if mime.starts_with("image/")
        || mime.starts_with("audio/")
        || mime.starts_with("video/")
        || mime.starts_with("font/")
        || mime.contains("octet-stream")
        || mime.contains("pdf")
        || mime.contains("zip")
    {
        return BodyKind::Binary;
    }
    BodyKind::Unknown
}

/// Decode raw bytes per their classification.
///
/// Returns the effective classification alongside the decoded body: any
/// decode failure degrades to `(Unknown, Empty)` instead of propagating.
pub fn decode(kind: BodyKind, bytes: &[u8]) -> (BodyKind, Body) {
    if bytes.is_empty() {
        return (kind, Body::Empty);
    }
    match kind {
        BodyKind::Json => match serde_json::from_slice(bytes) {
            Ok(value) => (BodyKind::Json, Body::Json(value)),
            Err(e) => {
                debug!(error = %e, "json body failed to decode; degrading to unknown");
                (BodyKind::Unknown, Body::Empty)
            }
        },
        BodyKind::Text => match String::from_utf8(bytes.to_vec()) {
            Ok(text) => (BodyKind::Text, Body::Text(text)),
            Err(e) => {
                debug!(error = %e, "text body is not utf-8; degrading to unknown");
                (BodyKind::Unknown, Body::Empty)
            }
        },
        BodyKind::Binary => (BodyKind::Binary, Body::Binary(bytes.to_vec())),
        BodyKind::Unknown => (BodyKind::Unknown, Body::Empty),
    }
}
