//! Core request/response types shared across the interception pipeline.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

/// An outbound request as seen by the pipeline.
///
/// Built by the caller, possibly rewritten by `before-request` and
/// `url-replace` hooks, then handed to the transport. Once the transport
/// call begins the descriptor is no longer mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestDescriptor {
    /// Unique id, generated per request.
    pub id: Uuid,
    /// Target URL.
    pub url: Url,
    /// HTTP method, uppercase (e.g. `GET`, `POST`).
    pub method: String,
    /// Request headers.
    pub headers: HashMap<String, String>,
    /// Optional request body.
    pub body: Option<Vec<u8>>,
    /// When the request entered the pipeline.
    pub timestamp: DateTime<Utc>,
    /// Set by the pipeline when a `url-replace` hook rewrote the URL.
    pub url_replaced: bool,
}

impl RequestDescriptor {
    /// Create a descriptor with a fresh id and the current timestamp.
    pub fn new(method: &str, url: Url) -> Self {
        Self {
            id: Uuid::new_v4(),
            url,
            method: method.to_uppercase(),
            headers: HashMap::new(),
            body: None,
            timestamp: Utc::now(),
            url_replaced: false,
        }
    }

    /// Convenience `GET` constructor.
    pub fn get(url: Url) -> Self {
        Self::new("GET", url)
    }

    /// Add a header.
    #[must_use]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_owned(), value.to_owned());
        self
    }

    /// Attach a body.
    #[must_use]
    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = Some(body);
        self
    }
}

/// Classification of a response body by declared content type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BodyKind {
    /// `application/json` and friends.
    Json,
    /// Textual content (`text/*`, XML, javascript, form-encoded).
    Text,
    /// Known binary content (images, audio, octet streams, archives).
    Binary,
    /// Unclassifiable, or a body that failed to decode.
    Unknown,
}

/// A decoded response body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Body {
    /// Parsed JSON document.
    Json(serde_json::Value),
    /// UTF-8 text.
    Text(String),
    /// Raw bytes.
    Binary(Vec<u8>),
    /// No body, or decoding failed.
    Empty,
}

impl Body {
    /// Serialize the body back to wire bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Body::Json(value) => serde_json::to_vec(value).unwrap_or_default(),
            Body::Text(text) => text.clone().into_bytes(),
            Body::Binary(bytes) => bytes.clone(),
            Body::Empty => Vec::new(),
        }
    }
}

/// A finalized view of one response, as observed by hooks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseSnapshot {
    /// HTTP status code.
    pub status: u16,
    /// Canonical status text (e.g. `OK`).
    pub status_text: String,
    /// Response headers.
    pub headers: HashMap<String, String>,
    /// The URL the response ultimately came from (after redirects).
    pub final_url: Url,
    /// True for 2xx statuses.
    pub ok: bool,
    /// When the response was received.
    pub timestamp: DateTime<Utc>,
    /// Body classification.
    pub body_kind: BodyKind,
    /// Decoded body.
    pub body: Body,
    /// Whether a `url-replace` hook rewrote the request URL.
    pub url_replaced: bool,
    /// Whether a `data-transform` hook replaced the body.
    pub body_transformed: bool,
}

/// A completed request/response pair held by the request store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredRecord {
    /// The request as it was sent.
    pub request: RequestDescriptor,
    /// The finalized response snapshot.
    pub response: ResponseSnapshot,
    /// When the record was saved.
    pub saved_at: DateTime<Utc>,
}
