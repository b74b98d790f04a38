//! The transport boundary: the actual outbound network call.
//!
//! The pipeline only talks to [`Transport`]; the default [`HttpTransport`]
//! adapter drives `reqwest`. Responses come back as owned bytes, so hook
//! inspection works on copies and never disturbs what the caller receives.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::types::RequestDescriptor;

/// Transport failures. Terminal for the request they belong to.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The underlying HTTP call failed.
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// The descriptor could not be turned into a wire request.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

/// The raw response handed back by a transport.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    /// HTTP status code.
    pub status: u16,
    /// Canonical status text.
    pub status_text: String,
    /// Response headers.
    pub headers: HashMap<String, String>,
    /// The URL the response came from, after redirects.
    pub final_url: Url,
    /// The full response body.
    pub body: Vec<u8>,
}

impl TransportResponse {
    /// The declared content type, if any.
    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case("content-type"))
            .map(|(_, value)| value.as_str())
    }
}

/// Performs the outbound call for a finalized request descriptor.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Issue the request and collect the full response.
    async fn send(&self, request: &RequestDescriptor) -> Result<TransportResponse, TransportError>;
}

/// Default transport over a shared `reqwest` client.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

impl HttpTransport {
    /// Build a transport with the given request timeout.
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self { client }
    }

    /// Build a transport around an existing client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &RequestDescriptor) -> Result<TransportResponse, TransportError> {
        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|_| TransportError::InvalidRequest(format!("bad method: {}", request.method)))?;

        let mut builder = self.client.request(method, request.url.clone());
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        debug!(request_id = %request.id, url = %request.url, "transport call");
        let response = builder.send().await?;

        let status = response.status();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_owned(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();
        let final_url = response.url().clone();
        let body = response.bytes().await?.to_vec();

        Ok(TransportResponse {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or("").to_owned(),
            headers,
            final_url,
            body,
        })
    }
}
