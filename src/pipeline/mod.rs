//! The interception pipeline — the core execution model.
//!
//! Composes startup and the hook channels around a single transport call:
//!
//! 1. Ensure one-time startup ran
//! 2. `before-request` hooks (may rewrite the request)
//! 3. `url-replace` hooks (may substitute the URL)
//! 4. Transport call
//! 5. Body classification + decode (failures degrade, never propagate)
//! 6. `data-transform` hooks + response reconstruction if the body changed
//! 7. `after-request` hooks, always
//! 8. On pre-response failure: `on-error` hooks, then the error re-raises

pub mod body;

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use crate::hooks::{
    Channel, ErrorPayload, ExchangePayload, HookPayload, HookRegistry, TransformPayload,
    UrlPayload,
};
use crate::startup::StartupCoordinator;
use crate::transport::{Transport, TransportError, TransportResponse};
use crate::types::{Body, BodyKind, RequestDescriptor, ResponseSnapshot};

/// Pipeline failures visible to the caller.
///
/// Everything else (hook failures, decode failures, startup failures) is
/// absorbed and observable only through logging.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The transport call failed. Terminal for this request.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// A `url-replace` hook produced an unparseable URL.
    #[error("url replacement produced an invalid url {url:?}: {source}")]
    InvalidUrl {
        /// The rejected replacement.
        url: String,
        /// The parse failure.
        source: url::ParseError,
    },
    /// A `data-transform` hook substituted text that no longer parses as
    /// the structured data the response declared. Signals a broken
    /// extension, so it is not swallowed.
    #[error("transformed body is no longer valid json: {0}")]
    TransformParse(#[source] serde_json::Error),
}

/// A completed interception: the response the caller receives plus the
/// finalized snapshot hooks observed.
#[derive(Debug, Clone)]
pub struct InterceptOutcome {
    /// The original transport response, or the reconstruction carrying a
    /// transformed body.
    pub response: TransportResponse,
    /// The finalized snapshot.
    pub snapshot: ResponseSnapshot,
}

/// Orchestrates hook channels and startup around one transport call.
pub struct Pipeline {
    hooks: Arc<HookRegistry>,
    startup: Arc<StartupCoordinator>,
    transport: Arc<dyn Transport>,
}

impl Pipeline {
    /// Wire a pipeline from its collaborators.
    pub fn new(
        hooks: Arc<HookRegistry>,
        startup: Arc<StartupCoordinator>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            hooks,
            startup,
            transport,
        }
    }

    /// Run one request through the full pipeline.
    ///
    /// # Errors
    ///
    /// Only [`PipelineError::Transport`], [`PipelineError::InvalidUrl`] and
    /// [`PipelineError::TransformParse`] surface; all other failures are
    /// isolated and logged.
    pub async fn run(
        &self,
        request: RequestDescriptor,
    ) -> Result<InterceptOutcome, PipelineError> {
        self.startup
            .ensure_startup(&request.id.to_string())
            .await;

        let original = request.clone();
        debug!(request_id = %request.id, url = %request.url, "pipeline started");

        // before-request: the chain's output is the request actually sent.
        let mut request = match self
            .hooks
            .execute(Channel::BeforeRequest, HookPayload::BeforeRequest(request))
            .await
        {
            HookPayload::BeforeRequest(rewritten) => rewritten,
            other => {
                warn!(payload = ?other, "before-request chain returned a mismatched payload");
                original.clone()
            }
        };

        // url-replace: substitute the final resource reference.
        let current_url = request.url.to_string();
        let replaced = match self
            .hooks
            .execute(
                Channel::UrlReplace,
                HookPayload::UrlReplace(UrlPayload {
                    url: current_url.clone(),
                    original_url: current_url.clone(),
                }),
            )
            .await
        {
            HookPayload::UrlReplace(payload) => payload.url,
            other => {
                warn!(payload = ?other, "url-replace chain returned a mismatched payload");
                current_url.clone()
            }
        };
        if replaced != current_url {
            match Url::parse(&replaced) {
                Ok(url) => {
                    debug!(request_id = %request.id, from = %current_url, to = %replaced, "url replaced");
                    request.url = url;
                    request.url_replaced = true;
                }
                Err(source) => {
                    return self
                        .fail(request, PipelineError::InvalidUrl { url: replaced, source })
                        .await;
                }
            }
        }

        // Transport call. The descriptor is frozen from here on.
        let mut response = match self.transport.send(&request).await {
            Ok(response) => response,
            Err(e) => return self.fail(request, e.into()).await,
        };

        // Classify and decode a duplicate of the body; the caller's copy in
        // `response` is untouched unless a transform replaces it below.
        let declared = body::classify(response.content_type());
        let (kind, decoded) = body::decode(declared, &response.body);

        let mut snapshot = ResponseSnapshot {
            status: response.status,
            status_text: response.status_text.clone(),
            headers: response.headers.clone(),
            final_url: response.final_url.clone(),
            ok: (200..300).contains(&response.status),
            timestamp: Utc::now(),
            body_kind: kind,
            body: decoded.clone(),
            url_replaced: request.url_replaced,
            body_transformed: false,
        };

        // data-transform: hooks see the snapshot plus the decoded body.
        let transformed = match self
            .hooks
            .execute(
                Channel::DataTransform,
                HookPayload::DataTransform(TransformPayload {
                    snapshot: snapshot.clone(),
                    body: decoded.clone(),
                }),
            )
            .await
        {
            HookPayload::DataTransform(payload) => payload.body,
            other => {
                warn!(payload = ?other, "data-transform chain returned a mismatched payload");
                decoded.clone()
            }
        };

        if transformed != decoded {
            let final_body = match (snapshot.body_kind, transformed) {
                // Substituted text standing in for structured data must
                // re-parse; a failure here means an extension corrupted it.
                (BodyKind::Json, Body::Text(text)) => match serde_json::from_str(&text) {
                    Ok(value) => Body::Json(value),
                    Err(e) => return Err(PipelineError::TransformParse(e)),
                },
                (_, body) => body,
            };

            response.body = final_body.to_bytes();
            snapshot.body_kind = match &final_body {
                Body::Json(_) => BodyKind::Json,
                Body::Text(_) => BodyKind::Text,
                Body::Binary(_) => BodyKind::Binary,
                Body::Empty => snapshot.body_kind,
            };
            snapshot.body = final_body;
            snapshot.body_transformed = true;
            debug!(request_id = %request.id, "response body transformed");
        }

        // after-request: always, transformed or not.
        self.hooks
            .execute(
                Channel::AfterRequest,
                HookPayload::AfterRequest(ExchangePayload {
                    request: request.clone(),
                    response: snapshot.clone(),
                }),
            )
            .await;

        debug!(request_id = %request.id, status = snapshot.status, "pipeline completed");
        Ok(InterceptOutcome { response, snapshot })
    }

    /// Terminal failure path for errors raised before a response exists:
    /// run `on-error` hooks, then re-raise to the caller.
    async fn fail(
        &self,
        request: RequestDescriptor,
        error: PipelineError,
    ) -> Result<InterceptOutcome, PipelineError> {
        warn!(request_id = %request.id, error = %error, "pipeline failed");
        self.hooks
            .execute(
                Channel::OnError,
                HookPayload::OnError(ErrorPayload {
                    request,
                    error: error.to_string(),
                    timestamp: Utc::now(),
                }),
            )
            .await;
        Err(error)
    }
}
