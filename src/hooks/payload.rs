//! Per-channel hook payloads.
//!
//! Each channel carries its own payload shape; hooks receive the variant
//! matching the channel they registered on and hand back the same variant
//! (or `None` to leave the chain untouched).

use chrono::{DateTime, Utc};

use crate::types::{Body, RequestDescriptor, ResponseSnapshot};

/// The URL rewrite payload for the `url-replace` channel.
#[derive(Debug, Clone)]
pub struct UrlPayload {
    /// The current (possibly already rewritten) URL.
    pub url: String,
    /// The URL the request originally targeted.
    pub original_url: String,
}

/// The body rewrite payload for the `data-transform` channel.
#[derive(Debug, Clone)]
pub struct TransformPayload {
    /// The full response snapshot, for inspection.
    pub snapshot: ResponseSnapshot,
    /// The current (possibly already transformed) decoded body.
    pub body: Body,
}

/// The finalized exchange payload for the `after-request` channel.
#[derive(Debug, Clone)]
pub struct ExchangePayload {
    /// The request as it was sent.
    pub request: RequestDescriptor,
    /// The finalized response snapshot.
    pub response: ResponseSnapshot,
}

/// The failure payload for the `on-error` channel.
#[derive(Debug, Clone)]
pub struct ErrorPayload {
    /// The request that failed.
    pub request: RequestDescriptor,
    /// The rendered failure.
    pub error: String,
    /// When the failure was observed.
    pub timestamp: DateTime<Utc>,
}

/// A value flowing through one hook channel.
#[derive(Debug, Clone)]
pub enum HookPayload {
    /// `before-request`: the outbound request, rewritable.
    BeforeRequest(RequestDescriptor),
    /// `url-replace`: the outgoing URL, substitutable.
    UrlReplace(UrlPayload),
    /// `data-transform`: the decoded response body, replaceable.
    DataTransform(TransformPayload),
    /// `after-request`: the finalized exchange, observational.
    AfterRequest(ExchangePayload),
    /// `on-error`: the terminal failure, observational.
    OnError(ErrorPayload),
}
