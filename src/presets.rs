//! Preset hooks: URL replacement, text replacement, request logging, and
//! record persistence.
//!
//! Each builder returns a ready-to-register [`Hook`]; the [`Interceptor`]
//! surface wires them onto the right channel.
//!
//! [`Interceptor`]: crate::interceptor::Interceptor

use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use tracing::{debug, info};

use crate::hooks::{hook_fn, Hook, HookPayload};
use crate::types::{Body, BodyKind, StoredRecord};

// ── URL replacement ─────────────────────────────────────────────

/// How a `replace_url` hook decides whether a URL matches.
#[derive(Debug, Clone)]
pub enum UrlMatcher {
    /// Exact-match literal: special characters are not patterns.
    Literal(String),
    /// A regex used as given.
    Pattern(Regex),
}

impl From<&str> for UrlMatcher {
    fn from(literal: &str) -> Self {
        UrlMatcher::Literal(literal.to_owned())
    }
}

impl From<Regex> for UrlMatcher {
    fn from(pattern: Regex) -> Self {
        UrlMatcher::Pattern(pattern)
    }
}

/// The match handed to a function-valued replacement.
#[derive(Debug, Clone)]
pub struct UrlMatch {
    /// The matched portion of the URL.
    pub matched: String,
    /// Captured groups, when the matcher was a pattern.
    pub groups: Vec<Option<String>>,
}

/// What a matching URL is replaced with.
#[derive(Clone)]
pub enum UrlReplacement {
    /// A literal replacement. With a pattern matcher, `$1`-style group
    /// references expand.
    Literal(String),
    /// A function of the current URL and the match result, returning the
    /// new URL.
    Func(Arc<dyn Fn(&str, &UrlMatch) -> String + Send + Sync>),
}

impl From<&str> for UrlReplacement {
    fn from(literal: &str) -> Self {
        UrlReplacement::Literal(literal.to_owned())
    }
}

fn apply_url_replacement(
    matcher: &UrlMatcher,
    replacement: &UrlReplacement,
    url: &str,
) -> Option<String> {
    match matcher {
        UrlMatcher::Literal(literal) => {
            if url != literal {
                return None;
            }
            let matched = UrlMatch {
                matched: url.to_owned(),
                groups: Vec::new(),
            };
            Some(match replacement {
                UrlReplacement::Literal(new_url) => new_url.clone(),
                UrlReplacement::Func(f) => f(url, &matched),
            })
        }
        UrlMatcher::Pattern(pattern) => {
            let captures = pattern.captures(url)?;
            match replacement {
                UrlReplacement::Literal(new_url) => {
                    Some(pattern.replace(url, new_url.as_str()).into_owned())
                }
                UrlReplacement::Func(f) => {
                    let matched = UrlMatch {
                        matched: captures.get(0).map(|m| m.as_str().to_owned())?,
                        groups: captures
                            .iter()
                            .skip(1)
                            .map(|group| group.map(|m| m.as_str().to_owned()))
                            .collect(),
                    };
                    Some(f(url, &matched))
                }
            }
        }
    }
}

/// Build a `url-replace` hook from a matcher and a replacement.
pub fn url_replace_hook(matcher: UrlMatcher, replacement: UrlReplacement) -> Arc<dyn Hook> {
    hook_fn(move |payload| {
        let matcher = matcher.clone();
        let replacement = replacement.clone();
        async move {
            match payload {
                HookPayload::UrlReplace(mut p) => {
                    if let Some(new_url) = apply_url_replacement(&matcher, &replacement, &p.url) {
                        debug!(from = %p.url, to = %new_url, "url replacement applied");
                        p.url = new_url;
                    }
                    Ok(Some(HookPayload::UrlReplace(p)))
                }
                other => Ok(Some(other)),
            }
        }
    })
}

// ── Text replacement ────────────────────────────────────────────

/// How a `replace_text` hook finds text inside a body.
#[derive(Debug, Clone)]
pub enum TextMatcher {
    /// Literal substring; every occurrence is replaced.
    Literal(String),
    /// A regex; every match is replaced, `$1`-style references expand.
    Pattern(Regex),
}

impl From<&str> for TextMatcher {
    fn from(literal: &str) -> Self {
        TextMatcher::Literal(literal.to_owned())
    }
}

impl From<Regex> for TextMatcher {
    fn from(pattern: Regex) -> Self {
        TextMatcher::Pattern(pattern)
    }
}

fn apply_text_replacement(matcher: &TextMatcher, replacement: &str, text: &str) -> String {
    match matcher {
        TextMatcher::Literal(literal) => text.replace(literal.as_str(), replacement),
        TextMatcher::Pattern(pattern) => pattern.replace_all(text, replacement).into_owned(),
    }
}

/// Build a `data-transform` hook rewriting `text` and `json` bodies.
///
/// JSON bodies are rewritten through their serialized text; the pipeline
/// re-parses the substitution and propagates a transform-parse failure if
/// the replacement corrupted the structure. Binary and unknown bodies pass
/// through untouched.
pub fn text_replace_hook(matcher: TextMatcher, replacement: &str) -> Arc<dyn Hook> {
    let replacement = replacement.to_owned();
    hook_fn(move |payload| {
        let matcher = matcher.clone();
        let replacement = replacement.clone();
        async move {
            match payload {
                HookPayload::DataTransform(mut p) => {
                    match &p.body {
                        Body::Text(text) => {
                            let replaced = apply_text_replacement(&matcher, &replacement, text);
                            if &replaced != text {
                                p.body = Body::Text(replaced);
                            }
                        }
                        Body::Json(value) => {
                            let text = serde_json::to_string(value).unwrap_or_default();
                            let replaced = apply_text_replacement(&matcher, &replacement, &text);
                            if replaced != text {
                                // Hand back text: the pipeline re-parses it
                                // and flags corruption.
                                p.body = Body::Text(replaced);
                            }
                        }
                        Body::Binary(_) | Body::Empty => {}
                    }
                    Ok(Some(HookPayload::DataTransform(p)))
                }
                other => Ok(Some(other)),
            }
        }
    })
}

// ── Request logging ─────────────────────────────────────────────

/// Options for the logging preset.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingHookOptions {
    /// Log headers, body classification, and transform flags too.
    pub detailed: bool,
}

/// Build an `after-request` hook that logs completed exchanges.
pub fn logging_hook(options: LoggingHookOptions) -> Arc<dyn Hook> {
    hook_fn(move |payload| async move {
        if let HookPayload::AfterRequest(p) = &payload {
            if options.detailed {
                info!(
                    request_id = %p.request.id,
                    method = %p.request.method,
                    url = %p.request.url,
                    status = p.response.status,
                    ok = p.response.ok,
                    body_kind = ?p.response.body_kind,
                    header_count = p.response.headers.len(),
                    url_replaced = p.response.url_replaced,
                    body_transformed = p.response.body_transformed,
                    "request completed"
                );
            } else {
                info!(
                    request_id = %p.request.id,
                    method = %p.request.method,
                    url = %p.request.url,
                    status = p.response.status,
                    "request completed"
                );
            }
        }
        Ok(None)
    })
}

// ── Record persistence ──────────────────────────────────────────

/// External key-value storage collaborator for the persistence preset.
///
/// Implementations are out of scope here; anything that can durably keep a
/// [`StoredRecord`] qualifies.
#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Persist one completed exchange.
    async fn persist(&self, record: &StoredRecord) -> anyhow::Result<()>;
}

/// Options for the persistence preset.
#[derive(Debug, Clone, Copy)]
pub struct PersistenceOptions {
    /// Bodies larger than this many decoded bytes are stripped before
    /// persisting. `None` keeps every body whole.
    pub max_size: Option<usize>,
    /// Whether to persist bodies at all.
    pub save_body: bool,
}

impl Default for PersistenceOptions {
    fn default() -> Self {
        Self {
            max_size: None,
            save_body: true,
        }
    }
}

/// Build an `after-request` hook that hands finalized exchanges to a sink.
///
/// Sink failures are isolated like any other hook failure: logged by the
/// registry, never surfaced to the caller.
pub fn persistence_hook(
    sink: Arc<dyn RecordSink>,
    options: PersistenceOptions,
) -> Arc<dyn Hook> {
    hook_fn(move |payload| {
        let sink = Arc::clone(&sink);
        async move {
            if let HookPayload::AfterRequest(p) = payload {
                let mut request = p.request;
                let mut response = p.response;

                let body_len = response.body.to_bytes().len();
                let too_large = options.max_size.is_some_and(|max| body_len > max);
                if !options.save_body || too_large {
                    request.body = None;
                    response.body = Body::Empty;
                    response.body_kind = BodyKind::Unknown;
                }

                let record = StoredRecord {
                    request,
                    response,
                    saved_at: chrono::Utc::now(),
                };
                sink.persist(&record).await?;
            }
            Ok(None)
        }
    })
}
