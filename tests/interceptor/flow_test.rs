//! Tests for `src/pipeline/` — hook channel flow through the public surface.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use url::Url;

use straylight::hooks::{hook_fn, Channel, HookOptions, HookPayload};
use straylight::interceptor::Interceptor;
use straylight::pipeline::PipelineError;
use straylight::transport::{Transport, TransportError, TransportResponse};
use straylight::types::{Body, BodyKind, RequestDescriptor};

struct MockTransport {
    status: u16,
    content_type: &'static str,
    body: Vec<u8>,
    seen: Mutex<Vec<RequestDescriptor>>,
    fail: bool,
}

impl MockTransport {
    fn json(body: &str) -> Self {
        Self::with_body(200, "application/json", body.as_bytes().to_vec())
    }

    fn text(body: &str) -> Self {
        Self::with_body(200, "text/plain", body.as_bytes().to_vec())
    }

    fn with_body(status: u16, content_type: &'static str, body: Vec<u8>) -> Self {
        Self {
            status,
            content_type,
            body,
            seen: Mutex::new(Vec::new()),
            fail: false,
        }
    }

    fn failing() -> Self {
        let mut transport = Self::text("");
        transport.fail = true;
        transport
    }

    fn seen(&self) -> Vec<RequestDescriptor> {
        self.seen.lock().expect("mutex should not be poisoned").clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(
        &self,
        request: &RequestDescriptor,
    ) -> Result<TransportResponse, TransportError> {
        self.seen
            .lock()
            .expect("mutex should not be poisoned")
            .push(request.clone());
        if self.fail {
            return Err(TransportError::InvalidRequest("wire down".to_owned()));
        }
        let mut headers = HashMap::new();
        headers.insert("content-type".to_owned(), self.content_type.to_owned());
        Ok(TransportResponse {
            status: self.status,
            status_text: "OK".to_owned(),
            headers,
            final_url: request.url.clone(),
            body: self.body.clone(),
        })
    }
}

fn request_to(url: &str) -> RequestDescriptor {
    RequestDescriptor::get(Url::parse(url).expect("valid url"))
}

#[tokio::test]
async fn before_request_hook_rewrites_the_outbound_request() {
    let transport = Arc::new(MockTransport::text("ok"));
    let interceptor = Interceptor::new(Arc::clone(&transport) as Arc<dyn Transport>);

    interceptor.hooks().register(
        Channel::BeforeRequest,
        hook_fn(|payload| async move {
            if let HookPayload::BeforeRequest(request) = payload {
                let rewritten = request.with_header("x-trace", "abc123");
                return Ok(Some(HookPayload::BeforeRequest(rewritten)));
            }
            Ok(None)
        }),
        HookOptions::new(),
    );

    interceptor
        .send(request_to("https://api.example.com/v1"))
        .await
        .expect("send should succeed");

    let seen = transport.seen();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].headers.get("x-trace").map(String::as_str), Some("abc123"));
}

#[tokio::test]
async fn hooks_run_in_priority_order_high_first() {
    let transport = Arc::new(MockTransport::text("ok"));
    let interceptor = Interceptor::new(Arc::clone(&transport) as Arc<dyn Transport>);

    // Both hooks write the same header; the later (lower priority) hook
    // observes and appends, so the final value records the order.
    for (priority, tag) in [(1, "first"), (-1, "second")] {
        interceptor.hooks().register(
            Channel::BeforeRequest,
            hook_fn(move |payload| async move {
                if let HookPayload::BeforeRequest(mut request) = payload {
                    let trail = request
                        .headers
                        .get("x-order")
                        .map(|prev| format!("{prev},{tag}"))
                        .unwrap_or_else(|| tag.to_owned());
                    request.headers.insert("x-order".to_owned(), trail);
                    return Ok(Some(HookPayload::BeforeRequest(request)));
                }
                Ok(None)
            }),
            HookOptions::new().priority(priority),
        );
    }

    interceptor
        .send(request_to("https://api.example.com/v1"))
        .await
        .expect("send should succeed");

    let seen = transport.seen();
    assert_eq!(
        seen[0].headers.get("x-order").map(String::as_str),
        Some("first,second")
    );
}

#[tokio::test]
async fn failing_hook_is_skipped_and_the_request_still_goes_out() {
    let transport = Arc::new(MockTransport::text("ok"));
    let interceptor = Interceptor::new(Arc::clone(&transport) as Arc<dyn Transport>);

    interceptor.hooks().register(
        Channel::BeforeRequest,
        hook_fn(|_| async { anyhow::bail!("extension blew up") }),
        HookOptions::new(),
    );

    let outcome = interceptor
        .send(request_to("https://api.example.com/v1"))
        .await
        .expect("hook failure must not fail the request");

    assert_eq!(outcome.response.status, 200);
    assert_eq!(transport.seen().len(), 1);
}

#[tokio::test]
async fn url_replace_chain_redirects_the_transport_call() {
    let transport = Arc::new(MockTransport::text("ok"));
    let interceptor = Interceptor::new(Arc::clone(&transport) as Arc<dyn Transport>);

    interceptor.hooks().register(
        Channel::UrlReplace,
        hook_fn(|payload| async move {
            if let HookPayload::UrlReplace(mut p) = payload {
                if p.url.contains("staging") {
                    p.url = p.url.replace("staging", "prod");
                    return Ok(Some(HookPayload::UrlReplace(p)));
                }
            }
            Ok(None)
        }),
        HookOptions::new(),
    );

    let outcome = interceptor
        .send(request_to("https://staging.example.com/v1"))
        .await
        .expect("send should succeed");

    assert!(outcome.snapshot.url_replaced);
    assert_eq!(
        transport.seen()[0].url.as_str(),
        "https://prod.example.com/v1"
    );
}

#[tokio::test]
async fn unparseable_url_replacement_surfaces_invalid_url() {
    let transport = Arc::new(MockTransport::text("ok"));
    let interceptor = Interceptor::new(Arc::clone(&transport) as Arc<dyn Transport>);

    interceptor.hooks().register(
        Channel::UrlReplace,
        hook_fn(|payload| async move {
            if let HookPayload::UrlReplace(mut p) = payload {
                p.url = "not a url at all".to_owned();
                return Ok(Some(HookPayload::UrlReplace(p)));
            }
            Ok(None)
        }),
        HookOptions::new(),
    );

    let error_hits = Arc::new(AtomicUsize::new(0));
    let hits = Arc::clone(&error_hits);
    interceptor.hooks().register(
        Channel::OnError,
        hook_fn(move |_| {
            let hits = Arc::clone(&hits);
            async move {
                hits.fetch_add(1, Ordering::SeqCst);
                Ok(None)
            }
        }),
        HookOptions::new(),
    );

    let err = interceptor
        .send(request_to("https://api.example.com/v1"))
        .await
        .expect_err("replacement should be rejected");

    assert!(matches!(err, PipelineError::InvalidUrl { .. }));
    assert_eq!(error_hits.load(Ordering::SeqCst), 1);
    assert!(transport.seen().is_empty(), "transport must not be called");
}

#[tokio::test]
async fn transport_failure_runs_on_error_hooks_then_reraises() {
    let transport = Arc::new(MockTransport::failing());
    let interceptor = Interceptor::new(Arc::clone(&transport) as Arc<dyn Transport>);

    let observed_error = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&observed_error);
    interceptor.hooks().register(
        Channel::OnError,
        hook_fn(move |payload| {
            let slot = Arc::clone(&slot);
            async move {
                if let HookPayload::OnError(p) = payload {
                    *slot.lock().expect("mutex should not be poisoned") = Some(p.error);
                }
                Ok(None)
            }
        }),
        HookOptions::new(),
    );

    let err = interceptor
        .send(request_to("https://api.example.com/v1"))
        .await
        .expect_err("transport failure must surface");

    assert!(matches!(err, PipelineError::Transport(_)));
    let observed = observed_error
        .lock()
        .expect("mutex should not be poisoned")
        .clone()
        .expect("on-error hook should have run");
    assert!(observed.contains("wire down"));
}

#[tokio::test]
async fn json_response_is_decoded_and_transformable() {
    let transport = Arc::new(MockTransport::json(r#"{"token":"secret","n":1}"#));
    let interceptor = Interceptor::new(Arc::clone(&transport) as Arc<dyn Transport>);

    interceptor.hooks().register(
        Channel::DataTransform,
        hook_fn(|payload| async move {
            if let HookPayload::DataTransform(mut p) = payload {
                if let Body::Json(ref mut value) = p.body {
                    if let Some(obj) = value.as_object_mut() {
                        obj.insert("token".to_owned(), serde_json::json!("[redacted]"));
                    }
                }
                return Ok(Some(HookPayload::DataTransform(p)));
            }
            Ok(None)
        }),
        HookOptions::new(),
    );

    let outcome = interceptor
        .send(request_to("https://api.example.com/v1"))
        .await
        .expect("send should succeed");

    assert_eq!(outcome.snapshot.body_kind, BodyKind::Json);
    assert!(outcome.snapshot.body_transformed);
    let Body::Json(ref value) = outcome.snapshot.body else {
        panic!("body should still be structured");
    };
    assert_eq!(value["token"], "[redacted]");
    assert_eq!(value["n"], 1);

    // The caller-visible bytes carry the transformed body too.
    let reparsed: serde_json::Value =
        serde_json::from_slice(&outcome.response.body).expect("bytes should be valid json");
    assert_eq!(reparsed["token"], "[redacted]");
}

#[tokio::test]
async fn corrupting_transform_surfaces_transform_parse() {
    let transport = Arc::new(MockTransport::json(r#"{"n":1}"#));
    let interceptor = Interceptor::new(Arc::clone(&transport) as Arc<dyn Transport>);

    interceptor.hooks().register(
        Channel::DataTransform,
        hook_fn(|payload| async move {
            if let HookPayload::DataTransform(mut p) = payload {
                p.body = Body::Text("{{{ not json".to_owned());
                return Ok(Some(HookPayload::DataTransform(p)));
            }
            Ok(None)
        }),
        HookOptions::new(),
    );

    let err = interceptor
        .send(request_to("https://api.example.com/v1"))
        .await
        .expect_err("corrupted structured body must surface");

    assert!(matches!(err, PipelineError::TransformParse(_)));
}

#[tokio::test]
async fn undecodable_body_degrades_instead_of_failing() {
    // Declared JSON, actually garbage bytes.
    let transport = Arc::new(MockTransport::with_body(
        200,
        "application/json",
        vec![0xff, 0xfe, 0x00],
    ));
    let interceptor = Interceptor::new(Arc::clone(&transport) as Arc<dyn Transport>);

    let outcome = interceptor
        .send(request_to("https://api.example.com/v1"))
        .await
        .expect("decode failure must not fail the request");

    assert_eq!(outcome.snapshot.body_kind, BodyKind::Unknown);
    assert_eq!(outcome.snapshot.body, Body::Empty);
    // Raw bytes are still what the caller gets.
    assert_eq!(outcome.response.body, vec![0xff, 0xfe, 0x00]);
}

#[tokio::test]
async fn non_2xx_status_is_a_response_not_an_error() {
    let transport = Arc::new(MockTransport::with_body(
        503,
        "text/plain",
        b"try later".to_vec(),
    ));
    let interceptor = Interceptor::new(Arc::clone(&transport) as Arc<dyn Transport>);

    let outcome = interceptor
        .send(request_to("https://api.example.com/v1"))
        .await
        .expect("http errors flow through as responses");

    assert_eq!(outcome.response.status, 503);
    assert!(!outcome.snapshot.ok);
}
