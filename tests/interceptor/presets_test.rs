//! Tests for `src/presets.rs` — the packaged hooks through the `Interceptor`
//! surface.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use regex::Regex;
use url::Url;

use straylight::hooks::HookOptions;
use straylight::interceptor::Interceptor;
use straylight::presets::{PersistenceOptions, RecordSink, UrlReplacement};
use straylight::transport::{Transport, TransportError, TransportResponse};
use straylight::types::{Body, RequestDescriptor, StoredRecord};

/// Reflects the URL it was called with as a text body, so tests can see
/// which resource the transport actually hit.
struct EchoTransport;

#[async_trait]
impl Transport for EchoTransport {
    async fn send(
        &self,
        request: &RequestDescriptor,
    ) -> Result<TransportResponse, TransportError> {
        let mut headers = HashMap::new();
        headers.insert("content-type".to_owned(), "text/plain".to_owned());
        Ok(TransportResponse {
            status: 200,
            status_text: "OK".to_owned(),
            headers,
            final_url: request.url.clone(),
            body: request.url.as_str().as_bytes().to_vec(),
        })
    }
}

fn interceptor() -> Interceptor {
    Interceptor::new(Arc::new(EchoTransport))
}

fn request_to(url: &str) -> RequestDescriptor {
    RequestDescriptor::get(Url::parse(url).expect("valid url"))
}

// ── URL replacement ─────────────────────────────────────────────

#[tokio::test]
async fn literal_url_matcher_requires_an_exact_match() {
    let interceptor = interceptor();
    interceptor.replace_url(
        "https://a.com/resource",
        "https://b.com/resource",
        HookOptions::new(),
    );

    let hit = interceptor
        .send(request_to("https://a.com/resource"))
        .await
        .expect("send should succeed");
    assert_eq!(hit.response.body, b"https://b.com/resource");

    // A prefix is not an exact match.
    let miss = interceptor
        .send(request_to("https://a.com/resource/child"))
        .await
        .expect("send should succeed");
    assert_eq!(miss.response.body, b"https://a.com/resource/child");
    assert!(!miss.snapshot.url_replaced);
}

#[tokio::test]
async fn pattern_url_matcher_expands_group_references() {
    let interceptor = interceptor();
    interceptor.replace_url(
        Regex::new(r"^https://old\.example\.com/(.*)$").expect("valid regex"),
        "https://new.example.com/$1",
        HookOptions::new(),
    );

    let outcome = interceptor
        .send(request_to("https://old.example.com/users/42"))
        .await
        .expect("send should succeed");

    assert_eq!(outcome.response.body, b"https://new.example.com/users/42");
    assert!(outcome.snapshot.url_replaced);
}

#[tokio::test]
async fn function_replacement_gets_the_url_and_the_match() {
    let interceptor = interceptor();
    interceptor.replace_url(
        Regex::new(r"/v(\d+)/").expect("valid regex"),
        UrlReplacement::Func(Arc::new(|url, m| {
            let version = m.groups[0].as_deref().unwrap_or("1");
            url.replace(&m.matched, &format!("/v{version}-beta/"))
        })),
        HookOptions::new(),
    );

    let outcome = interceptor
        .send(request_to("https://api.example.com/v2/users"))
        .await
        .expect("send should succeed");

    assert_eq!(
        outcome.response.body,
        b"https://api.example.com/v2-beta/users"
    );
}

// ── Text replacement ────────────────────────────────────────────

#[tokio::test]
async fn literal_text_replacement_rewrites_every_occurrence() {
    let interceptor = interceptor();
    interceptor.replace_text("example.com", "internal.test", HookOptions::new());

    let outcome = interceptor
        .send(request_to("https://example.com/example.com"))
        .await
        .expect("send should succeed");

    assert!(outcome.snapshot.body_transformed);
    assert_eq!(
        outcome.snapshot.body,
        Body::Text("https://internal.test/internal.test".to_owned())
    );
}

#[tokio::test]
async fn pattern_text_replacement_expands_groups() {
    let interceptor = interceptor();
    interceptor.replace_text(
        Regex::new(r"https://([a-z.]+)/").expect("valid regex"),
        "http://$1:8080/",
        HookOptions::new(),
    );

    let outcome = interceptor
        .send(request_to("https://example.com/path"))
        .await
        .expect("send should succeed");

    assert_eq!(
        outcome.snapshot.body,
        Body::Text("http://example.com:8080/path".to_owned())
    );
}

#[tokio::test]
async fn text_replacement_without_a_match_leaves_the_body_alone() {
    let interceptor = interceptor();
    interceptor.replace_text("absent-token", "replacement", HookOptions::new());

    let outcome = interceptor
        .send(request_to("https://example.com/path"))
        .await
        .expect("send should succeed");

    assert!(!outcome.snapshot.body_transformed);
    assert_eq!(outcome.response.body, b"https://example.com/path");
}

// ── Persistence ─────────────────────────────────────────────────

#[derive(Default)]
struct MemorySink {
    records: Mutex<Vec<StoredRecord>>,
}

impl MemorySink {
    fn records(&self) -> Vec<StoredRecord> {
        self.records
            .lock()
            .expect("mutex should not be poisoned")
            .clone()
    }
}

#[async_trait]
impl RecordSink for MemorySink {
    async fn persist(&self, record: &StoredRecord) -> anyhow::Result<()> {
        self.records
            .lock()
            .expect("mutex should not be poisoned")
            .push(record.clone());
        Ok(())
    }
}

#[tokio::test]
async fn persistence_preset_hands_finalized_exchanges_to_the_sink() {
    let interceptor = interceptor();
    let sink = Arc::new(MemorySink::default());
    interceptor.enable_persistence(Arc::clone(&sink) as Arc<dyn RecordSink>, PersistenceOptions::default());

    let request = request_to("https://example.com/a");
    let id = request.id;
    interceptor.send(request).await.expect("send should succeed");

    let records = sink.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].request.id, id);
    assert_eq!(
        records[0].response.body,
        Body::Text("https://example.com/a".to_owned())
    );
}

#[tokio::test]
async fn persistence_preset_strips_oversized_bodies() {
    let interceptor = interceptor();
    let sink = Arc::new(MemorySink::default());
    interceptor.enable_persistence(
        Arc::clone(&sink) as Arc<dyn RecordSink>,
        PersistenceOptions {
            max_size: Some(8),
            save_body: true,
        },
    );

    interceptor
        .send(request_to("https://example.com/far-beyond-eight-bytes"))
        .await
        .expect("send should succeed");

    let records = sink.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].response.body, Body::Empty);
}

#[tokio::test]
async fn persistence_preset_can_skip_bodies_entirely() {
    let interceptor = interceptor();
    let sink = Arc::new(MemorySink::default());
    interceptor.enable_persistence(
        Arc::clone(&sink) as Arc<dyn RecordSink>,
        PersistenceOptions {
            max_size: None,
            save_body: false,
        },
    );

    interceptor
        .send(request_to("https://example.com/a"))
        .await
        .expect("send should succeed");

    assert_eq!(sink.records()[0].response.body, Body::Empty);
}

// ── Logging ─────────────────────────────────────────────────────

#[tokio::test]
async fn logging_preset_registers_and_detaches_cleanly() {
    let interceptor = interceptor();
    let id = interceptor.enable_logging(straylight::presets::LoggingHookOptions { detailed: true });

    interceptor
        .send(request_to("https://example.com/a"))
        .await
        .expect("send should succeed");

    interceptor
        .remove("after-request", &id)
        .expect("known channel");
    interceptor
        .send(request_to("https://example.com/b"))
        .await
        .expect("send should succeed after detaching");
}
