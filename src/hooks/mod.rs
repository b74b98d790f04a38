//! Hook channels: ordered, failure-isolated extension points around the
//! interception pipeline.
//!
//! Channels form a closed set (one per pipeline stage). Entries within a
//! channel run in descending priority order; equal priorities run in
//! registration order via an explicit insertion sequence, never an unstable
//! sort. A failing hook is logged and skipped — it cannot abort the channel
//! or the caller's request.

pub mod payload;

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

pub use payload::{ErrorPayload, ExchangePayload, HookPayload, TransformPayload, UrlPayload};

/// Errors raised at the hook registration boundary.
#[derive(Debug, Error)]
pub enum HookError {
    /// The caller named a channel outside the closed set.
    #[error("unknown hook channel: {0}")]
    UnknownChannel(String),
}

/// The closed set of hook channels, one per pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Runs before the request is sent; may rewrite it.
    BeforeRequest,
    /// Runs after the response is finalized; observational.
    AfterRequest,
    /// Runs when the pipeline fails before a response exists.
    OnError,
    /// Runs over the outgoing URL; may substitute it.
    UrlReplace,
    /// Runs over the decoded response body; may replace it.
    DataTransform,
}

impl Channel {
    /// Every channel, in pipeline order.
    pub const ALL: [Channel; 5] = [
        Channel::BeforeRequest,
        Channel::UrlReplace,
        Channel::DataTransform,
        Channel::AfterRequest,
        Channel::OnError,
    ];

    /// The channel's external string name.
    pub fn as_str(self) -> &'static str {
        match self {
            Channel::BeforeRequest => "before-request",
            Channel::AfterRequest => "after-request",
            Channel::OnError => "on-error",
            Channel::UrlReplace => "url-replace",
            Channel::DataTransform => "data-transform",
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = HookError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "before-request" => Ok(Channel::BeforeRequest),
            "after-request" => Ok(Channel::AfterRequest),
            "on-error" => Ok(Channel::OnError),
            "url-replace" => Ok(Channel::UrlReplace),
            "data-transform" => Ok(Channel::DataTransform),
            other => Err(HookError::UnknownChannel(other.to_owned())),
        }
    }
}

/// A hook callback attached to a channel.
///
/// Returning `Ok(Some(payload))` feeds the new payload to the next entry;
/// `Ok(None)` carries the previous payload forward unchanged. Errors are
/// isolated by the registry: logged, and the previous payload carries on.
#[async_trait]
pub trait Hook: Send + Sync {
    /// Invoke the hook with the current channel payload.
    async fn call(&self, payload: HookPayload) -> anyhow::Result<Option<HookPayload>>;
}

/// Adapter so plain async closures can be registered as hooks.
struct FnHook<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> Hook for FnHook<F>
where
    F: Fn(HookPayload) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = anyhow::Result<Option<HookPayload>>> + Send,
{
    async fn call(&self, payload: HookPayload) -> anyhow::Result<Option<HookPayload>> {
        (self.f)(payload).await
    }
}

/// Wrap an async closure as a [`Hook`].
pub fn hook_fn<F, Fut>(f: F) -> Arc<dyn Hook>
where
    F: Fn(HookPayload) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = anyhow::Result<Option<HookPayload>>> + Send + 'static,
{
    Arc::new(FnHook { f })
}

/// Registration options for a hook entry.
#[derive(Clone)]
pub struct HookOptions {
    /// Execution priority; higher runs earlier. Default 0.
    pub priority: i32,
    /// Explicit entry id; a UUID is generated when absent. Re-registering
    /// an existing id within the same channel replaces the old entry.
    pub id: Option<String>,
    /// Whether the entry starts enabled. Default true.
    pub enabled: bool,
}

impl Default for HookOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl HookOptions {
    /// Default options: priority 0, generated id, enabled.
    pub fn new() -> Self {
        Self {
            priority: 0,
            id: None,
            enabled: true,
        }
    }

    /// Set the priority.
    #[must_use]
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Set an explicit id.
    #[must_use]
    pub fn id(mut self, id: &str) -> Self {
        self.id = Some(id.to_owned());
        self
    }
}

/// One registered entry within a channel.
#[derive(Clone)]
struct HookEntry {
    id: String,
    hook: Arc<dyn Hook>,
    priority: i32,
    enabled: bool,
    /// Monotonic insertion sequence — the deterministic tie-break for
    /// equal priorities.
    seq: u64,
}

/// Owns the hook channels and executes them in order.
pub struct HookRegistry {
    channels: RwLock<HashMap<Channel, Vec<HookEntry>>>,
    next_seq: AtomicU64,
}

impl Default for HookRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HookRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            next_seq: AtomicU64::new(0),
        }
    }

    /// Register a hook on a channel; returns the entry id.
    pub fn register(&self, channel: Channel, hook: Arc<dyn Hook>, options: HookOptions) -> String {
        let id = options
            .id
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);

        let entry = HookEntry {
            id: id.clone(),
            hook,
            priority: options.priority,
            enabled: options.enabled,
            seq,
        };

        match self.channels.write() {
            Ok(mut map) => {
                let entries = map.entry(channel).or_default();
                entries.retain(|e| e.id != entry.id);
                entries.push(entry);
                // Descending priority, insertion order within a priority.
                entries.sort_by_key(|e| (std::cmp::Reverse(e.priority), e.seq));
            }
            Err(e) => warn!(error = %e, "hook registry lock poisoned in register"),
        }

        debug!(channel = %channel, hook = %id, "hook registered");
        id
    }

    /// Remove an entry; a missing id is a no-op.
    pub fn remove(&self, channel: Channel, id: &str) {
        match self.channels.write() {
            Ok(mut map) => {
                if let Some(entries) = map.get_mut(&channel) {
                    entries.retain(|e| e.id != id);
                }
            }
            Err(e) => warn!(error = %e, "hook registry lock poisoned in remove"),
        }
    }

    /// Enable or disable an entry without removing it. Missing ids are a
    /// no-op.
    pub fn set_enabled(&self, channel: Channel, id: &str, enabled: bool) {
        match self.channels.write() {
            Ok(mut map) => {
                if let Some(entry) = map
                    .get_mut(&channel)
                    .and_then(|entries| entries.iter_mut().find(|e| e.id == id))
                {
                    entry.enabled = enabled;
                }
            }
            Err(e) => warn!(error = %e, "hook registry lock poisoned in set_enabled"),
        }
    }

    /// Number of entries (enabled or not) on a channel.
    pub fn len(&self, channel: Channel) -> usize {
        match self.channels.read() {
            Ok(map) => map.get(&channel).map_or(0, Vec::len),
            Err(e) => {
                warn!(error = %e, "hook registry lock poisoned in len");
                0
            }
        }
    }

    /// Whether a channel has no entries.
    pub fn is_empty(&self, channel: Channel) -> bool {
        self.len(channel) == 0
    }

    /// Run a channel's enabled entries in order, chaining payloads.
    ///
    /// Entry *k*'s `Some` output becomes entry *k+1*'s input; `None` or an
    /// error carries the previous payload forward. A failing hook is logged
    /// and never aborts the channel.
    pub async fn execute(&self, channel: Channel, initial: HookPayload) -> HookPayload {
        // Snapshot the chain so hooks run without holding the lock.
        let chain: Vec<(String, Arc<dyn Hook>)> = match self.channels.read() {
            Ok(map) => map
                .get(&channel)
                .map(|entries| {
                    entries
                        .iter()
                        .filter(|e| e.enabled)
                        .map(|e| (e.id.clone(), Arc::clone(&e.hook)))
                        .collect()
                })
                .unwrap_or_default(),
            Err(e) => {
                warn!(error = %e, "hook registry lock poisoned in execute");
                Vec::new()
            }
        };

        let mut payload = initial;
        for (id, hook) in chain {
            match hook.call(payload.clone()).await {
                Ok(Some(next)) => payload = next,
                Ok(None) => {}
                Err(e) => {
                    warn!(
                        channel = %channel,
                        hook = %id,
                        error = %e,
                        "hook failed; continuing with prior payload"
                    );
                }
            }
        }
        payload
    }
}
