//! The interception context: one explicit object owning every component.
//!
//! Construct it once per process, register hooks and loops against it, and
//! send requests through [`Interceptor::send`]. There is no global state;
//! dropping (or [`Interceptor::shutdown`]) releases everything.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;
use uuid::Uuid;

use crate::config::StraylightConfig;
use crate::hooks::{Channel, Hook, HookError, HookOptions, HookPayload, HookRegistry};
use crate::pipeline::{InterceptOutcome, Pipeline, PipelineError};
use crate::presets::{
    logging_hook, persistence_hook, text_replace_hook, url_replace_hook, LoggingHookOptions,
    PersistenceOptions, RecordSink, TextMatcher, UrlMatcher, UrlReplacement,
};
use crate::scheduler::{Scheduler, StopReason};
use crate::startup::StartupCoordinator;
use crate::store::RequestStore;
use crate::transport::{HttpTransport, Transport};
use crate::types::{RequestDescriptor, StoredRecord};

/// Entry id of the built-in store hook.
const STORE_HOOK_ID: &str = "straylight.store";

/// The framework context. Owns the hook registry, startup coordinator,
/// scheduler, request store, and pipeline.
pub struct Interceptor {
    hooks: Arc<HookRegistry>,
    startup: Arc<StartupCoordinator>,
    scheduler: Scheduler,
    store: Arc<RequestStore>,
    pipeline: Pipeline,
}

impl Default for Interceptor {
    fn default() -> Self {
        Self::new(Arc::new(HttpTransport::default()))
    }
}

impl Interceptor {
    /// Build a context around a transport.
    ///
    /// The request store's save hook is attached to `after-request` at the
    /// lowest possible priority, so it always observes the fully finalized
    /// snapshot.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        let hooks = Arc::new(HookRegistry::new());
        let startup = Arc::new(StartupCoordinator::new());
        let store = Arc::new(RequestStore::new());
        let pipeline = Pipeline::new(Arc::clone(&hooks), Arc::clone(&startup), transport);

        let store_for_hook = Arc::clone(&store);
        hooks.register(
            Channel::AfterRequest,
            crate::hooks::hook_fn(move |payload| {
                let store = Arc::clone(&store_for_hook);
                async move {
                    if let HookPayload::AfterRequest(p) = payload {
                        store.save(p.request, p.response);
                    }
                    Ok(None)
                }
            }),
            HookOptions {
                priority: i32::MIN,
                id: Some(STORE_HOOK_ID.to_owned()),
                enabled: true,
            },
        );

        Self {
            hooks,
            startup,
            scheduler: Scheduler::new(),
            store,
            pipeline,
        }
    }

    /// Build a context from configuration, with the default HTTP transport
    /// tuned by the `[transport]` section.
    pub fn from_config(config: &StraylightConfig) -> Self {
        let transport =
            HttpTransport::new(Duration::from_secs(config.transport.timeout_secs));
        Self::new(Arc::new(transport))
    }

    /// Send a request through the interception pipeline.
    ///
    /// # Errors
    ///
    /// See [`PipelineError`]: only transport failures, invalid URL
    /// replacements, and corrupting data transforms surface.
    pub async fn send(
        &self,
        request: RequestDescriptor,
    ) -> Result<InterceptOutcome, PipelineError> {
        self.pipeline.run(request).await
    }

    // ── Hook surface ────────────────────────────────────────────

    /// Register a hook on a channel named by string.
    ///
    /// # Errors
    ///
    /// [`HookError::UnknownChannel`] when the name is outside the closed
    /// channel set.
    pub fn register(
        &self,
        channel: &str,
        hook: Arc<dyn Hook>,
        options: HookOptions,
    ) -> Result<String, HookError> {
        let channel = Channel::from_str(channel)?;
        Ok(self.hooks.register(channel, hook, options))
    }

    /// Remove a hook entry; a missing id is a no-op.
    ///
    /// # Errors
    ///
    /// [`HookError::UnknownChannel`] when the name is outside the closed
    /// channel set.
    pub fn remove(&self, channel: &str, id: &str) -> Result<(), HookError> {
        let channel = Channel::from_str(channel)?;
        self.hooks.remove(channel, id);
        Ok(())
    }

    /// Direct access to the hook registry for typed-channel callers.
    pub fn hooks(&self) -> &HookRegistry {
        &self.hooks
    }

    /// Register a `url-replace` preset hook; returns its entry id.
    pub fn replace_url(
        &self,
        matcher: impl Into<UrlMatcher>,
        replacement: impl Into<UrlReplacement>,
        options: HookOptions,
    ) -> String {
        self.hooks.register(
            Channel::UrlReplace,
            url_replace_hook(matcher.into(), replacement.into()),
            options,
        )
    }

    /// Register a `data-transform` preset hook rewriting text and JSON
    /// bodies; returns its entry id.
    pub fn replace_text(
        &self,
        matcher: impl Into<TextMatcher>,
        replacement: &str,
        options: HookOptions,
    ) -> String {
        self.hooks.register(
            Channel::DataTransform,
            text_replace_hook(matcher.into(), replacement),
            options,
        )
    }

    /// Attach the logging preset to `after-request`; returns its entry id.
    pub fn enable_logging(&self, options: LoggingHookOptions) -> String {
        self.hooks
            .register(Channel::AfterRequest, logging_hook(options), HookOptions::new())
    }

    /// Attach the persistence preset to `after-request`; returns its entry
    /// id. Records flow to the external sink as exchanges finalize.
    pub fn enable_persistence(
        &self,
        sink: Arc<dyn RecordSink>,
        options: PersistenceOptions,
    ) -> String {
        self.hooks.register(
            Channel::AfterRequest,
            persistence_hook(sink, options),
            HookOptions::new(),
        )
    }

    // ── Startup and loops ───────────────────────────────────────

    /// The one-time startup coordinator.
    pub fn startup(&self) -> &StartupCoordinator {
        &self.startup
    }

    /// The recurring-loop scheduler.
    pub fn loops(&self) -> &Scheduler {
        &self.scheduler
    }

    // ── Request store ───────────────────────────────────────────

    /// Fetch one stored exchange by request id.
    pub fn request(&self, id: Uuid) -> Option<StoredRecord> {
        self.store.get(id)
    }

    /// Every stored exchange, keyed by request id.
    pub fn requests(&self) -> std::collections::HashMap<Uuid, StoredRecord> {
        self.store.get_all()
    }

    /// Empty the request store.
    pub fn clear_storage(&self) {
        self.store.clear();
    }

    // ── Teardown ────────────────────────────────────────────────

    /// Explicit teardown: stop every loop and release stored records.
    /// In-flight requests run to completion; new sends still work but a
    /// shut-down context is meant to be dropped.
    pub fn shutdown(&self) {
        info!("interceptor shutting down");
        self.scheduler.stop_all(StopReason::Manual);
        self.store.clear();
    }
}
