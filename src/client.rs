//! The Switchyard client.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use rand::Rng;
use serde::Deserialize;
use tokio::sync::watch;

use crate::config::SwitchyardOptions;
use crate::context::EvaluationContext;
use crate::core::{
    batch_body, EventQueue, EventSender, FlagStore, PollCallback, PollingConfig, PollingManager,
    StreamingCallbacks, StreamingManager,
};
use crate::error::{ErrorCode, Result, SwitchyardError};
use crate::http::{CircuitBreaker, HttpClient, RetryConfig};
use crate::security::{verify_bootstrap, ApiKeyManager, CacheSealer};
use crate::types::{EvaluationReason, EvaluationResult, FlagState, FlagType, FlagValue};
use crate::version::is_version_less_than;
use crate::SDK_VERSION;

/// Default wait in [`SwitchyardClient::wait_for_ready`]'s zero-argument
/// counterpart.
const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InitResponse {
    #[serde(default)]
    flags: Vec<FlagState>,
    environment_id: Option<String>,
    server_time: Option<String>,
    polling_interval_seconds: Option<u64>,
    metadata: Option<InitMetadata>,
}

/// Version guidance the server attaches to `/sdk/init`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InitMetadata {
    sdk_version_min: Option<String>,
    sdk_version_recommended: Option<String>,
    sdk_version_latest: Option<String>,
    deprecation_warning: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdatesResponse {
    #[serde(default)]
    flags: Vec<FlagState>,
    checked_at: Option<String>,
}

/// Feature flag client: local evaluation over a TTL cache kept fresh by
/// background polling and an SSE push stream.
///
/// Fully instantiable; multiple independent clients in one process are safe.
/// Construct with [`SwitchyardClient::new`], then call
/// [`initialize`](Self::initialize) to fetch the initial flag set and start
/// the background workers.
pub struct SwitchyardClient {
    options: SwitchyardOptions,
    keys: Arc<ApiKeyManager>,
    http: Arc<HttpClient>,
    store: Arc<FlagStore>,
    events: EventQueue,
    sealer: Option<CacheSealer>,
    polling: Mutex<Option<Arc<PollingManager>>>,
    streaming: Mutex<Option<Arc<StreamingManager>>>,
    global_context: RwLock<Option<EvaluationContext>>,
    last_update_time: RwLock<Option<String>>,
    session_id: String,
    ready: watch::Sender<bool>,
    closed: AtomicBool,
}

impl SwitchyardClient {
    /// Validates the options, verifies and applies bootstrap data, and
    /// builds the transport. Performs no network I/O.
    pub fn new(options: SwitchyardOptions) -> Result<Arc<Self>> {
        options.validate()?;

        let keys = Arc::new(ApiKeyManager::new(
            options.api_key.clone(),
            options.secondary_api_key.clone(),
        ));

        let breaker = Arc::new(CircuitBreaker::new(
            options.circuit_breaker_threshold,
            2,
            options.circuit_breaker_reset_timeout,
            1,
        ));

        let mut http = HttpClient::new(
            options.base_url.clone(),
            Arc::clone(&keys),
            breaker,
            options.timeout,
            RetryConfig::new(options.retries),
            options.enable_request_signing,
        )?;
        if let Some(ref callback) = options.on_usage_update {
            http.set_usage_callback(Arc::clone(callback));
        }
        let http = Arc::new(http);

        let store = Arc::new(FlagStore::new(options.cache_ttl, options.max_cache_size));

        let session_id = uuid::Uuid::new_v4().to_string();
        let mut events = EventQueue::new(options.events.clone(), session_id.clone());
        events.set_sender(Self::event_sender(Arc::clone(&http)));

        if let Some(ref bootstrap_config) = options.bootstrap_config {
            verify_bootstrap(
                bootstrap_config,
                &options.api_key,
                &options.bootstrap_verification,
            )?;
        }

        let (ready, _) = watch::channel(false);

        let sealer = if options.enable_cache_encryption {
            Some(CacheSealer::new(&options.api_key)?)
        } else {
            None
        };

        let client = Arc::new(Self {
            keys,
            http,
            store,
            events,
            sealer,
            polling: Mutex::new(None),
            streaming: Mutex::new(None),
            global_context: RwLock::new(None),
            last_update_time: RwLock::new(None),
            session_id,
            ready,
            closed: AtomicBool::new(false),
            options,
        });

        tracing::info!("client created (offline: {})", client.options.offline);

        Ok(client)
    }

    fn event_sender(http: Arc<HttpClient>) -> EventSender {
        Arc::new(move |batch| {
            let http = Arc::clone(&http);
            Box::pin(async move {
                http.post("/sdk/events/batch", &batch_body(batch)).await?;
                Ok(())
            })
        })
    }

    /// Fetches the initial flag set and starts the background workers.
    ///
    /// A failed fetch still marks the client ready — evaluation falls back
    /// to cache, bootstrap, and defaults — and the error is both propagated
    /// and delivered to `on_error`.
    pub async fn initialize(self: &Arc<Self>) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SwitchyardError::new(
                ErrorCode::InitFailed,
                "client is closed",
            ));
        }

        if self.options.offline {
            tracing::info!("offline mode, skipping initialization fetch");
            self.set_ready();
            return Ok(());
        }

        match self.fetch_init().await {
            Ok(()) => {
                self.start_workers();
                self.set_ready();
                Ok(())
            }
            Err(mut e) => {
                e.sanitize(&self.options.error_sanitization);
                tracing::error!("initialization failed: {e}");
                if let Some(ref callback) = self.options.on_error {
                    callback(&e);
                }
                // Ready anyway: cache, bootstrap, and defaults still serve.
                self.set_ready();
                Err(e)
            }
        }
    }

    async fn fetch_init(self: &Arc<Self>) -> Result<()> {
        let response = self.http.get("/sdk/init").await?;
        let init: InitResponse = response.json()?;

        if self.options.cache_enabled && !init.flags.is_empty() {
            let count = init.flags.len();
            self.store.set_many(init.flags);
            tracing::info!("initialized with {count} flags");
        }

        if let Some(environment_id) = init.environment_id {
            self.events.set_environment_id(environment_id);
        }
        if let Some(server_time) = init.server_time {
            *self.last_update_time.write() = Some(server_time);
        }
        if let Some(ref metadata) = init.metadata {
            self.check_version_metadata(metadata);
        }

        if self.options.enable_polling {
            let advertised = init
                .polling_interval_seconds
                .map(Duration::from_secs)
                .unwrap_or(self.options.polling_interval);
            self.start_polling(advertised.max(self.options.polling_interval));
        }

        Ok(())
    }

    fn start_workers(self: &Arc<Self>) {
        if self.options.streaming.enabled {
            self.start_streaming();
        }
        self.events.start();
    }

    fn poll_callback(self: &Arc<Self>) -> PollCallback {
        let weak = Arc::downgrade(self);
        Arc::new(move || {
            let weak = weak.clone();
            Box::pin(async move {
                match weak.upgrade() {
                    Some(client) => client.refresh_once().await.map_err(|e| {
                        tracing::warn!("flag refresh failed: {e}");
                    }),
                    None => Err(()),
                }
            })
        })
    }

    fn start_polling(self: &Arc<Self>, interval: Duration) {
        let mut slot = self.polling.lock();
        if slot.is_some() {
            return;
        }
        let manager = Arc::new(PollingManager::new(PollingConfig::new(interval)));
        manager.start(self.poll_callback());
        *slot = Some(manager);
    }

    fn start_streaming(self: &Arc<Self>) {
        let mut slot = self.streaming.lock();
        if slot.is_some() {
            return;
        }

        let store = Arc::clone(&self.store);
        let cache_enabled = self.options.cache_enabled;
        let cache_ttl = self.options.cache_ttl;
        let weak = Arc::downgrade(self);

        let on_flag_update = {
            let store = Arc::clone(&store);
            Arc::new(move |flag: FlagState| {
                if cache_enabled {
                    store.set(flag.key.clone(), flag);
                }
            })
        };
        let on_flag_delete = {
            let store = Arc::clone(&store);
            Arc::new(move |key: String| {
                store.delete(&key);
            })
        };
        let on_flags_reset = {
            let store = Arc::clone(&store);
            Arc::new(move |flags: Vec<FlagState>| {
                if cache_enabled {
                    store.replace_all(flags, cache_ttl);
                }
            })
        };
        let on_fallback_to_polling = Arc::new(move || {
            if let Some(client) = weak.upgrade() {
                tracing::info!("streaming unavailable, ensuring polling is active");
                client.start_polling(client.options.polling_interval);
            }
        });

        let manager = Arc::new(StreamingManager::new(
            self.options.base_url.clone(),
            Arc::clone(&self.keys),
            self.options.streaming.clone(),
            StreamingCallbacks {
                on_flag_update,
                on_flag_delete,
                on_flags_reset,
                on_fallback_to_polling,
                on_subscription_error: self.options.on_subscription_error.clone(),
                on_connection_limit: self.options.on_connection_limit.clone(),
            },
        ));
        manager.connect();
        *slot = Some(manager);
    }

    fn check_version_metadata(&self, metadata: &InitMetadata) {
        if let Some(ref warning) = metadata.deprecation_warning {
            if !warning.is_empty() {
                tracing::warn!("deprecation warning from server: {warning}");
            }
        }

        if let Some(ref min) = metadata.sdk_version_min {
            if !min.is_empty() && is_version_less_than(SDK_VERSION, min) {
                tracing::error!(
                    "SDK version {SDK_VERSION} is below the minimum required {min}; \
                     some features may not work, please upgrade"
                );
            }
        }

        let mut warned_recommended = false;
        if let Some(ref recommended) = metadata.sdk_version_recommended {
            if !recommended.is_empty() && is_version_less_than(SDK_VERSION, recommended) {
                tracing::warn!(
                    "SDK version {SDK_VERSION} is below the recommended {recommended}"
                );
                warned_recommended = true;
            }
        }

        if let Some(ref latest) = metadata.sdk_version_latest {
            if !latest.is_empty()
                && is_version_less_than(SDK_VERSION, latest)
                && !warned_recommended
            {
                tracing::info!("a newer SDK version {latest} is available");
            }
        }
    }

    pub fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }

    /// Blocks (asynchronously) until the client is ready or the timeout
    /// elapses. Returns whether the client became ready.
    pub async fn wait_for_ready(&self, timeout: Duration) -> bool {
        let mut rx = self.ready.subscribe();
        if *rx.borrow() {
            return true;
        }
        tokio::time::timeout(timeout, async {
            while rx.changed().await.is_ok() {
                if *rx.borrow() {
                    return true;
                }
            }
            false
        })
        .await
        .unwrap_or(false)
    }

    /// [`wait_for_ready`](Self::wait_for_ready) with the default 30s timeout.
    pub async fn wait_for_ready_default(&self) -> bool {
        self.wait_for_ready(DEFAULT_READY_TIMEOUT).await
    }

    fn set_ready(&self) {
        let was_ready = self.ready.send_replace(true);
        if !was_ready {
            if let Some(ref callback) = self.options.on_ready {
                callback();
            }
        }
    }

    /// Resolves a flag to a typed result: fresh cache, then stale cache,
    /// then bootstrap, then the supplied default. Performs no I/O and never
    /// fails; every outcome is carried in the result's `reason`.
    pub fn evaluate(
        &self,
        key: &str,
        default_value: impl Into<FlagValue>,
        expected_type: Option<FlagType>,
        context: Option<&EvaluationContext>,
    ) -> EvaluationResult {
        self.apply_evaluation_jitter();
        let default_value = default_value.into();

        if key.is_empty() {
            tracing::warn!("evaluate called with an empty flag key");
            return EvaluationResult::default_result(key, default_value, EvaluationReason::Error);
        }

        // Variants are assigned server-side; the context shapes server
        // requests, not the local lookup.
        let _context = self.merged_context(context);

        if self.options.cache_enabled {
            if let Some(flag) = self.store.get(key) {
                if let Some(expected) = expected_type {
                    let actual = flag.effective_flag_type();
                    if actual != expected {
                        tracing::warn!(
                            "flag type mismatch for {key}: expected {expected}, got {actual}"
                        );
                        return EvaluationResult::default_result(
                            key,
                            default_value,
                            EvaluationReason::TypeMismatch,
                        );
                    }
                }
                return EvaluationResult::from_flag(&flag, EvaluationReason::Cached);
            }

            if let Some(stale) = self.store.get_stale(key) {
                tracing::debug!("serving stale value for {key}");
                return EvaluationResult::from_flag(&stale, EvaluationReason::StaleCache);
            }
        }

        if let Some(value) = self.options.bootstrap.get(key) {
            tracing::debug!("serving bootstrap value for {key}");
            return EvaluationResult::default_result(
                key,
                FlagValue::from(value.clone()),
                EvaluationReason::Bootstrap,
            );
        }

        EvaluationResult::default_result(key, default_value, EvaluationReason::FlagNotFound)
    }

    fn apply_evaluation_jitter(&self) {
        let jitter = &self.options.evaluation_jitter;
        if !jitter.enabled || jitter.max_ms == 0 {
            return;
        }
        let (lo, hi) = (jitter.min_ms.min(jitter.max_ms), jitter.max_ms);
        let delay = rand::thread_rng().gen_range(lo..=hi);
        std::thread::sleep(Duration::from_millis(delay));
    }

    pub fn get_boolean_value(
        &self,
        key: &str,
        default_value: bool,
        context: Option<&EvaluationContext>,
    ) -> bool {
        self.evaluate(key, default_value, Some(FlagType::Boolean), context)
            .bool_value()
    }

    pub fn get_string_value(
        &self,
        key: &str,
        default_value: &str,
        context: Option<&EvaluationContext>,
    ) -> String {
        self.evaluate(key, default_value, Some(FlagType::String), context)
            .string_value()
            .map(str::to_string)
            .unwrap_or_else(|| default_value.to_string())
    }

    pub fn get_number_value(
        &self,
        key: &str,
        default_value: f64,
        context: Option<&EvaluationContext>,
    ) -> f64 {
        self.evaluate(key, default_value, Some(FlagType::Number), context)
            .number_value()
    }

    pub fn get_int_value(
        &self,
        key: &str,
        default_value: i64,
        context: Option<&EvaluationContext>,
    ) -> i64 {
        self.evaluate(key, default_value, Some(FlagType::Number), context)
            .int_value()
    }

    pub fn get_json_value(
        &self,
        key: &str,
        default_value: Option<serde_json::Value>,
        context: Option<&EvaluationContext>,
    ) -> Option<serde_json::Value> {
        let default_flag_value = default_value
            .clone()
            .map(FlagValue::Json)
            .unwrap_or(FlagValue::Null);
        self.evaluate(key, default_flag_value, Some(FlagType::Json), context)
            .json_value()
            .cloned()
            .or(default_value)
    }

    /// Whether the key exists in the cache (fresh or stale) or the
    /// bootstrap set.
    pub fn has_flag(&self, key: &str) -> bool {
        (self.options.cache_enabled && self.store.has(key))
            || self.options.bootstrap.contains_key(key)
    }

    pub fn all_flag_keys(&self) -> Vec<String> {
        let mut keys: HashSet<String> = self.store.keys().into_iter().collect();
        keys.extend(self.options.bootstrap.keys().cloned());
        keys.into_iter().collect()
    }

    pub fn all_flags(&self) -> HashMap<String, FlagState> {
        self.store
            .all()
            .into_iter()
            .map(|flag| (flag.key.clone(), flag))
            .collect()
    }

    pub fn set_context(&self, context: EvaluationContext) {
        *self.global_context.write() = Some(context);
    }

    pub fn get_context(&self) -> Option<EvaluationContext> {
        self.global_context.read().clone()
    }

    pub fn clear_context(&self) {
        *self.global_context.write() = None;
    }

    /// Identifies a user, merging the attributes into the global context.
    pub fn identify(
        &self,
        user_id: impl Into<String>,
        attributes: Option<HashMap<String, serde_json::Value>>,
    ) {
        let user_id = user_id.into();
        let mut context = EvaluationContext::new(user_id.clone());
        if let Some(attrs) = attributes {
            context = context.with_custom_map(attrs);
        }

        {
            let mut global = self.global_context.write();
            *global = Some(match global.take() {
                Some(existing) => existing.merge(&context),
                None => context,
            });
        }

        let mut data = HashMap::new();
        data.insert("userId".to_string(), serde_json::json!(user_id));
        self.events.track("context.identified", Some(data));
    }

    /// Returns to an anonymous context.
    pub fn reset(&self) {
        *self.global_context.write() = Some(EvaluationContext::anonymous());
        self.events.track("context.reset", None);
    }

    fn merged_context(&self, context: Option<&EvaluationContext>) -> Option<EvaluationContext> {
        let global = self.global_context.read();
        match (global.as_ref(), context) {
            (Some(global), Some(local)) => Some(global.merge(local)),
            (Some(global), None) => Some(global.clone()),
            (None, Some(local)) => Some(local.clone()),
            (None, None) => None,
        }
    }

    /// Records an analytics event. Non-blocking; dropped if the queue is
    /// full.
    pub fn track(
        &self,
        event_type: impl Into<String>,
        data: Option<HashMap<String, serde_json::Value>>,
    ) {
        self.events.track(event_type, data);
    }

    /// Records an analytics event with the merged evaluation context
    /// attached (private attributes stripped).
    pub fn track_with_context(
        &self,
        event_type: impl Into<String>,
        data: Option<HashMap<String, serde_json::Value>>,
        context: Option<&EvaluationContext>,
    ) {
        match self.merged_context(context) {
            Some(merged) => self.events.track_with_context(event_type, data, &merged),
            None => self.events.track(event_type, data),
        }
    }

    /// Flushes pending analytics events.
    pub async fn flush(&self) {
        self.events.flush().await;
    }

    /// Forces a flag refresh outside the polling schedule.
    pub async fn refresh(&self) -> Result<()> {
        if self.options.offline || self.closed.load(Ordering::Acquire) {
            return Ok(());
        }
        self.refresh_once().await.map_err(|mut e| {
            e.sanitize(&self.options.error_sanitization);
            e
        })
    }

    async fn refresh_once(&self) -> Result<()> {
        let since = self
            .last_update_time
            .read()
            .clone()
            .unwrap_or_else(|| {
                (chrono::Utc::now() - chrono::Duration::hours(1))
                    .to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
            });

        let response = self.http.get(&format!("/sdk/updates?since={since}")).await?;
        let updates: UpdatesResponse = response.json()?;

        if !updates.flags.is_empty() {
            let flags = updates.flags.clone();
            if self.options.cache_enabled {
                self.store.set_many(updates.flags);
            }
            tracing::debug!("refreshed {} flags", flags.len());
            if let Some(ref callback) = self.options.on_update {
                callback(flags);
            }
        }

        // Opaque server cursor, carried forward verbatim.
        if let Some(checked_at) = updates.checked_at {
            *self.last_update_time.write() = Some(checked_at);
        }

        Ok(())
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// The underlying flag store, exposed for statistics and diagnostics.
    pub fn store(&self) -> &Arc<FlagStore> {
        &self.store
    }

    /// Seals the current flag set (stale entries included) into an opaque
    /// envelope a binding layer can persist. Returns `None` unless
    /// `enable_cache_encryption` is set; the core itself never touches disk.
    pub fn sealed_snapshot(&self) -> Result<Option<String>> {
        match self.sealer {
            Some(ref sealer) => sealer.seal(&self.store.all()).map(Some),
            None => Ok(None),
        }
    }

    /// Restores flags from an envelope produced by
    /// [`sealed_snapshot`](Self::sealed_snapshot). Restored entries get the
    /// configured cache TTL. Returns the number of flags restored.
    pub fn restore_snapshot(&self, envelope: &str) -> Result<usize> {
        let Some(ref sealer) = self.sealer else {
            return Err(SwitchyardError::new(
                ErrorCode::CacheDecryptionError,
                "cache encryption is not enabled",
            ));
        };

        let flags = sealer.open(envelope)?;
        let count = flags.len();
        if self.options.cache_enabled {
            self.store.set_many(flags);
        }
        tracing::debug!("restored {count} flags from sealed snapshot");
        Ok(count)
    }

    /// The transport's key manager, exposed for failover inspection.
    pub fn keys(&self) -> &Arc<ApiKeyManager> {
        &self.keys
    }

    /// Pending analytics events.
    pub fn event_queue_size(&self) -> usize {
        self.events.size()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Stops every background worker and releases the client's resources.
    /// Safe to call more than once.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::debug!("closing client");

        let polling = self.polling.lock().take();
        if let Some(polling) = polling {
            polling.shutdown().await;
        }

        let streaming = self.streaming.lock().take();
        if let Some(streaming) = streaming {
            streaming.shutdown();
        }

        self.events.stop().await;
        tracing::info!("client closed");
    }
}
