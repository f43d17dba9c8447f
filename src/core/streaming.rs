//! Server-sent-events push channel for low-latency flag updates.
//!
//! Authentication uses a token exchange so the API key never appears in a
//! URL: a short-lived token is fetched over POST with the key in a header,
//! then the SSE connection is opened with the disposable token. The manager
//! refreshes tokens before expiry, reconnects with exponential backoff,
//! watches heartbeats, and steps down to polling when the stream is
//! unusable.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use parking_lot::Mutex;

use crate::error::{ErrorCode, Result, SwitchyardError};
use crate::security::ApiKeyManager;
use crate::types::FlagState;

/// Delay before retrying streaming after it has been declared failed.
const FAILED_RETRY_INTERVAL: Duration = Duration::from_secs(300);

/// Ceiling for the reconnect backoff.
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(30);

/// Connection lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamingState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
}

const STATE_DISCONNECTED: u8 = 0;
const STATE_CONNECTING: u8 = 1;
const STATE_CONNECTED: u8 = 2;
const STATE_RECONNECTING: u8 = 3;
const STATE_FAILED: u8 = 4;

impl StreamingState {
    fn as_u8(self) -> u8 {
        match self {
            StreamingState::Disconnected => STATE_DISCONNECTED,
            StreamingState::Connecting => STATE_CONNECTING,
            StreamingState::Connected => STATE_CONNECTED,
            StreamingState::Reconnecting => STATE_RECONNECTING,
            StreamingState::Failed => STATE_FAILED,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            STATE_CONNECTING => StreamingState::Connecting,
            STATE_CONNECTED => StreamingState::Connected,
            STATE_RECONNECTING => StreamingState::Reconnecting,
            STATE_FAILED => StreamingState::Failed,
            _ => StreamingState::Disconnected,
        }
    }
}

/// Error codes the server can deliver over the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamErrorCode {
    TokenInvalid,
    TokenExpired,
    SubscriptionSuspended,
    ConnectionLimit,
    StreamingUnavailable,
}

impl StreamErrorCode {
    pub fn parse(code: &str) -> Option<Self> {
        match code {
            "TOKEN_INVALID" => Some(StreamErrorCode::TokenInvalid),
            "TOKEN_EXPIRED" => Some(StreamErrorCode::TokenExpired),
            "SUBSCRIPTION_SUSPENDED" => Some(StreamErrorCode::SubscriptionSuspended),
            "CONNECTION_LIMIT" => Some(StreamErrorCode::ConnectionLimit),
            "STREAMING_UNAVAILABLE" => Some(StreamErrorCode::StreamingUnavailable),
            _ => None,
        }
    }
}

#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct StreamTokenResponse {
    token: String,
    /// Seconds.
    expires_in: u64,
}

#[derive(Debug, serde::Deserialize)]
struct StreamErrorPayload {
    code: Option<String>,
    message: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
struct FlagDeletedPayload {
    key: String,
}

/// Streaming tunables.
#[derive(Debug, Clone)]
pub struct StreamingConfig {
    pub enabled: bool,
    /// Base reconnect delay, doubled per consecutive failure. Default: 3s.
    pub reconnect_interval: Duration,
    /// Failures before declaring the stream failed. Default: 3.
    pub max_reconnect_attempts: u32,
    /// Expected heartbeat cadence from the server. Default: 30s.
    pub heartbeat_interval: Duration,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            reconnect_interval: Duration::from_secs(3),
            max_reconnect_attempts: 3,
            heartbeat_interval: Duration::from_secs(30),
        }
    }
}

pub type FlagUpdateCallback = Arc<dyn Fn(FlagState) + Send + Sync>;
pub type FlagDeleteCallback = Arc<dyn Fn(String) + Send + Sync>;
pub type FlagsResetCallback = Arc<dyn Fn(Vec<FlagState>) + Send + Sync>;
pub type FallbackCallback = Arc<dyn Fn() + Send + Sync>;
pub type SubscriptionErrorCallback = Arc<dyn Fn(String) + Send + Sync>;
pub type ConnectionLimitCallback = Arc<dyn Fn() + Send + Sync>;

/// Consumer hooks invoked from the streaming worker. They must not block
/// for long.
pub struct StreamingCallbacks {
    pub on_flag_update: FlagUpdateCallback,
    pub on_flag_delete: FlagDeleteCallback,
    pub on_flags_reset: FlagsResetCallback,
    pub on_fallback_to_polling: FallbackCallback,
    pub on_subscription_error: Option<SubscriptionErrorCallback>,
    pub on_connection_limit: Option<ConnectionLimitCallback>,
}

/// Line-assembler for the SSE wire format.
///
/// Accumulates `data:` lines until a blank line terminates the event, then
/// yields it. Unknown field lines are ignored.
#[derive(Default)]
pub struct SseDecoder {
    buffer: String,
    event_type: Option<String>,
    data: String,
}

/// One decoded server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: String,
    pub data: String,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self {
            buffer: String::new(),
            event_type: None,
            data: String::new(),
        }
    }

    /// Feeds raw bytes, returning every event completed by this chunk.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.buffer.push_str(&String::from_utf8_lossy(bytes));

        let mut out = Vec::new();
        while let Some(pos) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=pos).collect();
            let line = line.trim();

            if line.is_empty() {
                if let Some(event) = self.event_type.take() {
                    if !self.data.is_empty() {
                        out.push(SseEvent {
                            event,
                            data: std::mem::take(&mut self.data),
                        });
                    }
                }
                self.data.clear();
                continue;
            }

            if let Some(rest) = line.strip_prefix("event:") {
                self.event_type = Some(rest.trim().to_string());
            } else if let Some(rest) = line.strip_prefix("data:") {
                self.data.push_str(rest.trim());
            }
        }
        out
    }
}

/// What the read loop should do after an event was handled.
enum Directive {
    /// Tear down and reconnect immediately with a fresh token.
    Reconnect,
    /// Treat as a transport failure: backoff reconnect.
    Backoff,
    /// Stop streaming; polling takes over.
    GiveUp,
}

#[derive(Default)]
struct Tasks {
    reader: Option<tokio::task::JoinHandle<()>>,
    token_refresh: Option<tokio::task::JoinHandle<()>>,
    heartbeat: Option<tokio::task::JoinHandle<()>>,
    reconnect: Option<tokio::task::JoinHandle<()>>,
    retry: Option<tokio::task::JoinHandle<()>>,
}

/// Maintains the push connection and applies incoming events through the
/// consumer callbacks.
pub struct StreamingManager {
    base_url: String,
    keys: Arc<ApiKeyManager>,
    config: StreamingConfig,
    callbacks: StreamingCallbacks,

    // The SSE read must not time out; this client has no request timeout.
    client: reqwest::Client,
    state: AtomicU8,
    consecutive_failures: AtomicU32,
    last_heartbeat: Mutex<Instant>,
    tasks: Mutex<Tasks>,
    closed: AtomicBool,
}

impl StreamingManager {
    pub fn new(
        base_url: impl Into<String>,
        keys: Arc<ApiKeyManager>,
        config: StreamingConfig,
        callbacks: StreamingCallbacks,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            keys,
            config,
            callbacks,
            client: reqwest::Client::new(),
            state: AtomicU8::new(STATE_DISCONNECTED),
            consecutive_failures: AtomicU32::new(0),
            last_heartbeat: Mutex::new(Instant::now()),
            tasks: Mutex::new(Tasks::default()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> StreamingState {
        StreamingState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_connected(&self) -> bool {
        self.state() == StreamingState::Connected
    }

    fn set_state(&self, state: StreamingState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }

    /// Starts connecting. Simultaneous callers produce exactly one
    /// initiator: only a transition out of DISCONNECTED, FAILED, or
    /// RECONNECTING wins.
    pub fn connect(self: &Arc<Self>) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        if !self.try_begin_connecting() {
            return;
        }

        let manager = Arc::clone(self);
        let handle = tokio::spawn(async move {
            manager.initiate_connection().await;
        });
        self.tasks.lock().reader = Some(handle);
    }

    fn try_begin_connecting(&self) -> bool {
        for from in [STATE_DISCONNECTED, STATE_FAILED, STATE_RECONNECTING] {
            if self
                .state
                .compare_exchange(from, STATE_CONNECTING, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return true;
            }
        }
        false
    }

    /// Tears the connection down and returns to DISCONNECTED.
    pub fn disconnect(&self) {
        self.cleanup_all();
        self.set_state(StreamingState::Disconnected);
        self.consecutive_failures.store(0, Ordering::Release);
        tracing::debug!("streaming disconnected");
    }

    /// Re-attempts streaming from a non-active state with a clean failure
    /// count.
    pub fn retry_connection(self: &Arc<Self>) {
        match self.state() {
            StreamingState::Connected | StreamingState::Connecting => return,
            _ => {}
        }
        self.consecutive_failures.store(0, Ordering::Release);
        self.connect();
    }

    /// Cancels the connection and all timers; the manager will not
    /// reconnect afterwards.
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        self.disconnect();
        tracing::debug!("streaming shut down");
    }

    async fn initiate_connection(self: Arc<Self>) {
        let token = match self.fetch_stream_token().await {
            Ok(response) => {
                let refresh_after =
                    Duration::from_secs_f64(response.expires_in as f64 * 0.8);
                self.schedule_token_refresh(refresh_after);
                response.token
            }
            Err(e) => {
                tracing::warn!("failed to fetch stream token: {e}");
                self.handle_connection_failure();
                return;
            }
        };

        self.create_connection(&token).await;
    }

    async fn fetch_stream_token(&self) -> Result<StreamTokenResponse> {
        let url = format!("{}/sdk/stream/token", self.base_url);

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("X-API-Key", self.keys.current())
            .body("{}")
            .send()
            .await
            .map_err(|e| {
                SwitchyardError::with_source(ErrorCode::NetworkError, "token request failed", e)
            })?;

        if !response.status().is_success() {
            return Err(SwitchyardError::network(
                ErrorCode::StreamTokenInvalid,
                format!("token endpoint returned {}", response.status().as_u16()),
            ));
        }

        response.json::<StreamTokenResponse>().await.map_err(|e| {
            SwitchyardError::with_source(
                ErrorCode::HttpInvalidResponse,
                "failed to parse token response",
                e,
            )
        })
    }

    /// Refreshes the token at 80% of its lifetime. A refresh failure forces
    /// a clean disconnect-and-reconnect.
    fn schedule_token_refresh(self: &Arc<Self>, delay: Duration) {
        let manager = Arc::clone(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if manager.closed.load(Ordering::Acquire) {
                return;
            }
            match manager.fetch_stream_token().await {
                Ok(response) => {
                    let next = Duration::from_secs_f64(response.expires_in as f64 * 0.8);
                    manager.schedule_token_refresh(next);
                }
                Err(e) => {
                    tracing::warn!("stream token refresh failed, reconnecting: {e}");
                    manager.disconnect();
                    manager.connect();
                }
            }
        });

        if let Some(old) = self.tasks.lock().token_refresh.replace(handle) {
            old.abort();
        }
    }

    async fn create_connection(self: &Arc<Self>, token: &str) {
        let url = format!("{}/sdk/stream?token={token}", self.base_url);

        let response = match self
            .client
            .get(&url)
            .header("Accept", "text/event-stream")
            .header("Cache-Control", "no-cache")
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                if !self.closed.load(Ordering::Acquire) {
                    tracing::warn!("SSE connection error: {e}");
                    self.handle_connection_failure();
                }
                return;
            }
        };

        if !response.status().is_success() {
            tracing::warn!("SSE connection refused: {}", response.status());
            self.handle_connection_failure();
            return;
        }

        self.handle_open();

        let mut decoder = SseDecoder::new();
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let bytes = match chunk {
                Ok(bytes) => bytes,
                Err(_) => break,
            };

            for event in decoder.push(&bytes) {
                match self.process_event(&event.event, &event.data) {
                    None => {}
                    Some(Directive::Reconnect) => {
                        self.cleanup_timers();
                        self.set_state(StreamingState::Reconnecting);
                        self.connect();
                        return;
                    }
                    Some(Directive::Backoff) => {
                        self.handle_connection_failure();
                        return;
                    }
                    Some(Directive::GiveUp) => {
                        self.cleanup_timers();
                        self.set_state(StreamingState::Failed);
                        (self.callbacks.on_fallback_to_polling)();
                        return;
                    }
                }
            }
        }

        // Stream ended without an explicit instruction.
        if self.state() == StreamingState::Connected {
            self.handle_connection_failure();
        }
    }

    fn handle_open(self: &Arc<Self>) {
        self.set_state(StreamingState::Connected);
        self.consecutive_failures.store(0, Ordering::Release);
        *self.last_heartbeat.lock() = Instant::now();
        self.start_heartbeat_monitor();
        tracing::info!("streaming connected");
    }

    /// Applies one decoded event. Events from one session are applied in
    /// receive order on the reader task; the last apply wins.
    fn process_event(&self, event_type: &str, data: &str) -> Option<Directive> {
        match event_type {
            "flag_updated" => {
                match serde_json::from_str::<FlagState>(data) {
                    Ok(flag) => (self.callbacks.on_flag_update)(flag),
                    Err(e) => tracing::warn!("bad flag_updated payload: {e}"),
                }
                None
            }
            "flag_deleted" => {
                match serde_json::from_str::<FlagDeletedPayload>(data) {
                    Ok(payload) => (self.callbacks.on_flag_delete)(payload.key),
                    Err(e) => tracing::warn!("bad flag_deleted payload: {e}"),
                }
                None
            }
            "flags_reset" => {
                match serde_json::from_str::<Vec<FlagState>>(data) {
                    Ok(flags) => (self.callbacks.on_flags_reset)(flags),
                    Err(e) => tracing::warn!("bad flags_reset payload: {e}"),
                }
                None
            }
            "heartbeat" => {
                *self.last_heartbeat.lock() = Instant::now();
                None
            }
            "error" => Some(self.handle_stream_error(data)),
            _ => None,
        }
    }

    fn handle_stream_error(&self, data: &str) -> Directive {
        let payload: StreamErrorPayload = match serde_json::from_str(data) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!("unparseable stream error event: {e}");
                return Directive::Backoff;
            }
        };

        let message = payload.message.unwrap_or_else(|| "unknown error".to_string());
        let code = payload.code.as_deref().and_then(StreamErrorCode::parse);
        tracing::warn!("stream error event: code={:?}, message={message}", payload.code);

        match code {
            Some(StreamErrorCode::TokenExpired) | Some(StreamErrorCode::TokenInvalid) => {
                tracing::info!("stream token rejected, fetching a fresh one");
                Directive::Reconnect
            }
            Some(StreamErrorCode::SubscriptionSuspended) => {
                tracing::error!("subscription suspended: {message}");
                if let Some(ref callback) = self.callbacks.on_subscription_error {
                    callback(message);
                }
                Directive::GiveUp
            }
            Some(StreamErrorCode::ConnectionLimit) => {
                if let Some(ref callback) = self.callbacks.on_connection_limit {
                    callback();
                }
                Directive::Backoff
            }
            Some(StreamErrorCode::StreamingUnavailable) => Directive::GiveUp,
            None => Directive::Backoff,
        }
    }

    fn handle_connection_failure(self: &Arc<Self>) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        self.cleanup_timers();

        let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;

        if failures >= self.config.max_reconnect_attempts {
            self.set_state(StreamingState::Failed);
            tracing::warn!("streaming failed after {failures} attempts, falling back to polling");
            (self.callbacks.on_fallback_to_polling)();
            self.schedule_streaming_retry();
        } else {
            self.set_state(StreamingState::Reconnecting);
            let delay = self.reconnect_delay(failures);
            tracing::debug!("reconnecting in {delay:?} (attempt {failures})");

            let manager = Arc::clone(self);
            let handle = tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                manager.connect();
            });
            if let Some(old) = self.tasks.lock().reconnect.replace(handle) {
                old.abort();
            }
        }
    }

    fn reconnect_delay(&self, failures: u32) -> Duration {
        let base = self.config.reconnect_interval.as_millis() as f64;
        let backoff = 2_f64.powi(failures.saturating_sub(1) as i32);
        let delay = base * backoff;
        Duration::from_millis(delay.min(MAX_RECONNECT_DELAY.as_millis() as f64) as u64)
    }

    /// After a hard failure, quietly re-attempts streaming in the
    /// background until it comes back.
    fn schedule_streaming_retry(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(FAILED_RETRY_INTERVAL).await;
            if manager.closed.load(Ordering::Acquire) {
                return;
            }
            tracing::info!("retrying streaming connection");
            manager.retry_connection();
        });
        if let Some(old) = self.tasks.lock().retry.replace(handle) {
            old.abort();
        }
    }

    /// Fires every 1.5 heartbeat intervals; silence beyond twice the
    /// interval is treated as a transport failure.
    fn start_heartbeat_monitor(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        let interval = self.config.heartbeat_interval;
        let check_every = interval.mul_f64(1.5);

        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(check_every).await;
                if manager.closed.load(Ordering::Acquire)
                    || manager.state() != StreamingState::Connected
                {
                    break;
                }
                let silence = manager.last_heartbeat.lock().elapsed();
                if silence > interval * 2 {
                    tracing::warn!("heartbeat timeout after {silence:?}, reconnecting");
                    manager.handle_connection_failure();
                    break;
                }
            }
        });

        if let Some(old) = self.tasks.lock().heartbeat.replace(handle) {
            old.abort();
        }
    }

    /// Cancels timers but leaves the reader alone; the reader cancels
    /// itself by returning.
    fn cleanup_timers(&self) {
        let mut tasks = self.tasks.lock();
        for handle in [
            tasks.token_refresh.take(),
            tasks.heartbeat.take(),
            tasks.reconnect.take(),
            tasks.retry.take(),
        ]
        .into_iter()
        .flatten()
        {
            handle.abort();
        }
    }

    fn cleanup_all(&self) {
        self.cleanup_timers();
        if let Some(reader) = self.tasks.lock().reader.take() {
            reader.abort();
        }
    }
}

impl Drop for StreamingManager {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::Release);
        let mut tasks = self.tasks.lock();
        for handle in [
            tasks.reader.take(),
            tasks.token_refresh.take(),
            tasks.heartbeat.take(),
            tasks.reconnect.take(),
            tasks.retry.take(),
        ]
        .into_iter()
        .flatten()
        {
            handle.abort();
        }
    }
}
