//! Client configuration.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::core::{ConnectionLimitCallback, EventQueueConfig, StreamingConfig, SubscriptionErrorCallback};
use crate::error::{ErrorCode, ErrorSanitizationConfig, Result, SwitchyardError};
use crate::http::{UsageUpdateCallback, DEFAULT_BASE_URL};
use crate::security::{is_valid_key_format, BootstrapConfig, BootstrapVerificationConfig};
use crate::types::FlagState;

pub const DEFAULT_POLLING_INTERVAL: Duration = Duration::from_secs(30);
pub const MIN_POLLING_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);
pub const DEFAULT_MAX_CACHE_SIZE: usize = 1000;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_RETRIES: u32 = 3;
pub const DEFAULT_CIRCUIT_BREAKER_THRESHOLD: u32 = 5;
pub const DEFAULT_CIRCUIT_BREAKER_RESET_TIMEOUT: Duration = Duration::from_secs(30);

/// Uniform random delay applied inside every evaluation, blurring cache-hit
/// timing. Disabled by default; latency-sensitive consumers should leave it
/// off.
#[derive(Debug, Clone)]
pub struct EvaluationJitterConfig {
    pub enabled: bool,
    pub min_ms: u64,
    pub max_ms: u64,
}

impl Default for EvaluationJitterConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            min_ms: 5,
            max_ms: 15,
        }
    }
}

impl EvaluationJitterConfig {
    pub fn enabled() -> Self {
        Self {
            enabled: true,
            ..Default::default()
        }
    }

    pub fn new(enabled: bool, min_ms: u64, max_ms: u64) -> Self {
        Self {
            enabled,
            min_ms,
            max_ms,
        }
    }
}

pub type ReadyCallback = Arc<dyn Fn() + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn(&SwitchyardError) + Send + Sync>;
pub type UpdateCallback = Arc<dyn Fn(Vec<FlagState>) + Send + Sync>;

/// Everything the client can be configured with.
#[derive(Clone)]
pub struct SwitchyardOptions {
    pub api_key: String,
    /// Failover credential activated when the primary is rejected.
    pub secondary_api_key: Option<String>,
    pub base_url: String,
    /// Requested polling cadence; the effective interval is the larger of
    /// this and the server-advertised one.
    pub polling_interval: Duration,
    pub enable_polling: bool,
    pub cache_enabled: bool,
    pub cache_ttl: Duration,
    pub max_cache_size: usize,
    /// Skip the network entirely; evaluation serves bootstrap and defaults.
    pub offline: bool,
    pub timeout: Duration,
    pub retries: u32,
    pub circuit_breaker_threshold: u32,
    pub circuit_breaker_reset_timeout: Duration,
    /// Seed values served when a key is not cached.
    pub bootstrap: HashMap<String, serde_json::Value>,
    pub enable_request_signing: bool,
    pub enable_cache_encryption: bool,
    /// Signed seed; takes precedence over `bootstrap` when present.
    pub bootstrap_config: Option<BootstrapConfig>,
    pub bootstrap_verification: BootstrapVerificationConfig,
    pub evaluation_jitter: EvaluationJitterConfig,
    pub error_sanitization: ErrorSanitizationConfig,
    pub streaming: StreamingConfig,
    pub events: EventQueueConfig,

    pub on_ready: Option<ReadyCallback>,
    pub on_error: Option<ErrorCallback>,
    pub on_update: Option<UpdateCallback>,
    pub on_usage_update: Option<UsageUpdateCallback>,
    pub on_subscription_error: Option<SubscriptionErrorCallback>,
    pub on_connection_limit: Option<ConnectionLimitCallback>,
}

impl SwitchyardOptions {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            secondary_api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            polling_interval: DEFAULT_POLLING_INTERVAL,
            enable_polling: true,
            cache_enabled: true,
            cache_ttl: DEFAULT_CACHE_TTL,
            max_cache_size: DEFAULT_MAX_CACHE_SIZE,
            offline: false,
            timeout: DEFAULT_TIMEOUT,
            retries: DEFAULT_RETRIES,
            circuit_breaker_threshold: DEFAULT_CIRCUIT_BREAKER_THRESHOLD,
            circuit_breaker_reset_timeout: DEFAULT_CIRCUIT_BREAKER_RESET_TIMEOUT,
            bootstrap: HashMap::new(),
            enable_request_signing: true,
            enable_cache_encryption: false,
            bootstrap_config: None,
            bootstrap_verification: BootstrapVerificationConfig::default(),
            evaluation_jitter: EvaluationJitterConfig::default(),
            error_sanitization: ErrorSanitizationConfig::default(),
            streaming: StreamingConfig::default(),
            events: EventQueueConfig::default(),
            on_ready: None,
            on_error: None,
            on_update: None,
            on_usage_update: None,
            on_subscription_error: None,
            on_connection_limit: None,
        }
    }

    pub fn builder(api_key: impl Into<String>) -> SwitchyardOptionsBuilder {
        SwitchyardOptionsBuilder {
            options: Self::new(api_key),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.api_key.is_empty() {
            return Err(SwitchyardError::config(
                ErrorCode::ConfigMissingRequired,
                "API key is required",
            ));
        }
        if !is_valid_key_format(&self.api_key) {
            return Err(SwitchyardError::config(
                ErrorCode::ConfigInvalidApiKey,
                "invalid API key: expected an sdk_, srv_, or cli_ prefix and at least 10 characters",
            ));
        }
        if let Some(ref secondary) = self.secondary_api_key {
            if !is_valid_key_format(secondary) {
                return Err(SwitchyardError::config(
                    ErrorCode::ConfigInvalidApiKey,
                    "invalid secondary API key format",
                ));
            }
        }
        if self.polling_interval < MIN_POLLING_INTERVAL {
            return Err(SwitchyardError::config(
                ErrorCode::ConfigInvalidInterval,
                "polling interval must be at least 1 second",
            ));
        }
        if self.cache_ttl.is_zero() {
            return Err(SwitchyardError::config(
                ErrorCode::ConfigInvalidCacheTtl,
                "cache TTL must be positive",
            ));
        }
        Ok(())
    }
}

/// Fluent construction for [`SwitchyardOptions`].
pub struct SwitchyardOptionsBuilder {
    options: SwitchyardOptions,
}

impl SwitchyardOptionsBuilder {
    pub fn secondary_api_key(mut self, key: impl Into<String>) -> Self {
        self.options.secondary_api_key = Some(key.into());
        self
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.options.base_url = url.into();
        self
    }

    pub fn polling_interval(mut self, interval: Duration) -> Self {
        self.options.polling_interval = interval;
        self
    }

    pub fn enable_polling(mut self, enabled: bool) -> Self {
        self.options.enable_polling = enabled;
        self
    }

    pub fn cache_enabled(mut self, enabled: bool) -> Self {
        self.options.cache_enabled = enabled;
        self
    }

    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.options.cache_ttl = ttl;
        self
    }

    pub fn max_cache_size(mut self, size: usize) -> Self {
        self.options.max_cache_size = size;
        self
    }

    pub fn offline(mut self, offline: bool) -> Self {
        self.options.offline = offline;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.options.timeout = timeout;
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.options.retries = retries;
        self
    }

    pub fn circuit_breaker_threshold(mut self, threshold: u32) -> Self {
        self.options.circuit_breaker_threshold = threshold;
        self
    }

    pub fn circuit_breaker_reset_timeout(mut self, timeout: Duration) -> Self {
        self.options.circuit_breaker_reset_timeout = timeout;
        self
    }

    pub fn bootstrap(mut self, data: HashMap<String, serde_json::Value>) -> Self {
        self.options.bootstrap = data;
        self
    }

    pub fn enable_request_signing(mut self, enabled: bool) -> Self {
        self.options.enable_request_signing = enabled;
        self
    }

    pub fn enable_cache_encryption(mut self, enabled: bool) -> Self {
        self.options.enable_cache_encryption = enabled;
        self
    }

    /// Installs a signed bootstrap. Its flags also become the bootstrap map.
    pub fn bootstrap_config(mut self, config: BootstrapConfig) -> Self {
        self.options.bootstrap = config.flags.clone();
        self.options.bootstrap_config = Some(config);
        self
    }

    pub fn bootstrap_verification(mut self, config: BootstrapVerificationConfig) -> Self {
        self.options.bootstrap_verification = config;
        self
    }

    pub fn evaluation_jitter(mut self, config: EvaluationJitterConfig) -> Self {
        self.options.evaluation_jitter = config;
        self
    }

    pub fn error_sanitization(mut self, config: ErrorSanitizationConfig) -> Self {
        self.options.error_sanitization = config;
        self
    }

    pub fn streaming(mut self, config: StreamingConfig) -> Self {
        self.options.streaming = config;
        self
    }

    pub fn events(mut self, config: EventQueueConfig) -> Self {
        self.options.events = config;
        self
    }

    pub fn on_ready(mut self, callback: ReadyCallback) -> Self {
        self.options.on_ready = Some(callback);
        self
    }

    pub fn on_error(mut self, callback: ErrorCallback) -> Self {
        self.options.on_error = Some(callback);
        self
    }

    pub fn on_update(mut self, callback: UpdateCallback) -> Self {
        self.options.on_update = Some(callback);
        self
    }

    pub fn on_usage_update(mut self, callback: UsageUpdateCallback) -> Self {
        self.options.on_usage_update = Some(callback);
        self
    }

    pub fn on_subscription_error(mut self, callback: SubscriptionErrorCallback) -> Self {
        self.options.on_subscription_error = Some(callback);
        self
    }

    pub fn on_connection_limit(mut self, callback: ConnectionLimitCallback) -> Self {
        self.options.on_connection_limit = Some(callback);
        self
    }

    pub fn build(self) -> SwitchyardOptions {
        self.options
    }
}
