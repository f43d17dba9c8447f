use thiserror::Error;

pub mod sanitizer;

pub use sanitizer::{sanitize_message, ErrorSanitizationConfig, SanitizedMessage};

/// Error taxonomy spanning the SDK. Each kind carries a recoverability
/// classification that drives retry and circuit-breaker behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    // Initialization
    InitFailed,
    InitTimeout,

    // Authentication
    AuthInvalidKey,
    AuthExpiredKey,
    AuthMissingKey,
    AuthUnauthorized,
    AuthForbidden,

    // Network / HTTP
    NetworkError,
    NetworkTimeout,
    NetworkRetryLimit,
    HttpRateLimited,
    HttpServerError,
    HttpInvalidResponse,
    CircuitOpen,

    // Evaluation
    EvalFlagNotFound,
    EvalTypeMismatch,
    EvalInvalidKey,
    EvalStaleValue,
    EvalCacheMiss,

    // Cache
    CacheExpired,
    CacheEncryptionError,
    CacheDecryptionError,

    // Events
    EventQueueFull,
    EventSendFailed,
    EventFlushFailed,

    // Configuration
    ConfigMissingRequired,
    ConfigInvalidApiKey,
    ConfigInvalidInterval,
    ConfigInvalidCacheTtl,

    // Security
    SecuritySignatureInvalid,
    SecurityBootstrapInvalid,
    SecurityBootstrapExpired,
    SecurityKeyRotationFailed,

    // Streaming
    StreamTokenInvalid,
    StreamTokenExpired,
    StreamSubscriptionSuspended,
    StreamConnectionLimit,
    StreamUnavailable,

    // Everything else
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InitFailed => "INIT_FAILED",
            ErrorCode::InitTimeout => "INIT_TIMEOUT",
            ErrorCode::AuthInvalidKey => "AUTH_INVALID_KEY",
            ErrorCode::AuthExpiredKey => "AUTH_EXPIRED_KEY",
            ErrorCode::AuthMissingKey => "AUTH_MISSING_KEY",
            ErrorCode::AuthUnauthorized => "AUTH_UNAUTHORIZED",
            ErrorCode::AuthForbidden => "AUTH_FORBIDDEN",
            ErrorCode::NetworkError => "NETWORK_ERROR",
            ErrorCode::NetworkTimeout => "NETWORK_TIMEOUT",
            ErrorCode::NetworkRetryLimit => "NETWORK_RETRY_LIMIT",
            ErrorCode::HttpRateLimited => "HTTP_RATE_LIMITED",
            ErrorCode::HttpServerError => "HTTP_SERVER_ERROR",
            ErrorCode::HttpInvalidResponse => "HTTP_INVALID_RESPONSE",
            ErrorCode::CircuitOpen => "CIRCUIT_OPEN",
            ErrorCode::EvalFlagNotFound => "EVAL_FLAG_NOT_FOUND",
            ErrorCode::EvalTypeMismatch => "EVAL_TYPE_MISMATCH",
            ErrorCode::EvalInvalidKey => "EVAL_INVALID_KEY",
            ErrorCode::EvalStaleValue => "EVAL_STALE_VALUE",
            ErrorCode::EvalCacheMiss => "EVAL_CACHE_MISS",
            ErrorCode::CacheExpired => "CACHE_EXPIRED",
            ErrorCode::CacheEncryptionError => "CACHE_ENCRYPTION_ERROR",
            ErrorCode::CacheDecryptionError => "CACHE_DECRYPTION_ERROR",
            ErrorCode::EventQueueFull => "EVENT_QUEUE_FULL",
            ErrorCode::EventSendFailed => "EVENT_SEND_FAILED",
            ErrorCode::EventFlushFailed => "EVENT_FLUSH_FAILED",
            ErrorCode::ConfigMissingRequired => "CONFIG_MISSING_REQUIRED",
            ErrorCode::ConfigInvalidApiKey => "CONFIG_INVALID_API_KEY",
            ErrorCode::ConfigInvalidInterval => "CONFIG_INVALID_INTERVAL",
            ErrorCode::ConfigInvalidCacheTtl => "CONFIG_INVALID_CACHE_TTL",
            ErrorCode::SecuritySignatureInvalid => "SECURITY_SIGNATURE_INVALID",
            ErrorCode::SecurityBootstrapInvalid => "SECURITY_BOOTSTRAP_INVALID",
            ErrorCode::SecurityBootstrapExpired => "SECURITY_BOOTSTRAP_EXPIRED",
            ErrorCode::SecurityKeyRotationFailed => "SECURITY_KEY_ROTATION_FAILED",
            ErrorCode::StreamTokenInvalid => "STREAM_TOKEN_INVALID",
            ErrorCode::StreamTokenExpired => "STREAM_TOKEN_EXPIRED",
            ErrorCode::StreamSubscriptionSuspended => "STREAM_SUBSCRIPTION_SUSPENDED",
            ErrorCode::StreamConnectionLimit => "STREAM_CONNECTION_LIMIT",
            ErrorCode::StreamUnavailable => "STREAM_UNAVAILABLE",
            ErrorCode::Internal => "INTERNAL",
        }
    }

    /// Whether the recommended response to this kind is retry with backoff.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ErrorCode::NetworkError
                | ErrorCode::NetworkTimeout
                | ErrorCode::NetworkRetryLimit
                | ErrorCode::HttpRateLimited
                | ErrorCode::HttpServerError
                | ErrorCode::CircuitOpen
                | ErrorCode::CacheExpired
                | ErrorCode::EvalStaleValue
                | ErrorCode::EvalCacheMiss
                | ErrorCode::EventSendFailed
                | ErrorCode::StreamTokenInvalid
                | ErrorCode::StreamTokenExpired
                | ErrorCode::StreamConnectionLimit
                | ErrorCode::StreamUnavailable
        )
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The one error type every fallible SDK operation returns.
#[derive(Error, Debug)]
#[error("[{code}] {message}")]
pub struct SwitchyardError {
    pub code: ErrorCode,
    pub message: String,
    /// The unsanitized message, retained only when preservation is enabled.
    original_message: Option<String>,
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl SwitchyardError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            original_message: None,
            source: None,
        }
    }

    pub fn with_source(
        code: ErrorCode,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            code,
            message: message.into(),
            original_message: None,
            source: Some(Box::new(source)),
        }
    }

    pub fn config(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::new(code, message)
    }

    pub fn network(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::new(code, message)
    }

    pub fn auth(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::new(code, message)
    }

    pub fn security(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::new(code, message)
    }

    pub fn is_recoverable(&self) -> bool {
        self.code.is_recoverable()
    }

    /// The unsanitized message, if preservation was enabled when this error
    /// was sanitized.
    pub fn original_message(&self) -> Option<&str> {
        self.original_message.as_deref()
    }

    /// Redacts sensitive material from the user-visible message in place.
    pub fn sanitize(&mut self, config: &ErrorSanitizationConfig) {
        if !config.enabled {
            return;
        }
        if config.preserve_original && self.original_message.is_none() {
            self.original_message = Some(self.message.clone());
        }
        self.message = sanitize_message(&self.message);
    }
}

pub type Result<T> = std::result::Result<T, SwitchyardError>;
