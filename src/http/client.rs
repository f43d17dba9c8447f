//! HTTP client for the Switchyard API.

use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use serde::{de::DeserializeOwned, Serialize};

use super::breaker::CircuitBreaker;
use super::retry::RetryConfig;
use crate::error::{ErrorCode, Result, SwitchyardError};
use crate::security::{create_request_signature, ApiKeyManager};
use crate::SDK_VERSION;

pub const DEFAULT_BASE_URL: &str = "https://api.switchyard.dev/api/v1";

/// Subscription standing reported by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionStatus {
    Active,
    Trial,
    PastDue,
    Suspended,
    Cancelled,
}

impl SubscriptionStatus {
    /// Parses a header value, case-insensitively. Unknown values are
    /// discarded rather than guessed at.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "active" => Some(SubscriptionStatus::Active),
            "trial" => Some(SubscriptionStatus::Trial),
            "past_due" => Some(SubscriptionStatus::PastDue),
            "suspended" => Some(SubscriptionStatus::Suspended),
            "cancelled" => Some(SubscriptionStatus::Cancelled),
            _ => None,
        }
    }
}

/// Usage telemetry carried in response headers.
///
/// The transport only forwards these to the consumer callback; it never acts
/// on them.
#[derive(Debug, Clone, Default)]
pub struct UsageMetrics {
    /// Percentage of the API call limit used this period (0-150+).
    pub api_usage_percent: Option<f64>,
    /// Percentage of the evaluation limit used (0-150+).
    pub evaluation_usage_percent: Option<f64>,
    /// Whether the account is approaching its rate limit.
    pub rate_limit_warning: bool,
    pub subscription_status: Option<SubscriptionStatus>,
}

pub type UsageUpdateCallback = Arc<dyn Fn(UsageMetrics) + Send + Sync>;

/// Reads the usage headers from a response. Returns `None` when no usage
/// header is present at all.
pub fn extract_usage_metrics(response: &reqwest::Response) -> Option<UsageMetrics> {
    let headers = response.headers();
    let header_str = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

    let api_usage = header_str("x-api-usage-percent").and_then(|s| s.parse::<f64>().ok());
    let eval_usage = header_str("x-evaluation-usage-percent").and_then(|s| s.parse::<f64>().ok());
    let rate_limit_warning = header_str("x-rate-limit-warning")
        .map(|s| s.eq_ignore_ascii_case("true"))
        .unwrap_or(false);
    let subscription_status = header_str("x-subscription-status").and_then(SubscriptionStatus::parse);

    if api_usage.is_none()
        && eval_usage.is_none()
        && !rate_limit_warning
        && subscription_status.is_none()
    {
        return None;
    }

    Some(UsageMetrics {
        api_usage_percent: api_usage,
        evaluation_usage_percent: eval_usage,
        rate_limit_warning,
        subscription_status,
    })
}

/// A completed HTTP exchange.
#[derive(Debug)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
    pub usage: Option<UsageMetrics>,
}

impl HttpResponse {
    /// Deserializes the response body.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_str(&self.body).map_err(|e| {
            SwitchyardError::with_source(
                ErrorCode::HttpInvalidResponse,
                format!("failed to parse response: {e}"),
                e,
            )
        })
    }
}

/// HTTP client with retries, circuit breaking, request signing, and
/// credential failover.
///
/// Every dispatch first asks the breaker for permission; 2xx responses
/// record success, everything else (including transport failures) records
/// failure. A 401 additionally asks the key manager to fail over to the
/// secondary credential, so the next request reads the new selection.
pub struct HttpClient {
    client: reqwest::Client,
    base_url: String,
    keys: Arc<ApiKeyManager>,
    breaker: Arc<CircuitBreaker>,
    retry: RetryConfig,
    enable_request_signing: bool,
    on_usage_update: Option<UsageUpdateCallback>,
}

impl HttpClient {
    pub fn new(
        base_url: impl Into<String>,
        keys: Arc<ApiKeyManager>,
        breaker: Arc<CircuitBreaker>,
        timeout: Duration,
        retry: RetryConfig,
        enable_request_signing: bool,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| {
                SwitchyardError::with_source(
                    ErrorCode::NetworkError,
                    "failed to create HTTP client",
                    e,
                )
            })?;

        let base_url = base_url.into();
        let base_url = base_url.strip_suffix('/').unwrap_or(&base_url).to_string();

        Ok(Self {
            client,
            base_url,
            keys,
            breaker,
            retry,
            enable_request_signing,
            on_usage_update: None,
        })
    }

    pub fn set_usage_callback(&mut self, callback: UsageUpdateCallback) {
        self.on_usage_update = Some(callback);
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn keys(&self) -> &Arc<ApiKeyManager> {
        &self.keys
    }

    pub async fn get(&self, path: &str) -> Result<HttpResponse> {
        self.execute_with_retry(|| self.do_get(path)).await
    }

    pub async fn post<B: Serialize>(&self, path: &str, body: &B) -> Result<HttpResponse> {
        let body_json = serde_json::to_string(body).map_err(|e| {
            SwitchyardError::with_source(
                ErrorCode::HttpInvalidResponse,
                "failed to serialize request body",
                e,
            )
        })?;
        self.execute_with_retry(|| self.do_post(path, &body_json))
            .await
    }

    async fn execute_with_retry<T, F, Fut>(&self, operation: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let max_retries = self.retry.max_retries.max(1);

        for attempt in 1..=max_retries {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    if !e.is_recoverable() || attempt >= max_retries {
                        return Err(e);
                    }
                    let delay = self.retry.backoff(attempt);
                    tracing::debug!(
                        "attempt {attempt}/{max_retries} failed ({e}), retrying in {delay:?}"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }

        Err(SwitchyardError::network(
            ErrorCode::NetworkRetryLimit,
            "retry limit exceeded",
        ))
    }

    async fn do_get(&self, path: &str) -> Result<HttpResponse> {
        if !self.breaker.allow() {
            return Err(SwitchyardError::network(
                ErrorCode::CircuitOpen,
                "circuit breaker is open",
            ));
        }

        let url = format!("{}{}", self.base_url, path);
        tracing::debug!("GET {url}");

        let response = self
            .request_headers(self.client.get(&url))
            .send()
            .await
            .map_err(|e| self.transport_failure(e))?;

        self.handle_response(response).await
    }

    async fn do_post(&self, path: &str, body_json: &str) -> Result<HttpResponse> {
        if !self.breaker.allow() {
            return Err(SwitchyardError::network(
                ErrorCode::CircuitOpen,
                "circuit breaker is open",
            ));
        }

        let url = format!("{}{}", self.base_url, path);
        tracing::debug!("POST {url}");

        let mut builder = self
            .request_headers(self.client.post(&url))
            .header("Content-Type", "application/json");

        if self.enable_request_signing && !body_json.is_empty() {
            let signature = create_request_signature(body_json, &self.keys.current())?;
            builder = builder
                .header("X-Signature", &signature.signature)
                .header("X-Timestamp", signature.timestamp_header())
                .header("X-Key-Id", &signature.key_id);
        }

        let response = builder
            .body(body_json.to_string())
            .send()
            .await
            .map_err(|e| self.transport_failure(e))?;

        self.handle_response(response).await
    }

    fn request_headers(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .header("X-API-Key", self.keys.current())
            .header("User-Agent", format!("Switchyard-Rust/{SDK_VERSION}"))
            .header("X-Switchyard-SDK-Version", SDK_VERSION)
            .header("X-Switchyard-SDK-Language", "rust")
    }

    async fn handle_response(&self, response: reqwest::Response) -> Result<HttpResponse> {
        let status = response.status();

        let usage = extract_usage_metrics(&response);
        if let Some(ref metrics) = usage {
            log_usage_warnings(metrics);
            if let Some(ref callback) = self.on_usage_update {
                callback(metrics.clone());
            }
        }

        let body = response
            .text()
            .await
            .map_err(|e| self.transport_failure(e))?;

        if status.is_success() {
            self.breaker.record_success();
            return Ok(HttpResponse {
                status: status.as_u16(),
                body,
                usage,
            });
        }

        self.breaker.record_failure();
        Err(self.status_to_error(status, &body))
    }

    fn status_to_error(&self, status: StatusCode, body: &str) -> SwitchyardError {
        match status {
            StatusCode::UNAUTHORIZED => {
                if self.keys.on_auth_rejection() {
                    tracing::info!("API key rejected, failover to secondary credential");
                }
                SwitchyardError::auth(ErrorCode::AuthUnauthorized, "unauthorized: API key rejected")
            }
            StatusCode::FORBIDDEN => SwitchyardError::auth(
                ErrorCode::AuthForbidden,
                "forbidden: API key does not have access",
            ),
            StatusCode::NOT_FOUND => {
                SwitchyardError::new(ErrorCode::EvalFlagNotFound, "resource not found")
            }
            StatusCode::TOO_MANY_REQUESTS => {
                SwitchyardError::network(ErrorCode::HttpRateLimited, "rate limited")
            }
            s if s.is_server_error() => SwitchyardError::network(
                ErrorCode::HttpServerError,
                format!("server error: {}", s.as_u16()),
            ),
            s => SwitchyardError::new(
                ErrorCode::HttpInvalidResponse,
                format!("HTTP error {}: {}", s.as_u16(), truncate(body, 200)),
            ),
        }
    }

    /// Records the failure against the breaker and wraps the transport error
    /// as a recoverable network kind.
    fn transport_failure(&self, error: reqwest::Error) -> SwitchyardError {
        self.breaker.record_failure();
        if error.is_timeout() {
            SwitchyardError::with_source(ErrorCode::NetworkTimeout, "request timed out", error)
        } else if error.is_connect() {
            SwitchyardError::with_source(ErrorCode::NetworkError, "connection failed", error)
        } else {
            SwitchyardError::with_source(ErrorCode::NetworkError, "request failed", error)
        }
    }
}

fn log_usage_warnings(metrics: &UsageMetrics) {
    if let Some(api_usage) = metrics.api_usage_percent {
        if api_usage >= 80.0 {
            tracing::warn!("API usage at {api_usage}%");
        }
    }
    if let Some(eval_usage) = metrics.evaluation_usage_percent {
        if eval_usage >= 80.0 {
            tracing::warn!("evaluation usage at {eval_usage}%");
        }
    }
    if metrics.subscription_status == Some(SubscriptionStatus::Suspended) {
        tracing::error!("subscription suspended, service degraded");
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_client(secondary: Option<&str>) -> HttpClient {
        let keys = Arc::new(ApiKeyManager::new(
            "sdk_aaaaaaaa",
            secondary.map(str::to_string),
        ));
        HttpClient::new(
            DEFAULT_BASE_URL,
            keys,
            Arc::new(CircuitBreaker::default()),
            Duration::from_secs(5),
            RetryConfig::default(),
            true,
        )
        .unwrap()
    }

    #[test]
    fn subscription_status_parsing() {
        assert_eq!(
            SubscriptionStatus::parse("active"),
            Some(SubscriptionStatus::Active)
        );
        assert_eq!(
            SubscriptionStatus::parse("PAST_DUE"),
            Some(SubscriptionStatus::PastDue)
        );
        assert_eq!(
            SubscriptionStatus::parse("Suspended"),
            Some(SubscriptionStatus::Suspended)
        );
        assert_eq!(SubscriptionStatus::parse("unknown"), None);
        assert_eq!(SubscriptionStatus::parse(""), None);
    }

    #[test]
    fn base_url_trailing_slash_is_stripped() {
        let keys = Arc::new(ApiKeyManager::new("sdk_aaaaaaaa", None));
        let client = HttpClient::new(
            "https://example.test/api/v1/",
            keys,
            Arc::new(CircuitBreaker::default()),
            Duration::from_secs(5),
            RetryConfig::default(),
            false,
        )
        .unwrap();
        assert_eq!(client.base_url, "https://example.test/api/v1");
    }

    #[test]
    fn status_mapping() {
        let client = test_client(None);

        let err = client.status_to_error(StatusCode::FORBIDDEN, "");
        assert_eq!(err.code, ErrorCode::AuthForbidden);
        assert!(!err.is_recoverable());

        let err = client.status_to_error(StatusCode::NOT_FOUND, "");
        assert_eq!(err.code, ErrorCode::EvalFlagNotFound);
        assert!(!err.is_recoverable());

        let err = client.status_to_error(StatusCode::TOO_MANY_REQUESTS, "");
        assert_eq!(err.code, ErrorCode::HttpRateLimited);
        assert!(err.is_recoverable());

        let err = client.status_to_error(StatusCode::BAD_GATEWAY, "");
        assert_eq!(err.code, ErrorCode::HttpServerError);
        assert!(err.is_recoverable());

        let err = client.status_to_error(StatusCode::IM_A_TEAPOT, "teapot");
        assert_eq!(err.code, ErrorCode::HttpInvalidResponse);
        assert!(!err.is_recoverable());
    }

    #[test]
    fn unauthorized_triggers_credential_failover() {
        let client = test_client(Some("sdk_bbbbbbbb"));
        assert_eq!(client.keys.current(), "sdk_aaaaaaaa");

        let err = client.status_to_error(StatusCode::UNAUTHORIZED, "");
        assert_eq!(err.code, ErrorCode::AuthUnauthorized);
        assert_eq!(client.keys.current(), "sdk_bbbbbbbb");

        // Rejection of the secondary has nowhere left to go.
        let err = client.status_to_error(StatusCode::UNAUTHORIZED, "");
        assert_eq!(err.code, ErrorCode::AuthUnauthorized);
        assert_eq!(client.keys.current(), "sdk_bbbbbbbb");
    }

    #[test]
    fn response_json_parses_body() {
        #[derive(Debug, serde::Deserialize)]
        struct Payload {
            n: u32,
        }

        let response = HttpResponse {
            status: 200,
            body: r#"{"n": 7}"#.to_string(),
            usage: None,
        };
        assert_eq!(response.json::<Payload>().unwrap().n, 7);

        let bad = HttpResponse {
            status: 200,
            body: "not json".to_string(),
            usage: None,
        };
        assert_eq!(
            bad.json::<Payload>().unwrap_err().code,
            ErrorCode::HttpInvalidResponse
        );
    }

    #[tokio::test]
    async fn open_breaker_short_circuits() {
        let keys = Arc::new(ApiKeyManager::new("sdk_aaaaaaaa", None));
        let breaker = Arc::new(CircuitBreaker::new(1, 1, Duration::from_secs(60), 1));
        breaker.record_failure();

        let client = HttpClient::new(
            "http://127.0.0.1:9",
            keys,
            breaker,
            Duration::from_millis(200),
            RetryConfig {
                max_retries: 1,
                ..Default::default()
            },
            false,
        )
        .unwrap();

        let err = client.do_get("/sdk/init").await.unwrap_err();
        assert_eq!(err.code, ErrorCode::CircuitOpen);
        assert!(err.is_recoverable());
    }
}
