//! HTTP transport: request construction, retries, circuit breaking, and
//! response telemetry extraction.

mod breaker;
mod client;
mod retry;

pub use breaker::{BreakerStats, CircuitBreaker, CircuitState};
pub use client::{
    extract_usage_metrics, HttpClient, HttpResponse, SubscriptionStatus, UsageMetrics,
    UsageUpdateCallback, DEFAULT_BASE_URL,
};
pub use retry::RetryConfig;
