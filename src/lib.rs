//! Switchyard Rust SDK
//!
//! Client-side feature flag delivery: flags are fetched from the Switchyard
//! service, cached locally with TTL and stale fallbacks, kept fresh by a
//! background poller and an SSE push stream, and evaluated synchronously on
//! the caller's thread. Analytics events are batched and delivered
//! best-effort.
//!
//! # Quick start
//!
//! ```no_run
//! use switchyard::{SwitchyardClient, SwitchyardOptions};
//!
//! #[tokio::main]
//! async fn main() -> switchyard::Result<()> {
//!     let options = SwitchyardOptions::builder("sdk_your_api_key").build();
//!     let client = SwitchyardClient::new(options)?;
//!
//!     client.initialize().await?;
//!     client.wait_for_ready_default().await;
//!
//!     client.identify("user-123", None);
//!     let dark_mode = client.get_boolean_value("dark-mode", false, None);
//!     let theme = client.get_string_value("theme", "light", None);
//!     println!("dark-mode: {dark_mode}, theme: {theme}");
//!
//!     client.close().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod context;
pub mod core;
pub mod error;
pub mod http;
pub mod security;
pub mod types;
pub mod version;

mod client;

/// The SDK version reported to the service.
pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

pub use client::SwitchyardClient;
pub use config::{
    ErrorCallback, EvaluationJitterConfig, ReadyCallback, SwitchyardOptions,
    SwitchyardOptionsBuilder, UpdateCallback,
};
pub use context::EvaluationContext;
pub use crate::core::{
    EventQueueConfig, FlagStore, FlagStoreStats, PollingConfig, StreamErrorCode, StreamingConfig,
    StreamingState,
};
pub use error::{ErrorCode, ErrorSanitizationConfig, Result, SwitchyardError};
pub use http::{
    BreakerStats, CircuitBreaker, CircuitState, RetryConfig, SubscriptionStatus, UsageMetrics,
};
pub use security::{
    ApiKeyManager, BootstrapConfig, BootstrapVerificationConfig, CacheSealer, RequestSignature,
    VerificationFailurePolicy,
};
pub use types::{EvaluationReason, EvaluationResult, FlagState, FlagType, FlagValue};
