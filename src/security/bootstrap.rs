//! Signed bootstrap data verification.

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;

use super::canonical::canonicalize_map;
use super::signing::{constant_time_eq, sign};
use crate::error::{ErrorCode, Result, SwitchyardError};

const CLOCK_SKEW_TOLERANCE_MS: i64 = 300_000;

/// Bootstrap seed data, optionally signed.
///
/// A signed bootstrap carries an HMAC-SHA256 over
/// `timestamp + "." + canonicalize(flags)`. An unsigned bootstrap is the
/// legacy format and skips verification.
#[derive(Debug, Clone)]
pub struct BootstrapConfig {
    pub flags: HashMap<String, serde_json::Value>,
    pub signature: Option<String>,
    pub timestamp: i64,
}

impl BootstrapConfig {
    pub fn unsigned(flags: HashMap<String, serde_json::Value>) -> Self {
        Self {
            flags,
            signature: None,
            timestamp: 0,
        }
    }

    pub fn signed(
        flags: HashMap<String, serde_json::Value>,
        signature: impl Into<String>,
        timestamp: i64,
    ) -> Self {
        Self {
            flags,
            signature: Some(signature.into()),
            timestamp,
        }
    }

    pub fn is_signed(&self) -> bool {
        self.signature.is_some()
    }
}

/// What to do when bootstrap verification fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VerificationFailurePolicy {
    /// Log a warning and continue without the verified status.
    #[default]
    Warn,
    /// Fail construction with the concrete fault.
    Error,
    /// Continue silently.
    Ignore,
}

/// Settings for bootstrap signature verification.
#[derive(Debug, Clone)]
pub struct BootstrapVerificationConfig {
    pub enabled: bool,
    /// Maximum accepted age of the signed payload. `None` skips the age check.
    pub max_age: Option<Duration>,
    pub on_failure: VerificationFailurePolicy,
}

impl Default for BootstrapVerificationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_age: Some(Duration::from_secs(24 * 60 * 60)),
            on_failure: VerificationFailurePolicy::Warn,
        }
    }
}

impl BootstrapVerificationConfig {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            max_age: None,
            on_failure: VerificationFailurePolicy::Ignore,
        }
    }
}

/// Signs bootstrap flags for later verification with [`verify_bootstrap`].
pub fn sign_bootstrap(
    flags: &HashMap<String, serde_json::Value>,
    api_key: &str,
    timestamp: i64,
) -> Result<String> {
    let canonical = canonicalize_map(flags);
    sign(&format!("{timestamp}.{canonical}"), api_key)
}

/// Verifies a bootstrap payload's signature and age.
///
/// Returns `Ok(true)` when the signature checks out, or when verification is
/// disabled or the payload is unsigned. On failure, the outcome follows
/// `config.on_failure`: `Error` propagates the concrete fault, `Warn` logs
/// and returns `Ok(false)`, `Ignore` returns `Ok(false)` silently.
pub fn verify_bootstrap(
    bootstrap: &BootstrapConfig,
    api_key: &str,
    config: &BootstrapVerificationConfig,
) -> Result<bool> {
    if !config.enabled || !bootstrap.is_signed() {
        return Ok(true);
    }

    match check(bootstrap, api_key, config) {
        Ok(()) => {
            tracing::debug!("bootstrap signature verified");
            Ok(true)
        }
        Err(err) => match config.on_failure {
            VerificationFailurePolicy::Error => Err(err),
            VerificationFailurePolicy::Warn => {
                tracing::warn!("bootstrap verification failed: {err}");
                Ok(false)
            }
            VerificationFailurePolicy::Ignore => Ok(false),
        },
    }
}

fn check(
    bootstrap: &BootstrapConfig,
    api_key: &str,
    config: &BootstrapVerificationConfig,
) -> Result<()> {
    if bootstrap.timestamp > 0 {
        if let Some(max_age) = config.max_age {
            let age = Utc::now().timestamp_millis() - bootstrap.timestamp;
            let max_age_ms = max_age.as_millis() as i64;

            if age > max_age_ms {
                return Err(SwitchyardError::security(
                    ErrorCode::SecurityBootstrapExpired,
                    format!("bootstrap data expired: age {age}ms exceeds max {max_age_ms}ms"),
                ));
            }
            if age < -CLOCK_SKEW_TOLERANCE_MS {
                return Err(SwitchyardError::security(
                    ErrorCode::SecurityBootstrapInvalid,
                    "bootstrap timestamp is in the future",
                ));
            }
        }
    }

    let canonical = canonicalize_map(&bootstrap.flags);
    let expected = sign(&format!("{}.{canonical}", bootstrap.timestamp), api_key)?;

    let signature = bootstrap.signature.as_deref().unwrap_or_default();
    if !constant_time_eq(&expected, signature) {
        return Err(SwitchyardError::security(
            ErrorCode::SecuritySignatureInvalid,
            "bootstrap signature mismatch",
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const KEY: &str = "sdk_test_key_1234";

    fn flags() -> HashMap<String, serde_json::Value> {
        let mut flags = HashMap::new();
        flags.insert("dark-mode".to_string(), json!(true));
        flags.insert("limit".to_string(), json!(42));
        flags.insert("cfg".to_string(), json!({"n": 1}));
        flags
    }

    fn signed_bootstrap(timestamp: i64) -> BootstrapConfig {
        let flags = flags();
        let signature = sign_bootstrap(&flags, KEY, timestamp).unwrap();
        BootstrapConfig::signed(flags, signature, timestamp)
    }

    #[test]
    fn valid_signature_verifies() {
        let bootstrap = signed_bootstrap(Utc::now().timestamp_millis());
        let verified =
            verify_bootstrap(&bootstrap, KEY, &BootstrapVerificationConfig::default()).unwrap();
        assert!(verified);
    }

    #[test]
    fn unsigned_bootstrap_skips_verification() {
        let bootstrap = BootstrapConfig::unsigned(flags());
        let verified =
            verify_bootstrap(&bootstrap, KEY, &BootstrapVerificationConfig::default()).unwrap();
        assert!(verified);
    }

    #[test]
    fn disabled_verification_passes_anything() {
        let mut bootstrap = signed_bootstrap(Utc::now().timestamp_millis());
        bootstrap.signature = Some("garbage".to_string());
        let verified =
            verify_bootstrap(&bootstrap, KEY, &BootstrapVerificationConfig::disabled()).unwrap();
        assert!(verified);
    }

    #[test]
    fn wrong_key_fails_with_error_policy() {
        let bootstrap = signed_bootstrap(Utc::now().timestamp_millis());
        let config = BootstrapVerificationConfig {
            on_failure: VerificationFailurePolicy::Error,
            ..Default::default()
        };
        let err = verify_bootstrap(&bootstrap, "sdk_other_key_99", &config).unwrap_err();
        assert_eq!(err.code, ErrorCode::SecuritySignatureInvalid);
    }

    #[test]
    fn expired_payload_fails_with_expired_kind() {
        let timestamp = Utc::now().timestamp_millis() - 10_000;
        let bootstrap = signed_bootstrap(timestamp);
        let config = BootstrapVerificationConfig {
            max_age: Some(Duration::from_secs(5)),
            on_failure: VerificationFailurePolicy::Error,
            ..Default::default()
        };
        let err = verify_bootstrap(&bootstrap, KEY, &config).unwrap_err();
        assert_eq!(err.code, ErrorCode::SecurityBootstrapExpired);
    }

    #[test]
    fn future_payload_beyond_skew_fails_with_invalid_kind() {
        let timestamp = Utc::now().timestamp_millis() + 400_000;
        let bootstrap = signed_bootstrap(timestamp);
        let config = BootstrapVerificationConfig {
            on_failure: VerificationFailurePolicy::Error,
            ..Default::default()
        };
        let err = verify_bootstrap(&bootstrap, KEY, &config).unwrap_err();
        assert_eq!(err.code, ErrorCode::SecurityBootstrapInvalid);
    }

    #[test]
    fn warn_policy_returns_false() {
        let mut bootstrap = signed_bootstrap(Utc::now().timestamp_millis());
        bootstrap.signature = Some("deadbeef".to_string());
        let verified =
            verify_bootstrap(&bootstrap, KEY, &BootstrapVerificationConfig::default()).unwrap();
        assert!(!verified);
    }

    #[test]
    fn ignore_policy_returns_false_silently() {
        let mut bootstrap = signed_bootstrap(Utc::now().timestamp_millis());
        bootstrap.signature = Some("deadbeef".to_string());
        let config = BootstrapVerificationConfig {
            on_failure: VerificationFailurePolicy::Ignore,
            ..Default::default()
        };
        assert!(!verify_bootstrap(&bootstrap, KEY, &config).unwrap());
    }

    #[test]
    fn signature_is_stable_under_key_permutation() {
        let mut a = HashMap::new();
        a.insert("b".to_string(), json!(2));
        a.insert("a".to_string(), json!(1));

        let mut b = HashMap::new();
        b.insert("a".to_string(), json!(1));
        b.insert("b".to_string(), json!(2));

        assert_eq!(
            sign_bootstrap(&a, KEY, 1_700_000_000_000).unwrap(),
            sign_bootstrap(&b, KEY, 1_700_000_000_000).unwrap()
        );
    }
}
