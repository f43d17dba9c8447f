//! Request signing with HMAC-SHA256.

use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::{ErrorCode, Result, SwitchyardError};

type HmacSha256 = Hmac<Sha256>;

/// Maximum accepted signature age, and the tolerated future clock skew.
pub const DEFAULT_SIGNATURE_MAX_AGE_MS: i64 = 300_000;

const CLOCK_SKEW_TOLERANCE_MS: i64 = 300_000;

/// Signature headers attached to signed requests.
#[derive(Debug, Clone)]
pub struct RequestSignature {
    /// Lowercase hex HMAC-SHA256 over `timestamp.body`.
    pub signature: String,
    /// Unix timestamp in milliseconds at signing time.
    pub timestamp: i64,
    /// First 8 characters of the signing key; identifies which key signed
    /// without revealing it.
    pub key_id: String,
}

impl RequestSignature {
    pub fn timestamp_header(&self) -> String {
        self.timestamp.to_string()
    }
}

/// HMAC-SHA256 of `message` under `key`, lowercase hex.
pub fn sign(message: &str, key: &str) -> Result<String> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key.as_bytes()).map_err(|e| {
        SwitchyardError::security(
            ErrorCode::SecuritySignatureInvalid,
            format!("failed to initialize HMAC: {e}"),
        )
    })?;
    mac.update(message.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Non-sensitive key identifier: the first 8 characters of the key, or the
/// whole key if shorter.
pub fn key_id(api_key: &str) -> String {
    api_key.chars().take(8).collect()
}

/// Builds the signature headers for a request body: the message is
/// `millis_now.body`.
pub fn create_request_signature(body: &str, api_key: &str) -> Result<RequestSignature> {
    let timestamp = Utc::now().timestamp_millis();
    let message = format!("{timestamp}.{body}");
    let signature = sign(&message, api_key)?;

    Ok(RequestSignature {
        signature,
        timestamp,
        key_id: key_id(api_key),
    })
}

/// Verifies a signature produced by [`create_request_signature`].
///
/// Rejects signatures older than `max_age_ms` and timestamps more than five
/// minutes in the future. Never returns `true` for a mismatched signature.
pub fn verify_request_signature(
    body: &str,
    signature: &str,
    timestamp: i64,
    api_key: &str,
    max_age_ms: i64,
) -> Result<bool> {
    let age = Utc::now().timestamp_millis() - timestamp;

    if age > max_age_ms {
        return Ok(false);
    }
    if age < -CLOCK_SKEW_TOLERANCE_MS {
        return Ok(false);
    }

    let message = format!("{timestamp}.{body}");
    let expected = sign(&message, api_key)?;

    Ok(constant_time_eq(&expected, signature))
}

/// Timing-safe string comparison.
pub(crate) fn constant_time_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "sdk_key_12345678";

    #[test]
    fn sign_is_deterministic_lowercase_hex() {
        let a = sign("1700000000000.{\"a\":1,\"b\":2}", KEY).unwrap();
        let b = sign("1700000000000.{\"a\":1,\"b\":2}", KEY).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn different_keys_differ() {
        let a = sign("payload", "sdk_key_aaaaaaaa").unwrap();
        let b = sign("payload", "sdk_key_bbbbbbbb").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn key_id_is_first_eight_chars() {
        assert_eq!(key_id("sdk_key_12345678"), "sdk_key_");
        assert_eq!(key_id("short"), "short");
    }

    #[test]
    fn round_trip_verifies() {
        let body = r#"{"b":2,"a":1}"#;
        let sig = create_request_signature(body, KEY).unwrap();
        assert!(
            verify_request_signature(body, &sig.signature, sig.timestamp, KEY, 300_000).unwrap()
        );
    }

    #[test]
    fn tampered_body_fails() {
        let body = r#"{"a":1}"#;
        let sig = create_request_signature(body, KEY).unwrap();
        assert!(!verify_request_signature(
            r#"{"a":2}"#,
            &sig.signature,
            sig.timestamp,
            KEY,
            300_000
        )
        .unwrap());
    }

    #[test]
    fn tampered_signature_fails() {
        let body = r#"{"a":1}"#;
        let sig = create_request_signature(body, KEY).unwrap();
        let mut bytes = sig.signature.into_bytes();
        bytes[0] = if bytes[0] == b'0' { b'1' } else { b'0' };
        let flipped = String::from_utf8(bytes).unwrap();
        assert!(!verify_request_signature(body, &flipped, sig.timestamp, KEY, 300_000).unwrap());
    }

    #[test]
    fn wrong_key_fails() {
        let body = r#"{"a":1}"#;
        let sig = create_request_signature(body, KEY).unwrap();
        assert!(!verify_request_signature(
            body,
            &sig.signature,
            sig.timestamp,
            "sdk_key_other000",
            300_000
        )
        .unwrap());
    }

    #[test]
    fn expired_timestamp_fails() {
        let body = r#"{"a":1}"#;
        let timestamp = Utc::now().timestamp_millis() - 301_000;
        let sig = sign(&format!("{timestamp}.{body}"), KEY).unwrap();
        assert!(!verify_request_signature(body, &sig, timestamp, KEY, 300_000).unwrap());
    }

    #[test]
    fn future_timestamp_within_skew_passes() {
        let body = r#"{"a":1}"#;
        let timestamp = Utc::now().timestamp_millis() + 60_000;
        let sig = sign(&format!("{timestamp}.{body}"), KEY).unwrap();
        assert!(verify_request_signature(body, &sig, timestamp, KEY, 300_000).unwrap());
    }

    #[test]
    fn future_timestamp_beyond_skew_fails() {
        let body = r#"{"a":1}"#;
        let timestamp = Utc::now().timestamp_millis() + 301_000;
        let sig = sign(&format!("{timestamp}.{body}"), KEY).unwrap();
        assert!(!verify_request_signature(body, &sig, timestamp, KEY, 300_000).unwrap());
    }

    #[test]
    fn constant_time_eq_handles_lengths() {
        assert!(constant_time_eq("abc", "abc"));
        assert!(!constant_time_eq("abc", "abd"));
        assert!(!constant_time_eq("abc", "abcd"));
    }
}
