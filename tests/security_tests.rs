//! Request signing, canonical JSON, bootstrap verification, credential
//! failover, and cache encryption.

use std::collections::HashMap;
use std::time::Duration;

use serde_json::json;
use switchyard::security::{
    canonicalize, canonicalize_map, create_request_signature, sign, sign_bootstrap,
    verify_bootstrap, verify_request_signature, ApiKeyManager, BootstrapConfig,
    BootstrapVerificationConfig, VerificationFailurePolicy,
};
use switchyard::{CacheSealer, ErrorCode, FlagState, FlagValue};

const KEY: &str = "sdk_key_12345678";

// === Canonical JSON ===

#[test]
fn canonicalization_is_permutation_invariant() {
    let a: serde_json::Value =
        serde_json::from_str(r#"{"b": 2, "a": 1, "nested": {"y": [1, {"q": 1, "p": 2}], "x": 0}}"#)
            .unwrap();
    let b: serde_json::Value =
        serde_json::from_str(r#"{"nested": {"x": 0, "y": [1, {"p": 2, "q": 1}]}, "a": 1, "b": 2}"#)
            .unwrap();

    assert_eq!(canonicalize(&a), canonicalize(&b));
}

#[test]
fn canonicalization_sorts_keys_and_preserves_arrays() {
    let value = json!({"b": 2, "a": [3, 1, 2]});
    assert_eq!(canonicalize(&value), r#"{"a":[3,1,2],"b":2}"#);
}

#[test]
fn expected_canonical_form_for_simple_body() {
    let mut body = HashMap::new();
    body.insert("b".to_string(), json!(2));
    body.insert("a".to_string(), json!(1));
    assert_eq!(canonicalize_map(&body), r#"{"a":1,"b":2}"#);
}

// === Request signing ===

#[test]
fn signature_is_deterministic_hmac_hex() {
    let message = format!("{}.{}", 1_700_000_000_000u64, r#"{"a":1,"b":2}"#);
    let first = sign(&message, KEY).unwrap();
    let second = sign(&message, KEY).unwrap();

    assert_eq!(first, second);
    assert_eq!(first.len(), 64);
    assert!(first
        .chars()
        .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
}

#[test]
fn signed_canonical_body_round_trips() {
    let mut body = HashMap::new();
    body.insert("b".to_string(), json!(2));
    body.insert("a".to_string(), json!(1));
    let canonical = canonicalize_map(&body);

    let sig = create_request_signature(&canonical, KEY).unwrap();
    assert_eq!(sig.key_id, "sdk_key_");

    assert!(
        verify_request_signature(&canonical, &sig.signature, sig.timestamp, KEY, 300_000).unwrap()
    );
}

#[test]
fn any_tampering_fails_verification() {
    let body = r#"{"a":1,"b":2}"#;
    let sig = create_request_signature(body, KEY).unwrap();

    // Body flipped.
    assert!(
        !verify_request_signature(r#"{"a":1,"b":3}"#, &sig.signature, sig.timestamp, KEY, 300_000)
            .unwrap()
    );

    // Signature flipped.
    let mut tampered = sig.signature.clone().into_bytes();
    tampered[10] = if tampered[10] == b'a' { b'b' } else { b'a' };
    let tampered = String::from_utf8(tampered).unwrap();
    assert!(!verify_request_signature(body, &tampered, sig.timestamp, KEY, 300_000).unwrap());

    // Timestamp moved.
    assert!(
        !verify_request_signature(body, &sig.signature, sig.timestamp + 1, KEY, 300_000).unwrap()
    );
}

#[test]
fn signature_age_window() {
    let body = r#"{"a":1}"#;
    let now = chrono::Utc::now().timestamp_millis();

    // Within the window.
    let timestamp = now - 100_000;
    let sig = sign(&format!("{timestamp}.{body}"), KEY).unwrap();
    assert!(verify_request_signature(body, &sig, timestamp, KEY, 300_000).unwrap());

    // Older than max age.
    let timestamp = now - 300_001 - 1_000;
    let sig = sign(&format!("{timestamp}.{body}"), KEY).unwrap();
    assert!(!verify_request_signature(body, &sig, timestamp, KEY, 300_000).unwrap());

    // Too far in the future.
    let timestamp = now + 400_000;
    let sig = sign(&format!("{timestamp}.{body}"), KEY).unwrap();
    assert!(!verify_request_signature(body, &sig, timestamp, KEY, 300_000).unwrap());
}

// === Bootstrap verification ===

fn bootstrap_flags() -> HashMap<String, serde_json::Value> {
    let mut flags = HashMap::new();
    flags.insert("dark-mode".to_string(), json!(true));
    flags.insert("cfg".to_string(), json!({"n": 1}));
    flags
}

#[test]
fn signed_bootstrap_verifies() {
    let flags = bootstrap_flags();
    let timestamp = chrono::Utc::now().timestamp_millis();
    let signature = sign_bootstrap(&flags, KEY, timestamp).unwrap();
    let bootstrap = BootstrapConfig::signed(flags, signature, timestamp);

    assert!(verify_bootstrap(&bootstrap, KEY, &BootstrapVerificationConfig::default()).unwrap());
}

#[test]
fn unsigned_bootstrap_is_legacy_pass() {
    let bootstrap = BootstrapConfig::unsigned(bootstrap_flags());
    assert!(verify_bootstrap(&bootstrap, KEY, &BootstrapVerificationConfig::default()).unwrap());
}

#[test]
fn failure_policies() {
    let flags = bootstrap_flags();
    let timestamp = chrono::Utc::now().timestamp_millis();
    let bootstrap = BootstrapConfig::signed(flags, "bogus", timestamp);

    // error: the concrete fault propagates.
    let config = BootstrapVerificationConfig {
        on_failure: VerificationFailurePolicy::Error,
        ..Default::default()
    };
    let err = verify_bootstrap(&bootstrap, KEY, &config).unwrap_err();
    assert_eq!(err.code, ErrorCode::SecuritySignatureInvalid);

    // warn: false, no error.
    let config = BootstrapVerificationConfig {
        on_failure: VerificationFailurePolicy::Warn,
        ..Default::default()
    };
    assert!(!verify_bootstrap(&bootstrap, KEY, &config).unwrap());

    // ignore: false, silently.
    let config = BootstrapVerificationConfig {
        on_failure: VerificationFailurePolicy::Ignore,
        ..Default::default()
    };
    assert!(!verify_bootstrap(&bootstrap, KEY, &config).unwrap());
}

#[test]
fn expired_bootstrap_reports_expiry() {
    let flags = bootstrap_flags();
    let timestamp = chrono::Utc::now().timestamp_millis() - 60_000;
    let signature = sign_bootstrap(&flags, KEY, timestamp).unwrap();
    let bootstrap = BootstrapConfig::signed(flags, signature, timestamp);

    let config = BootstrapVerificationConfig {
        max_age: Some(Duration::from_secs(30)),
        on_failure: VerificationFailurePolicy::Error,
        ..Default::default()
    };
    let err = verify_bootstrap(&bootstrap, KEY, &config).unwrap_err();
    assert_eq!(err.code, ErrorCode::SecurityBootstrapExpired);
}

// === Credential failover ===

#[test]
fn credential_failover_sequence() {
    let keys = ApiKeyManager::new("sdk_aaaaaaaa", Some("sdk_bbbbbbbb".to_string()));

    assert_eq!(keys.current(), "sdk_aaaaaaaa");

    // First rejection switches to the secondary.
    assert!(keys.on_auth_rejection());
    assert_eq!(keys.current(), "sdk_bbbbbbbb");
    assert!(keys.is_using_secondary());

    // A rejection of the secondary cannot switch further; the caller
    // surfaces the auth failure.
    assert!(!keys.on_auth_rejection());

    keys.reset_to_primary();
    assert_eq!(keys.current(), "sdk_aaaaaaaa");
}

// === Sealed cache snapshots ===

#[test]
fn sealed_snapshot_round_trips_and_hides_content() {
    let sealer = CacheSealer::new(KEY).unwrap();
    let flags = vec![
        FlagState::new("dark-mode", FlagValue::Bool(true)),
        FlagState::new("limit", FlagValue::Number(42.0)),
    ];

    let envelope = sealer.seal(&flags).unwrap();
    assert!(!envelope.contains("dark-mode"));

    let restored = sealer.open(&envelope).unwrap();
    assert_eq!(restored.len(), 2);
    assert_eq!(restored[0].key, "dark-mode");
    assert_eq!(restored[0].value.as_bool(), Some(true));
    assert_eq!(restored[1].value.as_number(), Some(42.0));
}

#[test]
fn sealed_snapshot_rejects_wrong_key_and_tampering() {
    let sealer = CacheSealer::new(KEY).unwrap();
    let other = CacheSealer::new("sdk_other_key_99").unwrap();
    let flags = vec![FlagState::new("f", FlagValue::Bool(true))];

    let envelope = sealer.seal(&flags).unwrap();
    assert_eq!(
        other.open(&envelope).unwrap_err().code,
        ErrorCode::CacheDecryptionError
    );

    // Any corruption of the envelope breaks authentication.
    let mut chars: Vec<char> = envelope.chars().collect();
    let mid = chars.len() / 2;
    chars[mid] = if chars[mid] == 'A' { 'B' } else { 'A' };
    let tampered: String = chars.into_iter().collect();
    assert!(sealer.open(&tampered).is_err());
}
