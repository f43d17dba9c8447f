//! End-to-end evaluation behavior against an offline client.

use std::collections::HashMap;
use std::time::Duration;

use serde_json::json;
use switchyard::{
    EvaluationReason, FlagState, FlagType, FlagValue, SwitchyardClient, SwitchyardOptions,
};

fn bootstrap() -> HashMap<String, serde_json::Value> {
    let mut map = HashMap::new();
    map.insert("dark-mode".to_string(), json!(true));
    map.insert("limit".to_string(), json!(42));
    map.insert("cfg".to_string(), json!({"n": 1}));
    map
}

async fn offline_client() -> std::sync::Arc<SwitchyardClient> {
    let options = SwitchyardOptions::builder("sdk_test_key_1")
        .offline(true)
        .bootstrap(bootstrap())
        .build();
    let client = SwitchyardClient::new(options).unwrap();
    client.initialize().await.unwrap();
    assert!(client.wait_for_ready(Duration::from_secs(1)).await);
    client
}

#[tokio::test]
async fn offline_bootstrap_evaluation() {
    let client = offline_client().await;

    let result = client.evaluate("dark-mode", false, None, None);
    assert_eq!(result.value.as_bool(), Some(true));
    assert_eq!(result.reason, EvaluationReason::Bootstrap);

    let result = client.evaluate("missing", "x", None, None);
    assert_eq!(result.value.as_str(), Some("x"));
    assert_eq!(result.reason, EvaluationReason::FlagNotFound);

    let result = client.evaluate("limit", 0, None, None);
    assert_eq!(result.value.as_int(), Some(42));
    assert_eq!(result.reason, EvaluationReason::Bootstrap);

    client.close().await;
}

#[tokio::test]
async fn typed_getters_respect_defaults() {
    let client = offline_client().await;

    assert!(client.get_boolean_value("dark-mode", false, None));
    assert_eq!(client.get_int_value("limit", 0, None), 42);
    assert_eq!(client.get_number_value("limit", 0.0, None), 42.0);
    assert_eq!(client.get_string_value("missing", "fallback", None), "fallback");
    assert!(client.get_boolean_value("missing", true, None));

    let cfg = client.get_json_value("cfg", None, None).unwrap();
    assert_eq!(cfg.get("n"), Some(&json!(1)));

    client.close().await;
}

#[tokio::test]
async fn type_mismatch_yields_default_not_coercion() {
    let client = offline_client().await;

    let mut flag = FlagState::new("count", FlagValue::Number(7.0));
    flag.flag_type = Some(FlagType::Number);
    client.store().set("count", flag);

    // Asking for a boolean where a number lives returns the default.
    let result = client.evaluate("count", true, Some(FlagType::Boolean), None);
    assert_eq!(result.reason, EvaluationReason::TypeMismatch);
    assert_eq!(result.value.as_bool(), Some(true));

    // The right type goes through.
    assert_eq!(client.get_int_value("count", 0, None), 7);

    client.close().await;
}

#[tokio::test]
async fn expired_flags_serve_stale_before_default() {
    let options = SwitchyardOptions::builder("sdk_test_key_1")
        .offline(true)
        .cache_ttl(Duration::from_millis(20))
        .build();
    let client = SwitchyardClient::new(options).unwrap();
    client.initialize().await.unwrap();

    client.store().set_with_ttl(
        "banner",
        FlagState::new("banner", FlagValue::String("hello".into())),
        Duration::from_millis(20),
    );

    tokio::time::sleep(Duration::from_millis(60)).await;

    let result = client.evaluate("banner", "default", None, None);
    assert_eq!(result.reason, EvaluationReason::StaleCache);
    assert_eq!(result.value.as_str(), Some("hello"));

    client.close().await;
}

#[tokio::test]
async fn empty_key_is_an_error_result() {
    let client = offline_client().await;

    let result = client.evaluate("", "d", None, None);
    assert_eq!(result.reason, EvaluationReason::Error);
    assert_eq!(result.value.as_str(), Some("d"));
    assert!(!result.enabled);

    client.close().await;
}

#[tokio::test]
async fn flag_enumeration_spans_cache_and_bootstrap() {
    let client = offline_client().await;

    client
        .store()
        .set("served", FlagState::new("served", FlagValue::Bool(true)));

    assert!(client.has_flag("served"));
    assert!(client.has_flag("dark-mode"));
    assert!(!client.has_flag("nope"));

    let keys = client.all_flag_keys();
    assert!(keys.contains(&"served".to_string()));
    assert!(keys.contains(&"limit".to_string()));

    client.close().await;
}

#[tokio::test]
async fn evaluation_never_panics_on_odd_inputs() {
    let client = offline_client().await;

    // Null-valued flag.
    client
        .store()
        .set("nullish", FlagState::new("nullish", FlagValue::Null));
    let result = client.evaluate("nullish", "d", None, None);
    assert_eq!(result.reason, EvaluationReason::Cached);
    assert!(result.value.is_null());

    // Unicode keys.
    let result = client.evaluate("фичефлаг", false, None, None);
    assert_eq!(result.reason, EvaluationReason::FlagNotFound);

    client.close().await;
}
