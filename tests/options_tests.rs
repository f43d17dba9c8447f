//! Options validation and builder coverage.

use std::time::Duration;

use switchyard::{
    ErrorCode, EvaluationJitterConfig, StreamingConfig, SwitchyardClient, SwitchyardOptions,
};

#[test]
fn good_options_validate() {
    for key in ["sdk_0123456789", "srv_0123456789", "cli_0123456789"] {
        assert!(SwitchyardOptions::new(key).validate().is_ok(), "{key}");
    }
}

#[test]
fn key_rules_are_enforced() {
    let err = SwitchyardOptions::new("").validate().unwrap_err();
    assert_eq!(err.code, ErrorCode::ConfigMissingRequired);

    // Too short (under 10 characters total).
    let err = SwitchyardOptions::new("sdk_12").validate().unwrap_err();
    assert_eq!(err.code, ErrorCode::ConfigInvalidApiKey);

    // Wrong prefix.
    let err = SwitchyardOptions::new("key_0123456789").validate().unwrap_err();
    assert_eq!(err.code, ErrorCode::ConfigInvalidApiKey);
}

#[test]
fn interval_and_ttl_bounds() {
    let err = SwitchyardOptions::builder("sdk_0123456789")
        .polling_interval(Duration::from_millis(999))
        .build()
        .validate()
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::ConfigInvalidInterval);

    assert!(SwitchyardOptions::builder("sdk_0123456789")
        .polling_interval(Duration::from_secs(1))
        .build()
        .validate()
        .is_ok());

    let err = SwitchyardOptions::builder("sdk_0123456789")
        .cache_ttl(Duration::ZERO)
        .build()
        .validate()
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::ConfigInvalidCacheTtl);
}

#[test]
fn client_construction_rejects_invalid_options() {
    let options = SwitchyardOptions::new("bogus");
    assert!(SwitchyardClient::new(options).is_err());
}

#[test]
fn builder_carries_every_knob() {
    let options = SwitchyardOptions::builder("sdk_0123456789")
        .secondary_api_key("sdk_9876543210")
        .base_url("http://localhost:8200/api/v1")
        .polling_interval(Duration::from_secs(45))
        .enable_polling(false)
        .cache_enabled(false)
        .cache_ttl(Duration::from_secs(60))
        .max_cache_size(50)
        .offline(true)
        .timeout(Duration::from_secs(2))
        .retries(7)
        .enable_request_signing(false)
        .enable_cache_encryption(true)
        .evaluation_jitter(EvaluationJitterConfig::new(true, 1, 2))
        .streaming(StreamingConfig {
            enabled: false,
            ..Default::default()
        })
        .build();

    assert_eq!(options.secondary_api_key.as_deref(), Some("sdk_9876543210"));
    assert_eq!(options.base_url, "http://localhost:8200/api/v1");
    assert_eq!(options.polling_interval, Duration::from_secs(45));
    assert!(!options.enable_polling);
    assert!(!options.cache_enabled);
    assert_eq!(options.max_cache_size, 50);
    assert!(options.offline);
    assert_eq!(options.retries, 7);
    assert!(!options.enable_request_signing);
    assert!(options.enable_cache_encryption);
    assert!(options.evaluation_jitter.enabled);
    assert!(!options.streaming.enabled);
}
