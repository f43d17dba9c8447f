//! API key management with automatic failover.

use std::sync::atomic::{AtomicBool, Ordering};

/// Valid credential prefixes.
const KEY_PREFIXES: [&str; 3] = ["sdk_", "srv_", "cli_"];

/// Minimum total credential length.
const MIN_KEY_LENGTH: usize = 10;

/// Whether a credential is shaped like a Switchyard API key.
pub fn is_valid_key_format(api_key: &str) -> bool {
    api_key.len() >= MIN_KEY_LENGTH && KEY_PREFIXES.iter().any(|p| api_key.starts_with(p))
}

/// Holds the primary credential and an optional secondary used for failover
/// when the primary is rejected.
///
/// `current()` is an atomic snapshot: concurrent readers observe either the
/// old or the new selection, never a torn value. A swap performed on auth
/// rejection is visible to the next request that reads the credential.
#[derive(Debug)]
pub struct ApiKeyManager {
    primary: String,
    secondary: Option<String>,
    using_secondary: AtomicBool,
}

impl ApiKeyManager {
    pub fn new(primary: impl Into<String>, secondary: Option<String>) -> Self {
        Self {
            primary: primary.into(),
            secondary,
            using_secondary: AtomicBool::new(false),
        }
    }

    /// The currently selected credential.
    pub fn current(&self) -> String {
        if self.using_secondary.load(Ordering::Acquire) {
            self.secondary
                .clone()
                .unwrap_or_else(|| self.primary.clone())
        } else {
            self.primary.clone()
        }
    }

    pub fn has_secondary(&self) -> bool {
        self.secondary.is_some()
    }

    pub fn is_using_secondary(&self) -> bool {
        self.using_secondary.load(Ordering::Acquire)
    }

    /// Reacts to an authentication rejection of the current credential.
    ///
    /// Returns `true` if a secondary credential was activated; `false` if no
    /// secondary exists or it is already active, in which case the caller
    /// surfaces the failure.
    pub fn on_auth_rejection(&self) -> bool {
        if self.secondary.is_none() {
            return false;
        }
        if self
            .using_secondary
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            tracing::warn!("primary API key rejected, switching to secondary");
            return true;
        }
        false
    }

    /// Re-selects the primary credential.
    pub fn reset_to_primary(&self) {
        self.using_secondary.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_format_validation() {
        assert!(is_valid_key_format("sdk_abc123def"));
        assert!(is_valid_key_format("srv_abc123def"));
        assert!(is_valid_key_format("cli_abc123def"));
        assert!(!is_valid_key_format("sdk_short"));
        assert!(!is_valid_key_format("key_abc123def"));
        assert!(!is_valid_key_format(""));
    }

    #[test]
    fn starts_on_primary() {
        let keys = ApiKeyManager::new("sdk_aaaaaaaa", Some("sdk_bbbbbbbb".to_string()));
        assert_eq!(keys.current(), "sdk_aaaaaaaa");
        assert!(!keys.is_using_secondary());
        assert!(keys.has_secondary());
    }

    #[test]
    fn rejection_switches_once() {
        let keys = ApiKeyManager::new("sdk_aaaaaaaa", Some("sdk_bbbbbbbb".to_string()));

        assert!(keys.on_auth_rejection());
        assert_eq!(keys.current(), "sdk_bbbbbbbb");
        assert!(keys.is_using_secondary());

        // A second rejection has nothing left to switch to.
        assert!(!keys.on_auth_rejection());
        assert_eq!(keys.current(), "sdk_bbbbbbbb");
    }

    #[test]
    fn rejection_without_secondary_reports_false() {
        let keys = ApiKeyManager::new("sdk_aaaaaaaa", None);
        assert!(!keys.on_auth_rejection());
        assert_eq!(keys.current(), "sdk_aaaaaaaa");
    }

    #[test]
    fn reset_returns_to_primary() {
        let keys = ApiKeyManager::new("sdk_aaaaaaaa", Some("sdk_bbbbbbbb".to_string()));
        keys.on_auth_rejection();
        keys.reset_to_primary();
        assert_eq!(keys.current(), "sdk_aaaaaaaa");
        assert!(!keys.is_using_secondary());
    }
}
