//! Security primitives: request signing, credential failover, bootstrap
//! verification, canonical JSON, and cache encryption.

mod bootstrap;
mod canonical;
mod encryption;
mod keys;
mod signing;

pub use bootstrap::{
    sign_bootstrap, verify_bootstrap, BootstrapConfig, BootstrapVerificationConfig,
    VerificationFailurePolicy,
};
pub use canonical::{canonicalize, canonicalize_map};
pub use encryption::CacheSealer;
pub use keys::{is_valid_key_format, ApiKeyManager};
pub use signing::{
    create_request_signature, key_id, sign, verify_request_signature, RequestSignature,
    DEFAULT_SIGNATURE_MAX_AGE_MS,
};
