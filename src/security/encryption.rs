//! Sealed flag snapshots.
//!
//! The core keeps no cache on disk. A binding layer that wants warm starts
//! can persist the flag set itself; with `enable_cache_encryption` set, the
//! snapshot it is handed is sealed here first. A snapshot is the store's own
//! flag representation serialized whole, encrypted with AES-256-GCM under a
//! key derived from the API key, and wrapped in a versioned envelope so the
//! format can evolve without silently misreading old blobs.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use pbkdf2::pbkdf2_hmac_array;
use rand::RngCore;
use sha2::Sha256;

use crate::error::{ErrorCode, Result, SwitchyardError};
use crate::types::FlagState;

/// Key derivation input. Versioned together with the envelope: bumping the
/// format rotates the derived key as well.
const DERIVATION_SALT: &[u8] = b"switchyard.sealed-cache.v1";
const DERIVATION_ROUNDS: u32 = 100_000;

/// Envelope layout: `version || nonce || ciphertext`, base64-encoded.
const ENVELOPE_VERSION: u8 = 1;
const NONCE_LEN: usize = 12;

/// Seals flag snapshots for persistence outside the process.
///
/// Sealing is authenticated: opening rejects any envelope whose version is
/// unknown, whose key does not match, or whose content was altered.
pub struct CacheSealer {
    cipher: Aes256Gcm,
}

impl CacheSealer {
    /// Derives the sealing key from the API key.
    pub fn new(api_key: &str) -> Result<Self> {
        let key = pbkdf2_hmac_array::<Sha256, 32>(
            api_key.as_bytes(),
            DERIVATION_SALT,
            DERIVATION_ROUNDS,
        );

        let cipher = <Aes256Gcm as KeyInit>::new_from_slice(&key).map_err(|e| {
            SwitchyardError::new(
                ErrorCode::CacheEncryptionError,
                format!("failed to build sealing cipher: {e}"),
            )
        })?;

        Ok(Self { cipher })
    }

    /// Seals a flag snapshot into an opaque envelope.
    pub fn seal(&self, flags: &[FlagState]) -> Result<String> {
        let payload = serde_json::to_vec(flags).map_err(|e| {
            SwitchyardError::with_source(
                ErrorCode::CacheEncryptionError,
                "failed to serialize flag snapshot",
                e,
            )
        })?;

        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);

        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), payload.as_slice())
            .map_err(|e| {
                SwitchyardError::new(
                    ErrorCode::CacheEncryptionError,
                    format!("sealing failed: {e}"),
                )
            })?;

        let mut envelope = Vec::with_capacity(1 + NONCE_LEN + ciphertext.len());
        envelope.push(ENVELOPE_VERSION);
        envelope.extend_from_slice(&nonce);
        envelope.extend(ciphertext);
        Ok(BASE64.encode(envelope))
    }

    /// Opens an envelope produced by [`seal`](Self::seal) and returns the
    /// flags it carries.
    pub fn open(&self, envelope: &str) -> Result<Vec<FlagState>> {
        let bytes = BASE64.decode(envelope).map_err(|e| {
            SwitchyardError::with_source(
                ErrorCode::CacheDecryptionError,
                "malformed snapshot envelope",
                e,
            )
        })?;

        let Some((&version, sealed)) = bytes.split_first() else {
            return Err(SwitchyardError::new(
                ErrorCode::CacheDecryptionError,
                "empty snapshot envelope",
            ));
        };
        if version != ENVELOPE_VERSION {
            return Err(SwitchyardError::new(
                ErrorCode::CacheDecryptionError,
                format!("unsupported snapshot envelope version {version}"),
            ));
        }
        if sealed.len() < NONCE_LEN {
            return Err(SwitchyardError::new(
                ErrorCode::CacheDecryptionError,
                "truncated snapshot envelope",
            ));
        }

        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
        let payload = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|e| {
                SwitchyardError::new(
                    ErrorCode::CacheDecryptionError,
                    format!("snapshot failed authentication: {e}"),
                )
            })?;

        serde_json::from_slice(&payload).map_err(|e| {
            SwitchyardError::with_source(
                ErrorCode::CacheDecryptionError,
                "failed to parse flag snapshot",
                e,
            )
        })
    }
}
