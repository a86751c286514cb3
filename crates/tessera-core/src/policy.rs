//! Encryption policies.
//!
//! A policy turns a logical value into one opaque string and back. Tessera
//! never looks inside that string; it only slices it into shards and compares
//! the ciphertext of a fixed probe to notice that the policy has changed.

use serde_json::{json, Value};

use crate::error::{CoreError, Result};

/// A pluggable pair of functions converting a value to and from an opaque string.
///
/// `encrypt` must be deterministic for a given policy: the store compares the
/// ciphertext of [`encryption_probe`] across sessions to detect a policy change.
pub trait EncryptionPolicy: Send + Sync {
    /// Encrypt a value into a single string.
    fn encrypt(&self, value: &Value) -> Result<String>;

    /// Decrypt a string produced by [`EncryptionPolicy::encrypt`].
    fn decrypt(&self, encrypted: &str) -> Result<Value>;
}

/// The default policy: plain JSON text.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonPolicy;

impl EncryptionPolicy for JsonPolicy {
    fn encrypt(&self, value: &Value) -> Result<String> {
        serde_json::to_string(value).map_err(|e| CoreError::Encrypt(e.to_string()))
    }

    fn decrypt(&self, encrypted: &str) -> Result<Value> {
        serde_json::from_str(encrypted).map_err(|e| CoreError::Decrypt(e.to_string()))
    }
}

/// The well-known plaintext whose ciphertext is kept in the encryption marker.
pub fn encryption_probe() -> Value {
    json!({ "a": 100, "n": "tessera-probe" })
}
