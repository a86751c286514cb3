//! Encryption policies for tests.
//!
//! Both are deterministic, so the encryption marker is stable across runs,
//! and both produce text that `JsonPolicy` cannot read.

use serde_json::Value;
use tessera_core::{CoreError, EncryptionPolicy, JsonPolicy, Result};

/// JSON text, reversed.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReversePolicy;

impl EncryptionPolicy for ReversePolicy {
    fn encrypt(&self, value: &Value) -> Result<String> {
        Ok(JsonPolicy.encrypt(value)?.chars().rev().collect())
    }

    fn decrypt(&self, encrypted: &str) -> Result<Value> {
        JsonPolicy.decrypt(&encrypted.chars().rev().collect::<String>())
    }
}

/// JSON text behind a fixed tag. Two tags are two different policies.
#[derive(Debug, Clone)]
pub struct PrefixPolicy {
    tag: String,
}

impl PrefixPolicy {
    pub fn new(tag: impl Into<String>) -> Self {
        Self { tag: tag.into() }
    }
}

impl EncryptionPolicy for PrefixPolicy {
    fn encrypt(&self, value: &Value) -> Result<String> {
        Ok(format!("{}:{}", self.tag, JsonPolicy.encrypt(value)?))
    }

    fn decrypt(&self, encrypted: &str) -> Result<Value> {
        let body = encrypted
            .strip_prefix(self.tag.as_str())
            .and_then(|rest| rest.strip_prefix(':'))
            .ok_or_else(|| CoreError::Decrypt(format!("not tagged {:?}", self.tag)))?;
        JsonPolicy.decrypt(body)
    }
}
