//! In-process secret store
//!
//! Secret values are still encrypted in memory so the store behaves like the
//! durable backends. [`MemorySecretStore::set_unavailable`] simulates a
//! transport outage for tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{Result, TollgateError};
use crate::secrets::{PutOptions, SecretCipher, SecretStore};

#[derive(Debug, Clone)]
struct StoredValue {
    value: String,
    secret: bool,
}

/// Secret store backed by a `HashMap`.
#[derive(Debug)]
pub struct MemorySecretStore {
    entries: RwLock<HashMap<String, StoredValue>>,
    cipher: SecretCipher,
    unavailable: AtomicBool,
}

impl Default for MemorySecretStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySecretStore {
    /// Creates an empty store with a random encryption key.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            cipher: SecretCipher::generate(),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Makes every subsequent call fail with `StoreUnavailable` (or succeed
    /// again when `false`).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Returns the value exactly as held at rest (ciphertext for secrets).
    pub async fn raw(&self, key: &str) -> Option<String> {
        self.entries.read().await.get(key).map(|v| v.value.clone())
    }

    /// Returns whether `key` was stored with `secret = true`.
    pub async fn is_secret(&self, key: &str) -> Option<bool> {
        self.entries.read().await.get(key).map(|v| v.secret)
    }

    /// Returns all keys currently held, sorted.
    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(TollgateError::StoreUnavailable("memory store offline".to_string()).into());
        }
        Ok(())
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.check_available()?;
        let stored = self.entries.read().await.get(key).cloned();
        match stored {
            None => Ok(None),
            Some(StoredValue {
                value,
                secret: false,
            }) => Ok(Some(value)),
            Some(StoredValue {
                value,
                secret: true,
            }) => Ok(Some(self.cipher.decrypt(&value)?)),
        }
    }

    async fn put(&self, key: &str, value: &str, options: PutOptions) -> Result<()> {
        self.check_available()?;
        let value = if options.secret {
            self.cipher.encrypt(value)?
        } else {
            value.to_string()
        };
        self.entries.write().await.insert(
            key.to_string(),
            StoredValue {
                value,
                secret: options.secret,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.check_available()?;
        self.entries.write().await.remove(key);
        Ok(())
    }
}
