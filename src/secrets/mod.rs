//! Secret Store Adapter
//!
//! A typed get/put/delete surface over a hierarchical key namespace.
//! Keys are opaque strings to the adapter; the `<namespace>/<service>/<field>`
//! layout is imposed by [`crate::credentials`].
//!
//! Values written with [`PutOptions::secret`] are encrypted at rest and
//! decrypted transparently by `get`. A transport failure is always
//! [`TollgateError::StoreUnavailable`]; only `Ok(None)` means "absent".

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{StoreBackend, StoreConfig};
use crate::error::{Result, TollgateError};

pub mod crypto;
pub mod memory;
pub mod os_keyring;
pub mod sqlite;

pub use crypto::SecretCipher;
pub use memory::MemorySecretStore;
pub use os_keyring::KeyringSecretStore;
pub use sqlite::SqliteSecretStore;

/// Options for [`SecretStore::put`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PutOptions {
    /// Encrypt the value at rest
    pub secret: bool,
}

impl PutOptions {
    /// Store the value encrypted.
    pub fn secret() -> Self {
        Self { secret: true }
    }

    /// Store the value as plain text.
    pub fn plain() -> Self {
        Self { secret: false }
    }
}

/// Hierarchical key-value store for credentials.
#[async_trait]
pub trait SecretStore: Send + Sync + std::fmt::Debug {
    /// Returns the value under `key`, or `None` if no value exists.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Inserts or replaces the value under `key`.
    async fn put(&self, key: &str, value: &str, options: PutOptions) -> Result<()>;

    /// Removes `key`. Removing an absent key succeeds.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Returns the value under `key`, failing with
    /// [`TollgateError::NotFound`] when it is absent.
    async fn require(&self, key: &str) -> Result<String> {
        match self.get(key).await? {
            Some(value) => Ok(value),
            None => Err(TollgateError::NotFound(key.to_string()).into()),
        }
    }
}

/// Opens the store selected by `config`.
///
/// # Errors
///
/// Returns [`TollgateError::StoreUnavailable`] if the backing store cannot be
/// opened or its encryption key cannot be loaded.
pub fn open_store(config: &StoreConfig) -> Result<Arc<dyn SecretStore>> {
    match config.backend {
        StoreBackend::Sqlite => {
            let store = match &config.path {
                Some(path) => {
                    let key_file = path.with_extension("key");
                    let cipher = SecretCipher::from_env_or_key_file(&config.key_env, &key_file)?;
                    SqliteSecretStore::new_with_path(path, cipher)?
                }
                None => SqliteSecretStore::new(&config.key_env)?,
            };
            Ok(Arc::new(store))
        }
        StoreBackend::Keyring => Ok(Arc::new(KeyringSecretStore::new(&config.keyring_service))),
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory secret store; credentials are lost on exit");
            Ok(Arc::new(MemorySecretStore::new()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_require_maps_absence_to_not_found() {
        let store = MemorySecretStore::new();
        let err = store.require("ns/svc/missing").await.unwrap_err();
        assert!(matches!(
            TollgateError::classify(&err),
            Some(TollgateError::NotFound(k)) if k == "ns/svc/missing"
        ));
    }

    #[tokio::test]
    async fn test_open_memory_store() {
        let config = StoreConfig {
            backend: StoreBackend::Memory,
            ..StoreConfig::default()
        };
        let store = open_store(&config).unwrap();
        store.put("a/b/c", "v", PutOptions::plain()).await.unwrap();
        assert_eq!(store.require("a/b/c").await.unwrap(), "v");
    }

    #[tokio::test]
    async fn test_open_sqlite_store_with_path() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig {
            backend: StoreBackend::Sqlite,
            path: Some(dir.path().join("secrets.db")),
            key_env: "TOLLGATE_TEST_UNSET_KEY_VAR_OPEN".to_string(),
            ..StoreConfig::default()
        };
        let store = open_store(&config).unwrap();
        store.put("a/b/c", "hidden", PutOptions::secret()).await.unwrap();
        assert_eq!(store.get("a/b/c").await.unwrap().as_deref(), Some("hidden"));
        assert!(dir.path().join("secrets.key").exists());
    }
}
