//! Secret store backed by the OS native keyring
//!
//! Keychain on macOS, Secret Service on Linux, Credential Manager on Windows.
//! The platform store encrypts every entry, so the `secret` flag needs no
//! extra handling here. Each key becomes the keyring "user" under a shared
//! service name.

use async_trait::async_trait;

use crate::error::{Result, TollgateError};
use crate::secrets::{PutOptions, SecretStore};

/// Keyring-backed [`SecretStore`].
#[derive(Debug, Clone)]
pub struct KeyringSecretStore {
    service: String,
}

impl KeyringSecretStore {
    /// Creates a store that files entries under `service`.
    pub fn new(service: &str) -> Self {
        Self {
            service: service.to_string(),
        }
    }

    /// The keyring service name in use.
    pub fn service(&self) -> &str {
        &self.service
    }

    fn entry(service: &str, key: &str) -> Result<keyring::Entry> {
        keyring::Entry::new(service, key).map_err(|e| unavailable(key, e).into())
    }
}

fn unavailable(key: &str, err: keyring::Error) -> TollgateError {
    TollgateError::StoreUnavailable(format!("keyring access for '{}' failed: {}", key, err))
}

fn join_error(err: tokio::task::JoinError) -> anyhow::Error {
    TollgateError::StoreUnavailable(format!("keyring task failed: {}", err)).into()
}

#[async_trait]
impl SecretStore for KeyringSecretStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let service = self.service.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || -> Result<Option<String>> {
            let entry = Self::entry(&service, &key)?;
            match entry.get_password() {
                Ok(value) => Ok(Some(value)),
                Err(keyring::Error::NoEntry) => Ok(None),
                Err(e) => Err(unavailable(&key, e).into()),
            }
        })
        .await
        .map_err(join_error)?
    }

    async fn put(&self, key: &str, value: &str, _options: PutOptions) -> Result<()> {
        let service = self.service.clone();
        let key = key.to_string();
        let value = value.to_string();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let entry = Self::entry(&service, &key)?;
            entry
                .set_password(&value)
                .map_err(|e| unavailable(&key, e).into())
        })
        .await
        .map_err(join_error)?
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let service = self.service.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let entry = Self::entry(&service, &key)?;
            match entry.delete_password() {
                Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
                Err(e) => Err(unavailable(&key, e).into()),
            }
        })
        .await
        .map_err(join_error)?
    }
}
