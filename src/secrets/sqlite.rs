//! SQLite-backed secret store
//!
//! One table, one row per key. Secret values are sealed with
//! [`SecretCipher`] before they reach the database; the `is_secret` column
//! records which rows to decrypt on read. All database work runs on the
//! blocking thread pool.

use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use directories::ProjectDirs;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{Result, TollgateError};
use crate::secrets::{PutOptions, SecretCipher, SecretStore};

/// Secret store persisted in a SQLite file.
#[derive(Debug, Clone)]
pub struct SqliteSecretStore {
    db_path: PathBuf,
    cipher: SecretCipher,
}

fn storage_err(e: anyhow::Error) -> TollgateError {
    TollgateError::StoreUnavailable(format!("{:#}", e))
}

impl SqliteSecretStore {
    /// Opens the store in the user's data directory.
    ///
    /// The encryption key comes from the environment variable `key_env`, or
    /// from `store.key` next to the database (created on first use).
    pub fn new(key_env: &str) -> Result<Self> {
        let proj_dirs = ProjectDirs::from("dev", "tollgate", "tollgate").ok_or_else(|| {
            TollgateError::StoreUnavailable("Could not determine data directory".into())
        })?;

        let data_dir = proj_dirs.data_dir();
        std::fs::create_dir_all(data_dir)
            .context("Failed to create data directory")
            .map_err(storage_err)?;

        let cipher = SecretCipher::from_env_or_key_file(key_env, &data_dir.join("store.key"))?;
        Self::new_with_path(data_dir.join("secrets.db"), cipher)
    }

    /// Opens (or creates) the store at `db_path` using `cipher`.
    ///
    /// # Examples
    ///
    /// ```
    /// use tollgate::secrets::{SecretCipher, SqliteSecretStore};
    ///
    /// let dir = tempfile::tempdir().unwrap();
    /// let store = SqliteSecretStore::new_with_path(
    ///     dir.path().join("secrets.db"),
    ///     SecretCipher::generate(),
    /// )
    /// .unwrap();
    /// ```
    pub fn new_with_path<P: Into<PathBuf>>(db_path: P, cipher: SecretCipher) -> Result<Self> {
        let db_path = db_path.into();

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .context("Failed to create parent directory for database")
                .map_err(storage_err)?;
        }

        let store = Self { db_path, cipher };
        store.init()?;
        Ok(store)
    }

    /// Path of the database file.
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn init(&self) -> Result<()> {
        let conn = open(&self.db_path)?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS secrets (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                is_secret INTEGER NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )
        .context("Failed to create tables")
        .map_err(storage_err)?;
        Ok(())
    }

    /// Reads the stored text without decrypting it.
    pub async fn raw(&self, key: &str) -> Result<Option<(String, bool)>> {
        let db_path = self.db_path.clone();
        let key = key.to_string();
        run_blocking(move || {
            let conn = open(&db_path)?;
            conn.query_row(
                "SELECT value, is_secret FROM secrets WHERE key = ?1",
                params![key],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, bool>(1)?)),
            )
            .optional()
            .context("Failed to query secret")
            .map_err(|e| storage_err(e).into())
        })
        .await
    }
}

fn open(db_path: &Path) -> Result<Connection> {
    Connection::open(db_path)
        .context("Failed to open database")
        .map_err(|e| storage_err(e).into())
}

async fn run_blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(|e| {
        anyhow::Error::from(TollgateError::StoreUnavailable(format!(
            "database task failed: {}",
            e
        )))
    })?
}

#[async_trait]
impl SecretStore for SqliteSecretStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        match self.raw(key).await? {
            None => Ok(None),
            Some((value, false)) => Ok(Some(value)),
            Some((value, true)) => Ok(Some(self.cipher.decrypt(&value)?)),
        }
    }

    async fn put(&self, key: &str, value: &str, options: PutOptions) -> Result<()> {
        let stored = if options.secret {
            self.cipher.encrypt(value)?
        } else {
            value.to_string()
        };
        let db_path = self.db_path.clone();
        let key = key.to_string();
        let secret = options.secret;

        run_blocking(move || {
            let conn = open(&db_path)?;
            conn.execute(
                "INSERT INTO secrets (key, value, is_secret, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(key) DO UPDATE SET
                    value = excluded.value,
                    is_secret = excluded.is_secret,
                    updated_at = excluded.updated_at",
                params![key, stored, secret, Utc::now().to_rfc3339()],
            )
            .context("Failed to write secret")
            .map_err(storage_err)?;
            Ok(())
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let db_path = self.db_path.clone();
        let key = key.to_string();
        run_blocking(move || {
            let conn = open(&db_path)?;
            conn.execute("DELETE FROM secrets WHERE key = ?1", params![key])
                .context("Failed to delete secret")
                .map_err(storage_err)?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn temp_store() -> (SqliteSecretStore, TempDir) {
        let tmp = TempDir::new().expect("failed to create tempdir");
        let store =
            SqliteSecretStore::new_with_path(tmp.path().join("secrets.db"), SecretCipher::generate())
                .expect("failed to open store");
        (store, tmp)
    }

    #[tokio::test]
    async fn test_plain_value_stored_verbatim() {
        let (store, _tmp) = temp_store();
        store.put("ns/calc/machine_client_id", "abc", PutOptions::plain()).await.unwrap();

        assert_eq!(
            store.raw("ns/calc/machine_client_id").await.unwrap(),
            Some(("abc".to_string(), false))
        );
        assert_eq!(
            store.get("ns/calc/machine_client_id").await.unwrap().as_deref(),
            Some("abc")
        );
    }

    #[tokio::test]
    async fn test_secret_value_encrypted_at_rest() {
        let (store, _tmp) = temp_store();
        store.put("ns/calc/client_secret", "top-secret", PutOptions::secret()).await.unwrap();

        let (raw, is_secret) = store.raw("ns/calc/client_secret").await.unwrap().unwrap();
        assert!(is_secret);
        assert!(!raw.contains("top-secret"));
        assert_eq!(
            store.get("ns/calc/client_secret").await.unwrap().as_deref(),
            Some("top-secret")
        );
    }

    #[tokio::test]
    async fn test_upsert_and_delete() {
        let (store, _tmp) = temp_store();
        store.put("k", "one", PutOptions::plain()).await.unwrap();
        store.put("k", "one", PutOptions::plain()).await.unwrap();
        store.put("k", "two", PutOptions::plain()).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("two"));

        store.delete("k").await.unwrap();
        store.delete("k").await.unwrap();
        assert!(store.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reopen_with_same_key_reads_secrets() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("secrets.db");
        let cipher = SecretCipher::generate();

        let first = SqliteSecretStore::new_with_path(&path, cipher.clone()).unwrap();
        first.put("k", "persisted", PutOptions::secret()).await.unwrap();
        drop(first);

        let second = SqliteSecretStore::new_with_path(&path, cipher).unwrap();
        assert_eq!(second.get("k").await.unwrap().as_deref(), Some("persisted"));
    }

    #[tokio::test]
    async fn test_wrong_key_is_encryption_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("secrets.db");

        let first = SqliteSecretStore::new_with_path(&path, SecretCipher::generate()).unwrap();
        first.put("k", "v", PutOptions::secret()).await.unwrap();

        let second = SqliteSecretStore::new_with_path(&path, SecretCipher::generate()).unwrap();
        let err = second.get("k").await.unwrap_err();
        assert!(matches!(
            TollgateError::classify(&err),
            Some(TollgateError::Encryption(_))
        ));
    }
}
