//! AES-256-GCM encryption for secret values at rest
//!
//! Ciphertext layout: `base64(nonce[12] || ciphertext || tag)`. A fresh random
//! nonce is drawn for every encryption.

use std::path::Path;

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::error::{Result, TollgateError};

const NONCE_LEN: usize = 12;

/// Symmetric cipher for secret values.
///
/// The key is never printed by `Debug`.
#[derive(Clone)]
pub struct SecretCipher {
    key: [u8; 32],
}

impl std::fmt::Debug for SecretCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretCipher").finish_non_exhaustive()
    }
}

impl SecretCipher {
    /// Creates a cipher from raw key bytes.
    pub fn new(key: [u8; 32]) -> Self {
        Self { key }
    }

    /// Creates a cipher with a random key.
    pub fn generate() -> Self {
        let mut key = [0u8; 32];
        rand::rng().fill_bytes(&mut key);
        Self { key }
    }

    /// Derives a key from a passphrase with SHA-256.
    pub fn from_passphrase(passphrase: &str) -> Self {
        let digest = Sha256::digest(passphrase.as_bytes());
        let mut key = [0u8; 32];
        key.copy_from_slice(&digest);
        Self { key }
    }

    /// Interprets `material` as a base64-encoded 32-byte key, falling back to
    /// passphrase derivation for anything else.
    pub fn from_key_material(material: &str) -> Self {
        match STANDARD.decode(material.trim()) {
            Ok(bytes) if bytes.len() == 32 => {
                let mut key = [0u8; 32];
                key.copy_from_slice(&bytes);
                Self { key }
            }
            _ => Self::from_passphrase(material),
        }
    }

    /// Reads key material from the environment variable `var`, or loads the
    /// key file at `key_file`, creating it with a random key on first use.
    ///
    /// # Errors
    ///
    /// Returns [`TollgateError::StoreUnavailable`] if the key file cannot be
    /// read or written, or [`TollgateError::Encryption`] if it is corrupt.
    pub fn from_env_or_key_file(var: &str, key_file: &Path) -> Result<Self> {
        if let Ok(material) = std::env::var(var) {
            if !material.is_empty() {
                tracing::debug!(env = var, "Using store encryption key from environment");
                return Ok(Self::from_key_material(&material));
            }
        }

        if key_file.exists() {
            let encoded = std::fs::read_to_string(key_file).map_err(|e| {
                TollgateError::StoreUnavailable(format!(
                    "failed to read key file {}: {}",
                    key_file.display(),
                    e
                ))
            })?;
            let bytes = STANDARD.decode(encoded.trim()).map_err(|e| {
                TollgateError::Encryption(format!("key file is not base64: {}", e))
            })?;
            if bytes.len() != 32 {
                return Err(
                    TollgateError::Encryption("key file must hold 32 bytes".to_string()).into(),
                );
            }
            let mut key = [0u8; 32];
            key.copy_from_slice(&bytes);
            return Ok(Self { key });
        }

        let cipher = Self::generate();
        if let Some(parent) = key_file.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                TollgateError::StoreUnavailable(format!("failed to create key directory: {}", e))
            })?;
        }
        write_private(key_file, &STANDARD.encode(cipher.key))?;
        tracing::info!(path = %key_file.display(), "Generated new store encryption key");
        Ok(cipher)
    }

    /// Encrypts `plaintext`, returning the base64 envelope.
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let cipher = Aes256Gcm::new_from_slice(&self.key)
            .map_err(|e| TollgateError::Encryption(e.to_string()))?;

        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| TollgateError::Encryption(e.to_string()))?;

        let mut combined = nonce_bytes.to_vec();
        combined.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(&combined))
    }

    /// Decrypts an envelope produced by [`SecretCipher::encrypt`].
    ///
    /// # Errors
    ///
    /// Returns [`TollgateError::Encryption`] for a wrong key, tampered data,
    /// or a malformed envelope.
    pub fn decrypt(&self, envelope: &str) -> Result<String> {
        let combined = STANDARD
            .decode(envelope)
            .map_err(|e| TollgateError::Encryption(e.to_string()))?;

        if combined.len() < NONCE_LEN {
            return Err(TollgateError::Encryption("ciphertext too short".to_string()).into());
        }

        let (nonce_bytes, encrypted) = combined.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);

        let cipher = Aes256Gcm::new_from_slice(&self.key)
            .map_err(|e| TollgateError::Encryption(e.to_string()))?;

        let plaintext = cipher
            .decrypt(nonce, encrypted)
            .map_err(|_| TollgateError::Encryption("decryption failed".to_string()))?;

        String::from_utf8(plaintext)
            .map_err(|e| TollgateError::Encryption(format!("plaintext is not UTF-8: {}", e)).into())
    }
}

#[cfg(unix)]
fn write_private(path: &Path, contents: &str) -> Result<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)
        .map_err(|e| TollgateError::StoreUnavailable(format!("failed to create key file: {}", e)))?;
    file.write_all(contents.as_bytes())?;
    Ok(())
}

#[cfg(not(unix))]
fn write_private(path: &Path, contents: &str) -> Result<()> {
    std::fs::write(path, contents)
        .map_err(|e| TollgateError::StoreUnavailable(format!("failed to create key file: {}", e)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt() {
        let cipher = SecretCipher::generate();
        let envelope = cipher.encrypt("s3cr3t").unwrap();
        assert_ne!(envelope, "s3cr3t");
        assert_eq!(cipher.decrypt(&envelope).unwrap(), "s3cr3t");
    }

    #[test]
    fn test_nonce_differs_per_call() {
        let cipher = SecretCipher::generate();
        assert_ne!(cipher.encrypt("same").unwrap(), cipher.encrypt("same").unwrap());
    }

    #[test]
    fn test_wrong_key_fails() {
        let envelope = SecretCipher::generate().encrypt("secret").unwrap();
        let err = SecretCipher::generate().decrypt(&envelope).unwrap_err();
        assert!(matches!(
            TollgateError::classify(&err),
            Some(TollgateError::Encryption(_))
        ));
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let cipher = SecretCipher::generate();
        let envelope = cipher.encrypt("secret").unwrap();
        let mut bytes = STANDARD.decode(&envelope).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        assert!(cipher.decrypt(&STANDARD.encode(bytes)).is_err());
    }

    #[test]
    fn test_short_envelope_fails() {
        let cipher = SecretCipher::generate();
        assert!(cipher.decrypt(&STANDARD.encode([1u8, 2, 3])).is_err());
    }

    #[test]
    fn test_key_material_base64_and_passphrase() {
        let raw = [7u8; 32];
        let a = SecretCipher::from_key_material(&STANDARD.encode(raw));
        let b = SecretCipher::new(raw);
        let envelope = a.encrypt("x").unwrap();
        assert_eq!(b.decrypt(&envelope).unwrap(), "x");

        let p1 = SecretCipher::from_key_material("correct horse battery staple");
        let p2 = SecretCipher::from_passphrase("correct horse battery staple");
        assert_eq!(p2.decrypt(&p1.encrypt("y").unwrap()).unwrap(), "y");
    }

    #[test]
    fn test_key_file_created_and_reused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys").join("store.key");
        let var = "TOLLGATE_TEST_UNSET_KEY_VAR";
        std::env::remove_var(var);

        let first = SecretCipher::from_env_or_key_file(var, &path).unwrap();
        assert!(path.exists());
        let second = SecretCipher::from_env_or_key_file(var, &path).unwrap();

        let envelope = first.encrypt("persisted").unwrap();
        assert_eq!(second.decrypt(&envelope).unwrap(), "persisted");
    }
}
