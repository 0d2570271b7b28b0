//! Named AES-256-GCM keys on top of a platform keystore

use crate::error::CryptoError;
use crate::keystore::{KeyHandle, PlatformKeystore};
use crate::security::{EncryptedBlob, Nonce};
use std::sync::Arc;
use zeroize::Zeroizing;

/// Alias of the key that wraps the database passphrase
pub const DB_PASSPHRASE_ALIAS: &str = "db-passphrase-key";

/// Alias of the key that encrypts credential passwords
pub const CREDENTIAL_ALIAS: &str = "credential-key";

/// Alias-addressed encryption backed by a [`PlatformKeystore`]
#[derive(Clone)]
pub struct KeyVault {
    keystore: Arc<dyn PlatformKeystore>,
}

impl KeyVault {
    /// Wrap a keystore
    pub fn new(keystore: Arc<dyn PlatformKeystore>) -> Self {
        Self { keystore }
    }

    /// Underlying keystore
    pub fn keystore(&self) -> &Arc<dyn PlatformKeystore> {
        &self.keystore
    }

    /// Return the key for `alias`, generating it on first use
    pub fn get_or_create_key(&self, alias: &str) -> Result<KeyHandle, CryptoError> {
        if let Some(key) = self.keystore.get_key(alias)? {
            return Ok(key);
        }

        tracing::info!(alias, "Generating keystore key");
        self.keystore.generate_key(alias)
    }

    /// Encrypt under `alias` with a freshly drawn nonce
    pub fn encrypt(&self, alias: &str, plaintext: &[u8]) -> Result<EncryptedBlob, CryptoError> {
        let key = self.get_or_create_key(alias)?;
        self.keystore.encrypt(&key, Nonce::generate(), plaintext)
    }

    /// Decrypt a blob produced under `alias`
    ///
    /// A missing key is `KeyUnavailable`; no key is created to satisfy a
    /// decrypt.
    pub fn decrypt(
        &self,
        alias: &str,
        blob: &EncryptedBlob,
    ) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        let key = self
            .keystore
            .get_key(alias)?
            .ok_or_else(|| CryptoError::KeyUnavailable(alias.to_string()))?;

        self.keystore.decrypt(&key, blob).map_err(|e| {
            tracing::warn!(alias, error = %e, "Keystore decryption failed");
            e
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keystore::SoftwareKeystore;

    fn vault() -> KeyVault {
        KeyVault::new(Arc::new(SoftwareKeystore::new()))
    }

    #[test]
    fn test_get_or_create_key() {
        let vault = vault();
        let a = vault.get_or_create_key("alias").unwrap();
        let b = vault.get_or_create_key("alias").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.alias(), "alias");
    }

    #[test]
    fn test_encrypt_decrypt() {
        let vault = vault();
        let blob = vault.encrypt(CREDENTIAL_ALIAS, b"hunter2").unwrap();
        let plain = vault.decrypt(CREDENTIAL_ALIAS, &blob).unwrap();
        assert_eq!(&plain[..], b"hunter2");
    }

    #[test]
    fn test_same_plaintext_encrypts_differently() {
        let vault = vault();
        let a = vault.encrypt(CREDENTIAL_ALIAS, b"same").unwrap();
        let b = vault.encrypt(CREDENTIAL_ALIAS, b"same").unwrap();
        assert_ne!(a.nonce(), b.nonce());
        assert_ne!(a.to_bytes(), b.to_bytes());
    }

    #[test]
    fn test_aliases_are_isolated() {
        let vault = vault();
        let blob = vault.encrypt(CREDENTIAL_ALIAS, b"secret").unwrap();
        vault.get_or_create_key(DB_PASSPHRASE_ALIAS).unwrap();

        assert_eq!(
            vault.decrypt(DB_PASSPHRASE_ALIAS, &blob).unwrap_err(),
            CryptoError::IntegrityCheckFailed
        );
    }

    #[test]
    fn test_decrypt_without_key() {
        let vault = vault();
        let other = KeyVault::new(Arc::new(SoftwareKeystore::new()));
        let blob = other.encrypt(CREDENTIAL_ALIAS, b"secret").unwrap();

        assert!(matches!(
            vault.decrypt(CREDENTIAL_ALIAS, &blob),
            Err(CryptoError::KeyUnavailable(_))
        ));
        // Decrypt must not have created the key as a side effect
        assert!(vault.keystore().get_key(CREDENTIAL_ALIAS).unwrap().is_none());
    }
}
