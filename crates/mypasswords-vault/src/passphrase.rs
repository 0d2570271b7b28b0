//! Encrypted-store passphrase
//!
//! The passphrase is 32 random bytes generated on first use, wrapped under
//! [`DB_PASSPHRASE_ALIAS`] and persisted in settings. It is never
//! regenerated once a record exists: a record that no longer decrypts means
//! the store is unreachable and the failure is returned as-is.

use crate::error::{CryptoError, PassphraseError};
use crate::key_vault::{KeyVault, DB_PASSPHRASE_ALIAS};
use crate::security::EncryptedBlob;
use crate::settings::{keys, SettingsStore};
use rand::rngs::OsRng;
use rand::RngCore;
use std::fmt;
use std::sync::Arc;
use zeroize::Zeroizing;

/// Passphrase length in bytes
pub const PASSPHRASE_LEN: usize = 32;

/// Plaintext store passphrase, zeroized on drop
pub struct Passphrase(Zeroizing<Vec<u8>>);

impl Passphrase {
    /// Raw bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Wrap raw bytes
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(Zeroizing::new(bytes.to_vec()))
    }
}

impl PartialEq for Passphrase {
    fn eq(&self, other: &Self) -> bool {
        self.0[..] == other.0[..]
    }
}

impl Eq for Passphrase {}

impl fmt::Debug for Passphrase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Passphrase([REDACTED])")
    }
}

/// Produces the store passphrase, creating it on first use
pub struct PassphraseProvider {
    vault: KeyVault,
    settings: Arc<dyn SettingsStore>,
}

impl PassphraseProvider {
    /// Create a provider
    pub fn new(vault: KeyVault, settings: Arc<dyn SettingsStore>) -> Self {
        Self { vault, settings }
    }

    /// Return the store passphrase.
    ///
    /// Deterministic for a given keystore and settings state. Two first-run
    /// callers racing each other converge on whichever record is persisted
    /// first.
    pub fn get_passphrase(&self) -> Result<Passphrase, PassphraseError> {
        if let Some(stored) = self.settings.get(keys::ENCRYPTED_DB_PASSPHRASE)? {
            return self.unseal(&stored);
        }

        let mut secret = Zeroizing::new(vec![0u8; PASSPHRASE_LEN]);
        OsRng.fill_bytes(&mut secret);
        let sealed = self.vault.encrypt(DB_PASSPHRASE_ALIAS, &secret)?.encode();

        let mut existing = None;
        self.settings.edit(&mut |prefs| {
            match prefs.get(keys::ENCRYPTED_DB_PASSPHRASE) {
                Some(current) => existing = Some(current.clone()),
                None => {
                    prefs.insert(keys::ENCRYPTED_DB_PASSPHRASE.to_string(), sealed.clone());
                }
            }
        })?;

        if let Some(stored) = existing {
            tracing::debug!("Passphrase record created concurrently, using persisted record");
            return self.unseal(&stored);
        }

        tracing::info!("Generated store passphrase");
        Ok(Passphrase(secret))
    }

    /// Whether a passphrase record has been persisted
    pub fn has_passphrase(&self) -> Result<bool, PassphraseError> {
        Ok(self.settings.get(keys::ENCRYPTED_DB_PASSPHRASE)?.is_some())
    }

    fn unseal(&self, stored: &str) -> Result<Passphrase, PassphraseError> {
        let blob = EncryptedBlob::decode(stored)?;
        let secret = self.vault.decrypt(DB_PASSPHRASE_ALIAS, &blob).map_err(|e| {
            tracing::error!(error = %e, "Stored passphrase could not be decrypted");
            e
        })?;

        if secret.len() != PASSPHRASE_LEN {
            return Err(CryptoError::MalformedInput(format!(
                "passphrase is {} bytes, expected {}",
                secret.len(),
                PASSPHRASE_LEN
            ))
            .into());
        }

        Ok(Passphrase(secret))
    }
}
