//! Field-level encryption for credential passwords
//!
//! Only the password column is encrypted. Folder names, entry titles and
//! usernames are stored as plaintext inside the (already encrypted) database.

use crate::error::CryptoError;
use crate::key_vault::{KeyVault, CREDENTIAL_ALIAS};
use crate::security::EncryptedBlob;
use zeroize::Zeroizing;

/// Encrypts individual credential fields under [`CREDENTIAL_ALIAS`]
#[derive(Clone)]
pub struct CredentialCipher {
    vault: KeyVault,
}

impl CredentialCipher {
    /// Create over a key vault
    pub fn new(vault: KeyVault) -> Self {
        Self { vault }
    }

    /// Encrypt a field value
    pub fn encrypt_field(&self, plain: &[u8]) -> Result<EncryptedBlob, CryptoError> {
        self.vault.encrypt(CREDENTIAL_ALIAS, plain)
    }

    /// Decrypt a field value
    pub fn decrypt_field(&self, blob: &EncryptedBlob) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        self.vault.decrypt(CREDENTIAL_ALIAS, blob)
    }

    /// Encrypt a string field into its stored text form
    pub fn encrypt_text(&self, plain: &str) -> Result<String, CryptoError> {
        Ok(self.encrypt_field(plain.as_bytes())?.encode())
    }

    /// Decrypt a stored text field
    pub fn decrypt_text(&self, stored: &str) -> Result<Zeroizing<String>, CryptoError> {
        let blob = EncryptedBlob::decode(stored)?;
        let plain = self.decrypt_field(&blob)?;
        let text = std::str::from_utf8(&plain)
            .map_err(|_| CryptoError::MalformedInput("field is not valid UTF-8".to_string()))?;
        Ok(Zeroizing::new(text.to_string()))
    }
}
