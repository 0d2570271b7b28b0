//! Platform keystore integration
//!
//! Keys never leave the keystore: callers hold a [`KeyHandle`] and ask the
//! keystore to encrypt or decrypt on their behalf. Native integrations
//! (Android Keystore, Keychain, DPAPI, libsecret) implement
//! [`PlatformKeystore`] outside this crate. Two software keystores ship here:
//! [`FileKeystore`] keeps its keys in a file so a vault survives restarts, and
//! [`SoftwareKeystore`] keeps them in memory only, for tests.

use crate::error::CryptoError;
use crate::security::{EncryptedBlob, Nonce, TAG_LEN};
use aes_gcm::{
    aead::{AeadInPlace, KeyInit, OsRng},
    Aes256Gcm, Key, Nonce as GcmNonce, Tag,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use parking_lot::RwLock;
use rand::RngCore;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use zeroize::Zeroizing;

/// AES-256 key length
pub const KEY_LEN: usize = 32;

type KeyMaterial = Zeroizing<[u8; KEY_LEN]>;
type KeyRing = HashMap<String, KeyMaterial>;

/// Guarantees a keystore makes about its keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KeystoreCapabilities {
    /// Key material is held by secure hardware (TEE, StrongBox, Secure Enclave)
    pub hardware_backed: bool,
    /// Keys survive a process restart
    pub persistent: bool,
}

/// Opaque reference to a non-extractable key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyHandle {
    alias: Arc<str>,
}

impl KeyHandle {
    /// Create a handle for `alias`; only keystores should mint these
    pub fn new(alias: &str) -> Self {
        Self {
            alias: Arc::from(alias),
        }
    }

    /// Key alias
    pub fn alias(&self) -> &str {
        &self.alias
    }
}

/// Platform keystore abstraction
///
/// Implementations own the key material. `generate_key` must be idempotent:
/// an alias that already exists is returned, not replaced.
pub trait PlatformKeystore: Send + Sync {
    /// What this keystore guarantees about its keys
    fn capabilities(&self) -> KeystoreCapabilities;

    /// Create a 256-bit AES-GCM key for `alias`, or return the existing one
    fn generate_key(&self, alias: &str) -> Result<KeyHandle, CryptoError>;

    /// Look up the key for `alias`
    fn get_key(&self, alias: &str) -> Result<Option<KeyHandle>, CryptoError>;

    /// Delete the key for `alias`; deleting a missing key is not an error
    fn delete_key(&self, alias: &str) -> Result<(), CryptoError>;

    /// AES-256-GCM encrypt with the referenced key
    fn encrypt(
        &self,
        key: &KeyHandle,
        nonce: Nonce,
        plaintext: &[u8],
    ) -> Result<EncryptedBlob, CryptoError>;

    /// AES-256-GCM decrypt with the referenced key
    fn decrypt(
        &self,
        key: &KeyHandle,
        blob: &EncryptedBlob,
    ) -> Result<Zeroizing<Vec<u8>>, CryptoError>;
}

/// In-memory keystore
///
/// Keys vanish with the process, so anything sealed under them is lost on
/// restart. Use it for tests and throwaway vaults; [`crate::Vault::open`]
/// refuses it.
pub struct SoftwareKeystore {
    keys: RwLock<KeyRing>,
}

impl SoftwareKeystore {
    /// Create an empty keystore
    pub fn new() -> Self {
        Self {
            keys: RwLock::new(KeyRing::new()),
        }
    }

    /// Number of keys held
    pub fn key_count(&self) -> usize {
        self.keys.read().len()
    }
}

impl Default for SoftwareKeystore {
    fn default() -> Self {
        Self::new()
    }
}

impl PlatformKeystore for SoftwareKeystore {
    fn capabilities(&self) -> KeystoreCapabilities {
        KeystoreCapabilities {
            hardware_backed: false,
            persistent: false,
        }
    }

    fn generate_key(&self, alias: &str) -> Result<KeyHandle, CryptoError> {
        self.keys
            .write()
            .entry(alias.to_string())
            .or_insert_with(fresh_key);
        Ok(KeyHandle::new(alias))
    }

    fn get_key(&self, alias: &str) -> Result<Option<KeyHandle>, CryptoError> {
        Ok(self
            .keys
            .read()
            .contains_key(alias)
            .then(|| KeyHandle::new(alias)))
    }

    fn delete_key(&self, alias: &str) -> Result<(), CryptoError> {
        self.keys.write().remove(alias);
        Ok(())
    }

    fn encrypt(
        &self,
        key: &KeyHandle,
        nonce: Nonce,
        plaintext: &[u8],
    ) -> Result<EncryptedBlob, CryptoError> {
        seal(&cipher_for(&self.keys.read(), key)?, nonce, plaintext)
    }

    fn decrypt(
        &self,
        key: &KeyHandle,
        blob: &EncryptedBlob,
    ) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        unseal(&cipher_for(&self.keys.read(), key)?, blob)
    }
}

/// Software keystore persisted to a key file
///
/// The file maps each alias to its base64 key and is the only thing
/// protecting the vault's keys at rest, so it is created owner-only and
/// should live outside anything that gets synced or backed up with the
/// database. Every change is written to a temporary file in the same
/// directory and renamed over the key file.
pub struct FileKeystore {
    path: PathBuf,
    keys: RwLock<KeyRing>,
}

impl FileKeystore {
    /// Load keys from `path`; a missing file is an empty keystore
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, CryptoError> {
        let path = path.as_ref().to_path_buf();
        let keys = match std::fs::read(&path) {
            Ok(bytes) => decode_key_file(&Zeroizing::new(bytes))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => KeyRing::new(),
            Err(e) => return Err(key_file_error(&path, e)),
        };

        tracing::debug!(path = %path.display(), keys = keys.len(), "Loaded key file");

        Ok(Self {
            path,
            keys: RwLock::new(keys),
        })
    }

    /// Key file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, keys: &KeyRing) -> Result<(), CryptoError> {
        let encoded: BTreeMap<&str, Zeroizing<String>> = keys
            .iter()
            .map(|(alias, material)| (alias.as_str(), Zeroizing::new(STANDARD.encode(&material[..]))))
            .collect();
        let view: BTreeMap<&str, &str> = encoded
            .iter()
            .map(|(alias, key)| (*alias, key.as_str()))
            .collect();
        let json = Zeroizing::new(
            serde_json::to_vec_pretty(&view).map_err(|e| key_file_error(&self.path, e))?,
        );

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir).map_err(|e| key_file_error(&self.path, e))?;

        let mut tmp =
            tempfile::NamedTempFile::new_in(&dir).map_err(|e| key_file_error(&self.path, e))?;
        tmp.write_all(&json)
            .and_then(|_| tmp.as_file().sync_all())
            .map_err(|e| key_file_error(&self.path, e))?;
        tmp.persist(&self.path)
            .map_err(|e| key_file_error(&self.path, e.error))?;
        Ok(())
    }
}

impl PlatformKeystore for FileKeystore {
    fn capabilities(&self) -> KeystoreCapabilities {
        KeystoreCapabilities {
            hardware_backed: false,
            persistent: true,
        }
    }

    fn generate_key(&self, alias: &str) -> Result<KeyHandle, CryptoError> {
        let mut keys = self.keys.write();
        if keys.contains_key(alias) {
            return Ok(KeyHandle::new(alias));
        }

        keys.insert(alias.to_string(), fresh_key());
        if let Err(e) = self.persist(&keys) {
            keys.remove(alias);
            return Err(e);
        }

        tracing::debug!(alias, "Stored new key");
        Ok(KeyHandle::new(alias))
    }

    fn get_key(&self, alias: &str) -> Result<Option<KeyHandle>, CryptoError> {
        Ok(self
            .keys
            .read()
            .contains_key(alias)
            .then(|| KeyHandle::new(alias)))
    }

    fn delete_key(&self, alias: &str) -> Result<(), CryptoError> {
        let mut keys = self.keys.write();
        let Some(material) = keys.remove(alias) else {
            return Ok(());
        };

        if let Err(e) = self.persist(&keys) {
            keys.insert(alias.to_string(), material);
            return Err(e);
        }
        Ok(())
    }

    fn encrypt(
        &self,
        key: &KeyHandle,
        nonce: Nonce,
        plaintext: &[u8],
    ) -> Result<EncryptedBlob, CryptoError> {
        seal(&cipher_for(&self.keys.read(), key)?, nonce, plaintext)
    }

    fn decrypt(
        &self,
        key: &KeyHandle,
        blob: &EncryptedBlob,
    ) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        unseal(&cipher_for(&self.keys.read(), key)?, blob)
    }
}

fn fresh_key() -> KeyMaterial {
    let mut material = Zeroizing::new([0u8; KEY_LEN]);
    OsRng.fill_bytes(&mut *material);
    material
}

fn cipher_for(keys: &KeyRing, key: &KeyHandle) -> Result<Aes256Gcm, CryptoError> {
    let material = keys
        .get(key.alias())
        .ok_or_else(|| CryptoError::KeyUnavailable(key.alias().to_string()))?;
    Ok(Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&material[..])))
}

fn seal(cipher: &Aes256Gcm, nonce: Nonce, plaintext: &[u8]) -> Result<EncryptedBlob, CryptoError> {
    let mut buffer = plaintext.to_vec();
    let tag = cipher
        .encrypt_in_place_detached(GcmNonce::from_slice(nonce.as_bytes()), b"", &mut buffer)
        .map_err(|_| CryptoError::MalformedInput("plaintext too long".to_string()))?;

    let mut tag_bytes = [0u8; TAG_LEN];
    tag_bytes.copy_from_slice(tag.as_slice());

    Ok(EncryptedBlob::new(nonce, buffer, tag_bytes))
}

fn unseal(cipher: &Aes256Gcm, blob: &EncryptedBlob) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    let mut buffer = Zeroizing::new(blob.ciphertext().to_vec());
    cipher
        .decrypt_in_place_detached(
            GcmNonce::from_slice(blob.nonce()),
            b"",
            buffer.as_mut_slice(),
            Tag::from_slice(blob.tag()),
        )
        .map_err(|_| CryptoError::IntegrityCheckFailed)?;

    Ok(buffer)
}

fn decode_key_file(bytes: &[u8]) -> Result<KeyRing, CryptoError> {
    if bytes.is_empty() {
        return Ok(KeyRing::new());
    }

    let raw: HashMap<String, String> = serde_json::from_slice(bytes)
        .map_err(|e| CryptoError::MalformedInput(format!("key file: {}", e)))?;

    raw.into_iter()
        .map(|(alias, encoded)| -> Result<(String, KeyMaterial), CryptoError> {
            let encoded = Zeroizing::new(encoded);
            let decoded = Zeroizing::new(STANDARD.decode(encoded.as_bytes()).map_err(|e| {
                CryptoError::MalformedInput(format!("key {}: {}", alias, e))
            })?);
            if decoded.len() != KEY_LEN {
                return Err(CryptoError::MalformedInput(format!(
                    "key {} is {} bytes",
                    alias,
                    decoded.len()
                )));
            }

            let mut material = Zeroizing::new([0u8; KEY_LEN]);
            material.copy_from_slice(&decoded);
            Ok((alias, material))
        })
        .collect()
}

fn key_file_error(path: &Path, e: impl fmt::Display) -> CryptoError {
    CryptoError::KeyUnavailable(format!("key file {}: {}", path.display(), e))
}
