//! Security and encryption primitives
//!
//! Defines the AES-256-GCM blob layout, single-use nonces, Argon2id PIN
//! hashing, and the legacy SHA-256 PIN digest that older installs stored.

use crate::error::{CryptoError, PinError};
use aes_gcm::aead::OsRng;
use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2, ParamsBuilder, Version,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::fmt;

/// AES-GCM nonce length in bytes
pub const NONCE_LEN: usize = 12;

/// AES-GCM authentication tag length in bytes
pub const TAG_LEN: usize = 16;

/// Single-use AES-GCM nonce.
///
/// Only [`Nonce::generate`] can create one, it is not `Clone`, and every
/// encryption consumes it by value.
pub struct Nonce([u8; NONCE_LEN]);

impl Nonce {
    /// Draw a fresh nonce from the OS CSPRNG
    pub(crate) fn generate() -> Self {
        let mut bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Nonce bytes
    pub fn as_bytes(&self) -> &[u8; NONCE_LEN] {
        &self.0
    }
}

/// AES-GCM output bundle: nonce, ciphertext and authentication tag
#[derive(Clone, PartialEq, Eq)]
pub struct EncryptedBlob {
    nonce: [u8; NONCE_LEN],
    ciphertext: Vec<u8>,
    tag: [u8; TAG_LEN],
}

impl EncryptedBlob {
    /// Assemble a blob from the nonce that produced it
    pub fn new(nonce: Nonce, ciphertext: Vec<u8>, tag: [u8; TAG_LEN]) -> Self {
        Self {
            nonce: nonce.0,
            ciphertext,
            tag,
        }
    }

    /// Nonce bytes
    pub fn nonce(&self) -> &[u8; NONCE_LEN] {
        &self.nonce
    }

    /// Ciphertext without the tag
    pub fn ciphertext(&self) -> &[u8] {
        &self.ciphertext
    }

    /// Authentication tag
    pub fn tag(&self) -> &[u8; TAG_LEN] {
        &self.tag
    }

    /// Serialize as nonce || ciphertext || tag
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(NONCE_LEN + self.ciphertext.len() + TAG_LEN);
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&self.ciphertext);
        out.extend_from_slice(&self.tag);
        out
    }

    /// Parse nonce || ciphertext || tag
    pub fn from_bytes(data: &[u8]) -> Result<Self, CryptoError> {
        if data.len() < NONCE_LEN + TAG_LEN {
            return Err(CryptoError::MalformedInput(format!(
                "blob is {} bytes, need at least {}",
                data.len(),
                NONCE_LEN + TAG_LEN
            )));
        }

        let (nonce_bytes, rest) = data.split_at(NONCE_LEN);
        let (ciphertext, tag_bytes) = rest.split_at(rest.len() - TAG_LEN);

        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(nonce_bytes);
        let mut tag = [0u8; TAG_LEN];
        tag.copy_from_slice(tag_bytes);

        Ok(Self {
            nonce,
            ciphertext: ciphertext.to_vec(),
            tag,
        })
    }

    /// Text encoding for storage (standard base64)
    pub fn encode(&self) -> String {
        STANDARD.encode(self.to_bytes())
    }

    /// Parse the text encoding produced by [`EncryptedBlob::encode`]
    pub fn decode(text: &str) -> Result<Self, CryptoError> {
        let bytes = STANDARD
            .decode(text.trim())
            .map_err(|e| CryptoError::MalformedInput(format!("invalid base64: {}", e)))?;
        Self::from_bytes(&bytes)
    }
}

impl fmt::Debug for EncryptedBlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptedBlob")
            .field("nonce", &hex::encode(self.nonce))
            .field("ciphertext_len", &self.ciphertext.len())
            .finish()
    }
}

/// Argon2id PIN hash in PHC string form (salt embedded)
pub struct PinHash {
    hash: String,
}

impl PinHash {
    /// Memory: 16 MiB, Iterations: 2, Parallelism: 2
    const ARGON2_PARAMS: (u32, u32, u32) = (16384, 2, 2);

    /// Minimum PIN length
    pub const MIN_PIN_LENGTH: usize = 4;

    /// Maximum PIN length
    pub const MAX_PIN_LENGTH: usize = 8;

    /// Validate PIN format
    pub fn validate(pin: &str) -> Result<(), PinError> {
        if pin.len() < Self::MIN_PIN_LENGTH || pin.len() > Self::MAX_PIN_LENGTH {
            return Err(PinError::InvalidFormat(format!(
                "PIN must be {}-{} digits",
                Self::MIN_PIN_LENGTH,
                Self::MAX_PIN_LENGTH
            )));
        }

        if !pin.chars().all(|c| c.is_ascii_digit()) {
            return Err(PinError::InvalidFormat(
                "PIN must contain only digits".to_string(),
            ));
        }

        Ok(())
    }

    /// Hash PIN with a fresh random salt
    pub fn hash(pin: &str) -> Result<Self, PinError> {
        Self::validate(pin)?;

        let salt = SaltString::generate(&mut OsRng);

        let params = ParamsBuilder::new()
            .m_cost(Self::ARGON2_PARAMS.0)
            .t_cost(Self::ARGON2_PARAMS.1)
            .p_cost(Self::ARGON2_PARAMS.2)
            .build()
            .map_err(|e| PinError::Hash(e.to_string()))?;

        let argon2 = Argon2::new(argon2::Algorithm::Argon2id, Version::V0x13, params);

        let hash = argon2
            .hash_password(pin.as_bytes(), &salt)
            .map_err(|e| PinError::Hash(e.to_string()))?
            .to_string();

        Ok(Self { hash })
    }

    /// Get hash string for storage
    pub fn as_str(&self) -> &str {
        &self.hash
    }
}

/// A PIN hash as found in the settings store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoredPinHash {
    /// Argon2id PHC string
    Argon2(String),
    /// Unsalted base64(SHA-256(pin)) written by older installs
    LegacySha256([u8; 32]),
}

impl StoredPinHash {
    /// Recognize a stored value
    pub fn parse(stored: &str) -> Result<Self, PinError> {
        if stored.starts_with("$argon2") {
            return Ok(Self::Argon2(stored.to_string()));
        }

        let digest = STANDARD
            .decode(stored.trim())
            .map_err(|_| PinError::Hash("unrecognized PIN hash format".to_string()))?;
        if digest.len() != 32 {
            return Err(PinError::Hash("unrecognized PIN hash format".to_string()));
        }
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest);
        Ok(Self::LegacySha256(out))
    }

    /// Whether this record should be rehashed after a successful match
    pub fn is_legacy(&self) -> bool {
        matches!(self, Self::LegacySha256(_))
    }

    /// Check a candidate PIN against this hash
    pub fn verify(&self, pin: &str) -> Result<bool, PinError> {
        match self {
            Self::Argon2(hash) => {
                let parsed =
                    PasswordHash::new(hash).map_err(|e| PinError::Hash(e.to_string()))?;
                Ok(Argon2::default()
                    .verify_password(pin.as_bytes(), &parsed)
                    .is_ok())
            }
            Self::LegacySha256(expected) => {
                let actual = hash_sha256(pin.as_bytes());
                let diff = actual
                    .iter()
                    .zip(expected.iter())
                    .fold(0u8, |acc, (a, b)| acc | (a ^ b));
                Ok(diff == 0)
            }
        }
    }
}

/// Hash data with SHA-256
pub fn hash_sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Legacy PIN record encoding: base64(SHA-256(pin))
pub fn legacy_pin_hash(pin: &str) -> String {
    STANDARD.encode(hash_sha256(pin.as_bytes()))
}
