//! Error types
//!
//! Each layer has its own taxonomy so callers can tell a tampered blob from a
//! missing key, or a bad passphrase from a store that never opened. Nothing in
//! this crate collapses a failure into an empty or default value.

use std::sync::Arc;

/// Key store and AEAD failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CryptoError {
    /// The key store is inaccessible or the alias has no key
    #[error("Key unavailable: {0}")]
    KeyUnavailable(String),

    /// GCM tag mismatch: corrupted data or wrong key
    #[error("Integrity check failed")]
    IntegrityCheckFailed,

    /// Blob too short, bad encoding, or undecodable plaintext
    #[error("Malformed input: {0}")]
    MalformedInput(String),
}

/// Durable settings store failures
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    /// Underlying file I/O failed
    #[error("Settings I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Settings file could not be parsed or written
    #[error("Settings serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored value does not have the expected shape
    #[error("Invalid settings value for {key}: {value}")]
    InvalidValue {
        /// Settings key
        key: String,
        /// Offending raw value
        value: String,
    },
}

/// Failures while producing the store passphrase
#[derive(Debug, thiserror::Error)]
pub enum PassphraseError {
    /// Encrypting or decrypting the passphrase record failed
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// Reading or writing the passphrase record failed
    #[error(transparent)]
    Settings(#[from] SettingsError),
}

/// Encrypted storage engine failures
#[derive(Debug, thiserror::Error)]
pub enum StoreOpenError {
    /// SQLite / SQLCipher error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The database file exists but cannot be read with this passphrase
    #[error("Encryption error: {0}")]
    Encryption(String),

    /// Schema migration failed
    #[error("Migration error: {0}")]
    Migration(String),
}

/// Vault initialization failures, shared with every waiter
#[derive(Debug, Clone, thiserror::Error)]
pub enum InitError {
    /// The store passphrase could not be recovered
    #[error("Passphrase unavailable: {0}")]
    PassphraseUnavailable(Arc<PassphraseError>),

    /// The encrypted store refused to open
    #[error("Store open failed: {0}")]
    StoreOpenFailed(Arc<StoreOpenError>),

    /// The initialization task ended without publishing an outcome
    #[error("Initialization interrupted: {0}")]
    Interrupted(String),
}

/// Failures while assembling a vault from its configuration
#[derive(Debug, thiserror::Error)]
pub enum OpenError {
    /// Settings file could not be loaded
    #[error(transparent)]
    Settings(#[from] SettingsError),

    /// Key file could not be loaded
    #[error(transparent)]
    Keystore(#[from] CryptoError),

    /// Keys would not survive a restart, stranding the persisted passphrase
    #[error("Keystore does not persist its keys")]
    EphemeralKeystore,

    /// Configuration demands hardware-backed keys and the keystore has none
    #[error("Keystore is not hardware-backed")]
    HardwareRequired,
}

/// A vault operation was invoked before initialization completed
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Vault is not ready; await initialization and retry")]
pub struct NotReadyError;

/// PIN management failures
#[derive(Debug, thiserror::Error)]
pub enum PinError {
    /// A PIN has already been set; it cannot be changed
    #[error("PIN is already set")]
    AlreadySet,

    /// No PIN has been set yet
    #[error("PIN is not set")]
    NotSet,

    /// PIN does not match the required format
    #[error("Invalid PIN: {0}")]
    InvalidFormat(String),

    /// Hashing or parsing a stored hash failed
    #[error("PIN hash error: {0}")]
    Hash(String),

    /// Settings store failure
    #[error(transparent)]
    Settings(#[from] SettingsError),

    /// The blocking worker running the check was lost
    #[error("PIN task failed: {0}")]
    Task(String),
}

/// Repository-level errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Field encryption error
    #[error("Encryption error: {0}")]
    Crypto(#[from] CryptoError),

    /// Vault not initialized
    #[error(transparent)]
    NotReady(#[from] NotReadyError),

    /// Vault initialization failed
    #[error(transparent)]
    Init(#[from] InitError),

    /// Not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// The blocking worker running the query was lost
    #[error("Storage task failed: {0}")]
    Task(String),
}

/// Result type
pub type Result<T> = std::result::Result<T, Error>;
