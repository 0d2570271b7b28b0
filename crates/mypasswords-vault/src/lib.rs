//! PIN-gated encrypted credential vault
//!
//! Local-only storage of username/password credentials organized in folders.
//! Plaintext secrets never reach disk.
//!
//! ## Key hierarchy
//!
//! - **Platform keystore**: non-extractable AES-256-GCM keys addressed by alias
//! - **Store passphrase**: 32 random bytes wrapped under `db-passphrase-key`,
//!   used to key the SQLCipher database
//! - **Credential key**: `credential-key`, encrypts each stored password
//!
//! ## Access control
//!
//! - **PIN**: Argon2id hash, set once
//! - **Lockout**: 5 consecutive failures lock attempts out for 30 seconds
//!
//! ## Initialization
//!
//! [`VaultBootstrap`] opens the store exactly once for any number of concurrent
//! callers and shares the resulting [`VaultHandle`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod bootstrap;
pub mod cipher;
pub mod clock;
pub mod config;
pub mod database;
pub mod error;
pub mod key_vault;
pub mod keystore;
pub mod migrations;
pub mod models;
pub mod passphrase;
pub mod pin_guard;
pub mod repository;
pub mod security;
pub mod settings;
pub mod vault;

pub use bootstrap::{BootstrapState, VaultBootstrap, VaultHandle};
pub use cipher::CredentialCipher;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{LockoutConfig, VaultConfig};
pub use database::{Database, SqlCipherEngine, StorageEngine};
pub use error::{
    CryptoError, Error, InitError, NotReadyError, OpenError, PassphraseError, PinError,
    Result, SettingsError, StoreOpenError,
};
pub use key_vault::{KeyVault, CREDENTIAL_ALIAS, DB_PASSPHRASE_ALIAS};
pub use keystore::{
    FileKeystore, KeyHandle, KeystoreCapabilities, PlatformKeystore, SoftwareKeystore,
};
pub use models::*;
pub use passphrase::{Passphrase, PassphraseProvider, PASSPHRASE_LEN};
pub use pin_guard::{LockoutPolicy, LockoutState, PinGuard, LOCKOUT_DURATION, MAX_FAILED_ATTEMPTS};
pub use repository::Repository;
pub use security::{legacy_pin_hash, EncryptedBlob, Nonce, PinHash, StoredPinHash};
pub use settings::{FileSettings, MemorySettings, Preferences, SettingsStore};
pub use vault::Vault;
