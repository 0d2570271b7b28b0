//! Embedded vault API
//!
//! [`Vault`] wires the key hierarchy, PIN guard and bootstrap together and is
//! the surface the UI layer calls. It is cheap to clone; every clone shares
//! the same components.

use crate::bootstrap::{BootstrapState, VaultBootstrap, VaultHandle};
use crate::cipher::CredentialCipher;
use crate::clock::{Clock, SystemClock};
use crate::config::VaultConfig;
use crate::database::{SqlCipherEngine, StorageEngine};
use crate::error::{CryptoError, InitError, NotReadyError, OpenError, PinError};
use crate::key_vault::KeyVault;
use crate::keystore::{FileKeystore, PlatformKeystore};
use crate::passphrase::PassphraseProvider;
use crate::pin_guard::{LockoutPolicy, PinGuard};
use crate::repository::Repository;
use crate::security::EncryptedBlob;
use crate::settings::{FileSettings, SettingsStore};
use std::sync::Arc;
use std::time::Duration;
use zeroize::Zeroizing;

/// PIN-gated encrypted credential vault
#[derive(Clone)]
pub struct Vault {
    pins: Arc<PinGuard>,
    cipher: CredentialCipher,
    bootstrap: Arc<VaultBootstrap>,
}

impl Vault {
    /// Vault backed by files under `config.data_dir`
    ///
    /// The passphrase record is persisted, so the keystore must persist its
    /// keys too; an ephemeral keystore is refused.
    pub fn open(
        config: &VaultConfig,
        keystore: Arc<dyn PlatformKeystore>,
    ) -> Result<Self, OpenError> {
        let capabilities = keystore.capabilities();
        tracing::info!(
            os = std::env::consts::OS,
            hardware_backed = capabilities.hardware_backed,
            persistent = capabilities.persistent,
            "Keystore capabilities"
        );
        if !capabilities.persistent {
            return Err(OpenError::EphemeralKeystore);
        }
        if config.require_hardware_keys && !capabilities.hardware_backed {
            return Err(OpenError::HardwareRequired);
        }

        let settings = Arc::new(FileSettings::open(config.settings_path())?);
        let engine = Arc::new(SqlCipherEngine::new(config.database_path()));

        tracing::debug!(data_dir = %config.data_dir.display(), "Opening vault");

        Ok(Self::from_parts(
            keystore,
            settings,
            engine,
            Arc::new(SystemClock),
            config.lockout_policy(),
        ))
    }

    /// Vault whose keys live in a [`FileKeystore`] at `config.keystore_path()`
    pub fn open_local(config: &VaultConfig) -> Result<Self, OpenError> {
        let keystore = FileKeystore::open(config.keystore_path())?;
        Self::open(config, Arc::new(keystore))
    }

    /// Vault over explicit components
    pub fn from_parts(
        keystore: Arc<dyn PlatformKeystore>,
        settings: Arc<dyn SettingsStore>,
        engine: Arc<dyn StorageEngine>,
        clock: Arc<dyn Clock>,
        policy: LockoutPolicy,
    ) -> Self {
        let keys = KeyVault::new(keystore);
        let passphrase = Arc::new(PassphraseProvider::new(keys.clone(), Arc::clone(&settings)));

        Self {
            pins: Arc::new(PinGuard::new(settings, clock, policy)),
            cipher: CredentialCipher::new(keys),
            bootstrap: Arc::new(VaultBootstrap::new(passphrase, engine)),
        }
    }

    /// Open the encrypted store, or join the attempt in flight
    pub async fn initialize(&self) -> Result<VaultHandle, InitError> {
        self.bootstrap.initialize().await
    }

    /// Wait until the store is open
    pub async fn await_vault_ready(&self) -> Result<VaultHandle, InitError> {
        self.bootstrap.await_ready().await
    }

    /// Bootstrap state
    pub fn state(&self) -> BootstrapState {
        self.bootstrap.state()
    }

    /// Whether a PIN has been set
    pub async fn is_pin_set(&self) -> Result<bool, PinError> {
        self.with_pins(|pins| pins.is_pin_set()).await
    }

    /// Set the PIN (once)
    pub async fn set_pin(&self, pin: &str) -> Result<(), PinError> {
        let pin = Zeroizing::new(pin.to_string());
        self.with_pins(move |pins| pins.set_pin(&pin)).await
    }

    /// Check a PIN attempt; `false` while locked out
    pub async fn verify_pin(&self, pin: &str) -> Result<bool, PinError> {
        let pin = Zeroizing::new(pin.to_string());
        self.with_pins(move |pins| pins.verify_pin(&pin)).await
    }

    /// Whether PIN attempts are currently refused
    pub async fn is_locked_out(&self) -> Result<bool, PinError> {
        self.with_pins(|pins| pins.is_locked_out()).await
    }

    /// Time until PIN attempts are accepted again
    pub async fn lockout_remaining(&self) -> Result<Duration, PinError> {
        self.with_pins(|pins| pins.lockout_remaining()).await
    }

    /// Encrypt a credential field
    pub fn encrypt_field(&self, plain: &[u8]) -> Result<EncryptedBlob, CryptoError> {
        self.cipher.encrypt_field(plain)
    }

    /// Decrypt a credential field
    pub fn decrypt_field(&self, blob: &EncryptedBlob) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        self.cipher.decrypt_field(blob)
    }

    /// Repository over the open store
    pub fn repository(&self) -> Result<Repository, NotReadyError> {
        Ok(Repository::new(self.bootstrap.handle()?, self.cipher.clone()))
    }

    /// Repository, waiting for the store to open first
    pub async fn ready_repository(&self) -> Result<Repository, InitError> {
        let handle = self.bootstrap.await_ready().await?;
        Ok(Repository::new(handle, self.cipher.clone()))
    }

    // Argon2 and settings I/O stay off the async workers.
    async fn with_pins<T, F>(&self, f: F) -> Result<T, PinError>
    where
        T: Send + 'static,
        F: FnOnce(&PinGuard) -> Result<T, PinError> + Send + 'static,
    {
        let pins = Arc::clone(&self.pins);
        tokio::task::spawn_blocking(move || f(&pins))
            .await
            .map_err(|e| PinError::Task(e.to_string()))?
    }
}
