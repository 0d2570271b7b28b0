//! Vault configuration

use crate::error::SettingsError;
use crate::pin_guard::{LockoutPolicy, LOCKOUT_DURATION, MAX_FAILED_ATTEMPTS};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default database file name
pub const DEFAULT_DATABASE_FILE: &str = "mypasswords.db";

/// Default settings file name
pub const DEFAULT_SETTINGS_FILE: &str = "security_prefs.json";

/// Default key file name for [`crate::FileKeystore`]
pub const DEFAULT_KEYSTORE_FILE: &str = "keystore.json";

fn default_data_dir() -> PathBuf {
    ProjectDirs::from("com", "myapplications", "mypasswords")
        .map(|dirs| dirs.data_local_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Lockout settings as configured
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockoutConfig {
    /// Consecutive failures before locking
    pub max_failed_attempts: u32,
    /// Lockout length in seconds
    pub lockout_duration_secs: u64,
}

impl Default for LockoutConfig {
    fn default() -> Self {
        Self {
            max_failed_attempts: MAX_FAILED_ATTEMPTS,
            lockout_duration_secs: LOCKOUT_DURATION.as_secs(),
        }
    }
}

impl From<&LockoutConfig> for LockoutPolicy {
    fn from(config: &LockoutConfig) -> Self {
        Self {
            max_failed_attempts: config.max_failed_attempts.max(1),
            lockout_duration: Duration::from_secs(config.lockout_duration_secs),
        }
    }
}

/// Where the vault keeps its files, and how PIN lockout behaves
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// Directory holding the database and settings files
    pub data_dir: PathBuf,
    /// Database file name inside `data_dir`
    pub database_file: String,
    /// Settings file name inside `data_dir`
    pub settings_file: String,
    /// Key file name inside `data_dir`, used by [`crate::Vault::open_local`]
    pub keystore_file: String,
    /// Refuse keystores that are not hardware-backed
    pub require_hardware_keys: bool,
    /// PIN lockout
    pub lockout: LockoutConfig,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            database_file: DEFAULT_DATABASE_FILE.to_string(),
            settings_file: DEFAULT_SETTINGS_FILE.to_string(),
            keystore_file: DEFAULT_KEYSTORE_FILE.to_string(),
            require_hardware_keys: false,
            lockout: LockoutConfig::default(),
        }
    }
}

impl VaultConfig {
    /// Default file names under `data_dir`
    pub fn in_dir<P: AsRef<Path>>(data_dir: P) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
            ..Self::default()
        }
    }

    /// Load overrides from a JSON file; missing fields keep their defaults
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, SettingsError> {
        let bytes = std::fs::read(path.as_ref())?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Database file path
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(&self.database_file)
    }

    /// Settings file path
    pub fn settings_path(&self) -> PathBuf {
        self.data_dir.join(&self.settings_file)
    }

    /// Key file path
    pub fn keystore_path(&self) -> PathBuf {
        self.data_dir.join(&self.keystore_file)
    }

    /// Lockout policy
    pub fn lockout_policy(&self) -> LockoutPolicy {
        LockoutPolicy::from(&self.lockout)
    }
}
