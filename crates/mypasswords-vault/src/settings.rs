//! Durable key-value settings
//!
//! Holds the PIN hash, lockout counters and the wrapped database passphrase.
//! Every mutation goes through [`SettingsStore::edit`], which applies a
//! closure to the full preference map as one atomic read-modify-write.

use crate::error::SettingsError;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Preference map as persisted
pub type Preferences = BTreeMap<String, String>;

/// Settings keys
pub mod keys {
    /// Argon2id (or legacy SHA-256) PIN hash
    pub const PIN_HASH: &str = "pin-hash";
    /// Consecutive failed PIN attempts
    pub const FAILED_ATTEMPTS: &str = "failed-attempts";
    /// Lockout end, epoch milliseconds
    pub const LOCKOUT_UNTIL: &str = "lockout-until";
    /// Database passphrase wrapped under the passphrase key
    pub const ENCRYPTED_DB_PASSPHRASE: &str = "encrypted-db-passphrase";
}

/// Durable settings storage with atomic read-modify-write
pub trait SettingsStore: Send + Sync {
    /// Consistent copy of all preferences
    fn snapshot(&self) -> Result<Preferences, SettingsError>;

    /// Apply `f` to the preferences and persist the result atomically.
    ///
    /// Concurrent edits are serialized; if persisting fails no change is
    /// visible.
    fn edit(&self, f: &mut dyn FnMut(&mut Preferences)) -> Result<(), SettingsError>;

    /// Read a single value
    fn get(&self, key: &str) -> Result<Option<String>, SettingsError> {
        Ok(self.snapshot()?.remove(key))
    }
}

/// In-memory settings for tests and ephemeral sessions
#[derive(Default)]
pub struct MemorySettings {
    prefs: Mutex<Preferences>,
}

impl MemorySettings {
    /// Create empty settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Create pre-populated settings
    pub fn with_preferences(prefs: Preferences) -> Self {
        Self {
            prefs: Mutex::new(prefs),
        }
    }
}

impl SettingsStore for MemorySettings {
    fn snapshot(&self) -> Result<Preferences, SettingsError> {
        Ok(self.prefs.lock().clone())
    }

    fn edit(&self, f: &mut dyn FnMut(&mut Preferences)) -> Result<(), SettingsError> {
        f(&mut self.prefs.lock());
        Ok(())
    }
}

/// JSON file settings
///
/// Writes go to a temporary file in the same directory which is then renamed
/// over the target, so a crash never leaves a half-written file.
pub struct FileSettings {
    path: PathBuf,
    prefs: Mutex<Preferences>,
}

impl FileSettings {
    /// Open (or lazily create) settings at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, SettingsError> {
        let path = path.as_ref().to_path_buf();
        let prefs = match std::fs::read(&path) {
            Ok(bytes) if bytes.is_empty() => Preferences::new(),
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Preferences::new(),
            Err(e) => return Err(e.into()),
        };

        tracing::debug!(path = %path.display(), entries = prefs.len(), "Loaded settings");

        Ok(Self {
            path,
            prefs: Mutex::new(prefs),
        })
    }

    /// Settings file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, prefs: &Preferences) -> Result<(), SettingsError> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;

        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        serde_json::to_writer_pretty(&mut tmp, prefs)?;
        tmp.as_file_mut().sync_all()?;
        tmp.persist(&self.path).map_err(|e| SettingsError::Io(e.error))?;
        Ok(())
    }
}

impl SettingsStore for FileSettings {
    fn snapshot(&self) -> Result<Preferences, SettingsError> {
        Ok(self.prefs.lock().clone())
    }

    fn edit(&self, f: &mut dyn FnMut(&mut Preferences)) -> Result<(), SettingsError> {
        let mut current = self.prefs.lock();
        let mut next = current.clone();
        f(&mut next);

        if next != *current {
            self.persist(&next)?;
            *current = next;
        }
        Ok(())
    }
}

/// Parse an optional integer setting
pub(crate) fn parse_value<T: std::str::FromStr>(
    prefs: &Preferences,
    key: &str,
) -> Result<Option<T>, SettingsError> {
    match prefs.get(key) {
        None => Ok(None),
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| SettingsError::InvalidValue {
                key: key.to_string(),
                value: raw.clone(),
            }),
    }
}
