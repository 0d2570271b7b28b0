//! PIN authentication and brute-force lockout
//!
//! The PIN is set once and never changed. After
//! [`LockoutPolicy::max_failed_attempts`] consecutive failures the guard
//! refuses every attempt until the lockout expires; attempts made while
//! locked are rejected without being counted. Imposing a lockout resets the
//! failure counter, so each lockout starts a fresh run of attempts.

use crate::clock::Clock;
use crate::error::{PinError, SettingsError};
use crate::security::{PinHash, StoredPinHash};
use crate::settings::{keys, parse_value, Preferences, SettingsStore};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

/// Failed attempts that trigger a lockout
pub const MAX_FAILED_ATTEMPTS: u32 = 5;

/// How long a lockout lasts
pub const LOCKOUT_DURATION: Duration = Duration::from_secs(30);

/// Lockout tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockoutPolicy {
    /// Consecutive failures before locking
    pub max_failed_attempts: u32,
    /// Length of each lockout
    pub lockout_duration: Duration,
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self {
            max_failed_attempts: MAX_FAILED_ATTEMPTS,
            lockout_duration: LOCKOUT_DURATION,
        }
    }
}

/// Persisted lockout counters
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LockoutState {
    /// Consecutive failed attempts since the last success or lockout
    pub failed_attempts: u32,
    /// Lockout end in epoch milliseconds, 0 when none was imposed
    pub lockout_until: i64,
}

impl LockoutState {
    fn load(prefs: &Preferences) -> Result<Self, SettingsError> {
        Ok(Self {
            failed_attempts: parse_value(prefs, keys::FAILED_ATTEMPTS)?.unwrap_or(0),
            lockout_until: parse_value(prefs, keys::LOCKOUT_UNTIL)?.unwrap_or(0),
        })
    }

    fn store(&self, prefs: &mut Preferences) {
        if self.failed_attempts == 0 {
            prefs.remove(keys::FAILED_ATTEMPTS);
        } else {
            prefs.insert(
                keys::FAILED_ATTEMPTS.to_string(),
                self.failed_attempts.to_string(),
            );
        }

        if self.lockout_until == 0 {
            prefs.remove(keys::LOCKOUT_UNTIL);
        } else {
            prefs.insert(
                keys::LOCKOUT_UNTIL.to_string(),
                self.lockout_until.to_string(),
            );
        }
    }

    /// Whether a lockout is in force at `now`
    pub fn is_locked_at(&self, now: i64) -> bool {
        self.lockout_until != 0 && now < self.lockout_until
    }

    /// Time left on the lockout at `now`
    pub fn remaining_at(&self, now: i64) -> Duration {
        if !self.is_locked_at(now) {
            return Duration::ZERO;
        }
        Duration::from_millis(u64::try_from(self.lockout_until - now).unwrap_or(0))
    }
}

/// Gatekeeper for PIN setup, verification and lockout
pub struct PinGuard {
    settings: Arc<dyn SettingsStore>,
    clock: Arc<dyn Clock>,
    policy: LockoutPolicy,
}

impl PinGuard {
    /// Create a guard over `settings`
    pub fn new(
        settings: Arc<dyn SettingsStore>,
        clock: Arc<dyn Clock>,
        policy: LockoutPolicy,
    ) -> Self {
        Self {
            settings,
            clock,
            policy,
        }
    }

    /// Active lockout policy
    pub fn policy(&self) -> LockoutPolicy {
        self.policy
    }

    /// Whether a PIN has been set
    pub fn is_pin_set(&self) -> Result<bool, PinError> {
        Ok(self.settings.get(keys::PIN_HASH)?.is_some())
    }

    /// Set the PIN. Allowed exactly once.
    pub fn set_pin(&self, pin: &str) -> Result<(), PinError> {
        if self.is_pin_set()? {
            return Err(PinError::AlreadySet);
        }

        let hash = PinHash::hash(pin)?;

        let mut already_set = false;
        self.settings.edit(&mut |prefs| {
            if prefs.contains_key(keys::PIN_HASH) {
                already_set = true;
            } else {
                prefs.insert(keys::PIN_HASH.to_string(), hash.as_str().to_string());
            }
        })?;

        if already_set {
            return Err(PinError::AlreadySet);
        }

        tracing::info!("PIN set");
        Ok(())
    }

    /// Check a PIN attempt.
    ///
    /// Returns `false` without consuming an attempt while locked out. The
    /// hash comparison runs before any counter is touched; the counter update
    /// is a single read-modify-write that re-checks the lockout, so racing
    /// attempts are neither lost nor counted against an active lockout.
    pub fn verify_pin(&self, pin: &str) -> Result<bool, PinError> {
        let prefs = self.settings.snapshot()?;
        if LockoutState::load(&prefs)?.is_locked_at(self.clock.now_millis()) {
            tracing::debug!("PIN attempt rejected during lockout");
            return Ok(false);
        }

        let stored = prefs.get(keys::PIN_HASH).ok_or(PinError::NotSet)?;
        let stored = StoredPinHash::parse(stored)?;
        let matched = stored.verify(pin)?;

        let upgraded = if matched && stored.is_legacy() {
            Some(PinHash::hash(pin)?)
        } else {
            None
        };

        let mut accepted = false;
        let mut imposed_until = None;
        let mut load_error = None;

        self.settings.edit(&mut |prefs| {
            let now = self.clock.now_millis();
            let mut state = match LockoutState::load(prefs) {
                Ok(state) => state,
                Err(e) => {
                    load_error = Some(e);
                    return;
                }
            };

            if state.is_locked_at(now) {
                return;
            }

            if matched {
                state = LockoutState::default();
                if let Some(hash) = &upgraded {
                    prefs.insert(keys::PIN_HASH.to_string(), hash.as_str().to_string());
                }
                accepted = true;
            } else {
                state.lockout_until = 0;
                state.failed_attempts = state.failed_attempts.saturating_add(1);
                if state.failed_attempts >= self.policy.max_failed_attempts {
                    let duration =
                        i64::try_from(self.policy.lockout_duration.as_millis()).unwrap_or(i64::MAX);
                    state.lockout_until = now.saturating_add(duration);
                    state.failed_attempts = 0;
                    imposed_until = Some(state.lockout_until);
                }
            }

            state.store(prefs);
        })?;

        if let Some(e) = load_error {
            return Err(e.into());
        }

        if let Some(until) = imposed_until {
            tracing::warn!(
                lockout_until = until,
                "Too many failed PIN attempts, locking out"
            );
        } else if accepted && upgraded.is_some() {
            tracing::info!("Upgraded legacy PIN hash to Argon2id");
        }

        Ok(accepted)
    }

    /// Current persisted lockout counters
    pub fn lockout_state(&self) -> Result<LockoutState, PinError> {
        Ok(LockoutState::load(&self.settings.snapshot()?)?)
    }

    /// Whether attempts are currently refused
    pub fn is_locked_out(&self) -> Result<bool, PinError> {
        Ok(self.lockout_state()?.is_locked_at(self.clock.now_millis()))
    }

    /// Time left until attempts are accepted again
    pub fn lockout_remaining(&self) -> Result<Duration, PinError> {
        Ok(self.lockout_state()?.remaining_at(self.clock.now_millis()))
    }

    /// End of the active lockout, if any
    pub fn lockout_until(&self) -> Result<Option<DateTime<Utc>>, PinError> {
        let state = self.lockout_state()?;
        if !state.is_locked_at(self.clock.now_millis()) {
            return Ok(None);
        }
        Ok(DateTime::from_timestamp_millis(state.lockout_until))
    }
}
