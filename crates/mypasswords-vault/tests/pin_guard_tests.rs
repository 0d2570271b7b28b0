//! PIN setup, verification and lockout tests

use mypasswords_vault::settings::keys;
use mypasswords_vault::{
    legacy_pin_hash, FileSettings, LockoutPolicy, LockoutState, ManualClock, MemorySettings,
    PinError, PinGuard, SettingsStore, LOCKOUT_DURATION, MAX_FAILED_ATTEMPTS,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const START: i64 = 1_700_000_000_000;

fn guard_with(settings: Arc<dyn SettingsStore>) -> (PinGuard, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(START));
    let guard = PinGuard::new(settings, clock.clone(), LockoutPolicy::default());
    (guard, clock)
}

fn guard() -> (PinGuard, Arc<ManualClock>) {
    guard_with(Arc::new(MemorySettings::new()))
}

#[test]
fn test_lockout_scenario() {
    let (guard, clock) = guard();
    guard.set_pin("123456").unwrap();

    for _ in 0..5 {
        assert!(!guard.verify_pin("654321").unwrap());
    }
    assert!(guard.is_locked_out().unwrap());
    assert!(guard.lockout_remaining().unwrap() > Duration::ZERO);

    clock.advance(LOCKOUT_DURATION + Duration::from_millis(1));
    assert!(!guard.is_locked_out().unwrap());
    assert!(guard.verify_pin("123456").unwrap());
}

#[test]
fn test_lockout_threshold_is_exact() {
    let (guard, _) = guard();
    guard.set_pin("1234").unwrap();

    for attempt in 1..MAX_FAILED_ATTEMPTS {
        assert!(!guard.verify_pin("0000").unwrap());
        assert!(!guard.is_locked_out().unwrap(), "locked after {attempt} attempts");
        assert_eq!(guard.lockout_state().unwrap().failed_attempts, attempt);
    }

    assert!(!guard.verify_pin("0000").unwrap());
    assert!(guard.is_locked_out().unwrap());
}

#[test]
fn test_attempts_during_lockout_are_not_counted() {
    let (guard, _) = guard();
    guard.set_pin("1234").unwrap();
    for _ in 0..MAX_FAILED_ATTEMPTS {
        guard.verify_pin("0000").unwrap();
    }
    let locked = guard.lockout_state().unwrap();
    assert_eq!(locked.failed_attempts, 0);

    // Correct PIN is refused while locked, wrong PIN is not counted
    assert!(!guard.verify_pin("1234").unwrap());
    assert!(!guard.verify_pin("0000").unwrap());
    assert_eq!(guard.lockout_state().unwrap(), locked);
}

#[test]
fn test_remaining_counts_down() {
    let (guard, clock) = guard();
    guard.set_pin("1234").unwrap();
    for _ in 0..MAX_FAILED_ATTEMPTS {
        guard.verify_pin("0000").unwrap();
    }

    assert_eq!(guard.lockout_remaining().unwrap(), LOCKOUT_DURATION);
    clock.advance(Duration::from_secs(10));
    assert_eq!(
        guard.lockout_remaining().unwrap(),
        LOCKOUT_DURATION - Duration::from_secs(10)
    );
    clock.advance(Duration::from_secs(20));
    assert_eq!(guard.lockout_remaining().unwrap(), Duration::ZERO);
    assert!(!guard.is_locked_out().unwrap());
}

#[test]
fn test_new_run_after_expired_lockout() {
    let (guard, clock) = guard();
    guard.set_pin("1234").unwrap();
    for _ in 0..MAX_FAILED_ATTEMPTS {
        guard.verify_pin("0000").unwrap();
    }
    clock.advance(LOCKOUT_DURATION);

    assert!(!guard.verify_pin("0000").unwrap());
    assert_eq!(
        guard.lockout_state().unwrap(),
        LockoutState {
            failed_attempts: 1,
            lockout_until: 0,
        }
    );

    for _ in 1..MAX_FAILED_ATTEMPTS {
        guard.verify_pin("0000").unwrap();
    }
    assert!(guard.is_locked_out().unwrap());
}

#[test]
fn test_pin_is_set_once() {
    let (guard, _) = guard();
    assert!(!guard.is_pin_set().unwrap());
    assert!(matches!(guard.verify_pin("1234"), Err(PinError::NotSet)));

    guard.set_pin("1234").unwrap();
    assert!(matches!(guard.set_pin("9999"), Err(PinError::AlreadySet)));
    assert!(guard.verify_pin("1234").unwrap());
    assert!(!guard.verify_pin("9999").unwrap());
}

#[test]
fn test_invalid_pin_is_not_stored() {
    let (guard, _) = guard();
    assert!(matches!(guard.set_pin("12"), Err(PinError::InvalidFormat(_))));
    assert!(matches!(guard.set_pin("abcd"), Err(PinError::InvalidFormat(_))));
    assert!(!guard.is_pin_set().unwrap());
}

#[test]
fn test_pin_is_never_stored_in_plaintext() {
    let settings = Arc::new(MemorySettings::new());
    let (guard, _) = guard_with(settings.clone());
    guard.set_pin("246810").unwrap();

    let stored = settings.get(keys::PIN_HASH).unwrap().unwrap();
    assert!(!stored.contains("246810"));
    assert!(stored.starts_with("$argon2id$"));
}

#[test]
fn test_legacy_hash_upgraded_on_success() {
    let settings = Arc::new(MemorySettings::new());
    settings
        .edit(&mut |prefs| {
            prefs.insert(keys::PIN_HASH.to_string(), legacy_pin_hash("1357"));
        })
        .unwrap();
    let (guard, _) = guard_with(settings.clone());

    assert!(guard.is_pin_set().unwrap());
    assert!(!guard.verify_pin("2468").unwrap());
    assert_eq!(
        settings.get(keys::PIN_HASH).unwrap().unwrap(),
        legacy_pin_hash("1357")
    );

    assert!(guard.verify_pin("1357").unwrap());
    let upgraded = settings.get(keys::PIN_HASH).unwrap().unwrap();
    assert!(upgraded.starts_with("$argon2id$"));
    assert!(guard.verify_pin("1357").unwrap());
}

#[test]
fn test_lockout_survives_restart() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("security_prefs.json");

    {
        let (guard, _) = guard_with(Arc::new(FileSettings::open(&path).unwrap()));
        guard.set_pin("1234").unwrap();
        for _ in 0..MAX_FAILED_ATTEMPTS {
            guard.verify_pin("0000").unwrap();
        }
        assert!(guard.is_locked_out().unwrap());
    }

    let (guard, clock) = guard_with(Arc::new(FileSettings::open(&path).unwrap()));
    assert!(guard.is_pin_set().unwrap());
    assert!(guard.is_locked_out().unwrap());
    assert!(!guard.verify_pin("1234").unwrap());

    clock.advance(LOCKOUT_DURATION);
    assert!(guard.verify_pin("1234").unwrap());
}

#[test]
fn test_concurrent_failures_are_all_counted() {
    let guard = Arc::new(
        PinGuard::new(
            Arc::new(MemorySettings::new()),
            Arc::new(ManualClock::new(START)),
            LockoutPolicy {
                max_failed_attempts: 100,
                lockout_duration: LOCKOUT_DURATION,
            },
        ),
    );
    guard.set_pin("1234").unwrap();

    let threads: Vec<_> = (0..4)
        .map(|_| {
            let guard = guard.clone();
            std::thread::spawn(move || {
                for _ in 0..3 {
                    assert!(!guard.verify_pin("0000").unwrap());
                }
            })
        })
        .collect();
    for thread in threads {
        thread.join().unwrap();
    }

    assert_eq!(guard.lockout_state().unwrap().failed_attempts, 12);
}

#[test]
fn test_concurrent_failures_lock_out_once() {
    let (guard, _) = guard();
    let guard = Arc::new(guard);
    guard.set_pin("1234").unwrap();

    let threads: Vec<_> = (0..MAX_FAILED_ATTEMPTS + 3)
        .map(|_| {
            let guard = guard.clone();
            std::thread::spawn(move || guard.verify_pin("0000").unwrap())
        })
        .collect();
    for thread in threads {
        assert!(!thread.join().unwrap());
    }

    // Attempts that landed after the lockout were not counted
    assert!(guard.is_locked_out().unwrap());
    assert_eq!(guard.lockout_state().unwrap().failed_attempts, 0);
}
