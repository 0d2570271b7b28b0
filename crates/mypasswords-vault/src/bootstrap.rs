//! Exactly-once vault initialization
//!
//! Any number of callers may ask for the vault concurrently. The first caller
//! to move the phase out of `Uninitialized` (or `Failed`) claims the attempt
//! and spawns the work onto the runtime; every caller, including the claimant,
//! then waits on the same `watch` channel for the outcome. The claim and the
//! phase change are one atomic step on the channel's value, so a waiter can
//! never observe a stale outcome from a previous attempt as the result of a
//! new one.
//!
//! The attempt runs in a detached task: cancelling a waiting caller does not
//! cancel initialization.

use crate::database::{Database, StorageEngine};
use crate::error::{InitError, NotReadyError};
use crate::passphrase::PassphraseProvider;
use parking_lot::MutexGuard;
use rusqlite::Connection;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

/// Shared handle to the opened vault database
#[derive(Clone)]
pub struct VaultHandle {
    db: Arc<Database>,
}

impl VaultHandle {
    pub(crate) fn new(db: Database) -> Self {
        Self { db: Arc::new(db) }
    }

    /// Underlying database
    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Lock the connection
    pub fn conn(&self) -> MutexGuard<'_, Connection> {
        self.db.conn()
    }

    /// Whether both handles refer to the same opened database
    pub fn same_database(&self, other: &VaultHandle) -> bool {
        Arc::ptr_eq(&self.db, &other.db)
    }
}

impl fmt::Debug for VaultHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VaultHandle")
            .field("path", &self.db.path())
            .finish()
    }
}

/// Observable bootstrap state
#[derive(Debug, Clone)]
pub enum BootstrapState {
    /// No attempt has been made
    Uninitialized,
    /// An attempt is in flight
    Initializing,
    /// The vault is open
    Ready,
    /// The last attempt failed; the next `initialize` retries
    Failed(InitError),
}

enum Phase {
    Uninitialized,
    Initializing,
    Ready(VaultHandle),
    Failed(InitError),
}

impl Phase {
    fn is_settled(&self) -> bool {
        matches!(self, Phase::Ready(_) | Phase::Failed(_))
    }
}

/// Opens the vault once and shares the handle
pub struct VaultBootstrap {
    passphrase: Arc<PassphraseProvider>,
    engine: Arc<dyn StorageEngine>,
    phase: watch::Sender<Phase>,
    attempts: AtomicU64,
}

impl VaultBootstrap {
    /// Create an uninitialized bootstrap
    pub fn new(passphrase: Arc<PassphraseProvider>, engine: Arc<dyn StorageEngine>) -> Self {
        let (phase, _) = watch::channel(Phase::Uninitialized);
        Self {
            passphrase,
            engine,
            phase,
            attempts: AtomicU64::new(0),
        }
    }

    /// Open the vault, or wait for the attempt already in flight.
    ///
    /// Returns the shared handle once ready. After a failure the next call
    /// starts a fresh attempt.
    pub async fn initialize(self: &Arc<Self>) -> Result<VaultHandle, InitError> {
        let mut rx = self.phase.subscribe();

        if self.try_claim() {
            let this = Arc::clone(self);
            tokio::spawn(async move { this.run_attempt().await });
        }

        Self::wait_settled(&mut rx).await
    }

    /// Wait for the vault without forcing a retry.
    ///
    /// Starts the first attempt if none has been made; a settled failure is
    /// returned as-is.
    pub async fn await_ready(self: &Arc<Self>) -> Result<VaultHandle, InitError> {
        let uninitialized = matches!(*self.phase.borrow(), Phase::Uninitialized);
        if uninitialized {
            return self.initialize().await;
        }

        let mut rx = self.phase.subscribe();
        Self::wait_settled(&mut rx).await
    }

    /// Handle if the vault is open
    pub fn handle(&self) -> Result<VaultHandle, NotReadyError> {
        match &*self.phase.borrow() {
            Phase::Ready(handle) => Ok(handle.clone()),
            _ => Err(NotReadyError),
        }
    }

    /// Current state
    pub fn state(&self) -> BootstrapState {
        match &*self.phase.borrow() {
            Phase::Uninitialized => BootstrapState::Uninitialized,
            Phase::Initializing => BootstrapState::Initializing,
            Phase::Ready(_) => BootstrapState::Ready,
            Phase::Failed(e) => BootstrapState::Failed(e.clone()),
        }
    }

    /// Number of attempts started so far
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }

    fn try_claim(&self) -> bool {
        self.phase.send_if_modified(|phase| match phase {
            Phase::Uninitialized | Phase::Failed(_) => {
                *phase = Phase::Initializing;
                true
            }
            Phase::Initializing | Phase::Ready(_) => false,
        })
    }

    async fn run_attempt(self: Arc<Self>) {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::info!(attempt, "Initializing vault");

        let passphrase = Arc::clone(&self.passphrase);
        let engine = Arc::clone(&self.engine);
        let outcome =
            match tokio::task::spawn_blocking(move || open_vault(&passphrase, engine.as_ref()))
                .await
            {
                Ok(outcome) => outcome,
                Err(e) => Err(InitError::Interrupted(e.to_string())),
            };

        let next = match outcome {
            Ok(handle) => {
                tracing::info!(attempt, "Vault ready");
                Phase::Ready(handle)
            }
            Err(e) => {
                tracing::error!(attempt, error = %e, "Vault initialization failed");
                Phase::Failed(e)
            }
        };
        self.phase.send_replace(next);
    }

    async fn wait_settled(rx: &mut watch::Receiver<Phase>) -> Result<VaultHandle, InitError> {
        let phase = rx
            .wait_for(Phase::is_settled)
            .await
            .map_err(|_| InitError::Interrupted("bootstrap was dropped".to_string()))?;

        match &*phase {
            Phase::Ready(handle) => Ok(handle.clone()),
            Phase::Failed(e) => Err(e.clone()),
            Phase::Uninitialized | Phase::Initializing => Err(InitError::Interrupted(
                "initialization did not settle".to_string(),
            )),
        }
    }
}

fn open_vault(
    passphrase: &PassphraseProvider,
    engine: &dyn StorageEngine,
) -> Result<VaultHandle, InitError> {
    let secret = passphrase
        .get_passphrase()
        .map_err(|e| InitError::PassphraseUnavailable(Arc::new(e)))?;
    let db = engine
        .open(&secret)
        .map_err(|e| InitError::StoreOpenFailed(Arc::new(e)))?;
    Ok(VaultHandle::new(db))
}
