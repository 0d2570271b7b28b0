//! Vault initialization under concurrency

use anyhow::Result;
use mypasswords_vault::{
    BootstrapState, Database, InitError, KeyVault, MemorySettings, NotReadyError, Passphrase,
    PassphraseProvider, PlatformKeystore, SettingsStore, SoftwareKeystore, SqlCipherEngine,
    StorageEngine, StoreOpenError, VaultBootstrap, VaultHandle, DB_PASSPHRASE_ALIAS,
};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::task::JoinHandle;

/// Holds engine opens until the test releases them
struct Gate {
    open: Mutex<bool>,
    released: Condvar,
}

impl Gate {
    fn new(open: bool) -> Self {
        Self {
            open: Mutex::new(open),
            released: Condvar::new(),
        }
    }

    fn wait(&self) {
        let mut open = self.open.lock();
        while !*open {
            self.released.wait(&mut open);
        }
    }

    fn release(&self) {
        *self.open.lock() = true;
        self.released.notify_all();
    }
}

/// Engine that counts opens, optionally fails the first few, and can be held
struct CountingEngine {
    inner: SqlCipherEngine,
    opens: AtomicUsize,
    fail_first: usize,
    gate: Gate,
}

impl CountingEngine {
    fn new(dir: &TempDir, fail_first: usize, gated: bool) -> Self {
        Self {
            inner: SqlCipherEngine::new(dir.path().join("vault.db")),
            opens: AtomicUsize::new(0),
            fail_first,
            gate: Gate::new(!gated),
        }
    }

    fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    fn release(&self) {
        self.gate.release();
    }

    /// Resolve once an open has started and is parked on the gate
    async fn entered(&self) {
        while self.opens() == 0 {
            tokio::task::yield_now().await;
        }
    }
}

impl StorageEngine for CountingEngine {
    fn open(&self, passphrase: &Passphrase) -> Result<Database, StoreOpenError> {
        let n = self.opens.fetch_add(1, Ordering::SeqCst);
        self.gate.wait();
        if n < self.fail_first {
            return Err(StoreOpenError::Encryption("simulated open failure".to_string()));
        }
        self.inner.open(passphrase)
    }
}

struct Fixture {
    _dir: TempDir,
    keystore: Arc<SoftwareKeystore>,
    settings: Arc<MemorySettings>,
    engine: Arc<CountingEngine>,
    bootstrap: Arc<VaultBootstrap>,
}

fn fixture(fail_first: usize, gated: bool) -> Fixture {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let dir = TempDir::new().unwrap();
    let keystore = Arc::new(SoftwareKeystore::new());
    let settings = Arc::new(MemorySettings::new());
    let provider = Arc::new(PassphraseProvider::new(
        KeyVault::new(keystore.clone()),
        settings.clone(),
    ));
    let engine = Arc::new(CountingEngine::new(&dir, fail_first, gated));
    let bootstrap = Arc::new(VaultBootstrap::new(provider, engine.clone()));

    Fixture {
        _dir: dir,
        keystore,
        settings,
        engine,
        bootstrap,
    }
}

/// Spawn `n` callers of `initialize` and return once each has made its call.
///
/// On a current-thread runtime a spawned task only runs when this one yields,
/// and a caller's first poll both bumps `started` and joins the attempt, so
/// `started == n` means every caller is already waiting on the outcome.
async fn spawn_callers(
    bootstrap: &Arc<VaultBootstrap>,
    n: usize,
) -> Vec<JoinHandle<Result<VaultHandle, InitError>>> {
    let started = Arc::new(AtomicUsize::new(0));
    let tasks = (0..n)
        .map(|_| {
            let bootstrap = bootstrap.clone();
            let started = started.clone();
            tokio::spawn(async move {
                started.fetch_add(1, Ordering::SeqCst);
                bootstrap.initialize().await
            })
        })
        .collect();

    while started.load(Ordering::SeqCst) < n {
        tokio::task::yield_now().await;
    }
    tasks
}

#[tokio::test]
async fn test_concurrent_initialize_opens_once() -> Result<()> {
    let f = fixture(0, true);

    let tasks = spawn_callers(&f.bootstrap, 32).await;
    f.engine.entered().await;
    f.engine.release();

    let mut handles = Vec::new();
    for task in tasks {
        handles.push(task.await??);
    }

    assert_eq!(f.engine.opens(), 1);
    assert_eq!(f.bootstrap.attempts(), 1);
    assert!(handles.iter().all(|h| h.same_database(&handles[0])));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_initialize_opens_once_across_workers() -> Result<()> {
    let f = fixture(0, false);

    let tasks: Vec<_> = (0..32)
        .map(|_| {
            let bootstrap = f.bootstrap.clone();
            tokio::spawn(async move { bootstrap.initialize().await })
        })
        .collect();

    let mut handles = Vec::new();
    for task in tasks {
        handles.push(task.await??);
    }

    // Late callers join a settled Ready; none of them opens again
    assert_eq!(f.engine.opens(), 1);
    assert!(handles.iter().all(|h| h.same_database(&handles[0])));
    Ok(())
}

#[tokio::test]
async fn test_concurrent_failure_is_shared() -> Result<()> {
    let f = fixture(1, true);

    let tasks = spawn_callers(&f.bootstrap, 16).await;
    f.engine.entered().await;
    f.engine.release();

    for task in tasks {
        let outcome = task.await?;
        assert!(matches!(outcome, Err(InitError::StoreOpenFailed(_))));
    }
    assert_eq!(f.engine.opens(), 1);
    assert!(matches!(f.bootstrap.state(), BootstrapState::Failed(_)));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_retry_after_failure() -> Result<()> {
    let f = fixture(1, false);

    assert!(f.bootstrap.initialize().await.is_err());
    assert_eq!(f.bootstrap.handle().unwrap_err(), NotReadyError);

    // await_ready reports the settled failure without retrying
    assert!(f.bootstrap.await_ready().await.is_err());
    assert_eq!(f.engine.opens(), 1);

    let handle = f.bootstrap.initialize().await?;
    assert_eq!(f.engine.opens(), 2);
    assert_eq!(f.bootstrap.attempts(), 2);
    assert!(f.bootstrap.handle()?.same_database(&handle));
    Ok(())
}

#[tokio::test]
async fn test_not_ready_before_initialization() -> Result<()> {
    let f = fixture(0, true);
    assert!(matches!(f.bootstrap.state(), BootstrapState::Uninitialized));
    assert_eq!(f.bootstrap.handle().unwrap_err(), NotReadyError);

    let bootstrap = f.bootstrap.clone();
    let pending = tokio::spawn(async move { bootstrap.initialize().await });

    // The open is parked, so the attempt cannot have settled
    f.engine.entered().await;
    assert!(matches!(f.bootstrap.state(), BootstrapState::Initializing));
    assert_eq!(f.bootstrap.handle().unwrap_err(), NotReadyError);

    f.engine.release();
    pending.await??;
    assert!(matches!(f.bootstrap.state(), BootstrapState::Ready));
    f.bootstrap.handle()?;
    Ok(())
}

#[tokio::test]
async fn test_cancelled_caller_does_not_cancel_initialization() -> Result<()> {
    let f = fixture(0, true);

    let bootstrap = f.bootstrap.clone();
    let caller = tokio::spawn(async move { bootstrap.initialize().await });
    f.engine.entered().await;
    caller.abort();
    assert!(caller.await.is_err());

    f.engine.release();
    let handle = f.bootstrap.await_ready().await?;
    assert!(f.bootstrap.handle()?.same_database(&handle));
    assert_eq!(f.engine.opens(), 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_missing_passphrase_key_is_passphrase_unavailable() -> Result<()> {
    let f = fixture(0, false);

    // Persist a passphrase record, then lose the key that wraps it
    PassphraseProvider::new(KeyVault::new(f.keystore.clone()), f.settings.clone())
        .get_passphrase()?;
    f.keystore.delete_key(DB_PASSPHRASE_ALIAS)?;

    let outcome = f.bootstrap.initialize().await;
    assert!(matches!(outcome, Err(InitError::PassphraseUnavailable(_))));
    assert_eq!(f.engine.opens(), 0);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_reopen_with_persisted_passphrase() -> Result<()> {
    let dir = TempDir::new()?;
    let keystore: Arc<dyn PlatformKeystore> = Arc::new(SoftwareKeystore::new());
    let settings: Arc<dyn SettingsStore> = Arc::new(MemorySettings::new());

    let open = || {
        let provider = Arc::new(PassphraseProvider::new(
            KeyVault::new(keystore.clone()),
            settings.clone(),
        ));
        let engine = Arc::new(SqlCipherEngine::new(dir.path().join("vault.db")));
        Arc::new(VaultBootstrap::new(provider, engine))
    };

    let first = open().initialize().await?;
    first
        .conn()
        .execute("INSERT INTO folders (id, name) VALUES ('f', 'Work')", [])?;
    drop(first);

    let second = open().initialize().await?;
    let name: String =
        second
            .conn()
            .query_row("SELECT name FROM folders WHERE id = 'f'", [], |row| row.get(0))?;
    assert_eq!(name, "Work");
    Ok(())
}
