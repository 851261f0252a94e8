//! Store lifecycle
//!
//! Startup is a strict sequence: open the one connection, run the
//! pre-allocation protocol, then bring up the cache, history and temp tables
//! in that order. [`UnopenedStore::connect`] consumes the configuration and
//! either returns a fully initialized [`Store`] or a [`StartupError`]; there
//! is no value that represents a half-started store.

use anyhow::Result;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{error, info};

use crate::config::StoreConfig;
use crate::database::core::{DatabaseConn, DatabaseStats, PreallocOutcome, PreallocStep};
use crate::database::tables::{CacheTable, HistoryTable, TableManager, TempTable};
use crate::error::StartupError;

/// Startup states, in the order a successful startup passes through them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    Uninitialized,
    Connected,
    PreAllocated,
    Ready,
    /// Terminal; the store must be discarded
    Failed,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Uninitialized => "uninitialized",
            LifecycleState::Connected => "connected",
            LifecycleState::PreAllocated => "pre-allocated",
            LifecycleState::Ready => "ready",
            LifecycleState::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

/// Hooks into the startup sequence
///
/// All methods default to doing nothing. Returning an error from a hook
/// fails startup at that point, exactly as if the step itself had failed.
pub trait StartupObserver {
    fn on_state(&mut self, _state: LifecycleState) {}

    /// Called with the freshly opened connection, before pre-allocation
    fn on_connected(&mut self, _conn: &rusqlite::Connection) -> Result<()> {
        Ok(())
    }

    /// Called once a pre-allocation step has been committed
    fn after_prealloc_step(&mut self, _step: PreallocStep) -> Result<()> {
        Ok(())
    }

    /// Called after a table manager is constructed, before its `startup()`
    fn before_table_startup(&mut self, _table: &'static str) -> Result<()> {
        Ok(())
    }
}

struct NoopObserver;

impl StartupObserver for NoopObserver {}

/// A store that has not been opened yet
pub struct UnopenedStore {
    config: StoreConfig,
}

impl UnopenedStore {
    pub fn new(config: StoreConfig) -> Self {
        Self { config }
    }

    /// Store at an explicit path with default pre-allocation settings
    pub fn at_path(path: impl AsRef<Path>) -> Self {
        Self::new(StoreConfig::at_path(path))
    }

    pub fn path(&self) -> PathBuf {
        self.config.db_path()
    }

    /// Run the full startup sequence
    pub fn connect(self) -> Result<Store, StartupError> {
        self.connect_with(&mut NoopObserver)
    }

    /// Run the full startup sequence, reporting progress to `observer`
    pub fn connect_with(self, observer: &mut dyn StartupObserver) -> Result<Store, StartupError> {
        observer.on_state(LifecycleState::Uninitialized);

        match self.startup(observer) {
            Ok(store) => {
                observer.on_state(LifecycleState::Ready);
                info!("store ready at {}", store.path.display());
                Ok(store)
            }
            Err(e) => {
                error!("store startup failed: {}", e);
                observer.on_state(e.state());
                Err(e)
            }
        }
    }

    fn startup(self, observer: &mut dyn StartupObserver) -> Result<Store, StartupError> {
        let path = self.config.db_path();

        let db = DatabaseConn::open(&path)
            .and_then(|db| observer.on_connected(&db.conn).map(|_| db))
            .map_err(|error| StartupError::Connection {
                path: path.clone(),
                error,
            })?;
        info!("opened database at {}", path.display());
        observer.on_state(LifecycleState::Connected);

        let prealloc = self
            .config
            .preallocator()
            .run_with(&db.conn, |step| observer.after_prealloc_step(step))
            .map_err(|e| StartupError::PreAllocation {
                stage: e.stage,
                error: e.error,
            })?;
        observer.on_state(LifecycleState::PreAllocated);

        let cache = CacheTable::new(&db.conn);
        let history = HistoryTable::new(&db.conn);
        let temp = TempTable::new(&db.conn);

        start_table(&cache, observer)?;
        start_table(&history, observer)?;
        start_table(&temp, observer)?;

        Ok(Store {
            db,
            path,
            prealloc,
        })
    }
}

fn start_table<'a, T>(table: &T, observer: &mut dyn StartupObserver) -> Result<(), StartupError>
where
    T: TableManager<'a>,
{
    observer
        .before_table_startup(T::NAME)
        .and_then(|_| table.startup())
        .map_err(|error| StartupError::TableInit {
            table: T::NAME,
            error,
        })?;
    info!("{} table initialized", T::NAME);
    Ok(())
}

/// A started store
///
/// Owns the only connection to the database file. Table managers handed out
/// by [`Store::cache`], [`Store::history`] and [`Store::temp`] borrow it.
pub struct Store {
    db: DatabaseConn,
    path: PathBuf,
    prealloc: PreallocOutcome,
}

impl Store {
    /// Open a store at `path` with default settings
    pub fn open(path: impl AsRef<Path>) -> Result<Store, StartupError> {
        UnopenedStore::at_path(path).connect()
    }

    pub fn state(&self) -> LifecycleState {
        LifecycleState::Ready
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// What pre-allocation did during startup
    pub fn prealloc_outcome(&self) -> &PreallocOutcome {
        &self.prealloc
    }

    pub fn cache(&self) -> CacheTable<'_> {
        CacheTable::new(&self.db.conn)
    }

    pub fn history(&self) -> HistoryTable<'_> {
        HistoryTable::new(&self.db.conn)
    }

    pub fn temp(&self) -> TempTable<'_> {
        TempTable::new(&self.db.conn)
    }

    /// Get the underlying database connection (for advanced queries)
    pub fn connection(&self) -> &rusqlite::Connection {
        &self.db.conn
    }

    pub fn stats(&self) -> Result<DatabaseStats> {
        self.db.stats()
    }
}

/// Open a database file for inspection without running startup
pub fn inspect(path: &Path) -> Result<DatabaseStats> {
    DatabaseConn::open(path)?.stats()
}
