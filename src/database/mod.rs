//! Database module
//!
//! # Architecture
//!
//! ```text
//! database/
//! ├── core/           # Foundation
//! │   ├── connection  # SQLite DatabaseConn wrapper
//! │   └── prealloc    # Disk pre-allocation protocol
//! │
//! ├── tables/         # Table managers sharing the one connection
//! │   ├── cache       # Cached responses
//! │   ├── history     # Download history
//! │   └── temp        # In-flight download files
//! │
//! └── store           # Startup sequence and the Store handle
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use dlstore::database::UnopenedStore;
//!
//! let store = UnopenedStore::at_path("/var/lib/dl/dlstore.sqlite3").connect()?;
//!
//! if !store.history().check_complete("example.com", "/files/abc.jpg")? {
//!     store.temp().add("/downloads/abc.jpg.part")?;
//! }
//! ```

pub mod core;
pub mod tables;

mod store;

pub use self::core::{
    DatabaseConn, DatabaseStats, PreallocError, PreallocOutcome, PreallocStage, PreallocStep,
    Preallocator, DEFAULT_FILL_BYTES, DEFAULT_FREE_PAGE_THRESHOLD, SCRATCH_TABLE,
};

pub use tables::{
    CacheEntry, CacheTable, HistoryTable, MediaRecord, NewMedia, TableManager, TempTable,
};

pub use store::{inspect, LifecycleState, StartupObserver, Store, UnopenedStore};
