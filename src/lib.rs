#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

//! dlstore - persistent store for a media downloader
//!
//! dlstore manages the single SQLite file a downloader keeps its state in.
//! Startup opens exactly one connection, reserves disk space inside the file
//! before any real data is written, and then brings up the table managers
//! that share that connection.
//!
//! # Feature Flags
//!
//! | Feature | Description | Key Dependencies |
//! |---------|-------------|------------------|
//! | `cli` (default) | `dlstore` binary | `clap`, `tracing-subscriber` |
//!
//! # Architecture
//!
//! - **[`database`]**: connection, pre-allocation, table managers and the store lifecycle
//! - **[`config`]**: configuration file and environment handling
//! - **[`error`]**: fatal startup errors
//!
//! # Disk pre-allocation
//!
//! If the disk fills up while SQLite is extending the file mid-transaction,
//! the file can be corrupted. On startup the store reads the engine's free
//! page count; when it is at or below a threshold (default 1024 pages) the
//! store writes a zero-filled blob (default 100 MiB) into a scratch table and
//! drops it again. Each of those three steps is committed on its own, so an
//! interruption leaves at most a leftover scratch table, never a damaged
//! application table.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use dlstore::{StoreConfig, UnopenedStore};
//!
//! let config = StoreConfig::new(&None)?;
//! let store = UnopenedStore::new(config).connect()?;
//!
//! store.cache().put("https://example.com/album/1", "<html>...</html>")?;
//! println!("{} completed downloads", store.history().completed_count()?);
//! ```

pub mod config;
pub mod database;
pub mod error;

pub use config::{format_size, StoreConfig, DEFAULT_DB_FILE_NAME};
pub use error::StartupError;

pub use database::{
    inspect, CacheEntry, CacheTable, DatabaseConn, DatabaseStats, HistoryTable, LifecycleState,
    MediaRecord, NewMedia, PreallocOutcome, PreallocStage, PreallocStep, Preallocator,
    StartupObserver, Store, TableManager, TempTable, UnopenedStore, DEFAULT_FILL_BYTES,
    DEFAULT_FREE_PAGE_THRESHOLD,
};
