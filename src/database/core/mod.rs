//! Core database infrastructure
//!
//! - `DatabaseConn`: SQLite connection wrapper with configuration and page statistics
//! - `Preallocator`: the disk pre-allocation protocol

mod connection;
mod prealloc;

pub(crate) use connection::begin;
pub use connection::{DatabaseConn, DatabaseStats};
pub use prealloc::{
    PreallocError, PreallocOutcome, PreallocStage, PreallocStep, Preallocator, DEFAULT_FILL_BYTES,
    DEFAULT_FREE_PAGE_THRESHOLD, SCRATCH_TABLE,
};
