//! Table managers
//!
//! Each table manager owns one schema inside the store's database file and
//! borrows the store's single connection. Managers are cheap views: the store
//! builds a fresh one whenever a caller asks for it, after every manager's
//! `startup()` has already succeeded.

mod cache;
mod history;
mod temp;

pub use cache::{CacheEntry, CacheTable};
pub use history::{HistoryTable, MediaRecord, NewMedia};
pub use temp::TempTable;

use anyhow::{anyhow, Result};
use rusqlite::Connection;

use crate::database::core::begin;

/// Lifecycle contract shared by the table managers
pub trait TableManager<'conn>: Sized {
    /// Name used in logs and startup errors
    const NAME: &'static str;

    /// Bind the manager to the shared connection without reopening it
    fn new(conn: &'conn Connection) -> Self;

    /// Create the manager's schema if it is missing
    ///
    /// Called exactly once per store startup, after pre-allocation.
    fn startup(&self) -> Result<()>;
}

/// Run schema statements inside one committed transaction
pub(crate) fn create_schema(conn: &Connection, table: &str, statements: &[&str]) -> Result<()> {
    let tx = begin(conn)?;

    for sql in statements {
        tx.execute(sql, [])
            .map_err(|e| anyhow!("Failed to create {} schema: {}", table, e))?;
    }

    tx.commit()
        .map_err(|e| anyhow!("Failed to commit {} schema: {}", table, e))?;
    Ok(())
}
