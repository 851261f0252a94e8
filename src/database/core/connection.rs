//! Database connection management
//!
//! This module provides the connection wrapper that the store owns for its
//! whole lifetime.

use anyhow::{anyhow, Result};
use rusqlite::Connection;
use serde::Serialize;
use std::path::Path;

/// Core database connection wrapper
///
/// `DatabaseConn` is a thin wrapper around the one SQLite connection the
/// store holds. Table managers never get one of these; they borrow
/// `conn` instead.
pub struct DatabaseConn {
    pub conn: Connection,
}

/// Page-level statistics reported by the engine
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DatabaseStats {
    pub page_size: u64,
    pub page_count: u64,
    pub freelist_count: u64,
    pub tables: Vec<String>,
}

impl DatabaseStats {
    /// Bytes allocated to the main database file
    pub fn allocated_bytes(&self) -> u64 {
        self.page_size * self.page_count
    }

    /// Bytes inside the file that are free for reuse
    pub fn free_bytes(&self) -> u64 {
        self.page_size * self.freelist_count
    }
}

impl DatabaseConn {
    /// Open the database at `path`, creating the file if it does not exist
    ///
    /// The parent directory must already exist.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .map_err(|e| anyhow!("Failed to open database at '{}': {}", path.display(), e))?;

        let db = DatabaseConn { conn };
        db.configure()?;
        Ok(db)
    }

    /// Create an in-memory database
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| anyhow!("Failed to create in-memory database: {}", e))?;

        let db = DatabaseConn { conn };
        db.configure()?;
        Ok(db)
    }

    /// Configure the connection
    ///
    /// The journal mode is left at the engine default. In WAL mode a commit
    /// only reaches the `-wal` file, and pre-allocation needs committed pages
    /// to land in the main file.
    fn configure(&self) -> Result<()> {
        self.conn
            .pragma_update(None, "synchronous", "FULL")
            .map_err(|e| anyhow!("Failed to set synchronous mode: {}", e))?;

        self.conn
            .pragma_update(None, "temp_store", "MEMORY")
            .map_err(|e| anyhow!("Failed to set temp store: {}", e))?;

        self.conn
            .pragma_update(None, "foreign_keys", "ON")
            .map_err(|e| anyhow!("Failed to enable foreign keys: {}", e))?;

        Ok(())
    }

    /// Execute a SQL statement
    pub fn execute(&self, sql: &str) -> Result<usize> {
        self.conn
            .execute(sql, [])
            .map_err(|e| anyhow!("Failed to execute SQL: {}", e))
    }

    /// Check if a table exists in the database
    pub fn table_exists(&self, table_name: &str) -> Result<bool> {
        table_exists(&self.conn, table_name)
    }

    /// Get the row count for a table
    pub fn table_count(&self, table_name: &str) -> Result<u64> {
        let query = format!("SELECT COUNT(*) FROM {}", table_name);
        let count: u64 = self
            .conn
            .query_row(&query, [], |row| row.get(0))
            .map_err(|e| anyhow!("Failed to get table count: {}", e))?;
        Ok(count)
    }

    /// Number of pages on the engine's free list
    pub fn freelist_count(&self) -> Result<u64> {
        freelist_count(&self.conn)
    }

    /// Total number of pages in the database file
    pub fn page_count(&self) -> Result<u64> {
        pragma_u64(&self.conn, "page_count")
    }

    /// Size of one database page in bytes
    pub fn page_size(&self) -> Result<u64> {
        pragma_u64(&self.conn, "page_size")
    }

    /// Names of all user tables, sorted
    pub fn table_names(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT name FROM sqlite_master
                 WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
                 ORDER BY name",
            )
            .map_err(|e| anyhow!("Failed to prepare table listing: {}", e))?;

        let names = stmt
            .query_map([], |row| row.get(0))
            .map_err(|e| anyhow!("Failed to list tables: {}", e))?
            .collect::<rusqlite::Result<Vec<String>>>()
            .map_err(|e| anyhow!("Failed to read table name: {}", e))?;
        Ok(names)
    }

    /// Collect page statistics and the table listing
    pub fn stats(&self) -> Result<DatabaseStats> {
        Ok(DatabaseStats {
            page_size: self.page_size()?,
            page_count: self.page_count()?,
            freelist_count: self.freelist_count()?,
            tables: self.table_names()?,
        })
    }
}

/// Check if a table exists on a borrowed connection
pub(crate) fn table_exists(conn: &Connection, table_name: &str) -> Result<bool> {
    let count: i32 = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
            [table_name],
            |row| row.get(0),
        )
        .map_err(|e| anyhow!("Failed to check table existence: {}", e))?;
    Ok(count > 0)
}

/// Begin an unchecked transaction on a borrowed connection
pub(crate) fn begin(conn: &Connection) -> Result<rusqlite::Transaction<'_>> {
    conn.unchecked_transaction()
        .map_err(|e| anyhow!("Failed to begin transaction: {}", e))
}

/// Read `PRAGMA freelist_count` on a borrowed connection
pub(crate) fn freelist_count(conn: &Connection) -> Result<u64> {
    pragma_u64(conn, "freelist_count")
}

fn pragma_u64(conn: &Connection, pragma: &str) -> Result<u64> {
    conn.pragma_query_value(None, pragma, |row| row.get(0))
        .map_err(|e| anyhow!("Failed to read PRAGMA {}: {}", pragma, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_in_memory() {
        let db = DatabaseConn::open_in_memory();
        assert!(db.is_ok());
    }

    #[test]
    fn test_open_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fresh.sqlite3");
        assert!(!path.exists());

        let db = DatabaseConn::open(&path).unwrap();
        db.execute("CREATE TABLE t (id INTEGER PRIMARY KEY)").unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_open_missing_parent_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("no-such-dir").join("db.sqlite3");

        let err = DatabaseConn::open(&path).err().unwrap();
        assert!(err.to_string().contains("Failed to open database"));
    }

    #[test]
    fn test_table_exists() {
        let db = DatabaseConn::open_in_memory().unwrap();
        db.execute("CREATE TABLE test_table (id INTEGER PRIMARY KEY)")
            .unwrap();

        assert!(db.table_exists("test_table").unwrap());
        assert!(!db.table_exists("nonexistent_table").unwrap());
    }

    #[test]
    fn test_table_count() {
        let db = DatabaseConn::open_in_memory().unwrap();
        db.execute("CREATE TABLE test_table (id INTEGER PRIMARY KEY)")
            .unwrap();
        db.execute("INSERT INTO test_table (id) VALUES (1), (2), (3)")
            .unwrap();

        assert_eq!(db.table_count("test_table").unwrap(), 3);
    }

    #[test]
    fn test_begin_commits_or_rolls_back() {
        let db = DatabaseConn::open_in_memory().unwrap();
        db.execute("CREATE TABLE t (id INTEGER PRIMARY KEY)").unwrap();

        let tx = begin(&db.conn).unwrap();
        tx.execute("INSERT INTO t (id) VALUES (1)", []).unwrap();
        tx.commit().unwrap();

        {
            let tx = begin(&db.conn).unwrap();
            tx.execute("INSERT INTO t (id) VALUES (2)", []).unwrap();
        }

        assert_eq!(db.table_count("t").unwrap(), 1);
    }

    #[test]
    fn test_stats_fresh_database() {
        let db = DatabaseConn::open_in_memory().unwrap();
        let stats = db.stats().unwrap();

        assert!(stats.page_size > 0);
        assert_eq!(stats.freelist_count, 0);
        assert!(stats.tables.is_empty());
    }

    #[test]
    fn test_freelist_grows_after_drop() {
        let db = DatabaseConn::open_in_memory().unwrap();
        db.execute("CREATE TABLE big (x)").unwrap();
        db.execute("INSERT INTO big VALUES (zeroblob(1048576))")
            .unwrap();
        assert_eq!(db.freelist_count().unwrap(), 0);

        db.execute("DROP TABLE big").unwrap();
        let stats = db.stats().unwrap();
        assert!(stats.free_bytes() >= 1024 * 1024);
        assert!(stats.allocated_bytes() >= stats.free_bytes());
    }
}
