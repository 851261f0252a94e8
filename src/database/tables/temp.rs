//! In-flight download files
//!
//! Holds the names of partially written files so they can be found and
//! cleaned up if the process stops mid-download.

use anyhow::{anyhow, Result};
use rusqlite::Connection;

use super::{create_schema, TableManager};

const SCHEMA: &[&str] = &[r#"
    CREATE TABLE IF NOT EXISTS files_temp (
        downloaded_filename TEXT PRIMARY KEY
    );
    "#];

/// Table manager for temporary download files
pub struct TempTable<'a> {
    conn: &'a Connection,
}

impl<'a> TableManager<'a> for TempTable<'a> {
    const NAME: &'static str = "temp";

    fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn startup(&self) -> Result<()> {
        create_schema(self.conn, Self::NAME, SCHEMA)
    }
}

impl<'a> TempTable<'a> {
    pub fn add(&self, filename: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR IGNORE INTO files_temp (downloaded_filename) VALUES (?1)",
                [filename],
            )
            .map_err(|e| anyhow!("Failed to add temp file: {}", e))?;
        Ok(())
    }

    pub fn remove(&self, filename: &str) -> Result<bool> {
        let removed = self
            .conn
            .execute(
                "DELETE FROM files_temp WHERE downloaded_filename = ?1",
                [filename],
            )
            .map_err(|e| anyhow!("Failed to remove temp file: {}", e))?;
        Ok(removed > 0)
    }

    /// All recorded temp files, sorted by name
    pub fn list(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT downloaded_filename FROM files_temp ORDER BY downloaded_filename")
            .map_err(|e| anyhow!("Failed to prepare temp file listing: {}", e))?;

        let names = stmt
            .query_map([], |row| row.get(0))
            .map_err(|e| anyhow!("Failed to list temp files: {}", e))?
            .collect::<rusqlite::Result<Vec<String>>>()
            .map_err(|e| anyhow!("Failed to read temp file name: {}", e))?;
        Ok(names)
    }

    pub fn clear(&self) -> Result<usize> {
        self.conn
            .execute("DELETE FROM files_temp", [])
            .map_err(|e| anyhow!("Failed to clear temp files: {}", e))
    }
}
