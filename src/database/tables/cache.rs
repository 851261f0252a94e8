//! Response cache table
//!
//! Stores raw response bodies keyed by URL so pages do not have to be
//! fetched again on the next run.

use anyhow::{anyhow, Result};
use rusqlite::Connection;
use serde::Serialize;

use super::{create_schema, TableManager};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS response_cache (
        url TEXT PRIMARY KEY,
        body TEXT NOT NULL,
        created_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
    );
    "#,
    "CREATE INDEX IF NOT EXISTS idx_response_cache_created_at ON response_cache(created_at)",
];

/// Table manager for cached responses
pub struct CacheTable<'a> {
    conn: &'a Connection,
}

/// A cached response
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CacheEntry {
    pub url: String,
    pub body: String,
    pub created_at: i64,
}

impl<'a> TableManager<'a> for CacheTable<'a> {
    const NAME: &'static str = "cache";

    fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn startup(&self) -> Result<()> {
        create_schema(self.conn, Self::NAME, SCHEMA)
    }
}

impl<'a> CacheTable<'a> {
    /// Look up a cached response
    pub fn get(&self, url: &str) -> Result<Option<CacheEntry>> {
        let result = self.conn.query_row(
            "SELECT url, body, created_at FROM response_cache WHERE url = ?1",
            [url],
            |row| {
                Ok(CacheEntry {
                    url: row.get(0)?,
                    body: row.get(1)?,
                    created_at: row.get(2)?,
                })
            },
        );

        match result {
            Ok(entry) => Ok(Some(entry)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(anyhow!("Failed to read cache entry: {}", e)),
        }
    }

    /// Insert or replace a cached response
    pub fn put(&self, url: &str, body: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO response_cache (url, body, created_at)
                 VALUES (?1, ?2, strftime('%s', 'now'))",
                [url, body],
            )
            .map_err(|e| anyhow!("Failed to store cache entry: {}", e))?;
        Ok(())
    }

    pub fn count(&self) -> Result<u64> {
        let count: u64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM response_cache", [], |row| row.get(0))
            .map_err(|e| anyhow!("Failed to count cache entries: {}", e))?;
        Ok(count)
    }

    /// Remove every cached response, returning how many were removed
    pub fn clear(&self) -> Result<usize> {
        self.conn
            .execute("DELETE FROM response_cache", [])
            .map_err(|e| anyhow!("Failed to clear cache: {}", e))
    }
}
