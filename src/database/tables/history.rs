//! Download history table
//!
//! Tracks every media item the downloader has seen, keyed by the site domain
//! and the URL path, and whether the download finished.

use anyhow::{anyhow, Result};
use rusqlite::{params, Connection};
use serde::Serialize;

use super::{create_schema, TableManager};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS media (
        domain TEXT NOT NULL,
        url_path TEXT NOT NULL,
        referer TEXT NOT NULL,
        album_id TEXT,
        download_path TEXT NOT NULL,
        download_filename TEXT NOT NULL,
        original_filename TEXT NOT NULL,
        file_size INTEGER,
        completed INTEGER NOT NULL DEFAULT 0,
        created_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
        completed_at INTEGER,
        PRIMARY KEY (domain, url_path)
    );
    "#,
    "CREATE INDEX IF NOT EXISTS idx_media_album_id ON media(album_id)",
    "CREATE INDEX IF NOT EXISTS idx_media_completed ON media(completed)",
];

/// Table manager for the download history
pub struct HistoryTable<'a> {
    conn: &'a Connection,
}

/// A media item about to be downloaded
#[derive(Debug, Clone, Default)]
pub struct NewMedia {
    pub domain: String,
    pub url_path: String,
    pub referer: String,
    pub album_id: Option<String>,
    pub download_path: String,
    pub download_filename: String,
    pub original_filename: String,
    pub file_size: Option<u64>,
}

/// A row of the download history
#[derive(Debug, Clone, Serialize)]
pub struct MediaRecord {
    pub domain: String,
    pub url_path: String,
    pub referer: String,
    pub album_id: Option<String>,
    pub download_path: String,
    pub download_filename: String,
    pub original_filename: String,
    pub file_size: Option<u64>,
    pub completed: bool,
    pub created_at: i64,
    pub completed_at: Option<i64>,
}

impl<'a> TableManager<'a> for HistoryTable<'a> {
    const NAME: &'static str = "history";

    fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn startup(&self) -> Result<()> {
        create_schema(self.conn, Self::NAME, SCHEMA)
    }
}

impl<'a> HistoryTable<'a> {
    /// Record a media item as not yet downloaded
    ///
    /// Returns `false` if the item was already recorded.
    pub fn insert_incomplete(&self, media: &NewMedia) -> Result<bool> {
        let file_size = media
            .file_size
            .map(|size| {
                i64::try_from(size).map_err(|_| anyhow!("File size {} is too large", size))
            })
            .transpose()?;

        let inserted = self
            .conn
            .execute(
                "INSERT OR IGNORE INTO media
                 (domain, url_path, referer, album_id, download_path,
                  download_filename, original_filename, file_size)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    media.domain,
                    media.url_path,
                    media.referer,
                    media.album_id,
                    media.download_path,
                    media.download_filename,
                    media.original_filename,
                    file_size,
                ],
            )
            .map_err(|e| anyhow!("Failed to insert media record: {}", e))?;
        Ok(inserted > 0)
    }

    /// Mark a media item as downloaded
    ///
    /// Returns `false` if no such item is recorded.
    pub fn mark_complete(&self, domain: &str, url_path: &str) -> Result<bool> {
        let updated = self
            .conn
            .execute(
                "UPDATE media SET completed = 1, completed_at = strftime('%s', 'now')
                 WHERE domain = ?1 AND url_path = ?2",
                [domain, url_path],
            )
            .map_err(|e| anyhow!("Failed to mark media complete: {}", e))?;
        Ok(updated > 0)
    }

    /// Whether a media item has finished downloading
    pub fn check_complete(&self, domain: &str, url_path: &str) -> Result<bool> {
        let result = self.conn.query_row(
            "SELECT completed FROM media WHERE domain = ?1 AND url_path = ?2",
            [domain, url_path],
            |row| row.get::<_, bool>(0),
        );

        match result {
            Ok(completed) => Ok(completed),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(false),
            Err(e) => Err(anyhow!("Failed to check media status: {}", e)),
        }
    }

    pub fn get(&self, domain: &str, url_path: &str) -> Result<Option<MediaRecord>> {
        let result = self.conn.query_row(
            "SELECT domain, url_path, referer, album_id, download_path, download_filename,
                    original_filename, file_size, completed, created_at, completed_at
             FROM media WHERE domain = ?1 AND url_path = ?2",
            [domain, url_path],
            |row| {
                Ok(MediaRecord {
                    domain: row.get(0)?,
                    url_path: row.get(1)?,
                    referer: row.get(2)?,
                    album_id: row.get(3)?,
                    download_path: row.get(4)?,
                    download_filename: row.get(5)?,
                    original_filename: row.get(6)?,
                    file_size: row.get(7)?,
                    completed: row.get(8)?,
                    created_at: row.get(9)?,
                    completed_at: row.get(10)?,
                })
            },
        );

        match result {
            Ok(record) => Ok(Some(record)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(anyhow!("Failed to read media record: {}", e)),
        }
    }

    pub fn count(&self) -> Result<u64> {
        let count: u64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM media", [], |row| row.get(0))
            .map_err(|e| anyhow!("Failed to count media records: {}", e))?;
        Ok(count)
    }

    pub fn completed_count(&self) -> Result<u64> {
        let count: u64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM media WHERE completed = 1",
                [],
                |row| row.get(0),
            )
            .map_err(|e| anyhow!("Failed to count completed media: {}", e))?;
        Ok(count)
    }
}
