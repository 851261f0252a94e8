//! Disk pre-allocation
//!
//! If the disk fills up while SQLite is extending the file in the middle of a
//! transaction, the file can be left corrupted. Before any application table
//! exists, the store checks how much reusable slack the file already has. When
//! the free list is short, it grows the file by writing one large zero-filled
//! blob into a scratch table and dropping it again, so the space stays inside
//! the file as free pages.
//!
//! The protocol is a fixed list of [`PreallocStep`]s. Each step runs in its own
//! transaction and is committed before the next begins. An interruption
//! between commits leaves at most a leftover scratch table behind, which the
//! next run cleans up.

use anyhow::{anyhow, Result};
use rusqlite::Connection;
use std::fmt;
use tracing::{debug, info, warn};

use super::connection::{begin, freelist_count, table_exists};

/// Free-list size at or below which the file is grown
pub const DEFAULT_FREE_PAGE_THRESHOLD: u64 = 1024;

/// Size of the zero-filled blob written to grow the file (100 MiB)
pub const DEFAULT_FILL_BYTES: u64 = 100 * 1024 * 1024;

/// Name of the throwaway table used to force the write
pub const SCRATCH_TABLE: &str = "dlstore_prealloc";

/// One committed step of the growth protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PreallocStep {
    CreateScratch,
    FillScratch,
    DropScratch,
}

impl PreallocStep {
    /// Protocol order. Never batch or reorder these.
    pub const ORDER: [PreallocStep; 3] = [
        PreallocStep::CreateScratch,
        PreallocStep::FillScratch,
        PreallocStep::DropScratch,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            PreallocStep::CreateScratch => "create-scratch",
            PreallocStep::FillScratch => "fill-scratch",
            PreallocStep::DropScratch => "drop-scratch",
        }
    }

    fn sql(&self) -> String {
        match self {
            PreallocStep::CreateScratch => {
                format!("CREATE TABLE IF NOT EXISTS {SCRATCH_TABLE}(x)")
            }
            PreallocStep::FillScratch => {
                format!("INSERT INTO {SCRATCH_TABLE} VALUES(zeroblob(?1))")
            }
            PreallocStep::DropScratch => format!("DROP TABLE IF EXISTS {SCRATCH_TABLE}"),
        }
    }
}

impl fmt::Display for PreallocStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Where in the protocol a failure happened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreallocStage {
    /// Reading the free-page count
    Probe,
    Step(PreallocStep),
}

impl fmt::Display for PreallocStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PreallocStage::Probe => write!(f, "probe"),
            PreallocStage::Step(step) => write!(f, "{}", step),
        }
    }
}

/// Failure of the pre-allocation protocol
#[derive(Debug)]
pub struct PreallocError {
    pub stage: PreallocStage,
    pub error: anyhow::Error,
}

/// What the protocol did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreallocOutcome {
    /// Enough slack already; nothing was written apart from removing a
    /// scratch table left by an interrupted run
    Skipped {
        free_pages: u64,
        dropped_leftover: bool,
    },

    /// The file was grown
    Grown {
        free_pages_before: u64,
        free_pages_after: u64,
    },
}

/// Runs the pre-allocation protocol against a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Preallocator {
    pub threshold_pages: u64,
    pub fill_bytes: u64,
}

impl Default for Preallocator {
    fn default() -> Self {
        Self {
            threshold_pages: DEFAULT_FREE_PAGE_THRESHOLD,
            fill_bytes: DEFAULT_FILL_BYTES,
        }
    }
}

impl Preallocator {
    pub fn new(threshold_pages: u64, fill_bytes: u64) -> Self {
        Self {
            threshold_pages,
            fill_bytes,
        }
    }

    /// Run the protocol with no step hook
    pub fn run(&self, conn: &Connection) -> Result<PreallocOutcome, PreallocError> {
        self.run_with(conn, |_| Ok(()))
    }

    /// Run the protocol, calling `after_commit` once each step is durable
    ///
    /// An error from `after_commit` stops the protocol right there and is
    /// reported against that step.
    pub fn run_with<F>(
        &self,
        conn: &Connection,
        mut after_commit: F,
    ) -> Result<PreallocOutcome, PreallocError>
    where
        F: FnMut(PreallocStep) -> Result<()>,
    {
        let free_pages = freelist_count(conn).map_err(|error| PreallocError {
            stage: PreallocStage::Probe,
            error,
        })?;
        debug!(
            "free pages: {} (threshold {})",
            free_pages, self.threshold_pages
        );

        if free_pages > self.threshold_pages {
            let leftover = table_exists(conn, SCRATCH_TABLE).map_err(|error| PreallocError {
                stage: PreallocStage::Probe,
                error,
            })?;
            if leftover {
                warn!("dropping scratch table left by an interrupted pre-allocation");
                self.commit_step(conn, PreallocStep::DropScratch, &mut after_commit)?;
            }
            info!(
                "skipping pre-allocation, {} free pages already available",
                free_pages
            );
            return Ok(PreallocOutcome::Skipped {
                free_pages,
                dropped_leftover: leftover,
            });
        }

        info!(
            "pre-allocating {} bytes ({} free pages <= {})",
            self.fill_bytes, free_pages, self.threshold_pages
        );
        for step in PreallocStep::ORDER {
            self.commit_step(conn, step, &mut after_commit)?;
        }

        let free_pages_after = freelist_count(conn).map_err(|error| PreallocError {
            stage: PreallocStage::Probe,
            error,
        })?;
        info!(
            "pre-allocation complete, free pages {} -> {}",
            free_pages, free_pages_after
        );

        Ok(PreallocOutcome::Grown {
            free_pages_before: free_pages,
            free_pages_after,
        })
    }

    fn commit_step<F>(
        &self,
        conn: &Connection,
        step: PreallocStep,
        after_commit: &mut F,
    ) -> Result<(), PreallocError>
    where
        F: FnMut(PreallocStep) -> Result<()>,
    {
        self.execute_step(conn, step)
            .and_then(|_| after_commit(step))
            .map_err(|error| PreallocError {
                stage: PreallocStage::Step(step),
                error,
            })
    }

    fn execute_step(&self, conn: &Connection, step: PreallocStep) -> Result<()> {
        debug!("pre-allocation step {}", step);

        let tx = begin(conn)?;

        let executed = match step {
            PreallocStep::FillScratch => {
                let bytes = i64::try_from(self.fill_bytes)
                    .map_err(|_| anyhow!("Fill size {} is too large", self.fill_bytes))?;
                tx.execute(&step.sql(), [bytes])
            }
            _ => tx.execute(&step.sql(), []),
        };
        executed.map_err(|e| anyhow!("Failed to run {} step: {}", step, e))?;

        tx.commit()
            .map_err(|e| anyhow!("Failed to commit {} step: {}", step, e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::core::DatabaseConn;

    const SMALL_FILL: u64 = 1024 * 1024;

    fn file_db() -> (tempfile::TempDir, DatabaseConn) {
        let dir = tempfile::tempdir().unwrap();
        let db = DatabaseConn::open(&dir.path().join("prealloc.sqlite3")).unwrap();
        (dir, db)
    }

    #[test]
    fn test_step_order() {
        assert_eq!(
            PreallocStep::ORDER,
            [
                PreallocStep::CreateScratch,
                PreallocStep::FillScratch,
                PreallocStep::DropScratch
            ]
        );
    }

    #[test]
    fn test_grows_when_below_threshold() {
        let (dir, db) = file_db();
        let mut seen = Vec::new();

        let outcome = Preallocator::new(1024, SMALL_FILL)
            .run_with(&db.conn, |step| {
                seen.push(step);
                Ok(())
            })
            .unwrap();

        assert_eq!(seen, PreallocStep::ORDER.to_vec());
        match outcome {
            PreallocOutcome::Grown {
                free_pages_before,
                free_pages_after,
            } => {
                assert_eq!(free_pages_before, 0);
                assert!(free_pages_after * db.page_size().unwrap() >= SMALL_FILL);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(!db.table_exists(SCRATCH_TABLE).unwrap());

        let file_len = std::fs::metadata(dir.path().join("prealloc.sqlite3"))
            .unwrap()
            .len();
        assert!(file_len >= SMALL_FILL);
    }

    #[test]
    fn test_skips_when_above_threshold() {
        let (_dir, db) = file_db();
        let mut seen = Vec::new();

        // grow once so the file has slack
        Preallocator::new(u64::MAX, SMALL_FILL).run(&db.conn).unwrap();
        let free = db.freelist_count().unwrap();
        let size_before = db.page_count().unwrap();

        let outcome = Preallocator::new(free - 1, SMALL_FILL)
            .run_with(&db.conn, |step| {
                seen.push(step);
                Ok(())
            })
            .unwrap();

        assert_eq!(
            outcome,
            PreallocOutcome::Skipped {
                free_pages: free,
                dropped_leftover: false
            }
        );
        assert!(seen.is_empty());
        assert_eq!(db.page_count().unwrap(), size_before);
        assert_eq!(db.freelist_count().unwrap(), free);
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let (_dir, db) = file_db();

        let outcome = Preallocator::new(0, SMALL_FILL).run(&db.conn).unwrap();
        assert!(matches!(outcome, PreallocOutcome::Grown { .. }));
    }

    #[test]
    fn test_disk_full_during_fill() {
        let (_dir, db) = file_db();
        // cap the file well below the fill size to simulate a full disk
        let _: i64 = db
            .conn
            .query_row("PRAGMA max_page_count = 32", [], |row| row.get(0))
            .unwrap();

        let err = Preallocator::new(1024, SMALL_FILL)
            .run(&db.conn)
            .unwrap_err();

        assert_eq!(err.stage, PreallocStage::Step(PreallocStep::FillScratch));
        // create was committed before the fill failed
        assert!(db.table_exists(SCRATCH_TABLE).unwrap());
        assert_eq!(db.table_count(SCRATCH_TABLE).unwrap(), 0);
        assert_eq!(db.table_names().unwrap(), vec![SCRATCH_TABLE.to_string()]);
    }

    #[test]
    fn test_interrupt_after_each_step() {
        for (idx, stop_at) in PreallocStep::ORDER.iter().enumerate() {
            let (_dir, db) = file_db();

            let err = Preallocator::new(1024, SMALL_FILL)
                .run_with(&db.conn, |step| {
                    if step == *stop_at {
                        Err(anyhow!("simulated crash"))
                    } else {
                        Ok(())
                    }
                })
                .unwrap_err();
            assert_eq!(err.stage, PreallocStage::Step(*stop_at));

            // committed work survives; only the scratch table can be left over
            let tables = db.table_names().unwrap();
            match idx {
                0 => {
                    assert_eq!(tables, vec![SCRATCH_TABLE.to_string()]);
                    assert_eq!(db.table_count(SCRATCH_TABLE).unwrap(), 0);
                }
                1 => {
                    assert_eq!(tables, vec![SCRATCH_TABLE.to_string()]);
                    assert_eq!(db.table_count(SCRATCH_TABLE).unwrap(), 1);
                }
                _ => assert!(tables.is_empty()),
            }
            let check: String = db
                .conn
                .query_row("PRAGMA integrity_check", [], |row| row.get(0))
                .unwrap();
            assert_eq!(check, "ok");
        }
    }

    #[test]
    fn test_leftover_reused_when_growing() {
        let (_dir, db) = file_db();
        let _ = Preallocator::new(1024, SMALL_FILL).run_with(&db.conn, |step| {
            if step == PreallocStep::CreateScratch {
                Err(anyhow!("simulated crash"))
            } else {
                Ok(())
            }
        });
        assert!(db.table_exists(SCRATCH_TABLE).unwrap());

        let outcome = Preallocator::new(1024, SMALL_FILL).run(&db.conn).unwrap();
        assert!(matches!(outcome, PreallocOutcome::Grown { .. }));
        assert!(!db.table_exists(SCRATCH_TABLE).unwrap());
    }

    #[test]
    fn test_leftover_dropped_when_skipping() {
        let (_dir, db) = file_db();
        let _ = Preallocator::new(1024, SMALL_FILL).run_with(&db.conn, |step| {
            if step == PreallocStep::FillScratch {
                Err(anyhow!("simulated crash"))
            } else {
                Ok(())
            }
        });
        assert!(db.table_exists(SCRATCH_TABLE).unwrap());

        let mut seen = Vec::new();
        let outcome = Preallocator::new(0, SMALL_FILL)
            .run_with(&db.conn, |step| {
                seen.push(step);
                Ok(())
            })
            .unwrap();

        // the leftover blob already occupies pages, but none are free yet
        assert!(matches!(outcome, PreallocOutcome::Grown { .. }));
        assert!(!db.table_exists(SCRATCH_TABLE).unwrap());

        // now slack exists; simulate another leftover and a skip
        db.execute("CREATE TABLE dlstore_prealloc(x)").unwrap();
        seen.clear();
        let free = db.freelist_count().unwrap();
        let outcome = Preallocator::new(0, SMALL_FILL)
            .run_with(&db.conn, |step| {
                seen.push(step);
                Ok(())
            })
            .unwrap();
        assert!(matches!(
            outcome,
            PreallocOutcome::Skipped {
                dropped_leftover: true,
                ..
            }
        ));
        assert!(free > 0);
        assert_eq!(seen, vec![PreallocStep::DropScratch]);
        assert!(!db.table_exists(SCRATCH_TABLE).unwrap());
    }
}
