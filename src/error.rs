use std::path::PathBuf;
use thiserror::Error;

use crate::database::{LifecycleState, PreallocStage};

/// Fatal error raised while bringing a store up
///
/// Every variant means the store is unusable; there is no retry or degraded
/// mode.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("connection failed: {error:#}")]
    Connection {
        path: PathBuf,
        error: anyhow::Error,
    },

    #[error("pre-allocation failed at {stage}: {error:#}")]
    PreAllocation {
        stage: PreallocStage,
        error: anyhow::Error,
    },

    #[error("{table} table failed to initialize: {error:#}")]
    TableInit {
        table: &'static str,
        error: anyhow::Error,
    },
}

impl StartupError {
    /// The state a store is in after this error
    pub fn state(&self) -> LifecycleState {
        LifecycleState::Failed
    }
}
