// Trait definitions for dependency injection
//
// Infrastructure seams only. The controller and watcher hold these as
// trait objects so tests can swap in the in-memory implementations.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::common::{InvocationParams, RunId};
use crate::domains::runs::models::RunStatus;

// =============================================================================
// Run Store Trait (Infrastructure - run records and config versions)
// =============================================================================

/// Status change written to a run record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunUpdate {
    pub status: RunStatus,
    pub pid: Option<u32>,
    pub exit_code: Option<i32>,
    pub error: Option<String>,
}

impl RunUpdate {
    pub fn status(status: RunStatus) -> Self {
        Self {
            status,
            pid: None,
            exit_code: None,
            error: None,
        }
    }

    pub fn with_pid(mut self, pid: Option<u32>) -> Self {
        self.pid = pid;
        self
    }

    pub fn with_exit_code(mut self, exit_code: Option<i32>) -> Self {
        self.exit_code = exit_code;
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Latest published worker parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigSnapshot {
    /// Strictly increasing across publishes.
    pub version: i64,
    pub params: InvocationParams,
}

/// A run the store still believes is alive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveRun {
    pub run_id: RunId,
    pub pid: Option<u32>,
    pub params: InvocationParams,
    pub started_at: DateTime<Utc>,
}

#[async_trait]
pub trait RunStore: Send + Sync {
    /// Create a run record in `starting` state.
    async fn create_run(&self, params: &InvocationParams) -> Result<RunId>;

    async fn update_run(&self, run_id: RunId, update: RunUpdate) -> Result<()>;

    /// Newest configuration version, if any was ever published.
    async fn latest_config(&self) -> Result<Option<ConfigSnapshot>>;

    /// Most recent run still marked starting or running.
    async fn find_active_run(&self) -> Result<Option<ActiveRun>>;
}
