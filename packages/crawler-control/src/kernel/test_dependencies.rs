// TestDependencies - in-memory implementations for testing
//
// Lets controller and watcher tests run without a database.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use super::traits::{ActiveRun, ConfigSnapshot, RunStore, RunUpdate};
use crate::common::{InvocationParams, RunId};
use crate::domains::runs::models::RunStatus;

/// Snapshot of a run record held by [`TestRunStore`].
#[derive(Debug, Clone)]
pub struct RecordedRun {
    pub id: RunId,
    pub params: InvocationParams,
    pub status: RunStatus,
    pub pid: Option<u32>,
    pub exit_code: Option<i32>,
    pub error: Option<String>,
    /// Every status the run passed through, oldest first.
    pub history: Vec<RunStatus>,
}

#[derive(Default)]
struct StoreState {
    runs: Vec<RecordedRun>,
    config: Option<ConfigSnapshot>,
}

/// In-memory run store.
#[derive(Clone, Default)]
pub struct TestRunStore {
    state: Arc<Mutex<StoreState>>,
    fail_writes: Arc<AtomicBool>,
}

impl TestRunStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish parameters as the next config version. Returns the version.
    pub fn set_config(&self, params: InvocationParams) -> i64 {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let version = state.config.as_ref().map_or(1, |c| c.version + 1);
        state.config = Some(ConfigSnapshot { version, params });
        version
    }

    /// Seed a run left behind by a previous controller.
    pub fn seed_active_run(&self, params: InvocationParams, pid: Option<u32>) -> RunId {
        let id = Uuid::new_v4();
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.runs.push(RecordedRun {
            id,
            params,
            status: RunStatus::Running,
            pid,
            exit_code: None,
            error: None,
            history: vec![RunStatus::Running],
        });
        id
    }

    /// Make every write fail until reset.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn runs(&self) -> Vec<RecordedRun> {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .runs
            .clone()
    }

    pub fn run(&self, id: RunId) -> Option<RecordedRun> {
        self.runs().into_iter().find(|r| r.id == id)
    }
}

#[async_trait]
impl RunStore for TestRunStore {
    async fn create_run(&self, params: &InvocationParams) -> Result<RunId> {
        if self.fail_writes.load(Ordering::SeqCst) {
            bail!("test store refusing writes");
        }
        let id = Uuid::new_v4();
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.runs.push(RecordedRun {
            id,
            params: params.clone(),
            status: RunStatus::Starting,
            pid: None,
            exit_code: None,
            error: None,
            history: vec![RunStatus::Starting],
        });
        Ok(id)
    }

    async fn update_run(&self, run_id: RunId, update: RunUpdate) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            bail!("test store refusing writes");
        }
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let Some(run) = state.runs.iter_mut().find(|r| r.id == run_id) else {
            bail!("unknown run {run_id}");
        };
        run.status = update.status;
        run.history.push(update.status);
        if update.pid.is_some() {
            run.pid = update.pid;
        }
        if update.exit_code.is_some() {
            run.exit_code = update.exit_code;
        }
        if update.error.is_some() {
            run.error = update.error;
        }
        Ok(())
    }

    async fn latest_config(&self) -> Result<Option<ConfigSnapshot>> {
        Ok(self
            .state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .config
            .clone())
    }

    async fn find_active_run(&self) -> Result<Option<ActiveRun>> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        Ok(state
            .runs
            .iter()
            .rev()
            .find(|r| r.status.is_active())
            .map(|r| ActiveRun {
                run_id: r.id,
                pid: r.pid,
                params: r.params.clone(),
                started_at: Utc::now(),
            }))
    }
}
