//! Controller state and the snapshots handed to callers.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::common::{CircuitState, ErrorResponse, InvocationParams, ProcessStatus, RunId};
use crate::config::Config;
use crate::kernel::retry::{CircuitBreaker, QpiGovernor};

/// Mutable lifecycle state. Only touched under the controller's lifecycle lock.
#[derive(Debug)]
pub struct ProcessState {
    pub status: ProcessStatus,
    pub pid: Option<u32>,
    pub started_at: Option<DateTime<Utc>>,
    pub current_run_id: Option<RunId>,
    pub last_error: Option<ErrorResponse>,
    pub consecutive_failures: u32,
    pub breaker: CircuitBreaker,
    pub qpi: QpiGovernor,
}

impl ProcessState {
    pub fn new(config: &Config) -> Self {
        Self {
            status: ProcessStatus::Stopped,
            pid: None,
            started_at: None,
            current_run_id: None,
            last_error: None,
            consecutive_failures: 0,
            breaker: CircuitBreaker::new(config.breaker.clone()),
            qpi: QpiGovernor::new(config.qpi.clone()),
        }
    }

    /// Forget the tracked process.
    pub fn clear_process(&mut self) {
        self.pid = None;
        self.started_at = None;
        self.current_run_id = None;
    }
}

/// Point-in-time view returned by `get_status`.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub status: ProcessStatus,
    pub pid: Option<u32>,
    pub run_id: Option<RunId>,
    pub uptime_seconds: Option<i64>,
    pub params: Option<InvocationParams>,
    pub circuit_state: CircuitState,
    pub circuit_open_until: Option<DateTime<Utc>>,
    pub failure_count: u32,
    pub consecutive_failures: u32,
    /// Qpi the next (or current) run uses; below nominal after rate limiting.
    pub current_qpi: Option<u32>,
    pub retry_attempt: u32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub last_error: Option<ErrorResponse>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StartOutcome {
    pub success: bool,
    pub run_id: RunId,
    pub pid: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StopOutcome {
    pub run_id: Option<RunId>,
    pub pid: Option<u32>,
    /// SIGTERM was ignored and the worker had to be killed.
    pub forced: bool,
    pub cancelled_retry: bool,
}

/// Result of applying a new config version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReloadOutcome {
    /// Nothing was running; the parameters were not applied.
    Idle,
    Restarted {
        previous_run_id: Option<RunId>,
        run_id: RunId,
    },
}
