//! Typed errors for crawler control.
//!
//! Every error carries a stable code and a recovery hint so callers can
//! surface structured results instead of bare strings.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::types::CircuitState;

/// How the retry policy treats an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Network/availability failure - retry with backoff.
    Transient,
    /// Upstream rate limiting - retry with backoff at reduced throughput.
    RateLimited,
    /// Worker died during startup - counted by the breaker, not auto-retried.
    Startup,
    /// Bad parameters or missing entrypoint - never retried.
    Configuration,
    /// Request refused by current controller state - not a failure.
    Refused,
}

/// Errors surfaced by the process controller and notification channel.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("crawler is already running (pid {pid:?})")]
    AlreadyRunning { pid: Option<u32> },

    #[error("crawler is not running")]
    NotRunning,

    #[error("worker entrypoint not found: {}", .path.display())]
    ScriptNotFound { path: PathBuf },

    #[error("failed to start worker: {source}")]
    ProcessStartFailed {
        #[source]
        source: std::io::Error,
    },

    #[error("worker crashed after {uptime_secs}s with exit code {code:?}")]
    ProcessCrash { code: Option<i32>, uptime_secs: u64 },

    #[error("worker exited {uptime_ms}ms after start with exit code {code:?}")]
    ProcessEarlyExit { code: Option<i32>, uptime_ms: u64 },

    #[error("circuit breaker is {state}; starts refused until {until:?}")]
    CircuitBreakerOpen {
        state: CircuitState,
        until: Option<DateTime<Utc>>,
    },

    #[error("notification connection lost: {reason}")]
    ConnectionLost { reason: String },

    #[error("invalid configuration: {reason}")]
    ConfigInvalid { reason: String },

    #[error("worker was rate limited (exit code {code:?}); next qpi {next_qpi}")]
    RateLimited { code: Option<i32>, next_qpi: u32 },

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl ControlError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            ControlError::AlreadyRunning { .. } => "ALREADY_RUNNING",
            ControlError::NotRunning => "NOT_RUNNING",
            ControlError::ScriptNotFound { .. } => "SCRIPT_NOT_FOUND",
            ControlError::ProcessStartFailed { .. } => "PROCESS_START_FAILED",
            ControlError::ProcessCrash { .. } => "PROCESS_CRASH",
            ControlError::ProcessEarlyExit { .. } => "PROCESS_EARLY_EXIT",
            ControlError::CircuitBreakerOpen { .. } => "CIRCUIT_BREAKER_OPEN",
            ControlError::ConnectionLost { .. } => "CONNECTION_LOST",
            ControlError::ConfigInvalid { .. } => "CONFIG_INVALID",
            ControlError::RateLimited { .. } => "RATE_LIMITED",
            ControlError::Store(_) => "STORE_ERROR",
        }
    }

    /// Suggested operator action.
    pub fn recovery_hint(&self) -> &'static str {
        match self {
            ControlError::AlreadyRunning { .. } => "Stop the running crawler before starting a new run.",
            ControlError::NotRunning => "Nothing to stop; start a run first.",
            ControlError::ScriptNotFound { .. } => {
                "Check CRAWLER_ENTRYPOINT points at the worker script."
            }
            ControlError::ProcessStartFailed { .. } => {
                "Check the interpreter is installed and the entrypoint is executable."
            }
            ControlError::ProcessCrash { .. } => {
                "Inspect the worker logs; the controller retries with backoff."
            }
            ControlError::ProcessEarlyExit { .. } => {
                "The worker died during startup; check its configuration and logs."
            }
            ControlError::CircuitBreakerOpen { .. } => {
                "Wait for the cool-down to elapse; one trial start is then allowed."
            }
            ControlError::ConnectionLost { .. } => {
                "Live updates are unavailable; poll run status until the database is reachable."
            }
            ControlError::ConfigInvalid { .. } => "Fix the crawler parameters and start again.",
            ControlError::RateLimited { .. } => {
                "Upstream is throttling; the next run uses a reduced qpi."
            }
            ControlError::Store(_) => "Check database connectivity.",
        }
    }

    /// Classification consumed by the retry policy.
    pub fn class(&self) -> ErrorClass {
        match self {
            ControlError::ProcessCrash { .. }
            | ControlError::ProcessStartFailed { .. }
            | ControlError::ConnectionLost { .. }
            | ControlError::Store(_) => ErrorClass::Transient,
            ControlError::RateLimited { .. } => ErrorClass::RateLimited,
            ControlError::ProcessEarlyExit { .. } => ErrorClass::Startup,
            ControlError::ConfigInvalid { .. } | ControlError::ScriptNotFound { .. } => {
                ErrorClass::Configuration
            }
            ControlError::AlreadyRunning { .. }
            | ControlError::NotRunning
            | ControlError::CircuitBreakerOpen { .. } => ErrorClass::Refused,
        }
    }

    /// Whether this error counts toward the circuit breaker's failure window.
    pub fn counts_as_failure(&self) -> bool {
        matches!(
            self,
            ControlError::ProcessCrash { .. }
                | ControlError::ProcessEarlyExit { .. }
                | ControlError::RateLimited { .. }
        )
    }

    pub fn to_response(&self) -> ErrorResponse {
        ErrorResponse::from(self)
    }
}

/// Structured error result returned to callers and kept in status snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
    pub recovery: String,
}

impl From<&ControlError> for ErrorResponse {
    fn from(err: &ControlError) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
            recovery: err.recovery_hint().to_string(),
        }
    }
}
