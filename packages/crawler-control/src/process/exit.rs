//! Worker exit classification.

use std::time::Duration;

use crate::config::ControllerConfig;

/// How a worker exit is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitKind {
    /// Exit code 0.
    Graceful,
    /// The worker rejected its arguments. Never retried, never counted.
    ConfigRejected { code: i32 },
    /// Died inside the early-exit window: a startup defect.
    EarlyExit { code: Option<i32>, uptime: Duration },
    Crash { code: Option<i32>, uptime: Duration },
}

/// Classify an exit. `code` is `None` when the worker died from a signal.
pub fn classify_exit(code: Option<i32>, uptime: Duration, config: &ControllerConfig) -> ExitKind {
    match code {
        Some(0) => ExitKind::Graceful,
        Some(code) if config.config_error_exit_codes.contains(&code) => {
            ExitKind::ConfigRejected { code }
        }
        _ if uptime < config.early_exit_window => ExitKind::EarlyExit { code, uptime },
        _ => ExitKind::Crash { code, uptime },
    }
}
