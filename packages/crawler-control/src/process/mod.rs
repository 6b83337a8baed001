//! Worker process control: launch, supervise, restart, stop.

mod controller;
mod exit;
pub mod global;
mod invocation;
mod logs;
mod os;
mod state;
mod watcher;

pub use controller::ProcessController;
pub use exit::{classify_exit, ExitKind};
pub use invocation::{worker_args, Invocation};
pub use logs::LogBuffer;
pub use os::Liveness;
pub use state::{ProcessState, ReloadOutcome, StartOutcome, StatusSnapshot, StopOutcome};
pub use watcher::{ConfigWatcher, WatchOutcome};
