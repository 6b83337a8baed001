//! Kernel module - infrastructure shared by the process controller.

pub mod notifications;
pub mod retry;
pub mod run_store;
pub mod test_dependencies;
pub mod traits;

pub use run_store::PostgresRunStore;
pub use test_dependencies::{RecordedRun, TestRunStore};
pub use traits::*;
