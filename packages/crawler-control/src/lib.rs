// Crawler fleet control
//
// Supervises the external crawler worker process, breaks the circuit on
// repeated failures, hot-reloads its parameters, and fans live progress
// notifications out to many readers.

pub mod common;
pub mod config;
pub mod domains;
pub mod kernel;
pub mod process;

pub use config::*;
