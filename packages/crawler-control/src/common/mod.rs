//! Types shared across the controller, the retry logic and the notification bridge.

pub mod error;
pub mod types;

pub use error::{ControlError, ErrorClass, ErrorResponse};
pub use types::{CircuitState, CrawlMode, InvocationParams, ProcessStatus, RunId};
