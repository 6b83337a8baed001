//! Process-wide controller accessor.
//!
//! The composition root builds the controller and installs it once; request
//! handlers reach it through [`global`].

use std::sync::{Arc, OnceLock};

use super::controller::ProcessController;
use super::state::StopOutcome;

static CONTROLLER: OnceLock<Arc<ProcessController>> = OnceLock::new();

/// Install the controller. Fails with the rejected controller if one is
/// already installed.
pub fn install(controller: Arc<ProcessController>) -> Result<(), Arc<ProcessController>> {
    CONTROLLER.set(controller)
}

pub fn global() -> Option<Arc<ProcessController>> {
    CONTROLLER.get().cloned()
}

/// Stop the installed controller's worker, if any.
pub async fn shutdown() -> Option<StopOutcome> {
    match CONTROLLER.get() {
        Some(controller) => controller.shutdown().await,
        None => None,
    }
}
