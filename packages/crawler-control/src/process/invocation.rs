//! Worker command-line construction.
//!
//! ```text
//! [interpreter] <entrypoint> --industry <industry> --qpi <qpi>
//!     [--mode <mode>] [--smart] [--force] [--once] [--dry-run]
//!     [--daterestrict <value>]
//! ```

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;

use crate::common::{ControlError, InvocationParams};
use crate::config::ControllerConfig;

/// A fully resolved worker command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
}

/// Worker flags for `params`, launched at `qpi`.
pub fn worker_args(params: &InvocationParams, qpi: u32) -> Vec<String> {
    let mut args = vec![
        "--industry".to_string(),
        params.industry.clone(),
        "--qpi".to_string(),
        qpi.to_string(),
    ];

    if let Some(mode) = params.effective_mode() {
        args.push("--mode".to_string());
        args.push(mode.as_str().to_string());
    }

    for (enabled, flag) in [
        (params.smart, "--smart"),
        (params.force, "--force"),
        (params.once, "--once"),
        (params.dry_run, "--dry-run"),
    ] {
        if enabled {
            args.push(flag.to_string());
        }
    }

    if let Some(daterestrict) = params.effective_daterestrict() {
        args.push("--daterestrict".to_string());
        args.push(daterestrict.to_string());
    }

    args
}

impl Invocation {
    /// Build the command, checking that the entrypoint exists.
    pub fn build(
        config: &ControllerConfig,
        params: &InvocationParams,
        qpi: u32,
    ) -> Result<Self, ControlError> {
        let entrypoint = resolve_entrypoint(config);
        if !entrypoint.exists() {
            return Err(ControlError::ScriptNotFound { path: entrypoint });
        }
        Ok(Self::assemble(config, &entrypoint, params, qpi))
    }

    /// Build the command without touching the filesystem.
    pub fn describe(config: &ControllerConfig, params: &InvocationParams, qpi: u32) -> Self {
        Self::assemble(config, &resolve_entrypoint(config), params, qpi)
    }

    fn assemble(
        config: &ControllerConfig,
        entrypoint: &Path,
        params: &InvocationParams,
        qpi: u32,
    ) -> Self {
        let entrypoint = entrypoint.display().to_string();
        let (program, mut args) = match &config.interpreter {
            Some(interpreter) => (interpreter.clone(), vec![entrypoint]),
            None => (entrypoint, Vec::new()),
        };
        args.extend(worker_args(params, qpi));

        Self {
            program,
            args,
            working_dir: config.working_dir.clone(),
        }
    }

    /// Spawnable command with piped output. The child is killed if its
    /// handle is dropped.
    pub fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }
        command
    }

    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn resolve_entrypoint(config: &ControllerConfig) -> PathBuf {
    match &config.working_dir {
        Some(dir) if config.entrypoint.is_relative() => dir.join(&config.entrypoint),
        _ => config.entrypoint.clone(),
    }
}
