//! Shared value types for the crawler control surface.

use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;
use uuid::Uuid;

use super::error::ControlError;

/// Identifier of one crawler run, issued by the run store.
pub type RunId = Uuid;

// ============================================================================
// Enums
// ============================================================================

/// Lifecycle status of the supervised worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProcessStatus {
    #[default]
    Stopped,
    Starting,
    Running,
    Stopping,
    /// Worker died and an automatic retry is pending.
    Crashed,
}

impl ProcessStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessStatus::Stopped => "stopped",
            ProcessStatus::Starting => "starting",
            ProcessStatus::Running => "running",
            ProcessStatus::Stopping => "stopping",
            ProcessStatus::Crashed => "crashed",
        }
    }
}

impl std::fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    #[default]
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        })
    }
}

/// Crawl mode understood by the worker.
///
/// `Standard` is the worker's own default and is never put on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CrawlMode {
    #[default]
    Standard,
    Learning,
    Aggressive,
    SnippetOnly,
}

impl CrawlMode {
    /// Parse a raw mode value. Unknown values yield `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "standard" => Some(CrawlMode::Standard),
            "learning" => Some(CrawlMode::Learning),
            "aggressive" => Some(CrawlMode::Aggressive),
            "snippet_only" => Some(CrawlMode::SnippetOnly),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CrawlMode::Standard => "standard",
            CrawlMode::Learning => "learning",
            CrawlMode::Aggressive => "aggressive",
            CrawlMode::SnippetOnly => "snippet_only",
        }
    }
}

// ============================================================================
// Invocation parameters
// ============================================================================

/// Options a worker run is started with.
///
/// `mode` is kept as the raw string handed in by the operator or the config
/// store; invalid values are dropped when the command line is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
#[serde(rename_all = "camelCase")]
pub struct InvocationParams {
    pub industry: String,
    pub qpi: u32,
    #[builder(default, setter(strip_option))]
    #[serde(default)]
    pub mode: Option<String>,
    #[builder(default)]
    #[serde(default)]
    pub smart: bool,
    #[builder(default)]
    #[serde(default)]
    pub force: bool,
    #[builder(default)]
    #[serde(default)]
    pub once: bool,
    #[builder(default)]
    #[serde(default)]
    pub dry_run: bool,
    #[builder(default, setter(strip_option))]
    #[serde(default)]
    pub daterestrict: Option<String>,
}

impl InvocationParams {
    /// Mode to emit on the command line, if any.
    pub fn effective_mode(&self) -> Option<CrawlMode> {
        self.mode
            .as_deref()
            .and_then(CrawlMode::parse)
            .filter(|m| *m != CrawlMode::Standard)
    }

    /// Trimmed date restriction, `None` when empty.
    pub fn effective_daterestrict(&self) -> Option<&str> {
        self.daterestrict
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Reject parameters the worker can never run with.
    pub fn validate(&self) -> Result<(), ControlError> {
        if self.industry.trim().is_empty() {
            return Err(ControlError::ConfigInvalid {
                reason: "industry must not be empty".to_string(),
            });
        }
        if self.qpi == 0 {
            return Err(ControlError::ConfigInvalid {
                reason: "qpi must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}
