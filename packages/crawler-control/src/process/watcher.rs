//! Background poller applying new config versions to the running worker.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::controller::ProcessController;
use super::state::ReloadOutcome;
use crate::common::{ControlError, ErrorResponse, RunId};
use crate::config::WatcherConfig;
use crate::kernel::traits::RunStore;

/// Result of one poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchOutcome {
    /// First poll; the version seen becomes the baseline.
    Baseline { version: Option<i64> },
    Unchanged,
    /// Worker restarted with the new parameters.
    Applied { version: i64, run_id: RunId },
    /// Nothing was running; the version is only recorded.
    RecordedIdle { version: i64 },
    /// Restart failed. The version still counts as seen.
    Failed { version: i64, error: ErrorResponse },
}

pub struct ConfigWatcher {
    controller: Arc<ProcessController>,
    store: Arc<dyn RunStore>,
    config: WatcherConfig,
    last_version: Option<Option<i64>>,
}

impl ConfigWatcher {
    pub fn new(
        controller: Arc<ProcessController>,
        store: Arc<dyn RunStore>,
        config: WatcherConfig,
    ) -> Self {
        Self {
            controller,
            store,
            config,
            last_version: None,
        }
    }

    pub fn last_version(&self) -> Option<i64> {
        self.last_version.flatten()
    }

    pub async fn poll_once(&mut self) -> Result<WatchOutcome, ControlError> {
        let latest = self.store.latest_config().await?;
        let version = latest.as_ref().map(|snapshot| snapshot.version);

        let Some(seen) = self.last_version else {
            self.last_version = Some(version);
            debug!(version = ?version, "config watcher baseline");
            return Ok(WatchOutcome::Baseline { version });
        };

        let Some(snapshot) = latest.filter(|s| seen.map_or(true, |seen| s.version > seen)) else {
            return Ok(WatchOutcome::Unchanged);
        };
        self.last_version = Some(Some(snapshot.version));

        match self.controller.reload(snapshot.params).await {
            Ok(ReloadOutcome::Idle) => {
                info!(version = snapshot.version, "crawler config changed while idle; recorded");
                Ok(WatchOutcome::RecordedIdle {
                    version: snapshot.version,
                })
            }
            Ok(ReloadOutcome::Restarted {
                previous_run_id,
                run_id,
            }) => {
                info!(
                    version = snapshot.version,
                    previous_run_id = ?previous_run_id,
                    run_id = %run_id,
                    "crawler restarted with new config"
                );
                Ok(WatchOutcome::Applied {
                    version: snapshot.version,
                    run_id,
                })
            }
            Err(e) => {
                error!(
                    version = snapshot.version,
                    code = e.code(),
                    error = %e,
                    hint = e.recovery_hint(),
                    "failed to apply crawler config"
                );
                Ok(WatchOutcome::Failed {
                    version: snapshot.version,
                    error: e.to_response(),
                })
            }
        }
    }

    /// Poll until cancelled.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(
            interval_secs = self.config.poll_interval.as_secs(),
            "config watcher started"
        );
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if let Err(e) = self.poll_once().await {
                warn!(error = %e, "config watcher poll failed");
            }
        }
        info!("config watcher stopped");
    }
}
