//! Supervised LISTEN channel.
//!
//! A single background task owns the listener connection:
//!
//! ```text
//! connect (bounded, backoff between attempts)
//!     │
//!     ▼
//! wait_batch(poll_timeout) ──► parse ──► sink.deliver() per message, in order
//!     │
//!     ├─► every health_interval: ping (bounded by health_timeout)
//!     │
//!     └─► lost / unhealthy ──► reconnect (counts as an attempt)
//! ```
//!
//! Running out of attempts ends the task and flips `is_live()` to false.
//! Callers treat that as "live updates unavailable" and fall back to polling.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::listener::ListenerConnector;
use super::notification::{Notification, NotificationSink};
use crate::common::ControlError;
use crate::config::ChannelConfig;
use crate::kernel::retry::RetryPolicy;

/// Listener-level failures.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("failed to connect listener: {0}")]
    Connect(String),
    #[error("listener connection lost: {0}")]
    Lost(String),
    #[error("listener health check timed out")]
    HealthTimeout,
}

impl ChannelError {
    pub fn connect(err: impl std::fmt::Display) -> Self {
        ChannelError::Connect(err.to_string())
    }
}

impl From<ChannelError> for ControlError {
    fn from(err: ChannelError) -> Self {
        ControlError::ConnectionLost {
            reason: err.to_string(),
        }
    }
}

/// Why the supervisor task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelExit {
    Stopped,
    /// Reconnect attempts ran out; live updates are disabled.
    Exhausted,
}

struct ChannelTask {
    cancel: CancellationToken,
    handle: JoinHandle<ChannelExit>,
}

/// Owner handle for the notification supervisor.
///
/// `start` and `stop` take `&mut self`: only the owner controls the task.
pub struct NotificationChannel {
    connector: Arc<dyn ListenerConnector>,
    config: ChannelConfig,
    live: Arc<AtomicBool>,
    task: Option<ChannelTask>,
}

impl NotificationChannel {
    pub fn new(connector: Arc<dyn ListenerConnector>, config: ChannelConfig) -> Self {
        Self {
            connector,
            config,
            live: Arc::new(AtomicBool::new(false)),
            task: None,
        }
    }

    /// Spawn the supervisor. Returns false if it is already running.
    pub fn start(&mut self, sink: Arc<dyn NotificationSink>) -> bool {
        if self.is_running() {
            return false;
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(supervise(
            self.connector.clone(),
            self.config.clone(),
            sink,
            self.live.clone(),
            cancel.clone(),
        ));
        self.task = Some(ChannelTask { cancel, handle });
        true
    }

    /// Stop the supervisor and wait for it. `None` if it was never started.
    pub async fn stop(&mut self) -> Option<ChannelExit> {
        let task = self.task.take()?;
        task.cancel.cancel();
        let exit = match task.handle.await {
            Ok(exit) => exit,
            Err(e) => {
                error!(error = %e, "notification channel task failed");
                ChannelExit::Stopped
            }
        };
        self.live.store(false, Ordering::SeqCst);
        Some(exit)
    }

    /// Whether the supervisor task is still alive.
    pub fn is_running(&self) -> bool {
        self.task
            .as_ref()
            .is_some_and(|task| !task.handle.is_finished())
    }

    /// Whether notifications are currently flowing.
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }
}

impl Drop for NotificationChannel {
    fn drop(&mut self) {
        if let Some(task) = &self.task {
            task.cancel.cancel();
        }
    }
}

async fn supervise(
    connector: Arc<dyn ListenerConnector>,
    config: ChannelConfig,
    sink: Arc<dyn NotificationSink>,
    live: Arc<AtomicBool>,
    cancel: CancellationToken,
) -> ChannelExit {
    let backoff = RetryPolicy {
        max_attempts: config.max_reconnect_attempts.max(1),
        base: config.reconnect_base_delay,
        cap: config.reconnect_max_delay,
    };
    let mut failed_attempts: u32 = 0;

    loop {
        // Connect, backing off between failed attempts.
        let mut connection = loop {
            let attempt = tokio::select! {
                _ = cancel.cancelled() => return ChannelExit::Stopped,
                result = tokio::time::timeout(config.connect_timeout, connector.connect()) => result,
            };
            match attempt {
                Ok(Ok(connection)) => break connection,
                Ok(Err(e)) => warn!(error = %e, attempt = failed_attempts + 1, "listener connect failed"),
                Err(_) => warn!(attempt = failed_attempts + 1, "listener connect timed out"),
            }

            failed_attempts += 1;
            if failed_attempts >= backoff.max_attempts {
                return give_up(&live, failed_attempts);
            }
            let delay = backoff.delay(failed_attempts);
            tokio::select! {
                _ = cancel.cancelled() => return ChannelExit::Stopped,
                _ = tokio::time::sleep(delay) => {}
            }
        };

        live.store(true, Ordering::SeqCst);
        info!(channel = %config.channel_name, "notification channel connected");
        let mut next_health = Instant::now() + config.health_interval;

        let lost = loop {
            let batch = tokio::select! {
                _ = cancel.cancelled() => {
                    live.store(false, Ordering::SeqCst);
                    return ChannelExit::Stopped;
                }
                batch = connection.wait_batch(config.poll_timeout) => batch,
            };

            match batch {
                Ok(payloads) => {
                    if !payloads.is_empty() {
                        debug!(count = payloads.len(), "draining notifications");
                    }
                    for payload in payloads {
                        match Notification::parse(&payload) {
                            Ok(notification) => sink.deliver(notification),
                            Err(e) => {
                                warn!(error = %e, payload = %payload, "skipping malformed notification")
                            }
                        }
                    }
                }
                Err(e) => break e,
            }

            if Instant::now() >= next_health {
                match tokio::time::timeout(config.health_timeout, connection.ping()).await {
                    Ok(Ok(())) => {
                        failed_attempts = 0;
                        next_health = Instant::now() + config.health_interval;
                    }
                    Ok(Err(e)) => break e,
                    Err(_) => break ChannelError::HealthTimeout,
                }
            }
        };

        live.store(false, Ordering::SeqCst);
        drop(connection);
        let err = ControlError::from(lost);
        warn!(
            code = err.code(),
            error = %err,
            hint = err.recovery_hint(),
            "notification channel lost; reconnecting"
        );

        failed_attempts += 1;
        if failed_attempts >= backoff.max_attempts {
            return give_up(&live, failed_attempts);
        }
        let delay = backoff.delay(failed_attempts);
        tokio::select! {
            _ = cancel.cancelled() => return ChannelExit::Stopped,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

fn give_up(live: &AtomicBool, attempts: u32) -> ChannelExit {
    live.store(false, Ordering::SeqCst);
    error!(
        attempts,
        "notification channel giving up; live updates disabled until restart"
    );
    ChannelExit::Exhausted
}
