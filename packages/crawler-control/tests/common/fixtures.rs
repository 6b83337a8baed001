//! Test fixtures: fake worker scripts and fast controller configs.
//!
//! Workers are `/bin/sh` scripts in a temp dir. Long-running ones `exec` into
//! their final command so SIGTERM reaches the process holding the pipes.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crawler_control::common::InvocationParams;
use crawler_control::config::{BreakerConfig, Config, ControllerConfig, RetryConfig};
use crawler_control::kernel::TestRunStore;
use crawler_control::process::ProcessController;
use tempfile::TempDir;

/// A shell script standing in for the crawler worker.
pub struct WorkerScript {
    _dir: TempDir,
    pub path: PathBuf,
}

impl WorkerScript {
    pub fn new(body: &str) -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("worker.sh");
        let script = Self { _dir: dir, path };
        script.rewrite(body);
        script
    }

    /// Replace the script body; the next launch runs the new one.
    pub fn rewrite(&self, body: &str) {
        std::fs::write(&self.path, format!("#!/bin/sh\n{body}\n"))
            .expect("Failed to write worker script");
    }
}

/// Prints its arguments, then sleeps until signalled.
pub const LONG_RUNNING: &str = r#"echo "worker args: $*"
exec sleep 30"#;

/// Dies immediately with a generic failure.
pub const FAILS_FAST: &str = r#"echo "boom" >&2
exit 3"#;

/// Ignores SIGTERM so stop has to escalate.
pub const IGNORES_TERM: &str = r#"trap '' TERM
echo "ready"
while :; do sleep 0.1; done"#;

pub const RATE_LIMITED: &str = r#"echo "worker args: $*"
echo "HTTP 429 Too Many Requests"
exit 1"#;

pub const FINISHES: &str = r#"echo "done"
exit 0"#;

/// Config with short timings; automatic retries disabled.
pub fn test_config(script: &WorkerScript) -> Config {
    Config {
        controller: ControllerConfig {
            entrypoint: script.path.clone(),
            interpreter: Some("/bin/sh".to_string()),
            working_dir: None,
            stop_timeout: Duration::from_secs(2),
            early_exit_window: Duration::from_secs(5),
            success_grace: Duration::from_secs(60),
            monitor_interval: Duration::from_millis(25),
            log_drain_timeout: Duration::from_millis(500),
            ..Default::default()
        },
        breaker: BreakerConfig {
            threshold: 3,
            window: Duration::from_secs(60),
            cool_down: Duration::from_millis(300),
            cool_down_multiplier: 2.0,
            max_cool_down: Duration::from_secs(5),
        },
        retry: RetryConfig {
            max_attempts: 0,
            base_delay: Duration::from_millis(20),
            max_delay: Duration::from_millis(100),
        },
        ..Default::default()
    }
}

pub fn recruiter_params() -> InvocationParams {
    InvocationParams::builder()
        .industry("recruiter")
        .qpi(15u32)
        .once(true)
        .build()
}

pub fn controller(config: &Config) -> (Arc<ProcessController>, TestRunStore) {
    init_tracing();
    let store = TestRunStore::new();
    let controller = ProcessController::new(config, Arc::new(store.clone()), None);
    (controller, store)
}

/// Poll `check` until it holds or `timeout` elapses.
pub async fn wait_until<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Wait until the controller has settled after a worker exit.
pub async fn wait_for_exit(controller: &ProcessController) -> bool {
    wait_until(Duration::from_secs(5), move || async move {
        !controller.is_running().await
    })
    .await
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
