//! Process controller integration tests.
//!
//! Each test launches real `/bin/sh` workers from a temp dir and checks the
//! lifecycle, exit classification, breaker and retry behaviour end to end.

mod common;

use std::sync::Arc;
use std::time::Duration;

use crate::common::*;
use crawler_control::common::{CircuitState, ControlError, InvocationParams, ProcessStatus};
use crawler_control::domains::runs::models::RunStatus;
use crawler_control::kernel::notifications::{Notification, NotificationDistributor};
use crawler_control::kernel::TestRunStore;
use crawler_control::process::{global, ProcessController};
use serde_json::json;

fn error_code(status: &crawler_control::process::StatusSnapshot) -> Option<&str> {
    status.last_error.as_ref().map(|e| e.code.as_str())
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test]
async fn start_reports_running_and_refuses_second_start() {
    let script = WorkerScript::new(LONG_RUNNING);
    let (controller, store) = controller(&test_config(&script));

    let outcome = controller.start(recruiter_params()).await.unwrap();
    assert!(outcome.success);
    assert!(outcome.pid.is_some());
    assert!(controller.is_running().await);

    let err = controller.start(recruiter_params()).await.unwrap_err();
    assert!(matches!(err, ControlError::AlreadyRunning { pid } if pid == outcome.pid));
    assert_eq!(store.runs().len(), 1);

    let status = controller.get_status().await;
    assert_eq!(status.status, ProcessStatus::Running);
    assert_eq!(status.run_id, Some(outcome.run_id));
    assert_eq!(status.pid, outcome.pid);
    assert_eq!(status.current_qpi, Some(15));
    assert_eq!(status.circuit_state, CircuitState::Closed);

    controller.stop().await.unwrap();
}

#[tokio::test]
async fn worker_output_is_captured_with_invocation_args() {
    let script = WorkerScript::new(LONG_RUNNING);
    let (controller, _store) = controller(&test_config(&script));
    controller.start(recruiter_params()).await.unwrap();

    let c = &*controller;
    assert!(
        wait_until(Duration::from_secs(5), move || async move {
            !c.get_logs(None).is_empty()
        })
        .await
    );
    assert_eq!(
        controller.get_logs(Some(1)),
        vec!["worker args: --industry recruiter --qpi 15 --once"]
    );

    controller.stop().await.unwrap();
}

#[tokio::test]
async fn stop_terminates_and_records_run() {
    let script = WorkerScript::new(LONG_RUNNING);
    let (controller, store) = controller(&test_config(&script));
    let started = controller.start(recruiter_params()).await.unwrap();

    let outcome = controller.stop().await.unwrap();
    assert!(!outcome.forced);
    assert!(!outcome.cancelled_retry);
    assert_eq!(outcome.run_id, Some(started.run_id));
    assert!(!controller.is_running().await);

    let status = controller.get_status().await;
    assert_eq!(status.status, ProcessStatus::Stopped);
    assert_eq!(status.pid, None);

    let run = store.run(started.run_id).unwrap();
    assert_eq!(
        run.history,
        vec![RunStatus::Starting, RunStatus::Running, RunStatus::Stopped]
    );
    assert_eq!(run.pid, started.pid);

    assert!(matches!(
        controller.stop().await,
        Err(ControlError::NotRunning)
    ));
}

#[tokio::test]
async fn stop_escalates_when_term_is_ignored() {
    let script = WorkerScript::new(IGNORES_TERM);
    let mut config = test_config(&script);
    config.controller.stop_timeout = Duration::from_millis(300);
    let (controller, _store) = controller(&config);
    controller.start(recruiter_params()).await.unwrap();

    let c = &*controller;
    assert!(
        wait_until(Duration::from_secs(5), move || async move {
            c.get_logs(None).iter().any(|line| line == "ready")
        })
        .await
    );

    let outcome = controller.stop().await.unwrap();
    assert!(outcome.forced);
    assert!(!controller.is_running().await);
}

#[tokio::test]
async fn clean_exit_completes_run() {
    let script = WorkerScript::new(FINISHES);
    let (controller, store) = controller(&test_config(&script));
    let started = controller.start(recruiter_params()).await.unwrap();
    assert!(wait_for_exit(&controller).await);

    let status = controller.get_status().await;
    assert_eq!(status.status, ProcessStatus::Stopped);
    assert!(status.last_error.is_none());

    let run = store.run(started.run_id).unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.exit_code, Some(0));
}

// ============================================================================
// Start validation
// ============================================================================

#[tokio::test]
async fn missing_entrypoint_is_refused_before_any_run() {
    let script = WorkerScript::new(LONG_RUNNING);
    let mut config = test_config(&script);
    config.controller.entrypoint = script.path.with_file_name("missing.sh");
    let (controller, store) = controller(&config);

    let err = controller.start(recruiter_params()).await.unwrap_err();
    assert_eq!(err.code(), "SCRIPT_NOT_FOUND");
    assert!(store.runs().is_empty());

    let status = controller.get_status().await;
    assert_eq!(status.status, ProcessStatus::Stopped);
    assert_eq!(error_code(&status), Some("SCRIPT_NOT_FOUND"));
}

#[tokio::test]
async fn invalid_params_are_rejected() {
    let script = WorkerScript::new(LONG_RUNNING);
    let (controller, store) = controller(&test_config(&script));

    let params = InvocationParams::builder().industry("recruiter").qpi(0u32).build();
    let err = controller.start(params).await.unwrap_err();
    assert!(matches!(err, ControlError::ConfigInvalid { .. }));
    assert!(store.runs().is_empty());
    assert!(!controller.is_running().await);
}

#[tokio::test]
async fn spawn_failure_marks_run_failed() {
    let script = WorkerScript::new(LONG_RUNNING);
    let mut config = test_config(&script);
    config.controller.interpreter = Some("/nonexistent/interpreter".to_string());
    let (controller, store) = controller(&config);

    let err = controller.start(recruiter_params()).await.unwrap_err();
    assert_eq!(err.code(), "PROCESS_START_FAILED");

    let runs = store.runs();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, RunStatus::Failed);
    assert!(runs[0].error.is_some());
}

#[tokio::test]
async fn store_failure_refuses_start() {
    let script = WorkerScript::new(LONG_RUNNING);
    let (controller, store) = controller(&test_config(&script));
    store.fail_writes(true);

    let err = controller.start(recruiter_params()).await.unwrap_err();
    assert_eq!(err.code(), "STORE_ERROR");
    assert!(!controller.is_running().await);

    let status = controller.get_status().await;
    assert_eq!(status.status, ProcessStatus::Stopped);
    assert_eq!(error_code(&status), Some("STORE_ERROR"));
    assert!(store.runs().is_empty());

    store.fail_writes(false);
    controller.start(recruiter_params()).await.unwrap();
    controller.stop().await.unwrap();
}

// ============================================================================
// Exit classification
// ============================================================================

#[tokio::test]
async fn fast_failure_is_an_early_exit() {
    let script = WorkerScript::new(FAILS_FAST);
    let (controller, store) = controller(&test_config(&script));
    let started = controller.start(recruiter_params()).await.unwrap();
    assert!(wait_for_exit(&controller).await);

    let status = controller.get_status().await;
    assert_eq!(status.status, ProcessStatus::Stopped);
    assert_eq!(error_code(&status), Some("PROCESS_EARLY_EXIT"));
    assert_eq!(status.consecutive_failures, 1);
    assert_eq!(status.failure_count, 1);
    assert!(controller.get_logs(None).contains(&"boom".to_string()));

    let run = store.run(started.run_id).unwrap();
    assert_eq!(run.status, RunStatus::Crashed);
    assert_eq!(run.exit_code, Some(3));
}

#[tokio::test]
async fn same_exit_after_window_is_a_crash() {
    let script = WorkerScript::new("sleep 0.3\nexit 3");
    let mut config = test_config(&script);
    config.controller.early_exit_window = Duration::from_millis(50);
    let (controller, _store) = controller(&config);

    controller.start(recruiter_params()).await.unwrap();
    assert!(wait_for_exit(&controller).await);
    assert_eq!(
        error_code(&controller.get_status().await),
        Some("PROCESS_CRASH")
    );
}

#[tokio::test]
async fn exit_is_timed_before_output_drains() {
    // The background sleep keeps the output pipes open after the worker exits.
    let script = WorkerScript::new("sleep 5 &\nexit 3");
    let mut config = test_config(&script);
    config.controller.early_exit_window = Duration::from_secs(1);
    config.controller.log_drain_timeout = Duration::from_secs(1);
    let (controller, _store) = controller(&config);

    controller.start(recruiter_params()).await.unwrap();
    let c = &*controller;
    assert!(
        wait_until(Duration::from_secs(10), move || async move {
            !c.is_running().await
        })
        .await
    );
    assert_eq!(
        error_code(&controller.get_status().await),
        Some("PROCESS_EARLY_EXIT")
    );
}

#[tokio::test]
async fn config_error_exit_is_not_counted_by_breaker() {
    let script = WorkerScript::new("echo 'unknown industry' >&2\nexit 2");
    let (controller, store) = controller(&test_config(&script));
    let started = controller.start(recruiter_params()).await.unwrap();
    assert!(wait_for_exit(&controller).await);

    let status = controller.get_status().await;
    assert_eq!(error_code(&status), Some("CONFIG_INVALID"));
    assert_eq!(status.failure_count, 0);
    assert_eq!(status.consecutive_failures, 0);
    assert_eq!(store.run(started.run_id).unwrap().status, RunStatus::Failed);
}

#[tokio::test]
async fn rate_limited_run_cuts_qpi_for_next_start() {
    let script = WorkerScript::new(RATE_LIMITED);
    let (controller, _store) = controller(&test_config(&script));
    let params = InvocationParams::builder().industry("recruiter").qpi(16u32).build();

    controller.start(params.clone()).await.unwrap();
    assert!(wait_for_exit(&controller).await);
    let status = controller.get_status().await;
    assert_eq!(error_code(&status), Some("RATE_LIMITED"));
    assert_eq!(status.current_qpi, Some(8));

    controller.start(params).await.unwrap();
    assert!(wait_for_exit(&controller).await);
    assert!(controller
        .get_logs(None)
        .contains(&"worker args: --industry recruiter --qpi 8".to_string()));
    assert_eq!(controller.get_status().await.current_qpi, Some(4));
}

// ============================================================================
// Circuit breaker and retries
// ============================================================================

#[tokio::test]
async fn breaker_opens_after_threshold_and_admits_one_trial() {
    let script = WorkerScript::new(FAILS_FAST);
    let (controller, store) = controller(&test_config(&script));

    for _ in 0..3 {
        controller.start(recruiter_params()).await.unwrap();
        assert!(wait_for_exit(&controller).await);
    }
    let status = controller.get_status().await;
    assert_eq!(status.circuit_state, CircuitState::Open);
    assert_eq!(status.failure_count, 3);
    assert!(status.circuit_open_until.is_some());

    let err = controller.start(recruiter_params()).await.unwrap_err();
    assert!(matches!(
        err,
        ControlError::CircuitBreakerOpen {
            state: CircuitState::Open,
            ..
        }
    ));
    assert_eq!(store.runs().len(), 3);

    // Cool-down over: one trial. It fails and the breaker reopens.
    tokio::time::sleep(Duration::from_millis(350)).await;
    assert_eq!(
        controller.get_status().await.circuit_state,
        CircuitState::HalfOpen
    );
    controller.start(recruiter_params()).await.unwrap();
    assert!(wait_for_exit(&controller).await);
    assert_eq!(controller.get_status().await.circuit_state, CircuitState::Open);
    assert!(controller.start(recruiter_params()).await.is_err());

    // The second cool-down doubled; a clean trial closes the breaker.
    script.rewrite(FINISHES);
    tokio::time::sleep(Duration::from_millis(650)).await;
    controller.start(recruiter_params()).await.unwrap();
    assert!(wait_for_exit(&controller).await);

    let status = controller.get_status().await;
    assert_eq!(status.circuit_state, CircuitState::Closed);
    assert_eq!(status.failure_count, 0);
    assert_eq!(status.consecutive_failures, 0);
    assert!(status.last_error.is_none());
}

#[tokio::test]
async fn trial_surviving_grace_period_closes_breaker() {
    let script = WorkerScript::new(FAILS_FAST);
    let mut config = test_config(&script);
    config.controller.success_grace = Duration::from_millis(200);
    let (controller, _store) = controller(&config);

    for _ in 0..3 {
        controller.start(recruiter_params()).await.unwrap();
        assert!(wait_for_exit(&controller).await);
    }
    assert_eq!(controller.get_status().await.circuit_state, CircuitState::Open);

    script.rewrite(LONG_RUNNING);
    tokio::time::sleep(Duration::from_millis(350)).await;
    controller.start(recruiter_params()).await.unwrap();
    assert_eq!(
        controller.get_status().await.circuit_state,
        CircuitState::HalfOpen
    );

    let c = &*controller;
    assert!(
        wait_until(Duration::from_secs(5), move || async move {
            let status = c.get_status().await;
            status.circuit_state == CircuitState::Closed && status.failure_count == 0
        })
        .await
    );
    assert!(controller.is_running().await);
    assert_eq!(controller.get_status().await.consecutive_failures, 0);

    controller.stop().await.unwrap();
}

#[tokio::test]
async fn crashes_are_retried_until_exhausted() {
    let script = WorkerScript::new("sleep 0.1\nexit 1");
    let mut config = test_config(&script);
    config.controller.early_exit_window = Duration::ZERO;
    config.retry.max_attempts = 2;
    config.breaker.threshold = 10;
    let (controller, store) = controller(&config);

    controller.start(recruiter_params()).await.unwrap();

    let c = &*controller;
    let s = &store;
    assert!(
        wait_until(Duration::from_secs(10), move || async move {
            s.runs().len() == 3 && c.get_status().await.status == ProcessStatus::Stopped
        })
        .await
    );

    let status = controller.get_status().await;
    assert_eq!(error_code(&status), Some("PROCESS_CRASH"));
    assert_eq!(status.consecutive_failures, 3);
    assert_eq!(status.retry_attempt, 0);
    assert!(status.next_retry_at.is_none());
    assert!(store
        .runs()
        .iter()
        .all(|run| run.status == RunStatus::Crashed));
}

#[tokio::test]
async fn stop_cancels_pending_retry() {
    let script = WorkerScript::new("exit 1");
    let mut config = test_config(&script);
    config.controller.early_exit_window = Duration::ZERO;
    config.retry.max_attempts = 3;
    config.retry.base_delay = Duration::from_secs(5);
    config.retry.max_delay = Duration::from_secs(5);
    let (controller, store) = controller(&config);

    controller.start(recruiter_params()).await.unwrap();
    let c = &*controller;
    assert!(
        wait_until(Duration::from_secs(5), move || async move {
            c.get_status().await.status == ProcessStatus::Crashed
        })
        .await
    );
    assert!(controller.get_status().await.next_retry_at.is_some());

    let outcome = controller.stop().await.unwrap();
    assert!(outcome.cancelled_retry);
    assert_eq!(outcome.run_id, None);

    let status = controller.get_status().await;
    assert_eq!(status.status, ProcessStatus::Stopped);
    assert!(status.next_retry_at.is_none());
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(store.runs().len(), 1);
}

#[tokio::test]
async fn surviving_grace_period_resets_failures() {
    let script = WorkerScript::new(FAILS_FAST);
    let mut config = test_config(&script);
    config.controller.success_grace = Duration::from_millis(200);
    let (controller, _store) = controller(&config);

    controller.start(recruiter_params()).await.unwrap();
    assert!(wait_for_exit(&controller).await);
    assert_eq!(controller.get_status().await.consecutive_failures, 1);

    script.rewrite(LONG_RUNNING);
    controller.start(recruiter_params()).await.unwrap();
    let c = &*controller;
    assert!(
        wait_until(Duration::from_secs(5), move || async move {
            let status = c.get_status().await;
            status.consecutive_failures == 0 && status.failure_count == 0
        })
        .await
    );
    assert!(controller.is_running().await);

    controller.stop().await.unwrap();
}

// ============================================================================
// Collaborators
// ============================================================================

#[tokio::test]
async fn finished_runs_are_released_from_distributor() {
    init_tracing();
    let script = WorkerScript::new(LONG_RUNNING);
    let distributor = Arc::new(NotificationDistributor::with_capacity(10));
    let store = TestRunStore::new();
    let controller = ProcessController::new(
        &test_config(&script),
        Arc::new(store.clone()),
        Some(distributor.clone()),
    );

    let started = controller.start(recruiter_params()).await.unwrap();
    distributor.put(Notification::new(started.run_id, 1, "started", json!({})));
    assert_eq!(distributor.sweep(), 0);

    controller.stop().await.unwrap();
    assert_eq!(distributor.sweep(), 1);
    assert_eq!(distributor.stats().total_buffers, 0);
}

#[cfg(unix)]
#[tokio::test]
async fn recover_tracks_orphaned_worker_by_pid() {
    let mut orphan = std::process::Command::new("sleep").arg("30").spawn().unwrap();
    let pid = orphan.id();
    let reaper = std::thread::spawn(move || orphan.wait());

    let script = WorkerScript::new(LONG_RUNNING);
    let (controller, store) = controller(&test_config(&script));
    let run_id = store.seed_active_run(recruiter_params(), Some(pid));

    assert_eq!(controller.recover().await.unwrap(), Some(run_id));
    assert!(controller.is_running().await);
    let status = controller.get_status().await;
    assert_eq!(status.pid, Some(pid));
    assert_eq!(status.run_id, Some(run_id));
    assert!(matches!(
        controller.start(recruiter_params()).await,
        Err(ControlError::AlreadyRunning { .. })
    ));

    let outcome = controller.stop().await.unwrap();
    assert!(!outcome.forced);
    assert_eq!(outcome.pid, Some(pid));
    reaper.join().unwrap().unwrap();

    assert!(!controller.is_running().await);
    assert_eq!(store.run(run_id).unwrap().status, RunStatus::Stopped);
}

#[cfg(unix)]
#[tokio::test]
async fn recover_marks_dead_run_crashed() {
    let mut gone = std::process::Command::new("true").spawn().unwrap();
    let pid = gone.id();
    gone.wait().unwrap();

    let script = WorkerScript::new(LONG_RUNNING);
    let (controller, store) = controller(&test_config(&script));
    let run_id = store.seed_active_run(recruiter_params(), Some(pid));

    assert_eq!(controller.recover().await.unwrap(), None);
    assert!(!controller.is_running().await);
    assert_eq!(store.run(run_id).unwrap().status, RunStatus::Crashed);
}

#[tokio::test]
async fn global_controller_is_installed_once() {
    let script = WorkerScript::new(LONG_RUNNING);
    let (controller, _store) = controller(&test_config(&script));
    let (other, _) = crate::common::controller(&test_config(&script));

    assert!(global::install(controller.clone()).is_ok());
    assert!(global::install(other).is_err());
    assert!(Arc::ptr_eq(&global::global().unwrap(), &controller));

    controller.start(recruiter_params()).await.unwrap();
    let outcome = global::shutdown().await.unwrap();
    assert!(outcome.run_id.is_some());
    assert!(global::shutdown().await.is_none());
}
