//! Worker process supervision.
//!
//! ```text
//! stopped ─► starting ─► running ─┬─► stopping ─► stopped
//!    ▲                            │
//!    │                            └─► crashed ─┬─► starting   (automatic retry)
//!    └─────────────────────────────────────────┴── stopped    (fatal, exhausted, breaker open)
//! ```
//!
//! `start`, `stop`, automatic retries and config reloads all take the single
//! lifecycle lock, so at most one transition is in flight. Each launched run
//! gets a monitor task that polls the child, confirms the run once it
//! survives the grace period, and classifies the exit.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::process::Child;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::exit::{classify_exit, ExitKind};
use super::invocation::Invocation;
use super::logs::{self, LogBuffer};
use super::os::{self, Liveness};
use super::state::{ProcessState, ReloadOutcome, StartOutcome, StatusSnapshot, StopOutcome};
use crate::common::{CircuitState, ControlError, InvocationParams, ProcessStatus, RunId};
use crate::config::{Config, ControllerConfig};
use crate::domains::runs::models::RunStatus;
use crate::kernel::notifications::NotificationDistributor;
use crate::kernel::retry::{Admission, BreakerTransition, RetryDecision, RetryPolicy};
use crate::kernel::traits::{RunStore, RunUpdate};

const PID_POLL_INTERVAL: Duration = Duration::from_millis(100);
const KILL_CONFIRM_TIMEOUT: Duration = Duration::from_secs(1);

/// Supervises the single crawler worker process.
pub struct ProcessController {
    config: ControllerConfig,
    retry: RetryPolicy,
    store: Arc<dyn RunStore>,
    distributor: Option<Arc<NotificationDistributor>>,
    logs: Arc<LogBuffer>,
    markers: Arc<[String]>,
    inner: Mutex<ControllerInner>,
    this: Weak<ProcessController>,
}

struct ControllerInner {
    state: ProcessState,
    child: Option<Child>,
    run: Option<RunContext>,
    /// Parameters of the current or most recent run.
    params: Option<InvocationParams>,
    /// Bumped by every launch and stop; stale monitors and retries compare it.
    generation: u64,
    retry_attempt: u32,
    pending_retry: Option<PendingRetry>,
}

struct RunContext {
    generation: u64,
    run_id: RunId,
    started: Instant,
    admission: Admission,
    /// Survived the grace period; the breaker already counted it a success.
    confirmed: bool,
    rate_limited: Arc<AtomicBool>,
    readers: Vec<JoinHandle<()>>,
}

struct PendingRetry {
    generation: u64,
    at: DateTime<Utc>,
    handle: JoinHandle<()>,
}

enum Observed {
    /// `uptime` is taken when the exit is first seen, before output drains.
    Exited { code: Option<i32>, uptime: Duration },
    /// Tracked by pid only and the pid is gone; exit status unknown.
    Vanished,
}

#[derive(Debug, Clone, Copy)]
enum Trigger {
    Operator,
    Retry,
    Reload,
}

impl Trigger {
    fn as_str(self) -> &'static str {
        match self {
            Trigger::Operator => "operator",
            Trigger::Retry => "retry",
            Trigger::Reload => "reload",
        }
    }
}

impl ProcessController {
    pub fn new(
        config: &Config,
        store: Arc<dyn RunStore>,
        distributor: Option<Arc<NotificationDistributor>>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            config: config.controller.clone(),
            retry: RetryPolicy::from(&config.retry),
            store,
            distributor,
            logs: Arc::new(LogBuffer::new(config.controller.log_buffer_lines)),
            markers: config.controller.rate_limit_markers.clone().into(),
            inner: Mutex::new(ControllerInner {
                state: ProcessState::new(config),
                child: None,
                run: None,
                params: None,
                generation: 0,
                retry_attempt: 0,
                pending_retry: None,
            }),
            this: this.clone(),
        })
    }

    // =========================================================================
    // Public operations
    // =========================================================================

    /// Launch the worker with `params`.
    ///
    /// An operator start supersedes a pending automatic retry.
    pub async fn start(&self, params: InvocationParams) -> Result<StartOutcome, ControlError> {
        let mut inner = self.inner.lock().await;
        self.refresh_locked(&mut inner).await;

        if inner.child.is_none() && inner.state.pid.is_none() {
            if let Some(retry) = inner.pending_retry.take() {
                retry.handle.abort();
                inner.retry_attempt = 0;
                debug!("operator start replaces pending retry");
            }
        }

        let run_id = self
            .start_locked(&mut inner, params, Trigger::Operator)
            .await?;
        Ok(StartOutcome {
            success: true,
            run_id,
            pid: inner.state.pid,
        })
    }

    /// Terminate the worker (SIGTERM, then SIGKILL after the stop timeout).
    pub async fn stop(&self) -> Result<StopOutcome, ControlError> {
        let mut inner = self.inner.lock().await;
        self.stop_locked(&mut inner).await
    }

    /// Whether a worker is alive. Clears state left by a worker that exited.
    pub async fn is_running(&self) -> bool {
        let mut inner = self.inner.lock().await;
        self.refresh_locked(&mut inner).await;
        inner.child.is_some() || inner.state.pid.is_some()
    }

    pub async fn get_status(&self) -> StatusSnapshot {
        let mut inner = self.inner.lock().await;
        self.refresh_locked(&mut inner).await;

        let now = Utc::now();
        let circuit_state = inner.state.breaker.observe(now);
        let state = &inner.state;
        StatusSnapshot {
            status: state.status,
            pid: state.pid,
            run_id: state.current_run_id,
            uptime_seconds: state.started_at.map(|at| (now - at).num_seconds().max(0)),
            params: inner.params.clone(),
            circuit_state,
            circuit_open_until: state.breaker.open_until(),
            failure_count: state.breaker.record().failure_count,
            consecutive_failures: state.consecutive_failures,
            current_qpi: inner.params.as_ref().map(|p| state.qpi.effective(p.qpi)),
            retry_attempt: inner.retry_attempt,
            next_retry_at: inner.pending_retry.as_ref().map(|retry| retry.at),
            last_error: state.last_error.clone(),
        }
    }

    /// Most recent `n` output lines, oldest first. Defaults to the whole buffer.
    pub fn get_logs(&self, n: Option<usize>) -> Vec<String> {
        self.logs.recent(n.unwrap_or_else(|| self.logs.capacity()))
    }

    /// Restart a live worker with new parameters under one lock acquisition.
    pub async fn reload(&self, params: InvocationParams) -> Result<ReloadOutcome, ControlError> {
        let mut inner = self.inner.lock().await;
        self.refresh_locked(&mut inner).await;

        let active = inner.child.is_some()
            || inner.state.pid.is_some()
            || inner.pending_retry.is_some();
        if !active {
            return Ok(ReloadOutcome::Idle);
        }

        // Keep the current worker when the new parameters can never start.
        params.validate()?;

        let previous = self.stop_locked(&mut inner).await?;
        let run_id = self
            .start_locked(&mut inner, params, Trigger::Reload)
            .await?;
        Ok(ReloadOutcome::Restarted {
            previous_run_id: previous.run_id,
            run_id,
        })
    }

    /// Re-attach to a worker left running by a previous controller.
    ///
    /// Such a worker is tracked by pid only: no output capture, no exit code.
    pub async fn recover(&self) -> Result<Option<RunId>, ControlError> {
        let mut inner = self.inner.lock().await;
        if inner.child.is_some() || inner.state.pid.is_some() {
            return Ok(None);
        }

        let Some(active) = self.store.find_active_run().await? else {
            return Ok(None);
        };

        match active.pid {
            Some(pid) if os::probe(pid) == Liveness::Alive => {
                inner.generation += 1;
                let generation = inner.generation;
                inner.run = Some(RunContext {
                    generation,
                    run_id: active.run_id,
                    started: Instant::now(),
                    admission: Admission::Normal,
                    confirmed: true,
                    rate_limited: Arc::new(AtomicBool::new(false)),
                    readers: Vec::new(),
                });
                inner.params = Some(active.params);
                inner.state.status = ProcessStatus::Running;
                inner.state.pid = Some(pid);
                inner.state.started_at = Some(active.started_at);
                inner.state.current_run_id = Some(active.run_id);

                info!(run_id = %active.run_id, pid, "re-attached to running crawler worker");
                self.spawn_monitor(generation);
                Ok(Some(active.run_id))
            }
            pid => {
                warn!(run_id = %active.run_id, pid = ?pid, "previous crawler run is no longer alive");
                self.record_run(
                    active.run_id,
                    RunUpdate::status(RunStatus::Crashed)
                        .with_error("worker was gone when the controller restarted"),
                )
                .await;
                Ok(None)
            }
        }
    }

    /// Stop whatever is running. Used at process teardown.
    pub async fn shutdown(&self) -> Option<StopOutcome> {
        match self.stop().await {
            Ok(outcome) => Some(outcome),
            Err(ControlError::NotRunning) => None,
            Err(e) => {
                warn!(error = %e, "crawler worker shutdown failed");
                None
            }
        }
    }

    // =========================================================================
    // Lifecycle transitions (lock held)
    // =========================================================================

    async fn start_locked(
        &self,
        inner: &mut ControllerInner,
        params: InvocationParams,
        trigger: Trigger,
    ) -> Result<RunId, ControlError> {
        if inner.child.is_some() || inner.state.pid.is_some() {
            return Err(ControlError::AlreadyRunning {
                pid: inner.state.pid,
            });
        }
        params.validate()?;
        let admission = inner.state.breaker.admit(Utc::now())?;

        match self.launch_locked(inner, params, admission, trigger).await {
            Ok(run_id) => Ok(run_id),
            Err(e) => {
                if admission == Admission::Trial {
                    inner.state.breaker.release_trial();
                }
                inner.state.status = ProcessStatus::Stopped;
                inner.state.last_error = Some(e.to_response());
                Err(e)
            }
        }
    }

    async fn launch_locked(
        &self,
        inner: &mut ControllerInner,
        params: InvocationParams,
        admission: Admission,
        trigger: Trigger,
    ) -> Result<RunId, ControlError> {
        let qpi = inner.state.qpi.effective(params.qpi);
        let invocation = Invocation::build(&self.config, &params, qpi)?;

        inner.state.status = ProcessStatus::Starting;
        let run_id = self.store.create_run(&params).await?;

        let mut child = match invocation.command().spawn() {
            Ok(child) => child,
            Err(source) => {
                error!(run_id = %run_id, program = %invocation.program, error = %source, "failed to spawn crawler worker");
                self.record_run(
                    run_id,
                    RunUpdate::status(RunStatus::Failed).with_error(source.to_string()),
                )
                .await;
                return Err(ControlError::ProcessStartFailed { source });
            }
        };
        let pid = child.id();

        // Retries keep the output of the run that failed.
        if matches!(trigger, Trigger::Operator) {
            self.logs.clear();
        }
        let rate_limited = Arc::new(AtomicBool::new(false));
        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(logs::spawn_reader(
                stdout,
                "stdout",
                self.logs.clone(),
                self.markers.clone(),
                rate_limited.clone(),
            ));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(logs::spawn_reader(
                stderr,
                "stderr",
                self.logs.clone(),
                self.markers.clone(),
                rate_limited.clone(),
            ));
        }

        inner.generation += 1;
        let generation = inner.generation;
        inner.child = Some(child);
        inner.run = Some(RunContext {
            generation,
            run_id,
            started: Instant::now(),
            admission,
            confirmed: false,
            rate_limited,
            readers,
        });
        inner.params = Some(params);
        inner.state.status = ProcessStatus::Running;
        inner.state.pid = pid;
        inner.state.started_at = Some(Utc::now());
        inner.state.current_run_id = Some(run_id);

        info!(
            run_id = %run_id,
            pid = ?pid,
            qpi,
            trigger = trigger.as_str(),
            trial = admission == Admission::Trial,
            command = %invocation.command_line(),
            "crawler worker started"
        );
        self.record_run(run_id, RunUpdate::status(RunStatus::Running).with_pid(pid))
            .await;
        self.spawn_monitor(generation);
        Ok(run_id)
    }

    async fn stop_locked(&self, inner: &mut ControllerInner) -> Result<StopOutcome, ControlError> {
        let cancelled_retry = match inner.pending_retry.take() {
            Some(retry) => {
                retry.handle.abort();
                true
            }
            None => false,
        };
        inner.generation += 1;
        inner.retry_attempt = 0;

        if inner.child.is_none() && inner.state.pid.is_none() {
            inner.state.status = ProcessStatus::Stopped;
            if cancelled_retry {
                info!("cancelled pending crawler retry");
                return Ok(StopOutcome {
                    run_id: None,
                    pid: None,
                    forced: false,
                    cancelled_retry,
                });
            }
            return Err(ControlError::NotRunning);
        }

        let pid = inner.state.pid;
        let run_id = inner.state.current_run_id;
        inner.state.status = ProcessStatus::Stopping;
        info!(run_id = ?run_id, pid = ?pid, "stopping crawler worker");

        let (forced, exit_code) = match (inner.child.take(), pid) {
            (Some(mut child), _) => self.terminate_child(&mut child).await,
            (None, Some(pid)) => (self.terminate_pid(pid).await, None),
            (None, None) => (false, None),
        };

        if let Some(mut run) = inner.run.take() {
            self.drain_readers(&mut run.readers).await;
            if run.admission == Admission::Trial && !run.confirmed {
                inner.state.breaker.release_trial();
            }
            if let Some(distributor) = &self.distributor {
                distributor.mark_finished(run.run_id);
            }
            self.record_run(
                run.run_id,
                RunUpdate::status(RunStatus::Stopped).with_exit_code(exit_code),
            )
            .await;
        }

        inner.state.clear_process();
        inner.state.status = ProcessStatus::Stopped;
        info!(run_id = ?run_id, forced, "crawler worker stopped");

        Ok(StopOutcome {
            run_id,
            pid,
            forced,
            cancelled_retry,
        })
    }

    // =========================================================================
    // Exit handling
    // =========================================================================

    fn poll_exit(&self, inner: &mut ControllerInner) -> Option<Observed> {
        let started = inner.run.as_ref().map(|run| run.started);
        if let Some(child) = inner.child.as_mut() {
            return match child.try_wait() {
                Ok(Some(status)) => Some(Observed::Exited {
                    code: status.code(),
                    uptime: started.map_or(Duration::ZERO, |at| at.elapsed()),
                }),
                Ok(None) => None,
                Err(e) => {
                    warn!(error = %e, "failed to poll crawler worker");
                    None
                }
            };
        }

        let pid = inner.state.pid?;
        match os::probe(pid) {
            Liveness::Alive => None,
            Liveness::Gone => Some(Observed::Vanished),
        }
    }

    async fn refresh_locked(&self, inner: &mut ControllerInner) {
        if let Some(observed) = self.poll_exit(inner) {
            self.handle_exit_locked(inner, observed).await;
        }
    }

    async fn handle_exit_locked(&self, inner: &mut ControllerInner, observed: Observed) {
        let pid = inner.state.pid;
        inner.child = None;
        inner.state.clear_process();
        let Some(mut run) = inner.run.take() else {
            inner.state.status = ProcessStatus::Stopped;
            return;
        };

        // Readers must finish so the rate-limit flag and logs are complete.
        self.drain_readers(&mut run.readers).await;
        if let Some(distributor) = &self.distributor {
            distributor.mark_finished(run.run_id);
        }

        let (code, uptime) = match observed {
            Observed::Exited { code, uptime } => (code, uptime),
            Observed::Vanished => {
                if run.admission == Admission::Trial && !run.confirmed {
                    inner.state.breaker.release_trial();
                }
                inner.state.status = ProcessStatus::Stopped;
                warn!(run_id = %run.run_id, pid = ?pid, "tracked crawler worker is gone; exit status unknown");
                self.record_run(
                    run.run_id,
                    RunUpdate::status(RunStatus::Stopped)
                        .with_error("worker exited while tracked by pid only"),
                )
                .await;
                return;
            }
        };

        let rate_limited = run.rate_limited.load(Ordering::SeqCst);
        let nominal = inner.params.as_ref().map_or(1, |p| p.qpi);

        let error = match classify_exit(code, uptime, &self.config) {
            ExitKind::Graceful => {
                if !run.confirmed {
                    inner.state.breaker.record_success();
                }
                if rate_limited {
                    inner.state.qpi.reduce(nominal);
                } else {
                    inner.state.qpi.restore(nominal);
                }
                inner.state.consecutive_failures = 0;
                inner.state.last_error = None;
                inner.state.status = ProcessStatus::Stopped;
                inner.retry_attempt = 0;
                info!(run_id = %run.run_id, uptime_secs = uptime.as_secs(), "crawler worker finished");
                self.record_run(
                    run.run_id,
                    RunUpdate::status(RunStatus::Completed).with_exit_code(code),
                )
                .await;
                return;
            }
            ExitKind::ConfigRejected { code } => {
                if run.admission == Admission::Trial && !run.confirmed {
                    inner.state.breaker.release_trial();
                }
                ControlError::ConfigInvalid {
                    reason: format!("worker rejected its parameters (exit code {code})"),
                }
            }
            ExitKind::EarlyExit { .. } | ExitKind::Crash { .. } if rate_limited => {
                ControlError::RateLimited {
                    code,
                    next_qpi: inner.state.qpi.reduce(nominal),
                }
            }
            ExitKind::EarlyExit { code, uptime } => ControlError::ProcessEarlyExit {
                code,
                uptime_ms: u64::try_from(uptime.as_millis()).unwrap_or(u64::MAX),
            },
            ExitKind::Crash { code, uptime } => ControlError::ProcessCrash {
                code,
                uptime_secs: uptime.as_secs(),
            },
        };

        if error.counts_as_failure() {
            inner.state.consecutive_failures += 1;
            match inner.state.breaker.record_failure(Utc::now()) {
                BreakerTransition::Counted { failure_count } => {
                    debug!(failure_count, "crawler failure counted")
                }
                BreakerTransition::Opened { until } | BreakerTransition::Reopened { until } => {
                    debug!(%until, "crawler starts blocked")
                }
            }
        }

        warn!(
            run_id = %run.run_id,
            pid = ?pid,
            code = error.code(),
            error = %error,
            hint = error.recovery_hint(),
            "crawler worker failed"
        );
        let status = match error {
            ControlError::ConfigInvalid { .. } => RunStatus::Failed,
            _ => RunStatus::Crashed,
        };
        self.record_run(
            run.run_id,
            RunUpdate::status(status)
                .with_exit_code(code)
                .with_error(error.to_string()),
        )
        .await;

        self.schedule_retry_or_settle(inner, error);
    }

    fn schedule_retry_or_settle(&self, inner: &mut ControllerInner, error: ControlError) {
        inner.state.last_error = Some(error.to_response());
        let breaker = inner.state.breaker.observe(Utc::now());

        match self.retry.decide(&error, inner.retry_attempt) {
            RetryDecision::Retry { attempt, delay } if breaker != CircuitState::Open => {
                let Some(this) = self.this.upgrade() else {
                    inner.state.status = ProcessStatus::Stopped;
                    return;
                };
                let generation = inner.generation;
                let at = Utc::now()
                    + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());

                info!(
                    attempt,
                    max_attempts = self.retry.max_attempts,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    code = error.code(),
                    "scheduling crawler retry"
                );
                let handle = tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    this.run_retry(generation).await;
                });

                inner.retry_attempt = attempt;
                inner.state.status = ProcessStatus::Crashed;
                inner.pending_retry = Some(PendingRetry {
                    generation,
                    at,
                    handle,
                });
            }
            RetryDecision::Retry { .. } => {
                info!(code = error.code(), "circuit breaker open; not retrying");
                self.settle(inner);
            }
            RetryDecision::Exhausted { attempts } => {
                error!(attempts, code = error.code(), "crawler retries exhausted");
                self.settle(inner);
            }
            RetryDecision::Fatal => self.settle(inner),
        }
    }

    fn settle(&self, inner: &mut ControllerInner) {
        inner.state.status = ProcessStatus::Stopped;
        inner.retry_attempt = 0;
    }

    async fn run_retry(self: Arc<Self>, generation: u64) {
        let mut inner = self.inner.lock().await;
        let current = inner.generation == generation
            && inner
                .pending_retry
                .as_ref()
                .is_some_and(|retry| retry.generation == generation);
        if !current {
            return;
        }
        inner.pending_retry = None;

        let Some(params) = inner.params.clone() else {
            self.settle(&mut inner);
            return;
        };
        let attempt = inner.retry_attempt;
        match self.start_locked(&mut inner, params, Trigger::Retry).await {
            Ok(run_id) => info!(run_id = %run_id, attempt, "crawler worker restarted"),
            Err(e) => {
                warn!(
                    attempt,
                    code = e.code(),
                    error = %e,
                    hint = e.recovery_hint(),
                    "automatic crawler restart failed"
                );
                self.schedule_retry_or_settle(&mut inner, e);
            }
        }
    }

    // =========================================================================
    // Monitoring
    // =========================================================================

    fn spawn_monitor(&self, generation: u64) {
        let Some(this) = self.this.upgrade() else {
            return;
        };
        tokio::spawn(this.monitor(generation));
    }

    async fn monitor(self: Arc<Self>, generation: u64) {
        let mut ticker = tokio::time::interval(self.config.monitor_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let mut inner = self.inner.lock().await;
            if !inner
                .run
                .as_ref()
                .is_some_and(|run| run.generation == generation)
            {
                return;
            }

            if let Some(observed) = self.poll_exit(&mut inner) {
                self.handle_exit_locked(&mut inner, observed).await;
                return;
            }
            self.confirm_if_due(&mut inner);
        }
    }

    fn confirm_if_due(&self, inner: &mut ControllerInner) {
        let Some(run) = inner.run.as_mut() else {
            return;
        };
        if run.confirmed || run.started.elapsed() < self.config.success_grace {
            return;
        }

        run.confirmed = true;
        inner.state.breaker.record_success();
        inner.state.consecutive_failures = 0;
        inner.retry_attempt = 0;
        info!(run_id = %run.run_id, "crawler run passed its grace period");
    }

    // =========================================================================
    // Termination
    // =========================================================================

    /// Returns `(forced, exit_code)`.
    async fn terminate_child(&self, child: &mut Child) -> (bool, Option<i32>) {
        if let Some(pid) = child.id() {
            if let Err(e) = os::terminate(pid) {
                warn!(pid, error = %e, "failed to send SIGTERM to crawler worker");
            }
        }

        match tokio::time::timeout(self.config.stop_timeout, child.wait()).await {
            Ok(Ok(status)) => (false, status.code()),
            Ok(Err(e)) => {
                warn!(error = %e, "failed waiting for crawler worker to exit");
                (false, None)
            }
            Err(_) => {
                warn!(
                    timeout_secs = self.config.stop_timeout.as_secs(),
                    "crawler worker ignored SIGTERM; killing"
                );
                if let Err(e) = child.kill().await {
                    error!(error = %e, "failed to kill crawler worker");
                }
                (true, None)
            }
        }
    }

    /// Stop a worker we hold no handle for. Returns whether SIGKILL was needed.
    async fn terminate_pid(&self, pid: u32) -> bool {
        if let Err(e) = os::terminate(pid) {
            warn!(pid, error = %e, "failed to send SIGTERM to crawler worker");
        }
        if wait_gone(pid, self.config.stop_timeout).await {
            return false;
        }

        warn!(pid, "crawler worker ignored SIGTERM; killing");
        if let Err(e) = os::force_kill(pid) {
            error!(pid, error = %e, "failed to kill crawler worker");
        }
        if !wait_gone(pid, KILL_CONFIRM_TIMEOUT).await {
            error!(pid, "crawler worker still alive after SIGKILL");
        }
        true
    }

    async fn drain_readers(&self, readers: &mut Vec<JoinHandle<()>>) {
        for reader in readers.drain(..) {
            if tokio::time::timeout(self.config.log_drain_timeout, reader)
                .await
                .is_err()
            {
                debug!("worker output still open after exit; detaching reader");
            }
        }
    }

    async fn record_run(&self, run_id: RunId, update: RunUpdate) {
        let status = update.status;
        if let Err(e) = self.store.update_run(run_id, update).await {
            error!(run_id = %run_id, status = ?status, error = %e, "failed to record crawler run status");
        }
    }
}

async fn wait_gone(pid: u32, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if os::probe(pid) == Liveness::Gone {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(PID_POLL_INTERVAL).await;
    }
}
