//! Failure circuit breaker.
//!
//! ```text
//!            failures >= threshold                cool-down elapsed
//! Closed ─────────────────────────► Open ─────────────────────────► HalfOpen
//!   ▲                                 ▲                                │
//!   │        trial succeeded          │      trial failed             │
//!   └─────────────────────────────────┼────────────────────────────────┤
//!                                     └────────────────────────────────┘
//! ```
//!
//! All methods take `now` explicitly so the state machine stays pure. The
//! breaker only leaves `Open` when it is observed after the deadline, which
//! keeps `open_until` in the future whenever the reported state is `Open`.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::common::{CircuitState, ControlError};
use crate::config::BreakerConfig;

/// Failure accounting for the breaker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CircuitBreakerRecord {
    pub failure_count: u32,
    pub window_start: Option<DateTime<Utc>>,
    pub threshold: u32,
    /// Cool-down applied by the next opening.
    pub cool_down: Duration,
}

/// What an admitted start is allowed to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Normal,
    /// The single start permitted while half-open.
    Trial,
}

/// Effect of recording a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerTransition {
    Counted { failure_count: u32 },
    Opened { until: DateTime<Utc> },
    Reopened { until: DateTime<Utc> },
}

#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    config: BreakerConfig,
    record: CircuitBreakerRecord,
    state: CircuitState,
    open_until: Option<DateTime<Utc>>,
    trial_in_flight: bool,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        let record = CircuitBreakerRecord {
            failure_count: 0,
            window_start: None,
            threshold: config.threshold.max(1),
            cool_down: config.cool_down,
        };
        Self {
            config,
            record,
            state: CircuitState::Closed,
            open_until: None,
            trial_in_flight: false,
        }
    }

    pub fn record(&self) -> &CircuitBreakerRecord {
        &self.record
    }

    pub fn open_until(&self) -> Option<DateTime<Utc>> {
        self.open_until
    }

    /// Current state, moving `Open` to `HalfOpen` once the cool-down elapsed.
    pub fn observe(&mut self, now: DateTime<Utc>) -> CircuitState {
        if self.state == CircuitState::Open {
            if let Some(until) = self.open_until {
                if now >= until {
                    tracing::info!(%until, "circuit breaker cool-down elapsed; half-open");
                    self.state = CircuitState::HalfOpen;
                    self.open_until = None;
                    self.trial_in_flight = false;
                }
            }
        }
        self.state
    }

    /// Gate a start attempt.
    pub fn admit(&mut self, now: DateTime<Utc>) -> Result<Admission, ControlError> {
        match self.observe(now) {
            CircuitState::Closed => Ok(Admission::Normal),
            CircuitState::Open => Err(ControlError::CircuitBreakerOpen {
                state: CircuitState::Open,
                until: self.open_until,
            }),
            CircuitState::HalfOpen if self.trial_in_flight => {
                Err(ControlError::CircuitBreakerOpen {
                    state: CircuitState::HalfOpen,
                    until: None,
                })
            }
            CircuitState::HalfOpen => {
                self.trial_in_flight = true;
                Ok(Admission::Trial)
            }
        }
    }

    /// Give back an admitted trial that never reached a verdict (operator stop).
    pub fn release_trial(&mut self) {
        self.trial_in_flight = false;
    }

    pub fn record_failure(&mut self, now: DateTime<Utc>) -> BreakerTransition {
        match self.observe(now) {
            CircuitState::HalfOpen => {
                self.record.failure_count += 1;
                let until = self.open(now);
                BreakerTransition::Reopened { until }
            }
            CircuitState::Open => {
                self.record.failure_count += 1;
                BreakerTransition::Counted {
                    failure_count: self.record.failure_count,
                }
            }
            CircuitState::Closed => {
                let window = to_chrono(self.config.window);
                let expired = self
                    .record
                    .window_start
                    .map_or(true, |start| now - start > window);
                if expired {
                    self.record.window_start = Some(now);
                    self.record.failure_count = 0;
                }

                self.record.failure_count += 1;
                if self.record.failure_count >= self.record.threshold {
                    let until = self.open(now);
                    BreakerTransition::Opened { until }
                } else {
                    BreakerTransition::Counted {
                        failure_count: self.record.failure_count,
                    }
                }
            }
        }
    }

    /// A run survived its grace period or exited cleanly.
    pub fn record_success(&mut self) {
        if self.state != CircuitState::Closed {
            tracing::info!("circuit breaker closed after successful trial run");
        }
        self.state = CircuitState::Closed;
        self.open_until = None;
        self.trial_in_flight = false;
        self.record.failure_count = 0;
        self.record.window_start = None;
        self.record.cool_down = self.config.cool_down;
    }

    fn open(&mut self, now: DateTime<Utc>) -> DateTime<Utc> {
        let until = now + to_chrono(self.record.cool_down);
        tracing::warn!(
            failure_count = self.record.failure_count,
            cool_down_secs = self.record.cool_down.as_secs(),
            %until,
            "circuit breaker opened"
        );
        self.state = CircuitState::Open;
        self.open_until = Some(until);
        self.trial_in_flight = false;

        let grown = self
            .record
            .cool_down
            .mul_f64(self.config.cool_down_multiplier.max(1.0));
        self.record.cool_down = grown.min(self.config.max_cool_down);
        until
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::milliseconds(duration.as_millis().min(i64::MAX as u128) as i64)
}
