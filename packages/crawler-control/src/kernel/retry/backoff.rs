//! Retry decisions and exponential backoff.
//!
//! The delay for attempt `n` (1-indexed) is `base × 2^(n-1)`, clamped to `cap`.
//! Configuration-class errors are never retried.

use std::time::Duration;

use crate::common::{ControlError, ErrorClass};
use crate::config::RetryConfig;

/// Outcome of asking whether a failure should be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after `delay`; `attempt` is the 1-indexed retry number.
    Retry { attempt: u32, delay: Duration },
    /// Retryable, but the attempt budget is spent.
    Exhausted { attempts: u32 },
    /// Never retried (configuration defect, startup failure, refused request).
    Fatal,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base: Duration,
    pub cap: Duration,
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base: config.base_delay,
            cap: config.max_delay,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl RetryPolicy {
    /// Backoff delay for the given 1-indexed attempt.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        let factor = 1u32 << exp;
        self.base
            .checked_mul(factor)
            .map_or(self.cap, |d| d.min(self.cap))
    }

    /// Decide whether to retry `error` given how many retries already happened.
    pub fn decide(&self, error: &ControlError, attempts_so_far: u32) -> RetryDecision {
        match error.class() {
            ErrorClass::Transient | ErrorClass::RateLimited => {
                if attempts_so_far >= self.max_attempts {
                    RetryDecision::Exhausted {
                        attempts: attempts_so_far,
                    }
                } else {
                    let attempt = attempts_so_far + 1;
                    RetryDecision::Retry {
                        attempt,
                        delay: self.delay(attempt),
                    }
                }
            }
            ErrorClass::Startup | ErrorClass::Configuration | ErrorClass::Refused => {
                RetryDecision::Fatal
            }
        }
    }
}
