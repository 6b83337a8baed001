//! Failure policy: retry decisions, the circuit breaker and the qpi governor.
//!
//! Everything here is pure decision logic. The process controller owns the
//! instances and feeds them exit classifications under its lifecycle lock.

mod backoff;
mod breaker;
mod qpi;

pub use backoff::{RetryDecision, RetryPolicy};
pub use breaker::{Admission, BreakerTransition, CircuitBreaker, CircuitBreakerRecord};
pub use qpi::QpiGovernor;
