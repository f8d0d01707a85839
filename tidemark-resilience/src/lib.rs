//! Resilience primitives for Tidemark remote calls.
//!
//! - `classify`: sorts failures into transient, permanent, conflict and auth
//! - `retry`: exponential backoff with jitter for transient failures
//! - `circuit_breaker`: per call-site breaker with a timeout-rate guard
//!
//! Callers wrap a retrying operation in a breaker:
//!
//! ```ignore
//! let outcome = breaker.call(|| retry::execute("push", &policy, || remote.create(&p))).await;
//! ```

pub mod circuit_breaker;
pub mod classify;
pub mod retry;
pub mod serde_millis;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerState, CircuitConfig, CircuitError, CircuitState,
};
pub use classify::{Classify, ErrorClass};
pub use retry::{MAX_BACKOFF, RetryOutcome, RetryPolicy, execute, execute_with};
