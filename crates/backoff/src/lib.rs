//! Retry-with-backoff and circuit-breaker engine.
//!
//! Wraps any fallible async operation with classification-aware retry:
//! transient failures (network, timeout, 5xx, 429) are retried with
//! exponential backoff and full jitter, permanent failures return
//! immediately without consuming the retry budget, and a circuit breaker
//! fails fast during sustained outages so a reconnecting fleet does not
//! hammer a struggling backend.

mod circuit;
mod policy;
mod retrier;

pub use circuit::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use policy::RetryPolicy;
pub use retrier::{ErrorClass, Retrier, RetryError};
