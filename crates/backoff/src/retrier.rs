//! Retry execution wrapping an arbitrary fallible async operation.

use std::future::Future;
use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::circuit::{CircuitBreaker, CircuitBreakerConfig};
use crate::policy::RetryPolicy;

/// Classification of a failure, decided by the caller's classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Worth retrying: network errors, timeouts, 5xx, 429.
    Transient,
    /// Retrying cannot help: auth failures, not-found, other 4xx.
    Permanent,
}

/// Terminal outcome of a retried operation.
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// The failure was classified permanent; no retry budget was consumed.
    #[error("permanent failure: {0}")]
    Permanent(#[source] E),

    /// Every attempt failed with a transient error.
    #[error("retry budget exhausted after {attempts} attempts: {source}")]
    Exhausted { attempts: u32, source: E },

    /// The circuit breaker is open; the operation was not attempted.
    #[error("circuit open, failing fast")]
    CircuitOpen,

    /// Cancelled via the supplied token.
    #[error("operation cancelled")]
    Cancelled,
}

impl<E> RetryError<E> {
    /// The underlying error, when one was actually observed.
    pub fn into_source(self) -> Option<E> {
        match self {
            RetryError::Permanent(e) | RetryError::Exhausted { source: e, .. } => Some(e),
            RetryError::CircuitOpen | RetryError::Cancelled => None,
        }
    }
}

/// Retry controller: a backoff policy plus a shared circuit breaker.
///
/// Clone-cheap; clones share the breaker so every wrapped call site observes
/// the same outage state.
#[derive(Clone)]
pub struct Retrier {
    policy: RetryPolicy,
    breaker: Arc<CircuitBreaker>,
}

impl Retrier {
    pub fn new(policy: RetryPolicy, breaker_config: CircuitBreakerConfig) -> Self {
        Self {
            policy,
            breaker: Arc::new(CircuitBreaker::new(breaker_config)),
        }
    }

    /// The shared breaker, for observability.
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Run `operation` with retry, backoff and circuit breaking.
    ///
    /// `operation` receives the 0-indexed attempt number. `classify` decides
    /// whether a given failure is worth another attempt. Sleeps between
    /// attempts are interruptible through `token`.
    pub async fn run<T, E, F, Fut, C>(
        &self,
        op_name: &'static str,
        token: &CancellationToken,
        classify: C,
        operation: F,
    ) -> Result<T, RetryError<E>>
    where
        F: Fn(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: Fn(&E) -> ErrorClass,
        E: std::fmt::Display,
    {
        if !self.breaker.try_acquire() {
            return Err(RetryError::CircuitOpen);
        }

        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0u32;
        loop {
            if token.is_cancelled() {
                return Err(RetryError::Cancelled);
            }

            match operation(attempt).await {
                Ok(value) => {
                    self.breaker.record_success();
                    return Ok(value);
                }
                Err(err) => match classify(&err) {
                    ErrorClass::Permanent => {
                        // Permanent failures say nothing about backend
                        // health, so the breaker streak is left alone.
                        return Err(RetryError::Permanent(err));
                    }
                    ErrorClass::Transient => {
                        self.breaker.record_failure();
                        if attempt + 1 >= max_attempts {
                            return Err(RetryError::Exhausted {
                                attempts: attempt + 1,
                                source: err,
                            });
                        }
                        let delay = self.policy.delay_for_attempt(attempt);
                        warn!(
                            op = op_name,
                            attempt = attempt + 1,
                            max = max_attempts,
                            delay_ms = delay.as_millis() as u64,
                            error = %err,
                            "retrying after transient failure"
                        );
                        tokio::select! {
                            _ = token.cancelled() => return Err(RetryError::Cancelled),
                            _ = tokio::time::sleep(delay) => {}
                        }
                        // Re-check the breaker: another call site may have
                        // opened it while this one slept.
                        if !self.breaker.try_acquire() {
                            return Err(RetryError::CircuitOpen);
                        }
                        attempt += 1;
                    }
                },
            }
        }
    }
}
