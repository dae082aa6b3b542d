//! Circuit breaker for sustained outages.
//!
//! After a configurable number of consecutive transient failures the circuit
//! opens and calls fail fast for a cool-down window. Once the window elapses
//! the circuit half-opens and admits a single probe call; the probe's outcome
//! decides whether the circuit closes again or re-opens.

use parking_lot::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Configuration for the circuit breaker.
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerConfig {
    /// Consecutive transient failures that open the circuit.
    pub failure_threshold: u32,
    /// How long the circuit stays open before admitting a probe.
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cooldown: Duration::from_secs(60),
        }
    }
}

/// Externally observable state of the circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
enum Inner {
    Closed { consecutive_failures: u32 },
    Open { until: Instant },
    /// A single probe is in flight; further calls fail fast until it reports.
    HalfOpen { probing: bool },
}

/// Shared circuit breaker, cheap to lock from any task.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner::Closed {
                consecutive_failures: 0,
            }),
        }
    }

    /// Current state, transitioning Open -> HalfOpen if the cool-down has
    /// elapsed.
    pub fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock();
        if let Inner::Open { until } = *inner
            && Instant::now() >= until
        {
            *inner = Inner::HalfOpen { probing: false };
        }
        match *inner {
            Inner::Closed { .. } => CircuitState::Closed,
            Inner::Open { .. } => CircuitState::Open,
            Inner::HalfOpen { .. } => CircuitState::HalfOpen,
        }
    }

    /// Ask for permission to issue a call.
    ///
    /// Returns `false` when the circuit is open, or half-open with a probe
    /// already in flight. A `true` from the half-open state claims the probe
    /// slot; the caller must follow up with [`record_success`] or
    /// [`record_failure`].
    ///
    /// [`record_success`]: Self::record_success
    /// [`record_failure`]: Self::record_failure
    pub fn try_acquire(&self) -> bool {
        let mut inner = self.inner.lock();
        match *inner {
            Inner::Closed { .. } => true,
            Inner::Open { until } => {
                if Instant::now() >= until {
                    debug!("circuit cool-down elapsed, admitting probe");
                    *inner = Inner::HalfOpen { probing: true };
                    true
                } else {
                    false
                }
            }
            Inner::HalfOpen { probing } => {
                if probing {
                    false
                } else {
                    *inner = Inner::HalfOpen { probing: true };
                    true
                }
            }
        }
    }

    /// Record a successful call: closes the circuit and clears the failure
    /// streak.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        if matches!(*inner, Inner::HalfOpen { .. } | Inner::Open { .. }) {
            debug!("circuit closed after successful probe");
        }
        *inner = Inner::Closed {
            consecutive_failures: 0,
        };
    }

    /// Record a transient failure; opens the circuit once the streak reaches
    /// the threshold, or immediately from the half-open state.
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        match *inner {
            Inner::Closed {
                consecutive_failures,
            } => {
                let streak = consecutive_failures + 1;
                if streak >= self.config.failure_threshold {
                    warn!(
                        streak,
                        cooldown_secs = self.config.cooldown.as_secs(),
                        "failure threshold reached, opening circuit"
                    );
                    *inner = Inner::Open {
                        until: Instant::now() + self.config.cooldown,
                    };
                } else {
                    *inner = Inner::Closed {
                        consecutive_failures: streak,
                    };
                }
            }
            Inner::HalfOpen { .. } => {
                warn!("probe failed, re-opening circuit");
                *inner = Inner::Open {
                    until: Instant::now() + self.config.cooldown,
                };
            }
            Inner::Open { .. } => {}
        }
    }
}
