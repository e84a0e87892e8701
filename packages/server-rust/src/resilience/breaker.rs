//! Per-operation circuit breaker.
//!
//! State machine:
//! - `Closed` -> `Open` after `failure_threshold` consecutive failures
//! - `Open` -> `HalfOpen` once `cooldown` has elapsed, admitting exactly one trial
//! - `HalfOpen` -> `Closed` when the trial succeeds, back to `Open` when it fails
//!
//! The mutex guards only the transition itself; it is never held while the
//! protected call runs. Callers obtain a [`BreakerPermit`] before the call and
//! settle it with the outcome afterwards.

use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{info, warn};

use super::config::BreakerConfig;
use crate::service::operation::CallError;

/// Externally visible breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Calls flow normally.
    Closed,
    /// Calls fail fast with [`CallError::CircuitOpen`].
    Open,
    /// Cooldown elapsed; one trial call decides the next state.
    HalfOpen,
}

impl BreakerState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    Closed { failures: u32 },
    Open { until: Instant },
    HalfOpen { trial_in_flight: bool },
}

/// Failure isolation for one (service, operation) pair.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    phase: Mutex<Phase>,
}

impl CircuitBreaker {
    /// Creates a closed breaker.
    ///
    /// See [`BreakerConfig::default`] for the documented defaults
    /// (5 consecutive failures, 60 s cooldown).
    #[must_use]
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config: BreakerConfig {
                failure_threshold: config.failure_threshold.max(1),
                cooldown: config.cooldown,
            },
            phase: Mutex::new(Phase::Closed { failures: 0 }),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state. An open breaker whose cooldown elapsed reports `HalfOpen`.
    #[must_use]
    pub fn state(&self) -> BreakerState {
        match *self.phase.lock() {
            Phase::Closed { .. } => BreakerState::Closed,
            Phase::Open { until } if Instant::now() < until => BreakerState::Open,
            Phase::Open { .. } | Phase::HalfOpen { .. } => BreakerState::HalfOpen,
        }
    }

    /// Asks to run one call.
    ///
    /// # Errors
    ///
    /// Returns [`CallError::CircuitOpen`] while open, and while a half-open
    /// trial is already in flight.
    pub fn try_acquire(self: &Arc<Self>) -> Result<BreakerPermit, CallError> {
        let mut phase = self.phase.lock();
        let trial = match *phase {
            Phase::Closed { .. } => false,
            Phase::Open { until } => {
                if Instant::now() < until {
                    return Err(CallError::CircuitOpen);
                }
                *phase = Phase::HalfOpen {
                    trial_in_flight: true,
                };
                drop(phase);
                self.transitioned(BreakerState::HalfOpen);
                return Ok(self.permit(true));
            }
            Phase::HalfOpen {
                trial_in_flight: true,
            } => return Err(CallError::CircuitOpen),
            Phase::HalfOpen {
                trial_in_flight: false,
            } => {
                *phase = Phase::HalfOpen {
                    trial_in_flight: true,
                };
                true
            }
        };
        drop(phase);
        Ok(self.permit(trial))
    }

    /// Runs `call` under the breaker. Only `Err` outcomes count as failures.
    ///
    /// # Errors
    ///
    /// Returns [`CallError::CircuitOpen`] without polling `call` when the
    /// breaker rejects it, otherwise whatever `call` returns.
    pub async fn call<T, F>(self: &Arc<Self>, call: F) -> Result<T, CallError>
    where
        F: Future<Output = Result<T, CallError>>,
    {
        let permit = self.try_acquire()?;
        let result = call.await;
        permit.record(result.is_ok());
        result
    }

    fn permit(self: &Arc<Self>, trial: bool) -> BreakerPermit {
        BreakerPermit {
            breaker: Arc::clone(self),
            trial,
            settled: false,
        }
    }

    fn on_success(&self, trial: bool) {
        let mut phase = self.phase.lock();
        match *phase {
            Phase::Closed { .. } => *phase = Phase::Closed { failures: 0 },
            Phase::HalfOpen { .. } if trial => {
                *phase = Phase::Closed { failures: 0 };
                drop(phase);
                self.transitioned(BreakerState::Closed);
            }
            // Late outcome of a call admitted before the breaker opened.
            Phase::HalfOpen { .. } | Phase::Open { .. } => {}
        }
    }

    fn on_failure(&self, trial: bool) {
        let mut phase = self.phase.lock();
        let opened = match *phase {
            Phase::Closed { failures } => {
                let failures = failures + 1;
                if failures >= self.config.failure_threshold {
                    *phase = Phase::Open {
                        until: Instant::now() + self.config.cooldown,
                    };
                    true
                } else {
                    *phase = Phase::Closed { failures };
                    false
                }
            }
            Phase::HalfOpen { .. } if trial => {
                *phase = Phase::Open {
                    until: Instant::now() + self.config.cooldown,
                };
                true
            }
            Phase::HalfOpen { .. } | Phase::Open { .. } => false,
        };
        drop(phase);
        if opened {
            self.transitioned(BreakerState::Open);
        }
    }

    fn on_abandon(&self, trial: bool) {
        if !trial {
            return;
        }
        let mut phase = self.phase.lock();
        if let Phase::HalfOpen {
            trial_in_flight: true,
        } = *phase
        {
            *phase = Phase::HalfOpen {
                trial_in_flight: false,
            };
        }
    }

    fn transitioned(&self, to: BreakerState) {
        match to {
            BreakerState::Open => warn!(
                breaker = %self.name,
                threshold = self.config.failure_threshold,
                cooldown_ms = u64::try_from(self.config.cooldown.as_millis()).unwrap_or(u64::MAX),
                "circuit breaker opened"
            ),
            BreakerState::HalfOpen => info!(breaker = %self.name, "circuit breaker half-open, admitting trial call"),
            BreakerState::Closed => info!(breaker = %self.name, "circuit breaker closed after successful trial"),
        }
        metrics::counter!(
            "storefront_breaker_transitions_total",
            "breaker" => self.name.clone(),
            "state" => to.as_str()
        )
        .increment(1);
    }
}

/// Admission to run one call. Settle it with [`BreakerPermit::record`].
///
/// Dropping an unsettled permit (for example a cancelled call) frees the
/// half-open trial slot without changing state.
#[derive(Debug)]
pub struct BreakerPermit {
    breaker: Arc<CircuitBreaker>,
    trial: bool,
    settled: bool,
}

impl BreakerPermit {
    /// Whether this permit is the half-open trial.
    #[must_use]
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    pub fn record(mut self, success: bool) {
        self.settled = true;
        if success {
            self.breaker.on_success(self.trial);
        } else {
            self.breaker.on_failure(self.trial);
        }
    }
}

impl Drop for BreakerPermit {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.on_abandon(self.trial);
        }
    }
}
