//! Per-source circuit breaker backed by the shared state store.
//!
//! Stops the worker fleet from hammering a job source that keeps failing,
//! while still checking for recovery without operator intervention. State is
//! shared through the store, so one worker tripping a source's circuit
//! shields every other worker immediately.
//!
//! # Circuit states
//!
//! ```text
//!                    failures >= threshold
//!        CLOSED ------------------------------> OPEN
//!          ^                                     |
//!          |                                     | timeout elapses
//!          | trial call                          v
//!          |  succeeds                       HALF_OPEN
//!          +-----------------------------------+ |
//!                                                | trial call fails
//!                                                v
//!                                              OPEN
//! ```
//!
//! Transitions are lazy: nothing fires on the clock. A lapsed open window is
//! observed as half-open on the next read, and a half-open window with no
//! trial call settles back to closed on the read after it lapses.

use std::fmt;
use std::time::Duration;

use crate::error::AppError;
use crate::state_store::StateStore;

/// Observable state of one source's circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls flow normally; failures are being counted.
    Closed,
    /// Calls are short-circuited without touching the source.
    Open,
    /// A limited trial window; the next recorded outcome decides.
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Tuning for a source circuit.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that trip the circuit open.
    pub failure_threshold: u32,
    /// How long an open circuit rejects before allowing trial calls.
    pub timeout: Duration,
    /// How long the trial window stays available before settling closed.
    pub half_open_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            timeout: Duration::from_secs(60),
            half_open_timeout: Duration::from_secs(30),
        }
    }
}

/// Stored circuit state for one source.
///
/// An explicit tagged record, not a pile of expiring marker keys: every
/// transition is a single-key change, so concurrent observers can never see
/// the circuit half-transitioned. Timestamps are unix seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CircuitRecord {
    Closed { failures: u32 },
    Open { until: f64 },
    HalfOpen { until: f64 },
}

impl CircuitRecord {
    /// The resting state: closed with no recent failures.
    pub fn fresh() -> Self {
        CircuitRecord::Closed { failures: 0 }
    }

    /// Roll the record forward to `now`. A lapsed open window becomes a new
    /// half-open window; a half-open window with no trial call settles closed.
    pub fn settle(self, config: &CircuitBreakerConfig, now: f64) -> CircuitRecord {
        match self {
            CircuitRecord::Open { until } if now >= until => CircuitRecord::HalfOpen {
                until: now + config.half_open_timeout.as_secs_f64(),
            },
            CircuitRecord::HalfOpen { until } if now >= until => CircuitRecord::fresh(),
            other => other,
        }
    }

    /// Apply one recorded failure at `now`.
    pub fn after_failure(self, config: &CircuitBreakerConfig, now: f64) -> CircuitRecord {
        let reopened = CircuitRecord::Open {
            until: now + config.timeout.as_secs_f64(),
        };
        match self.settle(config, now) {
            CircuitRecord::Closed { failures } => {
                let failures = failures + 1;
                if failures >= config.failure_threshold {
                    reopened
                } else {
                    CircuitRecord::Closed { failures }
                }
            }
            // A failed trial call sends the circuit straight back to open.
            CircuitRecord::HalfOpen { .. } => reopened,
            open @ CircuitRecord::Open { .. } => open,
        }
    }

    pub fn state(&self) -> CircuitState {
        match self {
            CircuitRecord::Closed { .. } => CircuitState::Closed,
            CircuitRecord::Open { .. } => CircuitState::Open,
            CircuitRecord::HalfOpen { .. } => CircuitState::HalfOpen,
        }
    }
}

/// Circuit breaker for one fleet of workers, shared through `store`.
#[derive(Clone)]
pub struct CircuitBreaker<S: StateStore> {
    store: S,
    config: CircuitBreakerConfig,
}

impl<S: StateStore> CircuitBreaker<S> {
    pub fn new(store: S, config: CircuitBreakerConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Current state of `source`'s circuit, applying any lazy transition.
    pub async fn state(&self, source: &str) -> Result<CircuitState, AppError> {
        self.store.circuit_state(source, &self.config).await
    }

    /// Whether calls to `source` may proceed (closed or half-open).
    pub async fn can_proceed(&self, source: &str) -> Result<bool, AppError> {
        Ok(self.state(source).await? != CircuitState::Open)
    }

    pub async fn is_open(&self, source: &str) -> Result<bool, AppError> {
        Ok(self.state(source).await? == CircuitState::Open)
    }

    pub async fn is_half_open(&self, source: &str) -> Result<bool, AppError> {
        Ok(self.state(source).await? == CircuitState::HalfOpen)
    }

    /// Record a successful call: clears the circuit back to closed.
    /// Idempotent, and safe to call from any state.
    pub async fn record_success(&self, source: &str) -> Result<(), AppError> {
        self.store.circuit_record_success(source).await
    }

    /// Record a failed call, returning the state the circuit landed in.
    pub async fn record_failure(&self, source: &str) -> Result<CircuitState, AppError> {
        let state = self.store.circuit_record_failure(source, &self.config).await?;
        if state == CircuitState::Open {
            tracing::warn!(
                source = %source,
                timeout_secs = self.config.timeout.as_secs(),
                "Circuit open, short-circuiting source"
            );
        }
        Ok(state)
    }
}
