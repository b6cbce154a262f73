//! Combined admission check in front of every source call.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use crate::circuit_breaker::{CircuitBreaker, CircuitState};
use crate::error::AppError;
use crate::rate_limiter::RateLimiter;
use crate::state_store::StateStore;

/// Deadline for state-store round-trips inside the gate.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(2);

/// Outcome of an admission check for one source.
///
/// A rejection is control flow, not an error: the caller skips the source
/// for this work item and moves on. There is no retry within the same pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionDecision {
    /// Both gates passed; the source may be called.
    Admitted,
    /// The source's circuit is open; it is known to be failing.
    CircuitOpen,
    /// The source's token bucket is empty right now.
    RateLimited,
}

impl AdmissionDecision {
    pub fn is_admitted(&self) -> bool {
        matches!(self, AdmissionDecision::Admitted)
    }
}

impl fmt::Display for AdmissionDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdmissionDecision::Admitted => write!(f, "admitted"),
            AdmissionDecision::CircuitOpen => write!(f, "circuit-open"),
            AdmissionDecision::RateLimited => write!(f, "rate-limited"),
        }
    }
}

/// Gate that a worker consults once per source, per work item.
///
/// The circuit breaker is checked before the rate limiter, so a
/// short-circuited source never burns a token it could not use.
///
/// Every store round-trip is bounded by the gate's store timeout: a store
/// that stalls instead of answering surfaces as a `StateStoreError`, and the
/// caller treats the source as not admitted.
#[derive(Clone)]
pub struct AdmissionGate<S: StateStore> {
    breaker: CircuitBreaker<S>,
    limiter: RateLimiter<S>,
    store_timeout: Duration,
}

impl<S: StateStore> AdmissionGate<S> {
    pub fn new(breaker: CircuitBreaker<S>, limiter: RateLimiter<S>) -> Self {
        Self {
            breaker,
            limiter,
            store_timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    pub fn with_store_timeout(mut self, store_timeout: Duration) -> Self {
        self.store_timeout = store_timeout;
        self
    }

    pub fn breaker(&self) -> &CircuitBreaker<S> {
        &self.breaker
    }

    pub fn limiter(&self) -> &RateLimiter<S> {
        &self.limiter
    }

    /// Decide whether one call to `source` may proceed right now.
    pub async fn admit(&self, source: &str) -> Result<AdmissionDecision, AppError> {
        self.bounded(async {
            if !self.breaker.can_proceed(source).await? {
                return Ok(AdmissionDecision::CircuitOpen);
            }
            if !self.limiter.acquire(source).await? {
                return Ok(AdmissionDecision::RateLimited);
            }
            Ok(AdmissionDecision::Admitted)
        })
        .await
    }

    /// Record a successful call against `source`'s circuit.
    pub async fn record_success(&self, source: &str) -> Result<(), AppError> {
        self.bounded(self.breaker.record_success(source)).await
    }

    /// Record a failed call against `source`'s circuit.
    pub async fn record_failure(&self, source: &str) -> Result<CircuitState, AppError> {
        self.bounded(self.breaker.record_failure(source)).await
    }

    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, AppError>>,
    ) -> Result<T, AppError> {
        match tokio::time::timeout(self.store_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(AppError::StateStoreError(format!(
                "store call timed out after {}ms",
                self.store_timeout.as_millis()
            ))),
        }
    }
}
