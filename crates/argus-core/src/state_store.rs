use std::future::Future;

use crate::circuit_breaker::{CircuitBreakerConfig, CircuitState};
use crate::error::AppError;
use crate::rate_limiter::RateLimit;

/// Shared admission state, keyed by source identifier.
///
/// Every operation must be one atomic step against the backing store:
/// concurrent workers race these calls for the same source, and a torn
/// read-modify-write would let two callers spend the same tokens or observe
/// a half-applied circuit transition. Networked implementations run
/// server-side scripts; test doubles may linearize with an in-process lock.
/// Client-side lock-then-write is never enough.
///
/// Handles are cheap to clone and are passed explicitly to whatever needs
/// shared state; there is no process-global store.
pub trait StateStore: Send + Sync + Clone {
    /// Current circuit state for `source`, applying the lazy open to
    /// half-open roll when the open window has lapsed.
    fn circuit_state(
        &self,
        source: &str,
        config: &CircuitBreakerConfig,
    ) -> impl Future<Output = Result<CircuitState, AppError>> + Send;

    /// Record one failure against `source`, returning the resulting state.
    fn circuit_record_failure(
        &self,
        source: &str,
        config: &CircuitBreakerConfig,
    ) -> impl Future<Output = Result<CircuitState, AppError>> + Send;

    /// Clear `source`'s circuit back to closed. Idempotent.
    fn circuit_record_success(
        &self,
        source: &str,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Refill `source`'s token bucket per `limit`, then deduct `tokens` if
    /// that many are available. Returns whether the deduction happened; the
    /// refill is persisted either way.
    fn bucket_acquire(
        &self,
        source: &str,
        limit: &RateLimit,
        tokens: f64,
    ) -> impl Future<Output = Result<bool, AppError>> + Send;
}
