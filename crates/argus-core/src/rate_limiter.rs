//! Per-source token-bucket rate limiting backed by the shared state store.
//!
//! Each source gets an independent bucket that refills continuously at its
//! configured rate and starts full, so a burst up to capacity is fine after
//! idle periods. An acquire is a single atomic read-refill-deduct-write in
//! the store; a failed acquire returns immediately, there is no queueing or
//! waiting for tokens.

use std::collections::HashMap;

use serde::Deserialize;

use crate::error::AppError;
use crate::state_store::StateStore;

/// Refill rate and burst capacity for one source.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct RateLimit {
    /// Tokens added per second.
    pub rate: f64,
    /// Maximum tokens the bucket holds.
    pub capacity: f64,
}

impl RateLimit {
    pub fn new(rate: f64, capacity: f64) -> Self {
        Self { rate, capacity }
    }
}

/// Per-source limits with a conservative fallback for unknown sources.
///
/// Injected configuration: API-backed sources usually get generous limits,
/// scrape targets get strict ones, and anything unlisted falls back to a
/// rate that will not get the fleet banned.
#[derive(Debug, Clone, Deserialize)]
pub struct RateTable {
    #[serde(default)]
    pub sources: HashMap<String, RateLimit>,
    #[serde(default = "RateTable::conservative")]
    pub fallback: RateLimit,
}

impl RateTable {
    fn conservative() -> RateLimit {
        RateLimit::new(0.5, 5.0)
    }

    pub fn new(fallback: RateLimit) -> Self {
        Self {
            sources: HashMap::new(),
            fallback,
        }
    }

    pub fn with_source(mut self, source: impl Into<String>, limit: RateLimit) -> Self {
        self.sources.insert(source.into(), limit);
        self
    }

    /// The limit governing `source`.
    pub fn limit_for(&self, source: &str) -> RateLimit {
        self.sources.get(source).copied().unwrap_or(self.fallback)
    }
}

impl Default for RateTable {
    fn default() -> Self {
        Self::new(Self::conservative())
    }
}

/// Bucket accounting for one source, as persisted in the store.
/// Timestamps are unix seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TokenBucket {
    pub tokens: f64,
    pub last_update: f64,
}

impl TokenBucket {
    /// A bucket seen for the first time starts full.
    pub fn full(limit: &RateLimit, now: f64) -> Self {
        Self {
            tokens: limit.capacity,
            last_update: now,
        }
    }

    /// Refill for the time elapsed since the last accounting, clamped to
    /// capacity. Negative elapsed (clock skew between workers) refills
    /// nothing rather than draining the bucket.
    pub fn refill(self, limit: &RateLimit, now: f64) -> Self {
        let elapsed = (now - self.last_update).max(0.0);
        Self {
            tokens: (self.tokens + elapsed * limit.rate).min(limit.capacity),
            last_update: now,
        }
    }

    /// Refill to `now`, then deduct `tokens` if available. Returns the
    /// bucket to persist and whether the deduction happened.
    pub fn try_take(self, limit: &RateLimit, tokens: f64, now: f64) -> (Self, bool) {
        let mut refilled = self.refill(limit, now);
        if refilled.tokens >= tokens {
            refilled.tokens -= tokens;
            (refilled, true)
        } else {
            (refilled, false)
        }
    }
}

/// Rate limiter for one fleet of workers, shared through `store`.
#[derive(Clone)]
pub struct RateLimiter<S: StateStore> {
    store: S,
    table: RateTable,
}

impl<S: StateStore> RateLimiter<S> {
    pub fn new(store: S, table: RateTable) -> Self {
        Self { store, table }
    }

    pub fn table(&self) -> &RateTable {
        &self.table
    }

    /// Try to take one token for `source`.
    pub async fn acquire(&self, source: &str) -> Result<bool, AppError> {
        self.acquire_n(source, 1.0).await
    }

    /// Try to take `tokens` tokens for `source` in one step.
    pub async fn acquire_n(&self, source: &str, tokens: f64) -> Result<bool, AppError> {
        let limit = self.table.limit_for(source);
        let admitted = self.store.bucket_acquire(source, &limit, tokens).await?;
        if !admitted {
            tracing::debug!(
                source = %source,
                rate = limit.rate,
                capacity = limit.capacity,
                "Rate limit exhausted for source"
            );
        }
        Ok(admitted)
    }
}
