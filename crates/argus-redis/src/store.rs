//! Redis-backed shared admission state.
//!
//! Circuit and bucket records live in per-source hashes. Every mutation runs
//! as a server-side Lua script, so the read-modify-write is one atomic step
//! no matter how many workers race it; the client never locks anything. Keys
//! carry TTLs so sources that stop being queried do not accumulate state
//! forever.
//!
//! The scripts mirror `CircuitRecord` and `TokenBucket` from `argus-core`;
//! the in-memory test store runs those functions directly, this store runs
//! their Lua rendition.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use argus_core::circuit_breaker::{CircuitBreakerConfig, CircuitState};
use argus_core::error::AppError;
use argus_core::rate_limiter::RateLimit;
use argus_core::state_store::StateStore;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};

use crate::config::RedisConfig;

/// Observe the circuit, applying lazy transitions: a lapsed open window
/// rolls to half-open, a lapsed half-open window settles back to closed.
///
/// KEYS[1] circuit hash; ARGV: now, half_open window secs, half-open TTL.
const CIRCUIT_STATE_SCRIPT: &str = r#"
local state = redis.call('HGET', KEYS[1], 'state')
if not state then
  return 'closed'
end
local now = tonumber(ARGV[1])
local half_open_secs = tonumber(ARGV[2])
local half_open_ttl = tonumber(ARGV[3])
local deadline = tonumber(redis.call('HGET', KEYS[1], 'until'))
if state == 'open' then
  if deadline and now < deadline then
    return 'open'
  end
  redis.call('HSET', KEYS[1], 'state', 'half_open', 'until', now + half_open_secs)
  redis.call('EXPIRE', KEYS[1], half_open_ttl)
  return 'half_open'
end
if state == 'half_open' then
  if deadline and now < deadline then
    return 'half_open'
  end
  redis.call('DEL', KEYS[1])
  return 'closed'
end
return state
"#;

/// Record one failure, settling lapsed windows first so the outcome matches
/// the pure transition function: a failure inside the open or half-open
/// window reopens the circuit, a failure after a lapsed trial window counts
/// from one again.
///
/// KEYS[1] circuit hash; ARGV: now, threshold, open window secs,
/// closed-record TTL, open-record TTL.
const CIRCUIT_FAILURE_SCRIPT: &str = r#"
local now = tonumber(ARGV[1])
local threshold = tonumber(ARGV[2])
local open_secs = tonumber(ARGV[3])
local fail_ttl = tonumber(ARGV[4])
local open_ttl = tonumber(ARGV[5])

local function reopen()
  redis.call('HSET', KEYS[1], 'state', 'open', 'until', now + open_secs)
  redis.call('HDEL', KEYS[1], 'failures')
  redis.call('EXPIRE', KEYS[1], open_ttl)
  return 'open'
end

local state = redis.call('HGET', KEYS[1], 'state')
local deadline = tonumber(redis.call('HGET', KEYS[1], 'until'))

if state == 'open' and deadline and now < deadline then
  return 'open'
end
if state == 'open' or state == 'half_open' then
  if state == 'half_open' and deadline and now >= deadline then
    redis.call('HDEL', KEYS[1], 'until')
  else
    return reopen()
  end
end

local failures = (tonumber(redis.call('HGET', KEYS[1], 'failures')) or 0) + 1
if failures >= threshold then
  return reopen()
end
redis.call('HSET', KEYS[1], 'state', 'closed', 'failures', failures)
redis.call('EXPIRE', KEYS[1], fail_ttl)
return 'closed'
"#;

/// Refill the bucket for elapsed time (clamped to capacity, never negative)
/// and deduct the requested tokens if enough are available. The refilled
/// state persists whether or not the deduction happened.
///
/// KEYS[1] bucket hash; ARGV: rate, capacity, requested, now, idle TTL.
const BUCKET_ACQUIRE_SCRIPT: &str = r#"
local rate = tonumber(ARGV[1])
local capacity = tonumber(ARGV[2])
local requested = tonumber(ARGV[3])
local now = tonumber(ARGV[4])
local idle_ttl = tonumber(ARGV[5])

local tokens = tonumber(redis.call('HGET', KEYS[1], 'tokens'))
local last = tonumber(redis.call('HGET', KEYS[1], 'last_update'))
if tokens == nil or last == nil then
  tokens = capacity
  last = now
end

local elapsed = now - last
if elapsed < 0 then
  elapsed = 0
end
tokens = tokens + elapsed * rate
if tokens > capacity then
  tokens = capacity
end

local allowed = 0
if tokens >= requested then
  tokens = tokens - requested
  allowed = 1
end

redis.call('HSET', KEYS[1], 'tokens', tokens, 'last_update', now)
redis.call('EXPIRE', KEYS[1], idle_ttl)
return allowed
"#;

/// `StateStore` implementation over Redis.
#[derive(Clone)]
pub struct RedisStateStore {
    manager: ConnectionManager,
    key_prefix: String,
    bucket_idle_ttl: u64,
    state_script: Arc<Script>,
    failure_script: Arc<Script>,
    bucket_script: Arc<Script>,
}

impl RedisStateStore {
    pub fn new(manager: ConnectionManager, config: &RedisConfig) -> Self {
        Self {
            manager,
            key_prefix: config.key_prefix.clone(),
            bucket_idle_ttl: config.bucket_idle_ttl,
            state_script: Arc::new(Script::new(CIRCUIT_STATE_SCRIPT)),
            failure_script: Arc::new(Script::new(CIRCUIT_FAILURE_SCRIPT)),
            bucket_script: Arc::new(Script::new(BUCKET_ACQUIRE_SCRIPT)),
        }
    }

    fn circuit_key(&self, source: &str) -> String {
        circuit_key(&self.key_prefix, source)
    }

    fn bucket_key(&self, source: &str) -> String {
        bucket_key(&self.key_prefix, source)
    }
}

fn circuit_key(prefix: &str, source: &str) -> String {
    format!("{prefix}:circuit:{source}")
}

fn bucket_key(prefix: &str, source: &str) -> String {
    format!("{prefix}:bucket:{source}")
}

impl StateStore for RedisStateStore {
    async fn circuit_state(
        &self,
        source: &str,
        config: &CircuitBreakerConfig,
    ) -> Result<CircuitState, AppError> {
        let mut conn = self.manager.clone();
        let raw: String = self
            .state_script
            .key(self.circuit_key(source))
            .arg(now_secs())
            .arg(config.half_open_timeout.as_secs_f64())
            .arg(config.half_open_timeout.as_secs() + 1)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| AppError::StateStoreError(e.to_string()))?;
        Ok(parse_state(&raw))
    }

    async fn circuit_record_failure(
        &self,
        source: &str,
        config: &CircuitBreakerConfig,
    ) -> Result<CircuitState, AppError> {
        let mut conn = self.manager.clone();
        let raw: String = self
            .failure_script
            .key(self.circuit_key(source))
            .arg(now_secs())
            .arg(config.failure_threshold)
            .arg(config.timeout.as_secs_f64())
            // Failure counts outlive the window they could open by a factor
            // of two, then the record evaporates.
            .arg((config.timeout * 2).as_secs().max(1))
            .arg((config.timeout + config.half_open_timeout).as_secs() + 1)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| AppError::StateStoreError(e.to_string()))?;
        Ok(parse_state(&raw))
    }

    async fn circuit_record_success(&self, source: &str) -> Result<(), AppError> {
        let mut conn = self.manager.clone();
        conn.del::<_, ()>(self.circuit_key(source))
            .await
            .map_err(|e| AppError::StateStoreError(e.to_string()))?;
        Ok(())
    }

    async fn bucket_acquire(
        &self,
        source: &str,
        limit: &RateLimit,
        tokens: f64,
    ) -> Result<bool, AppError> {
        let mut conn = self.manager.clone();
        let allowed: i64 = self
            .bucket_script
            .key(self.bucket_key(source))
            .arg(limit.rate)
            .arg(limit.capacity)
            .arg(tokens)
            .arg(now_secs())
            .arg(self.bucket_idle_ttl)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| AppError::StateStoreError(e.to_string()))?;
        Ok(allowed == 1)
    }
}

fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

/// Map a script reply onto a circuit state. Anything unrecognized reads as
/// open: when the stored state is garbage the safe answer is to reject.
fn parse_state(raw: &str) -> CircuitState {
    match raw {
        "closed" => CircuitState::Closed,
        "open" => CircuitState::Open,
        "half_open" => CircuitState::HalfOpen,
        other => {
            tracing::warn!(state = %other, "Unrecognized circuit state in store, treating as open");
            CircuitState::Open
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_state_maps_known_values() {
        assert_eq!(parse_state("closed"), CircuitState::Closed);
        assert_eq!(parse_state("open"), CircuitState::Open);
        assert_eq!(parse_state("half_open"), CircuitState::HalfOpen);
    }

    #[test]
    fn test_parse_state_treats_garbage_as_open() {
        assert_eq!(parse_state("corrupted"), CircuitState::Open);
        assert_eq!(parse_state(""), CircuitState::Open);
    }

    #[test]
    fn test_keys_are_prefixed_per_source() {
        assert_eq!(circuit_key("argus", "remotive"), "argus:circuit:remotive");
        assert_eq!(bucket_key("argus", "remotive"), "argus:bucket:remotive");
        assert_ne!(circuit_key("argus", "a"), circuit_key("argus", "b"));
    }
}
