use std::time::Duration;

use argus_core::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
use argus_core::rate_limiter::{RateLimit, RateLimiter, RateTable};
use argus_redis::RedisConfig;

use crate::integration::common::{connect_with_retry, setup_redis, start_redis};

/// Windows shortened so transitions happen inside test time.
fn fast_config() -> CircuitBreakerConfig {
    CircuitBreakerConfig {
        failure_threshold: 3,
        timeout: Duration::from_millis(500),
        half_open_timeout: Duration::from_secs(5),
    }
}

#[tokio::test]
async fn circuit_opens_after_threshold_and_recovers() {
    let (backend, _container) = setup_redis().await;
    let breaker = CircuitBreaker::new(backend.state_store(), fast_config());

    assert_eq!(
        breaker.state("remotive").await.unwrap(),
        CircuitState::Closed
    );

    breaker.record_failure("remotive").await.unwrap();
    breaker.record_failure("remotive").await.unwrap();
    assert!(!breaker.is_open("remotive").await.unwrap());

    breaker.record_failure("remotive").await.unwrap();
    assert!(breaker.is_open("remotive").await.unwrap());

    // Past the open window, the next read observes half-open.
    tokio::time::sleep(Duration::from_millis(700)).await;
    assert!(breaker.is_half_open("remotive").await.unwrap());

    breaker.record_success("remotive").await.unwrap();
    assert_eq!(
        breaker.state("remotive").await.unwrap(),
        CircuitState::Closed
    );
}

#[tokio::test]
async fn half_open_failure_reopens_the_circuit() {
    let (backend, _container) = setup_redis().await;
    let breaker = CircuitBreaker::new(backend.state_store(), fast_config());

    for _ in 0..3 {
        breaker.record_failure("remotive").await.unwrap();
    }
    tokio::time::sleep(Duration::from_millis(700)).await;
    assert!(breaker.is_half_open("remotive").await.unwrap());

    let state = breaker.record_failure("remotive").await.unwrap();
    assert_eq!(state, CircuitState::Open);
    assert!(breaker.is_open("remotive").await.unwrap());
}

#[tokio::test]
async fn success_resets_the_failure_count() {
    let (backend, _container) = setup_redis().await;
    let breaker = CircuitBreaker::new(backend.state_store(), fast_config());

    breaker.record_failure("remotive").await.unwrap();
    breaker.record_failure("remotive").await.unwrap();
    breaker.record_success("remotive").await.unwrap();

    breaker.record_failure("remotive").await.unwrap();
    breaker.record_failure("remotive").await.unwrap();
    assert!(!breaker.is_open("remotive").await.unwrap());
}

#[tokio::test]
async fn failure_count_expires_after_twice_the_open_window() {
    let (backend, _container) = setup_redis().await;
    let breaker = CircuitBreaker::new(backend.state_store(), fast_config());

    breaker.record_failure("remotive").await.unwrap();
    breaker.record_failure("remotive").await.unwrap();

    // The closed record lives for twice the open window, then evaporates.
    tokio::time::sleep(Duration::from_millis(1_500)).await;

    // This would be the tripping failure if the old count were still there.
    let state = breaker.record_failure("remotive").await.unwrap();
    assert_eq!(state, CircuitState::Closed);
    assert!(!breaker.is_open("remotive").await.unwrap());

    // Two more failures trip it, confirming the count restarted at one.
    breaker.record_failure("remotive").await.unwrap();
    let state = breaker.record_failure("remotive").await.unwrap();
    assert_eq!(state, CircuitState::Open);
}

#[tokio::test]
async fn circuits_are_isolated_per_source() {
    let (backend, _container) = setup_redis().await;
    let breaker = CircuitBreaker::new(backend.state_store(), fast_config());

    for _ in 0..3 {
        breaker.record_failure("remotive").await.unwrap();
    }
    assert!(breaker.is_open("remotive").await.unwrap());
    assert!(!breaker.is_open("adzuna").await.unwrap());
}

#[tokio::test]
async fn bucket_drains_to_capacity_and_refills() {
    let (backend, _container) = setup_redis().await;
    let limiter = RateLimiter::new(
        backend.state_store(),
        RateTable::new(RateLimit::new(10.0, 3.0)),
    );

    assert!(limiter.acquire("remotive").await.unwrap());
    assert!(limiter.acquire("remotive").await.unwrap());
    assert!(limiter.acquire("remotive").await.unwrap());
    assert!(!limiter.acquire("remotive").await.unwrap());

    // At 10 tokens/sec, half a second is plenty for one token.
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(limiter.acquire("remotive").await.unwrap());
}

#[tokio::test]
async fn concurrent_acquires_spend_exactly_capacity() {
    let (backend, _container) = setup_redis().await;
    let limiter = RateLimiter::new(
        backend.state_store(),
        RateTable::new(RateLimit::new(0.0, 10.0)),
    );

    let mut handles = Vec::new();
    for _ in 0..30 {
        let limiter = limiter.clone();
        handles.push(tokio::spawn(async move {
            limiter.acquire("remotive").await.unwrap()
        }));
    }

    let mut admitted = 0;
    for handle in handles {
        if handle.await.unwrap() {
            admitted += 1;
        }
    }
    assert_eq!(admitted, 10);
}

#[tokio::test]
async fn idle_bucket_expires_back_to_full() {
    let (url, _container) = start_redis().await;
    let config = RedisConfig::new(url).with_bucket_idle_ttl(1);
    let backend = connect_with_retry(&config).await;
    let limiter = RateLimiter::new(
        backend.state_store(),
        RateTable::new(RateLimit::new(0.0, 2.0)),
    );

    assert!(limiter.acquire("remotive").await.unwrap());
    assert!(limiter.acquire("remotive").await.unwrap());
    assert!(!limiter.acquire("remotive").await.unwrap());

    // Zero refill rate, so only key expiry can restore tokens.
    tokio::time::sleep(Duration::from_millis(1_500)).await;
    assert!(limiter.acquire("remotive").await.unwrap());
}
