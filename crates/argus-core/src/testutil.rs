//! Test utilities: clock and backend doubles for the admission and fanout
//! traits.
//!
//! Handwritten mocks for dependency injection in unit tests. All doubles use
//! `Arc<Mutex<_>>` interior mutability so cloned handles share state and
//! tests can assert on recorded calls. The in-memory store runs the same
//! transition functions the networked store mirrors server-side, linearized
//! here by a single lock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;

use crate::circuit_breaker::{CircuitBreakerConfig, CircuitRecord, CircuitState};
use crate::error::AppError;
use crate::fanout::{FanoutQueue, QueueEntry};
use crate::models::{FanoutMessage, Posting, SearchQuery};
use crate::rate_limiter::{RateLimit, TokenBucket};
use crate::state_store::StateStore;
use crate::traits::{PostingSink, SourceConnector};
use crate::worker::{WorkerEvent, WorkerReporter};

// ---------------------------------------------------------------------------
// MockClock
// ---------------------------------------------------------------------------

/// Manually advanced clock, in unix seconds, for driving circuit windows and
/// bucket refill without real sleeps.
#[derive(Clone)]
pub struct MockClock {
    now: Arc<Mutex<f64>>,
}

impl MockClock {
    pub fn new(start: f64) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn now(&self) -> f64 {
        *self.now.lock().unwrap()
    }

    pub fn advance(&self, seconds: f64) {
        *self.now.lock().unwrap() += seconds;
    }
}

// ---------------------------------------------------------------------------
// InMemoryStateStore
// ---------------------------------------------------------------------------

/// In-memory `StateStore` driven by a `MockClock`.
#[derive(Clone)]
pub struct InMemoryStateStore {
    clock: MockClock,
    circuits: Arc<Mutex<HashMap<String, CircuitRecord>>>,
    buckets: Arc<Mutex<HashMap<String, TokenBucket>>>,
    fail_next: Arc<Mutex<Option<AppError>>>,
}

impl InMemoryStateStore {
    pub fn new(clock: MockClock) -> Self {
        Self {
            clock,
            circuits: Arc::new(Mutex::new(HashMap::new())),
            buckets: Arc::new(Mutex::new(HashMap::new())),
            fail_next: Arc::new(Mutex::new(None)),
        }
    }

    pub fn clock(&self) -> &MockClock {
        &self.clock
    }

    /// Queue an error for the next store operation, whichever it is.
    pub fn fail_next(&self, error: AppError) {
        *self.fail_next.lock().unwrap() = Some(error);
    }

    /// Failure count currently recorded for `source`, if its circuit is
    /// closed and counting.
    pub fn circuit_failures(&self, source: &str) -> Option<u32> {
        match self.circuits.lock().unwrap().get(source) {
            Some(CircuitRecord::Closed { failures }) => Some(*failures),
            _ => None,
        }
    }

    fn take_failure(&self) -> Option<AppError> {
        self.fail_next.lock().unwrap().take()
    }

    /// The networked store drops an open record `half_open_timeout` past its
    /// own window; a record that old reads as no record at all.
    fn record_expired(record: CircuitRecord, config: &CircuitBreakerConfig, now: f64) -> bool {
        match record {
            CircuitRecord::Open { until } => now > until + config.half_open_timeout.as_secs_f64(),
            _ => false,
        }
    }
}

impl StateStore for InMemoryStateStore {
    async fn circuit_state(
        &self,
        source: &str,
        config: &CircuitBreakerConfig,
    ) -> Result<CircuitState, AppError> {
        if let Some(e) = self.take_failure() {
            return Err(e);
        }
        let now = self.clock.now();
        let mut circuits = self.circuits.lock().unwrap();
        match circuits.get(source).copied() {
            None => Ok(CircuitState::Closed),
            Some(record) if Self::record_expired(record, config, now) => {
                circuits.remove(source);
                Ok(CircuitState::Closed)
            }
            Some(record) => {
                let settled = record.settle(config, now);
                if settled == CircuitRecord::fresh() {
                    circuits.remove(source);
                } else {
                    circuits.insert(source.to_string(), settled);
                }
                Ok(settled.state())
            }
        }
    }

    async fn circuit_record_failure(
        &self,
        source: &str,
        config: &CircuitBreakerConfig,
    ) -> Result<CircuitState, AppError> {
        if let Some(e) = self.take_failure() {
            return Err(e);
        }
        let now = self.clock.now();
        let mut circuits = self.circuits.lock().unwrap();
        let record = circuits
            .get(source)
            .copied()
            .filter(|record| !Self::record_expired(*record, config, now))
            .unwrap_or_else(CircuitRecord::fresh)
            .after_failure(config, now);
        circuits.insert(source.to_string(), record);
        Ok(record.state())
    }

    async fn circuit_record_success(&self, source: &str) -> Result<(), AppError> {
        if let Some(e) = self.take_failure() {
            return Err(e);
        }
        self.circuits.lock().unwrap().remove(source);
        Ok(())
    }

    async fn bucket_acquire(
        &self,
        source: &str,
        limit: &RateLimit,
        tokens: f64,
    ) -> Result<bool, AppError> {
        if let Some(e) = self.take_failure() {
            return Err(e);
        }
        let now = self.clock.now();
        let mut buckets = self.buckets.lock().unwrap();
        let bucket = buckets
            .get(source)
            .copied()
            .unwrap_or_else(|| TokenBucket::full(limit, now));
        let (updated, admitted) = bucket.try_take(limit, tokens, now);
        buckets.insert(source.to_string(), updated);
        Ok(admitted)
    }
}

// ---------------------------------------------------------------------------
// StallingStateStore
// ---------------------------------------------------------------------------

/// State store whose calls never resolve, for exercising store deadlines.
#[derive(Clone, Copy, Default)]
pub struct StallingStateStore;

impl StateStore for StallingStateStore {
    async fn circuit_state(
        &self,
        _source: &str,
        _config: &CircuitBreakerConfig,
    ) -> Result<CircuitState, AppError> {
        std::future::pending().await
    }

    async fn circuit_record_failure(
        &self,
        _source: &str,
        _config: &CircuitBreakerConfig,
    ) -> Result<CircuitState, AppError> {
        std::future::pending().await
    }

    async fn circuit_record_success(&self, _source: &str) -> Result<(), AppError> {
        std::future::pending().await
    }

    async fn bucket_acquire(
        &self,
        _source: &str,
        _limit: &RateLimit,
        _tokens: f64,
    ) -> Result<bool, AppError> {
        std::future::pending().await
    }
}

// ---------------------------------------------------------------------------
// InMemoryFanoutQueue
// ---------------------------------------------------------------------------

struct StoredEntry {
    id: String,
    /// Serialized message, stored as the wire payload so tests can inspect
    /// exactly what a networked backend would carry.
    payload: String,
    delivered_to: Option<String>,
    delivered_at: Option<Instant>,
    acked: bool,
}

/// In-memory `FanoutQueue` with consumer-group delivery bookkeeping.
#[derive(Clone)]
pub struct InMemoryFanoutQueue {
    entries: Arc<Mutex<Vec<StoredEntry>>>,
    next_id: Arc<Mutex<u64>>,
    enqueue_error: Arc<Mutex<Option<AppError>>>,
    read_error: Arc<Mutex<Option<AppError>>>,
}

impl InMemoryFanoutQueue {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(Mutex::new(Vec::new())),
            next_id: Arc::new(Mutex::new(0)),
            enqueue_error: Arc::new(Mutex::new(None)),
            read_error: Arc::new(Mutex::new(None)),
        }
    }

    /// Queue that fails its next enqueue with `error`.
    pub fn with_enqueue_error(error: AppError) -> Self {
        let queue = Self::new();
        *queue.enqueue_error.lock().unwrap() = Some(error);
        queue
    }

    /// Fail the next read with `error`.
    pub fn fail_next_read(&self, error: AppError) {
        *self.read_error.lock().unwrap() = Some(error);
    }

    /// Raw serialized payload of entry `id`.
    pub fn payload(&self, id: &str) -> Option<String> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .find(|entry| entry.id == id)
            .map(|entry| entry.payload.clone())
    }

    /// Ids of acknowledged entries, in enqueue order.
    pub fn acked_ids(&self) -> Vec<String> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .filter(|entry| entry.acked)
            .map(|entry| entry.id.clone())
            .collect()
    }

    /// Entries delivered to some consumer but not yet acknowledged.
    pub fn pending_count(&self) -> usize {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .filter(|entry| entry.delivered_to.is_some() && !entry.acked)
            .count()
    }

    fn take_undelivered(&self, consumer: &str, count: usize) -> Result<Vec<QueueEntry>, AppError> {
        let mut entries = self.entries.lock().unwrap();
        let mut batch = Vec::new();
        for entry in entries.iter_mut() {
            if batch.len() == count {
                break;
            }
            if entry.delivered_to.is_none() && !entry.acked {
                entry.delivered_to = Some(consumer.to_string());
                entry.delivered_at = Some(Instant::now());
                batch.push(QueueEntry {
                    id: entry.id.clone(),
                    message: serde_json::from_str(&entry.payload)?,
                });
            }
        }
        Ok(batch)
    }
}

impl Default for InMemoryFanoutQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl FanoutQueue for InMemoryFanoutQueue {
    async fn enqueue(&self, message: &FanoutMessage) -> Result<String, AppError> {
        if let Some(e) = self.enqueue_error.lock().unwrap().take() {
            return Err(e);
        }
        let payload = serde_json::to_string(message)?;
        let mut next_id = self.next_id.lock().unwrap();
        *next_id += 1;
        let id = format!("{}-0", *next_id);
        self.entries.lock().unwrap().push(StoredEntry {
            id: id.clone(),
            payload,
            delivered_to: None,
            delivered_at: None,
            acked: false,
        });
        Ok(id)
    }

    async fn read_batch(
        &self,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<QueueEntry>, AppError> {
        if let Some(e) = self.read_error.lock().unwrap().take() {
            return Err(e);
        }
        let batch = self.take_undelivered(consumer, count)?;
        if !batch.is_empty() || block.is_zero() {
            return Ok(batch);
        }
        // Emulate a blocking read: wait out the window, then look once more.
        tokio::time::sleep(block).await;
        self.take_undelivered(consumer, count)
    }

    async fn ack(&self, entry_id: &str) -> Result<(), AppError> {
        let mut entries = self.entries.lock().unwrap();
        if let Some(entry) = entries.iter_mut().find(|entry| entry.id == entry_id) {
            entry.acked = true;
        }
        Ok(())
    }

    async fn claim_stale(
        &self,
        consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> Result<Vec<QueueEntry>, AppError> {
        let mut entries = self.entries.lock().unwrap();
        let mut claimed = Vec::new();
        for entry in entries.iter_mut() {
            if claimed.len() == count {
                break;
            }
            let idle_enough = entry.delivered_at.is_some_and(|at| at.elapsed() >= min_idle);
            if entry.delivered_to.is_some() && !entry.acked && idle_enough {
                entry.delivered_to = Some(consumer.to_string());
                entry.delivered_at = Some(Instant::now());
                claimed.push(QueueEntry {
                    id: entry.id.clone(),
                    message: serde_json::from_str(&entry.payload)?,
                });
            }
        }
        Ok(claimed)
    }
}

// ---------------------------------------------------------------------------
// MockConnector
// ---------------------------------------------------------------------------

/// Mock source connector with per-source scripted results.
///
/// Results for a source are consumed in order; a source with no script left
/// returns an empty posting list.
#[derive(Clone, Default)]
pub struct MockConnector {
    results: Arc<Mutex<HashMap<String, Vec<Result<Vec<Posting>, AppError>>>>>,
    pub calls: Arc<Mutex<Vec<String>>>,
    delay: Arc<Mutex<Option<Duration>>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_postings(self, source: impl Into<String>, postings: Vec<Posting>) -> Self {
        self.results
            .lock()
            .unwrap()
            .entry(source.into())
            .or_default()
            .push(Ok(postings));
        self
    }

    pub fn with_error(self, source: impl Into<String>, error: AppError) -> Self {
        self.results
            .lock()
            .unwrap()
            .entry(source.into())
            .or_default()
            .push(Err(error));
        self
    }

    /// Make every fetch take `delay` before resolving.
    pub fn with_delay(self, delay: Duration) -> Self {
        *self.delay.lock().unwrap() = Some(delay);
        self
    }
}

impl SourceConnector for MockConnector {
    async fn fetch(&self, source: &str, _query: &SearchQuery) -> Result<Vec<Posting>, AppError> {
        self.calls.lock().unwrap().push(source.to_string());
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut results = self.results.lock().unwrap();
        match results.get_mut(source) {
            Some(scripted) if !scripted.is_empty() => scripted.remove(0),
            _ => Ok(Vec::new()),
        }
    }
}

// ---------------------------------------------------------------------------
// RecordingSink
// ---------------------------------------------------------------------------

/// Sink that records every delivery as `(source, fingerprint, postings)`.
#[derive(Clone, Default)]
pub struct RecordingSink {
    pub deliveries: Arc<Mutex<Vec<(String, String, Vec<Posting>)>>>,
    fail_next: Arc<Mutex<Option<AppError>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, error: AppError) {
        *self.fail_next.lock().unwrap() = Some(error);
    }
}

impl PostingSink for RecordingSink {
    async fn deliver(
        &self,
        source: &str,
        fingerprint: &str,
        postings: Vec<Posting>,
    ) -> Result<(), AppError> {
        if let Some(e) = self.fail_next.lock().unwrap().take() {
            return Err(e);
        }
        self.deliveries
            .lock()
            .unwrap()
            .push((source.to_string(), fingerprint.to_string(), postings));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MockReporter
// ---------------------------------------------------------------------------

/// Mock worker reporter that records event labels.
#[derive(Default)]
pub struct MockReporter {
    pub events: Arc<Mutex<Vec<String>>>,
}

impl MockReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn labels(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

impl WorkerReporter for MockReporter {
    fn report(&self, event: WorkerEvent<'_>) {
        let label = match &event {
            WorkerEvent::Started { .. } => "Started",
            WorkerEvent::Polling => "Polling",
            WorkerEvent::MessageReceived { .. } => "MessageReceived",
            WorkerEvent::SourceSkipped { .. } => "SourceSkipped",
            WorkerEvent::SourceCompleted { .. } => "SourceCompleted",
            WorkerEvent::SourceFailed { .. } => "SourceFailed",
            WorkerEvent::MessageAcked { .. } => "MessageAcked",
            WorkerEvent::StaleClaimed { .. } => "StaleClaimed",
            WorkerEvent::Stopped { .. } => "Stopped",
        };
        self.events.lock().unwrap().push(label.to_string());
    }
}

// ---------------------------------------------------------------------------
// Test helpers
// ---------------------------------------------------------------------------

/// Create a small normalized query for testing.
pub fn make_test_query() -> SearchQuery {
    SearchQuery::new(vec!["rust".to_string(), "backend".to_string()]).with_location("Berlin")
}

/// Create a fanout message over `sources` for testing.
pub fn make_test_message(sources: &[&str]) -> FanoutMessage {
    FanoutMessage::new(
        sources.iter().map(|s| s.to_string()).collect(),
        make_test_query(),
    )
}

/// Create a dummy posting attributed to `source`.
pub fn make_test_posting(source: &str, title: &str) -> Posting {
    Posting {
        source: source.to_string(),
        title: title.to_string(),
        company: "Acme GmbH".to_string(),
        location: Some("Berlin".to_string()),
        url: format!("https://{source}.example.com/jobs/1"),
        posted_at: Some(Utc::now()),
    }
}
