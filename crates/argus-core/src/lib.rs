pub mod admission;
pub mod circuit_breaker;
pub mod error;
pub mod fanout;
pub mod fingerprint;
pub mod models;
pub mod producer;
pub mod rate_limiter;
pub mod state_store;
pub mod testutil;
pub mod traits;
pub mod worker;

pub use admission::{AdmissionDecision, AdmissionGate};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitRecord, CircuitState};
pub use error::AppError;
pub use fanout::{FanoutQueue, QueueEntry};
pub use fingerprint::query_fingerprint;
pub use models::{FanoutMessage, Posting, SearchQuery};
pub use producer::{FanoutProducer, SubmitReceipt};
pub use rate_limiter::{RateLimit, RateLimiter, RateTable, TokenBucket};
pub use state_store::StateStore;
pub use traits::{NullSink, PostingSink, SourceConnector};
pub use worker::{FanoutWorker, TracingWorkerReporter, WorkerConfig, WorkerEvent, WorkerReporter};
