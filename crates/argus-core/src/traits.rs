use std::future::Future;

use crate::error::AppError;
use crate::models::{Posting, SearchQuery};

/// Executes one fetch against one job source.
///
/// Implementations are the per-source API clients and scrapers; this crate
/// only sees the seam. An error return is what the circuit breaker counts
/// as a failure for that source.
pub trait SourceConnector: Send + Sync + Clone {
    fn fetch(
        &self,
        source: &str,
        query: &SearchQuery,
    ) -> impl Future<Output = Result<Vec<Posting>, AppError>> + Send;
}

/// Downstream hand-off for fetched postings. Caching, dedup, and ranking
/// live behind this seam, outside this crate.
pub trait PostingSink: Send + Sync + Clone {
    /// Deliver `postings` fetched from `source` for the query identified by
    /// `fingerprint`.
    fn deliver(
        &self,
        source: &str,
        fingerprint: &str,
        postings: Vec<Posting>,
    ) -> impl Future<Output = Result<(), AppError>> + Send;
}

/// Sink that discards everything, for setups without downstream delivery.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl PostingSink for NullSink {
    async fn deliver(
        &self,
        _source: &str,
        _fingerprint: &str,
        _postings: Vec<Posting>,
    ) -> Result<(), AppError> {
        Ok(())
    }
}
