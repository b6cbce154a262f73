//! Durable fanout queue contract between producers and workers.

use std::future::Future;
use std::time::Duration;

use crate::error::AppError;
use crate::models::FanoutMessage;

/// A delivered queue entry: the backend-assigned id plus the decoded
/// message. The id is what gets acknowledged.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueEntry {
    pub id: String,
    pub message: FanoutMessage,
}

/// Append-only ordered log with consumer-group delivery.
///
/// Each message goes to exactly one live consumer in the group; entries stay
/// pending until acknowledged, and entries whose consumer died can be
/// claimed by a peer. Delivery is at-least-once, so consumers must tolerate
/// replays. Enqueue order is delivery order.
pub trait FanoutQueue: Send + Sync + Clone {
    /// Append `message`, returning the assigned entry id. An unreachable
    /// backend surfaces as an error, never a silent drop.
    fn enqueue(
        &self,
        message: &FanoutMessage,
    ) -> impl Future<Output = Result<String, AppError>> + Send;

    /// Read up to `count` new entries for `consumer`, waiting up to `block`
    /// when the queue is empty.
    fn read_batch(
        &self,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> impl Future<Output = Result<Vec<QueueEntry>, AppError>> + Send;

    /// Acknowledge one processed entry. Callers acknowledge only after every
    /// source in the entry has been attempted.
    fn ack(&self, entry_id: &str) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Take over entries that have sat unacknowledged longer than `min_idle`
    /// because their consumer stalled or crashed.
    fn claim_stale(
        &self,
        consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> impl Future<Output = Result<Vec<QueueEntry>, AppError>> + Send;
}
