//! Producer-side hand-off to the fanout queue.

use crate::error::AppError;
use crate::fanout::FanoutQueue;
use crate::models::FanoutMessage;

/// What a submission returns: the queue entry id for correlation and the
/// query fingerprint for downstream cache lookups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitReceipt {
    pub message_id: String,
    pub fingerprint: String,
}

/// Fans a search out to its requested sources by appending one durable
/// message. Submission never waits on source execution; the receipt is the
/// only synchronous signal.
#[derive(Clone)]
pub struct FanoutProducer<Q: FanoutQueue> {
    queue: Q,
}

impl<Q: FanoutQueue> FanoutProducer<Q> {
    pub fn new(queue: Q) -> Self {
        Self { queue }
    }

    pub async fn submit(&self, message: FanoutMessage) -> Result<SubmitReceipt, AppError> {
        let fingerprint = message.query.fingerprint();
        let message_id = self.queue.enqueue(&message).await?;
        tracing::info!(
            message_id = %message_id,
            sources = message.sources.len(),
            fingerprint = %&fingerprint[..8],
            "Fanout message enqueued"
        );
        Ok(SubmitReceipt {
            message_id,
            fingerprint,
        })
    }
}
