//! Redis Streams implementation of the fanout queue.
//!
//! Messages append to one well-known stream and workers read it through a
//! consumer group, so each entry is delivered to exactly one live consumer.
//! Unacknowledged entries stay in the group's pending list and are claimed
//! from crashed consumers with `XAUTOCLAIM` after a visibility timeout.
//! Delivery is at-least-once.

use std::time::Duration;

use argus_core::error::AppError;
use argus_core::fanout::{FanoutQueue, QueueEntry};
use argus_core::models::FanoutMessage;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use redis::streams::{
    StreamAutoClaimOptions, StreamAutoClaimReply, StreamId, StreamReadOptions, StreamReadReply,
};

use crate::config::RedisConfig;

/// Field holding the serialized message in each stream entry.
const PAYLOAD_FIELD: &str = "payload";

/// `FanoutQueue` implementation over a Redis stream.
#[derive(Clone)]
pub struct RedisFanoutQueue {
    manager: ConnectionManager,
    stream: String,
    group: String,
}

impl RedisFanoutQueue {
    pub fn new(manager: ConnectionManager, config: &RedisConfig) -> Self {
        Self {
            manager,
            stream: format!("{}:fanout", config.key_prefix),
            group: config.consumer_group.clone(),
        }
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }

    /// Create the consumer group if it does not exist yet.
    ///
    /// Starts the group at id 0 so messages enqueued before the first worker
    /// came up are still delivered. Racing workers both try this; losing to
    /// a peer is fine.
    pub async fn ensure_group(&self) -> Result<(), AppError> {
        let mut conn = self.manager.clone();
        match conn
            .xgroup_create_mkstream::<_, _, _, ()>(&self.stream, &self.group, "0")
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if e.to_string().contains("BUSYGROUP") => Ok(()),
            Err(e) => Err(AppError::QueueError(e.to_string())),
        }
    }

    fn decode(id: &StreamId) -> Result<QueueEntry, AppError> {
        let payload: String = id.get(PAYLOAD_FIELD).ok_or_else(|| {
            AppError::QueueError(format!("stream entry {} has no payload field", id.id))
        })?;
        let message: FanoutMessage = serde_json::from_str(&payload)?;
        Ok(QueueEntry {
            id: id.id.clone(),
            message,
        })
    }

    /// Decode one delivered batch. An entry whose payload no longer parses
    /// is acked and dropped, so it cannot sit at the head of the pending
    /// list wedging every later read and claim sweep.
    async fn decode_delivered(
        &self,
        conn: &mut ConnectionManager,
        ids: &[StreamId],
    ) -> Result<Vec<QueueEntry>, AppError> {
        let mut entries = Vec::with_capacity(ids.len());
        for id in ids {
            match Self::decode(id) {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    tracing::error!(
                        stream = %self.stream,
                        entry_id = %id.id,
                        error = %e,
                        "Dropping stream entry with undecodable payload"
                    );
                    let _: i64 = conn
                        .xack(&self.stream, &self.group, &[&id.id])
                        .await
                        .map_err(|e| AppError::QueueError(e.to_string()))?;
                }
            }
        }
        Ok(entries)
    }
}

impl FanoutQueue for RedisFanoutQueue {
    async fn enqueue(&self, message: &FanoutMessage) -> Result<String, AppError> {
        let payload = serde_json::to_string(message)?;
        let mut conn = self.manager.clone();
        let id: String = conn
            .xadd(&self.stream, "*", &[(PAYLOAD_FIELD, payload.as_str())])
            .await
            .map_err(|e| AppError::QueueError(e.to_string()))?;
        Ok(id)
    }

    async fn read_batch(
        &self,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<QueueEntry>, AppError> {
        let mut conn = self.manager.clone();
        let options = StreamReadOptions::default()
            .group(&self.group, consumer)
            .count(count)
            .block(block.as_millis() as usize);

        let reply: Option<StreamReadReply> = conn
            .xread_options(&[&self.stream], &[">"], &options)
            .await
            .map_err(|e| AppError::QueueError(e.to_string()))?;

        let Some(reply) = reply else {
            return Ok(Vec::new());
        };

        let mut entries = Vec::new();
        for key in reply.keys {
            entries.extend(self.decode_delivered(&mut conn, &key.ids).await?);
        }
        Ok(entries)
    }

    async fn ack(&self, entry_id: &str) -> Result<(), AppError> {
        let mut conn = self.manager.clone();
        let _: i64 = conn
            .xack(&self.stream, &self.group, &[entry_id])
            .await
            .map_err(|e| AppError::QueueError(e.to_string()))?;
        Ok(())
    }

    async fn claim_stale(
        &self,
        consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> Result<Vec<QueueEntry>, AppError> {
        let mut conn = self.manager.clone();
        let options = StreamAutoClaimOptions::default().count(count);

        let reply: StreamAutoClaimReply = conn
            .xautoclaim_options(
                &self.stream,
                &self.group,
                consumer,
                min_idle.as_millis() as usize,
                "0-0",
                options,
            )
            .await
            .map_err(|e| AppError::QueueError(e.to_string()))?;

        self.decode_delivered(&mut conn, &reply.claimed).await
    }
}
