//! Redis-stream work queue between ingest and the fan-out workers.
//!
//! The queue carries delivery ids only; the store stays authoritative. A
//! lost message never loses a delivery, because ingest persists first and
//! the pending poller re-injects anything the stream missed. The stream is
//! trimmed to an approximate maximum length on publish.

use std::time::Duration;

use redis::AsyncCommands;
use redis::streams::{StreamMaxlen, StreamReadOptions, StreamReadReply};
use thiserror::Error;
use uuid::Uuid;

/// Stream carrying delivery ids from ingest to the workers.
pub const DELIVERIES_TOPIC: &str = "deliveries";

/// Consumer group the fan-out workers read as.
pub const FANOUT_GROUP: &str = "fanout-workers";

/// Approximate cap on queued messages; oldest entries are trimmed past this.
const MAX_STREAM_LEN: usize = 10_000;

const DELIVERY_ID_FIELD: &str = "delivery_id";

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue error: {0}")]
    Redis(#[from] redis::RedisError),
}

pub type Result<T> = std::result::Result<T, QueueError>;

/// One claimed stream entry.
#[derive(Debug, Clone)]
pub struct QueueMessage {
    /// Stream entry id, needed to ack.
    pub id: String,
    /// The `delivery_id` field, if the entry carried one.
    pub delivery_id: Option<String>,
}

/// Shared handle to the stream. Cheap to clone; every call site gets its own
/// multiplexed connection so blocking reads never starve publishers.
#[derive(Clone)]
pub struct Queue {
    client: redis::Client,
}

impl Queue {
    pub fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self { client })
    }

    /// Append a delivery id to the topic, trimming to the approximate cap.
    pub async fn publish(&self, topic: &str, delivery_id: Uuid) -> Result<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let _: String = conn
            .xadd_maxlen(
                topic,
                StreamMaxlen::Approx(MAX_STREAM_LEN),
                "*",
                &[(DELIVERY_ID_FIELD, delivery_id.to_string())],
            )
            .await?;
        Ok(())
    }

    /// Idempotently create the consumer group, creating the stream if needed.
    pub async fn ensure_group(&self, topic: &str, group: &str) -> Result<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let result: redis::RedisResult<String> = conn.xgroup_create_mkstream(topic, group, "0").await;
        match result {
            Ok(_) => Ok(()),
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Claim up to `count` new messages as `consumer` within `group`,
    /// blocking up to `block` when the stream is empty.
    pub async fn read_group(
        &self,
        topic: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<QueueMessage>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let options = StreamReadOptions::default()
            .group(group, consumer)
            .count(count)
            .block(block.as_millis() as usize);

        let reply: StreamReadReply = conn.xread_options(&[topic], &[">"], &options).await?;

        let mut messages = Vec::new();
        for key in reply.keys {
            for entry in key.ids {
                let delivery_id = entry
                    .map
                    .get(DELIVERY_ID_FIELD)
                    .and_then(|v| redis::from_redis_value::<String>(v).ok());
                messages.push(QueueMessage {
                    id: entry.id,
                    delivery_id,
                });
            }
        }

        Ok(messages)
    }

    /// Acknowledge and delete a processed entry. Processing outcomes do not
    /// matter here: re-injection is the pending poller's job, not the
    /// stream's.
    pub async fn ack(&self, topic: &str, group: &str, id: &str) -> Result<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let _: i64 = conn.xack(topic, group, &[id]).await?;
        let _: i64 = conn.xdel(topic, &[id]).await?;
        Ok(())
    }
}
