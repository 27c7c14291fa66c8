//! Redis Streams broker (durable, at-least-once).
//!
//! - **Stream key**: `{topic}:{partition}`, one stream per partition so that
//!   per-entity order is the stream's append order.
//! - **Entry fields**: `key`, `event_id`, `payload`.
//! - **Dead letters**: `{topic}:dlq`, written by [`RedisDeadLetterSink`].

use std::sync::Arc;

use tracing::instrument;

use homeflow_events::{EventBus, PublishError, StreamRecord, partition_for};

use crate::store::StoreError;
use crate::stream::{DeadLetter, DeadLetterSink};

#[derive(Debug, thiserror::Error)]
pub enum RedisStreamsError {
    #[error("Redis connection error: {0}")]
    Connection(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Publishes [`StreamRecord`]s with `XADD`.
#[derive(Debug, Clone)]
pub struct RedisStreamsBroker {
    client: Arc<redis::Client>,
    topic: String,
    partitions: u32,
}

impl RedisStreamsBroker {
    pub fn new(redis_url: impl AsRef<str>, topic: impl Into<String>, partitions: u32) -> Result<Self, RedisStreamsError> {
        if partitions == 0 {
            return Err(RedisStreamsError::Config("partitions must be at least 1".to_string()));
        }
        let client = redis::Client::open(redis_url.as_ref()).map_err(|e| RedisStreamsError::Connection(e.to_string()))?;
        Ok(Self {
            client: Arc::new(client),
            topic: topic.into(),
            partitions,
        })
    }

    pub fn stream_key(&self, partition: u32) -> String {
        stream_key(&self.topic, partition)
    }
}

fn stream_key(topic: &str, partition: u32) -> String {
    format!("{topic}:{partition}")
}

/// Connection-level failures are retryable; anything the server answered
/// with an error is not.
fn classify(e: redis::RedisError) -> PublishError {
    if e.is_io_error() || e.is_timeout() || e.is_connection_refusal() || e.is_connection_dropped() {
        PublishError::transient(e.to_string())
    } else {
        PublishError::rejected(e.to_string())
    }
}

impl EventBus<StreamRecord> for RedisStreamsBroker {
    fn partitions(&self) -> u32 {
        self.partitions
    }

    #[instrument(skip(self, message), fields(topic = %self.topic), err)]
    fn publish(&self, key: &str, message: StreamRecord) -> Result<(), PublishError> {
        let stream = self.stream_key(partition_for(key, self.partitions));
        let mut conn = self.client.get_connection().map_err(classify)?;

        let _: String = redis::cmd("XADD")
            .arg(&stream)
            .arg("*")
            .arg("key")
            .arg(key)
            .arg("event_id")
            .arg(message.event_id().to_string())
            .arg("payload")
            .arg(message.value())
            .query(&mut conn)
            .map_err(classify)?;

        Ok(())
    }
}

/// Appends dead letters to `{topic}:dlq`.
#[derive(Debug, Clone)]
pub struct RedisDeadLetterSink {
    client: Arc<redis::Client>,
    topic: String,
}

impl RedisDeadLetterSink {
    pub fn new(redis_url: impl AsRef<str>, topic: impl Into<String>) -> Result<Self, RedisStreamsError> {
        let client = redis::Client::open(redis_url.as_ref()).map_err(|e| RedisStreamsError::Connection(e.to_string()))?;
        Ok(Self {
            client: Arc::new(client),
            topic: topic.into(),
        })
    }

    pub fn dlq_key(&self) -> String {
        format!("{}:dlq", self.topic)
    }
}

impl DeadLetterSink for RedisDeadLetterSink {
    fn dead_letter(&self, letter: DeadLetter) -> Result<(), StoreError> {
        let mut conn = self
            .client
            .get_connection()
            .map_err(|e| StoreError::Storage(e.to_string()))?;

        let _: String = redis::cmd("XADD")
            .arg(self.dlq_key())
            .arg("*")
            .arg("topic")
            .arg(&letter.topic)
            .arg("key")
            .arg(letter.record.key())
            .arg("event_id")
            .arg(letter.record.event_id().to_string())
            .arg("error")
            .arg(&letter.error)
            .arg("attempts")
            .arg(letter.attempts)
            .arg("failed_at")
            .arg(letter.failed_at.to_rfc3339())
            .arg("payload")
            .arg(letter.record.value())
            .query(&mut conn)
            .map_err(|e| StoreError::Storage(e.to_string()))?;

        Ok(())
    }
}
