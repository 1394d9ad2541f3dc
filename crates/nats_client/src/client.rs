//! NATS client implementation with JetStream work-queue support.

use anyhow::Result;
use async_nats::jetstream::{
    self,
    consumer::{pull, AckPolicy, PullConsumer},
    stream::Stream,
};
use async_nats::Message;
use std::time::Duration;
use tracing::info;

/// Default retention period for queued messages (1 hour).
pub const DEFAULT_RETENTION_SECS: u64 = 3600;

/// Default max messages per queue.
pub const DEFAULT_MAX_MESSAGES: i64 = 1_000_000;

/// Default max bytes per queue (256MB).
pub const DEFAULT_MAX_BYTES: i64 = 268_435_456;

/// Header carrying the payload content type.
pub const CONTENT_TYPE_HEADER: &str = "Content-Type";

/// Configuration for a work queue.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Queue name. Also the subject producers publish to.
    pub queue: String,
    /// JetStream stream backing the queue.
    pub stream_name: String,
    /// Durable consumer name.
    pub consumer_name: String,
    /// Keep messages on disk rather than in memory.
    pub durable: bool,
    /// Retention period in seconds.
    pub max_age_secs: u64,
    /// Maximum number of messages.
    pub max_messages: i64,
    /// Maximum bytes.
    pub max_bytes: i64,
}

impl QueueConfig {
    /// Create a queue config for `queue`.
    ///
    /// Creates stream named `{QUEUE}` capturing subject `{queue}`, consumed
    /// by durable consumer `{queue}_consumer`. Characters JetStream does not
    /// allow in names are replaced with `_`.
    pub fn for_queue(queue: &str) -> Self {
        let safe: String = queue
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
            .collect();

        Self {
            queue: queue.to_string(),
            stream_name: safe.to_uppercase(),
            consumer_name: format!("{}_consumer", safe),
            durable: false,
            max_age_secs: DEFAULT_RETENTION_SECS,
            max_messages: DEFAULT_MAX_MESSAGES,
            max_bytes: DEFAULT_MAX_BYTES,
        }
    }

    /// Persist queued messages to disk.
    pub fn with_durable(mut self, durable: bool) -> Self {
        self.durable = durable;
        self
    }
}

/// Wrapper around the NATS client with JetStream context.
#[derive(Clone)]
pub struct NatsClient {
    jetstream: jetstream::Context,
}

impl NatsClient {
    /// Connect to a NATS server and create a JetStream context.
    pub async fn connect(url: &str) -> Result<Self> {
        info!("Connecting to NATS at {}", url);
        let client = async_nats::connect(url).await?;
        info!("Connected to NATS at {}", url);

        Ok(Self {
            jetstream: jetstream::new(client),
        })
    }

    /// Declare the queue's stream. Idempotent.
    pub async fn ensure_queue(&self, config: &QueueConfig) -> Result<Stream> {
        info!(
            "Ensuring queue '{}' (stream: {}, durable: {})",
            config.queue, config.stream_name, config.durable
        );

        let storage = if config.durable {
            jetstream::stream::StorageType::File
        } else {
            jetstream::stream::StorageType::Memory
        };

        let stream = self
            .jetstream
            .get_or_create_stream(jetstream::stream::Config {
                name: config.stream_name.clone(),
                subjects: vec![config.queue.clone()],
                retention: jetstream::stream::RetentionPolicy::WorkQueue,
                max_messages: config.max_messages,
                max_bytes: config.max_bytes,
                max_age: Duration::from_secs(config.max_age_secs),
                storage,
                ..Default::default()
            })
            .await?;

        info!("Queue '{}' ready", config.queue);
        Ok(stream)
    }

    /// Declare the queue and its durable pull consumer with explicit acks.
    pub async fn queue_consumer(&self, config: &QueueConfig) -> Result<PullConsumer> {
        let stream = self.ensure_queue(config).await?;

        let consumer = stream
            .get_or_create_consumer(
                &config.consumer_name,
                pull::Config {
                    durable_name: Some(config.consumer_name.clone()),
                    ack_policy: AckPolicy::Explicit,
                    ..Default::default()
                },
            )
            .await?;

        Ok(consumer)
    }

    /// Start pulling messages from the queue.
    ///
    /// Each yielded message must be acknowledged (or terminated) explicitly.
    pub async fn consume(&self, config: &QueueConfig) -> Result<pull::Stream> {
        let consumer = self.queue_consumer(config).await?;
        let messages = consumer.messages().await?;
        info!(
            "Consuming queue '{}' via consumer '{}'",
            config.queue, config.consumer_name
        );
        Ok(messages)
    }
}

/// Content type declared on a message, if any.
pub fn content_type(msg: &Message) -> Option<String> {
    msg.headers
        .as_ref()
        .and_then(|headers| headers.get(CONTENT_TYPE_HEADER))
        .map(|value| value.as_str().to_string())
}
