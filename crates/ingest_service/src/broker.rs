//! Message broker seam for the consumer.
//!
//! [`Broker::subscribe`] yields [`Delivery`] values that must each be
//! settled with [`Delivery::ack`] or [`Delivery::nack`]. [`NatsBroker`]
//! implements it over a JetStream work queue.

use crate::error::{Error, Result};
use async_nats::jetstream::{self, AckKind};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use nats_client::{content_type, NatsClient, QueueConfig, CONTENT_TYPE_HEADER};
use std::collections::HashMap;
use std::fmt;

/// Content type that marks a payload as JSON.
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Broker-supplied metadata for one delivery.
#[derive(Debug, Clone, Default)]
pub struct MessageProperties {
    pub content_type: Option<String>,
    pub headers: HashMap<String, String>,
}

impl MessageProperties {
    pub fn with_content_type(content_type: impl Into<String>) -> Self {
        Self {
            content_type: Some(content_type.into()),
            headers: HashMap::new(),
        }
    }

    /// True when either the content type or the `Content-Type` header
    /// declares JSON. Parameters such as `charset` are ignored.
    pub fn is_json(&self) -> bool {
        let header = self
            .headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(CONTENT_TYPE_HEADER))
            .map(|(_, value)| value.as_str());

        self.content_type
            .as_deref()
            .into_iter()
            .chain(header)
            .any(is_json_media_type)
    }
}

fn is_json_media_type(value: &str) -> bool {
    value
        .split(';')
        .next()
        .map(|media| media.trim().eq_ignore_ascii_case(JSON_CONTENT_TYPE))
        .unwrap_or(false)
}

/// Settles one delivery with the broker.
#[async_trait]
pub trait Acknowledger: Send + Sync {
    async fn ack(&self) -> Result<()>;

    /// Negative acknowledgement without requeue.
    async fn nack(&self) -> Result<()>;
}

/// One message taken off the queue.
pub struct Delivery {
    pub content: Bytes,
    pub properties: MessageProperties,
    acker: Box<dyn Acknowledger>,
}

impl Delivery {
    pub fn new(
        content: impl Into<Bytes>,
        properties: MessageProperties,
        acker: Box<dyn Acknowledger>,
    ) -> Self {
        Self {
            content: content.into(),
            properties,
            acker,
        }
    }

    pub async fn ack(&self) -> Result<()> {
        self.acker.ack().await
    }

    pub async fn nack(&self) -> Result<()> {
        self.acker.nack().await
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("content", &self.content)
            .field("properties", &self.properties)
            .finish_non_exhaustive()
    }
}

/// Stream of deliveries for one subscription. Ends when the transport is lost.
pub type Deliveries = BoxStream<'static, Result<Delivery>>;

#[async_trait]
pub trait Broker: Send + Sync + 'static {
    /// Declare `queue` and start a manual-ack subscription on it.
    async fn subscribe(&self, queue: &str) -> Result<Deliveries>;
}

/// [`Broker`] backed by a NATS JetStream work queue.
#[derive(Clone)]
pub struct NatsBroker {
    client: NatsClient,
    durable: bool,
}

impl NatsBroker {
    pub fn new(client: NatsClient, durable: bool) -> Self {
        Self { client, durable }
    }

    /// Connect to the NATS server at `url`.
    pub async fn connect(url: &str, durable: bool) -> Result<Self> {
        Ok(Self::new(NatsClient::connect(url).await?, durable))
    }
}

#[async_trait]
impl Broker for NatsBroker {
    async fn subscribe(&self, queue: &str) -> Result<Deliveries> {
        let config = QueueConfig::for_queue(queue).with_durable(self.durable);
        let messages = self.client.consume(&config).await?;

        Ok(messages
            .map(|item| match item {
                Ok(message) => Ok(jetstream_delivery(message)),
                Err(e) => Err(Error::Broker(e.into())),
            })
            .boxed())
    }
}

fn jetstream_delivery(message: jetstream::Message) -> Delivery {
    let headers = message
        .headers
        .as_ref()
        .map(|headers| {
            headers
                .iter()
                .filter_map(|(name, values)| {
                    values
                        .first()
                        .map(|value| (name.to_string(), value.as_str().to_string()))
                })
                .collect()
        })
        .unwrap_or_default();

    let properties = MessageProperties {
        content_type: content_type(&message),
        headers,
    };

    Delivery::new(
        message.payload.clone(),
        properties,
        Box::new(JetStreamAcker(message)),
    )
}

struct JetStreamAcker(jetstream::Message);

#[async_trait]
impl Acknowledger for JetStreamAcker {
    async fn ack(&self) -> Result<()> {
        self.0
            .ack()
            .await
            .map_err(|e| Error::Broker(anyhow::anyhow!(e)))
    }

    async fn nack(&self) -> Result<()> {
        self.0
            .ack_with(AckKind::Term)
            .await
            .map_err(|e| Error::Broker(anyhow::anyhow!(e)))
    }
}
