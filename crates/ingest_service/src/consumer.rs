//! Queue consumer driving the ingest pipeline.
//!
//! ```text
//! Disconnected --> Connecting --> Subscribed --> Consuming <--> Processing
//!      ^               |                             |
//!      +-- 5s delay ---+---------- stream end -------+
//! ```
//!
//! Deliveries are processed strictly one at a time. Malformed and rejected
//! messages are acked and dropped; any other failure is nacked without
//! requeue. Subscription failures and transport loss restart the loop after
//! a fixed delay, indefinitely, until the cancellation token fires.

use crate::broker::{Broker, Deliveries, Delivery};
use crate::error::{Error, Result};
use crate::pipeline::Pipeline;
use futures::StreamExt;
use metrics::counter;
use normalizer::{DataKind, RawReading};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Fixed delay between subscription attempts.
pub const RESTART_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Disconnected,
    Connecting,
    Subscribed,
    Consuming,
    Processing,
}

impl ConsumerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsumerState::Disconnected => "disconnected",
            ConsumerState::Connecting => "connecting",
            ConsumerState::Subscribed => "subscribed",
            ConsumerState::Consuming => "consuming",
            ConsumerState::Processing => "processing",
        }
    }
}

/// How a delivery was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Ingested and acked.
    Stored,
    /// Failed validation; acked and dropped.
    Rejected,
    /// Undecodable payload; acked and dropped.
    Malformed,
    /// Processing failed; nacked without requeue.
    Failed,
}

impl Disposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Disposition::Stored => "stored",
            Disposition::Rejected => "rejected",
            Disposition::Malformed => "malformed",
            Disposition::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub queue: String,
    /// Data kind every message on the queue is ingested as.
    pub kind: DataKind,
    pub restart_delay: Duration,
}

impl ConsumerConfig {
    pub fn for_queue(queue: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            kind: DataKind::Temperature,
            restart_delay: RESTART_DELAY,
        }
    }
}

enum StreamEnd {
    Shutdown,
    Disconnected,
}

pub struct SensorConsumer<B: Broker> {
    broker: B,
    pipeline: Arc<Pipeline>,
    config: ConsumerConfig,
    state: watch::Sender<ConsumerState>,
}

impl<B: Broker> SensorConsumer<B> {
    pub fn new(broker: B, pipeline: Arc<Pipeline>, config: ConsumerConfig) -> Self {
        let (state, _) = watch::channel(ConsumerState::Disconnected);
        Self {
            broker,
            pipeline,
            config,
            state,
        }
    }

    /// Observe state transitions.
    pub fn state(&self) -> watch::Receiver<ConsumerState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: ConsumerState) {
        self.state.send_if_modified(|current| {
            let changed = *current != state;
            *current = state;
            changed
        });
    }

    /// Run until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) {
        info!("Starting sensor consumer for queue '{}'", self.config.queue);

        loop {
            self.set_state(ConsumerState::Connecting);

            let subscribed = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                result = self.broker.subscribe(&self.config.queue) => result,
            };

            match subscribed {
                Ok(deliveries) => {
                    self.set_state(ConsumerState::Subscribed);
                    info!("Subscribed to queue '{}'", self.config.queue);

                    if let StreamEnd::Shutdown = self.consume(deliveries, &shutdown).await {
                        break;
                    }

                    warn!(
                        "Lost subscription to queue '{}', restarting in {:?}",
                        self.config.queue, self.config.restart_delay
                    );
                    counter!("consumer_restarts_total", "reason" => "disconnected").increment(1);
                }
                Err(e) => {
                    error!(
                        "Failed to subscribe to queue '{}': {}. Retrying in {:?}",
                        self.config.queue, e, self.config.restart_delay
                    );
                    counter!("consumer_restarts_total", "reason" => "subscribe").increment(1);
                }
            }

            self.set_state(ConsumerState::Disconnected);

            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.config.restart_delay) => {}
            }
        }

        self.set_state(ConsumerState::Disconnected);
        info!("Sensor consumer for queue '{}' stopped", self.config.queue);
    }

    async fn consume(&self, mut deliveries: Deliveries, shutdown: &CancellationToken) -> StreamEnd {
        loop {
            self.set_state(ConsumerState::Consuming);

            let next = tokio::select! {
                biased;
                _ = shutdown.cancelled() => return StreamEnd::Shutdown,
                next = deliveries.next() => next,
            };

            match next {
                Some(Ok(delivery)) => {
                    self.handle_delivery(delivery).await;
                }
                Some(Err(e)) => {
                    warn!("Delivery error on queue '{}': {}", self.config.queue, e);
                    counter!("consumer_delivery_errors_total").increment(1);
                }
                None => return StreamEnd::Disconnected,
            }
        }
    }

    /// Run one delivery through the pipeline and settle it.
    pub async fn handle_delivery(&self, delivery: Delivery) -> Disposition {
        self.set_state(ConsumerState::Processing);
        counter!("consumer_messages_received_total").increment(1);

        let disposition = match decode(&delivery) {
            Err(e) => {
                warn!("Dropping message from queue '{}': {}", self.config.queue, e);
                Disposition::Malformed
            }
            Ok(raw) => {
                debug!("Received {} from queue '{}': {}", raw.shape(), self.config.queue, raw);
                match self.pipeline.ingest(raw, &self.config.kind).await {
                    Ok(outcome) => {
                        debug!(
                            "Stored {} record(s), {} deliveries",
                            outcome.inserted_ids.len(),
                            outcome.published_count
                        );
                        Disposition::Stored
                    }
                    Err(e) if e.is_rejected() => {
                        warn!("Dropping message from queue '{}': {}", self.config.queue, e);
                        Disposition::Rejected
                    }
                    Err(e) => {
                        error!("Failed to process message from queue '{}': {}", self.config.queue, e);
                        Disposition::Failed
                    }
                }
            }
        };

        let settled = match disposition {
            Disposition::Failed => delivery.nack().await,
            _ => delivery.ack().await,
        };
        if let Err(e) = settled {
            warn!("Failed to settle message on queue '{}': {}", self.config.queue, e);
        }

        counter!("consumer_messages_total", "disposition" => disposition.as_str()).increment(1);
        disposition
    }
}

/// JSON when the message declares it, otherwise the payload as text.
pub fn decode(delivery: &Delivery) -> Result<RawReading> {
    let text = std::str::from_utf8(&delivery.content)
        .map_err(|e| Error::Malformed(format!("payload is not UTF-8: {}", e)))?;

    if delivery.properties.is_json() {
        let value: serde_json::Value = serde_json::from_str(text)
            .map_err(|e| Error::Malformed(format!("invalid JSON payload: {}", e)))?;
        Ok(RawReading::from(value))
    } else {
        Ok(RawReading::from(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{Acknowledger, MessageProperties};
    use crate::pipeline::tests::{broken_pipeline, drain, listen, pipeline, TABLE};
    use async_trait::async_trait;
    use futures::stream;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use storage::Store;
    use tokio::time::Instant;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Settled {
        Acked,
        Nacked,
    }

    #[derive(Clone, Default)]
    struct SettleLog(Arc<Mutex<Vec<Settled>>>);

    impl SettleLog {
        fn entries(&self) -> Vec<Settled> {
            self.0.lock().unwrap().clone()
        }
    }

    struct RecordingAcker(SettleLog);

    #[async_trait]
    impl Acknowledger for RecordingAcker {
        async fn ack(&self) -> Result<()> {
            self.0 .0.lock().unwrap().push(Settled::Acked);
            Ok(())
        }

        async fn nack(&self) -> Result<()> {
            self.0 .0.lock().unwrap().push(Settled::Nacked);
            Ok(())
        }
    }

    fn delivery(content: &str, content_type: Option<&str>, log: &SettleLog) -> Delivery {
        let properties = match content_type {
            Some(ct) => MessageProperties::with_content_type(ct),
            None => MessageProperties::default(),
        };
        Delivery::new(
            content.as_bytes().to_vec(),
            properties,
            Box::new(RecordingAcker(log.clone())),
        )
    }

    /// Scripted broker: each subscribe call pops the next script entry.
    /// `None` fails the attempt; `Some(items)` yields the items and then
    /// either stays open or ends, per `end_streams`.
    #[derive(Default)]
    struct ScriptedBroker {
        script: Mutex<VecDeque<Option<Vec<Delivery>>>>,
        attempts: Arc<AtomicUsize>,
        end_streams: bool,
    }

    impl ScriptedBroker {
        fn new(script: Vec<Option<Vec<Delivery>>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl Broker for ScriptedBroker {
        async fn subscribe(&self, queue: &str) -> Result<Deliveries> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let next = self.script.lock().unwrap().pop_front().flatten();
            match next {
                None => Err(Error::Broker(anyhow::anyhow!("queue '{}' unavailable", queue))),
                Some(items) => {
                    let items = stream::iter(items.into_iter().map(Ok));
                    if self.end_streams {
                        Ok(items.boxed())
                    } else {
                        Ok(items.chain(stream::pending()).boxed())
                    }
                }
            }
        }
    }

    async fn consumer() -> (SensorConsumer<ScriptedBroker>, Arc<Pipeline>) {
        let (pipeline, _store) = pipeline().await;
        let pipeline = Arc::new(pipeline);
        let consumer = SensorConsumer::new(
            ScriptedBroker::default(),
            pipeline.clone(),
            ConsumerConfig::for_queue("sensor_data"),
        );
        (consumer, pipeline)
    }

    #[tokio::test]
    async fn test_invalid_json_is_acked_and_dropped() {
        let (consumer, pipeline) = consumer().await;
        let mut rx = listen(&pipeline);
        let log = SettleLog::default();

        let disposition = consumer
            .handle_delivery(delivery("not-json{", Some("application/json"), &log))
            .await;

        assert_eq!(disposition, Disposition::Malformed);
        assert_eq!(log.entries(), vec![Settled::Acked]);
        assert!(pipeline.recent(10).await.unwrap().is_empty());
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_out_of_range_is_acked_and_dropped() {
        let (consumer, pipeline) = consumer().await;
        let mut rx = listen(&pipeline);
        let log = SettleLog::default();

        let disposition = consumer.handle_delivery(delivery("150", None, &log)).await;

        assert_eq!(disposition, Disposition::Rejected);
        assert_eq!(log.entries(), vec![Settled::Acked]);
        assert!(pipeline.recent(10).await.unwrap().is_empty());
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_boundaries_are_stored_and_published() {
        let (consumer, pipeline) = consumer().await;
        let mut rx = listen(&pipeline);
        let log = SettleLog::default();

        for value in ["0", "100"] {
            let disposition = consumer.handle_delivery(delivery(value, None, &log)).await;
            assert_eq!(disposition, Disposition::Stored);
        }

        assert_eq!(log.entries(), vec![Settled::Acked, Settled::Acked]);
        let stored: Vec<f64> = pipeline
            .recent(10)
            .await
            .unwrap()
            .iter()
            .map(|r| r.temperature)
            .collect();
        assert_eq!(stored, vec![0.0, 100.0]);

        let published: Vec<f64> = drain(&mut rx)
            .iter()
            .map(|event| event["data"]["temperature"].as_f64().unwrap())
            .collect();
        assert_eq!(published, vec![0.0, 100.0]);
    }

    #[tokio::test]
    async fn test_plain_text_decimal_matches_number_path() {
        let (consumer, pipeline) = consumer().await;
        let mut rx = listen(&pipeline);
        let log = SettleLog::default();

        let disposition = consumer.handle_delivery(delivery("23.7", None, &log)).await;
        assert_eq!(disposition, Disposition::Stored);
        pipeline
            .ingest(RawReading::Number(23.7), &DataKind::Temperature)
            .await
            .unwrap();

        let stored: Vec<f64> = pipeline
            .recent(10)
            .await
            .unwrap()
            .iter()
            .map(|r| r.temperature)
            .collect();
        assert_eq!(stored, vec![23.7, 23.7]);

        let published: Vec<f64> = drain(&mut rx)
            .iter()
            .map(|event| event["data"]["temperature"].as_f64().unwrap())
            .collect();
        assert_eq!(published, vec![23.7, 23.7]);
    }

    #[tokio::test]
    async fn test_plain_text_decimal_above_range_is_dropped() {
        let (consumer, pipeline) = consumer().await;
        let mut rx = listen(&pipeline);
        let log = SettleLog::default();

        let disposition = consumer.handle_delivery(delivery("100.9", None, &log)).await;

        assert_eq!(disposition, Disposition::Rejected);
        assert_eq!(log.entries(), vec![Settled::Acked]);
        assert!(pipeline.recent(10).await.unwrap().is_empty());
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_batch_above_bind_limit_is_acked() {
        let (consumer, pipeline) = consumer().await;
        let log = SettleLog::default();
        let content = vec!["1"; 20_000].join(",");

        let disposition = consumer.handle_delivery(delivery(&content, None, &log)).await;

        assert_eq!(disposition, Disposition::Stored);
        assert_eq!(log.entries(), vec![Settled::Acked]);
        assert_eq!(pipeline.recent(30_000).await.unwrap().len(), 20_000);
    }

    #[tokio::test]
    async fn test_json_object_message() {
        let (consumer, pipeline) = consumer().await;
        let log = SettleLog::default();

        let disposition = consumer
            .handle_delivery(delivery(r#"{"temperature": 55}"#, Some("application/json"), &log))
            .await;

        assert_eq!(disposition, Disposition::Stored);
        assert_eq!(pipeline.recent(1).await.unwrap()[0].temperature, 55.0);
    }

    #[tokio::test]
    async fn test_storage_failure_is_nacked() {
        let pipeline = Arc::new(broken_pipeline());
        let consumer = SensorConsumer::new(
            ScriptedBroker::default(),
            pipeline,
            ConsumerConfig::for_queue("sensor_data"),
        );
        let log = SettleLog::default();

        let disposition = consumer.handle_delivery(delivery("42", None, &log)).await;

        assert_eq!(disposition, Disposition::Failed);
        assert_eq!(log.entries(), vec![Settled::Nacked]);
    }

    #[tokio::test]
    async fn test_non_utf8_payload_is_malformed() {
        let (consumer, _pipeline) = consumer().await;
        let log = SettleLog::default();
        let delivery = Delivery::new(
            vec![0xff, 0xfe],
            MessageProperties::default(),
            Box::new(RecordingAcker(log.clone())),
        );

        assert_eq!(consumer.handle_delivery(delivery).await, Disposition::Malformed);
        assert_eq!(log.entries(), vec![Settled::Acked]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribe_failures_retry_on_fixed_delay() {
        let (pipeline, _store) = pipeline().await;
        let log = SettleLog::default();
        let broker = ScriptedBroker::new(vec![
            None,
            None,
            Some(vec![delivery("42", None, &log)]),
        ]);
        let attempts = broker.attempts.clone();
        let consumer = SensorConsumer::new(
            broker,
            Arc::new(pipeline),
            ConsumerConfig::for_queue("sensor_data"),
        );
        let mut state = consumer.state();
        let shutdown = CancellationToken::new();

        let start = Instant::now();
        let handle = tokio::spawn(consumer.run(shutdown.clone()));

        state
            .wait_for(|s| {
                matches!(
                    s,
                    ConsumerState::Subscribed | ConsumerState::Consuming | ConsumerState::Processing
                )
            })
            .await
            .unwrap();
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert!(start.elapsed() >= RESTART_DELAY * 2);
        assert!(start.elapsed() < RESTART_DELAY * 3);

        // The scripted message is processed without further retries.
        while log.entries().is_empty() {
            tokio::task::yield_now().await;
        }
        assert_eq!(log.entries(), vec![Settled::Acked]);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);

        shutdown.cancel();
        handle.await.unwrap();
        assert_eq!(*state.borrow(), ConsumerState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_end_resubscribes() {
        let (pipeline, store) = pipeline().await;
        let log = SettleLog::default();
        let mut broker = ScriptedBroker::new(vec![
            Some(vec![delivery("10", None, &log)]),
            Some(vec![delivery("20", None, &log)]),
        ]);
        broker.end_streams = true;
        let attempts = broker.attempts.clone();
        let consumer = SensorConsumer::new(
            broker,
            Arc::new(pipeline),
            ConsumerConfig::for_queue("sensor_data"),
        );
        let shutdown = CancellationToken::new();

        let start = Instant::now();
        let handle = tokio::spawn(consumer.run(shutdown.clone()));

        // Third attempt finds an empty script and fails.
        while attempts.load(Ordering::SeqCst) < 3 {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert!(start.elapsed() >= RESTART_DELAY * 2);

        shutdown.cancel();
        handle.await.unwrap();

        let stored: Vec<f64> = store
            .select(TABLE, 10)
            .await
            .unwrap()
            .iter()
            .map(|r| r.temperature)
            .collect();
        assert_eq!(stored, vec![20.0, 10.0]);
        assert_eq!(log.entries(), vec![Settled::Acked, Settled::Acked]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_interrupts_restart_delay() {
        let (consumer, _pipeline) = consumer().await;
        let attempts = consumer.broker.attempts.clone();
        let state = consumer.state();
        let shutdown = CancellationToken::new();

        let handle = tokio::spawn(consumer.run(shutdown.clone()));
        while attempts.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        assert_eq!(*state.borrow(), ConsumerState::Disconnected);

        let start = Instant::now();
        shutdown.cancel();
        handle.await.unwrap();
        assert!(start.elapsed() < RESTART_DELAY);
    }
}
