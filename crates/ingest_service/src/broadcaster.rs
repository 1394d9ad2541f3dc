//! Live subscriber registry and event fan-out.
//!
//! Uses lock-free DashMap so WebSocket connect/disconnect never blocks a
//! publish in progress.

use axum::extract::ws::{Message, Utf8Bytes};
use chrono::Utc;
use dashmap::DashMap;
use metrics::{counter, gauge};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Unique subscriber identifier.
pub type SubscriberId = Uuid;

/// Buffer size for subscriber message channels.
pub const SUBSCRIBER_CHANNEL_BUFFER_SIZE: usize = 256;

/// A single live connection.
pub struct Subscriber {
    pub id: SubscriberId,
    /// Bounded so a slow client cannot grow memory without limit.
    tx: mpsc::Sender<Message>,
    /// Connect time, unix millis.
    pub connected_at: i64,
}

impl Subscriber {
    pub fn new(tx: mpsc::Sender<Message>) -> Self {
        Self {
            id: Uuid::new_v4(),
            tx,
            connected_at: Utc::now().timestamp_millis(),
        }
    }

    /// Queue a message without waiting.
    /// Returns false if the buffer is full or the connection is gone.
    pub fn try_send(&self, msg: Message) -> bool {
        self.tx.try_send(msg).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[derive(Serialize)]
struct Envelope<'a, T: Serialize> {
    event: &'a str,
    data: &'a T,
}

/// Registry of live subscribers, shared by the WebSocket surface and the
/// ingest pipeline.
#[derive(Default)]
pub struct Broadcaster {
    subscribers: DashMap<SubscriberId, Arc<Subscriber>>,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, subscriber: Arc<Subscriber>) -> SubscriberId {
        let id = subscriber.id;
        self.subscribers.insert(id, subscriber);
        gauge!("broadcaster_subscribers").set(self.subscribers.len() as f64);
        info!("Subscriber {} registered", id);
        id
    }

    /// Returns false if `id` was not registered.
    pub fn unregister(&self, id: &SubscriberId) -> bool {
        let removed = self.subscribers.remove(id).is_some();
        if removed {
            gauge!("broadcaster_subscribers").set(self.subscribers.len() as f64);
            info!("Subscriber {} unregistered", id);
        }
        removed
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Send `{"event": event, "data": payload}` to every current subscriber.
    ///
    /// The payload is serialized once. Delivery is best-effort: a subscriber
    /// whose buffer is full or whose connection is closing is skipped.
    /// Returns the number of subscribers the event was queued for.
    pub fn publish<T: Serialize>(&self, event: &str, payload: &T) -> usize {
        let json = match serde_json::to_string(&Envelope {
            event,
            data: payload,
        }) {
            Ok(json) => json,
            Err(e) => {
                warn!("Failed to serialize '{}' event: {}", event, e);
                return 0;
            }
        };
        let text = Utf8Bytes::from(json);

        // Snapshot membership so register/unregister cannot disturb iteration.
        let targets: Vec<Arc<Subscriber>> =
            self.subscribers.iter().map(|entry| entry.value().clone()).collect();

        let mut delivered = 0;
        for subscriber in &targets {
            if subscriber.try_send(Message::Text(text.clone())) {
                delivered += 1;
            } else {
                debug!("Skipped subscriber {} for '{}' event", subscriber.id, event);
                counter!("broadcaster_dropped_total").increment(1);
            }
        }

        counter!("broadcaster_events_total", "event" => event.to_string()).increment(1);
        counter!("broadcaster_deliveries_total").increment(delivered as u64);
        debug!(
            "Published '{}' to {}/{} subscribers",
            event,
            delivered,
            targets.len()
        );
        delivered
    }
}
