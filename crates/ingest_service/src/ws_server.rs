//! WebSocket subscriber connections.
//!
//! Each connection registers a [`Subscriber`] on upgrade and unregisters it
//! when the socket closes. Inbound frames other than ping/close are ignored.

use crate::api::AppState;
use crate::broadcaster::{Broadcaster, Subscriber, SUBSCRIBER_CHANNEL_BUFFER_SIZE};
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use metrics::counter;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::interval;
use tracing::{debug, info, warn};

const PING_INTERVAL: Duration = Duration::from_secs(30);

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let broadcaster = state.pipeline.broadcaster().clone();
    ws.on_upgrade(move |socket| handle_socket(socket, broadcaster))
}

async fn handle_socket(socket: WebSocket, broadcaster: Arc<Broadcaster>) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Message>(SUBSCRIBER_CHANNEL_BUFFER_SIZE);

    let subscriber = Arc::new(Subscriber::new(tx));
    let subscriber_id = broadcaster.register(subscriber.clone());
    counter!("broadcaster_connections_total").increment(1);

    // Forward queued messages to the socket.
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if ws_tx.send(msg).await.is_err() {
                break;
            }
        }
    });

    let mut ping_interval = interval(PING_INTERVAL);
    ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;

            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(Message::Ping(data))) => {
                        subscriber.try_send(Message::Pong(data));
                    }
                    Some(Ok(_)) => {
                        debug!("Ignoring inbound frame from {}", subscriber_id);
                    }
                    Some(Err(e)) => {
                        warn!("WebSocket error for {}: {:?}", subscriber_id, e);
                        break;
                    }
                }
            }

            _ = ping_interval.tick() => {
                if subscriber.is_closed() {
                    break;
                }
                subscriber.try_send(Message::Ping(Default::default()));
            }
        }
    }

    broadcaster.unregister(&subscriber_id);
    send_task.abort();
    counter!("broadcaster_disconnections_total").increment(1);

    info!("Subscriber {} disconnected", subscriber_id);
}
