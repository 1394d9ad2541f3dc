//! Sensor ingestion service.
//!
//! This service:
//! - Consumes raw readings from a NATS JetStream work queue
//! - Accepts readings over HTTP (`POST /api/sensors`)
//! - Validates, normalizes and stores them in SQLite
//! - Streams every stored record to WebSocket subscribers
//!
//! ## Architecture
//!
//! ```text
//! NATS queue          POST /api/sensors
//!     ↓                      ↓
//! SensorConsumer ----→ Pipeline ←---- GET /api/sensors
//!                         ↓
//!               Store (SQLite) → Broadcaster (DashMap)
//!                                      ↓
//!                               WebSocket clients (/ws)
//! ```
//!
//! One [`Pipeline`] is built at startup and shared by the consumer and the
//! HTTP surface.

pub mod api;
pub mod broadcaster;
pub mod broker;
pub mod config;
pub mod consumer;
pub mod error;
pub mod pipeline;
pub mod ws_server;

pub use api::{create_router, ApiError, AppState};
pub use broadcaster::{Broadcaster, Subscriber, SubscriberId};
pub use broker::{Broker, Deliveries, Delivery, MessageProperties, NatsBroker};
pub use config::Config;
pub use consumer::{ConsumerConfig, ConsumerState, Disposition, SensorConsumer, RESTART_DELAY};
pub use error::{Error, Result};
pub use pipeline::{IngestOutcome, Pipeline, SENSOR_EVENT};
