//! NATS client wrapper used by the sensor ingest service.
//!
//! Queues are JetStream work-queue streams with one durable pull consumer
//! each. Messages stay pending until explicitly acknowledged.

pub mod client;

pub use client::{content_type, NatsClient, QueueConfig, CONTENT_TYPE_HEADER};
