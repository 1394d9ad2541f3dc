//! Normalizer for raw sensor readings.
//!
//! Turns untyped input from the broker or the HTTP ingress into canonical
//! records. Both stages are pure and synchronous.
//!
//! # Architecture
//!
//! ```text
//! RawReading --> validator::accepts --> transformer::transform --> Transformed
//!                (reject = drop)        (Single | Batch)
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use normalizer::{validator, transformer, DataKind, RawReading};
//!
//! let raw = RawReading::from("10,20,30");
//! if validator::accepts(&raw, &DataKind::Temperature) {
//!     let batch = transformer::transform(&raw, &DataKind::Temperature);
//! }
//! ```

pub mod parse;
pub mod schema;
pub mod transformer;
pub mod validator;

pub use parse::{format_timestamp, parse_decimal, parse_int_prefix, parse_timestamp};
pub use schema::{
    temperature_in_range, DataKind, NewReading, RawReading, ReadingBatch, SensorRecord,
    Transformed, BATCH_INTERVAL_SECS, MAX_TEMPERATURE, MIN_TEMPERATURE,
};
