//! Reading schema definitions.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

/// Lowest accepted temperature (inclusive).
pub const MIN_TEMPERATURE: f64 = 0.0;

/// Highest accepted temperature (inclusive).
pub const MAX_TEMPERATURE: f64 = 100.0;

/// Spacing between synthesized timestamps inside one batch.
pub const BATCH_INTERVAL_SECS: i64 = 5;

/// Returns true if `value` is a finite temperature within [0, 100].
pub fn temperature_in_range(value: f64) -> bool {
    value.is_finite() && (MIN_TEMPERATURE..=MAX_TEMPERATURE).contains(&value)
}

/// Kind of data carried by a raw reading.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DataKind {
    /// Temperature in degrees, range [0, 100].
    Temperature,
    /// Any kind this pipeline does not know how to handle.
    Other(String),
}

impl DataKind {
    pub fn as_str(&self) -> &str {
        match self {
            DataKind::Temperature => "temperature",
            DataKind::Other(name) => name,
        }
    }
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataKind {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("temperature") {
            Ok(DataKind::Temperature)
        } else {
            Ok(DataKind::Other(s.to_string()))
        }
    }
}

/// Untyped input as received from the broker or the HTTP ingress.
///
/// Never persisted verbatim.
#[derive(Debug, Clone, PartialEq)]
pub enum RawReading {
    /// A JSON number.
    Number(f64),
    /// Plain text: a numeric string or a comma-separated list of them.
    Text(String),
    /// A structured object carrying `temperature` / `created_at` fields.
    Object(Map<String, Value>),
    /// Anything else (arrays, booleans, null).
    Other(Value),
}

impl RawReading {
    /// Short label used in logs and metrics.
    pub fn shape(&self) -> &'static str {
        match self {
            RawReading::Number(_) => "number",
            RawReading::Text(_) => "text",
            RawReading::Object(_) => "object",
            RawReading::Other(_) => "other",
        }
    }
}

impl From<Value> for RawReading {
    fn from(value: Value) -> Self {
        match value {
            Value::Number(n) => match n.as_f64() {
                Some(v) => RawReading::Number(v),
                None => RawReading::Other(Value::Number(n)),
            },
            Value::String(s) => RawReading::Text(s),
            Value::Object(map) => RawReading::Object(map),
            other => RawReading::Other(other),
        }
    }
}

impl From<f64> for RawReading {
    fn from(value: f64) -> Self {
        RawReading::Number(value)
    }
}

impl From<&str> for RawReading {
    fn from(value: &str) -> Self {
        RawReading::Text(value.to_string())
    }
}

impl From<String> for RawReading {
    fn from(value: String) -> Self {
        RawReading::Text(value)
    }
}

impl fmt::Display for RawReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawReading::Number(v) => write!(f, "{}", v),
            RawReading::Text(s) => write!(f, "{:?}", s),
            RawReading::Object(map) => write!(f, "{}", Value::Object(map.clone())),
            RawReading::Other(value) => write!(f, "{}", value),
        }
    }
}

/// Canonical, persisted reading. This is also the broadcast wire shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorRecord {
    /// Identifier assigned by the store on insert.
    pub id: i64,
    /// Temperature within [0, 100].
    pub temperature: f64,
    /// Reading timestamp (ISO 8601 on the wire).
    pub created_at: DateTime<Utc>,
}

/// A reading that has been normalized but not yet stored.
#[derive(Debug, Clone, PartialEq)]
pub struct NewReading {
    pub temperature: f64,
    pub created_at: DateTime<Utc>,
}

impl NewReading {
    /// Attach the id assigned by the store.
    pub fn into_record(self, id: i64) -> SensorRecord {
        SensorRecord {
            id,
            temperature: self.temperature,
            created_at: self.created_at,
        }
    }
}

/// Several readings from one ingestion event, held column-wise.
///
/// `temperature` and `created_at` always have the same length and
/// `created_at` is non-decreasing.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ReadingBatch {
    pub temperature: Vec<f64>,
    pub created_at: Vec<DateTime<Utc>>,
}

impl ReadingBatch {
    /// Build a batch from ordered temperatures, spacing timestamps
    /// `BATCH_INTERVAL_SECS` apart starting at `start`.
    pub fn spaced(temperatures: Vec<f64>, start: DateTime<Utc>) -> Self {
        let created_at = (0..temperatures.len())
            .map(|i| start + Duration::seconds(BATCH_INTERVAL_SECS * i as i64))
            .collect();
        Self {
            temperature: temperatures,
            created_at,
        }
    }

    pub fn len(&self) -> usize {
        self.temperature.len()
    }

    pub fn is_empty(&self) -> bool {
        self.temperature.is_empty()
    }

    /// Iterate the batch as individual readings, earliest first.
    pub fn readings(&self) -> impl Iterator<Item = NewReading> + '_ {
        self.temperature
            .iter()
            .zip(self.created_at.iter())
            .map(|(&temperature, &created_at)| NewReading {
                temperature,
                created_at,
            })
    }
}

/// Output of the transformer.
#[derive(Debug, Clone, PartialEq)]
pub enum Transformed {
    Single(NewReading),
    Batch(ReadingBatch),
}

impl Transformed {
    /// Number of records this result will produce.
    pub fn len(&self) -> usize {
        match self {
            Transformed::Single(_) => 1,
            Transformed::Batch(batch) => batch.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True if every temperature satisfies the record invariant.
    pub fn in_range(&self) -> bool {
        match self {
            Transformed::Single(reading) => temperature_in_range(reading.temperature),
            Transformed::Batch(batch) => batch.temperature.iter().all(|&t| temperature_in_range(t)),
        }
    }
}
