//! Mapping of accepted raw readings to canonical shapes.
//!
//! Timestamps depend on the call time, so a raw reading must be transformed
//! at most once per pass.

use crate::parse::{parse_decimal, parse_int_prefix, parse_timestamp};
use crate::schema::{DataKind, NewReading, RawReading, ReadingBatch, Transformed};
use chrono::{DateTime, SubsecRound, Utc};
use serde_json::{Map, Value};
use tracing::debug;

/// Transform `raw` using the current time, truncated to the millisecond
/// precision records are stored with.
pub fn transform(raw: &RawReading, kind: &DataKind) -> Option<Transformed> {
    transform_at(raw, kind, Utc::now().trunc_subsecs(3))
}

/// Transform `raw` with an explicit ingestion time.
///
/// Returns `None` for kinds this pipeline does not handle and for shapes
/// the transformer cannot interpret; callers treat that as a no-op.
pub fn transform_at(raw: &RawReading, kind: &DataKind, now: DateTime<Utc>) -> Option<Transformed> {
    match kind {
        DataKind::Temperature => transform_temperature(raw, now),
        DataKind::Other(name) => {
            debug!("No transformer for data kind '{}'", name);
            None
        }
    }
}

fn transform_temperature(raw: &RawReading, now: DateTime<Utc>) -> Option<Transformed> {
    match raw {
        RawReading::Text(text) if text.split(',').count() > 1 => {
            let temperatures = text
                .split(',')
                .map(|elem| parse_int_prefix(elem).map(|v| v as f64))
                .collect::<Option<Vec<f64>>>()?;
            Some(Transformed::Batch(ReadingBatch::spaced(temperatures, now)))
        }
        RawReading::Number(value) => Some(Transformed::Single(NewReading {
            temperature: *value,
            created_at: now,
        })),
        RawReading::Text(text) => parse_decimal(text).map(|temperature| {
            Transformed::Single(NewReading {
                temperature,
                created_at: now,
            })
        }),
        RawReading::Object(fields) => Some(Transformed::Single(from_object(fields, now))),
        RawReading::Other(_) => None,
    }
}

/// A supplied `created_at` is truncated to milliseconds like `now`.
/// Missing or unreadable fields fall back to `temperature = 0` and
/// `created_at = now`.
fn from_object(fields: &Map<String, Value>, now: DateTime<Utc>) -> NewReading {
    let temperature = match fields.get("temperature") {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => parse_decimal(s).unwrap_or(0.0),
        _ => 0.0,
    };

    let created_at = fields
        .get("created_at")
        .and_then(Value::as_str)
        .and_then(parse_timestamp)
        .map(|ts| ts.trunc_subsecs(3))
        .unwrap_or(now);

    NewReading {
        temperature,
        created_at,
    }
}
