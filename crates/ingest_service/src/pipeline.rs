//! The ingest sequence shared by the queue consumer and the HTTP ingress.
//!
//! ```text
//! raw --> validate --> transform --> Store::insert --> Broadcaster::publish
//!                                      |                 (oldest first)
//!                                      +-- batch: Store::select(len), reversed
//! ```

use crate::broadcaster::Broadcaster;
use crate::error::{Error, Result};
use metrics::counter;
use normalizer::{transformer, validator, DataKind, RawReading, SensorRecord, Transformed};
use serde::Serialize;
use std::sync::Arc;
use storage::{Insertable, Store};
use tracing::debug;

/// Event name for published sensor records.
pub const SENSOR_EVENT: &str = "sensorData";

/// What one ingest call stored and published.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestOutcome {
    /// Ids of the stored records, earliest first.
    pub inserted_ids: Vec<i64>,
    /// Total subscriber deliveries across all published records.
    pub published_count: usize,
}

impl IngestOutcome {
    pub fn last_id(&self) -> Option<i64> {
        self.inserted_ids.last().copied()
    }
}

pub struct Pipeline {
    store: Arc<dyn Store>,
    broadcaster: Arc<Broadcaster>,
    table: String,
}

impl Pipeline {
    pub fn new(store: Arc<dyn Store>, broadcaster: Arc<Broadcaster>, table: impl Into<String>) -> Self {
        Self {
            store,
            broadcaster,
            table: table.into(),
        }
    }

    pub fn broadcaster(&self) -> &Arc<Broadcaster> {
        &self.broadcaster
    }

    /// Validate, transform, store and publish one raw reading.
    ///
    /// A rejected reading is [`Error::Rejected`] and touches nothing. A kind
    /// the transformer does not handle yields an empty outcome. Storage
    /// failures propagate.
    pub async fn ingest(&self, raw: RawReading, kind: &DataKind) -> Result<IngestOutcome> {
        if !validator::accepts(&raw, kind) {
            return Err(self.rejected(&raw, kind));
        }

        let Some(transformed) = transformer::transform(&raw, kind) else {
            debug!("Nothing to ingest for {} reading of kind '{}'", raw.shape(), kind);
            return Ok(IngestOutcome::default());
        };

        // Object readings are accepted on shape alone, so the range is
        // enforced again on the transformed values.
        if !transformed.in_range() {
            return Err(self.rejected(&raw, kind));
        }

        let records = match transformed {
            Transformed::Single(reading) => {
                let id = self.store.insert(&self.table, reading.clone().into()).await?;
                vec![reading.into_record(id)]
            }
            Transformed::Batch(batch) => {
                let len = batch.len();
                self.store
                    .insert(&self.table, Insertable::from(batch))
                    .await?;
                // Newest first from the store; publish oldest first.
                let mut records = self.store.select(&self.table, len).await?;
                records.reverse();
                records
            }
        };

        let mut outcome = IngestOutcome::default();
        for record in &records {
            outcome.inserted_ids.push(record.id);
            outcome.published_count += self.broadcaster.publish(SENSOR_EVENT, record);
        }

        counter!("ingest_records_total").increment(records.len() as u64);
        debug!(
            "Ingested {} record(s) into '{}', {} deliveries",
            records.len(),
            self.table,
            outcome.published_count
        );
        Ok(outcome)
    }

    /// The latest `limit` records, oldest first.
    pub async fn recent(&self, limit: usize) -> Result<Vec<SensorRecord>> {
        let mut records = self.store.select(&self.table, limit).await?;
        records.reverse();
        Ok(records)
    }

    fn rejected(&self, raw: &RawReading, kind: &DataKind) -> Error {
        counter!("ingest_rejected_total", "kind" => kind.to_string()).increment(1);
        Error::Rejected {
            kind: kind.clone(),
            reading: raw.to_string(),
        }
    }
}
