//! Durable repository for canonical sensor records.
//!
//! # Architecture
//!
//! ```text
//! Insertable::Row   --> INSERT ... VALUES (?, ?)            --> assigned id
//! Insertable::Batch --> INSERT ... VALUES (?, ?), (?, ?)... --> last assigned id
//! select(table, n)  --> newest n records, most recent first
//! ```
//!
//! The [`Store`] trait is the seam the pipeline depends on; [`SqliteStore`]
//! is the engine-backed implementation.

pub mod error;
pub mod insertable;
pub mod sqlite;

use async_trait::async_trait;
use normalizer::SensorRecord;

pub use error::{Error, Result};
pub use insertable::{InsertStatement, Insertable, Value, CREATED_AT_COLUMN, TEMPERATURE_COLUMN};
pub use sqlite::SqliteStore;

/// Default number of records returned by [`Store::select`].
pub const DEFAULT_SELECT_LIMIT: usize = 50;

/// Record repository shared by every ingestion path.
///
/// Implementations must tolerate concurrent callers.
#[async_trait]
pub trait Store: Send + Sync {
    /// Create the canonical table if it does not exist yet.
    async fn initialize(&self, table: &str) -> Result<()>;

    /// Insert one row or a batch of rows.
    ///
    /// Returns the assigned id for a row, the id of the last inserted row
    /// for a batch, and `0` when there is nothing to insert.
    async fn insert(&self, table: &str, insertable: Insertable) -> Result<i64>;

    /// Return at most `limit` records, most recent first.
    async fn select(&self, table: &str, limit: usize) -> Result<Vec<SensorRecord>>;
}
