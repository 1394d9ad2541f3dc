//! SQLite-backed record store.
//!
//! One connection guarded by a mutex, driven from the blocking pool so
//! async callers never stall the runtime. Concurrent callers are
//! serialized by the mutex; the pipeline adds no locking of its own.

use crate::error::{Error, Result};
use crate::insertable::{ensure_identifier, InsertStatement, Insertable, Value};
use crate::Store;
use async_trait::async_trait;
use metrics::counter;
use normalizer::{format_timestamp, parse_timestamp, SensorRecord};
use parking_lot::Mutex;
use rusqlite::types::{ToSql, ToSqlOutput, Value as SqlValue, ValueRef};
use rusqlite::Connection;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// How long a statement waits on a locked database file.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite's default limit on bound parameters per statement.
const MAX_BIND_PARAMS: usize = 32_766;

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Owned(SqlValue::Null),
            Value::Integer(v) => ToSqlOutput::Owned(SqlValue::Integer(*v)),
            Value::Real(v) => ToSqlOutput::Owned(SqlValue::Real(*v)),
            Value::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Value::Timestamp(ts) => ToSqlOutput::Owned(SqlValue::Text(format_timestamp(ts))),
        })
    }
}

/// Record store over a single SQLite database.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) the database file at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        info!("Opened SQLite store at {:?}", path);
        Ok(Self::from_connection(conn))
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::from_connection(Connection::open_in_memory()?))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock();
            f(&mut guard)
        })
        .await?
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn initialize(&self, table: &str) -> Result<()> {
        ensure_identifier(table)?;
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                temperature REAL NOT NULL,
                created_at TEXT DEFAULT CURRENT_TIMESTAMP
            )",
            table
        );

        self.with_conn(move |conn| {
            conn.execute_batch(&sql)?;
            Ok(())
        })
        .await?;

        info!("Table '{}' ready", table);
        Ok(())
    }

    async fn insert(&self, table: &str, insertable: Insertable) -> Result<i64> {
        let shape = insertable.shape();
        let statements = InsertStatement::build_chunked(table, insertable, MAX_BIND_PARAMS)?;
        if statements.is_empty() {
            debug!("Nothing to insert into '{}'", table);
            return Ok(0);
        }

        let rows: usize = statements.iter().map(|stmt| stmt.rows).sum();
        // Chunks of one batch commit together or not at all.
        let id = self
            .with_conn(move |conn| {
                let tx = conn.transaction()?;
                for stmt in &statements {
                    tx.execute(&stmt.sql, rusqlite::params_from_iter(stmt.params.iter()))?;
                }
                let id = tx.last_insert_rowid();
                tx.commit()?;
                Ok(id)
            })
            .await?;

        counter!("store_inserts_total", "shape" => shape).increment(1);
        counter!("store_rows_inserted_total").increment(rows as u64);
        debug!("Inserted {} row(s) into '{}', last id {}", rows, table, id);

        Ok(id)
    }

    async fn select(&self, table: &str, limit: usize) -> Result<Vec<SensorRecord>> {
        ensure_identifier(table)?;
        let sql = format!(
            "SELECT id, temperature, created_at FROM {} ORDER BY id DESC LIMIT ?",
            table
        );
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        let rows = self
            .with_conn(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map([limit], |row| {
                        Ok((
                            row.get::<_, i64>(0)?,
                            row.get::<_, f64>(1)?,
                            row.get::<_, Option<String>>(2)?,
                        ))
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await?;

        counter!("store_selects_total").increment(1);

        rows.into_iter()
            .map(|(id, temperature, created_at)| -> Result<SensorRecord> {
                let raw = created_at.unwrap_or_default();
                let created_at = parse_timestamp(&raw)
                    .ok_or(Error::InvalidTimestamp { id, value: raw })?;
                Ok(SensorRecord {
                    id,
                    temperature,
                    created_at,
                })
            })
            .collect()
    }
}
