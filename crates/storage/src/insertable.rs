//! Insert payloads and statement shaping.
//!
//! An [`Insertable`] is either one row of N columns or N rows of the same
//! columns. [`InsertStatement::build`] turns either into a single
//! parameterized `INSERT`, keeping column order exactly as given and
//! binding batch parameters row by row, earliest element first.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use normalizer::{NewReading, ReadingBatch};

/// Column holding the reading temperature.
pub const TEMPERATURE_COLUMN: &str = "temperature";

/// Column holding the reading timestamp.
pub const CREATED_AT_COLUMN: &str = "created_at";

/// A single bindable SQL value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Timestamp(DateTime<Utc>),
}

impl Value {
    /// Numeric text is bound as a number. Everything else is unchanged.
    fn numeric(self) -> Value {
        match self {
            Value::Text(text) => {
                let trimmed = text.trim();
                if let Ok(v) = trimmed.parse::<i64>() {
                    Value::Integer(v)
                } else if let Ok(v) = trimmed.parse::<f64>() {
                    Value::Real(v)
                } else {
                    Value::Text(text)
                }
            }
            other => other,
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Real(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::Timestamp(v)
    }
}

/// What to insert: one row, or a column-wise batch of rows.
#[derive(Debug, Clone, PartialEq)]
pub enum Insertable {
    /// Ordered `(column, value)` pairs for one row.
    Row(Vec<(String, Value)>),
    /// Ordered `(column, values)` pairs; every column holds one value per row.
    Batch(Vec<(String, Vec<Value>)>),
}

impl Insertable {
    /// Build a single-row insertable from ordered pairs.
    pub fn row<I, K>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        Insertable::Row(fields.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Build a batch insertable from ordered columns.
    pub fn batch<I, K>(columns: I) -> Self
    where
        I: IntoIterator<Item = (K, Vec<Value>)>,
        K: Into<String>,
    {
        Insertable::Batch(columns.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Number of rows this insertable will write.
    pub fn row_count(&self) -> usize {
        match self {
            Insertable::Row(fields) if fields.is_empty() => 0,
            Insertable::Row(_) => 1,
            Insertable::Batch(columns) => columns.first().map_or(0, |(_, values)| values.len()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.row_count() == 0
    }

    pub fn shape(&self) -> &'static str {
        match self {
            Insertable::Row(_) => "row",
            Insertable::Batch(_) => "batch",
        }
    }
}

impl From<NewReading> for Insertable {
    fn from(reading: NewReading) -> Self {
        Insertable::row([
            (TEMPERATURE_COLUMN, Value::Real(reading.temperature)),
            (CREATED_AT_COLUMN, Value::Timestamp(reading.created_at)),
        ])
    }
}

impl From<ReadingBatch> for Insertable {
    fn from(batch: ReadingBatch) -> Self {
        Insertable::batch([
            (
                TEMPERATURE_COLUMN,
                batch.temperature.into_iter().map(Value::Real).collect(),
            ),
            (
                CREATED_AT_COLUMN,
                batch.created_at.into_iter().map(Value::Timestamp).collect(),
            ),
        ])
    }
}

/// A parameterized insert ready to execute.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertStatement {
    pub sql: String,
    pub params: Vec<Value>,
    pub rows: usize,
}

impl InsertStatement {
    /// Shape a single statement for `insertable`. Returns `None` when there
    /// is nothing to insert.
    pub fn build(table: &str, insertable: Insertable) -> Result<Option<Self>> {
        Ok(Self::build_chunked(table, insertable, usize::MAX)?.pop())
    }

    /// Shape `insertable` into statements binding at most `max_params`
    /// values each, keeping row order across statements. A row is never
    /// split, so each statement holds at least one row.
    pub fn build_chunked(
        table: &str,
        insertable: Insertable,
        max_params: usize,
    ) -> Result<Vec<Self>> {
        ensure_identifier(table)?;
        if insertable.is_empty() {
            return Ok(Vec::new());
        }

        let (columns, rows): (Vec<String>, Vec<Vec<Value>>) = match insertable {
            Insertable::Row(fields) => {
                let (columns, values): (Vec<String>, Vec<Value>) = fields.into_iter().unzip();
                (columns, vec![values])
            }
            Insertable::Batch(columns) => {
                let expected = columns[0].1.len();
                for (column, values) in &columns {
                    if values.len() != expected {
                        return Err(Error::ColumnLengthMismatch {
                            column: column.clone(),
                            expected,
                            found: values.len(),
                        });
                    }
                }
                let (names, values): (Vec<String>, Vec<Vec<Value>>) = columns.into_iter().unzip();
                (names, transpose(values, expected))
            }
        };

        for column in &columns {
            ensure_identifier(column)?;
        }

        let column_list = columns.join(", ");
        let row_marks = placeholders(columns.len());
        let rows_per_statement = (max_params / columns.len()).max(1);

        let mut statements = Vec::with_capacity(rows.len().div_ceil(rows_per_statement));
        let mut rows = rows.into_iter().peekable();
        while rows.peek().is_some() {
            let chunk: Vec<Vec<Value>> = rows.by_ref().take(rows_per_statement).collect();
            let sql = format!(
                "INSERT INTO {} ({}) VALUES {}",
                table,
                column_list,
                vec![row_marks.as_str(); chunk.len()].join(", ")
            );
            statements.push(Self {
                sql,
                rows: chunk.len(),
                params: chunk.into_iter().flatten().collect(),
            });
        }

        Ok(statements)
    }
}

/// Turn column-major batch input into row-major, binding numeric text as
/// numbers.
fn transpose(columns: Vec<Vec<Value>>, rows: usize) -> Vec<Vec<Value>> {
    let mut iters: Vec<_> = columns.into_iter().map(Vec::into_iter).collect();
    (0..rows)
        .map(|_| {
            iters
                .iter_mut()
                .filter_map(|iter| iter.next().map(Value::numeric))
                .collect()
        })
        .collect()
}

fn placeholders(n: usize) -> String {
    format!("({})", vec!["?"; n].join(", "))
}

/// Table and column names are interpolated into SQL, so only plain
/// identifiers are allowed.
pub fn ensure_identifier(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');

    if valid {
        Ok(())
    } else {
        Err(Error::InvalidIdentifier(name.to_string()))
    }
}
