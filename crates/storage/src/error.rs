//! Error types for the record store.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// The underlying engine failed. Callers may retry.
    #[error("Storage unavailable: {0}")]
    Unavailable(#[from] rusqlite::Error),

    /// Table or column name is not a plain identifier.
    #[error("Invalid identifier: {0:?}")]
    InvalidIdentifier(String),

    /// Batch columns must all hold the same number of values.
    #[error("Column '{column}' has {found} values, expected {expected}")]
    ColumnLengthMismatch {
        column: String,
        expected: usize,
        found: usize,
    },

    /// A stored row carries a timestamp that cannot be read back.
    #[error("Invalid timestamp {value:?} in row {id}")]
    InvalidTimestamp { id: i64, value: String },

    /// The blocking task running the statement panicked or was cancelled.
    #[error("Storage task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl Error {
    /// Transport-level failures that may succeed on a later attempt.
    ///
    /// Engine errors caused by the statement or its values fail the same way
    /// on every attempt and are not retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Unavailable(err) => !is_input_error(err),
            Error::Join(_) => true,
            _ => false,
        }
    }
}

fn is_input_error(err: &rusqlite::Error) -> bool {
    use rusqlite::{Error as SqlError, ErrorCode};

    match err {
        SqlError::SqliteFailure(failure, _) => matches!(
            failure.code,
            ErrorCode::ConstraintViolation | ErrorCode::TooBig | ErrorCode::TypeMismatch
        ),
        SqlError::InvalidParameterCount(..)
        | SqlError::InvalidParameterName(_)
        | SqlError::ToSqlConversionFailure(_)
        | SqlError::InvalidColumnType(..)
        | SqlError::InvalidColumnIndex(_)
        | SqlError::InvalidColumnName(_)
        | SqlError::MultipleStatement => true,
        _ => false,
    }
}

pub type Result<T> = std::result::Result<T, Error>;
