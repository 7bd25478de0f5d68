//! Store error types

use thiserror::Error;

/// Errors raised by the record store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{collection} record {id} not found")]
    NotFound { collection: &'static str, id: i64 },

    #[error("{collection} record {id} already exists")]
    AlreadyExists { collection: &'static str, id: i64 },

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;
