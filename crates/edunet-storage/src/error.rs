//! Storage error types.

use thiserror::Error;

/// Errors surfaced by storage backends.
#[derive(Error, Debug)]
pub enum StorageError {
    /// The requested record does not exist.
    #[error("Not found")]
    NotFound,

    /// A record with this key already exists.
    #[error("Already exists")]
    AlreadyExists,

    /// Stored bytes fail an integrity check.
    #[error("Corruption: {0}")]
    Corruption(String),

    /// The backend failed to read or write.
    #[error("I/O error: {0}")]
    Io(String),

    /// Stored bytes do not decode as the expected record.
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// A column is missing from the backend.
    #[error("Column not found: {0}")]
    ColumnNotFound(&'static str),
}

impl From<rocksdb::Error> for StorageError {
    fn from(err: rocksdb::Error) -> Self {
        let message = err.into_string();
        if message.contains("Corruption") {
            StorageError::Corruption(message)
        } else {
            StorageError::Io(message)
        }
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
