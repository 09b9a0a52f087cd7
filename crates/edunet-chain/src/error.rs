//! Error types for the chain data model.

use thiserror::Error;

/// Errors from serialization and structural checks on chain types.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    /// Input ended before the expected field.
    #[error("Truncated data: needed {needed} bytes at offset {offset}")]
    Truncated { offset: usize, needed: usize },

    /// Bytes do not parse as the expected structure.
    #[error("Malformed serialization: {0}")]
    Malformed(String),

    /// Parse succeeded but bytes remained.
    #[error("Trailing bytes after deserialization: {0} left over")]
    TrailingBytes(usize),

    /// A size limit was exceeded.
    #[error("Oversized: {size} bytes exceeds limit {max}")]
    Oversized { size: usize, max: usize },

    /// A declared length would exceed the input or a protocol limit.
    #[error("Length out of range: {0}")]
    LengthOutOfRange(u64),
}

/// Result type for chain operations.
pub type ChainResult<T> = Result<T, ChainError>;
