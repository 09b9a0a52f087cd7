//! State error types.

use thiserror::Error;

/// Errors from UTXO and chain-state transitions.
#[derive(Error, Debug)]
pub enum StateError {
    /// A referenced output is not in the UTXO set.
    #[error("UTXO missing: {0}")]
    UtxoMissing(String),

    /// An output with this outpoint already exists.
    #[error("UTXO already exists: {0}")]
    UtxoExists(String),

    /// A coinbase output was spent before maturity.
    #[error("Immature coinbase {outpoint}: created at {created}, spent at {spend_height}")]
    ImmatureCoinbase {
        outpoint: String,
        created: u32,
        spend_height: u32,
    },

    /// Output value exceeds input value.
    #[error("Overspend: inputs {inputs}, outputs {outputs}")]
    Overspend { inputs: u64, outputs: u64 },

    /// A value sum overflowed u64.
    #[error("Value overflow")]
    ValueOverflow,

    /// A transaction repeats an input outpoint.
    #[error("Duplicate input: {0}")]
    DuplicateInput(String),

    /// An undo record does not match the transaction being rolled back.
    #[error("Undo mismatch: {0}")]
    UndoMismatch(String),

    /// Stored bytes do not decode.
    #[error("Serialization: {0}")]
    Serialization(String),

    /// A block or record expected in storage is absent.
    #[error("Block not found: {0}")]
    BlockNotFound(String),

    /// Underlying storage failure.
    #[error("Storage: {0}")]
    Storage(#[from] edunet_storage::StorageError),
}

impl From<edunet_chain::ChainError> for StateError {
    fn from(err: edunet_chain::ChainError) -> Self {
        StateError::Serialization(err.to_string())
    }
}

/// Result type for state operations.
pub type StateResult<T> = Result<T, StateError>;
