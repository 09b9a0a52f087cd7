//! Error taxonomy for consensus validation and state transitions.
//!
//! Every consensus operation returns a typed error; nothing is thrown
//! across component boundaries, and a rejected block leaves the engine
//! state byte-identical to its pre-call value.

use edunet_state::StateError;
use thiserror::Error;

/// Consensus validation and engine errors.
#[derive(Error, Debug)]
pub enum ConsensusError {
    /// Wire bytes do not parse.
    #[error("Malformed serialization: {0}")]
    MalformedSerialization(#[from] edunet_chain::ChainError),

    /// Structural rule violated (coinbase placement, sizes, duplicates,
    /// empty inputs/outputs, value ranges).
    #[error("Invalid structure: {0}")]
    StructureInvalid(String),

    /// Header Merkle root does not match the recomputed root.
    #[error("Merkle mismatch: header {header}, computed {computed}")]
    MerkleMismatch { header: String, computed: String },

    /// Header hash exceeds its declared target.
    #[error("Insufficient PoW: hash {hash} above target {n_bits:#010x}")]
    PowInsufficient { hash: String, n_bits: u32 },

    /// Timestamp at or below the median of recent blocks, or too far in
    /// the future.
    #[error("Timestamp out of range: {timestamp} ({detail})")]
    TimestampOutOfRange { timestamp: u32, detail: String },

    /// Header difficulty differs from the expected retarget value.
    #[error("Difficulty mismatch: got {got:#010x}, expected {expected:#010x}")]
    DifficultyMismatch { got: u32, expected: u32 },

    /// A referenced output is not in the UTXO set.
    #[error("UTXO missing: {0}")]
    UtxoMissing(String),

    /// A coinbase output was spent before maturity.
    #[error("Immature coinbase {outpoint}: created at {created}, spent at {spend_height}")]
    UtxoImmatureCoinbase {
        outpoint: String,
        created: u32,
        spend_height: u32,
    },

    /// Transaction outputs exceed its inputs.
    #[error("Overspend: inputs {inputs}, outputs {outputs}")]
    OutputOverspend { inputs: u64, outputs: u64 },

    /// The script predicate rejected an input.
    #[error("Script verification failed for tx {txid} input {input}")]
    ScriptVerifyFailed { txid: String, input: usize },

    /// A PoS block names a validator the engine does not know.
    #[error("Unknown PoS validator: {0}")]
    PosValidatorUnknown(String),

    /// The named validator is not eligible for this slot.
    #[error("Ineligible PoS validator: {0}")]
    PosValidatorIneligible(String),

    /// The validator signature over the header hash does not verify.
    #[error("Invalid PoS signature: {0}")]
    PosSignatureInvalid(String),

    /// Coinbase pays more than subsidy plus fees.
    #[error("Reward exceeded: claimed {claimed}, allowed {allowed}")]
    RewardExceeded { claimed: u64, allowed: u64 },

    /// Stake below the configured minimum.
    #[error("Stake below minimum: got {got}, minimum {minimum}")]
    StakeBelowMinimum { got: u64, minimum: u64 },

    /// A validator with this id is already registered.
    #[error("Validator already registered: {0}")]
    ValidatorExists(String),

    /// No validator with this id.
    #[error("Unknown validator: {0}")]
    ValidatorUnknown(String),

    /// Stake has not matured yet.
    #[error("Stake locked until height {unlock_height} (currently {current_height})")]
    StakeLocked {
        unlock_height: u32,
        current_height: u32,
    },

    /// A block required for the operation is not stored.
    #[error("Block not found: {0}")]
    BlockNotFound(String),

    /// The block's parent is unknown; it cannot be attached anywhere.
    #[error("Orphan block: unknown parent {0}")]
    OrphanBlock(String),

    /// A chain reorganization could not be completed; the original chain
    /// was preserved.
    #[error("Reorganization failed: {0}")]
    ReorgFailed(String),

    /// Block production by PoW did not complete.
    #[error("Mining failed: {0}")]
    Mining(String),

    /// Stored state and in-memory state disagree.
    #[error("State inconsistent: {0}")]
    StateInconsistent(String),

    /// The storage collaborator failed.
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),
}

impl From<StateError> for ConsensusError {
    fn from(err: StateError) -> Self {
        match err {
            StateError::UtxoMissing(op) => ConsensusError::UtxoMissing(op),
            StateError::UtxoExists(op) => {
                ConsensusError::StructureInvalid(format!("output already exists: {op}"))
            }
            StateError::ImmatureCoinbase {
                outpoint,
                created,
                spend_height,
            } => ConsensusError::UtxoImmatureCoinbase {
                outpoint,
                created,
                spend_height,
            },
            StateError::Overspend { inputs, outputs } => {
                ConsensusError::OutputOverspend { inputs, outputs }
            }
            StateError::ValueOverflow => {
                ConsensusError::StructureInvalid("value sum overflow".into())
            }
            StateError::DuplicateInput(op) => {
                ConsensusError::StructureInvalid(format!("duplicate input: {op}"))
            }
            StateError::UndoMismatch(msg) => ConsensusError::StateInconsistent(msg),
            StateError::Serialization(msg) => ConsensusError::StateInconsistent(msg),
            StateError::BlockNotFound(hash) => ConsensusError::BlockNotFound(hash),
            StateError::Storage(e) => ConsensusError::StorageUnavailable(e.to_string()),
        }
    }
}

impl From<edunet_storage::StorageError> for ConsensusError {
    fn from(err: edunet_storage::StorageError) -> Self {
        ConsensusError::StorageUnavailable(err.to_string())
    }
}

/// Result type for consensus operations.
pub type ConsensusResult<T> = Result<T, ConsensusError>;
