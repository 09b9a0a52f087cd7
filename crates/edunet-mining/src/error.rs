//! Mining error types.

use thiserror::Error;

/// Errors from the proof-of-work miner.
#[derive(Error, Debug)]
pub enum MiningError {
    /// The header's compact target does not expand to a valid 256-bit
    /// threshold.
    #[error("Invalid compact target: {0:#010x}")]
    InvalidTarget(u32),

    /// A worker thread terminated abnormally.
    #[error("Worker failed: {0}")]
    WorkerFailed(String),
}

/// Result type for mining operations.
pub type MiningResult<T> = Result<T, MiningError>;
