//! Error types for cryptographic operations.

use thiserror::Error;

/// Cryptographic operation errors.
#[derive(Error, Debug)]
pub enum CryptoError {
    /// Key bytes do not form a valid key.
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Signature bytes do not form a valid signature.
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    /// Input has the wrong length.
    #[error("Invalid length: got {got}, expected {expected}")]
    InvalidLength { got: usize, expected: usize },
}

/// Result type for cryptographic operations.
pub type CryptoResult<T> = Result<T, CryptoError>;
