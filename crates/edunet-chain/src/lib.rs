//! # edunet-chain
//!
//! Canonical data model for the EduNet hybrid PoW/PoS chain.
//!
//! This crate provides:
//! - Wire serialization (little-endian integers, varint-prefixed byte strings)
//! - Transactions with memoized txid/wtxid over legacy and witness forms
//! - The 80-byte block header and full blocks with cached hashes
//! - Merkle roots and inclusion proofs
//! - Compact-target (nBits) arithmetic, difficulty and chain work
//! - Protocol constants, block subsidy and genesis construction

pub mod block;
pub mod compact;
pub mod constants;
pub mod encode;
mod error;
pub mod merkle;
pub mod transaction;

pub use block::{Block, BlockHeader, PosSeal};
pub use compact::{
    compact_to_target, compact_to_target_bytes, difficulty, is_valid_compact, meets_target,
    target_to_compact, work,
};
pub use constants::block_subsidy;
pub use error::{ChainError, ChainResult};
pub use merkle::{merkle_root, verify_proof, MerkleTree};
pub use transaction::{OutPoint, Transaction, TxInput, TxOutput, TxWitness};

pub use edunet_crypto::{Hash160, Hash256};
