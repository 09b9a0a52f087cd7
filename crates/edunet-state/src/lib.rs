//! # edunet-state
//!
//! State management for the EduNet consensus core.
//!
//! This crate provides:
//! - The in-memory UTXO set with atomic transaction apply/rollback
//! - First-class undo records for rollback and chain reorganization
//! - A typed chain store over the key-value storage layer (blocks by hash
//!   and height, transactions, persisted UTXOs, undo data, tip metadata)
//!
//! Thread safety: the consensus engine guards the UTXO set and its own
//! state with a single readers-writers lock, so the types here are plain
//! data and take `&mut self` for mutation.

mod chain_store;
mod error;
mod utxo;

pub use chain_store::ChainStore;
pub use error::{StateError, StateResult};
pub use utxo::{BlockUndo, TxUndo, UtxoEntry, UtxoSet};
