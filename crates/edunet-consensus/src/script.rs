//! The script predicate seam.
//!
//! The consensus core treats the script virtual machine as a pure boolean
//! predicate over (transaction, input index, previous output). Realizations
//! plug in behind [`ScriptVerifier`]; the engine never observes any side
//! effect.

use edunet_chain::{Transaction, TxOutput};

/// Evaluates an input's unlocking script against the locking script of the
/// output it spends.
pub trait ScriptVerifier: Send + Sync {
    /// True when input `input_index` of `tx` satisfies `prev_output`'s
    /// locking conditions.
    fn verify_input(&self, tx: &Transaction, input_index: usize, prev_output: &TxOutput) -> bool;
}

/// Accepts every input. Used by tests and anywhere script evaluation is
/// provided out of band.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysValid;

impl ScriptVerifier for AlwaysValid {
    fn verify_input(&self, _tx: &Transaction, _input_index: usize, _prev_output: &TxOutput) -> bool {
        true
    }
}

/// Rejects every input. Used by tests to exercise rejection paths.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysInvalid;

impl ScriptVerifier for AlwaysInvalid {
    fn verify_input(&self, _tx: &Transaction, _input_index: usize, _prev_output: &TxOutput) -> bool {
        false
    }
}
