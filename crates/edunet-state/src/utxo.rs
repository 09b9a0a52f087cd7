//! The UTXO set and its undo records.
//!
//! `apply_transaction` is all-or-nothing: every input is resolved and every
//! sum checked before the first mutation, so a failed apply leaves the set
//! untouched. The returned [`TxUndo`] carries the spent entries in input
//! order; `rollback_transaction` consumes it to restore the exact prior
//! state.

use crate::{StateError, StateResult};
use edunet_chain::constants::COINBASE_MATURITY;
use edunet_chain::encode::{write_var_bytes, ByteReader};
use edunet_chain::{OutPoint, Transaction, TxOutput};
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use tracing::instrument;

/// One unspent output with its creation context.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UtxoEntry {
    /// Location of the output.
    pub outpoint: OutPoint,
    /// The output itself.
    pub output: TxOutput,
    /// Height of the block that created it.
    pub height: u32,
    /// Whether it came from a coinbase transaction.
    pub is_coinbase: bool,
}

impl UtxoEntry {
    /// Build an entry.
    pub fn new(outpoint: OutPoint, output: TxOutput, height: u32, is_coinbase: bool) -> Self {
        Self {
            outpoint,
            output,
            height,
            is_coinbase,
        }
    }

    /// A coinbase output is spendable once `COINBASE_MATURITY` blocks have
    /// passed since its creation.
    pub fn is_mature(&self, spend_height: u32) -> bool {
        !self.is_coinbase || spend_height >= self.height.saturating_add(COINBASE_MATURITY)
    }

    /// Storage key for this entry's outpoint.
    pub fn key(outpoint: &OutPoint) -> Vec<u8> {
        let mut key = Vec::with_capacity(36);
        key.extend_from_slice(outpoint.txid.as_ref());
        key.extend_from_slice(&outpoint.vout.to_be_bytes());
        key
    }

    /// Serialize for storage and undo records.
    pub fn serialize(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(49 + self.output.locking_script.len());
        bytes.extend_from_slice(self.outpoint.txid.as_ref());
        bytes.extend_from_slice(&self.outpoint.vout.to_be_bytes());
        bytes.extend_from_slice(&self.height.to_be_bytes());
        bytes.push(u8::from(self.is_coinbase));
        bytes.extend_from_slice(&self.output.value.to_be_bytes());
        write_var_bytes(&mut bytes, &self.output.locking_script);
        bytes
    }

    /// Parse a stored entry.
    pub fn deserialize(bytes: &[u8]) -> StateResult<Self> {
        let mut reader = ByteReader::new(bytes);
        let entry = Self::read_from(&mut reader)?;
        reader
            .expect_end()
            .map_err(|e| StateError::Serialization(e.to_string()))?;
        Ok(entry)
    }

    fn read_from(reader: &mut ByteReader<'_>) -> StateResult<Self> {
        let txid = reader.read_hash256()?;
        let vout = {
            let bytes = reader.read_bytes(4)?;
            u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
        };
        let height = {
            let bytes = reader.read_bytes(4)?;
            u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
        };
        let is_coinbase = reader.read_u8()? != 0;
        let value = {
            let bytes = reader.read_bytes(8)?;
            let mut arr = [0u8; 8];
            arr.copy_from_slice(bytes);
            u64::from_be_bytes(arr)
        };
        let locking_script = reader.read_var_bytes()?;
        Ok(Self {
            outpoint: OutPoint::new(txid, vout),
            output: TxOutput::new(value, locking_script),
            height,
            is_coinbase,
        })
    }
}

/// Undo record for one applied transaction: the entries it consumed, in
/// input order. Empty for a coinbase.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TxUndo {
    /// Spent entries, aligned with the transaction's inputs.
    pub spent: Vec<UtxoEntry>,
}

impl TxUndo {
    /// Sum of consumed input values.
    pub fn input_value(&self) -> Option<u64> {
        self.spent
            .iter()
            .try_fold(0u64, |acc, entry| acc.checked_add(entry.output.value))
    }
}

/// Undo record for a whole block, aligned with its transaction order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BlockUndo {
    /// Height of the block this record reverses.
    pub height: u32,
    /// Per-transaction undo records in block order.
    pub tx_undos: Vec<TxUndo>,
}

impl BlockUndo {
    /// Start an empty record for a block at `height`.
    pub fn new(height: u32) -> Self {
        Self {
            height,
            tx_undos: Vec::new(),
        }
    }

    /// Serialize for the undo column.
    pub fn serialize(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&self.height.to_be_bytes());
        bytes.extend_from_slice(&(self.tx_undos.len() as u32).to_be_bytes());
        for undo in &self.tx_undos {
            bytes.extend_from_slice(&(undo.spent.len() as u32).to_be_bytes());
            for entry in &undo.spent {
                let entry_bytes = entry.serialize();
                bytes.extend_from_slice(&(entry_bytes.len() as u32).to_be_bytes());
                bytes.extend_from_slice(&entry_bytes);
            }
        }
        bytes
    }

    /// Parse a stored record.
    pub fn deserialize(bytes: &[u8]) -> StateResult<Self> {
        let read_u32 = |reader: &mut ByteReader<'_>| -> StateResult<u32> {
            let b = reader.read_bytes(4)?;
            Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
        };

        let mut reader = ByteReader::new(bytes);
        let height = read_u32(&mut reader)?;
        let tx_count = read_u32(&mut reader)? as usize;
        let mut tx_undos = Vec::with_capacity(tx_count.min(1024));
        for _ in 0..tx_count {
            let spent_count = read_u32(&mut reader)? as usize;
            let mut spent = Vec::with_capacity(spent_count.min(1024));
            for _ in 0..spent_count {
                let len = read_u32(&mut reader)? as usize;
                let entry_bytes = reader.read_bytes(len)?;
                spent.push(UtxoEntry::deserialize(entry_bytes)?);
            }
            tx_undos.push(TxUndo { spent });
        }
        reader
            .expect_end()
            .map_err(|e| StateError::Serialization(e.to_string()))?;
        Ok(Self { height, tx_undos })
    }
}

/// The set of unspent transaction outputs.
#[derive(Clone, Debug, Default)]
pub struct UtxoSet {
    entries: HashMap<OutPoint, UtxoEntry>,
}

impl UtxoSet {
    /// An empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no entry exists.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert an entry; fails if the outpoint is already present.
    pub fn add(&mut self, entry: UtxoEntry) -> StateResult<()> {
        match self.entries.entry(entry.outpoint) {
            Entry::Occupied(_) => Err(StateError::UtxoExists(entry.outpoint.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(entry);
                Ok(())
            }
        }
    }

    /// Remove and return an entry; fails if absent.
    pub fn remove(&mut self, outpoint: &OutPoint) -> StateResult<UtxoEntry> {
        self.entries
            .remove(outpoint)
            .ok_or_else(|| StateError::UtxoMissing(outpoint.to_string()))
    }

    /// Look up an entry.
    pub fn get(&self, outpoint: &OutPoint) -> Option<&UtxoEntry> {
        self.entries.get(outpoint)
    }

    /// Check presence.
    pub fn contains(&self, outpoint: &OutPoint) -> bool {
        self.entries.contains_key(outpoint)
    }

    /// Sum of every unspent value.
    pub fn total_value(&self) -> u64 {
        self.entries
            .values()
            .map(|entry| entry.output.value)
            .sum()
    }

    /// Iterate entries in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = &UtxoEntry> {
        self.entries.values()
    }

    /// All entries paying to a locking script.
    pub fn entries_for_script<'a>(
        &'a self,
        locking_script: &'a [u8],
    ) -> impl Iterator<Item = &'a UtxoEntry> {
        self.entries
            .values()
            .filter(move |entry| entry.output.locking_script == locking_script)
    }

    /// Spendable balance held by a locking script.
    pub fn balance_for_script(&self, locking_script: &[u8]) -> u64 {
        self.entries_for_script(locking_script)
            .map(|entry| entry.output.value)
            .sum()
    }

    /// Apply a transaction at `height`: remove its inputs, add its outputs.
    ///
    /// Validation (input existence, coinbase maturity, duplicate inputs,
    /// value balance, outpoint collisions) happens before any mutation, so
    /// an error leaves the set byte-identical.
    #[instrument(skip(self, tx), fields(txid = %tx.txid(), height))]
    pub fn apply_transaction(&mut self, tx: &Transaction, height: u32) -> StateResult<TxUndo> {
        let txid = tx.txid();

        // Resolve inputs first.
        let mut spent = Vec::new();
        if !tx.is_coinbase() {
            let mut seen = HashSet::with_capacity(tx.inputs.len());
            for input in &tx.inputs {
                if !seen.insert(input.prev) {
                    return Err(StateError::DuplicateInput(input.prev.to_string()));
                }
                let entry = self
                    .entries
                    .get(&input.prev)
                    .ok_or_else(|| StateError::UtxoMissing(input.prev.to_string()))?;
                if !entry.is_mature(height) {
                    return Err(StateError::ImmatureCoinbase {
                        outpoint: input.prev.to_string(),
                        created: entry.height,
                        spend_height: height,
                    });
                }
                spent.push(entry.clone());
            }

            let input_value = spent
                .iter()
                .try_fold(0u64, |acc, e| acc.checked_add(e.output.value))
                .ok_or(StateError::ValueOverflow)?;
            let output_value = tx.total_output_value().ok_or(StateError::ValueOverflow)?;
            if output_value > input_value {
                return Err(StateError::Overspend {
                    inputs: input_value,
                    outputs: output_value,
                });
            }
        }

        // New outpoints must be fresh (a txid collision would silently
        // shadow an existing entry otherwise).
        for vout in 0..tx.outputs.len() as u32 {
            let outpoint = OutPoint::new(txid, vout);
            if self.entries.contains_key(&outpoint) {
                return Err(StateError::UtxoExists(outpoint.to_string()));
            }
        }

        // All checks passed; mutate.
        for input in tx.inputs.iter().filter(|i| !i.is_coinbase()) {
            self.entries.remove(&input.prev);
        }
        let is_coinbase = tx.is_coinbase();
        for (vout, output) in tx.outputs.iter().enumerate() {
            let outpoint = OutPoint::new(txid, vout as u32);
            self.entries.insert(
                outpoint,
                UtxoEntry::new(outpoint, output.clone(), height, is_coinbase),
            );
        }

        Ok(TxUndo { spent })
    }

    /// Reverse a previously applied transaction using its undo record.
    #[instrument(skip(self, tx, undo), fields(txid = %tx.txid()))]
    pub fn rollback_transaction(&mut self, tx: &Transaction, undo: &TxUndo) -> StateResult<()> {
        let txid = tx.txid();

        let expected_spent = if tx.is_coinbase() { 0 } else { tx.inputs.len() };
        if undo.spent.len() != expected_spent {
            return Err(StateError::UndoMismatch(format!(
                "undo holds {} entries, transaction spends {}",
                undo.spent.len(),
                expected_spent
            )));
        }

        // Every created output must still be present and every spent
        // outpoint still absent, otherwise the caller is rolling back out
        // of order.
        for vout in 0..tx.outputs.len() as u32 {
            let outpoint = OutPoint::new(txid, vout);
            if !self.entries.contains_key(&outpoint) {
                return Err(StateError::UtxoMissing(outpoint.to_string()));
            }
        }
        for entry in &undo.spent {
            if self.entries.contains_key(&entry.outpoint) {
                return Err(StateError::UtxoExists(entry.outpoint.to_string()));
            }
        }

        for vout in 0..tx.outputs.len() as u32 {
            self.entries.remove(&OutPoint::new(txid, vout));
        }
        for entry in &undo.spent {
            self.entries.insert(entry.outpoint, entry.clone());
        }

        Ok(())
    }

    /// Reverse a whole block: transactions in reverse order.
    pub fn rollback_block(
        &mut self,
        transactions: &[Transaction],
        undo: &BlockUndo,
    ) -> StateResult<()> {
        if transactions.len() != undo.tx_undos.len() {
            return Err(StateError::UndoMismatch(format!(
                "undo holds {} transactions, block has {}",
                undo.tx_undos.len(),
                transactions.len()
            )));
        }
        for (tx, tx_undo) in transactions.iter().zip(undo.tx_undos.iter()).rev() {
            self.rollback_transaction(tx, tx_undo)?;
        }
        Ok(())
    }
}
