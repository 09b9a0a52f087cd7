//! Transactions: inputs, outputs, witnesses, and the two wire forms.
//!
//! The legacy serialization covers version, inputs, outputs and locktime.
//! The witness serialization inserts the two-byte `0x00 0x01` marker/flag
//! after the version and appends one witness stack per input before the
//! locktime. `txid` hashes the legacy form, `wtxid` the full form; both are
//! memoized and must be cleared with [`Transaction::clear_cache`] after any
//! field mutation.

use crate::constants::MAX_TRANSACTION_SIZE;
use crate::encode::{varint_len, write_var_bytes, write_varint, ByteReader};
use crate::{ChainError, ChainResult};
use edunet_crypto::{double_sha256, Hash160, Hash256};
use once_cell::sync::OnceCell;
use std::fmt;

/// Output index marking a null outpoint.
pub const NULL_INDEX: u32 = 0xFFFF_FFFF;

/// Witness marker and flag bytes.
const WITNESS_MARKER: u8 = 0x00;
const WITNESS_FLAG: u8 = 0x01;

/// Reference to a transaction output: (txid, output index).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct OutPoint {
    /// Hash of the transaction holding the output.
    pub txid: Hash256,
    /// Index of the output within that transaction.
    pub vout: u32,
}

impl OutPoint {
    /// Reference an output.
    pub fn new(txid: Hash256, vout: u32) -> Self {
        Self { txid, vout }
    }

    /// The null outpoint used by coinbase inputs.
    pub fn null() -> Self {
        Self {
            txid: Hash256::zero(),
            vout: NULL_INDEX,
        }
    }

    /// True for the coinbase marker outpoint.
    pub fn is_null(&self) -> bool {
        self.txid.is_zero() && self.vout == NULL_INDEX
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.txid, self.vout)
    }
}

impl fmt::Debug for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OutPoint({self})")
    }
}

/// A transaction input.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxInput {
    /// Output being spent; null for coinbase inputs.
    pub prev: OutPoint,
    /// Unlocking script. Coinbase inputs carry arbitrary data here.
    pub unlocking_script: Vec<u8>,
    /// Sequence number.
    pub sequence: u32,
}

impl TxInput {
    /// Spend an outpoint with the given unlocking script.
    pub fn new(prev: OutPoint, unlocking_script: Vec<u8>) -> Self {
        Self {
            prev,
            unlocking_script,
            sequence: NULL_INDEX,
        }
    }

    /// True when this input is a coinbase input.
    pub fn is_coinbase(&self) -> bool {
        self.prev.is_null()
    }

    fn write_to(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(self.prev.txid.as_ref());
        buf.extend_from_slice(&self.prev.vout.to_le_bytes());
        write_var_bytes(buf, &self.unlocking_script);
        buf.extend_from_slice(&self.sequence.to_le_bytes());
    }

    fn read_from(reader: &mut ByteReader<'_>) -> ChainResult<Self> {
        let txid = reader.read_hash256()?;
        let vout = reader.read_u32_le()?;
        let unlocking_script = reader.read_var_bytes()?;
        let sequence = reader.read_u32_le()?;
        Ok(Self {
            prev: OutPoint::new(txid, vout),
            unlocking_script,
            sequence,
        })
    }

    fn serialized_len(&self) -> usize {
        32 + 4 + varint_len(self.unlocking_script.len() as u64) + self.unlocking_script.len() + 4
    }
}

/// A transaction output.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxOutput {
    /// Value in satoshi.
    pub value: u64,
    /// Locking script.
    pub locking_script: Vec<u8>,
}

impl TxOutput {
    /// Pay `value` satoshi to `locking_script`.
    pub fn new(value: u64, locking_script: Vec<u8>) -> Self {
        Self {
            value,
            locking_script,
        }
    }

    fn write_to(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.value.to_le_bytes());
        write_var_bytes(buf, &self.locking_script);
    }

    fn read_from(reader: &mut ByteReader<'_>) -> ChainResult<Self> {
        let value = reader.read_u64_le()?;
        let locking_script = reader.read_var_bytes()?;
        Ok(Self {
            value,
            locking_script,
        })
    }

    fn serialized_len(&self) -> usize {
        8 + varint_len(self.locking_script.len() as u64) + self.locking_script.len()
    }
}

/// A per-input witness stack.
pub type TxWitness = Vec<Vec<u8>>;

/// A transaction.
///
/// `witnesses` is either empty (no witness data) or holds exactly one stack
/// per input.
#[derive(Clone, Debug)]
pub struct Transaction {
    /// Format version.
    pub version: u32,
    /// Ordered inputs; at least one in a well-formed transaction.
    pub inputs: Vec<TxInput>,
    /// Ordered outputs; at least one in a well-formed transaction.
    pub outputs: Vec<TxOutput>,
    /// Per-input witness stacks, empty when unused.
    pub witnesses: Vec<TxWitness>,
    /// Lock time.
    pub locktime: u32,
    txid_cache: OnceCell<Hash256>,
    wtxid_cache: OnceCell<Hash256>,
}

impl PartialEq for Transaction {
    fn eq(&self, other: &Self) -> bool {
        self.version == other.version
            && self.inputs == other.inputs
            && self.outputs == other.outputs
            && self.witnesses == other.witnesses
            && self.locktime == other.locktime
    }
}

impl Eq for Transaction {}

impl Transaction {
    /// Build a transaction.
    pub fn new(version: u32, inputs: Vec<TxInput>, outputs: Vec<TxOutput>, locktime: u32) -> Self {
        Self {
            version,
            inputs,
            outputs,
            witnesses: Vec::new(),
            locktime,
            txid_cache: OnceCell::new(),
            wtxid_cache: OnceCell::new(),
        }
    }

    /// Build a coinbase transaction paying `value` to `locking_script`.
    /// `coinbase_data` lands in the null input's unlocking-script field.
    pub fn coinbase(value: u64, locking_script: Vec<u8>, coinbase_data: Vec<u8>) -> Self {
        let input = TxInput {
            prev: OutPoint::null(),
            unlocking_script: coinbase_data,
            sequence: NULL_INDEX,
        };
        Self::new(1, vec![input], vec![TxOutput::new(value, locking_script)], 0)
    }

    /// True iff the transaction has exactly one input and it is null.
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].is_coinbase()
    }

    /// True when witness data is attached.
    pub fn has_witness(&self) -> bool {
        !self.witnesses.is_empty()
    }

    /// Drop memoized hashes. Must be called after mutating any field.
    pub fn clear_cache(&mut self) {
        self.txid_cache = OnceCell::new();
        self.wtxid_cache = OnceCell::new();
    }

    /// Attach per-input witness stacks, invalidating cached hashes.
    pub fn set_witnesses(&mut self, witnesses: Vec<TxWitness>) {
        self.witnesses = witnesses;
        self.clear_cache();
    }

    /// Transaction id: double SHA-256 of the legacy serialization. Memoized.
    pub fn txid(&self) -> Hash256 {
        *self
            .txid_cache
            .get_or_init(|| double_sha256(&self.serialize_legacy()))
    }

    /// Witness id: double SHA-256 of the full serialization. Equals `txid`
    /// when no witness is attached. Memoized.
    pub fn wtxid(&self) -> Hash256 {
        if !self.has_witness() {
            return self.txid();
        }
        *self
            .wtxid_cache
            .get_or_init(|| double_sha256(&self.serialize()))
    }

    /// Legacy serialization without marker, flag or witness data.
    pub fn serialize_legacy(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.base_size());
        buf.extend_from_slice(&self.version.to_le_bytes());
        write_varint(&mut buf, self.inputs.len() as u64);
        for input in &self.inputs {
            input.write_to(&mut buf);
        }
        write_varint(&mut buf, self.outputs.len() as u64);
        for output in &self.outputs {
            output.write_to(&mut buf);
        }
        buf.extend_from_slice(&self.locktime.to_le_bytes());
        buf
    }

    /// Wire serialization: witness form when witness data is attached,
    /// legacy form otherwise.
    pub fn serialize(&self) -> Vec<u8> {
        if !self.has_witness() {
            return self.serialize_legacy();
        }
        let mut buf = Vec::with_capacity(self.total_size());
        buf.extend_from_slice(&self.version.to_le_bytes());
        buf.push(WITNESS_MARKER);
        buf.push(WITNESS_FLAG);
        write_varint(&mut buf, self.inputs.len() as u64);
        for input in &self.inputs {
            input.write_to(&mut buf);
        }
        write_varint(&mut buf, self.outputs.len() as u64);
        for output in &self.outputs {
            output.write_to(&mut buf);
        }
        for witness in &self.witnesses {
            write_varint(&mut buf, witness.len() as u64);
            for item in witness {
                write_var_bytes(&mut buf, item);
            }
        }
        buf.extend_from_slice(&self.locktime.to_le_bytes());
        buf
    }

    /// Size of the legacy serialization.
    pub fn base_size(&self) -> usize {
        let mut size = 4 + 4;
        size += varint_len(self.inputs.len() as u64);
        size += self.inputs.iter().map(TxInput::serialized_len).sum::<usize>();
        size += varint_len(self.outputs.len() as u64);
        size += self
            .outputs
            .iter()
            .map(TxOutput::serialized_len)
            .sum::<usize>();
        size
    }

    /// Size of the wire serialization.
    pub fn total_size(&self) -> usize {
        if !self.has_witness() {
            return self.base_size();
        }
        let witness_size: usize = self
            .witnesses
            .iter()
            .map(|w| {
                varint_len(w.len() as u64)
                    + w.iter()
                        .map(|item| varint_len(item.len() as u64) + item.len())
                        .sum::<usize>()
            })
            .sum();
        self.base_size() + 2 + witness_size
    }

    /// Transaction weight: `base_size * 3 + total_size`.
    pub fn weight(&self) -> usize {
        self.base_size() * 3 + self.total_size()
    }

    /// Sum of output values; `None` on u64 overflow.
    pub fn total_output_value(&self) -> Option<u64> {
        self.outputs
            .iter()
            .try_fold(0u64, |acc, out| acc.checked_add(out.value))
    }

    /// Parse from exactly `data`; trailing bytes are rejected.
    pub fn deserialize(data: &[u8]) -> ChainResult<Self> {
        if data.len() > MAX_TRANSACTION_SIZE {
            return Err(ChainError::Oversized {
                size: data.len(),
                max: MAX_TRANSACTION_SIZE,
            });
        }
        let mut reader = ByteReader::new(data);
        let tx = Self::read_from(&mut reader)?;
        reader.expect_end()?;
        Ok(tx)
    }

    /// Parse from a reader positioned at a transaction. Used by block
    /// deserialization.
    pub fn read_from(reader: &mut ByteReader<'_>) -> ChainResult<Self> {
        let version = reader.read_u32_le()?;

        let mut count = reader.read_varint()?;
        let mut has_witness = false;
        if count == u64::from(WITNESS_MARKER) {
            // A zero "input count" is the witness marker; the flag follows.
            let flag = reader.read_u8()?;
            if flag != WITNESS_FLAG {
                return Err(ChainError::Malformed(format!(
                    "bad witness flag {flag:#04x}"
                )));
            }
            has_witness = true;
            count = reader.read_varint()?;
        }

        if count == 0 {
            return Err(ChainError::Malformed("transaction with no inputs".into()));
        }
        if count > reader.remaining() as u64 {
            return Err(ChainError::LengthOutOfRange(count));
        }
        let mut inputs = Vec::with_capacity(count as usize);
        for _ in 0..count {
            inputs.push(TxInput::read_from(reader)?);
        }

        let out_count = reader.read_varint()?;
        if out_count > reader.remaining() as u64 {
            return Err(ChainError::LengthOutOfRange(out_count));
        }
        let mut outputs = Vec::with_capacity(out_count as usize);
        for _ in 0..out_count {
            outputs.push(TxOutput::read_from(reader)?);
        }

        let mut witnesses = Vec::new();
        if has_witness {
            witnesses.reserve(inputs.len());
            for _ in 0..inputs.len() {
                let items = reader.read_varint()?;
                if items > reader.remaining() as u64 {
                    return Err(ChainError::LengthOutOfRange(items));
                }
                let mut stack = Vec::with_capacity(items as usize);
                for _ in 0..items {
                    stack.push(reader.read_var_bytes()?);
                }
                witnesses.push(stack);
            }
        }

        let locktime = reader.read_u32_le()?;

        let mut tx = Self::new(version, inputs, outputs, locktime);
        tx.witnesses = witnesses;
        Ok(tx)
    }
}

/// A pay-to-pubkey-hash style locking script for `recipient`.
pub fn p2pkh_script(recipient: &Hash160) -> Vec<u8> {
    // OP_DUP OP_HASH160 <20 bytes> OP_EQUALVERIFY OP_CHECKSIG
    let mut script = Vec::with_capacity(25);
    script.push(0x76);
    script.push(0xA9);
    script.push(0x14);
    script.extend_from_slice(recipient.as_ref());
    script.push(0x88);
    script.push(0xAC);
    script
}
