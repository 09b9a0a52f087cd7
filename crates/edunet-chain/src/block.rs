//! Block headers and blocks.
//!
//! The header serializes to exactly 80 bytes; `height` is a local index and
//! never enters the wire form, so the proof-of-work hash is independent of
//! where an implementation stores the block. The block hash and Merkle root
//! are memoized the same way transaction ids are.

use crate::compact::{self, compact_to_target_bytes};
use crate::constants::{GENESIS_BITS, GENESIS_TIMESTAMP, INITIAL_BLOCK_REWARD};
use crate::encode::{varint_len, write_varint, ByteReader};
use crate::merkle::merkle_root;
use crate::transaction::{p2pkh_script, Transaction};
use crate::{ChainError, ChainResult};
use edunet_crypto::{double_sha256, hash160, Hash256, Signature};
use once_cell::sync::OnceCell;

/// Offset of the nonce within the 80-byte header serialization.
pub const HEADER_NONCE_OFFSET: usize = 76;

/// A block header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockHeader {
    /// Header version.
    pub version: u32,
    /// Hash of the previous block's header.
    pub prev_block_hash: Hash256,
    /// Merkle root over the block's transaction ids.
    pub merkle_root: Hash256,
    /// Unix timestamp in seconds.
    pub timestamp: u32,
    /// Compact difficulty target.
    pub n_bits: u32,
    /// Proof-of-work nonce.
    pub nonce: u32,
    /// Chain height. Local index only, not part of the 80-byte wire form.
    pub height: u32,
}

impl BlockHeader {
    /// Canonical serialized length.
    pub const SERIALIZED_LEN: usize = 80;

    /// Serialize the canonical 80 bytes (height excluded).
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SERIALIZED_LEN);
        buf.extend_from_slice(&self.version.to_le_bytes());
        buf.extend_from_slice(self.prev_block_hash.as_ref());
        buf.extend_from_slice(self.merkle_root.as_ref());
        buf.extend_from_slice(&self.timestamp.to_le_bytes());
        buf.extend_from_slice(&self.n_bits.to_le_bytes());
        buf.extend_from_slice(&self.nonce.to_le_bytes());
        buf
    }

    /// Parse the 80-byte wire form. `height` comes back as zero; callers
    /// that track heights restore it from their own index.
    pub fn deserialize(data: &[u8]) -> ChainResult<Self> {
        let mut reader = ByteReader::new(data);
        let header = Self::read_from(&mut reader)?;
        reader.expect_end()?;
        Ok(header)
    }

    /// Parse a header from a reader.
    pub fn read_from(reader: &mut ByteReader<'_>) -> ChainResult<Self> {
        Ok(Self {
            version: reader.read_u32_le()?,
            prev_block_hash: reader.read_hash256()?,
            merkle_root: reader.read_hash256()?,
            timestamp: reader.read_u32_le()?,
            n_bits: reader.read_u32_le()?,
            nonce: reader.read_u32_le()?,
            height: 0,
        })
    }

    /// Header hash: double SHA-256 of the 80 wire bytes.
    pub fn hash(&self) -> Hash256 {
        double_sha256(&self.serialize())
    }

    /// Expanded target, `None` for a malformed compact encoding.
    pub fn target(&self) -> Option<[u8; 32]> {
        compact_to_target_bytes(self.n_bits)
    }

    /// Whether the header hash satisfies its own declared target.
    pub fn meets_target(&self) -> bool {
        match self.target() {
            Some(target) => compact::meets_target(&self.hash(), &target),
            None => false,
        }
    }

    /// Difficulty of this header's target as a float.
    pub fn difficulty(&self) -> f64 {
        compact::difficulty(self.n_bits)
    }
}

/// The validator seal on a proof-of-stake block, carried as the coinbase
/// witness stack `[validator_id (32 B), signature (64 B)]`. Witness data
/// stays out of the txid and Merkle root, so sealing does not disturb the
/// header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PosSeal {
    /// Identity of the producing validator (hash of its public key).
    pub validator_id: Hash256,
    /// Signature over the header hash.
    pub signature: Signature,
}

/// A block: header plus ordered transactions, the first of which is the
/// coinbase.
#[derive(Clone, Debug)]
pub struct Block {
    /// The header.
    pub header: BlockHeader,
    /// Ordered transactions.
    pub transactions: Vec<Transaction>,
    hash_cache: OnceCell<Hash256>,
    merkle_cache: OnceCell<Hash256>,
}

impl PartialEq for Block {
    fn eq(&self, other: &Self) -> bool {
        self.header == other.header && self.transactions == other.transactions
    }
}

impl Eq for Block {}

impl Block {
    /// Assemble a block.
    pub fn new(header: BlockHeader, transactions: Vec<Transaction>) -> Self {
        Self {
            header,
            transactions,
            hash_cache: OnceCell::new(),
            merkle_cache: OnceCell::new(),
        }
    }

    /// Block hash (the header hash). Memoized.
    pub fn hash(&self) -> Hash256 {
        *self.hash_cache.get_or_init(|| self.header.hash())
    }

    /// Merkle root recomputed over the transaction ids. Memoized.
    pub fn compute_merkle_root(&self) -> Hash256 {
        *self.merkle_cache.get_or_init(|| {
            let txids: Vec<Hash256> = self.transactions.iter().map(Transaction::txid).collect();
            merkle_root(&txids)
        })
    }

    /// Write the recomputed Merkle root into the header.
    pub fn update_merkle_root(&mut self) {
        let root = {
            let txids: Vec<Hash256> = self.transactions.iter().map(Transaction::txid).collect();
            merkle_root(&txids)
        };
        self.header.merkle_root = root;
        self.clear_cache();
    }

    /// Drop memoized hashes. Must be called after mutating the header or
    /// the transaction list.
    pub fn clear_cache(&mut self) {
        self.hash_cache = OnceCell::new();
        self.merkle_cache = OnceCell::new();
    }

    /// The coinbase transaction, if the block has one in position zero.
    pub fn coinbase(&self) -> Option<&Transaction> {
        self.transactions.first().filter(|tx| tx.is_coinbase())
    }

    /// Read the PoS seal from the coinbase witness, if present and well
    /// formed.
    pub fn pos_seal(&self) -> Option<PosSeal> {
        let coinbase = self.coinbase()?;
        let stack = coinbase.witnesses.first()?;
        if stack.len() != 2 {
            return None;
        }
        let validator_id = Hash256::from_slice(&stack[0]).ok()?;
        let signature = Signature::from_slice(&stack[1]).ok()?;
        Some(PosSeal {
            validator_id,
            signature,
        })
    }

    /// Attach a PoS seal to the coinbase witness.
    pub fn set_pos_seal(&mut self, seal: &PosSeal) {
        if let Some(coinbase) = self.transactions.first_mut() {
            coinbase.set_witnesses(vec![vec![
                seal.validator_id.to_vec(),
                seal.signature.as_bytes().to_vec(),
            ]]);
        }
        self.clear_cache();
    }

    /// Wire serialization: header, transaction count, transactions.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.total_size());
        buf.extend_from_slice(&self.header.serialize());
        write_varint(&mut buf, self.transactions.len() as u64);
        for tx in &self.transactions {
            buf.extend_from_slice(&tx.serialize());
        }
        buf
    }

    /// Parse from exactly `data`.
    pub fn deserialize(data: &[u8]) -> ChainResult<Self> {
        let mut reader = ByteReader::new(data);
        let header = BlockHeader::read_from(&mut reader)?;
        let count = reader.read_varint()?;
        if count > reader.remaining() as u64 {
            return Err(ChainError::LengthOutOfRange(count));
        }
        let mut transactions = Vec::with_capacity(count as usize);
        for _ in 0..count {
            transactions.push(Transaction::read_from(&mut reader)?);
        }
        reader.expect_end()?;
        Ok(Self::new(header, transactions))
    }

    /// Size of the block with legacy transaction serialization.
    pub fn base_size(&self) -> usize {
        BlockHeader::SERIALIZED_LEN
            + varint_len(self.transactions.len() as u64)
            + self
                .transactions
                .iter()
                .map(Transaction::base_size)
                .sum::<usize>()
    }

    /// Size of the full wire serialization.
    pub fn total_size(&self) -> usize {
        BlockHeader::SERIALIZED_LEN
            + varint_len(self.transactions.len() as u64)
            + self
                .transactions
                .iter()
                .map(Transaction::total_size)
                .sum::<usize>()
    }

    /// Block weight: `base_size * 3 + total_size`.
    pub fn weight(&self) -> usize {
        self.base_size() * 3 + self.total_size()
    }

    /// Construct the genesis block. The coinbase pays the initial subsidy
    /// and embeds `message` in its input script.
    pub fn genesis(message: &str) -> Self {
        let script = p2pkh_script(&hash160(message.as_bytes()));
        let coinbase =
            Transaction::coinbase(INITIAL_BLOCK_REWARD, script, message.as_bytes().to_vec());

        let header = BlockHeader {
            version: 1,
            prev_block_hash: Hash256::zero(),
            merkle_root: Hash256::zero(),
            timestamp: GENESIS_TIMESTAMP,
            n_bits: GENESIS_BITS,
            nonce: 0,
            height: 0,
        };

        let mut block = Self::new(header, vec![coinbase]);
        block.update_merkle_root();
        block
    }

    /// Build an unmined block template on top of `prev_block_hash`. The
    /// caller supplies the coinbase value (subsidy plus fees, scaled for
    /// the production mode) and the transactions to include.
    #[allow(clippy::too_many_arguments)]
    pub fn build_template(
        prev_block_hash: Hash256,
        height: u32,
        n_bits: u32,
        timestamp: u32,
        reward_value: u64,
        reward_script: Vec<u8>,
        transactions: Vec<Transaction>,
    ) -> Self {
        // Height in the coinbase data keeps coinbase txids unique per block.
        let coinbase = Transaction::coinbase(
            reward_value,
            reward_script,
            height.to_le_bytes().to_vec(),
        );

        let mut txs = Vec::with_capacity(transactions.len() + 1);
        txs.push(coinbase);
        txs.extend(transactions);

        let header = BlockHeader {
            version: 2,
            prev_block_hash,
            merkle_root: Hash256::zero(),
            timestamp,
            n_bits,
            nonce: 0,
            height,
        };

        let mut block = Self::new(header, txs);
        block.update_merkle_root();
        block
    }
}
