//! Typed chain storage over the key-value layer.
//!
//! Blocks are stored under their hash as `height (4 B, big-endian) ||
//! wire bytes`; the height prefix restores the off-wire header height on
//! read. The main chain is indexed by height, and undo data is kept per
//! connected height so any prefix of the chain can be rolled back.

use crate::{BlockUndo, StateError, StateResult, UtxoEntry};
use edunet_chain::{Block, OutPoint, Transaction};
use edunet_crypto::Hash256;
use edunet_storage::{Column, Storage, WriteBatch};
use std::sync::Arc;
use tracing::debug;

const KEY_BEST_BLOCK_HASH: &[u8] = b"best_block_hash";
const KEY_HEIGHT: &[u8] = b"height";

/// Typed access to chain records in a [`Storage`] backend.
#[derive(Clone)]
pub struct ChainStore {
    storage: Arc<dyn Storage>,
}

impl ChainStore {
    /// Wrap a storage backend.
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// The underlying backend (for batch writes).
    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// Apply a prepared batch atomically.
    pub fn write_batch(&self, batch: WriteBatch) -> StateResult<()> {
        self.storage.write_batch(batch)?;
        Ok(())
    }

    fn block_record(block: &Block) -> Vec<u8> {
        let bytes = block.serialize();
        let mut record = Vec::with_capacity(4 + bytes.len());
        record.extend_from_slice(&block.header.height.to_be_bytes());
        record.extend_from_slice(&bytes);
        record
    }

    fn decode_block_record(record: &[u8]) -> StateResult<Block> {
        if record.len() < 4 {
            return Err(StateError::Serialization("block record too short".into()));
        }
        let height = u32::from_be_bytes([record[0], record[1], record[2], record[3]]);
        let mut block = Block::deserialize(&record[4..])?;
        block.header.height = height;
        Ok(block)
    }

    // ==================== Blocks ====================

    /// Store a block under its hash.
    pub fn put_block(&self, block: &Block) -> StateResult<()> {
        self.storage.put(
            Column::Blocks,
            block.hash().as_ref(),
            &Self::block_record(block),
        )?;
        Ok(())
    }

    /// Queue a block write on a batch.
    pub fn put_block_batched(&self, batch: &mut WriteBatch, block: &Block) {
        batch.put(
            Column::Blocks,
            block.hash().to_vec(),
            Self::block_record(block),
        );
    }

    /// Fetch a block by hash, header height restored.
    pub fn get_block_by_hash(&self, hash: &Hash256) -> StateResult<Option<Block>> {
        match self.storage.get(Column::Blocks, hash.as_ref())? {
            Some(record) => Ok(Some(Self::decode_block_record(&record)?)),
            None => Ok(None),
        }
    }

    /// Fetch the main-chain block at `height`.
    pub fn get_block_by_height(&self, height: u32) -> StateResult<Option<Block>> {
        match self
            .storage
            .get(Column::HeightIndex, &height.to_be_bytes())?
        {
            Some(hash_bytes) => {
                let hash = Hash256::from_slice(&hash_bytes)
                    .map_err(|e| StateError::Serialization(e.to_string()))?;
                self.get_block_by_hash(&hash)
            }
            None => Ok(None),
        }
    }

    /// Whether a block is stored (main chain or side chain).
    pub fn has_block(&self, hash: &Hash256) -> StateResult<bool> {
        Ok(self.storage.contains(Column::Blocks, hash.as_ref())?)
    }

    /// Remove a stored block.
    pub fn delete_block(&self, hash: &Hash256) -> StateResult<()> {
        self.storage.delete(Column::Blocks, hash.as_ref())?;
        Ok(())
    }

    /// Hash of the main-chain block at `height`.
    pub fn hash_at_height(&self, height: u32) -> StateResult<Option<Hash256>> {
        match self
            .storage
            .get(Column::HeightIndex, &height.to_be_bytes())?
        {
            Some(bytes) => Ok(Some(
                Hash256::from_slice(&bytes)
                    .map_err(|e| StateError::Serialization(e.to_string()))?,
            )),
            None => Ok(None),
        }
    }

    /// Queue the main-chain connection records for a block: height index,
    /// undo data, and per-transaction records.
    pub fn connect_block_batched(
        &self,
        batch: &mut WriteBatch,
        block: &Block,
        undo: &BlockUndo,
    ) {
        self.put_block_batched(batch, block);
        batch.put(
            Column::HeightIndex,
            block.header.height.to_be_bytes().to_vec(),
            block.hash().to_vec(),
        );
        batch.put(
            Column::Undo,
            block.header.height.to_be_bytes().to_vec(),
            undo.serialize(),
        );
        for tx in &block.transactions {
            batch.put(
                Column::Transactions,
                tx.txid().to_vec(),
                tx.serialize(),
            );
        }
        debug!(height = block.header.height, hash = %block.hash(), "Block connection queued");
    }

    /// Queue removal of a block's main-chain records (the block itself
    /// stays stored as side-chain data).
    pub fn disconnect_block_batched(&self, batch: &mut WriteBatch, block: &Block) {
        batch.delete(
            Column::HeightIndex,
            block.header.height.to_be_bytes().to_vec(),
        );
        batch.delete(Column::Undo, block.header.height.to_be_bytes().to_vec());
        for tx in &block.transactions {
            batch.delete(Column::Transactions, tx.txid().to_vec());
        }
    }

    // ==================== Transactions ====================

    /// Store a transaction under its txid.
    pub fn put_tx(&self, tx: &Transaction) -> StateResult<()> {
        self.storage
            .put(Column::Transactions, tx.txid().as_ref(), &tx.serialize())?;
        Ok(())
    }

    /// Fetch a transaction by txid.
    pub fn get_tx(&self, txid: &Hash256) -> StateResult<Option<Transaction>> {
        match self.storage.get(Column::Transactions, txid.as_ref())? {
            Some(bytes) => Ok(Some(Transaction::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Whether a transaction is stored.
    pub fn has_tx(&self, txid: &Hash256) -> StateResult<bool> {
        Ok(self.storage.contains(Column::Transactions, txid.as_ref())?)
    }

    /// Remove a stored transaction.
    pub fn delete_tx(&self, txid: &Hash256) -> StateResult<()> {
        self.storage.delete(Column::Transactions, txid.as_ref())?;
        Ok(())
    }

    // ==================== UTXOs ====================

    /// Persist a UTXO entry.
    pub fn put_utxo(&self, entry: &UtxoEntry) -> StateResult<()> {
        self.storage.put(
            Column::Utxos,
            &UtxoEntry::key(&entry.outpoint),
            &entry.serialize(),
        )?;
        Ok(())
    }

    /// Fetch a persisted UTXO entry.
    pub fn get_utxo(&self, outpoint: &OutPoint) -> StateResult<Option<UtxoEntry>> {
        match self.storage.get(Column::Utxos, &UtxoEntry::key(outpoint))? {
            Some(bytes) => Ok(Some(UtxoEntry::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Whether an outpoint is persisted as unspent.
    pub fn has_utxo(&self, outpoint: &OutPoint) -> StateResult<bool> {
        Ok(self
            .storage
            .contains(Column::Utxos, &UtxoEntry::key(outpoint))?)
    }

    /// Remove a persisted UTXO entry.
    pub fn delete_utxo(&self, outpoint: &OutPoint) -> StateResult<()> {
        self.storage
            .delete(Column::Utxos, &UtxoEntry::key(outpoint))?;
        Ok(())
    }

    /// Number of persisted UTXO entries.
    pub fn utxo_count(&self) -> StateResult<u64> {
        Ok(self.storage.count(Column::Utxos)?)
    }

    /// Queue the UTXO delta of an applied block: deletes for every spent
    /// entry, puts for every created one.
    pub fn apply_utxo_delta_batched(
        &self,
        batch: &mut WriteBatch,
        spent: &[UtxoEntry],
        created: &[UtxoEntry],
    ) {
        for entry in spent {
            batch.delete(Column::Utxos, UtxoEntry::key(&entry.outpoint));
        }
        for entry in created {
            batch.put(
                Column::Utxos,
                UtxoEntry::key(&entry.outpoint),
                entry.serialize(),
            );
        }
    }

    /// Queue the storage-side reversal of a block's UTXO delta, walking
    /// its transactions in reverse: created outputs are deleted, spent
    /// entries restored. Mirrors [`UtxoSet::rollback_block`].
    pub fn rollback_utxo_delta_batched(
        &self,
        batch: &mut WriteBatch,
        block: &Block,
        undo: &BlockUndo,
    ) {
        for (tx, tx_undo) in block
            .transactions
            .iter()
            .zip(undo.tx_undos.iter())
            .rev()
        {
            let txid = tx.txid();
            for vout in 0..tx.outputs.len() as u32 {
                let outpoint = OutPoint::new(txid, vout);
                batch.delete(Column::Utxos, UtxoEntry::key(&outpoint));
            }
            for entry in &tx_undo.spent {
                batch.put(
                    Column::Utxos,
                    UtxoEntry::key(&entry.outpoint),
                    entry.serialize(),
                );
            }
        }
    }

    // ==================== Undo data ====================

    /// Fetch the undo record for the main-chain block at `height`.
    pub fn get_undo(&self, height: u32) -> StateResult<Option<BlockUndo>> {
        match self.storage.get(Column::Undo, &height.to_be_bytes())? {
            Some(bytes) => Ok(Some(BlockUndo::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    // ==================== Chain metadata ====================

    /// Queue the tip metadata update.
    pub fn set_best_block_batched(&self, batch: &mut WriteBatch, hash: &Hash256, height: u32) {
        batch.put(Column::Metadata, KEY_BEST_BLOCK_HASH.to_vec(), hash.to_vec());
        batch.put(
            Column::Metadata,
            KEY_HEIGHT.to_vec(),
            height.to_be_bytes().to_vec(),
        );
    }

    /// Persist the tip metadata directly.
    pub fn set_best_block(&self, hash: &Hash256, height: u32) -> StateResult<()> {
        let mut batch = WriteBatch::new();
        self.set_best_block_batched(&mut batch, hash, height);
        self.write_batch(batch)
    }

    /// Hash of the best block, if a chain exists.
    pub fn best_block_hash(&self) -> StateResult<Option<Hash256>> {
        match self.storage.get(Column::Metadata, KEY_BEST_BLOCK_HASH)? {
            Some(bytes) => Ok(Some(
                Hash256::from_slice(&bytes)
                    .map_err(|e| StateError::Serialization(e.to_string()))?,
            )),
            None => Ok(None),
        }
    }

    /// Height of the best block, if a chain exists.
    pub fn height(&self) -> StateResult<Option<u32>> {
        match self.storage.get(Column::Metadata, KEY_HEIGHT)? {
            Some(bytes) if bytes.len() >= 4 => Ok(Some(u32::from_be_bytes([
                bytes[0], bytes[1], bytes[2], bytes[3],
            ]))),
            Some(_) => Err(StateError::Serialization("height record too short".into())),
            None => Ok(None),
        }
    }
}
