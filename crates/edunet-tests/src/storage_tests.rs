//! Storage-backend interchangeability: the engine behaves identically
//! over the in-memory store and the on-disk database.

use crate::generators::{outpoint_of, spend_to};
use crate::harness::TestChain;
use edunet_chain::constants::{COINBASE_MATURITY, INITIAL_BLOCK_REWARD};
use edunet_consensus::{AlwaysValid, ConsensusConfig, ConsensusEngine};
use edunet_storage::{Column, Database, MemoryStore, Storage};
use std::sync::Arc;
use tempfile::TempDir;

fn pow_config() -> ConsensusConfig {
    ConsensusConfig {
        pos_activation_height: u32::MAX,
        worker_count: 1,
        ..ConsensusConfig::default()
    }
}

#[test]
fn test_disk_backed_chain_grows() {
    let tmp = TempDir::new().unwrap();
    let db = Database::open(tmp.path()).unwrap();
    let chain = TestChain::with_storage(Arc::new(db), pow_config(), Arc::new(AlwaysValid));

    let blocks = chain.mine_chain(3);
    assert_eq!(chain.engine.height(), 3);
    assert_eq!(chain.engine.best_block_hash(), blocks[2].hash());
    assert_eq!(chain.engine.chain_store().utxo_count().unwrap(), 4);
}

#[test]
fn test_memory_and_disk_produce_identical_chains() {
    let tmp = TempDir::new().unwrap();
    let on_disk = TestChain::with_storage(
        Arc::new(Database::open(tmp.path()).unwrap()),
        pow_config(),
        Arc::new(AlwaysValid),
    );
    let in_memory = TestChain::with_storage(
        Arc::new(MemoryStore::new()),
        pow_config(),
        Arc::new(AlwaysValid),
    );

    // Deterministic timestamps and nonce search give byte-identical blocks.
    on_disk.mine_chain(4);
    in_memory.mine_chain(4);

    assert_eq!(on_disk.engine.height(), in_memory.engine.height());
    assert_eq!(
        on_disk.engine.best_block_hash(),
        in_memory.engine.best_block_hash()
    );
    assert_eq!(
        on_disk.engine.cumulative_work(),
        in_memory.engine.cumulative_work()
    );
}

#[test]
fn test_utxo_column_tracks_set() {
    let chain = TestChain::new();
    chain.mine_chain(COINBASE_MATURITY);

    let genesis_out = outpoint_of(&chain.genesis.transactions[0], 0);
    let tx = spend_to(genesis_out, &[INITIAL_BLOCK_REWARD - 5_000]);
    chain.mine_next(vec![tx.clone()]);

    // Persisted UTXOs mirror the in-memory set.
    let store = chain.engine.chain_store();
    let live = chain.engine.utxo_snapshot();
    assert_eq!(store.utxo_count().unwrap(), live.len() as u64);

    assert!(!store.has_utxo(&genesis_out).unwrap());
    let spent_to = outpoint_of(&tx, 0);
    assert!(store.has_utxo(&spent_to).unwrap());
    assert_eq!(
        store.get_utxo(&spent_to).unwrap().unwrap().output.value,
        INITIAL_BLOCK_REWARD - 5_000
    );
}

#[test]
fn test_undo_data_persisted_per_height() {
    let chain = TestChain::new();
    chain.mine_chain(3);

    let store = chain.engine.chain_store();
    for height in 0..=3 {
        let undo = store.get_undo(height).unwrap();
        assert!(undo.is_some(), "undo for height {height}");
        assert_eq!(undo.unwrap().height, height);
    }
    assert!(store.get_undo(4).unwrap().is_none());
}

#[test]
fn test_metadata_tracks_tip() {
    let chain = TestChain::new();
    let blocks = chain.mine_chain(2);

    let store = chain.engine.chain_store();
    assert_eq!(store.best_block_hash().unwrap(), Some(blocks[1].hash()));
    assert_eq!(store.height().unwrap(), Some(2));
}

#[test]
fn test_blocks_column_counts_side_chains() {
    let chain = TestChain::new();
    let main = chain.mine_chain(3);

    let side = crate::harness::mine_detached(
        main[1].hash(),
        3,
        INITIAL_BLOCK_REWARD,
        Vec::new(),
        91,
    );
    chain.engine.ingest_block(side.clone()).unwrap();

    // Genesis + three main + one side block.
    let storage = chain.engine.chain_store().storage();
    assert_eq!(storage.count(Column::Blocks).unwrap(), 5);
    // Height index covers the main chain only.
    assert_eq!(storage.count(Column::HeightIndex).unwrap(), 4);
}
