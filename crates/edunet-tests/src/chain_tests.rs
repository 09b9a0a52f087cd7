//! Chain-level scenarios: genesis shape, serialization through the
//! engine, subsidy accounting.

use crate::harness::{TestChain, EASY_BITS};
use crate::outpoint_of;
use edunet_chain::constants::{GENESIS_TIMESTAMP, INITIAL_BLOCK_REWARD};
use edunet_chain::{Block, Hash256};
use edunet_storage::Storage;

// ============ Genesis (scenario E1) ============

#[test]
fn test_genesis_block_shape() {
    let block = Block::genesis("Genesis Block");

    assert_eq!(block.header.prev_block_hash, Hash256::zero());
    assert_eq!(block.header.timestamp, 1_231_006_505);
    assert_eq!(block.header.n_bits, 0x1D00_FFFF);
    assert_eq!(block.transactions.len(), 1);

    let coinbase = block.coinbase().expect("genesis carries a coinbase");
    let paid: u64 = coinbase.outputs.iter().map(|o| o.value).sum();
    assert_eq!(paid, 5_000_000_000);
}

#[test]
fn test_genesis_message_lands_in_coinbase() {
    let block = Block::genesis("a custom message");
    assert_eq!(
        block.transactions[0].inputs[0].unlocking_script,
        b"a custom message"
    );
    // Different messages give different chains.
    assert_ne!(block.hash(), Block::genesis("another").hash());
}

#[test]
fn test_engine_applies_genesis() {
    let chain = TestChain::new();
    assert_eq!(chain.engine.height(), 0);
    assert_eq!(chain.engine.best_block_hash(), chain.genesis.hash());

    // Genesis coinbase output is in the UTXO set.
    let utxo = chain.engine.utxo_snapshot();
    assert_eq!(utxo.len(), 1);
    let outpoint = outpoint_of(&chain.genesis.transactions[0], 0);
    assert!(utxo.contains(&outpoint));
    assert_eq!(utxo.total_value(), INITIAL_BLOCK_REWARD);
}

#[test]
fn test_double_genesis_rejected() {
    let chain = TestChain::new();
    assert!(chain.engine.initialize_genesis("again").is_err());
}

// ============ Block persistence ============

#[test]
fn test_blocks_roundtrip_through_store() {
    let chain = TestChain::new();
    let mined = chain.mine_chain(3);

    for (i, block) in mined.iter().enumerate() {
        let height = i as u32 + 1;
        let by_hash = chain
            .engine
            .chain_store()
            .get_block_by_hash(&block.hash())
            .unwrap()
            .expect("connected block is stored");
        assert_eq!(&by_hash, block);
        assert_eq!(by_hash.header.height, height);

        let by_height = chain
            .engine
            .chain_store()
            .get_block_by_height(height)
            .unwrap()
            .unwrap();
        assert_eq!(by_height.hash(), block.hash());
    }
}

#[test]
fn test_transactions_indexed_by_txid() {
    let chain = TestChain::new();
    let block = chain.mine_next(Vec::new());
    let txid = block.transactions[0].txid();

    let store = chain.engine.chain_store();
    assert!(store.has_tx(&txid).unwrap());
    assert_eq!(store.get_tx(&txid).unwrap().unwrap().txid(), txid);
}

// ============ Chain growth ============

#[test]
fn test_chain_extends_with_mined_blocks() {
    let chain = TestChain::new();
    let blocks = chain.mine_chain(5);

    assert_eq!(chain.engine.height(), 5);
    assert_eq!(chain.engine.best_block_hash(), blocks[4].hash());
    // One coinbase output per block plus genesis.
    assert_eq!(chain.engine.utxo_snapshot().len(), 6);
    assert_eq!(chain.engine.current_bits(), EASY_BITS);
}

#[test]
fn test_cumulative_work_grows_monotonically() {
    let chain = TestChain::new();
    let mut previous = chain.engine.cumulative_work();
    for _ in 0..4 {
        chain.mine_next(Vec::new());
        let work = chain.engine.cumulative_work();
        assert!(work > previous);
        previous = work;
    }
}

#[test]
fn test_timestamps_monotonic_per_harness() {
    // The harness schedule spaces blocks at the target interval.
    assert_eq!(TestChain::timestamp_at(0), GENESIS_TIMESTAMP);
    assert_eq!(TestChain::timestamp_at(3), GENESIS_TIMESTAMP + 1_800);
}

#[test]
fn test_verify_chain_passes_and_detects_gaps() {
    let chain = TestChain::new();
    chain.mine_chain(4);
    chain.engine.verify_chain().unwrap();

    // Punch a hole in the height index: verification must notice.
    chain
        .engine
        .chain_store()
        .storage()
        .delete(edunet_storage::Column::HeightIndex, &2u32.to_be_bytes())
        .unwrap();
    assert!(chain.engine.verify_chain().is_err());
}

#[test]
fn test_duplicate_block_ignored() {
    let chain = TestChain::new();
    let block = chain.mine_next(Vec::new());
    let selection = chain.engine.ingest_block(block).unwrap();
    assert_eq!(selection, edunet_consensus::ChainSelection::Ignored);
    assert_eq!(chain.engine.height(), 1);
}
