//! Fork resolution and chain reorganization.

use crate::generators::outpoint_of;
use crate::harness::{mine_detached, TestChain};
use edunet_chain::constants::INITIAL_BLOCK_REWARD;
use edunet_chain::Block;
use edunet_consensus::{ChainSelection, ConsensusError};
use edunet_crypto::Hash256;

/// Mine a detached branch of `length` blocks on `base`, starting at
/// `base_height + 1`. `offset` disambiguates competing branches.
fn branch(base: Hash256, base_height: u32, length: u32, offset: u32) -> Vec<Block> {
    let mut blocks = Vec::with_capacity(length as usize);
    let mut prev = base;
    for i in 0..length {
        let height = base_height + 1 + i;
        let block = mine_detached(prev, height, INITIAL_BLOCK_REWARD, Vec::new(), offset);
        prev = block.hash();
        blocks.push(block);
    }
    blocks
}

// ============ Reorganization (scenario E7) ============

#[test]
fn test_longer_side_chain_reorganizes() {
    let chain = TestChain::new();
    let main = chain.mine_chain(5);

    // A side branch sharing the three-block prefix, reaching height 6.
    let side = branch(main[2].hash(), 3, 3, 7);

    assert_eq!(
        chain.engine.ingest_block(side[0].clone()).unwrap(),
        ChainSelection::SideChain,
        "one branch block against two main blocks stays aside"
    );
    assert_eq!(
        chain.engine.ingest_block(side[1].clone()).unwrap(),
        ChainSelection::SideChain,
        "equal work keeps the incumbent tip"
    );
    assert_eq!(
        chain.engine.ingest_block(side[2].clone()).unwrap(),
        ChainSelection::Reorganized {
            fork_height: 3,
            disconnected: 2,
            connected: 3,
        }
    );

    assert_eq!(chain.engine.height(), 6);
    assert_eq!(chain.engine.best_block_hash(), side[2].hash());

    // The UTXO set reflects the new branch only: genesis + three shared
    // prefix coinbases + three branch coinbases.
    let utxo = chain.engine.utxo_snapshot();
    assert_eq!(utxo.len(), 7);
    for block in &side {
        assert!(utxo.contains(&outpoint_of(&block.transactions[0], 0)));
    }
    for block in &main[3..] {
        assert!(!utxo.contains(&outpoint_of(&block.transactions[0], 0)));
    }

    // The height index follows the new branch.
    let store = chain.engine.chain_store();
    for (i, block) in side.iter().enumerate() {
        assert_eq!(
            store.get_block_by_height(4 + i as u32).unwrap().unwrap().hash(),
            block.hash()
        );
    }
}

#[test]
fn test_reorg_restores_spent_outputs() {
    let chain = TestChain::new();
    chain.mine_chain(edunet_chain::constants::COINBASE_MATURITY);
    let genesis_out = outpoint_of(&chain.genesis.transactions[0], 0);

    // Main chain block spends the genesis coinbase.
    let spend = crate::generators::spend_to(genesis_out, &[INITIAL_BLOCK_REWARD - 1_000]);
    chain.mine_next(vec![spend.clone()]);
    let tip_before = chain.engine.height();
    assert!(!chain.engine.utxo_snapshot().contains(&genesis_out));

    // A heavier empty branch from just below the spend replaces it.
    let base = chain
        .engine
        .chain_store()
        .get_block_by_height(tip_before - 1)
        .unwrap()
        .unwrap();
    let side = branch(base.hash(), tip_before - 1, 2, 11);
    chain.engine.ingest_block(side[0].clone()).unwrap();
    let selection = chain.engine.ingest_block(side[1].clone()).unwrap();
    assert!(matches!(selection, ChainSelection::Reorganized { .. }));

    // The rolled-back spend's input is unspent again; its outputs vanish.
    let utxo = chain.engine.utxo_snapshot();
    assert!(utxo.contains(&genesis_out));
    assert!(!utxo.contains(&outpoint_of(&spend, 0)));
}

// ============ Convergence (property 9) ============

#[test]
fn test_convergence_independent_of_arrival_order() {
    // Branch A (three blocks) outweighs branch B (two blocks). Whichever
    // arrives first, the tip ends at A's head.
    let tip_a = {
        let chain = TestChain::new();
        let main = chain.mine_chain(2);
        let base = main[1].hash();
        let a = branch(base, 2, 3, 1);
        let b = branch(base, 2, 2, 2);
        for block in b.iter().chain(a.iter()) {
            chain.engine.ingest_block(block.clone()).unwrap();
        }
        assert_eq!(chain.engine.best_block_hash(), a[2].hash());
        chain.engine.best_block_hash()
    };

    let tip_b = {
        let chain = TestChain::new();
        let main = chain.mine_chain(2);
        let base = main[1].hash();
        let a = branch(base, 2, 3, 1);
        let b = branch(base, 2, 2, 2);
        for block in a.iter().chain(b.iter()) {
            chain.engine.ingest_block(block.clone()).unwrap();
        }
        assert_eq!(chain.engine.best_block_hash(), a[2].hash());
        chain.engine.best_block_hash()
    };

    assert_eq!(tip_a, tip_b, "both arrival orders converge on branch A");
}

#[test]
fn test_equal_work_keeps_incumbent() {
    let chain = TestChain::new();
    let main = chain.mine_chain(3);
    let tip = chain.engine.best_block_hash();

    // A competing branch of equal length and equal bits.
    let side = branch(main[1].hash(), 2, 1, 23);
    assert_eq!(
        chain.engine.ingest_block(side[0].clone()).unwrap(),
        ChainSelection::SideChain
    );
    assert_eq!(chain.engine.best_block_hash(), tip);
}

// ============ Orphans and invalid branches ============

#[test]
fn test_orphan_block_rejected() {
    let chain = TestChain::new();
    chain.mine_chain(2);

    let orphan = mine_detached(
        edunet_crypto::sha256(b"no such parent"),
        9,
        INITIAL_BLOCK_REWARD,
        Vec::new(),
        0,
    );
    let err = chain.engine.ingest_block(orphan).unwrap_err();
    assert!(matches!(err, ConsensusError::OrphanBlock(_)), "got {err:?}");
}

#[test]
fn test_invalid_branch_aborts_reorg_and_preserves_chain() {
    let chain = TestChain::new();
    let main = chain.mine_chain(3);
    let tip = chain.engine.best_block_hash();
    let utxo_before = chain.engine.utxo_snapshot();

    // A heavier branch whose second block overclaims its coinbase.
    let good = mine_detached(main[0].hash(), 2, INITIAL_BLOCK_REWARD, Vec::new(), 31);
    let bad = mine_detached(good.hash(), 3, INITIAL_BLOCK_REWARD + 1, Vec::new(), 31);
    let heavier = mine_detached(bad.hash(), 4, INITIAL_BLOCK_REWARD, Vec::new(), 31);

    chain.engine.ingest_block(good).unwrap();
    chain.engine.ingest_block(bad).unwrap();
    let err = chain.engine.ingest_block(heavier).unwrap_err();
    assert!(matches!(err, ConsensusError::ReorgFailed(_)), "got {err:?}");

    // The original chain is fully intact.
    assert_eq!(chain.engine.height(), 3);
    assert_eq!(chain.engine.best_block_hash(), tip);
    assert_eq!(chain.engine.utxo_snapshot().len(), utxo_before.len());
    for height in 1..=3 {
        assert_eq!(
            chain
                .engine
                .chain_store()
                .get_block_by_height(height)
                .unwrap()
                .unwrap()
                .hash(),
            main[height as usize - 1].hash()
        );
    }
}
