//! Test harness: engines over throwaway stores, with trivial-difficulty
//! mining helpers.

use edunet_chain::constants::GENESIS_TIMESTAMP;
use edunet_chain::{Block, Transaction};
use edunet_consensus::{
    AlwaysValid, ChainSelection, ConsensusConfig, ConsensusEngine, ScriptVerifier,
};
use edunet_mining::PowMiner;
use edunet_storage::{MemoryStore, Storage};
use std::sync::Arc;

/// Compact target easy enough that every block mines in a few nonces.
pub const EASY_BITS: u32 = 0x207F_FFFF;

/// Locking script used by harness coinbases.
pub fn test_script() -> Vec<u8> {
    vec![0x51]
}

/// A consensus engine over an in-memory store, with genesis applied and
/// the difficulty dropped to [`EASY_BITS`].
pub struct TestChain {
    /// The engine under test.
    pub engine: ConsensusEngine,
    /// The genesis block.
    pub genesis: Block,
}

impl TestChain {
    /// A chain with PoS activation pushed out of reach (pure PoW).
    pub fn new() -> Self {
        let config = ConsensusConfig {
            pos_activation_height: u32::MAX,
            worker_count: 1,
            ..ConsensusConfig::default()
        };
        Self::with_config(config)
    }

    /// A chain with an explicit configuration.
    pub fn with_config(config: ConsensusConfig) -> Self {
        Self::with_storage(Arc::new(MemoryStore::new()), config, Arc::new(AlwaysValid))
    }

    /// A chain over a caller-provided store and script predicate.
    pub fn with_storage(
        storage: Arc<dyn Storage>,
        config: ConsensusConfig,
        script: Arc<dyn ScriptVerifier>,
    ) -> Self {
        let engine = ConsensusEngine::new(storage, config, script);
        let genesis = engine
            .initialize_genesis("Genesis Block")
            .expect("genesis applies on an empty store");
        engine
            .set_difficulty_bits(EASY_BITS)
            .expect("easy bits are a valid target");
        Self { engine, genesis }
    }

    /// Deterministic timestamp for the block at `height`.
    pub fn timestamp_at(height: u32) -> u32 {
        GENESIS_TIMESTAMP + height * 600
    }

    /// Build, mine and ingest the next PoW block; panics unless the chain
    /// extends.
    pub fn mine_next(&self, transactions: Vec<Transaction>) -> Block {
        let block = self.mine_next_unsubmitted(transactions);
        let selection = self
            .engine
            .ingest_block(block.clone())
            .expect("mined block is valid");
        assert_eq!(selection, ChainSelection::Extended);
        block
    }

    /// Build and mine the next PoW block without ingesting it.
    pub fn mine_next_unsubmitted(&self, transactions: Vec<Transaction>) -> Block {
        let height = self.engine.height() + 1;
        let template = self
            .engine
            .build_template(test_script(), transactions, Self::timestamp_at(height), false)
            .expect("template builds on the tip");
        self.engine
            .mine_pow(&template, 1 << 24)
            .expect("trivial difficulty mines quickly")
    }

    /// Mine `count` empty blocks.
    pub fn mine_chain(&self, count: u32) -> Vec<Block> {
        (0..count).map(|_| self.mine_next(Vec::new())).collect()
    }
}

impl Default for TestChain {
    fn default() -> Self {
        Self::new()
    }
}

/// Mine a detached block on an arbitrary parent (for building side
/// chains). `timestamp_offset` perturbs the header so competing branches
/// get distinct hashes.
pub fn mine_detached(
    prev_hash: edunet_crypto::Hash256,
    height: u32,
    reward: u64,
    transactions: Vec<Transaction>,
    timestamp_offset: u32,
) -> Block {
    let template = Block::build_template(
        prev_hash,
        height,
        EASY_BITS,
        TestChain::timestamp_at(height) + timestamp_offset,
        reward,
        test_script(),
        transactions,
    );
    let miner = PowMiner::new(1);
    let result = miner
        .mine(&template.header, 1 << 24)
        .expect("valid target");
    assert!(result.success, "trivial difficulty must mine");
    let mut block = template;
    block.header.nonce = result.nonce;
    block.clear_cache();
    block
}
