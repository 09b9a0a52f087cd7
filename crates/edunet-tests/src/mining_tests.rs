//! Mining scenarios: trivial-difficulty search, parallel workers,
//! cancellation, verification.

use crate::harness::{TestChain, EASY_BITS};
use edunet_chain::Block;
use edunet_mining::{estimate_mining_time, verify_pow, PowMiner};
use std::sync::Arc;

fn easy_header() -> edunet_chain::BlockHeader {
    let mut block = Block::genesis("mining tests");
    block.header.n_bits = EASY_BITS;
    block.header
}

// ============ Trivial mining (scenario E2) ============

#[test]
fn test_mine_trivial_target_small_nonce() {
    let miner = PowMiner::new(1);
    let result = miner.mine(&easy_header(), 0).unwrap();

    assert!(result.success);
    assert!(
        result.nonce < 1 << 16,
        "a half-space target finds a nonce almost immediately, got {}",
        result.nonce
    );
    assert!(result.iterations >= 1);
    assert!(result.elapsed_seconds >= 0.0);
}

#[test]
fn test_mined_nonce_verifies() {
    let miner = PowMiner::new(1);
    let header = easy_header();
    let result = miner.mine(&header, 0).unwrap();

    let mut sealed = header;
    sealed.nonce = result.nonce;
    assert!(verify_pow(&sealed));
    assert_eq!(sealed.hash(), result.hash);
}

#[test]
fn test_wrong_nonce_fails_verification() {
    // At a hard target, an arbitrary nonce essentially never verifies.
    let mut header = easy_header();
    header.n_bits = 0x1D00_FFFF;
    header.nonce = 12_345;
    assert!(!verify_pow(&header));
}

// ============ Parallel mining ============

#[test]
fn test_parallel_matches_serial_verification() {
    let miner = PowMiner::new(4);
    let header = easy_header();
    let result = miner.mine_parallel(&header, 0).unwrap();

    assert!(result.success);
    let mut sealed = header;
    sealed.nonce = result.nonce;
    assert!(verify_pow(&sealed));
}

#[test]
fn test_parallel_iterations_aggregate() {
    let miner = PowMiner::new(4);
    let mut header = easy_header();
    header.n_bits = 0x1D00_FFFF; // no solution in a bounded scan
    let result = miner.mine_parallel(&header, 40_000).unwrap();

    assert!(!result.success);
    // Each of the four workers runs its share of the bound.
    assert_eq!(result.iterations, 40_000);
}

#[test]
fn test_stop_mining_via_engine() {
    let chain = Arc::new(TestChain::new());
    let mut template = chain
        .engine
        .build_template(
            crate::harness::test_script(),
            Vec::new(),
            TestChain::timestamp_at(1),
            false,
        )
        .unwrap();
    // Make the search hopeless so cancellation is what ends it.
    template.header.n_bits = 0x1D00_FFFF;
    template.clear_cache();

    let worker = {
        let chain = Arc::clone(&chain);
        std::thread::spawn(move || chain.engine.mine_pow(&template, 0))
    };
    std::thread::sleep(std::time::Duration::from_millis(50));
    chain.engine.stop_mining();

    let outcome = worker.join().unwrap();
    assert!(outcome.is_err(), "cancelled mining returns no block");
}

// ============ Estimation ============

#[test]
fn test_estimate_mining_time_scales() {
    let hash_rate = 1_000_000.0;
    let easy = estimate_mining_time(EASY_BITS, hash_rate);
    let reference = estimate_mining_time(0x1D00_FFFF, hash_rate);
    assert!(reference > easy);
    // Difficulty 1 at 1 MH/s is about 2^32 / 10^6 seconds.
    assert!((reference - 4_294.967_296).abs() / reference < 0.01);
}
