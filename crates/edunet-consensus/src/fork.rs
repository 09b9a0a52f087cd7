//! Fork detection and branch-work accounting.
//!
//! When a valid block arrives on a non-best branch, the resolver walks its
//! parent links back to the fork point on the main chain, gathers both
//! branches, and weighs them by cumulative work. In the hybrid regime a
//! PoS block additionally contributes a term proportional to its
//! producer's share of the total stake.

use crate::{ConsensusError, ConsensusResult, StakeRegistry};
use edunet_chain::{compact, Block};
use edunet_crypto::Hash256;
use edunet_state::ChainStore;
use num_bigint::BigUint;
use num_traits::Zero;
use tracing::debug;

/// Both sides of a detected fork, fork point excluded, ascending by
/// height.
#[derive(Debug)]
pub struct ForkInfo {
    /// Hash of the last common block.
    pub fork_point: Hash256,
    /// Height of the last common block.
    pub fork_height: u32,
    /// Main-chain blocks above the fork point.
    pub main_chain: Vec<Block>,
    /// Alternative-branch blocks above the fork point.
    pub alt_chain: Vec<Block>,
    /// Weighted work of the main branch.
    pub main_work: BigUint,
    /// Weighted work of the alternative branch.
    pub alt_work: BigUint,
}

impl ForkInfo {
    /// Whether the alternative branch strictly outweighs the main branch.
    /// Equal work keeps the incumbent tip.
    pub fn alt_is_heavier(&self) -> bool {
        self.alt_work > self.main_work
    }
}

/// Trace the fork for `new_block` (already stored, heights assigned) and
/// weigh both branches.
pub(crate) fn trace_fork(
    chain: &ChainStore,
    new_block: &Block,
    tip_height: u32,
    registry: &StakeRegistry,
    hybrid_active: bool,
) -> ConsensusResult<ForkInfo> {
    // Walk parent links until a block on the main chain.
    let mut alt_chain = vec![new_block.clone()];
    let (fork_point, fork_height) = loop {
        let cursor = alt_chain.last().expect("alt chain is never empty");
        let parent_hash = cursor.header.prev_block_hash;
        if parent_hash.is_zero() {
            return Err(ConsensusError::ReorgFailed(
                "branch does not connect above genesis".into(),
            ));
        }
        let parent = chain
            .get_block_by_hash(&parent_hash)
            .map_err(ConsensusError::from)?
            .ok_or_else(|| ConsensusError::OrphanBlock(parent_hash.to_string()))?;

        if chain.hash_at_height(parent.header.height)? == Some(parent_hash) {
            break (parent_hash, parent.header.height);
        }
        alt_chain.push(parent);
    };
    alt_chain.reverse();

    // Heights must be contiguous above the fork point.
    for (offset, block) in alt_chain.iter().enumerate() {
        let expected = fork_height + 1 + offset as u32;
        if block.header.height != expected {
            return Err(ConsensusError::StateInconsistent(format!(
                "alternative branch height {} where {} expected",
                block.header.height, expected
            )));
        }
    }

    let mut main_chain = Vec::with_capacity((tip_height - fork_height) as usize);
    for height in fork_height + 1..=tip_height {
        let block = chain
            .get_block_by_height(height)?
            .ok_or_else(|| ConsensusError::BlockNotFound(format!("main chain height {height}")))?;
        main_chain.push(block);
    }

    let main_work = branch_work(&main_chain, registry, hybrid_active);
    let alt_work = branch_work(&alt_chain, registry, hybrid_active);

    debug!(
        fork_height,
        main_len = main_chain.len(),
        alt_len = alt_chain.len(),
        main_work = %main_work,
        alt_work = %alt_work,
        "Fork traced"
    );

    Ok(ForkInfo {
        fork_point,
        fork_height,
        main_chain,
        alt_chain,
        main_work,
        alt_work,
    })
}

/// Cumulative weighted work of a branch: the PoW work of every header,
/// plus (when the hybrid regime is active) a stake-share term for each
/// PoS block.
pub(crate) fn branch_work(
    blocks: &[Block],
    registry: &StakeRegistry,
    hybrid_active: bool,
) -> BigUint {
    let mut total = BigUint::zero();
    for block in blocks {
        let base = compact::work(block.header.n_bits);
        if hybrid_active {
            if let Some(seal) = block.pos_seal() {
                if let Some(validator) = registry.get(&seal.validator_id) {
                    let total_stake = registry.total_stake().max(1);
                    // Stake-share bonus, at most doubling the block's work.
                    let bonus = &base * BigUint::from(validator.stake_amount)
                        / BigUint::from(total_stake);
                    total += bonus;
                }
            }
        }
        total += base;
    }
    total
}
