//! Engine configuration.

use serde::{Deserialize, Serialize};

/// Tunable consensus parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    /// Minimum stake accepted by `add_validator`.
    pub min_stake_amount: u64,
    /// Blocks a stake stays locked after it is added or updated.
    pub stake_maturity_blocks: u32,
    /// Height before which every slot is PoW.
    pub pos_activation_height: u32,
    /// Target fraction of PoW blocks in the hybrid regime.
    pub pow_target_ratio: f64,
    /// PoW miner parallelism; zero selects the logical core count.
    pub worker_count: usize,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            min_stake_amount: 1_000_000,
            stake_maturity_blocks: 100,
            pos_activation_height: 1_000,
            pow_target_ratio: 0.6,
            worker_count: 0,
        }
    }
}
