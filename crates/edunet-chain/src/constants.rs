//! Protocol constants.
//!
//! Every value here is consensus-critical: changing one forks the chain.

/// Maximum serialized block size in bytes (4 MB).
pub const MAX_BLOCK_SIZE: usize = 4_000_000;

/// Maximum block weight, where weight = base_size * 3 + total_size.
pub const MAX_BLOCK_WEIGHT: usize = 4_000_000;

/// Maximum serialized transaction size in bytes.
pub const MAX_TRANSACTION_SIZE: usize = 100_000;

/// Minimum value for a non-coinbase output, in satoshi.
pub const DUST_THRESHOLD: u64 = 546;

/// Confirmations before a coinbase output may be spent.
pub const COINBASE_MATURITY: u32 = 100;

/// Maximum allowed block timestamp drift into the future, in seconds.
pub const MAX_TIMESTAMP_DRIFT: u64 = 7_200;

/// Number of previous block timestamps used for the median-time check.
pub const MEDIAN_TIME_SPAN: usize = 11;

/// Blocks between subsidy halvings.
pub const HALVING_INTERVAL: u32 = 210_000;

/// Initial block subsidy: 50 coins in satoshi.
pub const INITIAL_BLOCK_REWARD: u64 = 5_000_000_000;

/// Target spacing between blocks, in seconds.
pub const TARGET_BLOCK_TIME: u64 = 600;

/// Blocks between difficulty retargets.
pub const DIFFICULTY_ADJUSTMENT_INTERVAL: u32 = 2_016;

/// Minimum seconds between two blocks from the same validator.
pub const MIN_BLOCK_INTERVAL: u64 = 30;

/// Compact form of the hardest target the protocol allows.
/// Also the difficulty-1 reference target.
pub const LOWEST_TARGET_BITS: u32 = 0x1D00_FFFF;

/// Compact form of the easiest target the protocol allows
/// (used for trivial mining in tests).
pub const HIGHEST_TARGET_BITS: u32 = 0x207F_FFFF;

/// Genesis block timestamp.
pub const GENESIS_TIMESTAMP: u32 = 1_231_006_505;

/// Genesis block compact difficulty target.
pub const GENESIS_BITS: u32 = LOWEST_TARGET_BITS;

/// Block subsidy at a given height: halves every `HALVING_INTERVAL` blocks
/// and reaches zero after 64 halvings.
pub fn block_subsidy(height: u32) -> u64 {
    let halvings = height / HALVING_INTERVAL;
    if halvings >= 64 {
        0
    } else {
        INITIAL_BLOCK_REWARD >> halvings
    }
}
