//! # edunet-mining
//!
//! Proof-of-work nonce search for the EduNet consensus core.
//!
//! The miner is a blocking call: `mine` scans nonces on the calling thread,
//! `mine_parallel` splits the 32-bit nonce space into contiguous ranges
//! across worker threads. Workers share an atomic stop flag (polled before
//! every nonce) and an aggregate iteration counter; `stop_mining` sets the
//! same flag cooperatively.

mod error;
mod miner;
mod worker;

pub use error::{MiningError, MiningResult as MiningOpResult};
pub use miner::{estimate_mining_time, verify_pow, MiningResult, PowMiner};
