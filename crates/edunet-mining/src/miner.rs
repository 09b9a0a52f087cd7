//! The proof-of-work miner.

use crate::worker::{scan_range, Solution};
use crate::{MiningError, MiningOpResult};
use edunet_chain::compact::{self, compact_to_target_bytes};
use edunet_chain::BlockHeader;
use edunet_crypto::Hash256;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;
use tracing::{debug, info};

/// Full 32-bit nonce space.
const NONCE_SPACE: u64 = 1 << 32;

/// Outcome of a mining attempt.
#[derive(Debug, Clone)]
pub struct MiningResult {
    /// Whether a satisfying nonce was found.
    pub success: bool,
    /// The winning nonce (zero on failure).
    pub nonce: u32,
    /// The winning header hash (zero on failure).
    pub hash: Hash256,
    /// Nonces attempted, aggregated across workers.
    pub iterations: u64,
    /// Wall-clock seconds spent.
    pub elapsed_seconds: f64,
}

impl MiningResult {
    fn failure(iterations: u64, elapsed_seconds: f64) -> Self {
        Self {
            success: false,
            nonce: 0,
            hash: Hash256::zero(),
            iterations,
            elapsed_seconds,
        }
    }

    /// Hashes per second over the attempt.
    pub fn hash_rate(&self) -> f64 {
        if self.elapsed_seconds > 0.0 {
            self.iterations as f64 / self.elapsed_seconds
        } else {
            0.0
        }
    }
}

/// Proof-of-work miner with cooperative cancellation.
pub struct PowMiner {
    worker_count: usize,
    stop: Arc<AtomicBool>,
}

impl PowMiner {
    /// Create a miner. `worker_count` of zero selects the logical core
    /// count.
    pub fn new(worker_count: usize) -> Self {
        Self {
            worker_count,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Effective number of parallel workers.
    pub fn worker_count(&self) -> usize {
        if self.worker_count == 0 {
            num_cpus::get().max(1)
        } else {
            self.worker_count
        }
    }

    /// Request that any in-flight mining stop. Workers observe the flag
    /// before their next nonce.
    pub fn stop_mining(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Search for a nonce on the calling thread, starting from zero.
    /// `max_iterations` of zero scans the full 32-bit space.
    pub fn mine(&self, header: &BlockHeader, max_iterations: u64) -> MiningOpResult<MiningResult> {
        let target =
            compact_to_target_bytes(header.n_bits).ok_or(MiningError::InvalidTarget(header.n_bits))?;

        self.stop.store(false, Ordering::SeqCst);
        let count = if max_iterations == 0 {
            NONCE_SPACE
        } else {
            max_iterations.min(NONCE_SPACE)
        };

        let start_time = Instant::now();
        let iterations = AtomicU64::new(0);
        let mut bytes = header.serialize();

        let found = scan_range(&mut bytes, &target, 0, count, &self.stop, &iterations);
        let elapsed = start_time.elapsed().as_secs_f64();
        let attempts = iterations.load(Ordering::Relaxed);

        Ok(match found {
            Some(Solution { nonce, hash }) => {
                debug!(nonce, iterations = attempts, "Nonce found");
                MiningResult {
                    success: true,
                    nonce,
                    hash,
                    iterations: attempts,
                    elapsed_seconds: elapsed,
                }
            }
            None => MiningResult::failure(attempts, elapsed),
        })
    }

    /// Search with parallel workers over disjoint contiguous ranges of the
    /// nonce space. The first worker to find a solution raises the shared
    /// stop flag; the rest halt within one nonce of observing it.
    pub fn mine_parallel(
        &self,
        header: &BlockHeader,
        max_iterations: u64,
    ) -> MiningOpResult<MiningResult> {
        let target =
            compact_to_target_bytes(header.n_bits).ok_or(MiningError::InvalidTarget(header.n_bits))?;

        let workers = self.worker_count();
        if workers <= 1 {
            return self.mine(header, max_iterations);
        }

        self.stop.store(false, Ordering::SeqCst);
        let range_size = NONCE_SPACE / workers as u64;
        let per_worker_cap = if max_iterations == 0 {
            range_size
        } else {
            (max_iterations / workers as u64).min(range_size)
        };

        let start_time = Instant::now();
        let iterations = AtomicU64::new(0);
        let header_bytes = header.serialize();
        let (solution_tx, solution_rx) = crossbeam_channel::bounded::<Solution>(workers);

        thread::scope(|scope| {
            for worker_id in 0..workers {
                let mut bytes = header_bytes.clone();
                let stop = Arc::clone(&self.stop);
                let iterations = &iterations;
                let tx = solution_tx.clone();
                let target = &target;

                scope.spawn(move || {
                    let start = (worker_id as u64 * range_size) as u32;
                    if let Some(solution) =
                        scan_range(&mut bytes, target, start, per_worker_cap, &stop, iterations)
                    {
                        // Winner: halt everyone else.
                        stop.store(true, Ordering::SeqCst);
                        let _ = tx.send(solution);
                    }
                });
            }
            drop(solution_tx);
        });

        let elapsed = start_time.elapsed().as_secs_f64();
        let attempts = iterations.load(Ordering::Relaxed);

        Ok(match solution_rx.try_recv() {
            Ok(Solution { nonce, hash }) => {
                info!(
                    nonce,
                    workers,
                    iterations = attempts,
                    "Parallel mining succeeded"
                );
                MiningResult {
                    success: true,
                    nonce,
                    hash,
                    iterations: attempts,
                    elapsed_seconds: elapsed,
                }
            }
            Err(_) => MiningResult::failure(attempts, elapsed),
        })
    }
}

/// Check a sealed header's proof of work: full 256-bit comparison of its
/// hash against its declared target.
pub fn verify_pow(header: &BlockHeader) -> bool {
    header.meets_target()
}

/// Expected seconds to mine at `n_bits` given a hash rate. Difficulty 1
/// corresponds to about 2^32 expected hashes.
pub fn estimate_mining_time(n_bits: u32, hash_rate: f64) -> f64 {
    let rate = if hash_rate > 0.0 { hash_rate } else { 1_000_000.0 };
    let expected_hashes = compact::difficulty(n_bits) * (NONCE_SPACE as f64);
    expected_hashes / rate
}
