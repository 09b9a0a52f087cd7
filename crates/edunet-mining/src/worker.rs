//! Nonce-range scanning.
//!
//! A worker owns one contiguous slice of the 32-bit nonce space. It writes
//! each candidate nonce into its private copy of the 80-byte header, hashes
//! it, and compares against the expanded target over the full 256 bits.
//! The shared stop flag is polled before every nonce, so cancellation takes
//! effect within one hash of being requested.

use edunet_chain::block::HEADER_NONCE_OFFSET;
use edunet_chain::compact;
use edunet_crypto::{double_sha256, Hash256};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// A found solution.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Solution {
    pub nonce: u32,
    pub hash: Hash256,
}

/// Scan `count` nonces starting at `start`, stopping early when `stop` is
/// raised. Every attempted nonce is added to `iterations`.
pub(crate) fn scan_range(
    header_bytes: &mut [u8],
    target: &[u8; 32],
    start: u32,
    count: u64,
    stop: &AtomicBool,
    iterations: &AtomicU64,
) -> Option<Solution> {
    for offset in 0..count {
        if stop.load(Ordering::Relaxed) {
            return None;
        }
        // The range never wraps: callers bound start + count to 2^32.
        let nonce = start.wrapping_add(offset as u32);
        header_bytes[HEADER_NONCE_OFFSET..HEADER_NONCE_OFFSET + 4]
            .copy_from_slice(&nonce.to_le_bytes());

        let hash = double_sha256(header_bytes);
        iterations.fetch_add(1, Ordering::Relaxed);

        if compact::meets_target(&hash, target) {
            return Some(Solution { nonce, hash });
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use edunet_chain::compact::compact_to_target_bytes;
    use edunet_chain::Block;

    #[test]
    fn test_scan_finds_trivial_target() {
        let mut block = Block::genesis("scan");
        block.header.n_bits = 0x207F_FFFF;
        let mut bytes = block.header.serialize();
        let target = compact_to_target_bytes(0x207F_FFFF).unwrap();

        let stop = AtomicBool::new(false);
        let iterations = AtomicU64::new(0);
        let found = scan_range(&mut bytes, &target, 0, 1 << 20, &stop, &iterations)
            .expect("trivial target should be hit quickly");

        // Re-check the winner independently.
        bytes[HEADER_NONCE_OFFSET..HEADER_NONCE_OFFSET + 4]
            .copy_from_slice(&found.nonce.to_le_bytes());
        assert_eq!(double_sha256(&bytes), found.hash);
        assert!(compact::meets_target(&found.hash, &target));
        assert!(iterations.load(Ordering::Relaxed) > 0);
    }

    #[test]
    fn test_stop_flag_halts_scan() {
        let block = Block::genesis("halt");
        let mut bytes = block.header.serialize();
        let target = compact_to_target_bytes(0x1D00_FFFF).unwrap();

        let stop = AtomicBool::new(true);
        let iterations = AtomicU64::new(0);
        let found = scan_range(&mut bytes, &target, 0, 1 << 16, &stop, &iterations);

        assert!(found.is_none());
        assert_eq!(iterations.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_exhausted_range_returns_none() {
        let mut block = Block::genesis("exhaust");
        block.header.n_bits = 0x1D00_FFFF;
        let mut bytes = block.header.serialize();
        // Impossibly hard for a few dozen attempts.
        let target = compact_to_target_bytes(0x1D00_FFFF).unwrap();

        let stop = AtomicBool::new(false);
        let iterations = AtomicU64::new(0);
        let found = scan_range(&mut bytes, &target, 0, 64, &stop, &iterations);

        assert!(found.is_none());
        assert_eq!(iterations.load(Ordering::Relaxed), 64);
    }
}
