//! Randomness: a deterministic PRNG for validator selection and secure
//! bytes for key material and miner start offsets.
//!
//! The deterministic generator is ChaCha8 seeded from the first 8 bytes of
//! a 256-bit seed hash. ChaCha is specified to produce an identical stream
//! for the same seed across releases, which makes it safe to use in a
//! consensus rule.

use crate::hash::Hash256;
use rand::{Rng, RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Deterministic PRNG used for stake-weighted validator selection.
pub struct DeterministicRng {
    inner: ChaCha8Rng,
}

impl DeterministicRng {
    /// Seed from a 256-bit hash: the first 8 bytes, big-endian, become the
    /// stream seed.
    pub fn from_seed_hash(seed: &Hash256) -> Self {
        let bytes = seed.as_bytes();
        let mut value = 0u64;
        for &b in bytes.iter().take(8) {
            value = (value << 8) | u64::from(b);
        }
        Self {
            inner: ChaCha8Rng::seed_from_u64(value),
        }
    }

    /// Uniform draw in `[0, 1)`.
    pub fn next_f64(&mut self) -> f64 {
        self.inner.gen::<f64>()
    }

    /// Next raw 64-bit value.
    pub fn next_u64(&mut self) -> u64 {
        self.inner.next_u64()
    }
}

/// Fill a buffer with cryptographically secure random bytes.
pub fn secure_bytes(buf: &mut [u8]) {
    rand::thread_rng().fill_bytes(buf);
}
