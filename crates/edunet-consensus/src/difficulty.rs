//! Difficulty retargeting, with a hybrid adjustment driven by the observed
//! PoW/PoS block ratio.
//!
//! The base rule is interval retargeting: every 2016 blocks the target
//! scales by `actual_span / expected_span`, with the span clamped to a
//! factor of four in either direction and the resulting target clamped to
//! the protocol bounds. The hybrid pass then nudges the target to steer
//! the chain toward its configured fraction of PoW blocks.

use edunet_chain::compact::{
    compact_to_target, easiest_target, is_valid_compact, max_target, target_to_compact,
};
use edunet_chain::constants::{DIFFICULTY_ADJUSTMENT_INTERVAL, TARGET_BLOCK_TIME};
use num_bigint::BigUint;
use tracing::debug;

/// Fixed-point scale for applying float ratio factors to targets.
const RATIO_SCALE: u64 = 1_000;

/// Interval-based difficulty controller.
#[derive(Debug, Clone)]
pub struct DifficultyController {
    interval: u32,
    target_spacing: u64,
}

impl Default for DifficultyController {
    fn default() -> Self {
        Self::new()
    }
}

impl DifficultyController {
    /// Controller with protocol parameters.
    pub fn new() -> Self {
        Self {
            interval: DIFFICULTY_ADJUSTMENT_INTERVAL,
            target_spacing: TARGET_BLOCK_TIME,
        }
    }

    /// Controller with custom parameters (for testing).
    pub fn with_params(interval: u32, target_spacing: u64) -> Self {
        Self {
            interval,
            target_spacing,
        }
    }

    /// Blocks per retarget interval.
    pub fn interval(&self) -> u32 {
        self.interval
    }

    /// Whether the block at `height` starts a new retarget interval.
    pub fn should_retarget(&self, height: u32) -> bool {
        height > 0 && height % self.interval == 0
    }

    /// Expected seconds per interval.
    pub fn expected_span(&self) -> u64 {
        u64::from(self.interval) * self.target_spacing
    }

    /// Base retarget: scale the current target by the observed span over
    /// the expected span. A shorter span means a smaller target (harder).
    pub fn retarget(&self, current_bits: u32, actual_span: u64) -> u32 {
        let expected = self.expected_span();
        let clamped = actual_span.clamp(expected / 4, expected.saturating_mul(4));

        let old_target = match compact_to_target(current_bits) {
            Some(t) => t,
            None => return current_bits,
        };

        let new_target = old_target * BigUint::from(clamped) / BigUint::from(expected);
        let bounded = clamp_target(new_target);
        let new_bits = target_to_compact(&bounded);

        debug!(
            current_bits = format_args!("{current_bits:#010x}"),
            new_bits = format_args!("{new_bits:#010x}"),
            actual_span = clamped,
            expected_span = expected,
            "Retargeted difficulty"
        );
        new_bits
    }

    /// Retarget, then steer toward the configured PoW ratio:
    /// - PoW under-represented: raise the target (lower difficulty) by up
    ///   to a factor of two to invite more PoW blocks.
    /// - PoW over-represented: shrink the target by up to a factor of 1.5.
    ///
    /// If the steered value does not survive compact round-tripping within
    /// the protocol bounds, the pre-hybrid value stands.
    pub fn hybrid_retarget(
        &self,
        current_bits: u32,
        actual_span: u64,
        pow_ratio: f64,
        pow_target_ratio: f64,
    ) -> u32 {
        let base_bits = self.retarget(current_bits, actual_span);
        let base_target = match compact_to_target(base_bits) {
            Some(t) => t,
            None => return base_bits,
        };

        let adjusted = if pow_ratio < pow_target_ratio {
            let factor = (pow_target_ratio / pow_ratio.max(0.1)).min(2.0);
            base_target * BigUint::from((factor * RATIO_SCALE as f64) as u64)
                / BigUint::from(RATIO_SCALE)
        } else if pow_ratio > pow_target_ratio {
            let factor = (pow_ratio / pow_target_ratio).min(1.5);
            base_target * BigUint::from(RATIO_SCALE)
                / BigUint::from((factor * RATIO_SCALE as f64) as u64)
        } else {
            return base_bits;
        };

        let bits = target_to_compact(&clamp_target(adjusted));
        if is_valid_compact(bits) {
            debug!(
                base_bits = format_args!("{base_bits:#010x}"),
                hybrid_bits = format_args!("{bits:#010x}"),
                pow_ratio,
                pow_target_ratio,
                "Hybrid difficulty adjustment"
            );
            bits
        } else {
            base_bits
        }
    }
}

/// Clamp a target into the protocol band `[hardest, easiest]`.
fn clamp_target(target: BigUint) -> BigUint {
    let hardest = max_target();
    let easiest = easiest_target();
    if target < hardest {
        hardest
    } else if target > easiest {
        easiest
    } else {
        target
    }
}
