//! Compact-target ("nBits") arithmetic.
//!
//! A compact target packs a 256-bit threshold into 32 bits as
//! `exponent(8) || mantissa(24)`; the expanded value is
//! `mantissa * 256^(exponent - 3)`. A header satisfies proof-of-work when
//! its hash, read as a big-endian 256-bit integer, is less than or equal to
//! the expanded target. The comparison is always performed over the full
//! 256 bits.

use crate::constants::{HIGHEST_TARGET_BITS, LOWEST_TARGET_BITS};
use edunet_crypto::Hash256;
use num_bigint::BigUint;
use num_traits::{One, ToPrimitive, Zero};

/// Expand a compact target to its 256-bit value.
///
/// Returns `None` for encodings whose value is zero or does not fit in 256
/// bits.
pub fn compact_to_target(bits: u32) -> Option<BigUint> {
    let exponent = (bits >> 24) as u32;
    let mantissa = BigUint::from(bits & 0x00FF_FFFF);

    if mantissa.is_zero() {
        return None;
    }

    let target = if exponent <= 3 {
        mantissa >> (8 * (3 - exponent))
    } else {
        mantissa << (8 * (exponent - 3))
    };

    if target.is_zero() || target.bits() > 256 {
        return None;
    }
    Some(target)
}

/// Expand a compact target into a big-endian 32-byte array, the form used
/// for hash comparisons.
pub fn compact_to_target_bytes(bits: u32) -> Option<[u8; 32]> {
    let target = compact_to_target(bits)?;
    let raw = target.to_bytes_be();
    let mut out = [0u8; 32];
    out[32 - raw.len()..].copy_from_slice(&raw);
    Some(out)
}

/// Pack a 256-bit target into compact form, rounding down where the
/// mantissa cannot represent all significant bytes.
pub fn target_to_compact(target: &BigUint) -> u32 {
    if target.is_zero() {
        return 0;
    }

    let mut bytes = target.to_bytes_be();
    // The compact form has no sign bit; if the top byte would set it, shift
    // the mantissa down one byte.
    if bytes[0] & 0x80 != 0 {
        bytes.insert(0, 0);
    }

    let exponent = bytes.len() as u32;
    let mut mantissa = 0u32;
    for &b in bytes.iter().take(3) {
        mantissa = (mantissa << 8) | u32::from(b);
    }
    if bytes.len() < 3 {
        mantissa <<= 8 * (3 - bytes.len() as u32);
    }

    (exponent << 24) | mantissa
}

/// The difficulty-1 reference target.
pub fn max_target() -> BigUint {
    compact_to_target(LOWEST_TARGET_BITS).expect("reference target is valid")
}

/// The easiest target the protocol accepts.
pub fn easiest_target() -> BigUint {
    compact_to_target(HIGHEST_TARGET_BITS).expect("easiest target is valid")
}

/// Difficulty as a floating-point ratio `max_target / target`.
pub fn difficulty(bits: u32) -> f64 {
    let target = match compact_to_target(bits) {
        Some(t) => t,
        None => return 0.0,
    };
    let max = max_target().to_f64().unwrap_or(f64::MAX);
    let t = target.to_f64().unwrap_or(f64::MAX);
    max / t
}

/// Expected work to find a block at this target: `2^256 / (target + 1)`.
///
/// Malformed encodings count as one unit of work so a hostile header cannot
/// inflate a branch's cumulative work.
pub fn work(bits: u32) -> BigUint {
    match compact_to_target(bits) {
        Some(target) => (BigUint::one() << 256u32) / (target + BigUint::one()),
        None => BigUint::one(),
    }
}

/// A compact encoding is valid when it expands, round-trips, and its target
/// lies within the protocol bounds (hardest to easiest allowed).
pub fn is_valid_compact(bits: u32) -> bool {
    match compact_to_target(bits) {
        Some(target) => {
            target >= max_target() && target <= easiest_target() && target_to_compact(&target) == bits
        }
        None => false,
    }
}

/// Full 256-bit comparison of a hash (big-endian) against an expanded
/// target.
pub fn meets_target(hash: &Hash256, target: &[u8; 32]) -> bool {
    hash.as_bytes() <= target
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_target_expansion() {
        // 0x1D00FFFF => 0xFFFF * 256^(0x1D - 3)
        let target = compact_to_target(LOWEST_TARGET_BITS).unwrap();
        let expected = BigUint::from(0xFFFFu32) << (8 * (0x1D - 3));
        assert_eq!(target, expected);
    }

    #[test]
    fn test_compact_roundtrip() {
        for bits in [0x1D00_FFFFu32, 0x207F_FFFF, 0x1B0404CB, 0x1A05DB8B] {
            let target = compact_to_target(bits).unwrap();
            assert_eq!(target_to_compact(&target), bits, "roundtrip of {bits:#x}");
        }
    }

    #[test]
    fn test_zero_mantissa_invalid() {
        assert!(compact_to_target(0x1D00_0000).is_none());
        assert!(compact_to_target(0).is_none());
    }

    #[test]
    fn test_difficulty_of_reference_is_one() {
        let d = difficulty(LOWEST_TARGET_BITS);
        assert!((d - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_difficulty_scales_with_target() {
        // A target 256x smaller means 256x the difficulty.
        let harder = 0x1C00_FFFF;
        let d = difficulty(harder);
        assert!((d - 256.0).abs() < 1e-6);
    }

    #[test]
    fn test_work_monotonic_in_difficulty() {
        assert!(work(0x1C00_FFFF) > work(LOWEST_TARGET_BITS));
        assert!(work(LOWEST_TARGET_BITS) > work(HIGHEST_TARGET_BITS));
    }

    #[test]
    fn test_meets_target_boundary() {
        let target = compact_to_target_bytes(LOWEST_TARGET_BITS).unwrap();
        let exactly = Hash256::new(target);
        assert!(meets_target(&exactly, &target));

        let mut above = target;
        // Bump the most significant non-0xff byte.
        for byte in above.iter_mut() {
            if *byte != 0xFF {
                *byte += 1;
                break;
            }
        }
        assert!(!meets_target(&Hash256::new(above), &target));
    }

    #[test]
    fn test_zero_hash_meets_any_valid_target() {
        let target = compact_to_target_bytes(0x1B0404CB).unwrap();
        assert!(meets_target(&Hash256::zero(), &target));
    }

    #[test]
    fn test_is_valid_compact_bounds() {
        assert!(is_valid_compact(LOWEST_TARGET_BITS));
        assert!(is_valid_compact(HIGHEST_TARGET_BITS));
        // Harder than the protocol floor.
        assert!(!is_valid_compact(0x1A00_FFFF));
        // Above the easiest allowed target.
        assert!(!is_valid_compact(0x2100_FFFF));
        assert!(!is_valid_compact(0));
    }

    #[test]
    fn test_sign_bit_shifts_mantissa() {
        // A target whose leading byte is >= 0x80 must re-encode with a
        // longer exponent rather than set the sign bit.
        let target = BigUint::from(0x80u32) << 16;
        let bits = target_to_compact(&target);
        assert_eq!(bits >> 24, 4);
        assert_eq!(compact_to_target(bits).unwrap(), target);
    }
}
