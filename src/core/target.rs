//! Target and difficulty arithmetic
//!
//! All hash-versus-target decisions run on 256-bit integers via
//! `num-bigint`; floating point appears only in the difficulty values
//! reported to callers and never in the block-found comparison.

use num_bigint::BigUint;
use num_traits::{ToPrimitive, Zero};
use once_cell::sync::Lazy;

use super::hash::reversed;

/// Sentinel difficulty reported for an (astronomically unlikely) all-zero hash.
const ZERO_HASH_DIFFICULTY: f64 = 1e18;

/// The pool difficulty-1 target:
/// `0x00000000FFFF...FFFF` over 256 bits.
static PDIFF1: Lazy<BigUint> = Lazy::new(|| {
    let mut bytes = [0xffu8; 32];
    bytes[0] = 0;
    bytes[1] = 0;
    bytes[2] = 0;
    bytes[3] = 0;
    BigUint::from_bytes_be(&bytes)
});

/// The pool difficulty-1 target (pdiff1).
pub fn pdiff1_target() -> &'static BigUint {
    &PDIFF1
}

/// Interpret a 32-byte header hash (internal, little-endian order) as a
/// 256-bit integer for target comparison.
///
/// The conventional comparison reverses the hash into display order
/// first and reads it big-endian.
pub fn hash_to_int(hash: &[u8; 32]) -> BigUint {
    BigUint::from_bytes_be(&reversed(hash))
}

/// Compute the share difficulty `pdiff1 / hash`.
///
/// Float conversion happens only at the very end; both operands fit f64
/// range comfortably (pdiff1 is roughly 2.7e67).
pub fn share_difficulty(hash_int: &BigUint) -> f64 {
    if hash_int.is_zero() {
        return ZERO_HASH_DIFFICULTY;
    }
    let num = PDIFF1.to_f64().unwrap_or(f64::MAX);
    let den = hash_int.to_f64().unwrap_or(f64::MAX);
    num / den
}

/// Expand a compact nBits target (8 hex chars, big-endian) to a 256-bit
/// integer.
///
/// The low 23 bits are the mantissa, the top 8 bits the exponent:
/// `target = mantissa << 8*(exp-3)` for exp > 3, shifted right for
/// smaller exponents. The sign bit (0x00800000) never appears in a valid
/// header; such encodings yield a zero target that no hash can meet.
pub fn compact_to_target(nbits_hex: &str) -> BigUint {
    let bytes = match hex::decode(nbits_hex) {
        Ok(b) if b.len() == 4 => b,
        _ => return BigUint::zero(),
    };
    let compact = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);

    if compact & 0x0080_0000 != 0 {
        return BigUint::zero();
    }

    let exponent = compact >> 24;
    let mantissa = BigUint::from(compact & 0x007f_ffff);

    if exponent <= 3 {
        mantissa >> (8 * (3 - exponent))
    } else {
        mantissa << (8 * (exponent - 3))
    }
}

/// Convert a pool difficulty to its share target: `pdiff1 / diff`.
///
/// Non-positive difficulties fall back to the difficulty-1 target.
pub fn difficulty_to_target(diff: f64) -> BigUint {
    if diff <= 0.0 {
        return PDIFF1.clone();
    }
    // Scale the divisor into integer space to keep fractional
    // difficulties (e.g. 0.001) exact enough for share decisions.
    const SCALE: u64 = 1_000_000;
    let scaled = (diff * SCALE as f64) as u128;
    if scaled == 0 {
        return PDIFF1.clone();
    }
    (&*PDIFF1 * BigUint::from(SCALE)) / BigUint::from(scaled)
}
