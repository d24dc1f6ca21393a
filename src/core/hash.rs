//! Double-SHA256 and Stratum endian conversions
//!
//! Bitcoin hashes everything twice with SHA-256 and mixes three byte
//! orders on the wire: internal (little-endian), display (big-endian,
//! what block explorers show), and Stratum's prevhash form (internal
//! order with each 4-byte group swapped).

use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Compute SHA256(SHA256(data)).
pub fn double_sha256(data: &[u8]) -> [u8; 32] {
    let first = Sha256::digest(data);
    let second = Sha256::digest(first);
    second.into()
}

/// Reverse a byte slice in place.
pub fn reverse_bytes(bytes: &mut [u8]) {
    bytes.reverse();
}

/// Return a reversed copy of a 32-byte hash.
pub fn reversed(hash: &[u8; 32]) -> [u8; 32] {
    let mut out = *hash;
    out.reverse();
    out
}

/// Swap each 4-byte group of a 32-byte buffer.
///
/// This is Stratum's prevhash encoding step. The operation is its own
/// inverse, so the same function decodes the transport form back to
/// internal order.
pub fn swap_u32_groups(bytes: &[u8; 32]) -> [u8; 32] {
    let mut out = [0u8; 32];
    for group in 0..8 {
        let off = group * 4;
        out[off] = bytes[off + 3];
        out[off + 1] = bytes[off + 2];
        out[off + 2] = bytes[off + 1];
        out[off + 3] = bytes[off];
    }
    out
}

/// Convert a block hash from display order (as returned by
/// `getblocktemplate`) to Stratum's prevhash transport form.
///
/// Step 1: reverse all 32 bytes from display order to internal order.
/// Step 2: swap each 4-byte group (the legacy Stratum quirk).
pub fn stratum_prev_hash(display_hex: &str) -> Result<String> {
    let mut bytes: [u8; 32] = hex::decode(display_hex)
        .map_err(|e| Error::invalid_hex("prevhash", e.to_string()))?
        .try_into()
        .map_err(|v: Vec<u8>| Error::invalid_length("prevhash", 32, v.len()))?;
    bytes.reverse();
    Ok(hex::encode(swap_u32_groups(&bytes)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_double_sha256_known_vector() {
        // SHA256d of the empty string
        let hash = double_sha256(b"");
        assert_eq!(
            hex::encode(hash),
            "5df6e0e2761359d30a8275058e299fcc0381534545f55cf43e41983f5d4c9456"
        );
    }

    #[test]
    fn test_double_sha256_hello() {
        let hash = double_sha256(b"hello");
        assert_eq!(
            hex::encode(hash),
            "9595c9df90075148eb06860365df33584b75bff782a510c6cd4883a419833d50"
        );
    }

    #[test]
    fn test_reversed() {
        let mut input = [0u8; 32];
        input[0] = 0x01;
        input[31] = 0xff;
        let out = reversed(&input);
        assert_eq!(out[0], 0xff);
        assert_eq!(out[31], 0x01);
        // Original untouched
        assert_eq!(input[0], 0x01);
    }

    #[test]
    fn test_swap_u32_groups_is_involution() {
        let mut input = [0u8; 32];
        for (i, b) in input.iter_mut().enumerate() {
            *b = i as u8;
        }
        let swapped = swap_u32_groups(&input);
        assert_ne!(swapped, input);
        assert_eq!(swap_u32_groups(&swapped), input);
    }

    #[test]
    fn test_stratum_prev_hash_groups() {
        // Display-order hash 000000..0102030405060708...; after full
        // reversal the last display bytes become the first internal
        // bytes, then each group of 4 is swapped.
        let display = "00000000000000000000000000000000000000000000000001020304aabbccdd";
        let out = stratum_prev_hash(display).unwrap();
        assert_eq!(out.len(), 64);
        // Internal order starts ddccbbaa 04030201; group swap restores
        // the display grouping within each word.
        assert!(out.starts_with("aabbccdd01020304"));
    }

    #[test]
    fn test_stratum_prev_hash_rejects_bad_input() {
        assert!(stratum_prev_hash("zz").is_err());
        assert!(stratum_prev_hash("aabb").is_err());
    }
}
