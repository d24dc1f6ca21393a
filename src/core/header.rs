//! 80-byte block header assembly
//!
//! All u32 header fields travel as big-endian hex on the Stratum wire
//! and sit little-endian in the serialized header. The prevhash arrives
//! in Stratum's group-swapped transport form and must be unswapped back
//! to internal order.

use super::hash::swap_u32_groups;
use crate::error::{Error, Result};

fn decode_u32_be(field: &'static str, hex_str: &str) -> Result<u32> {
    let bytes = hex::decode(hex_str).map_err(|e| Error::invalid_hex(field, e.to_string()))?;
    let arr: [u8; 4] = bytes
        .try_into()
        .map_err(|v: Vec<u8>| Error::invalid_length(field, 4, v.len()))?;
    Ok(u32::from_be_bytes(arr))
}

/// Construct the 80-byte block header from Stratum-form job fields and a
/// miner submission.
///
/// * `version_hex`, `nbits_hex`, `ntime_hex`, `nonce_hex`: 8 hex chars,
///   big-endian, written little-endian into the header.
/// * `prev_hash_hex`: 64 hex chars in Stratum transport form (internal
///   order with 4-byte groups swapped); unswapped here.
/// * `merkle_root`: already in internal byte order.
/// * `version_bits`/`version_mask`: BIP320 version rolling. The rolled
///   bits are masked and XORed into the base version; a zero mask
///   disables rolling entirely.
pub fn build_block_header(
    version_hex: &str,
    prev_hash_hex: &str,
    merkle_root: &[u8; 32],
    ntime_hex: &str,
    nbits_hex: &str,
    nonce_hex: &str,
    version_bits: Option<&str>,
    version_mask: u32,
) -> Result<[u8; 80]> {
    let mut header = [0u8; 80];

    let mut version = decode_u32_be("version", version_hex)?;
    if version_mask != 0 {
        if let Some(bits_hex) = version_bits {
            // Tolerate malformed version bits: miners that negotiated
            // rolling but send garbage get the base version.
            if let Ok(bits) = decode_u32_be("version_bits", bits_hex) {
                version ^= bits & version_mask;
            }
        }
    }
    header[0..4].copy_from_slice(&version.to_le_bytes());

    let prev: [u8; 32] = hex::decode(prev_hash_hex)
        .map_err(|e| Error::invalid_hex("prevhash", e.to_string()))?
        .try_into()
        .map_err(|v: Vec<u8>| Error::invalid_length("prevhash", 32, v.len()))?;
    header[4..36].copy_from_slice(&swap_u32_groups(&prev));

    header[36..68].copy_from_slice(merkle_root);

    header[68..72].copy_from_slice(&decode_u32_be("ntime", ntime_hex)?.to_le_bytes());
    header[72..76].copy_from_slice(&decode_u32_be("nbits", nbits_hex)?.to_le_bytes());
    header[76..80].copy_from_slice(&decode_u32_be("nonce", nonce_hex)?.to_le_bytes());

    Ok(header)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PREV: &str = "aabbccdd00000000000000000000000000000000000000000000000011223344";

    fn build(ntime: &str, nonce: &str, bits: Option<&str>, mask: u32) -> [u8; 80] {
        build_block_header(
            "20000000",
            PREV,
            &[0x42; 32],
            ntime,
            "207fffff",
            nonce,
            bits,
            mask,
        )
        .unwrap()
    }

    #[test]
    fn test_field_offsets_and_endianness() {
        let header = build("65abcdef", "deadbeef", None, 0);

        // Version 0x20000000 little-endian
        assert_eq!(&header[0..4], &[0x00, 0x00, 0x00, 0x20]);
        // ntime 0x65abcdef little-endian at 68
        assert_eq!(&header[68..72], &[0xef, 0xcd, 0xab, 0x65]);
        // nbits at 72
        assert_eq!(&header[72..76], &[0xff, 0xff, 0x7f, 0x20]);
        // nonce at 76
        assert_eq!(&header[76..80], &[0xef, 0xbe, 0xad, 0xde]);
        // merkle root untouched at 36
        assert_eq!(&header[36..68], &[0x42; 32]);
    }

    #[test]
    fn test_ntime_change_only_touches_its_field() {
        let a = build("65abcdef", "deadbeef", None, 0);
        let b = build("65abcd00", "deadbeef", None, 0);
        assert_eq!(&a[..68], &b[..68]);
        assert_ne!(&a[68..72], &b[68..72]);
        assert_eq!(&a[72..], &b[72..]);
    }

    #[test]
    fn test_version_rolling_applies_masked_bits() {
        let base = build("65abcdef", "deadbeef", None, 0);
        let rolled = build("65abcdef", "deadbeef", Some("1fffe000"), 0x1fffe000);

        let base_version = u32::from_le_bytes(base[0..4].try_into().unwrap());
        let rolled_version = u32::from_le_bytes(rolled[0..4].try_into().unwrap());
        assert_eq!(rolled_version, base_version ^ 0x1fffe000);
    }

    #[test]
    fn test_version_rolling_disabled_by_zero_mask() {
        let base = build("65abcdef", "deadbeef", None, 0);
        let ignored = build("65abcdef", "deadbeef", Some("1fffe000"), 0);
        assert_eq!(base, ignored);
    }

    #[test]
    fn test_version_bits_outside_mask_are_dropped() {
        let rolled = build("65abcdef", "deadbeef", Some("ffffffff"), 0x1fffe000);
        let version = u32::from_le_bytes(rolled[0..4].try_into().unwrap());
        assert_eq!(version, 0x20000000 ^ 0x1fffe000);
    }

    #[test]
    fn test_prev_hash_groups_unswapped() {
        let header = build("65abcdef", "deadbeef", None, 0);
        // Unswapping the transport form must invert the group swap
        let transport: [u8; 32] = hex::decode(PREV).unwrap().try_into().unwrap();
        assert_eq!(&header[4..36], &swap_u32_groups(&transport));
        assert_eq!(&header[4..8], &[0xdd, 0xcc, 0xbb, 0xaa]);
    }

    #[test]
    fn test_rejects_malformed_fields() {
        assert!(build_block_header(
            "20000000",
            PREV,
            &[0; 32],
            "65abcde", // 7 chars, odd length
            "207fffff",
            "deadbeef",
            None,
            0
        )
        .is_err());

        assert!(build_block_header(
            "20000000",
            "aabb", // short prevhash
            &[0; 32],
            "65abcdef",
            "207fffff",
            "deadbeef",
            None,
            0
        )
        .is_err());
    }
}
