//! Property-based tests for the core primitives

use proptest::prelude::*;

use super::*;

proptest! {
    /// The 4-byte group swap is its own inverse on any 32-byte input.
    #[test]
    fn prop_group_swap_involution(bytes in prop::array::uniform32(any::<u8>())) {
        prop_assert_eq!(swap_u32_groups(&swap_u32_groups(&bytes)), bytes);
    }

    /// Display -> Stratum -> display round trip for the prevhash format.
    #[test]
    fn prop_stratum_prev_hash_round_trip(bytes in prop::array::uniform32(any::<u8>())) {
        let display = hex::encode(bytes);
        let transport = stratum_prev_hash(&display).unwrap();

        // Invert: decode, unswap groups, reverse
        let t: [u8; 32] = hex::decode(&transport).unwrap().try_into().unwrap();
        let mut back = swap_u32_groups(&t);
        back.reverse();
        prop_assert_eq!(hex::encode(back), display);
    }

    /// Folding Stratum branches into the coinbase hash equals the full
    /// merkle tree over [coinbase] ++ txs.
    #[test]
    fn prop_branches_equal_full_tree(
        coinbase in prop::array::uniform32(any::<u8>()),
        txs in prop::collection::vec(prop::array::uniform32(any::<u8>()), 1..20),
    ) {
        let branches = merkle_branches_for_stratum(&txs);
        let folded = compute_merkle_root(coinbase, &branches);

        let mut level: Vec<[u8; 32]> = std::iter::once(coinbase).chain(txs).collect();
        while level.len() > 1 {
            let mut next = Vec::new();
            let mut i = 0;
            while i < level.len() {
                let left = level[i];
                let right = if i + 1 < level.len() { level[i + 1] } else { left };
                let mut combined = [0u8; 64];
                combined[..32].copy_from_slice(&left);
                combined[32..].copy_from_slice(&right);
                next.push(double_sha256(&combined));
                i += 2;
            }
            level = next;
        }
        prop_assert_eq!(folded, level[0]);
    }

    /// Header construction is deterministic in its inputs.
    #[test]
    fn prop_header_deterministic(
        merkle in prop::array::uniform32(any::<u8>()),
        ntime in any::<u32>(),
        nonce in any::<u32>(),
    ) {
        let prev = "00000000000000000000000000000000000000000000000000000000000000ff";
        let ntime_hex = format!("{:08x}", ntime);
        let nonce_hex = format!("{:08x}", nonce);
        let a = build_block_header(
            "20000000", prev, &merkle, &ntime_hex, "1d00ffff", &nonce_hex, None, 0,
        ).unwrap();
        let b = build_block_header(
            "20000000", prev, &merkle, &ntime_hex, "1d00ffff", &nonce_hex, None, 0,
        ).unwrap();
        prop_assert_eq!(a, b);
        prop_assert_eq!(&a[68..72], &ntime.to_le_bytes());
    }
}
