//! Merkle branch computation for Stratum jobs
//!
//! Stratum does not ship a full merkle tree to miners. It ships the list
//! of sibling hashes along the coinbase-to-root path; the miner rebuilds
//! the coinbase from `coinb1 || extranonce1 || extranonce2 || coinb2`,
//! hashes it, and folds the branches in to reach the root. The coinbase
//! hash itself is therefore never part of the branch list.

use super::hash::double_sha256;

/// Compute the Stratum merkle branches for a transaction set.
///
/// `tx_hashes` are the non-coinbase transaction hashes in internal byte
/// order, in template order. At each tree level the first element is the
/// sibling paired with the running coinbase-path hash; the remaining
/// elements reduce pairwise (duplicating the last when the count is odd)
/// to form the next level.
pub fn merkle_branches_for_stratum(tx_hashes: &[[u8; 32]]) -> Vec<[u8; 32]> {
    let mut branches = Vec::new();
    let mut level: Vec<[u8; 32]> = tx_hashes.to_vec();

    while !level.is_empty() {
        branches.push(level[0]);

        if level.len() == 1 {
            break;
        }

        let remaining = &level[1..];
        let mut next = Vec::with_capacity(remaining.len() / 2 + 1);
        let mut i = 0;
        while i < remaining.len() {
            let left = remaining[i];
            let right = if i + 1 < remaining.len() {
                remaining[i + 1]
            } else {
                left // duplicate last on odd count
            };
            let mut combined = [0u8; 64];
            combined[..32].copy_from_slice(&left);
            combined[32..].copy_from_slice(&right);
            next.push(double_sha256(&combined));
            i += 2;
        }
        level = next;
    }

    branches
}

/// Fold the branch list into the coinbase hash to produce the merkle root.
///
/// Used during share validation: `root = dsha(dsha(cb || b0) || b1) ...`
/// with the coinbase hash always on the left.
pub fn compute_merkle_root(coinbase_hash: [u8; 32], branches: &[[u8; 32]]) -> [u8; 32] {
    let mut current = coinbase_hash;
    for branch in branches {
        let mut combined = [0u8; 64];
        combined[..32].copy_from_slice(&current);
        combined[32..].copy_from_slice(branch);
        current = double_sha256(&combined);
    }
    current
}

#[cfg(test)]
mod tests {
    use super::*;

    fn h(n: u8) -> [u8; 32] {
        [n; 32]
    }

    /// Reference implementation: classic bottom-up Bitcoin merkle tree
    /// over the full leaf set (coinbase included).
    fn full_merkle_root(leaves: &[[u8; 32]]) -> [u8; 32] {
        let mut level: Vec<[u8; 32]> = leaves.to_vec();
        while level.len() > 1 {
            let mut next = Vec::with_capacity(level.len() / 2 + 1);
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
        level[0]
    }

    #[test]
    fn test_empty_tx_set_has_no_branches() {
        assert!(merkle_branches_for_stratum(&[]).is_empty());
    }

    #[test]
    fn test_single_tx_single_branch() {
        let branches = merkle_branches_for_stratum(&[h(1)]);
        assert_eq!(branches, vec![h(1)]);

        // Root must equal the two-leaf tree [coinbase, tx]
        let coinbase = h(9);
        let root = compute_merkle_root(coinbase, &branches);
        assert_eq!(root, full_merkle_root(&[coinbase, h(1)]));
    }

    #[test]
    fn test_branches_match_full_tree() {
        // Sweep transaction counts covering odd/even levels and
        // last-element duplication.
        for n in 1..=9usize {
            let txs: Vec<[u8; 32]> = (1..=n as u8).map(h).collect();
            let branches = merkle_branches_for_stratum(&txs);

            let coinbase = h(0xcb);
            let root = compute_merkle_root(coinbase, &branches);

            let mut leaves = vec![coinbase];
            leaves.extend_from_slice(&txs);
            assert_eq!(
                root,
                full_merkle_root(&leaves),
                "branch fold diverged from full tree at {} transactions",
                n
            );
        }
    }

    #[test]
    fn test_branch_count_is_logarithmic() {
        let txs: Vec<[u8; 32]> = (0..7u8).map(h).collect();
        // 7 txs + coinbase = 8 leaves -> 3 levels of siblings
        assert_eq!(merkle_branches_for_stratum(&txs).len(), 3);
    }

    #[test]
    fn test_no_branches_root_is_coinbase() {
        let coinbase = h(0xab);
        assert_eq!(compute_merkle_root(coinbase, &[]), coinbase);
    }
}
