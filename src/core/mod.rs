//! Core mining primitives
//!
//! Bit-exact building blocks shared by job construction and share
//! validation: double-SHA256 hashing, Stratum endian conversions, merkle
//! branch computation, 80-byte block header assembly, and compact-target
//! arithmetic.

mod hash;
mod header;
mod merkle;
mod target;

pub use hash::{double_sha256, reverse_bytes, reversed, stratum_prev_hash, swap_u32_groups};
pub use header::build_block_header;
pub use merkle::{compute_merkle_root, merkle_branches_for_stratum};
pub use target::{
    compact_to_target, difficulty_to_target, hash_to_int, pdiff1_target, share_difficulty,
};

#[cfg(test)]
mod property_tests;
