// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Hash strategies.
//!
//! The table needs a deterministic key → machine word function. Hash quality
//! affects displacement depth and thus the achievable load factor, but never
//! correctness.

use crate::layout::Key;

/// A pure hash function over table keys.
///
/// Implementations must be deterministic and free of global state for the
/// lifetime of any table using them.
pub trait KeyHasher {
    /// Maps a key to a machine word with reasonable avalanche.
    fn hash(&self, key: Key) -> u64;
}

/// Reference hash: the CRC32 checksum of the key's little-endian bytes,
/// folded into a 64-bit word by mirroring the checksum into both halves.
///
/// The fold makes the upper half usable for secondary addressing without a
/// second checksum pass. CRC is hardware-accelerated on all targets this
/// crate cares about.
#[derive(Copy, Clone, Debug, Default)]
pub struct CrcFoldHasher;

impl KeyHasher for CrcFoldHasher {
    fn hash(&self, key: Key) -> u64 {
        let crc = u64::from(crc32fast::hash(&key.to_le_bytes()));
        (crc << 32) | crc
    }
}

/// xxh3-based hash, for workloads whose key patterns defeat the CRC fold.
#[derive(Copy, Clone, Debug, Default)]
pub struct Xxh3Hasher;

impl KeyHasher for Xxh3Hasher {
    fn hash(&self, key: Key) -> u64 {
        xxhash_rust::xxh3::xxh3_64(&key.to_le_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn crc_fold_mirrors_halves() {
        for key in [0, 1, 42, 0xDEAD_BEEF, Key::MAX - 1] {
            let h = CrcFoldHasher.hash(key);
            assert_eq!(h >> 32, h & 0xFFFF_FFFF);
        }
    }

    #[test]
    fn hashers_are_deterministic() {
        for key in [0, 1, 42, Key::MAX - 1] {
            assert_eq!(CrcFoldHasher.hash(key), CrcFoldHasher.hash(key));
            assert_eq!(Xxh3Hasher.hash(key), Xxh3Hasher.hash(key));
        }
    }

    #[test]
    fn crc_fold_reaches_every_bucket() {
        // 64-bucket table: consecutive keys must spread over all bucket ids
        let buckets = (0..4_096u64)
            .map(|key| CrcFoldHasher.hash(key) & 63)
            .collect::<std::collections::HashSet<_>>();

        assert_eq!(64, buckets.len());
    }
}
