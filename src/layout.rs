// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Constants that pin the physical shape of the table.
//!
//! Buckets are sized and aligned so a bucket never straddles a cache line,
//! and the batched lookup window is one cache line worth of keys. Changing
//! the slot count requires re-deriving the SIMD probe in [`crate::probe`].

use std::alloc::Layout;

/// Assumed cache line size in bytes.
pub const CACHE_LINE_SIZE: usize = 64;

/// Fixed key type. The key width is part of the bucket layout.
pub type Key = u64;

/// Fixed value type of the map variant.
pub type Value = u64;

/// Reserved key denoting an empty slot.
///
/// Callers must not insert this value; behavior is undefined if they do.
pub const NULL_KEY: Key = Key::MAX;

/// Initializer for empty value slots. Carries no meaning after insertion.
pub const NULL_VALUE: Value = Value::MAX;

/// Slots per bucket.
pub const SLOTS_PER_BUCKET: usize = 4;

/// Maximum number of keys in one batched lookup window.
pub const MAX_LOOKUP_BATCH: usize = CACHE_LINE_SIZE / std::mem::size_of::<Key>();

const _: () = assert!(SLOTS_PER_BUCKET.is_power_of_two());
const _: () = assert!(MAX_LOOKUP_BATCH == 8);

/// Number of buckets backing a table of the requested capacity.
///
/// The slot count is rounded up to a power of two, never below one bucket, so
/// the bucket count is itself a power of two and bucket ids can be derived by
/// masking.
pub(crate) fn bucket_count_for(capacity: usize) -> usize {
    capacity.max(SLOTS_PER_BUCKET).next_power_of_two() / SLOTS_PER_BUCKET
}

/// Layout of a contiguous array of `num_buckets` buckets, aligned to a cache
/// line regardless of the bucket type's own alignment.
pub(crate) fn bucket_array_layout<B>(num_buckets: usize) -> crate::Result<Layout> {
    let size = std::mem::size_of::<B>()
        .checked_mul(num_buckets)
        .ok_or(crate::Error::CapacityOverflow)?;

    Layout::from_size_align(size, CACHE_LINE_SIZE).map_err(|_| crate::Error::CapacityOverflow)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn bucket_count_rounds_up() {
        assert_eq!(1, bucket_count_for(0));
        assert_eq!(1, bucket_count_for(1));
        assert_eq!(1, bucket_count_for(4));
        assert_eq!(2, bucket_count_for(5));
        assert_eq!(4, bucket_count_for(16));
        assert_eq!(8, bucket_count_for(17));
        assert_eq!(256, bucket_count_for(1024));
    }

    #[test]
    fn bucket_count_is_power_of_two() {
        for capacity in 0..10_000 {
            assert!(bucket_count_for(capacity).is_power_of_two());
            assert!(bucket_count_for(capacity) * SLOTS_PER_BUCKET >= capacity);
        }
    }
}
