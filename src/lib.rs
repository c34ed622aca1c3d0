// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! A cache-conscious bucketed cuckoo hash table for 64-bit integer keys.
//!
//! ##### About
//!
//! Every key has two home buckets derived from its hash. A bucket is a small
//! associative slab of slots pinned to a cache line (half a line for the set
//! variant, a full line for the map variant), probed with one pair of SIMD
//! compares. Inserting into two full buckets displaces a resident key to its
//! other home, chaining until the walk settles or a depth budget runs out.
//! Lookups for a window of independent keys can be batched so address
//! computation, prefetch and probing overlap across the window instead of
//! stalling serially ([`CuckooSet::find_batched`]).
//!
//! Intended as an embedded index for latency-sensitive services, such as
//! index structures inside storage engines, session tables and deduplication
//! filters, where keys are small machine integers and lookup throughput
//! dominates.
//!
//! Hashing and allocation are strategies injected as generic parameters
//! ([`KeyHasher`], [`BucketAllocator`]), so the probe path stays free of
//! virtual dispatch. The table is single-writer and not internally
//! synchronized: build it first, then share `&CuckooSet` (or an `Arc`) across
//! reader threads, optionally dispatching lookup windows through a
//! [`WorkerPool`].
//!
//! # Example usage
//!
//! ```
//! use cuckoo_table::{CuckooMap, MAX_LOOKUP_BATCH};
//!
//! let mut map = CuckooMap::with_capacity(1024)?;
//!
//! for key in 0..600 {
//!     map.insert(key, key * 10)?;
//! }
//!
//! let cursor = map.find(42).expect("key was inserted");
//! assert_eq!(420, map.value_at(cursor));
//!
//! // update the payload in place
//! *map.value_mut(cursor) = 7;
//! assert_eq!(Some(7), map.get(42));
//!
//! // batched lookup of one cache line worth of keys
//! let keys = [0, 1, 2, 3, 4, 5, 6, 7];
//! let mut results = [None; MAX_LOOKUP_BATCH];
//! map.find_batched(&keys, &mut results);
//! assert!(results.iter().all(Option::is_some));
//! #
//! # Ok::<(), cuckoo_table::Error>(())
//! ```

#![deny(clippy::all, missing_docs, clippy::cargo)]
#![deny(clippy::unwrap_used)]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(clippy::pedantic, clippy::nursery)]
#![warn(clippy::expect_used)]
#![warn(clippy::multiple_crate_versions)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::module_name_repetitions)]

mod alloc;
mod cursor;
mod error;
mod hash;
mod layout;
mod map;
mod pool;
mod probe;
mod set;

pub use {
    alloc::{BucketAllocator, HeapAllocator},
    cursor::Cursor,
    error::{Error, Result},
    hash::{CrcFoldHasher, KeyHasher, Xxh3Hasher},
    layout::{
        Key, Value, CACHE_LINE_SIZE, MAX_LOOKUP_BATCH, NULL_KEY, NULL_VALUE, SLOTS_PER_BUCKET,
    },
    map::CuckooMap,
    pool::WorkerPool,
    set::CuckooSet,
};

#[cfg(target_os = "linux")]
pub use alloc::HugePageAllocator;
