// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Set variant: keys only, half-cache-line buckets.

mod bucket;

use std::alloc::Layout;
use std::ptr::NonNull;

use crate::alloc::{BucketAllocator, HeapAllocator};
use crate::cursor::Cursor;
use crate::hash::{CrcFoldHasher, KeyHasher};
use crate::layout::{
    bucket_array_layout, bucket_count_for, Key, CACHE_LINE_SIZE, MAX_LOOKUP_BATCH, NULL_KEY,
    SLOTS_PER_BUCKET,
};
use crate::probe::prefetch_read;

use bucket::Bucket;

/// Default displacement walk depth budget.
const DEFAULT_WALK_DEPTH: usize = 256;

/// A bucketed cuckoo hash set over 64-bit keys.
///
/// Every key has two home buckets derived from its hash; a lookup probes at
/// most two cache lines, each with a single pair of SIMD compares. Inserting
/// into two full buckets displaces a resident key to its other home, chaining
/// until the walk settles or its depth budget runs out.
///
/// The table is single-writer: all mutation goes through `&mut self`, and
/// nothing mutates under `&self`, so a built table can be shared freely
/// across reader threads (see [`CuckooSet::find_batched`] for the batched
/// lookup pipeline those readers typically drive).
///
/// The key `u64::MAX` is reserved as the empty sentinel and must not be
/// inserted.
///
/// # Example
///
/// ```
/// use cuckoo_table::CuckooSet;
///
/// let mut set = CuckooSet::with_capacity(64)?;
/// set.insert(17)?;
///
/// assert!(set.find(17).is_some());
/// assert!(set.find(99).is_none());
/// #
/// # Ok::<(), cuckoo_table::Error>(())
/// ```
pub struct CuckooSet<H = CrcFoldHasher, A: BucketAllocator = HeapAllocator> {
    hasher: H,
    allocator: A,

    storage: NonNull<Bucket>,
    layout: Layout,
    num_buckets: usize,
    bucket_mask: usize,

    len: usize,

    /// Rotating displacement victim index; single-writer, so unsynchronized.
    victim: usize,
    walk_depth: usize,

    /// Trail of (bucket, slot) displacements, kept so a depth-capped walk can
    /// be unwound completely.
    trail: Vec<(usize, usize)>,
}

// SAFETY: the bucket array is owned exclusively by the table; `&self` methods
// never mutate it and all mutation requires `&mut self`.
unsafe impl<H: Send, A: BucketAllocator + Send> Send for CuckooSet<H, A> {}
unsafe impl<H: Sync, A: BucketAllocator + Sync> Sync for CuckooSet<H, A> {}

impl CuckooSet<CrcFoldHasher, HeapAllocator> {
    /// Creates a set with the default strategies (CRC-fold hash, heap
    /// allocation), rounding `capacity` up to a power-of-two slot count.
    pub fn with_capacity(capacity: usize) -> crate::Result<Self> {
        Self::with_strategies(capacity, CrcFoldHasher, HeapAllocator)
    }
}

impl<H: KeyHasher, A: BucketAllocator> CuckooSet<H, A> {
    /// Creates a set with explicit hash and allocator strategies.
    pub fn with_strategies(capacity: usize, hasher: H, allocator: A) -> crate::Result<Self> {
        Self::with_walk_depth(capacity, hasher, allocator, DEFAULT_WALK_DEPTH)
    }

    /// Creates a set with an explicit displacement depth budget.
    ///
    /// The default of 256 is a tunable, not a fundamental constant: a deeper
    /// budget trades worst-case insert latency for a slightly higher
    /// achievable load factor.
    pub fn with_walk_depth(
        capacity: usize,
        hasher: H,
        allocator: A,
        walk_depth: usize,
    ) -> crate::Result<Self> {
        let num_buckets = bucket_count_for(capacity);
        let layout = bucket_array_layout::<Bucket>(num_buckets)?;

        let raw = allocator.allocate(layout)?;

        if raw.as_ptr() as usize % CACHE_LINE_SIZE != 0 {
            // SAFETY: freshly allocated with `layout`, never used
            unsafe { allocator.deallocate(raw, layout) };
            return Err(crate::Error::UnalignedAllocation);
        }

        let storage = raw.cast::<Bucket>();

        // SAFETY: `layout` covers exactly `num_buckets` buckets
        unsafe {
            for idx in 0..num_buckets {
                storage.as_ptr().add(idx).write(Bucket::EMPTY);
            }
        }

        log::debug!(
            "allocated cuckoo set: {num_buckets} buckets, {} bytes",
            layout.size(),
        );

        Ok(Self {
            hasher,
            allocator,
            storage,
            layout,
            num_buckets,
            bucket_mask: num_buckets - 1,
            len: 0,
            victim: 0,
            walk_depth,
            trail: Vec::with_capacity(walk_depth),
        })
    }

    /// Number of live keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the set holds no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Live keys divided by total slots.
    #[must_use]
    pub fn load_factor(&self) -> f64 {
        self.len as f64 / self.slot_count() as f64
    }

    /// Number of buckets (a power of two).
    #[must_use]
    pub fn bucket_count(&self) -> usize {
        self.num_buckets
    }

    /// Total slot count (a power of two, at least the requested capacity).
    #[must_use]
    pub fn slot_count(&self) -> usize {
        self.num_buckets * SLOTS_PER_BUCKET
    }

    /// Looks up `key`, returning a cursor to its slot.
    #[must_use]
    pub fn find(&self, key: Key) -> Option<Cursor> {
        let hash = self.hasher.hash(key);
        let primary = self.primary_bucket(hash);

        if let Some(slot) = self.buckets()[primary].find_simd(key) {
            return Some(Cursor::new(primary, slot));
        }

        let partner = self.partner_bucket(hash, key);

        self.buckets()[partner]
            .find_simd(key)
            .map(|slot| Cursor::new(partner, slot))
    }

    /// Whether `key` is present.
    #[must_use]
    pub fn contains(&self, key: Key) -> bool {
        self.find(key).is_some()
    }

    /// Key stored at `cursor`.
    #[must_use]
    pub fn key_at(&self, cursor: Cursor) -> Key {
        self.buckets()[cursor.bucket].key(cursor.slot)
    }

    /// Looks up a window of independent keys, overlapping their memory
    /// stalls.
    ///
    /// `keys.len()` must not exceed [`MAX_LOOKUP_BATCH`] and `results` must
    /// be at least as long as `keys`. `results[i]` equals what
    /// [`CuckooSet::find`] returns for `keys[i]`.
    ///
    /// The window is processed in passes: hash and prefetch every key's
    /// primary bucket, probe the primaries, then compute and prefetch
    /// secondary buckets for the misses only, and probe those.
    ///
    /// # Panics
    ///
    /// Panics if the window is oversized or the result slab is too short.
    pub fn find_batched(&self, keys: &[Key], results: &mut [Option<Cursor>]) {
        assert!(
            keys.len() <= MAX_LOOKUP_BATCH,
            "batch window exceeds MAX_LOOKUP_BATCH",
        );
        assert!(
            results.len() >= keys.len(),
            "result slab shorter than the key window",
        );

        let mut hashes = [0u64; MAX_LOOKUP_BATCH];
        let mut primary = [0usize; MAX_LOOKUP_BATCH];
        let mut secondary = [0usize; MAX_LOOKUP_BATCH];

        let buckets = self.buckets();

        for (i, &key) in keys.iter().enumerate() {
            hashes[i] = self.hasher.hash(key);
            primary[i] = self.primary_bucket(hashes[i]);
            prefetch_read(std::ptr::from_ref(&buckets[primary[i]]));
        }

        for (i, &key) in keys.iter().enumerate() {
            results[i] = buckets[primary[i]]
                .find_simd(key)
                .map(|slot| Cursor::new(primary[i], slot));
        }

        for (i, &key) in keys.iter().enumerate() {
            if results[i].is_none() {
                secondary[i] = self.partner_bucket(hashes[i], key);
                prefetch_read(std::ptr::from_ref(&buckets[secondary[i]]));
            }
        }

        for (i, &key) in keys.iter().enumerate() {
            if results[i].is_none() {
                results[i] = buckets[secondary[i]]
                    .find_simd(key)
                    .map(|slot| Cursor::new(secondary[i], slot));
            }
        }
    }

    /// Inserts `key`.
    ///
    /// The key must not be present already and must not be the empty
    /// sentinel. When both home buckets are full, a displacement walk makes
    /// room; a walk that exhausts its depth budget is unwound completely and
    /// reported as [`Error::Saturated`](crate::Error::Saturated), leaving the
    /// table unchanged.
    pub fn insert(&mut self, key: Key) -> crate::Result<()> {
        debug_assert_ne!(key, NULL_KEY, "the empty sentinel cannot be inserted");

        let hash = self.hasher.hash(key);
        let primary = self.primary_bucket(hash);

        if self.buckets_mut()[primary].insert(key)? {
            self.len += 1;
            return Ok(());
        }

        let partner = self.partner_bucket(hash, key);

        if self.buckets_mut()[partner].insert(key)? {
            self.len += 1;
            return Ok(());
        }

        self.displace_insert(primary, key)?;
        self.len += 1;

        Ok(())
    }

    /// Erases the slot referenced by `cursor`.
    ///
    /// The cursor must come from a lookup on this table with no mutation in
    /// between.
    pub fn erase(&mut self, cursor: Cursor) {
        debug_assert!(cursor.bucket < self.num_buckets);
        debug_assert_ne!(NULL_KEY, self.key_at(cursor), "stale cursor");

        self.buckets_mut()[cursor.bucket].clear_slot(cursor.slot);
        self.len -= 1;
    }

    #[inline]
    fn primary_bucket(&self, hash: u64) -> usize {
        (hash as usize) & self.bucket_mask
    }

    /// The other home bucket, derived from the hash and the key.
    ///
    /// Involutive under the XOR trick: given either home's defining hash, the
    /// partner comes out, so a displaced tenant's alternative bucket is
    /// computable without remembering which home it was evicted from. May
    /// equal the primary bucket.
    #[inline]
    fn partner_bucket(&self, hash: u64, key: Key) -> usize {
        (self.hasher.hash(hash ^ key) as usize) & self.bucket_mask
    }

    #[inline]
    fn next_victim(&mut self) -> usize {
        self.victim = self.victim.wrapping_add(1);
        self.victim & (SLOTS_PER_BUCKET - 1)
    }

    /// Displacement walk: evict a rotating victim, move it to its other home,
    /// chain until a bucket has room or the depth budget runs out.
    ///
    /// On a capped walk the recorded trail is replayed backwards, restoring
    /// every displaced tenant, so the error path leaves no key stranded.
    fn displace_insert(&mut self, start_bucket: usize, requested: Key) -> crate::Result<()> {
        self.trail.clear();

        let mut bucket_id = start_bucket;
        let mut key = requested;

        for depth in 0..self.walk_depth {
            let victim = self.next_victim();
            let evicted = self.buckets_mut()[bucket_id].displace(victim, key);
            self.trail.push((bucket_id, victim));

            let hash = self.hasher.hash(evicted);
            let home1 = self.primary_bucket(hash);
            let home2 = self.partner_bucket(hash, evicted);

            // a self-colliding tenant has home1 == home2; "other" then
            // revisits the same bucket and the depth budget bounds the loop
            let other = if home1 == bucket_id { home2 } else { home1 };

            if self.buckets_mut()[other].insert(evicted)? {
                log::trace!("displacement walk settled after {} steps", depth + 1);
                return Ok(());
            }

            bucket_id = other;
            key = evicted;
        }

        // depth budget exhausted: put every displaced tenant back
        let mut homeless = key;

        while let Some((bucket, slot)) = self.trail.pop() {
            homeless = self.buckets_mut()[bucket].displace(slot, homeless);
        }

        debug_assert_eq!(requested, homeless);

        log::warn!(
            "displacement walk exceeded depth budget {}; table saturated for this key",
            self.walk_depth,
        );

        Err(crate::Error::Saturated(requested))
    }

    #[inline]
    fn buckets(&self) -> &[Bucket] {
        // SAFETY: storage holds `num_buckets` initialized buckets for the
        // lifetime of self
        unsafe { std::slice::from_raw_parts(self.storage.as_ptr(), self.num_buckets) }
    }

    #[inline]
    fn buckets_mut(&mut self) -> &mut [Bucket] {
        // SAFETY: as above; `&mut self` guarantees exclusive access
        unsafe { std::slice::from_raw_parts_mut(self.storage.as_ptr(), self.num_buckets) }
    }
}

impl<H, A: BucketAllocator> Drop for CuckooSet<H, A> {
    fn drop(&mut self) {
        // SAFETY: storage came from this allocator with this layout
        unsafe {
            self.allocator
                .deallocate(self.storage.cast::<u8>(), self.layout);
        }
    }
}

impl<H, A: BucketAllocator> std::fmt::Debug for CuckooSet<H, A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CuckooSet")
            .field("len", &self.len)
            .field("buckets", &self.num_buckets)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn capacity_rounds_to_power_of_two_slots() -> crate::Result<()> {
        let set = CuckooSet::with_capacity(13)?;
        assert_eq!(16, set.slot_count());
        assert_eq!(4, set.bucket_count());

        let set = CuckooSet::with_capacity(1)?;
        assert_eq!(SLOTS_PER_BUCKET, set.slot_count());
        assert_eq!(1, set.bucket_count());

        Ok(())
    }

    #[test]
    fn empty_set_finds_nothing() -> crate::Result<()> {
        let set = CuckooSet::with_capacity(16)?;

        assert!(set.is_empty());
        assert_eq!(0.0, set.load_factor());

        for key in 0..32 {
            assert!(set.find(key).is_none());
        }

        Ok(())
    }

    #[test]
    fn insert_find_erase_round_trip() -> crate::Result<()> {
        let mut set = CuckooSet::with_capacity(64)?;

        set.insert(42)?;
        assert_eq!(1, set.len());

        let cursor = set.find(42).expect("42 was inserted");
        assert_eq!(42, set.key_at(cursor));

        set.erase(cursor);
        assert!(set.find(42).is_none());
        assert!(set.is_empty());

        Ok(())
    }

    #[test]
    fn displacement_pressure_keeps_all_keys_reachable() -> crate::Result<()> {
        // 16 slots, 16 keys: the later inserts have to displace
        let mut set = CuckooSet::with_capacity(16)?;

        for key in 0..16 {
            set.insert(key)?;
        }

        assert_eq!(16, set.len());
        assert_eq!(1.0, set.load_factor());

        for key in 0..16 {
            let cursor = set.find(key).expect("displaced keys stay reachable");
            assert_eq!(key, set.key_at(cursor));
        }

        Ok(())
    }

    #[test]
    fn every_key_lives_in_a_home_bucket() -> crate::Result<()> {
        let mut set = CuckooSet::with_capacity(256)?;

        for key in 0..200 {
            set.insert(key)?;
        }

        for key in 0..200 {
            let cursor = set.find(key).expect("key is present");
            let hash = set.hasher.hash(key);
            let homes = [
                set.primary_bucket(hash),
                set.partner_bucket(hash, key),
            ];
            assert!(homes.contains(&cursor.bucket()));
        }

        Ok(())
    }

    #[test]
    fn xxh3_strategy_works_end_to_end() -> crate::Result<()> {
        use crate::hash::Xxh3Hasher;

        let mut set = CuckooSet::with_strategies(1_024, Xxh3Hasher, HeapAllocator)?;

        for key in 0..100 {
            set.insert(key)?;
        }

        for key in 0..100 {
            assert!(set.contains(key));
        }
        assert!(!set.contains(100));

        Ok(())
    }
}
