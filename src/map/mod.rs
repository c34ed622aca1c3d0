// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Map variant: a 64-bit payload travels with each key, full-cache-line
//! buckets. Algorithmically identical to the set variant.

mod bucket;

use std::alloc::Layout;
use std::ptr::NonNull;

use crate::alloc::{BucketAllocator, HeapAllocator};
use crate::cursor::Cursor;
use crate::hash::{CrcFoldHasher, KeyHasher};
use crate::layout::{
    bucket_array_layout, bucket_count_for, Key, Value, CACHE_LINE_SIZE, MAX_LOOKUP_BATCH,
    NULL_KEY, SLOTS_PER_BUCKET,
};
use crate::probe::prefetch_read;

use bucket::Bucket;

/// Default displacement walk depth budget.
const DEFAULT_WALK_DEPTH: usize = 256;

/// A bucketed cuckoo hash map from 64-bit keys to 64-bit values.
///
/// Shares the set variant's design ([`CuckooSet`](crate::CuckooSet)); the
/// only difference is that a payload travels with each key, which doubles the
/// bucket to a full cache line. Values are read and updated in place through
/// cursors ([`CuckooMap::value_at`], [`CuckooMap::value_mut`]).
///
/// The key `u64::MAX` is reserved as the empty sentinel and must not be
/// inserted.
///
/// # Example
///
/// ```
/// use cuckoo_table::CuckooMap;
///
/// let mut map = CuckooMap::with_capacity(256)?;
/// map.insert(42, 7)?;
///
/// let cursor = map.find(42).expect("present");
/// assert_eq!(7, map.value_at(cursor));
///
/// *map.value_mut(cursor) = 9;
/// assert_eq!(Some(9), map.get(42));
/// #
/// # Ok::<(), cuckoo_table::Error>(())
/// ```
pub struct CuckooMap<H = CrcFoldHasher, A: BucketAllocator = HeapAllocator> {
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
unsafe impl<H: Send, A: BucketAllocator + Send> Send for CuckooMap<H, A> {}
unsafe impl<H: Sync, A: BucketAllocator + Sync> Sync for CuckooMap<H, A> {}

impl CuckooMap<CrcFoldHasher, HeapAllocator> {
    /// Creates a map with the default strategies (CRC-fold hash, heap
    /// allocation), rounding `capacity` up to a power-of-two slot count.
    pub fn with_capacity(capacity: usize) -> crate::Result<Self> {
        Self::with_strategies(capacity, CrcFoldHasher, HeapAllocator)
    }
}

impl<H: KeyHasher, A: BucketAllocator> CuckooMap<H, A> {
    /// Creates a map with explicit hash and allocator strategies.
    pub fn with_strategies(capacity: usize, hasher: H, allocator: A) -> crate::Result<Self> {
        Self::with_walk_depth(capacity, hasher, allocator, DEFAULT_WALK_DEPTH)
    }

    /// Creates a map with an explicit displacement depth budget.
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
            "allocated cuckoo map: {num_buckets} buckets, {} bytes",
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

    /// Whether the map holds no keys.
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

    /// Looks up `key` and copies out its value.
    #[must_use]
    pub fn get(&self, key: Key) -> Option<Value> {
        self.find(key).map(|cursor| self.value_at(cursor))
    }

    /// Key stored at `cursor`.
    #[must_use]
    pub fn key_at(&self, cursor: Cursor) -> Key {
        self.buckets()[cursor.bucket].key(cursor.slot)
    }

    /// Value stored at `cursor`.
    #[must_use]
    pub fn value_at(&self, cursor: Cursor) -> Value {
        self.buckets()[cursor.bucket].value(cursor.slot)
    }

    /// Mutable reference to the value stored at `cursor`, for in-place
    /// updates without re-probing.
    pub fn value_mut(&mut self, cursor: Cursor) -> &mut Value {
        self.buckets_mut()[cursor.bucket].value_mut(cursor.slot)
    }

    /// Looks up a window of independent keys, overlapping their memory
    /// stalls.
    ///
    /// `keys.len()` must not exceed [`MAX_LOOKUP_BATCH`] and `results` must
    /// be at least as long as `keys`. `results[i]` equals what
    /// [`CuckooMap::find`] returns for `keys[i]`. Secondary buckets are
    /// computed lazily, for the misses only.
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

    /// Inserts the pair.
    ///
    /// The key must not be present already and must not be the empty
    /// sentinel. When both home buckets are full, a displacement walk makes
    /// room; a walk that exhausts its depth budget is unwound completely and
    /// reported as [`Error::Saturated`](crate::Error::Saturated), leaving the
    /// table unchanged.
    pub fn insert(&mut self, key: Key, value: Value) -> crate::Result<()> {
        debug_assert_ne!(key, NULL_KEY, "the empty sentinel cannot be inserted");

        let hash = self.hasher.hash(key);
        let primary = self.primary_bucket(hash);

        if self.buckets_mut()[primary].insert(key, value)? {
            self.len += 1;
            return Ok(());
        }

        let partner = self.partner_bucket(hash, key);

        if self.buckets_mut()[partner].insert(key, value)? {
            self.len += 1;
            return Ok(());
        }

        self.displace_insert(primary, key, value)?;
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

    /// The other home bucket; see the set variant for the XOR trick. May
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

    /// Displacement walk; see the set variant. The payload travels with the
    /// key through every displacement, including the unwind.
    fn displace_insert(
        &mut self,
        start_bucket: usize,
        requested: Key,
        requested_value: Value,
    ) -> crate::Result<()> {
        self.trail.clear();

        let mut bucket_id = start_bucket;
        let mut key = requested;
        let mut value = requested_value;

        for depth in 0..self.walk_depth {
            let victim = self.next_victim();
            let (evicted, evicted_value) = self.buckets_mut()[bucket_id].displace(victim, key, value);
            self.trail.push((bucket_id, victim));

            let hash = self.hasher.hash(evicted);
            let home1 = self.primary_bucket(hash);
            let home2 = self.partner_bucket(hash, evicted);

            let other = if home1 == bucket_id { home2 } else { home1 };

            if self.buckets_mut()[other].insert(evicted, evicted_value)? {
                log::trace!("displacement walk settled after {} steps", depth + 1);
                return Ok(());
            }

            bucket_id = other;
            key = evicted;
            value = evicted_value;
        }

        // depth budget exhausted: put every displaced tenant back
        let mut homeless = (key, value);

        while let Some((bucket, slot)) = self.trail.pop() {
            homeless = self.buckets_mut()[bucket].displace(slot, homeless.0, homeless.1);
        }

        debug_assert_eq!(requested, homeless.0);

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

impl<H, A: BucketAllocator> Drop for CuckooMap<H, A> {
    fn drop(&mut self) {
        // SAFETY: storage came from this allocator with this layout
        unsafe {
            self.allocator
                .deallocate(self.storage.cast::<u8>(), self.layout);
        }
    }
}

impl<H, A: BucketAllocator> std::fmt::Debug for CuckooMap<H, A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CuckooMap")
            .field("len", &self.len)
            .field("buckets", &self.num_buckets)
            .finish_non_exhaustive()
    }
}
