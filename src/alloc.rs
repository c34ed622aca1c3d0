// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Allocator strategies for the bucket array.
//!
//! A table owns exactly one contiguous allocation for its lifetime, so the
//! strategy surface is a single allocate/deallocate pair over a
//! [`std::alloc::Layout`].

use std::alloc::Layout;
use std::ptr::NonNull;

/// Obtains and releases the contiguous storage backing a table's bucket
/// array.
///
/// Returned storage must be aligned to at least `layout.align()`; tables
/// request cache-line alignment and fail construction if the allocator does
/// not deliver it.
pub trait BucketAllocator {
    /// Allocates storage for the given layout.
    fn allocate(&self, layout: Layout) -> crate::Result<NonNull<u8>>;

    /// Releases storage previously returned by
    /// [`allocate`](BucketAllocator::allocate).
    ///
    /// # Safety
    ///
    /// `ptr` must originate from `allocate` on the same allocator with an
    /// identical `layout`, and must not be used afterwards.
    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout);
}

/// Default allocator: the global heap with an explicit alignment.
#[derive(Copy, Clone, Debug, Default)]
pub struct HeapAllocator;

impl BucketAllocator for HeapAllocator {
    fn allocate(&self, layout: Layout) -> crate::Result<NonNull<u8>> {
        // SAFETY: tables never request a zero-sized bucket array (the bucket
        // count is at least one).
        let ptr = unsafe { std::alloc::alloc(layout) };

        NonNull::new(ptr).ok_or_else(|| {
            crate::Error::Alloc(std::io::Error::from(std::io::ErrorKind::OutOfMemory))
        })
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        // SAFETY: forwarded contract - ptr came from alloc with this layout
        unsafe { std::alloc::dealloc(ptr.as_ptr(), layout) };
    }
}

/// Anonymous 2 MiB huge pages (Linux).
///
/// Mappings are page-aligned, so cache-line alignment trivially holds, and
/// TLB pressure is minimized for large tables. Allocation fails with
/// [`Error::Alloc`](crate::Error::Alloc) if the system has no huge pages
/// configured.
#[cfg(target_os = "linux")]
#[derive(Copy, Clone, Debug, Default)]
pub struct HugePageAllocator;

#[cfg(target_os = "linux")]
impl HugePageAllocator {
    const HUGE_PAGE_SIZE: usize = 2 * 1024 * 1024;

    fn rounded_len(layout: Layout) -> usize {
        layout
            .size()
            .max(1)
            .div_ceil(Self::HUGE_PAGE_SIZE)
            .saturating_mul(Self::HUGE_PAGE_SIZE)
    }
}

#[cfg(target_os = "linux")]
impl BucketAllocator for HugePageAllocator {
    fn allocate(&self, layout: Layout) -> crate::Result<NonNull<u8>> {
        use rustix::mm::{MapFlags, ProtFlags};

        debug_assert!(layout.align() <= Self::HUGE_PAGE_SIZE);

        // SAFETY: anonymous mapping with a null hint address
        let ptr = unsafe {
            rustix::mm::mmap_anonymous(
                std::ptr::null_mut(),
                Self::rounded_len(layout),
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::PRIVATE | MapFlags::HUGETLB,
            )
        }
        .map_err(|errno| crate::Error::Alloc(errno.into()))?;

        NonNull::new(ptr.cast::<u8>()).ok_or_else(|| {
            crate::Error::Alloc(std::io::Error::from(std::io::ErrorKind::OutOfMemory))
        })
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        // SAFETY: forwarded contract - ptr is an unmapped-once mapping of the
        // rounded length
        let _ = unsafe {
            rustix::mm::munmap(ptr.as_ptr().cast::<std::ffi::c_void>(), Self::rounded_len(layout))
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::CACHE_LINE_SIZE;
    use test_log::test;

    fn cache_line_layout(size: usize) -> Layout {
        Layout::from_size_align(size, CACHE_LINE_SIZE).expect("valid test layout")
    }

    #[test]
    fn heap_allocator_respects_alignment() -> crate::Result<()> {
        let allocator = HeapAllocator;
        let layout = cache_line_layout(1_024);

        let ptr = allocator.allocate(layout)?;
        assert_eq!(0, ptr.as_ptr() as usize % CACHE_LINE_SIZE);

        // SAFETY: freshly allocated above with the same layout
        unsafe { allocator.deallocate(ptr, layout) };

        Ok(())
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn huge_page_allocator_allocates_or_reports() {
        let allocator = HugePageAllocator;
        let layout = cache_line_layout(1_024);

        match allocator.allocate(layout) {
            Ok(ptr) => {
                assert_eq!(0, ptr.as_ptr() as usize % CACHE_LINE_SIZE);

                // SAFETY: freshly allocated above with the same layout
                unsafe { allocator.deallocate(ptr, layout) };
            }

            // no huge pages configured on this machine
            Err(crate::Error::Alloc(_)) => {}

            Err(e) => panic!("unexpected error: {e:?}"),
        }
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn huge_page_length_rounding() {
        assert_eq!(
            HugePageAllocator::HUGE_PAGE_SIZE,
            HugePageAllocator::rounded_len(cache_line_layout(64))
        );
        assert_eq!(
            2 * HugePageAllocator::HUGE_PAGE_SIZE,
            HugePageAllocator::rounded_len(cache_line_layout(
                HugePageAllocator::HUGE_PAGE_SIZE + 1
            ))
        );
    }
}
