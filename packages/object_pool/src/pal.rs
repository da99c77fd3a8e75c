//! Platform abstraction layer for mapping and unmapping the pages that back slabs.
//!
//! Each build target gets a `BuildTargetPlatform` that talks to the operating system directly.
//! Under Miri, or on targets we have no native bindings for, the Rust global allocator stands in.

mod abstractions;

pub(crate) use abstractions::*;

#[cfg(all(unix, not(miri)))]
mod unix;
#[cfg(all(unix, not(miri)))]
pub(crate) use self::unix::*;

#[cfg(all(windows, not(miri)))]
mod windows;
#[cfg(all(windows, not(miri)))]
pub(crate) use self::windows::*;

#[cfg(any(miri, not(any(unix, windows))))]
mod rust;
#[cfg(any(miri, not(any(unix, windows))))]
pub(crate) use self::rust::*;

pub(crate) static BUILD_TARGET_PLATFORM: BuildTargetPlatform = BuildTargetPlatform;

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
#[allow(
    clippy::multiple_unsafe_ops_per_block,
    clippy::arithmetic_side_effects,
    reason = "tests focus on succinct code and do not need to tick all the boxes"
)]
mod tests {
    use super::*;
    use crate::{PAGE_SIZE, SLAB_ALIGNMENT};

    #[test]
    fn maps_aligned_writable_pages() {
        let len = PAGE_SIZE * 2;

        let block = BUILD_TARGET_PLATFORM
            .map_pages(len)
            .expect("mapping two pages should succeed in tests");

        assert_eq!(block.as_ptr().addr() % SLAB_ALIGNMENT, 0);

        // SAFETY: The mapping is valid for writes of `len` bytes.
        unsafe {
            block.write_bytes(0x5A, len);
            assert_eq!(block.read(), 0x5A);
            assert_eq!(block.add(len - 1).read(), 0x5A);
        }

        // SAFETY: Mapped above with the same length and not unmapped yet.
        unsafe { BUILD_TARGET_PLATFORM.unmap_pages(block, len) }
            .expect("unmapping our own mapping should succeed");
    }

    #[test]
    fn mappings_do_not_overlap() {
        let first = BUILD_TARGET_PLATFORM
            .map_pages(PAGE_SIZE)
            .expect("mapping one page should succeed in tests");
        let second = BUILD_TARGET_PLATFORM
            .map_pages(PAGE_SIZE)
            .expect("mapping one page should succeed in tests");

        let distance = first.as_ptr().addr().abs_diff(second.as_ptr().addr());
        assert!(distance >= PAGE_SIZE);

        // SAFETY: Both mapped above with the same length and not unmapped yet.
        unsafe {
            BUILD_TARGET_PLATFORM
                .unmap_pages(first, PAGE_SIZE)
                .expect("unmapping our own mapping should succeed");
            BUILD_TARGET_PLATFORM
                .unmap_pages(second, PAGE_SIZE)
                .expect("unmapping our own mapping should succeed");
        }
    }
}
