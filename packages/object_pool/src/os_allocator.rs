use std::num::NonZero;
use std::ptr::NonNull;

use tracing::{debug, warn};

use crate::pal::{BUILD_TARGET_PLATFORM, Platform};
use crate::{PAGE_SIZE, SystemAllocator};

/// A [`SystemAllocator`] that maps pages directly from the operating system, bypassing the
/// Rust global allocator.
///
/// On Unix this uses anonymous private `mmap()`, on Windows `VirtualAlloc()`. Under Miri and on
/// targets without native bindings, the Rust global allocator is used instead.
///
/// This is the allocator used by [`ObjectPool::new()`][crate::ObjectPool::new].
///
/// Mapping and unmapping is reported via `tracing` at the `debug` level and refusals of the
/// operating system to map memory at the `warn` level.
#[derive(Clone, Copy, Debug, Default)]
pub struct OsAllocator;

// SAFETY: The platform abstraction guarantees fresh, distinct, SLAB_ALIGNMENT-aligned mappings
// of the requested length, valid until unmapped.
unsafe impl SystemAllocator for OsAllocator {
    fn allocate_pages(&self, page_count: NonZero<usize>) -> Option<NonNull<u8>> {
        let Some(len) = page_count.get().checked_mul(PAGE_SIZE) else {
            warn!(
                page_count = page_count.get(),
                "refusing to map a slab larger than the address space"
            );
            return None;
        };

        match BUILD_TARGET_PLATFORM.map_pages(len) {
            Ok(block) => {
                debug!(page_count = page_count.get(), len, "mapped slab pages");
                Some(block)
            }
            Err(error) => {
                warn!(
                    page_count = page_count.get(),
                    len,
                    %error,
                    "operating system refused to map slab pages"
                );
                None
            }
        }
    }

    #[cfg_attr(test, mutants::skip)] // Mutating this away only leaks memory, which tests cannot observe.
    unsafe fn release_pages(&self, ptr: NonNull<u8>, page_count: NonZero<usize>) {
        let len = page_count
            .get()
            .checked_mul(PAGE_SIZE)
            .expect("length was valid when the pages were mapped, so it is still valid now");

        // SAFETY: The caller guarantees that this is a block from `allocate_pages()` with the
        // same page count, which means it is exactly one mapping of `len` bytes.
        match unsafe { BUILD_TARGET_PLATFORM.unmap_pages(ptr, len) } {
            Ok(()) => debug!(page_count = page_count.get(), len, "unmapped slab pages"),
            // There is nothing the caller could do about it, so we only report it.
            Err(error) => warn!(
                page_count = page_count.get(),
                len,
                %error,
                "operating system refused to unmap slab pages"
            ),
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
#[allow(
    clippy::arithmetic_side_effects,
    reason = "tests focus on succinct code and do not need to tick all the boxes"
)]
mod tests {
    use static_assertions::assert_impl_all;

    use super::*;
    use crate::SLAB_ALIGNMENT;

    assert_impl_all!(OsAllocator: Send, Sync);

    #[test]
    fn allocates_and_releases_slab_sized_blocks() {
        let page_count = NonZero::new(16).expect("16 is not zero");

        let block = OsAllocator
            .allocate_pages(page_count)
            .expect("mapping a default-sized slab should succeed in tests");

        assert_eq!(block.as_ptr().addr() % SLAB_ALIGNMENT, 0);

        // SAFETY: The block is valid for writes of 16 pages.
        unsafe {
            block.write_bytes(0, PAGE_SIZE * 16);
        }

        // SAFETY: Allocated above with the same page count and not yet released.
        unsafe {
            OsAllocator.release_pages(block, page_count);
        }
    }

    #[test]
    fn refuses_overflowing_page_count() {
        let page_count = NonZero::new(usize::MAX).expect("usize::MAX is not zero");

        assert!(OsAllocator.allocate_pages(page_count).is_none());
    }
}
