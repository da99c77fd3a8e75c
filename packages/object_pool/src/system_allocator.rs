use std::alloc::{Layout, alloc, dealloc};
use std::num::NonZero;
use std::ptr::NonNull;

/// Base 2 logarithm of [`PAGE_SIZE`].
pub const PAGE_SHIFT: u32 = 13;

/// The unit in which memory is requested from a [`SystemAllocator`], in bytes.
pub const PAGE_SIZE: usize = 1 << PAGE_SHIFT;

/// The minimum alignment of every block returned by a [`SystemAllocator`].
///
/// Pools can only hold types whose alignment does not exceed this.
pub const SLAB_ALIGNMENT: usize = 4096;

/// The slab size used by pools unless configured otherwise, in bytes.
pub const DEFAULT_SLAB_SIZE: usize = 128 * 1024;

/// A source of raw page-granular memory from which an [`ObjectPool`][crate::ObjectPool] carves
/// its slabs.
///
/// The pool requests one block per slab and only gives blocks back when the pool itself is
/// dropped (subject to its [`DropPolicy`][crate::DropPolicy]).
///
/// # Safety
///
/// Implementations must uphold the following, as the pool constructs objects in the returned
/// memory from safe code:
///
/// * A block returned by `allocate_pages(n)` is valid for reads and writes of `n * PAGE_SIZE`
///   bytes and is aligned to at least [`SLAB_ALIGNMENT`].
/// * The block does not overlap any other live block and remains valid until it is passed to
///   `release_pages()`.
///
/// The contents of the block may be arbitrary, there is no need to zero it.
///
/// # Example
///
/// ```rust
/// use std::num::NonZero;
/// use std::ptr::NonNull;
///
/// use object_pool::{HeapAllocator, ObjectPool, SystemAllocator};
///
/// /// Refuses to hand out more than one block.
/// #[derive(Debug, Default)]
/// struct OneShot {
///     used: std::cell::Cell<bool>,
/// }
///
/// // SAFETY: We forward to a correct implementation.
/// unsafe impl SystemAllocator for OneShot {
///     fn allocate_pages(&self, page_count: NonZero<usize>) -> Option<NonNull<u8>> {
///         if self.used.replace(true) {
///             return None;
///         }
///
///         HeapAllocator.allocate_pages(page_count)
///     }
///
///     unsafe fn release_pages(&self, ptr: NonNull<u8>, page_count: NonZero<usize>) {
///         // SAFETY: Forwarding guarantees from the caller.
///         unsafe { HeapAllocator.release_pages(ptr, page_count) }
///     }
/// }
///
/// let mut pool = ObjectPool::<u64>::builder()
///     .system_allocator(OneShot::default())
///     .build();
///
/// let item = pool.acquire().unwrap();
///
/// // SAFETY: The pointer came from this pool and has not been released yet.
/// unsafe { pool.release(item) };
/// ```
pub unsafe trait SystemAllocator {
    /// Requests a block of `page_count * PAGE_SIZE` bytes.
    ///
    /// Returns `None` if the memory cannot be provided, which the pool reports to its caller
    /// as [`Error::OutOfMemory`][crate::Error::OutOfMemory].
    fn allocate_pages(&self, page_count: NonZero<usize>) -> Option<NonNull<u8>>;

    /// Returns a block to the system.
    ///
    /// # Safety
    ///
    /// The block must have been returned by `allocate_pages()` on the same allocator with the
    /// same `page_count` and must not have been released already. The block must not be used
    /// after this call.
    unsafe fn release_pages(&self, ptr: NonNull<u8>, page_count: NonZero<usize>);
}

/// A [`SystemAllocator`] that obtains pages from the Rust global allocator.
///
/// This is useful when the pool should participate in whatever accounting or instrumentation
/// is attached to the global allocator, or on targets without a page mapping facility.
///
/// # Example
///
/// ```rust
/// use object_pool::{HeapAllocator, ObjectPool};
///
/// let mut pool = ObjectPool::<u32>::builder()
///     .system_allocator(HeapAllocator)
///     .build();
///
/// let item = pool.acquire().unwrap();
///
/// // SAFETY: The pointer came from this pool and has not been released yet.
/// unsafe { pool.release(item) };
/// ```
#[derive(Clone, Copy, Debug, Default)]
pub struct HeapAllocator;

impl HeapAllocator {
    fn layout(page_count: NonZero<usize>) -> Option<Layout> {
        let size = page_count.get().checked_mul(PAGE_SIZE)?;

        Layout::from_size_align(size, PAGE_SIZE).ok()
    }
}

// SAFETY: The global allocator hands out distinct blocks valid for the requested layout, which
// covers the requested page count and is aligned to PAGE_SIZE, a multiple of SLAB_ALIGNMENT.
unsafe impl SystemAllocator for HeapAllocator {
    fn allocate_pages(&self, page_count: NonZero<usize>) -> Option<NonNull<u8>> {
        let layout = Self::layout(page_count)?;

        // SAFETY: The layout is not zero-sized because the page count is non-zero.
        NonNull::new(unsafe { alloc(layout) })
    }

    unsafe fn release_pages(&self, ptr: NonNull<u8>, page_count: NonZero<usize>) {
        let layout = Self::layout(page_count)
            .expect("layout was valid when the pages were allocated, so it is still valid now");

        // SAFETY: The caller guarantees the block came from `allocate_pages()` with the same
        // page count, so it was allocated by the global allocator with this very layout.
        unsafe {
            dealloc(ptr.as_ptr(), layout);
        }
    }
}

/// Number of pages needed to hold `bytes` bytes.
#[must_use]
pub(crate) fn pages_for(bytes: usize) -> usize {
    bytes.div_ceil(PAGE_SIZE)
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
#[allow(
    clippy::multiple_unsafe_ops_per_block,
    clippy::arithmetic_side_effects,
    reason = "tests focus on succinct code and do not need to tick all the boxes"
)]
mod tests {
    use static_assertions::{assert_impl_all, const_assert, const_assert_eq};

    use super::*;

    assert_impl_all!(HeapAllocator: Send, Sync);

    const_assert_eq!(PAGE_SIZE, 8192);
    const_assert_eq!(DEFAULT_SLAB_SIZE / PAGE_SIZE, 16);
    const_assert!(PAGE_SIZE % SLAB_ALIGNMENT == 0);

    #[test]
    fn pages_for_rounds_up() {
        assert_eq!(pages_for(1), 1);
        assert_eq!(pages_for(PAGE_SIZE), 1);
        assert_eq!(pages_for(PAGE_SIZE + 1), 2);
        assert_eq!(pages_for(DEFAULT_SLAB_SIZE), 16);
    }

    #[test]
    fn heap_allocator_provides_aligned_writable_pages() {
        let page_count = NonZero::new(2).expect("2 is not zero");

        let block = HeapAllocator
            .allocate_pages(page_count)
            .expect("a two-page heap allocation should succeed in tests");

        assert_eq!(block.as_ptr().addr() % SLAB_ALIGNMENT, 0);

        // SAFETY: The block is valid for writes of two pages.
        unsafe {
            block.write_bytes(0xAB, PAGE_SIZE * 2);
            assert_eq!(block.add(PAGE_SIZE * 2 - 1).read(), 0xAB);
        }

        // SAFETY: Allocated above with the same page count and not yet released.
        unsafe {
            HeapAllocator.release_pages(block, page_count);
        }
    }

    #[test]
    fn heap_allocator_refuses_absurd_sizes() {
        let page_count = NonZero::new(usize::MAX).expect("usize::MAX is not zero");

        assert!(HeapAllocator.allocate_pages(page_count).is_none());
    }
}
