//! Fake system allocator for testing.

use std::num::NonZero;
use std::ptr::NonNull;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::{HeapAllocator, SystemAllocator};

/// Internal state for the fake allocator that can be shared between clones.
#[derive(Debug, Default)]
struct FakeAllocatorState {
    /// Every call to `allocate_pages()`, successful or not.
    requests: usize,

    releases: usize,

    /// This many upcoming requests will be refused.
    failures_pending: usize,

    /// Every block handed out and not yet released, with its page count.
    outstanding: Vec<(Block, NonZero<usize>)>,
}

#[derive(Debug)]
struct Block(NonNull<u8>);

// SAFETY: We only use the pointer for identity checks and to give the memory back, both of
// which are fine to do from any thread.
unsafe impl Send for Block {}

/// Fake implementation of the system allocator for testing.
///
/// Memory comes from the global allocator but every request and release is recorded, and tests
/// can make upcoming requests fail. Multiple clones of the same `FakeAllocator` share the same
/// underlying state, so a test can hand one clone to a pool and inspect another one, even after
/// the pool has been dropped.
#[derive(Clone, Debug, Default)]
pub(crate) struct FakeAllocator {
    state: Arc<Mutex<FakeAllocatorState>>,
}

impl FakeAllocator {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, FakeAllocatorState> {
        self.state
            .lock()
            .expect("FakeAllocator state lock should not be poisoned")
    }

    /// Makes the next `count` requests fail.
    pub(crate) fn fail_next_requests(&self, count: usize) {
        self.state().failures_pending = count;
    }

    /// Number of `allocate_pages()` calls so far, including refused ones.
    pub(crate) fn request_count(&self) -> usize {
        self.state().requests
    }

    pub(crate) fn release_count(&self) -> usize {
        self.state().releases
    }

    /// Number of blocks handed out and not yet released.
    pub(crate) fn outstanding_count(&self) -> usize {
        self.state().outstanding.len()
    }

    /// Page counts of the blocks handed out and not yet released, in allocation order.
    pub(crate) fn outstanding_page_counts(&self) -> Vec<usize> {
        self.state()
            .outstanding
            .iter()
            .map(|(_, page_count)| page_count.get())
            .collect()
    }

    /// Releases every block that is still outstanding, e.g. after a pool deliberately leaked
    /// its slabs.
    ///
    /// # Safety
    ///
    /// Nothing may use the memory of the outstanding blocks anymore.
    pub(crate) unsafe fn release_all_outstanding(&self) {
        let outstanding = std::mem::take(&mut self.state().outstanding);

        for (block, page_count) in outstanding {
            // SAFETY: The block was handed out by us and not released (it was outstanding).
            // The caller guarantees nobody uses it anymore.
            unsafe {
                HeapAllocator.release_pages(block.0, page_count);
            }
        }
    }
}

// SAFETY: We forward to HeapAllocator, which is a correct implementation.
unsafe impl SystemAllocator for FakeAllocator {
    fn allocate_pages(&self, page_count: NonZero<usize>) -> Option<NonNull<u8>> {
        let mut state = self.state();

        state.requests = state
            .requests
            .checked_add(1)
            .expect("tests never make this many requests");

        if state.failures_pending > 0 {
            state.failures_pending = state
                .failures_pending
                .checked_sub(1)
                .expect("guarded by the comparison above");
            return None;
        }

        let block = HeapAllocator.allocate_pages(page_count)?;
        state.outstanding.push((Block(block), page_count));

        Some(block)
    }

    unsafe fn release_pages(&self, ptr: NonNull<u8>, page_count: NonZero<usize>) {
        let mut state = self.state();

        let position = state
            .outstanding
            .iter()
            .position(|(block, _)| block.0 == ptr)
            .expect("released a block that was not handed out by this allocator");

        let (_, original_page_count) = state.outstanding.remove(position);
        assert_eq!(
            original_page_count, page_count,
            "released a block with a different page count than it was allocated with"
        );

        state.releases = state
            .releases
            .checked_add(1)
            .expect("tests never make this many releases");

        // SAFETY: Forwarding guarantees from the caller, which we partially verified above.
        unsafe {
            HeapAllocator.release_pages(ptr, page_count);
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    fn one_page() -> NonZero<usize> {
        NonZero::new(1).expect("1 is not zero")
    }

    #[test]
    fn records_requests_and_releases() {
        let allocator = FakeAllocator::new();

        let block = allocator
            .allocate_pages(one_page())
            .expect("no failures were requested");

        assert_eq!(allocator.request_count(), 1);
        assert_eq!(allocator.outstanding_count(), 1);
        assert_eq!(allocator.outstanding_page_counts(), vec![1]);

        // SAFETY: Allocated above with the same page count and not yet released.
        unsafe {
            allocator.release_pages(block, one_page());
        }

        assert_eq!(allocator.release_count(), 1);
        assert_eq!(allocator.outstanding_count(), 0);
    }

    #[test]
    fn fails_requested_number_of_times() {
        let allocator = FakeAllocator::new();
        allocator.fail_next_requests(2);

        assert!(allocator.allocate_pages(one_page()).is_none());
        assert!(allocator.allocate_pages(one_page()).is_none());

        let block = allocator
            .allocate_pages(one_page())
            .expect("only two failures were requested");

        assert_eq!(allocator.request_count(), 3);
        assert_eq!(allocator.outstanding_count(), 1);

        // SAFETY: Allocated above with the same page count and not yet released.
        unsafe {
            allocator.release_pages(block, one_page());
        }
    }

    #[test]
    fn shared_state_between_clones() {
        let allocator1 = FakeAllocator::new();
        let allocator2 = allocator1.clone();

        allocator1.fail_next_requests(1);
        assert!(allocator2.allocate_pages(one_page()).is_none());

        assert_eq!(allocator1.request_count(), 1);
    }
}
