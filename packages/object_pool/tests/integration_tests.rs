//! Integration tests for the `object_pool` package.
//!
//! These exercise the pool only through its public API, with both the built-in system
//! allocators and a custom one implemented here.
#![allow(
    clippy::multiple_unsafe_ops_per_block,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects,
    clippy::integer_division,
    clippy::cast_possible_truncation,
    reason = "tests focus on succinct code and do not need to tick all the boxes"
)]

use std::collections::HashSet;
use std::num::NonZero;
use std::ptr::NonNull;
use std::sync::atomic::{self, AtomicUsize};
use std::sync::{Arc, Mutex};
use std::thread;

use object_pool::{
    DEFAULT_SLAB_SIZE, DropPolicy, Error, HeapAllocator, ObjectPool, OsAllocator, PAGE_SIZE,
    SLAB_ALIGNMENT, SystemAllocator,
};

/// Counts requests and outstanding pages, optionally refusing requests beyond a limit.
#[derive(Clone, Debug, Default)]
struct CountingAllocator {
    requests: Arc<AtomicUsize>,
    outstanding_pages: Arc<AtomicUsize>,
    max_requests: Option<usize>,
}

impl CountingAllocator {
    fn with_max_requests(max_requests: usize) -> Self {
        Self {
            max_requests: Some(max_requests),
            ..Self::default()
        }
    }

    fn requests(&self) -> usize {
        self.requests.load(atomic::Ordering::Relaxed)
    }

    fn outstanding_pages(&self) -> usize {
        self.outstanding_pages.load(atomic::Ordering::Relaxed)
    }
}

// SAFETY: We forward to HeapAllocator, which is a correct implementation.
unsafe impl SystemAllocator for CountingAllocator {
    fn allocate_pages(&self, page_count: NonZero<usize>) -> Option<NonNull<u8>> {
        let previous = self.requests.fetch_add(1, atomic::Ordering::Relaxed);

        if self.max_requests.is_some_and(|max| previous >= max) {
            return None;
        }

        let block = HeapAllocator.allocate_pages(page_count)?;
        self.outstanding_pages
            .fetch_add(page_count.get(), atomic::Ordering::Relaxed);

        Some(block)
    }

    unsafe fn release_pages(&self, ptr: NonNull<u8>, page_count: NonZero<usize>) {
        self.outstanding_pages
            .fetch_sub(page_count.get(), atomic::Ordering::Relaxed);

        // SAFETY: Forwarding guarantees from the caller.
        unsafe {
            HeapAllocator.release_pages(ptr, page_count);
        }
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
struct Node {
    key: u64,
    children: Vec<u32>,
}

#[test]
fn many_objects_across_many_slabs() {
    let mut pool = ObjectPool::<Node>::builder()
        .slab_size(PAGE_SIZE)
        .system_allocator(OsAllocator)
        .build();

    let per_slab = PAGE_SIZE / pool.cell_size();
    let count = per_slab * 5 + 1;

    let items = (0..count)
        .map(|index| {
            pool.acquire_with(|| Node {
                key: index as u64,
                children: vec![index as u32; 3],
            })
            .unwrap()
        })
        .collect::<Vec<_>>();

    assert_eq!(pool.len(), count);
    assert_eq!(pool.slab_count(), 6);

    let addresses = items
        .iter()
        .map(|item| item.as_ptr().addr())
        .collect::<HashSet<_>>();
    assert_eq!(addresses.len(), count);

    for (index, item) in items.iter().enumerate() {
        // SAFETY: The object is live and not referenced from anywhere else.
        let node = unsafe { item.as_ref() };

        assert_eq!(node.key, index as u64);
        assert_eq!(node.children, vec![index as u32; 3]);
    }

    for item in items {
        // SAFETY: Acquired from this pool above, released once.
        unsafe { pool.release(item) };
    }

    assert!(pool.is_empty());
    assert_eq!(pool.slab_count(), 6);
}

#[test]
fn released_memory_is_reused_before_new_slabs() {
    let allocator = CountingAllocator::default();

    let mut pool = ObjectPool::<u64>::builder()
        .slab_size(4 * 8)
        .system_allocator(allocator.clone())
        .build();

    let items = (0..4).map(|_| pool.acquire().unwrap()).collect::<Vec<_>>();
    assert_eq!(allocator.requests(), 1);

    for item in items.iter().rev() {
        // SAFETY: Acquired from this pool above, released once.
        unsafe { pool.release(*item) };
    }

    // Released in reverse order, so LIFO reuse hands them out in the original order.
    for expected in &items {
        assert_eq!(pool.acquire().unwrap(), *expected);
    }

    assert_eq!(allocator.requests(), 1);

    _ = pool.acquire().unwrap();
    assert_eq!(allocator.requests(), 2);
}

#[test]
fn whole_pages_are_requested() {
    let allocator = CountingAllocator::default();

    let mut pool = ObjectPool::<u64>::builder()
        .slab_size(PAGE_SIZE + 1)
        .system_allocator(allocator.clone())
        .build();

    _ = pool.acquire().unwrap();

    assert_eq!(allocator.outstanding_pages(), 2);

    drop(pool);

    assert_eq!(allocator.outstanding_pages(), 0);
}

#[test]
fn default_slab_size_is_sixteen_pages() {
    let allocator = CountingAllocator::default();

    let mut pool = ObjectPool::<u64>::builder()
        .system_allocator(allocator.clone())
        .build();

    assert_eq!(pool.slab_size(), DEFAULT_SLAB_SIZE);

    _ = pool.acquire().unwrap();

    assert_eq!(allocator.outstanding_pages(), 16);
}

#[test]
fn out_of_memory_is_reported_and_recoverable() {
    let allocator = CountingAllocator::with_max_requests(1);

    let mut pool = ObjectPool::<u64>::builder()
        .slab_size(2 * 8)
        .system_allocator(allocator.clone())
        .build();

    let a = pool.acquire().unwrap();
    let _b = pool.acquire().unwrap();

    let error = pool.acquire().unwrap_err();
    assert!(matches!(
        error,
        Error::OutOfMemory {
            requested_bytes: PAGE_SIZE
        }
    ));
    assert!(error.to_string().contains(&PAGE_SIZE.to_string()));

    assert_eq!(pool.len(), 2);
    assert_eq!(pool.slab_count(), 1);

    // SAFETY: Acquired from this pool above, released once.
    unsafe { pool.release(a) };

    assert_eq!(pool.acquire().unwrap(), a);
}

#[test]
fn objects_are_aligned_for_their_type() {
    #[derive(Default)]
    #[repr(align(128))]
    struct Aligned {
        value: u16,
    }

    let mut pool = ObjectPool::<Aligned>::new();

    let items = (0..100).map(|_| pool.acquire().unwrap()).collect::<Vec<_>>();

    for item in &items {
        assert!(item.is_aligned());

        // SAFETY: The object is live and not referenced from anywhere else.
        assert_eq!(unsafe { item.as_ref() }.value, 0);
    }

    for item in items {
        // SAFETY: Acquired from this pool above, released once.
        unsafe { pool.release(item) };
    }
}

#[test]
fn small_objects_use_pointer_sized_cells() {
    let mut pool = ObjectPool::<u16>::builder()
        .system_allocator(HeapAllocator)
        .build();

    assert_eq!(pool.cell_size(), size_of::<*mut u8>());

    let a = pool.acquire_with(|| 0xAAAA).unwrap();
    let b = pool.acquire_with(|| 0xBBBB).unwrap();
    let c = pool.acquire_with(|| 0xCCCC).unwrap();

    // SAFETY: Acquired from this pool above, released once.
    unsafe { pool.release(b) };

    // SAFETY: The objects are live and not referenced from anywhere else.
    unsafe {
        assert_eq!(a.read(), 0xAAAA);
        assert_eq!(c.read(), 0xCCCC);
    }
}

#[test]
fn must_not_drop_items_accepts_empty_pool() {
    let mut pool = ObjectPool::<String>::builder()
        .drop_policy(DropPolicy::MustNotDropItems)
        .build();

    let item = pool.acquire_with(|| "temporary".to_string()).unwrap();

    // SAFETY: Acquired from this pool above, released once.
    unsafe { pool.release(item) };
}

#[test]
#[should_panic]
fn must_not_drop_items_rejects_live_objects() {
    let mut pool = ObjectPool::<u64>::builder()
        .drop_policy(DropPolicy::MustNotDropItems)
        .system_allocator(HeapAllocator)
        .build();

    _ = pool.acquire().unwrap();
}

#[test]
fn leak_slabs_keeps_memory_mapped() {
    let allocator = CountingAllocator::default();

    let mut pool = ObjectPool::<u64>::builder()
        .slab_size(PAGE_SIZE)
        .drop_policy(DropPolicy::LeakSlabs)
        .system_allocator(allocator.clone())
        .build();

    let item = pool.acquire_with(|| 77).unwrap();

    drop(pool);

    assert_eq!(allocator.outstanding_pages(), 1);

    // SAFETY: The slab was leaked, so the object is still there.
    assert_eq!(unsafe { item.read() }, 77);

    // SAFETY: The object is the first cell of its slab, so its address is the slab base, and
    // nothing uses the slab anymore.
    unsafe {
        allocator.release_pages(item.cast(), NonZero::new(1).unwrap());
    }
}

#[test]
fn slab_blocks_satisfy_alignment_contract() {
    let mut pool = ObjectPool::<u8>::new();

    let first = pool.acquire().unwrap();

    assert_eq!(first.as_ptr().addr() % SLAB_ALIGNMENT, 0);
}

#[test]
fn one_pool_per_thread() {
    let handles = (0..4_u64)
        .map(|thread_index| {
            thread::spawn(move || {
                let mut pool = ObjectPool::<u64>::new();

                let items = (0..1000)
                    .map(|n| pool.acquire_with(|| thread_index * 1000 + n).unwrap())
                    .collect::<Vec<_>>();

                for (n, item) in (0_u64..).zip(&items) {
                    // SAFETY: The object is live and not referenced from anywhere else.
                    assert_eq!(unsafe { item.read() }, thread_index * 1000 + n);
                }

                for item in items {
                    // SAFETY: Acquired from this pool above, released once.
                    unsafe { pool.release(item) };
                }

                pool.len()
            })
        })
        .collect::<Vec<_>>();

    for handle in handles {
        assert_eq!(handle.join().unwrap(), 0);
    }
}

#[test]
fn shared_pool_behind_mutex() {
    let pool = Arc::new(Mutex::new(ObjectPool::<Node>::new()));

    let handles = (0..4_u64)
        .map(|thread_index| {
            let pool = Arc::clone(&pool);

            thread::spawn(move || {
                for _ in 0..250 {
                    let mut pool = pool.lock().unwrap();

                    let node = pool
                        .acquire_with(|| Node {
                            key: thread_index,
                            children: Vec::new(),
                        })
                        .unwrap();

                    // SAFETY: The object is live and not referenced from anywhere else.
                    assert_eq!(unsafe { node.as_ref() }.key, thread_index);

                    // SAFETY: Acquired from this pool above, released once.
                    unsafe { pool.release(node) };
                }
            })
        })
        .collect::<Vec<_>>();

    for handle in handles {
        handle.join().unwrap();
    }

    assert!(pool.lock().unwrap().is_empty());
}
