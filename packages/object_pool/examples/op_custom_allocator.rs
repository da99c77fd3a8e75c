//! Demonstrates plugging a custom system allocator into `ObjectPool`.
//!
//! The allocator below wraps the heap-based allocator and counts how many pages the pool asks
//! for, refusing to go over a fixed budget. Running out of budget surfaces as an error from
//! `acquire()`.

use std::cell::Cell;
use std::num::NonZero;
use std::ptr::NonNull;

use object_pool::{DropPolicy, HeapAllocator, ObjectPool, PAGE_SIZE, SystemAllocator};

/// Hands out at most `budget_pages` pages in total.
#[derive(Debug)]
struct BudgetAllocator {
    budget_pages: usize,
    used_pages: Cell<usize>,
}

impl BudgetAllocator {
    fn new(budget_pages: usize) -> Self {
        Self {
            budget_pages,
            used_pages: Cell::new(0),
        }
    }
}

// SAFETY: We forward to HeapAllocator, which is a correct implementation.
unsafe impl SystemAllocator for BudgetAllocator {
    fn allocate_pages(&self, page_count: NonZero<usize>) -> Option<NonNull<u8>> {
        let used_pages = self.used_pages.get().checked_add(page_count.get())?;

        if used_pages > self.budget_pages {
            return None;
        }

        let block = HeapAllocator.allocate_pages(page_count)?;
        self.used_pages.set(used_pages);

        Some(block)
    }

    unsafe fn release_pages(&self, ptr: NonNull<u8>, page_count: NonZero<usize>) {
        // SAFETY: Forwarding guarantees from the caller.
        unsafe {
            HeapAllocator.release_pages(ptr, page_count);
        }

        self.used_pages
            .set(self.used_pages.get().saturating_sub(page_count.get()));
    }
}

fn main() {
    // Two single-page slabs at most.
    let mut pool = ObjectPool::<u64>::builder()
        .slab_size(PAGE_SIZE)
        .drop_policy(DropPolicy::MayAbandonItems)
        .system_allocator(BudgetAllocator::new(2))
        .build();

    let mut items = Vec::new();

    loop {
        match pool.acquire() {
            Ok(item) => items.push(item),
            Err(error) => {
                println!("Stopped after {} objects: {error}", items.len());
                break;
            }
        }
    }

    println!(
        "Pool holds {} objects in {} slabs of {} bytes",
        pool.len(),
        pool.slab_count(),
        pool.slab_size()
    );

    // Released memory is reused without asking the allocator for more.
    let last = items.pop().unwrap();

    // SAFETY: Acquired from this pool above, released once.
    unsafe { pool.release(last) };

    let reused = pool.acquire().unwrap();
    println!("Reused the released cell: {}", reused == last);

    // The remaining objects are abandoned when the pool is dropped, which is fine for `u64`.
}
