//! Basic usage of the `object_pool` crate:
//!
//! * Creating a pool.
//! * Acquiring objects, default-constructed or from a closure.
//! * Accessing objects through the returned pointers.
//! * Releasing objects and watching their memory get reused.

use object_pool::ObjectPool;

#[derive(Debug, Default)]
struct Span {
    start_page: usize,
    page_count: usize,
}

fn main() {
    let mut pool = ObjectPool::<Span>::new();

    println!(
        "Each span occupies a {}-byte cell in slabs of {} bytes",
        pool.cell_size(),
        pool.slab_size()
    );

    // Acquiring an object gives you a pointer to an object that lives in the pool.
    let first = pool.acquire().unwrap();
    let second = pool
        .acquire_with(|| Span {
            start_page: 100,
            page_count: 4,
        })
        .unwrap();

    println!(
        "Pool contains {} objects in {} slab(s)",
        pool.len(),
        pool.slab_count()
    );

    // SAFETY: The objects are live and we hold no other references to them.
    unsafe {
        (*first.as_ptr()).page_count = 1;

        println!("First span: {:?}", first.as_ref());
        println!("Second span: {:?}", second.as_ref());
    }

    // Releasing an object drops it and keeps its memory for the next acquisition.
    // SAFETY: Acquired from this pool above, released once.
    unsafe { pool.release(second) };

    let third = pool.acquire().unwrap();
    println!(
        "Third span reuses the memory of the second span: {}",
        third == second
    );

    // SAFETY: Acquired from this pool above, released once.
    unsafe {
        pool.release(first);
        pool.release(third);
    }

    println!(
        "Pool is empty again ({} objects) but keeps its {} slab(s) for reuse",
        pool.len(),
        pool.slab_count()
    );
}
