use std::any::type_name;
use std::fmt::{self, Debug, Formatter};
use std::marker::PhantomData;
use std::mem;
use std::num::NonZero;
use std::ptr::NonNull;
use std::thread;

use scopeguard::ScopeGuard;

use crate::cell::CellLayout;
use crate::freelist::Freelist;
use crate::slab::SlabCursor;
use crate::system_allocator::pages_for;
use crate::{
    DropPolicy, Error, ObjectPoolBuilder, OsAllocator, PAGE_SIZE, Result, SLAB_ALIGNMENT,
    SystemAllocator,
};

/// An allocator for objects of a single type `T` that carves large slabs into fixed-size cells
/// and recycles released cells.
///
/// Objects are acquired via [`acquire()`][1] (default-constructed) or [`acquire_with()`][2]
/// (constructed by a closure) and given back via [`release()`][3]. Acquiring an object tries, in
/// order:
///
/// 1. The most recently released cell, if any. Released cells form an intrusive LIFO freelist
///    whose links are stored in the released cells themselves.
/// 2. The next unused cell of the current slab.
/// 3. A new slab from the [`SystemAllocator`], abandoning whatever tail of the previous slab was
///    too small to hold another cell.
///
/// Each cell is exactly as large as the larger of `T` and a pointer, with no per-object header.
///
/// # Out of band access
///
/// The pool hands out raw pointers and never creates references to the objects, so the caller
/// decides how to access them. Each pointer is valid from the moment it is returned until it is
/// passed to [`release()`][3] (or the pool is dropped, depending on the [`DropPolicy`]).
///
/// # Resource usage
///
/// Slabs are never returned to the system allocator while the pool is alive, even if every
/// object has been released. The released cells are kept for reuse by future acquisitions.
///
/// # Thread safety
///
/// The pool is not internally synchronized. It can be moved to another thread if `T` and the
/// system allocator can, but sharing it requires external synchronization such as a `Mutex`.
/// Alternatively, use one pool per thread.
///
/// [1]: Self::acquire
/// [2]: Self::acquire_with
/// [3]: Self::release
pub struct ObjectPool<T, A: SystemAllocator = OsAllocator> {
    freelist: Freelist,

    /// Bump-allocation state over the most recently acquired slab.
    slab: SlabCursor,

    /// Base address of every slab acquired so far. This is only used to give the memory back
    /// when the pool is dropped, never for allocation.
    slabs: Vec<NonNull<u8>>,

    /// The usable size of each slab. The block requested from the system allocator is this
    /// rounded up to whole pages.
    slab_size: usize,
    slab_pages: NonZero<usize>,

    /// Number of objects acquired and not yet released.
    len: usize,

    drop_policy: DropPolicy,
    system_allocator: A,

    _items: PhantomData<T>,
}

impl<T> ObjectPool<T> {
    /// Creates a new [`ObjectPool`] with the default configuration.
    ///
    /// The pool starts empty and requests its first slab from the operating system when the
    /// first object is acquired.
    ///
    /// # Example
    ///
    /// ```rust
    /// use object_pool::ObjectPool;
    ///
    /// let mut pool = ObjectPool::<String>::new();
    /// assert!(pool.is_empty());
    ///
    /// let item = pool.acquire().unwrap();
    /// assert_eq!(pool.len(), 1);
    ///
    /// // SAFETY: The object is live and nothing else references it.
    /// unsafe {
    ///     assert!(item.as_ref().is_empty());
    /// }
    ///
    /// // SAFETY: The pointer came from this pool and has not been released yet.
    /// unsafe { pool.release(item) };
    /// assert!(pool.is_empty());
    /// ```
    #[must_use]
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Starts building a new [`ObjectPool`].
    ///
    /// Use this when you want to customize the pool configuration beyond the defaults.
    ///
    /// # Example
    ///
    /// ```rust
    /// use object_pool::{DropPolicy, ObjectPool};
    ///
    /// let pool = ObjectPool::<u32>::builder()
    ///     .drop_policy(DropPolicy::MustNotDropItems)
    ///     .build();
    ///
    /// assert!(pool.is_empty());
    /// ```
    pub fn builder() -> ObjectPoolBuilder<T> {
        ObjectPoolBuilder::new()
    }
}

impl<T, A: SystemAllocator> ObjectPool<T, A> {
    /// # Panics
    ///
    /// Panics if the slab cannot hold a single cell or if `T` is aligned more strictly than
    /// slabs are.
    #[must_use]
    pub(crate) fn new_inner(slab_size: usize, drop_policy: DropPolicy, system_allocator: A) -> Self {
        assert!(
            CellLayout::<T>::ALIGN <= SLAB_ALIGNMENT,
            "ObjectPool item {} requires alignment of {} bytes but slabs are only aligned to {SLAB_ALIGNMENT} bytes",
            type_name::<T>(),
            CellLayout::<T>::ALIGN,
        );
        assert!(
            slab_size >= CellLayout::<T>::SIZE,
            "ObjectPool slab size of {slab_size} bytes cannot fit a single {}-byte cell of {}",
            CellLayout::<T>::SIZE,
            type_name::<T>(),
        );

        let slab_pages = NonZero::new(pages_for(slab_size))
            .expect("guarded by assertion above - a slab holds at least one cell");

        Self {
            freelist: Freelist::new(),
            slab: SlabCursor::exhausted(),
            slabs: Vec::new(),
            slab_size,
            slab_pages,
            len: 0,
            drop_policy,
            system_allocator,
            _items: PhantomData,
        }
    }

    /// Acquires a default-constructed object from the pool.
    ///
    /// The object lives in memory owned by the pool until it is given back via
    /// [`release()`][Self::release]. Until then, the returned pointer is valid for reads and
    /// writes and no other live object overlaps it.
    ///
    /// Use [`acquire_with()`][Self::acquire_with] for types that do not implement [`Default`] or
    /// to construct the object with a specific value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfMemory`] if the pool had to request a new slab and the system
    /// allocator could not provide it. The pool is unchanged in that case.
    ///
    /// # Example
    ///
    /// ```rust
    /// use object_pool::ObjectPool;
    ///
    /// let mut pool = ObjectPool::<u64>::new();
    ///
    /// let item = pool.acquire().unwrap();
    ///
    /// // SAFETY: The object is live and nothing else references it.
    /// unsafe {
    ///     assert_eq!(item.read(), 0);
    ///     item.write(42);
    /// }
    ///
    /// // SAFETY: The pointer came from this pool and has not been released yet.
    /// unsafe { pool.release(item) };
    /// ```
    pub fn acquire(&mut self) -> Result<NonNull<T>>
    where
        T: Default,
    {
        self.acquire_with(T::default)
    }

    /// Acquires an object from the pool, constructing it in place with the value returned by
    /// `constructor`.
    ///
    /// Memory is obtained before the constructor is called. If the constructor panics, the cell
    /// reserved for the object is kept for future acquisitions and the panic is propagated.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfMemory`] if the pool had to request a new slab and the system
    /// allocator could not provide it. The constructor is not called and the pool is unchanged
    /// in that case.
    ///
    /// # Example
    ///
    /// ```rust
    /// use object_pool::ObjectPool;
    ///
    /// struct Connection {
    ///     id: u32,
    /// }
    ///
    /// let mut pool = ObjectPool::<Connection>::new();
    ///
    /// let connection = pool.acquire_with(|| Connection { id: 7 }).unwrap();
    ///
    /// // SAFETY: The object is live and nothing else references it.
    /// unsafe {
    ///     assert_eq!(connection.as_ref().id, 7);
    /// }
    ///
    /// // SAFETY: The pointer came from this pool and has not been released yet.
    /// unsafe { pool.release(connection) };
    /// ```
    pub fn acquire_with<F>(&mut self, constructor: F) -> Result<NonNull<T>>
    where
        F: FnOnce() -> T,
    {
        let cell = self.take_cell()?;

        // Catches both a system allocator that breaks its alignment promise and cell sizing bugs.
        debug_assert!(
            cell.cast::<T>().is_aligned(),
            "cell at {cell:p} is not aligned for {}",
            type_name::<T>()
        );

        let freelist = &mut self.freelist;
        let cell = scopeguard::guard(cell, |cell| {
            // SAFETY: We only get here if the constructor panicked. The cell belongs to this
            // pool, does not hold a live object and was just taken out of circulation, so it is
            // not in the freelist.
            unsafe {
                freelist.push(cell);
            }
        });

        let value = constructor();
        let object = ScopeGuard::into_inner(cell).cast::<T>();

        // SAFETY: The cell is valid for writes of `T`: it spans CellLayout::<T>::SIZE bytes and
        // is aligned for `T` because the slab base is SLAB_ALIGNMENT-aligned (at least as strict
        // as `T`, guarded in ctor) and cell sizes are rounded up to the alignment of `T`. No
        // live object occupies it, so we are not overwriting anything that needs dropping.
        unsafe {
            object.write(value);
        }

        self.len = self
            .len
            .checked_add(1)
            .expect("cannot have more live objects than fit in virtual memory");

        Ok(object)
    }

    /// Drops an object and makes its memory available for future acquisitions.
    ///
    /// The cell is reused by the very next acquisition from this pool (LIFO order).
    ///
    /// # Safety
    ///
    /// The pointer must have been returned by [`acquire()`][Self::acquire] or
    /// [`acquire_with()`][Self::acquire_with] on this same pool and must not have been released
    /// since. The object must not be accessed through any pointer or reference after this call.
    ///
    /// These conditions are not checked. Violating them corrupts the pool.
    ///
    /// # Example
    ///
    /// ```rust
    /// use object_pool::ObjectPool;
    ///
    /// let mut pool = ObjectPool::<String>::new();
    ///
    /// let item = pool
    ///     .acquire_with(|| "scratch buffer".to_string())
    ///     .unwrap();
    ///
    /// // SAFETY: The pointer came from this pool and has not been released yet.
    /// unsafe { pool.release(item) };
    ///
    /// // The memory is handed out again, holding a brand new object.
    /// let reused = pool.acquire().unwrap();
    /// assert_eq!(reused, item);
    ///
    /// // SAFETY: The pointer came from this pool and has not been released yet.
    /// unsafe { pool.release(reused) };
    /// ```
    pub unsafe fn release(&mut self, object: NonNull<T>) {
        self.len = self
            .len
            .checked_sub(1)
            .expect("released more objects than were acquired - the caller broke the safety contract");

        let freelist = &mut self.freelist;

        // Even if the destructor panics, the cell goes back into circulation.
        let _recycle = scopeguard::guard(object.cast::<u8>(), |cell| {
            // SAFETY: The caller guarantees the cell belongs to this pool and is not released
            // yet, so it is not in the freelist. After the destructor ran (or unwound), the cell
            // no longer holds a live object.
            unsafe {
                freelist.push(cell);
            }
        });

        // SAFETY: The caller guarantees that this is a live object acquired from this pool that
        // nobody is going to access anymore.
        unsafe {
            object.drop_in_place();
        }
    }

    /// The number of objects acquired from the pool and not yet released.
    ///
    /// # Example
    ///
    /// ```rust
    /// use object_pool::ObjectPool;
    ///
    /// let mut pool = ObjectPool::<u32>::new();
    /// assert_eq!(pool.len(), 0);
    ///
    /// let a = pool.acquire().unwrap();
    /// let b = pool.acquire().unwrap();
    /// assert_eq!(pool.len(), 2);
    ///
    /// // SAFETY: Both pointers came from this pool and have not been released yet.
    /// unsafe {
    ///     pool.release(a);
    ///     pool.release(b);
    /// }
    /// assert_eq!(pool.len(), 0);
    /// ```
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether there are no live objects in the pool.
    ///
    /// An empty pool may still be holding slabs with cells ready for reuse.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The number of slabs the pool has requested from the system allocator so far.
    ///
    /// This never decreases while the pool is alive.
    #[must_use]
    pub fn slab_count(&self) -> usize {
        self.slabs.len()
    }

    /// The usable size of each slab, in bytes.
    #[must_use]
    pub fn slab_size(&self) -> usize {
        self.slab_size
    }

    /// The size of the cell each object occupies, in bytes.
    ///
    /// This is the larger of the size of `T` and the size of a pointer, rounded up to a multiple
    /// of the alignment of `T`.
    ///
    /// # Example
    ///
    /// ```rust
    /// use object_pool::ObjectPool;
    ///
    /// let small = ObjectPool::<u8>::new();
    /// assert_eq!(small.cell_size(), size_of::<*mut u8>());
    ///
    /// let large = ObjectPool::<[u64; 4]>::new();
    /// assert_eq!(large.cell_size(), 32);
    /// ```
    #[must_use]
    #[expect(clippy::unused_self, reason = "reads better at call sites than a type-level const")]
    pub fn cell_size(&self) -> usize {
        CellLayout::<T>::SIZE
    }

    /// Takes a cell out of circulation: a released one if available, otherwise a fresh one from
    /// the current slab or, if that is used up, from a new slab.
    fn take_cell(&mut self) -> Result<NonNull<u8>> {
        if let Some(cell) = self.freelist.pop() {
            return Ok(cell);
        }

        if let Some(cell) = self.slab.bump(CellLayout::<T>::SIZE) {
            return Ok(cell);
        }

        self.start_new_slab()?;

        Ok(self
            .slab
            .bump(CellLayout::<T>::SIZE)
            .expect("a fresh slab always fits at least one cell - guarded in ctor"))
    }

    /// Replaces the current slab with a new one from the system allocator. Any remaining tail of
    /// the current slab is abandoned.
    fn start_new_slab(&mut self) -> Result<()> {
        let block = self
            .system_allocator
            .allocate_pages(self.slab_pages)
            .ok_or_else(|| Error::OutOfMemory {
                requested_bytes: self.slab_pages.get().saturating_mul(PAGE_SIZE),
            })?;

        self.slabs.push(block);

        // SAFETY: The system allocator guarantees the block is valid for `slab_pages` pages,
        // which is at least `slab_size` bytes, until we release it. We only release it when the
        // pool is dropped.
        self.slab = unsafe { SlabCursor::new(block, self.slab_size) };

        Ok(())
    }
}

impl<T> Default for ObjectPool<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, A: SystemAllocator> Drop for ObjectPool<T, A> {
    fn drop(&mut self) {
        let slabs = mem::take(&mut self.slabs);

        if self.drop_policy != DropPolicy::LeakSlabs {
            for slab in slabs {
                // SAFETY: Every slab came from `allocate_pages()` on this allocator with this
                // page count and is released only here, once. Objects still live in it are
                // abandoned without being dropped, which is the documented behavior.
                unsafe {
                    self.system_allocator.release_pages(slab, self.slab_pages);
                }
            }
        }

        // Memory goes back first so a failed check does not also leak the slabs.
        // A second panic while unwinding would abort and hide the first one.
        if self.drop_policy == DropPolicy::MustNotDropItems && !thread::panicking() {
            assert!(
                self.len == 0,
                "dropped an ObjectPool of {} with {} live objects and a policy that says it must be empty when dropped",
                type_name::<T>(),
                self.len
            );
        }
    }
}

impl<T, A: SystemAllocator + Debug> Debug for ObjectPool<T, A> {
    #[cfg_attr(test, mutants::skip)] // Debug output is not load-bearing.
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectPool")
            .field("item_type", &format_args!("{}", type_name::<T>()))
            .field("cell_size", &CellLayout::<T>::SIZE)
            .field("len", &self.len)
            .field("slab_count", &self.slabs.len())
            .field("slab_size", &self.slab_size)
            .field("slab_remaining", &self.slab.remaining())
            .field("drop_policy", &self.drop_policy)
            .field("system_allocator", &self.system_allocator)
            .finish_non_exhaustive()
    }
}

// SAFETY: The raw pointers all point into slabs owned by this pool and carry no thread
// affinity. Moving the pool moves the objects and the allocator with it, so it is fine as long
// as both of those are Send. Sharing is not supported (no Sync).
unsafe impl<T: Send, A: SystemAllocator + Send> Send for ObjectPool<T, A> {}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
#[allow(
    clippy::multiple_unsafe_ops_per_block,
    clippy::arithmetic_side_effects,
    clippy::indexing_slicing,
    clippy::cast_possible_truncation,
    reason = "tests focus on succinct code and do not need to tick all the boxes"
)]
mod tests {

    use std::cell::Cell;
    use std::collections::HashSet;
    use std::panic::{AssertUnwindSafe, catch_unwind};
    use std::rc::Rc;
    use std::sync::{Arc, Mutex};

    use static_assertions::{assert_impl_all, assert_not_impl_any};

    use super::*;
    use crate::DEFAULT_SLAB_SIZE;
    #[cfg(debug_assertions)]
    use crate::HeapAllocator;
    use crate::fake_allocator::FakeAllocator;

    assert_impl_all!(ObjectPool<u64>: Send);
    assert_impl_all!(ObjectPool<String>: Send, Debug, Default);
    assert_not_impl_any!(ObjectPool<u64>: Sync);
    assert_not_impl_any!(ObjectPool<Rc<u64>>: Send);

    const POINTER_SIZE: usize = size_of::<*mut u8>();

    fn fake_pool<T>(allocator: &FakeAllocator) -> ObjectPool<T, FakeAllocator> {
        ObjectPool::<T>::builder()
            .system_allocator(allocator.clone())
            .build()
    }

    fn fake_pool_with_cells<T>(
        allocator: &FakeAllocator,
        cells_per_slab: usize,
    ) -> ObjectPool<T, FakeAllocator> {
        ObjectPool::<T>::builder()
            .slab_size(CellLayout::<T>::SIZE * cells_per_slab)
            .system_allocator(allocator.clone())
            .build()
    }

    thread_local! {
        static DROPS: Cell<usize> = const { Cell::new(0) };
    }

    /// Counts its drops in a thread-local, so abandoning it does not leak heap memory.
    #[derive(Debug, Default)]
    struct DropCounter {
        _payload: u64,
    }

    impl Drop for DropCounter {
        fn drop(&mut self) {
            DROPS.with(|drops| drops.set(drops.get() + 1));
        }
    }

    fn drop_count() -> usize {
        DROPS.with(Cell::get)
    }

    #[derive(Debug, PartialEq)]
    struct Settings {
        retries: u32,
        label: String,
        flags: [bool; 3],
    }

    impl Default for Settings {
        fn default() -> Self {
            Self {
                retries: 3,
                label: "default".to_string(),
                flags: [false, true, false],
            }
        }
    }

    #[test]
    fn smoke_test() {
        let allocator = FakeAllocator::new();
        let mut pool = fake_pool::<u32>(&allocator);

        assert_eq!(pool.len(), 0);
        assert!(pool.is_empty());
        assert_eq!(pool.slab_count(), 0);

        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        let c = pool.acquire().unwrap();

        assert_eq!(pool.len(), 3);
        assert!(!pool.is_empty());
        assert_eq!(pool.slab_count(), 1);

        // SAFETY: All objects are live and not referenced from anywhere else.
        unsafe {
            a.write(42);
            b.write(43);
            c.write(44);

            assert_eq!(a.read(), 42);
            assert_eq!(b.read(), 43);
            assert_eq!(c.read(), 44);
        }

        // SAFETY: Acquired from this pool above, released once.
        unsafe {
            pool.release(b);
        }
        assert_eq!(pool.len(), 2);

        let d = pool.acquire().unwrap();

        // SAFETY: All objects are live and not referenced from anywhere else.
        unsafe {
            assert_eq!(a.read(), 42);
            assert_eq!(c.read(), 44);
            assert_eq!(d.read(), 0);
        }

        // SAFETY: Acquired from this pool above, released once.
        unsafe {
            pool.release(a);
            pool.release(c);
            pool.release(d);
        }

        assert!(pool.is_empty());
    }

    #[test]
    fn live_objects_never_alias() {
        let allocator = FakeAllocator::new();
        let mut pool = fake_pool_with_cells::<u64>(&allocator, 7);

        let items = (0..100_u64)
            .map(|index| {
                let item = pool.acquire_with(|| index).unwrap();
                (index, item)
            })
            .collect::<Vec<_>>();

        let addresses = items
            .iter()
            .map(|(_, item)| item.as_ptr().addr())
            .collect::<HashSet<_>>();
        assert_eq!(addresses.len(), items.len());

        // If any two objects overlapped, one of them would have been overwritten.
        for (index, item) in &items {
            // SAFETY: The object is live and not referenced from anywhere else.
            assert_eq!(unsafe { item.read() }, *index);
        }

        // 100 objects at 7 per slab.
        assert_eq!(pool.slab_count(), 15);
        assert_eq!(allocator.request_count(), 15);

        for (_, item) in items {
            // SAFETY: Acquired from this pool above, released once.
            unsafe {
                pool.release(item);
            }
        }
    }

    #[test]
    fn acquired_object_is_default_initialized() {
        let allocator = FakeAllocator::new();
        let mut pool = fake_pool::<Settings>(&allocator);

        let item = pool.acquire().unwrap();

        // SAFETY: The object is live and not referenced from anywhere else.
        assert_eq!(unsafe { item.as_ref() }, &Settings::default());

        // SAFETY: Acquired from this pool above, released once.
        unsafe {
            pool.release(item);
        }
    }

    #[test]
    fn reused_cell_holds_fresh_object() {
        let allocator = FakeAllocator::new();
        let mut pool = fake_pool::<Settings>(&allocator);

        let item = pool.acquire().unwrap();

        // SAFETY: The object is live and not referenced from anywhere else.
        unsafe {
            let settings = &mut *item.as_ptr();
            settings.retries = 99;
            settings.label.push_str(" but modified");
            settings.flags = [true; 3];
        }

        // SAFETY: Acquired from this pool above, released once.
        unsafe {
            pool.release(item);
        }

        let reused = pool.acquire().unwrap();
        assert_eq!(reused, item);

        // SAFETY: The object is live and not referenced from anywhere else.
        assert_eq!(unsafe { reused.as_ref() }, &Settings::default());

        // SAFETY: Acquired from this pool above, released once.
        unsafe {
            pool.release(reused);
        }
    }

    #[test]
    fn release_then_acquire_returns_same_address() {
        let allocator = FakeAllocator::new();
        let mut pool = fake_pool::<u64>(&allocator);

        let _keep_a = pool.acquire().unwrap();
        let item = pool.acquire().unwrap();
        let _keep_c = pool.acquire().unwrap();

        // SAFETY: Acquired from this pool above, released once.
        unsafe {
            pool.release(item);
        }

        assert_eq!(pool.acquire().unwrap(), item);
    }

    #[test]
    fn fourth_acquire_from_three_cell_slab_requests_one_slab() {
        let allocator = FakeAllocator::new();
        let mut pool = fake_pool_with_cells::<u64>(&allocator, 3);

        let _a = pool.acquire().unwrap();
        let _b = pool.acquire().unwrap();
        let _c = pool.acquire().unwrap();

        assert_eq!(allocator.request_count(), 1);

        let _d = pool.acquire().unwrap();

        assert_eq!(allocator.request_count(), 2);
        assert_eq!(pool.slab_count(), 2);

        // A slab smaller than a page is still requested as one whole page.
        assert_eq!(allocator.outstanding_page_counts(), vec![1, 1]);
    }

    #[test]
    fn out_of_memory_on_first_request() {
        let allocator = FakeAllocator::new();
        allocator.fail_next_requests(1);

        let mut pool = fake_pool::<u64>(&allocator);

        let result = pool.acquire();

        assert!(matches!(
            result,
            Err(Error::OutOfMemory {
                requested_bytes: DEFAULT_SLAB_SIZE
            })
        ));

        assert_eq!(allocator.request_count(), 1);
        assert!(pool.is_empty());
        assert!(pool.freelist.is_empty());
        assert_eq!(pool.slab_count(), 0);
        assert_eq!(pool.slab.remaining(), 0);

        // The failure is not sticky - the next attempt asks again.
        let item = pool.acquire().unwrap();
        assert_eq!(allocator.request_count(), 2);

        // SAFETY: Acquired from this pool above, released once.
        unsafe {
            pool.release(item);
        }
    }

    #[test]
    fn out_of_memory_does_not_call_constructor() {
        let allocator = FakeAllocator::new();
        allocator.fail_next_requests(1);

        let mut pool = fake_pool::<u64>(&allocator);

        let constructed = Cell::new(false);
        let result = pool.acquire_with(|| {
            constructed.set(true);
            5
        });

        assert!(result.is_err());
        assert!(!constructed.get());
    }

    #[test]
    fn out_of_memory_after_exhaustion_keeps_released_cells() {
        let allocator = FakeAllocator::new();
        let mut pool = fake_pool_with_cells::<u64>(&allocator, 1);

        let a = pool.acquire().unwrap();

        allocator.fail_next_requests(1);
        assert!(pool.acquire().is_err());
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.slab_count(), 1);

        // SAFETY: Acquired from this pool above, released once.
        unsafe {
            pool.release(a);
        }

        // The freelist is consulted before the system allocator, so no new request is made.
        assert_eq!(pool.acquire().unwrap(), a);
        assert_eq!(allocator.request_count(), 2);
    }

    #[test]
    fn freelist_is_lifo() {
        let allocator = FakeAllocator::new();
        let mut pool = fake_pool::<u64>(&allocator);

        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        let _c = pool.acquire().unwrap();

        // SAFETY: Acquired from this pool above, released once.
        unsafe {
            pool.release(b);
            pool.release(a);
        }

        assert_eq!(pool.acquire().unwrap(), a);
        assert_eq!(pool.acquire().unwrap(), b);
    }

    #[test]
    fn items_smaller_than_pointer_do_not_corrupt_neighbors() {
        let allocator = FakeAllocator::new();
        let mut pool = fake_pool::<u8>(&allocator);

        assert_eq!(pool.cell_size(), POINTER_SIZE);

        let items = (0..16_u8)
            .map(|value| pool.acquire_with(|| value).unwrap())
            .collect::<Vec<_>>();

        // Release every other item. Each release writes a whole pointer into an 1-byte object's
        // cell, which must not spill over into the next object.
        for item in items.iter().step_by(2) {
            // SAFETY: Acquired from this pool above, released once.
            unsafe {
                pool.release(*item);
            }
        }

        for (value, item) in items.iter().enumerate().skip(1).step_by(2) {
            // SAFETY: The object is live and not referenced from anywhere else.
            assert_eq!(unsafe { item.read() }, value as u8);
        }

        // Round trip through the freelist again, most recently released first.
        let reacquired = (0..8)
            .map(|_| pool.acquire_with(|| 0xFF).unwrap())
            .collect::<Vec<_>>();

        assert_eq!(reacquired[0], items[14]);
        assert_eq!(reacquired[7], items[0]);

        for (value, item) in items.iter().enumerate().skip(1).step_by(2) {
            // SAFETY: The object is live and not referenced from anywhere else.
            assert_eq!(unsafe { item.read() }, value as u8);
        }

        // Addresses are one pointer apart, not one byte apart.
        assert_eq!(
            items[1].as_ptr().addr() - items[0].as_ptr().addr(),
            POINTER_SIZE
        );
    }

    #[test]
    fn odd_sized_items_with_misaligned_links() {
        let allocator = FakeAllocator::new();
        let mut pool = fake_pool::<[u32; 3]>(&allocator);

        let items = (0..5_u32)
            .map(|n| pool.acquire_with(|| [n, n + 100, n + 200]).unwrap())
            .collect::<Vec<_>>();

        // SAFETY: Acquired from this pool above, released once.
        unsafe {
            pool.release(items[1]);
            pool.release(items[3]);
        }

        for &index in &[0_usize, 2, 4] {
            let n = index as u32;

            // SAFETY: The object is live and not referenced from anywhere else.
            assert_eq!(unsafe { items[index].read() }, [n, n + 100, n + 200]);
        }

        assert_eq!(pool.acquire().unwrap(), items[3]);
        assert_eq!(pool.acquire().unwrap(), items[1]);
    }

    #[test]
    fn over_aligned_items_are_aligned() {
        #[derive(Default)]
        #[repr(align(64))]
        struct CacheLine {
            value: u8,
        }

        let allocator = FakeAllocator::new();
        let mut pool = fake_pool_with_cells::<CacheLine>(&allocator, 3);

        for _ in 0..10 {
            let item = pool.acquire().unwrap();

            assert!(item.is_aligned());

            // SAFETY: The object is live and not referenced from anywhere else.
            assert_eq!(unsafe { item.as_ref() }.value, 0);
        }

        assert_eq!(pool.cell_size(), 64);
    }

    #[test]
    fn zero_sized_items_get_distinct_cells() {
        let allocator = FakeAllocator::new();
        let mut pool = fake_pool::<()>(&allocator);

        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();

        assert_ne!(a, b);
        assert_eq!(pool.len(), 2);

        // SAFETY: Acquired from this pool above, released once.
        unsafe {
            pool.release(a);
        }

        assert_eq!(pool.acquire().unwrap(), a);
    }

    #[test]
    fn over_aligned_zero_sized_items_are_aligned() {
        #[derive(Default)]
        #[repr(align(16))]
        struct Marker;

        let allocator = FakeAllocator::new();
        let mut pool = fake_pool_with_cells::<Marker>(&allocator, 3);

        assert_eq!(pool.cell_size(), 16.max(POINTER_SIZE));

        let items = (0..10).map(|_| pool.acquire().unwrap()).collect::<Vec<_>>();

        for item in &items {
            assert!(item.is_aligned());
        }

        let addresses = items
            .iter()
            .map(|item| item.as_ptr().addr())
            .collect::<HashSet<_>>();
        assert_eq!(addresses.len(), items.len());

        for item in items {
            // SAFETY: Acquired from this pool above, released once.
            unsafe {
                pool.release(item);
            }
        }

        // Cells coming back from the freelist are just as aligned.
        let reused = pool.acquire().unwrap();
        assert!(reused.is_aligned());
    }

    /// Hands out blocks that are offset from a page boundary, breaking the alignment promise.
    #[cfg(debug_assertions)]
    #[derive(Debug)]
    struct MisalignedAllocator;

    #[cfg(debug_assertions)]
    const MISALIGNMENT: usize = 8;

    // SAFETY: This allocator deliberately breaks the alignment promise. It is only used to verify
    // that the pool notices before writing anything into the returned memory.
    #[cfg(debug_assertions)]
    unsafe impl SystemAllocator for MisalignedAllocator {
        fn allocate_pages(&self, page_count: NonZero<usize>) -> Option<NonNull<u8>> {
            let block = HeapAllocator.allocate_pages(page_count)?;

            // SAFETY: The block is at least one page long, so the offset stays in bounds.
            Some(unsafe { block.add(MISALIGNMENT) })
        }

        unsafe fn release_pages(&self, ptr: NonNull<u8>, page_count: NonZero<usize>) {
            // SAFETY: Every pointer we hand out is MISALIGNMENT bytes past a heap block.
            let block = unsafe { ptr.sub(MISALIGNMENT) };

            // SAFETY: Forwarding guarantees from the caller, adjusted back to the real block.
            unsafe {
                HeapAllocator.release_pages(block, page_count);
            }
        }
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic]
    fn misaligned_cell_is_detected_before_construction() {
        #[derive(Default)]
        #[repr(align(64))]
        struct CacheLine {
            _value: u8,
        }

        let mut pool = ObjectPool::<CacheLine>::builder()
            .slab_size(64)
            .system_allocator(MisalignedAllocator)
            .build();

        _ = pool.acquire();
    }

    #[test]
    fn release_drops_object_once() {
        let allocator = FakeAllocator::new();
        let mut pool = fake_pool::<DropCounter>(&allocator);

        let before = drop_count();

        let item = pool.acquire().unwrap();
        assert_eq!(drop_count(), before);

        // SAFETY: Acquired from this pool above, released once.
        unsafe {
            pool.release(item);
        }
        assert_eq!(drop_count(), before + 1);

        // Reusing the cell does not drop the old contents again.
        let reused = pool.acquire().unwrap();
        assert_eq!(reused, item);
        assert_eq!(drop_count(), before + 1);

        // SAFETY: Acquired from this pool above, released once.
        unsafe {
            pool.release(reused);
        }
        assert_eq!(drop_count(), before + 2);
    }

    #[test]
    fn release_drops_owned_resources() {
        let allocator = FakeAllocator::new();
        let mut pool = fake_pool::<Rc<String>>(&allocator);

        let shared = Rc::new("shared".to_string());

        let item = pool.acquire_with(|| Rc::clone(&shared)).unwrap();
        assert_eq!(Rc::strong_count(&shared), 2);

        // SAFETY: Acquired from this pool above, released once.
        unsafe {
            pool.release(item);
        }
        assert_eq!(Rc::strong_count(&shared), 1);
    }

    #[test]
    fn drop_abandons_live_objects_and_returns_slabs() {
        let allocator = FakeAllocator::new();
        let mut pool = fake_pool_with_cells::<DropCounter>(&allocator, 2);

        let before = drop_count();

        for _ in 0..5 {
            _ = pool.acquire().unwrap();
        }

        assert_eq!(allocator.outstanding_count(), 3);

        drop(pool);

        assert_eq!(drop_count(), before);
        assert_eq!(allocator.outstanding_count(), 0);
        assert_eq!(allocator.release_count(), 3);
    }

    #[test]
    fn drop_of_unused_pool_touches_nothing() {
        let allocator = FakeAllocator::new();

        drop(fake_pool::<u64>(&allocator));

        assert_eq!(allocator.request_count(), 0);
        assert_eq!(allocator.release_count(), 0);
    }

    #[test]
    #[should_panic]
    fn must_not_drop_items_panics_with_live_objects() {
        let allocator = FakeAllocator::new();

        let mut pool = ObjectPool::<u64>::builder()
            .drop_policy(DropPolicy::MustNotDropItems)
            .system_allocator(allocator)
            .build();

        _ = pool.acquire().unwrap();
    }

    #[test]
    fn must_not_drop_items_is_fine_when_empty() {
        let allocator = FakeAllocator::new();

        let mut pool = ObjectPool::<u64>::builder()
            .drop_policy(DropPolicy::MustNotDropItems)
            .system_allocator(allocator.clone())
            .build();

        let item = pool.acquire().unwrap();

        // SAFETY: Acquired from this pool above, released once.
        unsafe {
            pool.release(item);
        }

        drop(pool);

        assert_eq!(allocator.outstanding_count(), 0);
    }

    #[test]
    fn leak_slabs_keeps_objects_valid() {
        let allocator = FakeAllocator::new();

        let mut pool = ObjectPool::<u64>::builder()
            .drop_policy(DropPolicy::LeakSlabs)
            .system_allocator(allocator.clone())
            .build();

        let item = pool.acquire_with(|| 1234).unwrap();

        drop(pool);

        assert_eq!(allocator.release_count(), 0);
        assert_eq!(allocator.outstanding_count(), 1);

        // SAFETY: The slab was leaked, so the abandoned object is still there.
        assert_eq!(unsafe { item.read() }, 1234);

        // SAFETY: We are done with the object.
        unsafe {
            allocator.release_all_outstanding();
        }
    }

    #[test]
    fn tail_of_previous_slab_is_abandoned() {
        let allocator = FakeAllocator::new();

        // Room for two 8-byte cells and a 4-byte tail that can never hold a cell.
        let mut pool = ObjectPool::<u64>::builder()
            .slab_size(20)
            .system_allocator(allocator.clone())
            .build();

        let a = pool.acquire().unwrap();
        let _b = pool.acquire().unwrap();
        assert_eq!(pool.slab.remaining(), 4);

        let c = pool.acquire().unwrap();
        assert_eq!(allocator.request_count(), 2);
        assert_eq!(pool.slab.remaining(), 12);

        // The new object lives at the start of the new slab, not in the old tail.
        assert_ne!(c.as_ptr().addr(), a.as_ptr().addr() + 16);
    }

    #[test]
    fn panicking_constructor_keeps_cell() {
        let allocator = FakeAllocator::new();
        let mut pool = fake_pool::<u64>(&allocator);

        let result = catch_unwind(AssertUnwindSafe(|| {
            pool.acquire_with(|| panic!("constructor failed"))
        }));
        assert!(result.is_err());
        assert!(pool.is_empty());

        // The cell taken for the failed object is the first one handed out afterwards.
        let first = pool.acquire().unwrap();
        let second = pool.acquire().unwrap();

        assert_eq!(second.as_ptr().addr(), first.as_ptr().addr() + 8);
        assert_eq!(allocator.request_count(), 1);
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn panicking_destructor_still_recycles_cell() {
        struct Grumpy;

        impl Drop for Grumpy {
            fn drop(&mut self) {
                panic!("refusing to be dropped");
            }
        }

        let allocator = FakeAllocator::new();
        let mut pool = fake_pool::<Grumpy>(&allocator);

        let item = pool.acquire_with(|| Grumpy).unwrap();

        let result = catch_unwind(AssertUnwindSafe(|| {
            // SAFETY: Acquired from this pool above, released once.
            unsafe {
                pool.release(item);
            }
        }));
        assert!(result.is_err());
        assert!(pool.is_empty());

        let reused = pool.acquire_with(|| Grumpy).unwrap();
        assert_eq!(reused, item);

        // Grumpy would panic again on release, so we let the pool abandon it.
    }

    #[test]
    fn works_with_os_allocator() {
        let mut pool = ObjectPool::<String>::new();

        let items = (0..1000)
            .map(|n| pool.acquire_with(|| format!("item {n}")).unwrap())
            .collect::<Vec<_>>();

        assert_eq!(
            pool.slab_count(),
            (1000 * size_of::<String>()).div_ceil(DEFAULT_SLAB_SIZE)
        );

        for (n, item) in items.iter().enumerate() {
            // SAFETY: The object is live and not referenced from anywhere else.
            assert_eq!(unsafe { item.as_ref() }, &format!("item {n}"));
        }

        for item in items {
            // SAFETY: Acquired from this pool above, released once.
            unsafe {
                pool.release(item);
            }
        }
    }

    #[test]
    fn multithreaded_via_mutex() {
        let pool = Arc::new(Mutex::new(ObjectPool::<u64>::new()));

        let handles = (0..4)
            .map(|_| {
                let pool = Arc::clone(&pool);

                thread::spawn(move || {
                    for n in 0..100 {
                        let mut pool = pool.lock().unwrap();

                        let item = pool.acquire_with(|| n).unwrap();

                        // SAFETY: The object is live and not referenced from anywhere else.
                        assert_eq!(unsafe { item.read() }, n);

                        // SAFETY: Acquired from this pool above, released once.
                        unsafe {
                            pool.release(item);
                        }
                    }
                })
            })
            .collect::<Vec<_>>();

        for handle in handles {
            handle.join().unwrap();
        }

        let pool = pool.lock().unwrap();
        assert!(pool.is_empty());
        assert_eq!(pool.slab_count(), 1);
    }

    #[test]
    fn moves_between_threads() {
        let mut pool = ObjectPool::<u64>::new();
        let item = pool.acquire_with(|| 5).unwrap();

        // SAFETY: Acquired from this pool above, released once.
        unsafe {
            pool.release(item);
        }

        let pool = thread::spawn(move || {
            let item = pool.acquire().unwrap();

            // SAFETY: The object is live and not referenced from anywhere else.
            assert_eq!(unsafe { item.read() }, 0);

            // SAFETY: Acquired from this pool above, released once.
            unsafe {
                pool.release(item);
            }

            pool
        })
        .join()
        .unwrap();

        assert!(pool.is_empty());
    }

    #[test]
    fn debug_output_describes_pool() {
        let allocator = FakeAllocator::new();
        let mut pool = fake_pool_with_cells::<u64>(&allocator, 4);

        let item = pool.acquire().unwrap();

        let debug_output = format!("{pool:?}");
        assert!(debug_output.contains("ObjectPool"));
        assert!(debug_output.contains("u64"));
        assert!(debug_output.contains("slab_remaining: 24"));

        // SAFETY: Acquired from this pool above, released once.
        unsafe {
            pool.release(item);
        }
    }
}
