use std::any::type_name;
use std::fmt::{self, Debug, Formatter};
use std::marker::PhantomData;

use crate::{DEFAULT_SLAB_SIZE, DropPolicy, ObjectPool, OsAllocator, SystemAllocator};

/// Builder for creating an instance of [`ObjectPool`].
///
/// You only need to use this builder if you want to customize the pool configuration.
/// The default configuration used by [`ObjectPool::new()`][1] is sufficient for most use cases.
///
/// # Examples
///
/// ```
/// use object_pool::{DropPolicy, HeapAllocator, ObjectPool};
///
/// let pool = ObjectPool::<u32>::builder()
///     .slab_size(16 * 1024)
///     .drop_policy(DropPolicy::MustNotDropItems)
///     .system_allocator(HeapAllocator)
///     .build();
///
/// assert_eq!(pool.slab_size(), 16 * 1024);
/// ```
///
/// [1]: ObjectPool::new
#[must_use]
pub struct ObjectPoolBuilder<T, A = OsAllocator> {
    slab_size: usize,
    drop_policy: DropPolicy,
    system_allocator: A,

    _item: PhantomData<T>,
}

impl<T, A: Debug> Debug for ObjectPoolBuilder<T, A> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectPoolBuilder")
            .field("item_type", &format_args!("{}", type_name::<T>()))
            .field("slab_size", &self.slab_size)
            .field("drop_policy", &self.drop_policy)
            .field("system_allocator", &self.system_allocator)
            .finish()
    }
}

impl<T> ObjectPoolBuilder<T> {
    pub(crate) fn new() -> Self {
        Self {
            slab_size: DEFAULT_SLAB_SIZE,
            drop_policy: DropPolicy::default(),
            system_allocator: OsAllocator,
            _item: PhantomData,
        }
    }
}

impl<T, A: SystemAllocator> ObjectPoolBuilder<T, A> {
    /// Sets the size of each slab requested from the system allocator, in bytes.
    ///
    /// Requests to the system allocator are made in whole pages, so a slab size that is not a
    /// multiple of [`PAGE_SIZE`][crate::PAGE_SIZE] leaves the rest of the last page unused.
    ///
    /// The default is [`DEFAULT_SLAB_SIZE`].
    ///
    /// # Examples
    ///
    /// ```
    /// use object_pool::ObjectPool;
    ///
    /// // Room for exactly 3 objects per slab.
    /// let pool = ObjectPool::<u64>::builder().slab_size(3 * 8).build();
    /// ```
    pub fn slab_size(mut self, bytes: usize) -> Self {
        self.slab_size = bytes;
        self
    }

    /// Sets the [drop policy][DropPolicy] for the pool. This governs what happens to the slabs
    /// and to any remaining objects when the pool is dropped.
    ///
    /// # Examples
    ///
    /// ```
    /// use object_pool::{DropPolicy, ObjectPool};
    ///
    /// let pool = ObjectPool::<u32>::builder()
    ///     .drop_policy(DropPolicy::LeakSlabs)
    ///     .build();
    /// ```
    pub fn drop_policy(mut self, policy: DropPolicy) -> Self {
        self.drop_policy = policy;
        self
    }

    /// Sets the [system allocator][SystemAllocator] that provides the memory for slabs.
    ///
    /// The default is [`OsAllocator`].
    ///
    /// # Examples
    ///
    /// ```
    /// use object_pool::{HeapAllocator, ObjectPool};
    ///
    /// let pool = ObjectPool::<u32>::builder()
    ///     .system_allocator(HeapAllocator)
    ///     .build();
    /// ```
    pub fn system_allocator<B: SystemAllocator>(self, allocator: B) -> ObjectPoolBuilder<T, B> {
        ObjectPoolBuilder {
            slab_size: self.slab_size,
            drop_policy: self.drop_policy,
            system_allocator: allocator,
            _item: PhantomData,
        }
    }

    /// Builds the object pool with the specified configuration.
    ///
    /// No memory is requested from the system allocator until the first object is acquired.
    ///
    /// # Panics
    ///
    /// Panics if the slab size is too small to hold a single object or if the alignment of `T`
    /// exceeds [`SLAB_ALIGNMENT`][crate::SLAB_ALIGNMENT].
    ///
    /// # Examples
    ///
    /// ```
    /// use object_pool::ObjectPool;
    ///
    /// let pool = ObjectPool::<u32>::builder().build();
    /// ```
    #[must_use]
    pub fn build(self) -> ObjectPool<T, A> {
        ObjectPool::new_inner(self.slab_size, self.drop_policy, self.system_allocator)
    }
}
