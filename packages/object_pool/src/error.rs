use thiserror::Error;

/// Errors that can occur when acquiring objects from an [`ObjectPool`][crate::ObjectPool].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The [`SystemAllocator`][crate::SystemAllocator] could not provide memory for a new slab.
    ///
    /// The pool is left unchanged. Retrying is up to the caller, e.g. after releasing objects
    /// held by other pools.
    #[error("system allocator could not provide a slab of {requested_bytes} bytes")]
    OutOfMemory {
        /// The number of bytes requested from the system allocator, rounded up to whole pages.
        requested_bytes: usize,
    },
}

/// A specialized `Result` type for object pool operations, returning the crate's
/// [`Error`] type as the error value.
pub(crate) type Result<T> = std::result::Result<T, Error>;
