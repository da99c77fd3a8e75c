#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! A fixed-type object pool that amortizes memory acquisition across large slabs and recycles
//! released objects through an intrusive freelist.
//!
//! This package provides [`ObjectPool`], an allocator for instances of a single type `T`. It is
//! intended as a building block for higher-level memory management (e.g. a pool feeding metadata
//! objects to a larger allocator), not as a general-purpose allocator.
//!
//! # Key Features
//!
//! - **Three-tier allocation**: released cells are reused first, then cells are bump-allocated
//!   from the current slab, and only when the slab is exhausted is a new slab requested from the
//!   [`SystemAllocator`].
//! - **Header-free cells**: a live object occupies its whole cell. A free cell stores the link to
//!   the next free cell inside its own storage, so the freelist costs no extra memory.
//! - **LIFO reuse**: the most recently released cell is the first to be handed out again.
//! - **Pluggable page source**: slabs come from an [`OsAllocator`] by default (`mmap` on Unix,
//!   `VirtualAlloc` on Windows) but any [`SystemAllocator`] can be supplied via the builder.
//! - **Thread mobility**: the pool can be moved between threads but is never shared without
//!   external synchronization.
//!
//! # Example
//!
//! ```rust
//! use object_pool::ObjectPool;
//!
//! #[derive(Default)]
//! struct Span {
//!     start: usize,
//!     pages: usize,
//! }
//!
//! let mut pool = ObjectPool::<Span>::new();
//!
//! let span = pool.acquire().unwrap();
//!
//! // SAFETY: The object is live until we release it and nobody else references it.
//! unsafe {
//!     assert_eq!(span.as_ref().start, 0);
//!     (*span.as_ptr()).pages = 4;
//! }
//!
//! // SAFETY: The pointer came from this pool and has not been released yet.
//! unsafe { pool.release(span) };
//!
//! // The most recently released cell is reused first.
//! let again = pool.acquire().unwrap();
//! assert_eq!(again, span);
//!
//! // SAFETY: Freshly acquired from this pool, released exactly once.
//! unsafe { pool.release(again) };
//! ```
//!
//! # Safety contract
//!
//! The pool hands out raw pointers and trusts the caller to give each of them back exactly once
//! via [`ObjectPool::release()`]. Releasing a pointer twice, releasing a pointer from another
//! pool or using an object after releasing it is undefined behavior and is not detected.

mod builder;
mod cell;
mod drop_policy;
mod error;
mod freelist;
mod os_allocator;
mod pal;
mod pool;
mod slab;
mod system_allocator;

#[cfg(test)]
mod fake_allocator;

pub use builder::*;
pub use drop_policy::*;
pub use error::*;
pub use os_allocator::*;
pub use pool::*;
pub use system_allocator::*;
