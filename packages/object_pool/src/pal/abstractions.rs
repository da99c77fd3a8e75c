use std::fmt::Debug;
use std::io;
use std::ptr::NonNull;

/// Page mapping functionality of the platform.
///
/// All page-level calls into the operating system go through this trait.
pub(crate) trait Platform: Debug + Send + Sync + 'static {
    /// Maps `len` bytes of fresh readable and writable memory.
    ///
    /// The returned memory is aligned to at least [`SLAB_ALIGNMENT`][crate::SLAB_ALIGNMENT].
    /// `len` must not be zero.
    fn map_pages(&self, len: usize) -> io::Result<NonNull<u8>>;

    /// Unmaps memory previously mapped by `map_pages()`.
    ///
    /// # Safety
    ///
    /// `ptr` and `len` must exactly match a previous successful `map_pages()` call whose memory
    /// has not been unmapped yet. The memory must not be used afterwards.
    unsafe fn unmap_pages(&self, ptr: NonNull<u8>, len: usize) -> io::Result<()>;
}
