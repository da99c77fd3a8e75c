use std::alloc::{Layout, alloc, dealloc};
use std::io;
use std::ptr::NonNull;

use crate::SLAB_ALIGNMENT;
use crate::pal::Platform;

/// We use this under Miri because Miri cannot talk to a real OS but the Rust global allocator
/// still works. Also used on targets we have no native bindings for.
#[derive(Debug, Default)]
pub(crate) struct BuildTargetPlatform;

fn layout(len: usize) -> io::Result<Layout> {
    Layout::from_size_align(len, SLAB_ALIGNMENT).map_err(io::Error::other)
}

impl Platform for BuildTargetPlatform {
    fn map_pages(&self, len: usize) -> io::Result<NonNull<u8>> {
        assert!(len > 0, "cannot map zero pages");

        let layout = layout(len)?;

        // SAFETY: The layout is not zero-sized (guarded by assertion above).
        NonNull::new(unsafe { alloc(layout) })
            .ok_or_else(|| io::Error::from(io::ErrorKind::OutOfMemory))
    }

    unsafe fn unmap_pages(&self, ptr: NonNull<u8>, len: usize) -> io::Result<()> {
        let layout = layout(len)?;

        // SAFETY: The caller guarantees that this block came from `map_pages()` with the same
        // length, so it was allocated with this very layout.
        unsafe {
            dealloc(ptr.as_ptr(), layout);
        }

        Ok(())
    }
}
