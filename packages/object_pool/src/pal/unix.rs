use std::io;
use std::ptr::{self, NonNull};

use libc::{MAP_ANONYMOUS, MAP_FAILED, MAP_PRIVATE, PROT_READ, PROT_WRITE};

use crate::pal::Platform;

/// Maps pages via anonymous private `mmap()`, which always returns memory aligned to the
/// operating system page size (at least 4 KiB on every Unix we target).
#[derive(Debug, Default)]
pub(crate) struct BuildTargetPlatform;

impl Platform for BuildTargetPlatform {
    fn map_pages(&self, len: usize) -> io::Result<NonNull<u8>> {
        // SAFETY: We are asking for a new anonymous mapping at an address of the kernel's
        // choosing, so no existing memory is affected. No other safety requirements.
        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                PROT_READ | PROT_WRITE,
                MAP_PRIVATE | MAP_ANONYMOUS,
                -1,
                0,
            )
        };

        if ptr == MAP_FAILED {
            return Err(io::Error::last_os_error());
        }

        NonNull::new(ptr.cast::<u8>())
            .ok_or_else(|| io::Error::other("mmap() succeeded but returned a null address"))
    }

    unsafe fn unmap_pages(&self, ptr: NonNull<u8>, len: usize) -> io::Result<()> {
        // SAFETY: The caller guarantees that this is exactly a mapping we created and that
        // nobody is going to touch it anymore.
        let result = unsafe { libc::munmap(ptr.as_ptr().cast(), len) };

        if result != 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(())
    }
}
