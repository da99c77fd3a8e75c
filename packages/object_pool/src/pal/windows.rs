use std::io;
use std::ptr::NonNull;

use windows::Win32::System::Memory::{
    MEM_COMMIT, MEM_RELEASE, MEM_RESERVE, PAGE_READWRITE, VirtualAlloc, VirtualFree,
};

use crate::pal::Platform;

/// Maps pages via `VirtualAlloc()`, which always returns memory aligned to the allocation
/// granularity (64 KiB).
#[derive(Debug, Default)]
pub(crate) struct BuildTargetPlatform;

impl Platform for BuildTargetPlatform {
    fn map_pages(&self, len: usize) -> io::Result<NonNull<u8>> {
        // SAFETY: We are asking for a new reservation at an address of the system's choosing,
        // so no existing memory is affected. No other safety requirements.
        let ptr = unsafe { VirtualAlloc(None, len, MEM_COMMIT | MEM_RESERVE, PAGE_READWRITE) };

        NonNull::new(ptr.cast::<u8>()).ok_or_else(io::Error::last_os_error)
    }

    unsafe fn unmap_pages(&self, ptr: NonNull<u8>, _len: usize) -> io::Result<()> {
        // SAFETY: The caller guarantees that this is exactly a reservation we created and that
        // nobody is going to touch it anymore. MEM_RELEASE requires a size of zero.
        unsafe { VirtualFree(ptr.as_ptr().cast(), 0, MEM_RELEASE) }.map_err(io::Error::other)
    }
}
