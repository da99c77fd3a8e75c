use std::ptr::NonNull;

/// Bump-allocation cursor over the current slab of a pool.
///
/// The cursor only knows where the next unused byte of the slab is and how many bytes remain
/// after it. It does not own the slab memory and it forgets all about a slab once it is
/// replaced, so any tail bytes too small to hold another cell are simply abandoned.
#[derive(Debug)]
pub(crate) struct SlabCursor {
    next: NonNull<u8>,
    remaining: usize,
}

impl SlabCursor {
    /// A cursor with no slab behind it. The first allocation attempt will fail, prompting the
    /// owner to acquire a slab.
    pub(crate) const fn exhausted() -> Self {
        Self {
            next: NonNull::dangling(),
            remaining: 0,
        }
    }

    /// Starts carving up a fresh slab.
    ///
    /// # Safety
    ///
    /// `base` must be valid for reads and writes of `len` bytes for as long as any cell carved
    /// out of it is in use.
    pub(crate) const unsafe fn new(base: NonNull<u8>, len: usize) -> Self {
        Self {
            next: base,
            remaining: len,
        }
    }

    #[must_use]
    pub(crate) fn remaining(&self) -> usize {
        self.remaining
    }

    /// Carves the next `cell_size` bytes off the slab, returning `None` if fewer than
    /// `cell_size` bytes remain.
    #[must_use]
    pub(crate) fn bump(&mut self, cell_size: usize) -> Option<NonNull<u8>> {
        let remaining = self.remaining.checked_sub(cell_size)?;
        let cell = self.next;

        // SAFETY: We just verified that at least `cell_size` bytes of the slab remain after
        // `next`, so the result is at most one past the end of the slab.
        self.next = unsafe { self.next.add(cell_size) };
        self.remaining = remaining;

        Some(cell)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn exhausted_cursor_has_no_room() {
        let mut cursor = SlabCursor::exhausted();

        assert_eq!(cursor.remaining(), 0);
        assert_eq!(cursor.bump(1), None);
    }

    #[test]
    fn bumps_sequentially_until_exhausted() {
        let mut storage = vec![0_u8; 32];
        let base = NonNull::new(storage.as_mut_ptr()).expect("buffer pointers are never null");

        // SAFETY: The storage outlives the cursor and is 32 bytes long.
        let mut cursor = unsafe { SlabCursor::new(base, 32) };

        let first = cursor.bump(12).expect("32 bytes fit a 12-byte cell");
        let second = cursor.bump(12).expect("20 bytes fit a 12-byte cell");

        assert_eq!(first, base);
        assert_eq!(second.as_ptr(), base.as_ptr().wrapping_add(12));
        assert_eq!(cursor.remaining(), 8);

        // The 8-byte tail is too small for another cell and stays put.
        assert_eq!(cursor.bump(12), None);
        assert_eq!(cursor.remaining(), 8);
    }

    #[test]
    fn exact_fit_consumes_everything() {
        let mut storage = vec![0_u8; 24];
        let base = NonNull::new(storage.as_mut_ptr()).expect("buffer pointers are never null");

        // SAFETY: The storage outlives the cursor and is 24 bytes long.
        let mut cursor = unsafe { SlabCursor::new(base, 24) };

        assert!(cursor.bump(8).is_some());
        assert!(cursor.bump(8).is_some());
        assert!(cursor.bump(8).is_some());
        assert_eq!(cursor.remaining(), 0);
        assert_eq!(cursor.bump(8), None);
    }
}
