use std::ptr::{self, NonNull};

/// Intrusive singly-linked stack of free cells.
///
/// Each free cell stores the address of the next free cell in its leading pointer-sized bytes,
/// with null terminating the list. No memory is used beyond the head pointer itself.
///
/// The freelist does not own the cells. It is up to the owner to only push cells that are valid
/// for reads and writes of a pointer and that stay valid for as long as they are in the list.
#[derive(Debug)]
pub(crate) struct Freelist {
    head: Option<NonNull<u8>>,
}

impl Freelist {
    pub(crate) const fn new() -> Self {
        Self { head: None }
    }

    #[cfg(test)]
    #[must_use]
    pub(crate) fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Adds a cell to the top of the stack.
    ///
    /// # Safety
    ///
    /// The cell must be valid for writes of a pointer (alignment not required), must not already
    /// be in the list and must remain valid until it is popped again. Any previous contents of
    /// its leading pointer-sized bytes are overwritten.
    pub(crate) unsafe fn push(&mut self, cell: NonNull<u8>) {
        let next = self.head.map_or(ptr::null_mut(), NonNull::as_ptr);

        // SAFETY: Forwarding guarantees from the caller. Cells are only guaranteed to be aligned
        // for their item type, which may be less strict than pointer alignment.
        unsafe {
            cell.cast::<*mut u8>().write_unaligned(next);
        }

        self.head = Some(cell);
    }

    /// Removes the most recently pushed cell from the stack, if any.
    ///
    /// The returned cell still contains the stale link in its leading bytes and should be
    /// treated as uninitialized memory.
    #[must_use]
    pub(crate) fn pop(&mut self) -> Option<NonNull<u8>> {
        let cell = self.head?;

        // SAFETY: Every cell in the list was pushed via `push()`, whose caller promised that the
        // cell remains valid while in the list, and `push()` wrote a link into it.
        let next = unsafe { cell.cast::<*mut u8>().read_unaligned() };

        self.head = NonNull::new(next);

        Some(cell)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
#[allow(
    clippy::multiple_unsafe_ops_per_block,
    clippy::arithmetic_side_effects,
    reason = "tests focus on succinct code and do not need to tick all the boxes"
)]
mod tests {
    use super::*;

    const CELL: usize = size_of::<*mut u8>();

    fn cell_at(base: *mut u8, index: usize) -> NonNull<u8> {
        NonNull::new(base.wrapping_add(index * CELL)).expect("buffer pointers are never null")
    }

    #[test]
    fn starts_empty() {
        let mut freelist = Freelist::new();

        assert!(freelist.is_empty());
        assert_eq!(freelist.pop(), None);
    }

    #[test]
    fn pops_in_lifo_order() {
        let mut storage = vec![0_u8; CELL * 3];
        let base = storage.as_mut_ptr();

        let a = cell_at(base, 0);
        let b = cell_at(base, 1);
        let c = cell_at(base, 2);

        let mut freelist = Freelist::new();

        // SAFETY: Each cell is valid for pointer-sized writes and pushed only once.
        unsafe {
            freelist.push(a);
            freelist.push(b);
            freelist.push(c);
        }

        assert!(!freelist.is_empty());
        assert_eq!(freelist.pop(), Some(c));
        assert_eq!(freelist.pop(), Some(b));
        assert_eq!(freelist.pop(), Some(a));
        assert_eq!(freelist.pop(), None);
        assert!(freelist.is_empty());
    }

    #[test]
    fn link_may_be_misaligned() {
        // One spare byte at the front lets us place a cell at an odd address.
        let mut storage = vec![0_u8; CELL * 2 + 1];

        let odd = cell_at(storage.as_mut_ptr().wrapping_add(1), 0);
        let mut freelist = Freelist::new();

        // SAFETY: There are at least CELL bytes available from the odd address.
        unsafe {
            freelist.push(odd);
        }

        assert_eq!(freelist.pop(), Some(odd));
        assert_eq!(freelist.pop(), None);
    }

    #[test]
    fn reuse_after_pop() {
        let mut storage = vec![0_u8; CELL];
        let cell = cell_at(storage.as_mut_ptr(), 0);

        let mut freelist = Freelist::new();

        // SAFETY: The cell is valid for pointer-sized writes and is not in the list when pushed.
        unsafe {
            freelist.push(cell);
        }
        assert_eq!(freelist.pop(), Some(cell));

        // SAFETY: Same as above, the cell was popped so it is no longer in the list.
        unsafe {
            freelist.push(cell);
        }
        assert_eq!(freelist.pop(), Some(cell));
        assert!(freelist.is_empty());
    }
}
