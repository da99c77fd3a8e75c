use std::marker::PhantomData;

/// Layout of the cells that a pool of `T` carves out of its slabs.
///
/// A cell either holds a live `T` (header-free, the object occupies the whole cell) or, while
/// free, a pointer to the next free cell. The cell is as large as the larger of the two, rounded
/// up to a multiple of `align_of::<T>()` so that consecutive cells starting at a suitably aligned
/// slab base are always aligned for `T`. The rounding only matters for over-aligned types smaller
/// than a pointer (e.g. a zero-sized `#[repr(align(16))]` marker). The freelist link, on the other
/// hand, may be misaligned (e.g. 12-byte cells) and must be accessed with unaligned reads/writes.
pub(crate) struct CellLayout<T> {
    _item: PhantomData<T>,
}

impl<T> CellLayout<T> {
    pub(crate) const SIZE: usize = if size_of::<T>() < size_of::<*mut u8>() {
        size_of::<*mut u8>().next_multiple_of(align_of::<T>())
    } else {
        size_of::<T>()
    };

    pub(crate) const ALIGN: usize = align_of::<T>();
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
#[allow(
    clippy::arithmetic_side_effects,
    clippy::modulo_arithmetic,
    reason = "tests focus on succinct code and do not need to tick all the boxes"
)]
mod tests {
    use super::*;

    const POINTER_SIZE: usize = size_of::<*mut u8>();

    #[repr(align(16))]
    struct OverAligned {
        _value: u8,
    }

    #[repr(align(16))]
    struct ZeroSizedAligned;

    #[test]
    fn small_types_get_pointer_sized_cells() {
        assert_eq!(CellLayout::<u8>::SIZE, POINTER_SIZE);
        assert_eq!(CellLayout::<u16>::SIZE, POINTER_SIZE);
        assert_eq!(CellLayout::<()>::SIZE, POINTER_SIZE);
    }

    #[test]
    fn large_types_get_exact_cells() {
        assert_eq!(CellLayout::<[u8; 24]>::SIZE, 24);
        assert_eq!(CellLayout::<[u64; 5]>::SIZE, 40);
    }

    #[test]
    fn odd_sized_types_are_not_padded_to_pointer_alignment() {
        assert_eq!(CellLayout::<[u32; 3]>::SIZE, 12.max(POINTER_SIZE));
    }

    #[test]
    fn over_aligned_zero_sized_types_round_up_to_alignment() {
        assert_eq!(CellLayout::<ZeroSizedAligned>::SIZE, 16.max(POINTER_SIZE));
        assert_eq!(CellLayout::<ZeroSizedAligned>::SIZE % CellLayout::<ZeroSizedAligned>::ALIGN, 0);
    }

    #[test]
    fn cell_size_is_multiple_of_alignment() {
        assert_eq!(CellLayout::<OverAligned>::SIZE, 16);
        assert_eq!(CellLayout::<OverAligned>::ALIGN, 16);

        assert_eq!(CellLayout::<u8>::SIZE % CellLayout::<u8>::ALIGN, 0);
        assert_eq!(CellLayout::<[u32; 3]>::SIZE % CellLayout::<[u32; 3]>::ALIGN, 0);
    }
}
