/// Determines what happens to the pool's slabs and any outstanding objects when the pool is
/// dropped.
///
/// The pool never runs destructors of objects that are still live when it is dropped. Releasing
/// every object before dropping the pool is the caller's responsibility.
///
/// Note that the default, [`MayAbandonItems`][Self::MayAbandonItems], gives the slabs back to
/// the system allocator on drop. Classic fixed-type pools that never free their slabs behave like
/// [`LeakSlabs`][Self::LeakSlabs] instead, which has to be selected explicitly.
///
/// # Examples
///
/// ```
/// use object_pool::{DropPolicy, ObjectPool};
///
/// // The drop policy is set at pool creation time.
/// let pool = ObjectPool::<u64>::builder()
///     .drop_policy(DropPolicy::MustNotDropItems)
///     .build();
/// ```
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[non_exhaustive]
pub enum DropPolicy {
    /// The slabs are returned to the system allocator when the pool is dropped. Objects that are
    /// still live are abandoned without running their destructors and any pointers to them
    /// become dangling. This is the default.
    ///
    /// Choose [`LeakSlabs`][Self::LeakSlabs] if pointers to objects must stay valid after the
    /// pool is gone.
    #[default]
    MayAbandonItems,

    /// The slabs are returned to the system allocator and the pool panics if any objects are
    /// still live when it is dropped.
    ///
    /// This may be valuable if the objects own resources that must not be leaked, so forgetting
    /// to release one of them is a bug worth surfacing.
    MustNotDropItems,

    /// The slabs are never returned to the system allocator. Objects that are still live remain
    /// valid (though their destructors never run) after the pool is dropped.
    ///
    /// This may be valuable for pools that live for the whole process and hand out objects that
    /// are referenced from places with no clear end of life.
    LeakSlabs,
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn default_returns_slabs_on_drop() {
        assert_eq!(DropPolicy::default(), DropPolicy::MayAbandonItems);
        assert_ne!(DropPolicy::default(), DropPolicy::LeakSlabs);
    }
}
