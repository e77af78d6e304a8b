/// Determines what happens when a [`SlotPool`][crate::SlotPool] is dropped while some of its
/// slots are still allocated.
///
/// The pool never drops the values in its slots because it cannot tell slots holding a
/// constructed value apart from raw allocations. An empty pool is always dropped silently.
///
/// # Examples
///
/// ```
/// use new_zealand::nz;
/// use slot_pool::{DropPolicy, SlotPool};
///
/// let pool = SlotPool::<u32>::builder()
///     .capacity(nz!(4))
///     .drop_policy(DropPolicy::PanicIfNotEmpty)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[non_exhaustive]
pub enum DropPolicy {
    /// The process is aborted after logging an error. This is the default.
    ///
    /// Continuing with references that outlive the backing store is not sound, so an
    /// unreleased slot at teardown is treated as a fatal invariant violation.
    #[default]
    AbortIfNotEmpty,

    /// The backing store is released and the pool panics (unless the thread is already
    /// panicking).
    PanicIfNotEmpty,

    /// A warning is logged and the backing store is leaked, keeping any outstanding
    /// pointers into the pool valid for the rest of the process lifetime.
    LeakIfNotEmpty,
}
