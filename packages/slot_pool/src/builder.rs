use std::marker::PhantomData;
use std::num::NonZero;

use crate::{DropPolicy, Error, Result, SlotPool};

/// Builder for creating an instance of [`SlotPool`].
///
/// The capacity is mandatory. Everything else has a default that suits most use cases.
///
/// # Examples
///
/// ```
/// use new_zealand::nz;
/// use slot_pool::{DropPolicy, SlotPool};
///
/// let pool = SlotPool::<u32>::builder()
///     .capacity(nz!(16))
///     .drop_policy(DropPolicy::LeakIfNotEmpty)
///     .build()
///     .unwrap();
///
/// assert_eq!(pool.capacity(), 16);
/// ```
#[must_use]
pub struct SlotPoolBuilder<T> {
    capacity: Option<NonZero<usize>>,
    drop_policy: DropPolicy,

    _item: PhantomData<T>,
}

impl<T> std::fmt::Debug for SlotPoolBuilder<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotPoolBuilder")
            .field(
                "item_type",
                &std::format_args!("{}", std::any::type_name::<T>()),
            )
            .field("capacity", &self.capacity)
            .field("drop_policy", &self.drop_policy)
            .finish()
    }
}

impl<T> SlotPoolBuilder<T> {
    pub(crate) fn new() -> Self {
        Self {
            capacity: None,
            drop_policy: DropPolicy::default(),
            _item: PhantomData,
        }
    }

    /// Sets the fixed number of slots in the pool. The pool never grows or shrinks.
    pub fn capacity(mut self, capacity: NonZero<usize>) -> Self {
        self.capacity = Some(capacity);
        self
    }

    /// Sets the [drop policy][DropPolicy] for the pool. This governs what happens
    /// if the pool is dropped while slots are still allocated.
    pub fn drop_policy(mut self, policy: DropPolicy) -> Self {
        self.drop_policy = policy;
        self
    }

    /// Builds the pool, reserving the backing store for all slots up front.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if no capacity was set and [`Error::OutOfMemory`]
    /// if the backing store cannot be obtained.
    ///
    /// # Panics
    ///
    /// Panics if `T` is zero-sized.
    pub fn build(self) -> Result<SlotPool<T>> {
        let capacity = self.capacity.ok_or(Error::InvalidArgument {
            problem: "pool capacity must be set before building",
        })?;

        SlotPool::new_inner(capacity, self.drop_policy)
    }
}
