use std::fmt;
use std::ptr::{self, NonNull};

use crate::{Result, SlotPool};

/// Allocator adapter that hands out raw storage from a [`SlotPool`].
///
/// This is a narrow view over [`SlotPool::allocate()`] and [`SlotPool::deallocate()`] for
/// container code that manages its own element lifecycle. It carries no state beyond the pool
/// reference, is freely copyable and any number of adapters may be bound to the same pool.
///
/// Two adapters compare equal if they are bound to the same pool, meaning storage obtained
/// from one can be returned through the other.
///
/// # Examples
///
/// ```
/// use new_zealand::nz;
/// use slot_pool::SlotPool;
///
/// let pool = SlotPool::<u32>::with_capacity(nz!(8)).unwrap();
/// let allocator = pool.allocator();
///
/// let storage = allocator.allocate(4).unwrap();
///
/// for (offset, value) in (10..14).enumerate() {
///     // SAFETY: The run is 4 slots long and we write within it.
///     unsafe { storage.add(offset).write(value) };
/// }
///
/// // SAFETY: All four slots were initialized above.
/// let values = unsafe { std::slice::from_raw_parts(storage.as_ptr(), 4) };
/// assert_eq!(values, [10, 11, 12, 13]);
///
/// allocator.deallocate(storage, 4).unwrap();
/// ```
pub struct PoolAllocator<'p, T> {
    pool: &'p SlotPool<T>,
}

impl<'p, T> PoolAllocator<'p, T> {
    pub(crate) fn new(pool: &'p SlotPool<T>) -> Self {
        Self { pool }
    }

    /// Reserves `n` contiguous uninitialized slots. See [`SlotPool::allocate()`].
    ///
    /// # Errors
    ///
    /// Same as [`SlotPool::allocate()`].
    pub fn allocate(&self, n: usize) -> Result<NonNull<T>> {
        self.pool.allocate(n)
    }

    /// Returns `n` contiguous slots to the pool. See [`SlotPool::deallocate()`].
    ///
    /// # Errors
    ///
    /// Same as [`SlotPool::deallocate()`].
    pub fn deallocate(&self, ptr: NonNull<T>, n: usize) -> Result<()> {
        self.pool.deallocate(ptr, n)
    }

    /// The pool this adapter is bound to.
    #[must_use]
    pub fn pool(&self) -> &'p SlotPool<T> {
        self.pool
    }
}

impl<T> Clone for PoolAllocator<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for PoolAllocator<'_, T> {}

impl<T> PartialEq for PoolAllocator<'_, T> {
    fn eq(&self, other: &Self) -> bool {
        ptr::eq(self.pool, other.pool)
    }
}

impl<T> Eq for PoolAllocator<'_, T> {}

impl<T> fmt::Debug for PoolAllocator<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolAllocator")
            .field("pool", &ptr::from_ref(self.pool))
            .finish()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use new_zealand::nz;
    use static_assertions::{assert_impl_all, assert_not_impl_any};

    use super::*;
    use crate::{DropPolicy, Error};

    assert_impl_all!(PoolAllocator<'static, u32>: Copy, Eq);
    assert_not_impl_any!(PoolAllocator<'static, u32>: Send, Sync);

    fn pool() -> SlotPool<u64> {
        SlotPool::builder()
            .capacity(nz!(4))
            .drop_policy(DropPolicy::PanicIfNotEmpty)
            .build()
            .unwrap()
    }

    #[test]
    fn delegates_to_pool() {
        let pool = pool();
        let allocator = pool.allocator();

        let ptr = allocator.allocate(3).unwrap();
        assert_eq!(pool.len(), 3);

        assert!(matches!(
            allocator.allocate(2),
            Err(Error::OutOfMemory { .. })
        ));

        allocator.deallocate(ptr, 3).unwrap();
        assert!(pool.is_empty());
    }

    #[test]
    fn adapters_share_one_pool() {
        let pool = pool();
        let first = pool.allocator();
        let second = first;

        assert_eq!(first, second);
        assert!(ptr::eq(first.pool(), &pool));

        // Storage from one adapter can be returned through the other.
        let ptr = first.allocate(2).unwrap();
        second.deallocate(ptr, 2).unwrap();

        assert!(pool.is_empty());
    }

    #[test]
    fn adapters_of_different_pools_differ() {
        let a = pool();
        let b = pool();

        assert_ne!(a.allocator(), b.allocator());

        let ptr = a.allocator().allocate(1).unwrap();
        assert!(matches!(
            b.allocator().deallocate(ptr, 1),
            Err(Error::InvalidArgument { .. })
        ));
        a.allocator().deallocate(ptr, 1).unwrap();
    }
}
