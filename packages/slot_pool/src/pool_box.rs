use std::fmt;
use std::mem::ManuallyDrop;
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;

use crate::SlotPool;

/// Single-owner handle to a value stored in a [`SlotPool`].
///
/// The value is destroyed and its slot returned to the pool exactly once, when the handle is
/// dropped. This happens on every exit path, including early returns and unwinding.
///
/// The handle borrows the pool, so the pool cannot be dropped while any handle is alive.
///
/// # Examples
///
/// ```
/// use new_zealand::nz;
/// use slot_pool::SlotPool;
///
/// let pool = SlotPool::<Vec<u8>>::with_capacity(nz!(2)).unwrap();
///
/// {
///     let mut bytes = pool.construct_owned(vec![1, 2]).unwrap();
///     bytes.push(3);
///     assert_eq!(*bytes, [1, 2, 3]);
///     assert_eq!(pool.len(), 1);
/// }
///
/// assert!(pool.is_empty());
/// ```
pub struct PoolBox<'p, T> {
    pool: &'p SlotPool<T>,
    ptr: NonNull<T>,
}

impl<'p, T> PoolBox<'p, T> {
    /// Takes ownership of a value previously constructed in `pool`.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by [`SlotPool::construct()`] (or one of its variants) on
    /// `pool`, must not have been destroyed yet and must not be owned by anything else.
    #[must_use]
    pub unsafe fn from_raw(pool: &'p SlotPool<T>, ptr: NonNull<T>) -> Self {
        Self { pool, ptr }
    }

    /// Releases ownership without destroying the value.
    ///
    /// The caller becomes responsible for eventually calling [`SlotPool::destroy()`] with the
    /// returned pointer.
    #[must_use]
    pub fn into_raw(self) -> NonNull<T> {
        ManuallyDrop::new(self).ptr
    }

    /// A pointer to the value. It stays valid for as long as the handle lives.
    #[must_use]
    pub fn as_ptr(&self) -> NonNull<T> {
        self.ptr
    }

    /// The pool the value lives in.
    #[must_use]
    pub fn pool(&self) -> &'p SlotPool<T> {
        self.pool
    }
}

impl<T> Deref for PoolBox<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        // SAFETY: The handle owns an initialized value that nothing else references.
        unsafe { self.ptr.as_ref() }
    }
}

impl<T> DerefMut for PoolBox<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        // SAFETY: The handle owns an initialized value and we hold `&mut self`.
        unsafe { self.ptr.as_mut() }
    }
}

impl<T> Drop for PoolBox<'_, T> {
    fn drop(&mut self) {
        // SAFETY: The handle owns an initialized value of this pool and nobody can use it after
        // the handle is gone.
        unsafe { self.pool.destroy(self.ptr) }
            .expect("an owned value is always a live slot of its pool");
    }
}

impl<T: fmt::Debug> fmt::Debug for PoolBox<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolBox")
            .field("ptr", &self.ptr)
            .field("value", &**self)
            .finish_non_exhaustive()
    }
}
