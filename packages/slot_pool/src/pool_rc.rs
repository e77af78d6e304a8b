use std::fmt;
use std::ops::Deref;
use std::ptr::NonNull;
use std::rc::Rc;

use crate::PoolBox;

/// Shared-owner handle to a value stored in a [`SlotPool`][crate::SlotPool].
///
/// Clones of the handle refer to the same value. The value is destroyed and its slot returned
/// to the pool when the last clone is dropped.
///
/// # Examples
///
/// ```
/// use new_zealand::nz;
/// use slot_pool::SlotPool;
///
/// let pool = SlotPool::<u64>::with_capacity(nz!(2)).unwrap();
///
/// let first = pool.construct_shared(42).unwrap();
/// let second = first.clone();
///
/// drop(first);
/// assert_eq!(*second, 42);
/// assert_eq!(pool.len(), 1);
///
/// drop(second);
/// assert!(pool.is_empty());
/// ```
pub struct PoolRc<'p, T> {
    inner: Rc<PoolBox<'p, T>>,
}

impl<'p, T> PoolRc<'p, T> {
    pub(crate) fn new(owned: PoolBox<'p, T>) -> Self {
        Self {
            inner: Rc::new(owned),
        }
    }

    /// A pointer to the value. It stays valid for as long as any clone of the handle lives.
    #[must_use]
    pub fn as_ptr(&self) -> NonNull<T> {
        self.inner.as_ptr()
    }

    /// The number of handles sharing the value.
    #[must_use]
    pub fn strong_count(this: &Self) -> usize {
        Rc::strong_count(&this.inner)
    }

    /// Whether two handles share the same value.
    #[must_use]
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        Rc::ptr_eq(&this.inner, &other.inner)
    }
}

impl<T> Clone for PoolRc<'_, T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T> Deref for PoolRc<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl<T: fmt::Debug> fmt::Debug for PoolRc<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolRc")
            .field("ptr", &self.as_ptr())
            .field("value", &**self)
            .field("strong_count", &Self::strong_count(self))
            .finish()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::cell::Cell;

    use new_zealand::nz;
    use static_assertions::{assert_impl_all, assert_not_impl_any};

    use super::*;
    use crate::{DropPolicy, SlotPool};

    assert_impl_all!(PoolRc<'static, u32>: Clone);
    assert_not_impl_any!(PoolRc<'static, u32>: Send, Sync);

    fn pool<T>() -> SlotPool<T> {
        SlotPool::builder()
            .capacity(nz!(3))
            .drop_policy(DropPolicy::PanicIfNotEmpty)
            .build()
            .unwrap()
    }

    #[test]
    fn last_clone_releases_slot() {
        let pool = pool::<u32>();

        let a = pool.construct_shared(5).unwrap();
        let b = a.clone();
        let c = b.clone();

        assert_eq!(PoolRc::strong_count(&a), 3);
        assert!(PoolRc::ptr_eq(&a, &c));
        assert_eq!(a.as_ptr(), c.as_ptr());

        drop(a);
        drop(b);
        assert_eq!(pool.len(), 1);
        assert_eq!(*c, 5);

        drop(c);
        assert!(pool.is_empty());
    }

    #[test]
    fn value_dropped_exactly_once() {
        struct Flag<'a>(&'a Cell<u32>);

        impl Drop for Flag<'_> {
            fn drop(&mut self) {
                self.0.set(self.0.get() + 1);
            }
        }

        let drops = Cell::new(0);
        let pool = pool::<Flag<'_>>();

        let shared = pool.construct_shared(Flag(&drops)).unwrap();
        let clones: Vec<_> = (0..5).map(|_| shared.clone()).collect();

        drop(shared);
        drop(clones);

        assert_eq!(drops.get(), 1);
        assert!(pool.is_empty());
    }

    #[test]
    fn independent_values_are_not_ptr_eq() {
        let pool = pool::<u32>();

        let a = pool.construct_shared(1).unwrap();
        let b = pool.construct_shared(1).unwrap();

        assert!(!PoolRc::ptr_eq(&a, &b));
        assert!(format!("{a:?}").contains("strong_count"));
    }
}
