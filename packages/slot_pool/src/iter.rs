use std::fmt;
use std::iter::FusedIterator;
use std::marker::PhantomData;
use std::ptr::NonNull;

use crate::SlotPool;

/// Forward iterator over pointers to the allocated slots of a [`SlotPool`], in address order.
///
/// Free slots are skipped by following the pool's free list alongside the cursor, so no
/// per-slot occupancy flag is needed: whenever the cursor lands on the free slot the iterator
/// is tracking, that slot is skipped and the tracked free slot moves to the next one on the list.
///
/// The iterator is only meaningful while the pool is not modified. Modifying the pool during
/// traversal is not detected and may make the iterator skip or report the wrong slots. It never
/// steps outside the pool.
///
/// # Examples
///
/// ```
/// use new_zealand::nz;
/// use slot_pool::SlotPool;
///
/// let pool = SlotPool::<u32>::with_capacity(nz!(4)).unwrap();
///
/// let a = pool.construct_owned(1).unwrap();
/// let b = pool.construct_owned(2).unwrap();
/// drop(a);
///
/// let live: Vec<_> = pool.live_slots().collect();
/// assert_eq!(live, [b.as_ptr()]);
/// ```
pub struct LiveSlots<'p, T> {
    pool: &'p SlotPool<T>,

    /// Index of the slot the iterator is positioned at, or `capacity` at the end.
    current: usize,

    /// The lowest free slot at or after `current`, or `capacity` if there is none.
    next_free: usize,
}

impl<'p, T> LiveSlots<'p, T> {
    pub(crate) fn new(pool: &'p SlotPool<T>) -> Self {
        let mut slots = Self {
            pool,
            current: 0,
            next_free: pool.first_free_index(),
        };

        slots.skip_free();
        slots
    }

    /// Index of the live slot the iterator is positioned at, or `None` at the end.
    #[must_use]
    pub fn index(&self) -> Option<usize> {
        (self.current < self.pool.capacity()).then_some(self.current)
    }

    /// Whether the iterator has run past the last live slot.
    #[must_use]
    pub fn is_end(&self) -> bool {
        self.index().is_none()
    }

    /// Moves to the next live slot. Does nothing at the end.
    pub fn step(&mut self) {
        if self.is_end() {
            return;
        }

        self.current = self
            .current
            .checked_add(1)
            .expect("current index is below capacity");
        self.skip_free();
    }

    /// Moves forward by `k` live slots, one step at a time, stopping at the end.
    pub fn advance(&mut self, k: usize) {
        for _ in 0..k {
            self.step();
        }
    }

    fn skip_free(&mut self) {
        let capacity = self.pool.capacity();

        while self.current < capacity && self.current == self.next_free {
            self.next_free = self.pool.link(self.next_free);
            self.current = self
                .current
                .checked_add(1)
                .expect("current index is below capacity");
        }
    }
}

impl<T> Iterator for LiveSlots<'_, T> {
    type Item = NonNull<T>;

    fn next(&mut self) -> Option<Self::Item> {
        let index = self.index()?;
        self.step();

        Some(self.pool.slot_ptr(index))
    }
}

impl<T> FusedIterator for LiveSlots<'_, T> {}

impl<T> Clone for LiveSlots<'_, T> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool,
            current: self.current,
            next_free: self.next_free,
        }
    }
}

impl<T> PartialEq for LiveSlots<'_, T> {
    fn eq(&self, other: &Self) -> bool {
        if self.current == other.current {
            // Both iterators track the same free list, so at the same position they must
            // also agree on the next free slot unless the pool was modified in between.
            debug_assert_eq!(
                self.next_free, other.next_free,
                "iterators at the same slot disagree on the next free slot; was the pool modified during iteration?"
            );
        }

        self.current == other.current
    }
}

impl<T> fmt::Debug for LiveSlots<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveSlots")
            .field("current", &self.current)
            .field("next_free", &self.next_free)
            .finish_non_exhaustive()
    }
}

/// Iterator over references to the values in the allocated slots of a [`SlotPool`].
///
/// Returned by the unsafe [`SlotPool::iter()`], whose safety requirements apply to the whole
/// lifetime of the iterator and the references it yields.
#[derive(Debug)]
pub struct Iter<'p, T> {
    slots: LiveSlots<'p, T>,
}

impl<'p, T> Iter<'p, T> {
    pub(crate) fn new(slots: LiveSlots<'p, T>) -> Self {
        Self { slots }
    }
}

impl<'p, T> Iterator for Iter<'p, T> {
    type Item = &'p T;

    fn next(&mut self) -> Option<Self::Item> {
        // SAFETY: The creator of the iterator guaranteed that every allocated slot holds an
        // initialized value with no exclusive references to it.
        self.slots.next().map(|ptr| unsafe { ptr.as_ref() })
    }
}

impl<T> FusedIterator for Iter<'_, T> {}

/// Iterator over exclusive references to the values in the allocated slots of a [`SlotPool`].
///
/// Returned by the unsafe [`SlotPool::iter_mut()`].
#[derive(Debug)]
pub struct IterMut<'p, T> {
    slots: LiveSlots<'p, T>,

    _exclusive: PhantomData<&'p mut T>,
}

impl<'p, T> IterMut<'p, T> {
    pub(crate) fn new(slots: LiveSlots<'p, T>) -> Self {
        Self {
            slots,
            _exclusive: PhantomData,
        }
    }
}

impl<'p, T> Iterator for IterMut<'p, T> {
    type Item = &'p mut T;

    fn next(&mut self) -> Option<Self::Item> {
        // SAFETY: The iterator was created from `&mut SlotPool` and the creator guaranteed that
        // every allocated slot holds an initialized value with no other references to it. Each
        // slot is yielded at most once, so the exclusive references never alias.
        self.slots.next().map(|mut ptr| unsafe { ptr.as_mut() })
    }
}

impl<T> FusedIterator for IterMut<'_, T> {}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use new_zealand::nz;

    use super::*;
    use crate::DropPolicy;

    fn pool(capacity: std::num::NonZero<usize>) -> SlotPool<u32> {
        SlotPool::builder()
            .capacity(capacity)
            .drop_policy(DropPolicy::PanicIfNotEmpty)
            .build()
            .unwrap()
    }

    #[test]
    fn empty_pool_starts_at_end() {
        let pool = pool(nz!(3));

        let mut slots = pool.live_slots();

        assert!(slots.is_end());
        assert_eq!(slots.index(), None);
        assert_eq!(slots.next(), None);
    }

    #[test]
    fn full_pool_yields_every_slot() {
        let pool = pool(nz!(3));
        let first = pool.allocate(3).unwrap();

        let positions: Vec<_> = {
            let mut slots = pool.live_slots();
            let mut positions = Vec::new();
            while let Some(position) = slots.index() {
                positions.push(position);
                slots.step();
            }
            positions
        };

        assert_eq!(positions, [0, 1, 2]);
        assert_eq!(pool.live_slots().next(), Some(first));

        pool.deallocate(first, 3).unwrap();
    }

    #[test]
    fn skips_leading_and_inner_free_runs() {
        let pool = pool(nz!(8));

        let ptrs: Vec<_> = (0..8).map(|value| pool.construct(value).unwrap()).collect();

        for index in [0, 1, 3, 4, 5, 7] {
            // SAFETY: Constructed above, not referenced anymore.
            unsafe { pool.destroy(ptrs[index]) }.unwrap();
        }

        // SAFETY: Every allocated slot was constructed and nothing references them.
        let values: Vec<_> = unsafe { pool.iter() }.copied().collect();
        assert_eq!(values, [2, 6]);

        let positions: Vec<_> = pool
            .live_slots()
            .map(|ptr| pool.index_of(ptr).unwrap())
            .collect();
        assert_eq!(positions, [2, 6]);

        for index in [2, 6] {
            // SAFETY: Constructed above, not referenced anymore.
            unsafe { pool.destroy(ptrs[index]) }.unwrap();
        }
    }

    #[test]
    fn multi_slot_runs_are_yielded_per_slot() {
        let pool = pool(nz!(6));

        let head = pool.allocate(1).unwrap();
        let run = pool.allocate(3).unwrap();
        pool.deallocate(head, 1).unwrap();

        let positions: Vec<_> = pool
            .live_slots()
            .map(|ptr| pool.index_of(ptr).unwrap())
            .collect();
        assert_eq!(positions, [1, 2, 3]);

        pool.deallocate(run, 3).unwrap();
    }

    #[test]
    fn advance_steps_over_live_slots() {
        let pool = pool(nz!(6));

        let a = pool.allocate(2).unwrap();
        let b = pool.allocate(2).unwrap();
        let c = pool.allocate(2).unwrap();
        pool.deallocate(b, 2).unwrap();

        let mut slots = pool.live_slots();
        slots.advance(3);
        assert_eq!(slots.index(), Some(5));

        let mut other = pool.live_slots();
        assert!(slots != other);
        other.advance(3);
        assert!(slots == other);

        slots.advance(10);
        assert!(slots.is_end());

        pool.deallocate(a, 2).unwrap();
        pool.deallocate(c, 2).unwrap();
    }

    #[test]
    fn fused_after_end() {
        let pool = pool(nz!(2));
        let ptr = pool.allocate(1).unwrap();

        let mut slots = pool.live_slots();
        assert_eq!(slots.next(), Some(ptr));
        assert_eq!(slots.next(), None);
        assert_eq!(slots.next(), None);

        slots.step();
        assert!(slots.is_end());

        pool.deallocate(ptr, 1).unwrap();
    }

    #[test]
    fn iter_mut_updates_values() {
        let mut pool = pool(nz!(4));

        let ptrs: Vec<_> = (1..=3).map(|value| pool.construct(value).unwrap()).collect();

        // SAFETY: Every allocated slot was constructed and nothing references them.
        for value in unsafe { pool.iter_mut() } {
            *value *= 10;
        }

        // SAFETY: Every allocated slot was constructed and nothing references them.
        let values: Vec<_> = unsafe { pool.iter() }.copied().collect();
        assert_eq!(values, [10, 20, 30]);

        for ptr in ptrs {
            // SAFETY: Constructed above, not referenced anymore.
            unsafe { pool.destroy(ptr) }.unwrap();
        }
    }

    #[test]
    fn clone_iterates_independently() {
        let pool = pool(nz!(3));
        let ptr = pool.allocate(3).unwrap();

        let mut original = pool.live_slots();
        original.step();
        let mut cloned = original.clone();

        assert_eq!(cloned.next(), original.next());
        assert_eq!(original.count(), 1);
        assert_eq!(cloned.count(), 1);
        assert!(format!("{:?}", pool.live_slots()).contains("current"));

        pool.deallocate(ptr, 3).unwrap();
    }

    #[test]
    fn index_through_mutable_reference() {
        let pool = pool(nz!(3));
        let a = pool.allocate(1).unwrap();
        let b = pool.allocate(1).unwrap();
        pool.deallocate(a, 1).unwrap();

        let mut slots = pool.live_slots();
        let slots_mut = &mut slots;

        assert_eq!(slots_mut.index(), Some(1));
        assert_eq!(slots_mut.next(), Some(b));
        assert_eq!(slots_mut.index(), None);

        pool.deallocate(b, 1).unwrap();
    }
}
