use std::alloc::{Layout, alloc, dealloc};
use std::any::type_name;
use std::cell::Cell;
use std::fmt;
use std::iter;
use std::num::NonZero;
use std::ptr::NonNull;
use std::{process, thread};

use scopeguard::ScopeGuard;
use tracing::{debug, error, trace, warn};

use crate::{
    DropPolicy, Error, Iter, IterMut, LiveSlots, PoolAllocator, PoolBox, PoolRc, Result,
    SlotPoolBuilder,
};

/// A fixed-capacity pool of slots, each able to hold one `T`.
///
/// All storage is reserved once, when the pool is built, as a single contiguous block of
/// `capacity` slots. The pool never grows, shrinks or moves its slots, so pointers handed out
/// stay valid until they are released back to the pool.
///
/// Free slots are tracked by an address-ordered free list. Allocation requests for `n`
/// contiguous slots are satisfied from the best-fitting run of free slots: the shortest run
/// that is at least `n` slots long, preferring the lowest address when runs are equally long.
///
/// There are several layers of API, from raw to managed:
///
/// * [`allocate()`][Self::allocate] and [`deallocate()`][Self::deallocate] hand out and take
///   back runs of uninitialized slots. [`allocator()`][Self::allocator] exposes the same pair
///   through a [`PoolAllocator`] for container code.
/// * [`construct()`][Self::construct] and [`destroy()`][Self::destroy] manage the lifecycle of
///   a single value through a raw pointer.
/// * [`construct_owned()`][Self::construct_owned] and
///   [`construct_shared()`][Self::construct_shared] return handles that destroy the value when
///   they are dropped.
///
/// # Thread safety
///
/// The pool is not synchronized. It can be moved to another thread if `T: Send` but it can
/// never be shared between threads. Wrap it in a mutex if several threads need it.
///
/// # Teardown
///
/// All slots must be released before the pool is dropped. What happens otherwise is
/// governed by the [`DropPolicy`] of the pool. Use [`close()`][Self::close] to get a
/// recoverable error instead.
///
/// # Examples
///
/// ```
/// use new_zealand::nz;
/// use slot_pool::SlotPool;
///
/// let pool = SlotPool::<String>::with_capacity(nz!(4)).unwrap();
///
/// let greeting = pool.construct_owned("Hello".to_string()).unwrap();
/// assert_eq!(greeting.as_str(), "Hello");
/// assert_eq!(pool.len(), 1);
///
/// drop(greeting);
/// assert!(pool.is_empty());
/// ```
pub struct SlotPool<T> {
    first_slot_ptr: NonNull<T>,

    /// Layout of the whole slot block, needed to release it again.
    layout: Layout,

    capacity: usize,

    /// One link per slot, only meaningful while the slot is free. A free slot links to the next
    /// free slot at a higher address, or to `capacity` if it is the last free slot.
    next_free: Box<[Cell<usize>]>,

    /// Index of the lowest free slot, or `capacity` if the pool is full.
    first_free: Cell<usize>,

    /// Number of slots currently handed out. A run of `n` slots counts `n` times.
    allocated: Cell<usize>,

    drop_policy: DropPolicy,
}

/// A maximal sequence of free slots with consecutive indexes.
#[derive(Clone, Copy, Debug)]
struct FreeRun {
    start: usize,
    len: usize,

    /// The free slot whose link points at `start`, or `None` if `start` is the list head.
    predecessor: Option<usize>,
}

/// A validated request to put slots `start..end` back into the free list.
#[derive(Clone, Copy, Debug)]
struct Release {
    start: usize,
    end: usize,
    predecessor: Option<usize>,

    /// The first free slot after the released run, or `capacity` if there is none.
    successor: usize,
}

impl<T> SlotPool<T> {
    /// Creates a builder for configuring a new pool.
    pub fn builder() -> SlotPoolBuilder<T> {
        SlotPoolBuilder::new()
    }

    /// Creates a pool with the given number of slots and the default [`DropPolicy`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfMemory`] if the backing store cannot be obtained.
    ///
    /// # Panics
    ///
    /// Panics if `T` is zero-sized.
    pub fn with_capacity(capacity: NonZero<usize>) -> Result<Self> {
        Self::builder().capacity(capacity).build()
    }

    pub(crate) fn new_inner(capacity: NonZero<usize>, drop_policy: DropPolicy) -> Result<Self> {
        assert!(
            size_of::<T>() > 0,
            "SlotPool must have non-zero item size"
        );

        let capacity = capacity.get();
        let out_of_memory = || Error::OutOfMemory {
            requested: capacity,
            capacity,
        };

        let layout = Layout::array::<T>(capacity).map_err(|_layout_error| out_of_memory())?;

        let mut next_free = Vec::new();
        next_free
            .try_reserve_exact(capacity)
            .map_err(|_reserve_error| out_of_memory())?;

        // Every slot starts free and links to the slot after it. The last slot links to
        // `capacity`, terminating the list.
        next_free.extend((1..=capacity).map(Cell::new));

        // SAFETY: The layout is not zero-sized, guarded by the item size assertion above
        // and the capacity being non-zero.
        let first_slot_ptr = NonNull::new(unsafe { alloc(layout) }.cast::<T>())
            .ok_or_else(out_of_memory)?;

        debug!(
            capacity,
            item_type = type_name::<T>(),
            "created slot pool"
        );

        Ok(Self {
            first_slot_ptr,
            layout,
            capacity,
            next_free: next_free.into_boxed_slice(),
            first_free: Cell::new(0),
            allocated: Cell::new(0),
            drop_policy,
        })
    }

    /// The fixed number of slots in the pool.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The number of slots currently allocated.
    ///
    /// A run of `n` slots obtained from [`allocate()`][Self::allocate] counts as `n`.
    #[must_use]
    #[cfg_attr(test, mutants::skip)] // Can be mutated to infinitely growing memory use.
    pub fn len(&self) -> usize {
        self.allocated.get()
    }

    /// The number of slots currently free.
    ///
    /// Debug builds verify the free list on every call, making this O(n) instead of O(1).
    #[must_use]
    pub fn remaining(&self) -> usize {
        #[cfg(debug_assertions)]
        self.integrity_check();

        self.capacity
            .checked_sub(self.len())
            .expect("allocated slot count never exceeds capacity")
    }

    /// Whether no slots are allocated.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether every slot is allocated.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.first_free.get() >= self.capacity
    }

    /// The [`DropPolicy`] the pool was built with.
    #[must_use]
    pub fn drop_policy(&self) -> DropPolicy {
        self.drop_policy
    }

    /// Whether `ptr` points at the start of one of the pool's slots.
    ///
    /// This does not say whether the slot is allocated or free.
    #[must_use]
    pub fn contains(&self, ptr: NonNull<T>) -> bool {
        self.index_of(ptr).is_ok()
    }

    /// Returns an allocator adapter bound to this pool.
    #[must_use]
    pub fn allocator(&self) -> PoolAllocator<'_, T> {
        PoolAllocator::new(self)
    }

    /// Reserves `n` contiguous slots and returns a pointer to the first of them.
    ///
    /// The slots are uninitialized. They stay reserved until returned via
    /// [`deallocate()`][Self::deallocate] with the same pointer and length.
    ///
    /// The run is taken from the start of the shortest free run that can hold `n` slots.
    /// Among equally short runs, the one at the lowest address wins. Any leftover tail of
    /// the chosen run stays free.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfMemory`] if no run of `n` free slots exists anywhere in the pool
    /// and [`Error::InvalidArgument`] if `n` is zero.
    pub fn allocate(&self, n: usize) -> Result<NonNull<T>> {
        #[cfg(debug_assertions)]
        self.integrity_check();

        if n == 0 {
            return Err(Error::InvalidArgument {
                problem: "cannot allocate a run of zero slots",
            });
        }

        let Some(run) = self.best_fit(n) else {
            trace!(n, "no free run long enough for allocation");

            return Err(Error::OutOfMemory {
                requested: n,
                capacity: self.capacity,
            });
        };

        let last = run
            .start
            .checked_add(n)
            .and_then(|end| end.checked_sub(1))
            .expect("run lies within the pool and n is non-zero");

        // Whatever the last consumed slot links to is the first slot still free after this
        // allocation. For a longer run, that is the leftover tail of the same run.
        let after = self.link(last);

        match run.predecessor {
            Some(predecessor) => self.set_link(predecessor, after),
            None => self.first_free.set(after),
        }

        self.allocated.set(
            self.allocated
                .get()
                .checked_add(n)
                .expect("allocated slot count never exceeds capacity"),
        );

        trace!(start = run.start, n, run_len = run.len, "allocated slot run");

        Ok(self.slot_ptr(run.start))
    }

    /// Returns `n` contiguous slots starting at `ptr` to the pool.
    ///
    /// The pool does not drop any values in the slots; use [`destroy()`][Self::destroy] for
    /// slots holding constructed values.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `ptr` is not the start of a slot in this pool, if
    /// `n` is zero or if the run extends past the end of the pool. Returns
    /// [`Error::DoubleFree`] if any slot of the run is already free. The pool is unchanged
    /// after an error.
    pub fn deallocate(&self, ptr: NonNull<T>, n: usize) -> Result<()> {
        let release = self.prepare_release(ptr, n)?;
        self.release(release);

        Ok(())
    }

    /// Moves `value` into a newly allocated slot and returns a pointer to it.
    ///
    /// The value must eventually be released with [`destroy()`][Self::destroy].
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfMemory`] if the pool is full. The value is dropped in that case.
    pub fn construct(&self, value: T) -> Result<NonNull<T>> {
        self.construct_with(|| value)
    }

    /// Allocates a slot and fills it with the value returned by `f`.
    ///
    /// `f` is only called once a slot has been reserved. If `f` panics, the slot is returned
    /// to the pool.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfMemory`] if the pool is full.
    pub fn construct_with(&self, f: impl FnOnce() -> T) -> Result<NonNull<T>> {
        let ptr = self.allocate(1)?;

        let unwind_guard = scopeguard::guard(ptr, |ptr| {
            self.deallocate(ptr, 1)
                .expect("slot was allocated by this call so it cannot already be free");
        });

        let value = f();

        // SAFETY: The slot was just allocated, is aligned for `T` and valid for writes.
        // Nobody else has a pointer to it yet.
        unsafe {
            ptr.as_ptr().write(value);
        }

        Ok(ScopeGuard::into_inner(unwind_guard))
    }

    /// Like [`construct()`][Self::construct] but returns `None` if the pool is full.
    #[must_use]
    pub fn try_construct(&self, value: T) -> Option<NonNull<T>> {
        self.try_construct_with(|| value)
    }

    /// Like [`construct_with()`][Self::construct_with] but returns `None` if the pool is full.
    #[must_use]
    pub fn try_construct_with(&self, f: impl FnOnce() -> T) -> Option<NonNull<T>> {
        // Reserving a single slot can only fail by running out of memory.
        self.construct_with(f).ok()
    }

    /// Moves `value` into the pool and returns a handle that destroys it when dropped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfMemory`] if the pool is full.
    pub fn construct_owned(&self, value: T) -> Result<PoolBox<'_, T>> {
        let ptr = self.construct(value)?;

        // SAFETY: The slot was just constructed and nobody else has a pointer to it.
        Ok(unsafe { PoolBox::from_raw(self, ptr) })
    }

    /// Moves `value` into the pool and returns a cloneable handle that destroys it when the
    /// last clone is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfMemory`] if the pool is full.
    pub fn construct_shared(&self, value: T) -> Result<PoolRc<'_, T>> {
        self.construct_owned(value).map(PoolRc::new)
    }

    /// Drops the value at `ptr` in place and returns its slot to the pool.
    ///
    /// The pointer is validated before the value is dropped. The slot is returned to the pool
    /// even if the destructor panics.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `ptr` is not the start of a slot in this pool and
    /// [`Error::DoubleFree`] if the slot is already free. Nothing is dropped in either case.
    ///
    /// # Safety
    ///
    /// If `ptr` is a slot of this pool, it must hold an initialized `T` (for example, one
    /// obtained from [`construct()`][Self::construct]) and no reference to the value may be
    /// used after this call.
    pub unsafe fn destroy(&self, ptr: NonNull<T>) -> Result<()> {
        // Only validates. The free list is recomputed after the destructor has run because
        // the destructor may itself release other slots of this pool.
        self.prepare_release(ptr, 1)?;

        let _release_guard = scopeguard::guard(ptr, |ptr| {
            self.deallocate(ptr, 1)
                .expect("slot was validated as allocated before its value was dropped");
        });

        // SAFETY: The slot is allocated and the caller guarantees it holds an initialized `T`
        // that is not referenced anymore.
        unsafe {
            ptr.drop_in_place();
        }

        Ok(())
    }

    /// Returns an iterator over pointers to all allocated slots, in address order.
    ///
    /// The iterator is only meaningful while the pool is not modified. Allocating or
    /// releasing slots during traversal may cause slots to be skipped or reported wrongly,
    /// though never out of bounds.
    #[must_use]
    pub fn live_slots(&self) -> LiveSlots<'_, T> {
        LiveSlots::new(self)
    }

    /// Returns an iterator over references to the values in all allocated slots.
    ///
    /// # Safety
    ///
    /// Every allocated slot must hold an initialized `T` and no exclusive reference to any of
    /// them may exist while the iterator or the references it returns are in use. The pool must
    /// not be modified during traversal.
    #[must_use]
    pub unsafe fn iter(&self) -> Iter<'_, T> {
        Iter::new(self.live_slots())
    }

    /// Returns an iterator over exclusive references to the values in all allocated slots.
    ///
    /// # Safety
    ///
    /// Every allocated slot must hold an initialized `T` and no other reference to any of them
    /// may exist while the iterator or the references it returns are in use.
    #[must_use]
    pub unsafe fn iter_mut(&mut self) -> IterMut<'_, T> {
        IterMut::new(self.live_slots())
    }

    /// Consumes the pool, returning an error if any slots are still allocated.
    ///
    /// Unlike dropping the pool, this never consults the [`DropPolicy`]. If slots are still
    /// allocated, the backing store is leaked so outstanding pointers stay valid.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LiveSlots`] if any slots are still allocated.
    pub fn close(mut self) -> Result<()> {
        let live = self.len();

        if live == 0 {
            return Ok(());
        }

        self.drop_policy = DropPolicy::LeakIfNotEmpty;

        Err(Error::LiveSlots { live })
    }

    /// Index of the first free slot, or `capacity` if the pool is full.
    pub(crate) fn first_free_index(&self) -> usize {
        self.first_free.get()
    }

    /// The free-list link of a free slot.
    pub(crate) fn link(&self, index: usize) -> usize {
        self.next_free
            .get(index)
            .expect("free-list links are only followed from slots inside the pool")
            .get()
    }

    fn set_link(&self, index: usize, next: usize) {
        self.next_free
            .get(index)
            .expect("free-list links are only written for slots inside the pool")
            .set(next);
    }

    pub(crate) fn slot_ptr(&self, index: usize) -> NonNull<T> {
        assert!(
            index < self.capacity,
            "slot {index} index out of bounds in slot pool of {}",
            type_name::<T>()
        );

        // SAFETY: Guarded by the bounds check above, so the pointer stays inside the block.
        unsafe { self.first_slot_ptr.add(index) }
    }

    /// Maps a slot pointer back to its index, validating that it is the start of a slot.
    pub(crate) fn index_of(&self, ptr: NonNull<T>) -> Result<usize> {
        let offset = ptr
            .as_ptr()
            .addr()
            .checked_sub(self.first_slot_ptr.as_ptr().addr())
            .ok_or(Error::InvalidArgument {
                problem: "pointer is before the start of the pool",
            })?;

        let slot_size = size_of::<T>();

        if offset.checked_rem(slot_size).expect("slot size is non-zero") != 0 {
            return Err(Error::InvalidArgument {
                problem: "pointer is not aligned to a slot boundary",
            });
        }

        let index = offset.checked_div(slot_size).expect("slot size is non-zero");

        if index >= self.capacity {
            return Err(Error::InvalidArgument {
                problem: "pointer is past the end of the pool",
            });
        }

        Ok(index)
    }

    fn head(&self) -> Option<usize> {
        Some(self.first_free.get()).filter(|&index| index < self.capacity)
    }

    fn next_of(&self, index: usize) -> Option<usize> {
        Some(self.link(index)).filter(|&next| next < self.capacity)
    }

    /// Walks the free list once, yielding each maximal run of consecutive free slots.
    fn free_runs(&self) -> impl Iterator<Item = FreeRun> + '_ {
        let mut cursor = self.head();
        let mut predecessor = None;

        iter::from_fn(move || {
            let start = cursor?;
            let mut last = start;

            while let Some(next) = self
                .next_of(last)
                .filter(|&next| Some(next) == last.checked_add(1))
            {
                last = next;
            }

            let len = last
                .checked_sub(start)
                .and_then(|span| span.checked_add(1))
                .expect("run end is never before run start");

            let run = FreeRun {
                start,
                len,
                predecessor,
            };

            predecessor = Some(last);
            cursor = self.next_of(last);

            Some(run)
        })
    }

    /// Selects the shortest run that can hold `n` slots, preferring the lowest address.
    fn best_fit(&self, n: usize) -> Option<FreeRun> {
        let mut best: Option<FreeRun> = None;

        for run in self.free_runs().filter(|run| run.len >= n) {
            if run.len == n {
                // Runs come in address order, so the first exact fit cannot be beaten.
                return Some(run);
            }

            if best.is_none_or(|best| run.len < best.len) {
                best = Some(run);
            }
        }

        best
    }

    fn prepare_release(&self, ptr: NonNull<T>, n: usize) -> Result<Release> {
        #[cfg(debug_assertions)]
        self.integrity_check();

        if n == 0 {
            return Err(Error::InvalidArgument {
                problem: "cannot release a run of zero slots",
            });
        }

        let start = self
            .index_of(ptr)
            .inspect_err(|e| warn!(error = %e, n, "rejected release of a foreign slot pointer"))?;

        let end = start
            .checked_add(n)
            .filter(|&end| end <= self.capacity)
            .ok_or(Error::InvalidArgument {
                problem: "released run extends past the end of the pool",
            })
            .inspect_err(|e| warn!(error = %e, start, n, "rejected release of an oversized run"))?;

        let mut predecessor = None;
        let mut successor = self.head();

        while let Some(index) = successor.filter(|&index| index < start) {
            predecessor = Some(index);
            successor = self.next_of(index);
        }

        // Every free slot is on the list, so the first free slot at or after `start` tells us
        // whether any slot of the run is already free.
        if let Some(index) = successor.filter(|&index| index < end) {
            warn!(start, n, index, "rejected release of an already free slot");

            return Err(Error::DoubleFree { index });
        }

        Ok(Release {
            start,
            end,
            predecessor,
            successor: successor.unwrap_or(self.capacity),
        })
    }

    fn release(&self, release: Release) {
        let last = release
            .end
            .checked_sub(1)
            .expect("released runs are never empty");

        for index in release.start..last {
            self.set_link(
                index,
                index.checked_add(1).expect("index is below capacity"),
            );
        }

        self.set_link(last, release.successor);

        match release.predecessor {
            Some(predecessor) => self.set_link(predecessor, release.start),
            None => self.first_free.set(release.start),
        }

        let n = release
            .end
            .checked_sub(release.start)
            .expect("run end is never before run start");

        self.allocated.set(
            self.allocated
                .get()
                .checked_sub(n)
                .expect("every slot of the run was verified to be allocated"),
        );

        trace!(start = release.start, n, "released slot run");
    }

    #[cfg_attr(test, mutants::skip)] // This is essentially test logic, mutation is meaningless.
    #[cfg(debug_assertions)]
    pub(crate) fn integrity_check(&self) {
        let mut observed_free: usize = 0;
        let mut previous: Option<usize> = None;
        let mut cursor = self.first_free.get();

        while cursor < self.capacity {
            if let Some(previous) = previous {
                assert!(
                    cursor > previous,
                    "free slot {cursor} follows free slot {previous} in slot pool of {}",
                    type_name::<T>()
                );
            }

            observed_free = observed_free
                .checked_add(1)
                .expect("ascending free list cannot be longer than capacity");
            previous = Some(cursor);
            cursor = self.link(cursor);
        }

        assert!(
            cursor == self.capacity,
            "free list terminated by out-of-bounds link {cursor} in slot pool of {}",
            type_name::<T>()
        );

        assert!(
            observed_free.checked_add(self.len()) == Some(self.capacity),
            "{observed_free} free and {} allocated slots do not add up to capacity {} in slot pool of {}",
            self.len(),
            self.capacity,
            type_name::<T>()
        );
    }
}

impl<T> fmt::Debug for SlotPool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotPool")
            .field("item_type", &format_args!("{}", type_name::<T>()))
            .field("capacity", &self.capacity)
            .field("allocated", &self.allocated.get())
            .field("first_free", &self.first_free.get())
            .field("drop_policy", &self.drop_policy)
            .finish_non_exhaustive()
    }
}

impl<T> Drop for SlotPool<T> {
    fn drop(&mut self) {
        let live = self.len();

        if live == 0 {
            debug!(
                capacity = self.capacity,
                item_type = type_name::<T>(),
                "dropping empty slot pool"
            );

            // SAFETY: The layout matches the one used in `new_inner()` and the block is only
            // released here.
            unsafe {
                dealloc(self.first_slot_ptr.as_ptr().cast(), self.layout);
            }

            return;
        }

        match self.drop_policy {
            DropPolicy::AbortIfNotEmpty => {
                error!(
                    live,
                    capacity = self.capacity,
                    item_type = type_name::<T>(),
                    "slot pool dropped with allocated slots, aborting"
                );

                process::abort();
            }
            DropPolicy::PanicIfNotEmpty => {
                // SAFETY: The layout matches the one used in `new_inner()` and the block is
                // only released here.
                unsafe {
                    dealloc(self.first_slot_ptr.as_ptr().cast(), self.layout);
                }

                // If we are already panicking, we do not want to panic again because that will
                // simply obscure whatever the original panic was.
                if !thread::panicking() {
                    panic!(
                        "dropped a slot pool of {} with {live} slots still allocated",
                        type_name::<T>()
                    );
                }
            }
            DropPolicy::LeakIfNotEmpty => {
                warn!(
                    live,
                    capacity = self.capacity,
                    item_type = type_name::<T>(),
                    "slot pool dropped with allocated slots, leaking its storage"
                );
            }
        }
    }
}

// SAFETY: The raw slot pointer is owned exclusively by the pool and nothing about it is tied to
// the creating thread, so the pool can move between threads as long as `T` can.
unsafe impl<T: Send> Send for SlotPool<T> {}
