#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! A fixed-capacity object pool with contiguous multi-slot allocation.
//!
//! This crate provides [`SlotPool`], a pool that reserves storage for a fixed number of values
//! of one type in a single up-front allocation and then hands out slots from that block without
//! touching the global allocator again. Because every value lives in the same block, values
//! allocated together stay close together in memory and the heap does not fragment with
//! frequent allocation and release.
//!
//! # Key Features
//!
//! - **Fixed capacity**: One allocation at build time; the pool never grows, shrinks or moves
//! - **Contiguous runs**: Request `n` adjacent slots at once, served by best fit
//! - **Address-ordered free list**: Freed slots merge back into runs automatically
//! - **Misuse detection**: Foreign and misaligned pointers and double frees are reported as errors
//! - **Scoped handles**: [`PoolBox<T>`] and [`PoolRc<T>`] release their slot exactly once
//! - **Allocator adapter**: [`PoolAllocator<T>`] exposes raw storage to container code
//! - **Live-slot iteration**: [`LiveSlots`] walks allocated slots without per-slot flags
//! - **Configurable teardown**: [`DropPolicy`] decides what happens to a pool dropped while in use
//!
//! The pool is single-threaded. It can move between threads when `T: Send` but never be shared
//! without external synchronization.
//!
//! # Examples
//!
//! ## Raw construction and destruction
//!
//! ```rust
//! use new_zealand::nz;
//! use slot_pool::SlotPool;
//!
//! let pool = SlotPool::<(u32, String)>::with_capacity(nz!(8)).unwrap();
//!
//! let item = pool.construct((7, "seven".to_string())).unwrap();
//!
//! // SAFETY: The slot was constructed above and is not referenced elsewhere.
//! assert_eq!(unsafe { &item.as_ref().1 }, "seven");
//!
//! // SAFETY: The slot holds a constructed value and is not referenced anymore.
//! unsafe { pool.destroy(item) }.unwrap();
//! ```
//!
//! ## Scoped handles
//!
//! ```rust
//! use new_zealand::nz;
//! use slot_pool::SlotPool;
//!
//! let pool = SlotPool::<String>::with_capacity(nz!(2)).unwrap();
//!
//! let exclusive = pool.construct_owned("mine".to_string()).unwrap();
//! let shared = pool.construct_shared("ours".to_string()).unwrap();
//! let shared_copy = shared.clone();
//!
//! assert!(pool.is_full());
//! assert!(pool.try_construct("no room".to_string()).is_none());
//!
//! drop(exclusive);
//! drop(shared);
//! drop(shared_copy);
//! assert!(pool.is_empty());
//! ```
//!
//! ## Contiguous allocation
//!
//! ```rust
//! use new_zealand::nz;
//! use slot_pool::{Error, SlotPool};
//!
//! let pool = SlotPool::<u64>::with_capacity(nz!(4)).unwrap();
//!
//! let run = pool.allocate(3).unwrap();
//! assert_eq!(pool.remaining(), 1);
//! assert!(matches!(pool.allocate(2), Err(Error::OutOfMemory { .. })));
//!
//! pool.deallocate(run, 3).unwrap();
//! assert!(matches!(pool.deallocate(run, 3), Err(Error::DoubleFree { .. })));
//! ```

mod allocator;
mod builder;
mod drop_policy;
mod error;
mod iter;
mod pool;
mod pool_box;
mod pool_rc;

pub use allocator::PoolAllocator;
pub use builder::*;
pub use drop_policy::*;
pub use error::{Error, Result};
pub use iter::{Iter, IterMut, LiveSlots};
pub use pool::SlotPool;
pub use pool_box::PoolBox;
pub use pool_rc::PoolRc;
