use thiserror::Error;

/// Errors that can occur when allocating from or releasing into a [`SlotPool`][crate::SlotPool].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// There is no run of free slots long enough to satisfy the request, or the backing
    /// store of a new pool could not be obtained.
    #[error("no run of {requested} contiguous free slots exists in a pool of {capacity} slots")]
    OutOfMemory {
        /// The number of contiguous slots that was requested.
        requested: usize,

        /// The fixed capacity of the pool.
        capacity: usize,
    },

    /// The caller passed a pointer or length that does not describe slots of this pool.
    ///
    /// This indicates a bug in the caller. The pool state is unchanged.
    #[error("invalid argument: {problem}")]
    InvalidArgument {
        /// A human-readable description of the problem.
        problem: &'static str,
    },

    /// A slot that was being released is already free.
    ///
    /// This indicates a bug in the caller. The pool state is unchanged.
    #[error("slot {index} is already free")]
    DoubleFree {
        /// Index of the first already-free slot found in the released run.
        index: usize,
    },

    /// The pool was closed while some of its slots were still allocated.
    #[error("pool was closed with {live} slots still allocated")]
    LiveSlots {
        /// The number of slots that were still allocated.
        live: usize,
    },
}

/// A specialized `Result` type for pool operations, returning the crate's
/// [`Error`] type as the error value.
pub type Result<T> = std::result::Result<T, Error>;
