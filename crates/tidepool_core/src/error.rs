//! # Allocation Error Types
//!
//! Every allocator operation returns a [`PoolResult`]. Only
//! [`PoolError::Corruption`] is fatal for the instance that reported it;
//! everything else is an ordinary, recoverable result.

use thiserror::Error;

/// Errors that can occur in pools, arenas and the registry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// Free list is empty and the growth policy does not allow more slots.
    #[error("pool exhausted: all {capacity} slots are allocated")]
    PoolExhausted {
        /// Slot capacity at the time of the request.
        capacity: usize,
    },

    /// Requested allocation would run past the end of the arena.
    #[error("arena exhausted: requested {requested} bytes, {remaining} remaining")]
    ArenaExhausted {
        /// Bytes requested (including alignment padding).
        requested: usize,
        /// Bytes left before the request.
        remaining: usize,
    },

    /// Release of a slot that is already free.
    #[error("double free of slot {index}")]
    DoubleFree {
        /// Slot index named by the handle.
        index: u32,
    },

    /// Handle or pointer belongs to a different pool/arena, or its index is out of range.
    #[error("handle does not belong to this allocator")]
    ForeignHandle,

    /// Handle or pointer outlived the allocation it referred to.
    #[error("stale handle: the referenced allocation was released or reset")]
    StaleHandle,

    /// The heap refused to provide backing storage.
    #[error("backing allocation of {bytes} bytes failed")]
    AllocationFailed {
        /// Bytes requested from the heap.
        bytes: usize,
    },

    /// Internal invariant violated. The instance refuses further work.
    #[error("allocator corrupted: {reason}")]
    Corruption {
        /// Which invariant broke.
        reason: &'static str,
    },

    /// The allocator was shut down and accepts no further requests.
    #[error("allocator has been shut down")]
    Retired,

    /// Invalid configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Alignment is zero, not a power of two, or larger than the arena supports.
    #[error("invalid alignment {align}")]
    InvalidAlignment {
        /// The rejected alignment.
        align: usize,
    },

    /// Slot read/write outside the slot's bounds.
    #[error("access of {len} bytes at offset {offset} exceeds slot size {slot_size}")]
    OutOfBounds {
        /// Byte offset into the slot.
        offset: usize,
        /// Length of the access.
        len: usize,
        /// Usable slot size.
        slot_size: usize,
    },

    /// Operation requires zero outstanding allocations.
    #[error("{count} allocations still outstanding")]
    OutstandingAllocations {
        /// Number of live allocations.
        count: usize,
    },

    /// Arena growth requested while allocations from the current scope exist.
    #[error("arena in use: {used} bytes allocated since last reset")]
    ArenaInUse {
        /// Bytes currently allocated.
        used: usize,
    },

    /// Requested size is larger than the largest size class.
    #[error("size {requested} exceeds largest size class {max}")]
    SizeClassTooLarge {
        /// Requested size in bytes.
        requested: usize,
        /// Largest configured size class.
        max: usize,
    },

    /// Registry refused to create another type-tagged pool.
    #[error("registry full: at most {limit} type pools")]
    RegistryFull {
        /// Configured limit.
        limit: usize,
    },
}

impl PoolError {
    /// Returns true if the reporting instance must stop serving requests.
    #[inline]
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Corruption { .. })
    }

    /// Returns true for exhaustion results that callers treat as backpressure.
    #[inline]
    #[must_use]
    pub const fn is_backpressure(&self) -> bool {
        matches!(self, Self::PoolExhausted { .. } | Self::ArenaExhausted { .. })
    }
}

/// Result type for allocator operations.
pub type PoolResult<T> = Result<T, PoolError>;
