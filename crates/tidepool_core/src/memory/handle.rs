//! # Slot Handles
//!
//! Handles are lightweight identifiers consisting of:
//! - The identity of the pool that issued them
//! - An index into the pool's slots
//! - A generation counter for detecting stale references

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

/// Source of unique pool identities. Zero is never issued.
static NEXT_POOL_ID: AtomicU32 = AtomicU32::new(1);

/// Identity of one pool instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct PoolId(u32);

impl PoolId {
    /// Issues a fresh, process-unique identity.
    pub(crate) fn next() -> Self {
        Self(NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw identity value.
    #[inline]
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for PoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pool#{}", self.0)
    }
}

/// Where a handle's storage lives.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SlotOrigin {
    /// A slot inside the pool's own segments.
    Pool,
    /// A heap allocation made by the `FallbackHeap` growth policy.
    Heap,
}

/// Lifecycle state of one slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SlotState {
    /// On the free list.
    Free,
    /// Held by a caller.
    Allocated,
    /// Terminal. The pool was shut down.
    Retired,
}

/// Handle to an allocated slot.
///
/// A handle is plain data and can be copied freely, but it refers to its
/// slot only between the `acquire` that produced it and the matching
/// `release`. Afterwards the pool rejects it: a second release reports a
/// double free, any access reports a stale handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SlotHandle {
    pool: PoolId,
    index: u32,
    generation: u32,
    origin: SlotOrigin,
}

impl SlotHandle {
    #[inline]
    pub(crate) const fn new(pool: PoolId, index: u32, generation: u32, origin: SlotOrigin) -> Self {
        Self {
            pool,
            index,
            generation,
            origin,
        }
    }

    /// The pool that issued this handle.
    #[inline]
    #[must_use]
    pub const fn pool(self) -> PoolId {
        self.pool
    }

    /// Slot index (pool storage) or fallback entry index (heap).
    #[inline]
    #[must_use]
    pub const fn index(self) -> u32 {
        self.index
    }

    /// Generation the slot had when this handle was issued.
    #[inline]
    #[must_use]
    pub const fn generation(self) -> u32 {
        self.generation
    }

    /// Where the slot's storage lives.
    #[inline]
    #[must_use]
    pub const fn origin(self) -> SlotOrigin {
        self.origin
    }

    /// Returns true if the slot came from the heap fallback.
    #[inline]
    #[must_use]
    pub const fn is_heap(self) -> bool {
        matches!(self.origin, SlotOrigin::Heap)
    }
}

// Slot state word layout:
// - bit 0: allocated
// - bits 1..=30: generation
// - u32::MAX: retired
//
// The generation is capped at 30 bits so no live encoding collides with the
// retired sentinel.

/// Generation values wrap within this mask.
pub(crate) const GENERATION_MASK: u32 = (1 << 30) - 1;

/// State word of a retired slot.
pub(crate) const STATE_RETIRED: u32 = u32::MAX;

/// Encodes a generation and allocation flag into a state word.
#[inline]
pub(crate) const fn encode_state(generation: u32, allocated: bool) -> u32 {
    ((generation & GENERATION_MASK) << 1) | allocated as u32
}

/// Decodes the lifecycle state of a state word.
#[inline]
pub(crate) const fn decode_state(word: u32) -> SlotState {
    if word == STATE_RETIRED {
        SlotState::Retired
    } else if word & 1 == 1 {
        SlotState::Allocated
    } else {
        SlotState::Free
    }
}

/// Extracts the generation of a state word.
#[inline]
pub(crate) const fn state_generation(word: u32) -> u32 {
    (word >> 1) & GENERATION_MASK
}

/// The generation a slot takes on its next acquire.
#[inline]
pub(crate) const fn next_generation(generation: u32) -> u32 {
    generation.wrapping_add(1) & GENERATION_MASK
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_ids_are_unique() {
        let a = PoolId::next();
        let b = PoolId::next();
        assert_ne!(a, b);
        assert_ne!(a.get(), 0);
    }

    #[test]
    fn test_state_roundtrip() {
        let word = encode_state(42, true);
        assert_eq!(decode_state(word), SlotState::Allocated);
        assert_eq!(state_generation(word), 42);

        let word = encode_state(42, false);
        assert_eq!(decode_state(word), SlotState::Free);
        assert_eq!(state_generation(word), 42);
    }

    #[test]
    fn test_max_generation_never_reads_as_retired() {
        let word = encode_state(GENERATION_MASK, true);
        assert_ne!(word, STATE_RETIRED);
        assert_eq!(decode_state(word), SlotState::Allocated);
        assert_eq!(decode_state(STATE_RETIRED), SlotState::Retired);
    }

    #[test]
    fn test_generation_wraps() {
        assert_eq!(next_generation(GENERATION_MASK), 0);
        assert_eq!(next_generation(7), 8);
    }

    #[test]
    fn test_handle_accessors() {
        let id = PoolId::next();
        let handle = SlotHandle::new(id, 3, 9, SlotOrigin::Heap);
        assert_eq!(handle.pool(), id);
        assert_eq!(handle.index(), 3);
        assert_eq!(handle.generation(), 9);
        assert!(handle.is_heap());
    }
}
