//! # Liveness Tracking
//!
//! Handles are plain `Copy` data, so a structure that keeps them across a
//! release or reset can end up holding dead ones. Such structures register
//! the handles they store with a [`LivenessTracker`] and periodically audit
//! it against the allocator that issued them.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use super::arena::{Arena, ArenaPointer};
use super::handle::SlotHandle;
use super::object_pool::{ObjectHandle, ObjectPool, Poolable};
use super::pool::FixedBlockPool;

/// An allocator that can tell whether one of its handles is still live.
pub trait HandleSource<H> {
    /// Returns true if `handle` still refers to a live allocation.
    fn is_live(&self, handle: &H) -> bool;
}

impl HandleSource<SlotHandle> for FixedBlockPool {
    fn is_live(&self, handle: &SlotHandle) -> bool {
        Self::is_live(self, *handle)
    }
}

impl HandleSource<ArenaPointer> for Arena {
    fn is_live(&self, handle: &ArenaPointer) -> bool {
        Self::is_live(self, *handle)
    }
}

impl<T: Poolable> HandleSource<ObjectHandle<T>> for ObjectPool<T> {
    fn is_live(&self, handle: &ObjectHandle<T>) -> bool {
        Self::is_live(self, *handle)
    }
}

/// Registration ticket returned by [`LivenessTracker::track`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TrackedId(u64);

/// Registry of stored handles that can be audited for staleness.
#[derive(Debug)]
pub struct LivenessTracker<H> {
    entries: Mutex<BTreeMap<u64, H>>,
    next: AtomicU64,
}

impl<H> Default for LivenessTracker<H> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
            next: AtomicU64::new(0),
        }
    }
}

impl<H: Copy> LivenessTracker<H> {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a stored handle.
    pub fn track(&self, handle: H) -> TrackedId {
        let id = self.next.fetch_add(1, Ordering::Relaxed);
        self.entries.lock().insert(id, handle);
        TrackedId(id)
    }

    /// Forgets a registration, returning the handle if it was still tracked.
    pub fn untrack(&self, id: TrackedId) -> Option<H> {
        self.entries.lock().remove(&id.0)
    }

    /// Number of tracked handles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns true if nothing is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Lists tracked handles that `source` no longer considers live.
    pub fn audit<S: HandleSource<H> + ?Sized>(&self, source: &S) -> Vec<(TrackedId, H)> {
        self.entries
            .lock()
            .iter()
            .filter(|(_, handle)| !source.is_live(handle))
            .map(|(&id, &handle)| (TrackedId(id), handle))
            .collect()
    }

    /// Drops every stale registration, returning how many were removed.
    pub fn purge_stale<S: HandleSource<H> + ?Sized>(&self, source: &S) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, handle| source.is_live(handle));
        let purged = before - entries.len();
        if purged > 0 {
            tracing::debug!(purged, remaining = entries.len(), "purged stale handles");
        }
        purged
    }
}

/// Handles that can register themselves with a tracker.
pub trait Trackable: Copy {
    /// Registers `self` with `tracker`.
    fn register_with(self, tracker: &LivenessTracker<Self>) -> TrackedId {
        tracker.track(self)
    }
}

impl Trackable for SlotHandle {}

impl Trackable for ArenaPointer {}

impl<T> Trackable for ObjectHandle<T> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GrowthPolicy;

    #[test]
    fn test_audit_reports_released_slots() {
        let pool = FixedBlockPool::with_policy(16, 4, GrowthPolicy::None).unwrap();
        let tracker = LivenessTracker::new();
        let kept = pool.acquire().unwrap();
        let dropped = pool.acquire().unwrap();
        kept.register_with(&tracker);
        let dropped_id = dropped.register_with(&tracker);

        pool.release(dropped).unwrap();
        let stale = tracker.audit(&pool);
        assert_eq!(stale, vec![(dropped_id, dropped)]);

        assert_eq!(tracker.purge_stale(&pool), 1);
        assert_eq!(tracker.len(), 1);
        assert!(tracker.audit(&pool).is_empty());
    }

    #[test]
    fn test_arena_reset_makes_every_pointer_stale() {
        let mut arena = Arena::new(128).unwrap();
        let tracker = LivenessTracker::new();
        for _ in 0..3 {
            arena.allocate(8, 8).unwrap().register_with(&tracker);
        }
        assert!(tracker.audit(&arena).is_empty());

        arena.reset();
        assert_eq!(tracker.audit(&arena).len(), 3);
        assert_eq!(tracker.purge_stale(&arena), 3);
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_untrack_returns_handle() {
        let pool = FixedBlockPool::with_policy(16, 1, GrowthPolicy::None).unwrap();
        let tracker = LivenessTracker::new();
        let handle = pool.acquire().unwrap();
        let id = tracker.track(handle);
        assert_eq!(tracker.untrack(id), Some(handle));
        assert_eq!(tracker.untrack(id), None);
    }
}
