//! # Intrusive Free List
//!
//! The free list is a stack of slot indices threaded through the slots
//! themselves: word 0 of every free slot holds the index of the next free
//! slot. The only separate state is the head word:
//!
//! ```text
//!   head: [ tag: u32 | index: u32 ]
//!                         │
//!                         ▼
//!   slot 7 [next=2 | ...] ──► slot 2 [next=5 | ...] ──► slot 5 [next=NIL]
//! ```
//!
//! The tag is bumped on every successful head update. In lock-free mode a
//! pop that read a stale `next` (because the head slot was popped, reused
//! and pushed back in between) sees a different tag and its CAS fails.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use parking_lot::Mutex;

use super::segment::SegmentTable;
use crate::config::ThreadSafety;
use crate::error::{PoolError, PoolResult};

/// Empty-list sentinel index.
pub(crate) const NIL: u32 = u32::MAX;

#[inline]
const fn pack(tag: u32, index: u32) -> u64 {
    ((tag as u64) << 32) | index as u64
}

#[inline]
const fn unpack(word: u64) -> (u32, u32) {
    ((word >> 32) as u32, word as u32)
}

/// Reads the `next` index stored in a free slot's link word.
#[inline]
const fn link_target(word: u64) -> u32 {
    word as u32
}

/// Free list head plus its synchronization mode.
#[derive(Debug)]
pub(crate) struct FreeList {
    head: AtomicU64,
    len: AtomicUsize,
    mode: ThreadSafety,
    lock: Mutex<()>,
}

impl FreeList {
    /// Creates an empty free list.
    pub(crate) fn new(mode: ThreadSafety) -> Self {
        Self {
            head: AtomicU64::new(pack(0, NIL)),
            len: AtomicUsize::new(0),
            mode,
            lock: Mutex::new(()),
        }
    }

    /// Number of slots on the list.
    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    /// Synchronization mode.
    #[inline]
    pub(crate) const fn mode(&self) -> ThreadSafety {
        self.mode
    }

    /// Pops one slot index, or `None` if the list is empty.
    ///
    /// # Errors
    ///
    /// `Corruption` if the head names a slot outside every segment.
    pub(crate) fn pop(&self, segments: &SegmentTable) -> PoolResult<Option<u32>> {
        let popped = match self.mode {
            ThreadSafety::None => self.pop_exclusive(segments)?,
            ThreadSafety::Locked => {
                let _guard = self.lock.lock();
                self.pop_exclusive(segments)?
            }
            ThreadSafety::LockFree => self.pop_lock_free(segments)?,
        };
        if popped.is_some() {
            self.len.fetch_sub(1, Ordering::AcqRel);
        }
        Ok(popped)
    }

    /// Pushes one slot index.
    ///
    /// # Errors
    ///
    /// `Corruption` if `index` is outside every segment.
    pub(crate) fn push(&self, segments: &SegmentTable, index: u32) -> PoolResult<()> {
        self.push_chain(segments, index, index, 1)
    }

    /// Splices a pre-linked chain `first -> ... -> last` of `count` slots onto the list.
    ///
    /// # Errors
    ///
    /// `Corruption` if `last` is outside every segment.
    pub(crate) fn push_chain(
        &self,
        segments: &SegmentTable,
        first: u32,
        last: u32,
        count: usize,
    ) -> PoolResult<()> {
        let tail = segments.link(last).ok_or(PoolError::Corruption {
            reason: "free list push outside pool storage",
        })?;
        // Counted before the splice so a racing pop can never drive `len` below zero.
        self.len.fetch_add(count, Ordering::AcqRel);
        match self.mode {
            ThreadSafety::None => self.splice_exclusive(tail, first),
            ThreadSafety::Locked => {
                let _guard = self.lock.lock();
                self.splice_exclusive(tail, first);
            }
            ThreadSafety::LockFree => self.splice_lock_free(tail, first),
        }
        Ok(())
    }

    /// Re-threads every slot of every segment onto an empty list.
    ///
    /// Only valid with zero outstanding allocations and exclusive access.
    pub(crate) fn rebuild(&mut self, segments: &SegmentTable) -> PoolResult<()> {
        self.head.store(pack(0, NIL), Ordering::Release);
        self.len.store(0, Ordering::Release);
        for segment in segments.iter() {
            segment.thread_chain();
            self.push_chain(segments, segment.first(), segment.last(), segment.len() as usize)?;
        }
        Ok(())
    }

    /// Empties the list without touching slot storage.
    pub(crate) fn clear(&mut self) {
        self.head.store(pack(0, NIL), Ordering::Release);
        self.len.store(0, Ordering::Release);
    }

    /// Pop for callers that already exclude other mutators.
    fn pop_exclusive(&self, segments: &SegmentTable) -> PoolResult<Option<u32>> {
        let (tag, index) = unpack(self.head.load(Ordering::Acquire));
        if index == NIL {
            return Ok(None);
        }
        let next = segments
            .link(index)
            .ok_or(PoolError::Corruption {
                reason: "free list head outside pool storage",
            })?
            .load(Ordering::Acquire);
        self.head
            .store(pack(tag.wrapping_add(1), link_target(next)), Ordering::Release);
        Ok(Some(index))
    }

    fn pop_lock_free(&self, segments: &SegmentTable) -> PoolResult<Option<u32>> {
        let mut current = self.head.load(Ordering::Acquire);
        loop {
            let (tag, index) = unpack(current);
            if index == NIL {
                return Ok(None);
            }
            // May be stale if another thread popped `index` meanwhile; the
            // tag comparison below rejects the CAS in that case.
            let next = segments
                .link(index)
                .ok_or(PoolError::Corruption {
                    reason: "free list head outside pool storage",
                })?
                .load(Ordering::Acquire);
            match self.head.compare_exchange_weak(
                current,
                pack(tag.wrapping_add(1), link_target(next)),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(Some(index)),
                Err(actual) => {
                    current = actual;
                    std::hint::spin_loop();
                }
            }
        }
    }

    fn splice_exclusive(&self, tail: &AtomicU64, first: u32) {
        let (tag, head) = unpack(self.head.load(Ordering::Acquire));
        tail.store(u64::from(head), Ordering::Release);
        self.head
            .store(pack(tag.wrapping_add(1), first), Ordering::Release);
    }

    fn splice_lock_free(&self, tail: &AtomicU64, first: u32) {
        let mut current = self.head.load(Ordering::Acquire);
        loop {
            let (tag, head) = unpack(current);
            tail.store(u64::from(head), Ordering::Release);
            match self.head.compare_exchange_weak(
                current,
                pack(tag.wrapping_add(1), first),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(actual) => {
                    current = actual;
                    std::hint::spin_loop();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::segment::Segment;

    fn seeded(mode: ThreadSafety, slots: u32) -> (FreeList, SegmentTable) {
        let table = SegmentTable::new(Segment::new(0, slots, 1, 0).unwrap());
        let list = FreeList::new(mode);
        list.push_chain(&table, 0, slots - 1, slots as usize).unwrap();
        (list, table)
    }

    #[test]
    fn test_pack_roundtrip() {
        assert_eq!(unpack(pack(7, 42)), (7, 42));
        assert_eq!(unpack(pack(u32::MAX, NIL)), (u32::MAX, NIL));
    }

    #[test]
    fn test_pop_drains_in_chain_order() {
        for mode in [ThreadSafety::None, ThreadSafety::Locked, ThreadSafety::LockFree] {
            let (list, table) = seeded(mode, 3);
            assert_eq!(list.len(), 3);
            assert_eq!(list.pop(&table).unwrap(), Some(0));
            assert_eq!(list.pop(&table).unwrap(), Some(1));
            assert_eq!(list.pop(&table).unwrap(), Some(2));
            assert_eq!(list.pop(&table).unwrap(), None);
            assert_eq!(list.len(), 0);
        }
    }

    #[test]
    fn test_push_is_lifo() {
        let (list, table) = seeded(ThreadSafety::LockFree, 4);
        let a = list.pop(&table).unwrap().unwrap();
        let b = list.pop(&table).unwrap().unwrap();
        list.push(&table, a).unwrap();
        list.push(&table, b).unwrap();
        assert_eq!(list.pop(&table).unwrap(), Some(b));
        assert_eq!(list.pop(&table).unwrap(), Some(a));
    }

    #[test]
    fn test_tag_advances_on_every_update() {
        let (list, table) = seeded(ThreadSafety::Locked, 2);
        let (before, _) = unpack(list.head.load(Ordering::Relaxed));
        let index = list.pop(&table).unwrap().unwrap();
        list.push(&table, index).unwrap();
        let (after, _) = unpack(list.head.load(Ordering::Relaxed));
        assert_eq!(after, before.wrapping_add(2));
    }

    #[test]
    fn test_push_outside_storage_is_corruption() {
        let (list, table) = seeded(ThreadSafety::None, 2);
        let err = list.push(&table, 99).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_rebuild_restores_every_slot() {
        let (mut list, table) = seeded(ThreadSafety::None, 5);
        while list.pop(&table).unwrap().is_some() {}
        list.rebuild(&table).unwrap();
        assert_eq!(list.len(), 5);
    }
}
