//! # Fixed-Block Pool
//!
//! Fixed-size block allocator for objects that are frequently allocated and freed.
//!
//! ## Layout
//!
//! ```text
//!   FixedBlockPool
//!   ├── SegmentTable   append-only slot storage (never moves)
//!   ├── FreeList       intrusive, tagged head, 3 sync modes
//!   ├── FallbackTable  heap slots for the FallbackHeap policy
//!   └── PoolCounters   telemetry
//! ```
//!
//! Every slot carries a state word (allocated bit + generation). The state
//! word is the single source of truth for double-free and stale-handle
//! detection; the free list is only trusted after the state word agrees.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use parking_lot::Mutex;

use super::free_list::FreeList;
use super::handle::{
    decode_state, encode_state, next_generation, state_generation, PoolId, SlotHandle,
    SlotOrigin, SlotState,
};
use super::segment::{
    fill_words, read_bytes, try_alloc_words, words_for, write_bytes, Segment, SegmentTable,
    MAX_SEGMENTS, WORD_BYTES,
};
use crate::config::{GrowthPolicy, PoolConfig, ThreadSafety};
use crate::error::{PoolError, PoolResult};
use crate::telemetry::{PoolCounters, PoolStats, TelemetrySink};

/// A pool of equal-size slots carved from contiguous storage.
///
/// Slots are handed out as [`SlotHandle`]s. Acquire and release are
/// **O(1)**; neither touches the heap unless the growth policy asks for it.
///
/// # Thread Safety
///
/// The pool is `Sync` in every mode. With [`ThreadSafety::None`] callers
/// must serialize access themselves; racing calls are detected and reported
/// as [`PoolError::Corruption`] rather than silently handing one slot out twice.
///
/// # Example
///
/// ```rust
/// use tidepool_core::{FixedBlockPool, GrowthPolicy, PoolError};
///
/// let pool = FixedBlockPool::with_policy(64, 2, GrowthPolicy::None)?;
/// let a = pool.acquire()?;
/// let _b = pool.acquire()?;
/// assert!(matches!(pool.acquire(), Err(PoolError::PoolExhausted { .. })));
///
/// pool.release(a)?;
/// assert!(matches!(pool.release(a), Err(PoolError::DoubleFree { .. })));
/// # Ok::<(), PoolError>(())
/// ```
pub struct FixedBlockPool {
    id: PoolId,
    config: PoolConfig,
    words_per_slot: usize,
    segments: SegmentTable,
    free_list: FreeList,
    /// Total slots across all segments.
    capacity: AtomicUsize,
    /// Starting generation for newly grown segments. Only rises, so
    /// handles into compacted-away slots never match a regrown slot.
    generation_floor: u32,
    /// Serializes growth; never held on the acquire/release fast path.
    grow_lock: Mutex<()>,
    fallback: Mutex<FallbackTable>,
    counters: PoolCounters,
    poisoned: AtomicBool,
    retired: AtomicBool,
}

impl FixedBlockPool {
    /// Creates a pool and threads its free list through every slot.
    ///
    /// # Errors
    ///
    /// - `InvalidConfig` if the configuration fails validation
    /// - `AllocationFailed` if the backing storage cannot be reserved
    pub fn new(config: PoolConfig) -> PoolResult<Self> {
        config.validate()?;

        let words_per_slot = words_for(config.slot_size);
        let initial = u32::try_from(config.initial_capacity).map_err(|_| {
            PoolError::InvalidConfig(format!(
                "initial_capacity {} exceeds the slot index space",
                config.initial_capacity
            ))
        })?;
        let segment = Segment::new(0, initial, words_per_slot, 0)?;
        let (first, last) = (segment.first(), segment.last());

        let segments = SegmentTable::new(segment);
        let free_list = FreeList::new(config.thread_safety);
        free_list.push_chain(&segments, first, last, config.initial_capacity)?;

        let pool = Self {
            id: PoolId::next(),
            words_per_slot,
            segments,
            free_list,
            capacity: AtomicUsize::new(config.initial_capacity),
            generation_floor: 0,
            grow_lock: Mutex::new(()),
            fallback: Mutex::new(FallbackTable::default()),
            counters: PoolCounters::default(),
            poisoned: AtomicBool::new(false),
            retired: AtomicBool::new(false),
            config,
        };

        tracing::debug!(
            pool = %pool.id,
            slot_size = pool.config.slot_size,
            capacity = pool.config.initial_capacity,
            growth_policy = ?pool.config.growth_policy,
            thread_safety = ?pool.config.thread_safety,
            "pool created"
        );
        Ok(pool)
    }

    /// Shorthand for a locked pool with the given slot size, capacity and growth policy.
    ///
    /// # Errors
    ///
    /// Same as [`FixedBlockPool::new`].
    pub fn with_policy(
        slot_size: usize,
        capacity: usize,
        growth_policy: GrowthPolicy,
    ) -> PoolResult<Self> {
        Self::new(PoolConfig::new(slot_size, capacity).with_growth_policy(growth_policy))
    }

    /// This pool's identity.
    #[inline]
    #[must_use]
    pub const fn id(&self) -> PoolId {
        self.id
    }

    /// Bytes per slot as configured.
    #[inline]
    #[must_use]
    pub const fn slot_size(&self) -> usize {
        self.config.slot_size
    }

    /// The configuration this pool was created with.
    #[inline]
    #[must_use]
    pub const fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Free-list synchronization mode.
    #[inline]
    #[must_use]
    pub const fn thread_safety(&self) -> ThreadSafety {
        self.free_list.mode()
    }

    /// Slots in the pool's own storage.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity.load(Ordering::Acquire)
    }

    /// Slots currently on the free list.
    #[inline]
    #[must_use]
    pub fn free_len(&self) -> usize {
        self.free_list.len()
    }

    /// Slots from the pool's own storage currently held by callers.
    #[inline]
    #[must_use]
    pub fn allocated(&self) -> usize {
        self.counters.allocated()
    }

    /// Slots held by callers, heap fallback included.
    #[inline]
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.counters.allocated() + self.counters.fallback_live()
    }

    /// Returns true once a broken invariant has stopped this pool.
    #[inline]
    #[must_use]
    pub fn is_poisoned(&self) -> bool {
        self.poisoned.load(Ordering::Acquire)
    }

    /// Takes a free slot.
    ///
    /// This is an **O(1)** operation. When the free list is empty the
    /// growth policy decides:
    /// - `None`: fail with `PoolExhausted`
    /// - `Grow`: append a segment and retry until growth is refused
    /// - `FallbackHeap`: serve the slot from the heap
    ///
    /// # Errors
    ///
    /// - `PoolExhausted` if no slot could be provided (backpressure)
    /// - `AllocationFailed` if growth or fallback could not reserve memory
    /// - `Corruption` if the pool detected a broken invariant
    pub fn acquire(&self) -> PoolResult<SlotHandle> {
        self.check_health()?;
        if let Some(handle) = self.try_pop()? {
            return Ok(handle);
        }

        self.counters.on_exhausted();
        match self.config.growth_policy {
            GrowthPolicy::None => Err(PoolError::PoolExhausted {
                capacity: self.capacity(),
            }),
            // Racing acquirers can drain a fresh segment before our retry;
            // growth refusal ends the loop.
            GrowthPolicy::Grow => loop {
                self.grow_on_demand()?;
                if let Some(handle) = self.try_pop()? {
                    return Ok(handle);
                }
            },
            GrowthPolicy::FallbackHeap => self.acquire_fallback(),
        }
    }

    /// Returns a slot to the pool.
    ///
    /// This is an **O(1)** operation.
    ///
    /// # Errors
    ///
    /// - `ForeignHandle` if the handle was issued by another pool or its index is out of range
    /// - `DoubleFree` if the slot is already free, or the handle predates the slot's current owner
    /// - `Corruption` if the pool detected a broken invariant
    pub fn release(&self, handle: SlotHandle) -> PoolResult<()> {
        self.check_health()?;
        if handle.pool() != self.id {
            tracing::warn!(pool = %self.id, owner = %handle.pool(), "release of foreign handle");
            return Err(PoolError::ForeignHandle);
        }
        if handle.is_heap() {
            return self.release_fallback(handle);
        }

        let index = handle.index();
        let segment = self.segments.find(index).ok_or(PoolError::ForeignHandle)?;
        let live = encode_state(handle.generation(), true);
        let freed = encode_state(handle.generation(), false);
        if let Err(current) =
            segment
                .state(index)
                .compare_exchange(live, freed, Ordering::AcqRel, Ordering::Acquire)
        {
            if decode_state(current) == SlotState::Retired {
                return Err(PoolError::Retired);
            }
            self.counters.on_double_free();
            tracing::warn!(pool = %self.id, index, "double free rejected");
            return Err(PoolError::DoubleFree { index });
        }

        self.free_list
            .push(&self.segments, index)
            .map_err(|e| self.poison_with(e))?;
        self.counters.on_release();
        Ok(())
    }

    /// Appends `extra` slots in a new segment.
    ///
    /// Existing handles stay valid. Returns the new capacity.
    ///
    /// # Errors
    ///
    /// - `PoolExhausted` if the growth would pass `max_capacity` or the segment limit
    /// - `AllocationFailed` if the segment cannot be reserved
    pub fn grow(&self, extra: usize) -> PoolResult<usize> {
        self.check_health()?;
        if extra == 0 {
            return Ok(self.capacity());
        }
        let _guard = self.grow_lock.lock();
        self.grow_locked(extra)
    }

    /// Copies bytes out of a live slot, starting at `offset`.
    ///
    /// # Errors
    ///
    /// - `OutOfBounds` if the range passes the end of the slot
    /// - `ForeignHandle` / `StaleHandle` if the handle does not name a live slot
    pub fn read(&self, handle: SlotHandle, offset: usize, out: &mut [u8]) -> PoolResult<()> {
        self.check_bounds(offset, out.len())?;
        self.with_words(handle, |words| read_bytes(words, offset, out))
    }

    /// Copies bytes into a live slot, starting at `offset`.
    ///
    /// # Errors
    ///
    /// Same as [`FixedBlockPool::read`].
    pub fn write(&self, handle: SlotHandle, offset: usize, bytes: &[u8]) -> PoolResult<()> {
        self.check_bounds(offset, bytes.len())?;
        self.with_words(handle, |words| write_bytes(words, offset, bytes))
    }

    /// Sets every byte of a live slot to `byte`.
    ///
    /// # Errors
    ///
    /// `ForeignHandle` / `StaleHandle` if the handle does not name a live slot.
    pub fn fill(&self, handle: SlotHandle, byte: u8) -> PoolResult<()> {
        self.with_words(handle, |words| fill_words(words, byte))
    }

    /// Returns true if `handle` still names an allocated slot of this pool.
    #[must_use]
    pub fn is_live(&self, handle: SlotHandle) -> bool {
        self.with_words(handle, |_| ()).is_ok()
    }

    /// State of pool slot `index`, or `None` if the index is out of range.
    #[must_use]
    pub fn slot_state(&self, index: u32) -> Option<SlotState> {
        self.segments
            .find(index)
            .map(|segment| decode_state(segment.state(index).load(Ordering::Acquire)))
    }

    /// Snapshot of this pool's counters.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.counters.snapshot(self.config.slot_size, self.capacity())
    }

    /// Pushes a counter snapshot to `sink` under `label`.
    pub fn report(&self, sink: &dyn TelemetrySink, label: &str) {
        sink.record_pool(label, &self.stats());
    }

    /// Shrinks the pool back to its initial segment.
    ///
    /// Slots in grown segments are retired and their storage returned to
    /// the heap. Returns the number of retired slots.
    ///
    /// # Errors
    ///
    /// `OutstandingAllocations` unless every slot (heap fallback included) is free.
    pub fn compact(&mut self) -> PoolResult<usize> {
        self.check_health()?;
        let outstanding = self.outstanding();
        if outstanding > 0 {
            return Err(PoolError::OutstandingAllocations { count: outstanding });
        }

        let floor = self
            .segments
            .iter()
            .skip(1)
            .map(Segment::max_generation)
            .fold(self.generation_floor, u32::max);
        self.generation_floor = floor;
        let retired = self.segments.truncate(1);
        self.capacity
            .store(self.config.initial_capacity, Ordering::Release);
        self.free_list
            .rebuild(&self.segments)
            .map_err(|e| self.poison_with(e))?;

        tracing::debug!(pool = %self.id, retired, generation_floor = floor, "pool compacted");
        Ok(retired)
    }

    /// Retires every slot and returns the final counters.
    ///
    /// After shutdown every acquire and release fails with `Retired`.
    ///
    /// # Errors
    ///
    /// `OutstandingAllocations` if callers still hold slots; the pool stays usable.
    pub fn shutdown(&mut self) -> PoolResult<PoolStats> {
        self.check_health()?;
        let stats = self.stats();
        if stats.outstanding() > 0 {
            tracing::error!(
                pool = %self.id,
                outstanding = stats.outstanding(),
                "pool shutdown with outstanding allocations"
            );
            return Err(PoolError::OutstandingAllocations {
                count: stats.outstanding(),
            });
        }

        for segment in self.segments.iter() {
            segment.retire_all();
        }
        self.free_list.clear();
        self.retired.store(true, Ordering::Release);

        tracing::debug!(pool = %self.id, high_water_mark = stats.high_water_mark, "pool shut down");
        Ok(stats)
    }

    /// Pops the free list and marks the slot allocated.
    fn try_pop(&self) -> PoolResult<Option<SlotHandle>> {
        let Some(index) = self
            .free_list
            .pop(&self.segments)
            .map_err(|e| self.poison_with(e))?
        else {
            return Ok(None);
        };

        let segment = self
            .segments
            .find(index)
            .ok_or_else(|| self.poison("free list named a slot outside pool storage"))?;
        let state = segment.state(index);
        let current = state.load(Ordering::Acquire);
        if decode_state(current) != SlotState::Free {
            return Err(self.poison("free list referenced a slot that is not free"));
        }

        let generation = next_generation(state_generation(current));
        state
            .compare_exchange(
                current,
                encode_state(generation, true),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map_err(|_| self.poison("slot state changed while on the free list"))?;

        self.counters.on_acquire();
        Ok(Some(SlotHandle::new(
            self.id,
            index,
            generation,
            SlotOrigin::Pool,
        )))
    }

    /// Grows by one increment unless a concurrent caller already refilled the list.
    fn grow_on_demand(&self) -> PoolResult<()> {
        let _guard = self.grow_lock.lock();
        if self.free_list.len() > 0 {
            return Ok(());
        }
        let headroom = self.config.max_capacity.saturating_sub(self.capacity());
        let extra = self.config.effective_growth_increment().min(headroom);
        if extra == 0 {
            return Err(PoolError::PoolExhausted {
                capacity: self.capacity(),
            });
        }
        self.grow_locked(extra).map(|_| ())
    }

    /// Appends one segment. The growth lock must be held.
    fn grow_locked(&self, extra: usize) -> PoolResult<usize> {
        let capacity = self.capacity();
        let exhausted = PoolError::PoolExhausted { capacity };
        let new_capacity = capacity
            .checked_add(extra)
            .filter(|&total| total <= self.config.max_capacity)
            .ok_or_else(|| exhausted.clone())?;
        let first = u32::try_from(capacity).map_err(|_| exhausted.clone())?;
        let len = u32::try_from(extra).map_err(|_| exhausted.clone())?;
        if self.segments.len() >= MAX_SEGMENTS {
            return Err(exhausted);
        }

        let segment = Segment::new(first, len, self.words_per_slot, self.generation_floor)?;
        let segment = self.segments.push(segment).ok_or(exhausted)?;
        self.capacity.store(new_capacity, Ordering::Release);
        self.free_list
            .push_chain(&self.segments, segment.first(), segment.last(), extra)
            .map_err(|e| self.poison_with(e))?;

        self.counters.on_grow();
        tracing::debug!(pool = %self.id, extra, capacity = new_capacity, "pool grown");
        Ok(new_capacity)
    }

    fn acquire_fallback(&self) -> PoolResult<SlotHandle> {
        let words = try_alloc_words(self.words_per_slot)?;
        let (index, generation) = self.fallback.lock().insert(words)?;
        self.counters.on_fallback_acquire();
        tracing::trace!(pool = %self.id, index, "slot served from heap fallback");
        Ok(SlotHandle::new(self.id, index, generation, SlotOrigin::Heap))
    }

    fn release_fallback(&self, handle: SlotHandle) -> PoolResult<()> {
        let removed = self.fallback.lock().remove(handle);
        match removed {
            Ok(()) => {
                self.counters.on_fallback_release();
                Ok(())
            }
            Err(err @ PoolError::DoubleFree { .. }) => {
                self.counters.on_double_free();
                tracing::warn!(pool = %self.id, index = handle.index(), "double free of heap slot rejected");
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    /// Runs `f` over the words of the live slot named by `handle`.
    fn with_words<R>(&self, handle: SlotHandle, f: impl FnOnce(&[AtomicU64]) -> R) -> PoolResult<R> {
        self.check_health()?;
        if handle.pool() != self.id {
            return Err(PoolError::ForeignHandle);
        }
        match handle.origin() {
            SlotOrigin::Pool => {
                let index = handle.index();
                let segment = self.segments.find(index).ok_or(PoolError::ForeignHandle)?;
                let current = segment.state(index).load(Ordering::Acquire);
                if current != encode_state(handle.generation(), true) {
                    return Err(PoolError::StaleHandle);
                }
                Ok(f(segment.words(index)))
            }
            SlotOrigin::Heap => {
                let table = self.fallback.lock();
                let words = table.live(handle)?;
                Ok(f(words))
            }
        }
    }

    fn check_bounds(&self, offset: usize, len: usize) -> PoolResult<()> {
        match offset.checked_add(len) {
            Some(end) if end <= self.config.slot_size => Ok(()),
            _ => Err(PoolError::OutOfBounds {
                offset,
                len,
                slot_size: self.config.slot_size,
            }),
        }
    }

    #[inline]
    fn check_health(&self) -> PoolResult<()> {
        if self.poisoned.load(Ordering::Acquire) {
            return Err(PoolError::Corruption {
                reason: "pool halted after earlier corruption",
            });
        }
        if self.retired.load(Ordering::Acquire) {
            return Err(PoolError::Retired);
        }
        Ok(())
    }

    /// Halts the pool and reports `reason`.
    #[cold]
    fn poison(&self, reason: &'static str) -> PoolError {
        self.poisoned.store(true, Ordering::Release);
        tracing::error!(pool = %self.id, reason, "pool corrupted, halting");
        PoolError::Corruption { reason }
    }

    /// Halts the pool if `err` is fatal, passing it through either way.
    #[cold]
    fn poison_with(&self, err: PoolError) -> PoolError {
        match err {
            PoolError::Corruption { reason } => self.poison(reason),
            other => other,
        }
    }
}

impl fmt::Debug for FixedBlockPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FixedBlockPool")
            .field("id", &self.id)
            .field("slot_size", &self.config.slot_size)
            .field("capacity", &self.capacity())
            .field("segments", &self.segments.len())
            .field("free_len", &self.free_len())
            .field("outstanding", &self.outstanding())
            .field("growth_policy", &self.config.growth_policy)
            .field("thread_safety", &self.thread_safety())
            .field("poisoned", &self.is_poisoned())
            .finish()
    }
}

impl Drop for FixedBlockPool {
    fn drop(&mut self) {
        let outstanding = self.outstanding();
        if outstanding > 0 && !self.retired.load(Ordering::Acquire) {
            tracing::warn!(pool = %self.id, outstanding, "pool dropped with outstanding allocations");
        }
    }
}

/// Heap slots served by the `FallbackHeap` growth policy.
///
/// Each entry owns its own allocation, returned to the heap on release.
/// Entry indices are recycled; the per-entry generation tells old handles apart.
#[derive(Debug, Default)]
struct FallbackTable {
    entries: Vec<FallbackEntry>,
    vacant: Vec<u32>,
}

#[derive(Debug)]
struct FallbackEntry {
    generation: u32,
    words: Option<Box<[AtomicU64]>>,
}

impl FallbackTable {
    fn insert(&mut self, words: Box<[AtomicU64]>) -> PoolResult<(u32, u32)> {
        if let Some(index) = self.vacant.pop() {
            let entry = &mut self.entries[index as usize];
            entry.generation = next_generation(entry.generation);
            entry.words = Some(words);
            return Ok((index, entry.generation));
        }

        let index = u32::try_from(self.entries.len()).map_err(|_| PoolError::AllocationFailed {
            bytes: words.len() * WORD_BYTES,
        })?;
        self.entries.try_reserve(1).map_err(|_| PoolError::AllocationFailed {
            bytes: std::mem::size_of::<FallbackEntry>(),
        })?;
        self.entries.push(FallbackEntry {
            generation: 0,
            words: Some(words),
        });
        Ok((index, 0))
    }

    fn remove(&mut self, handle: SlotHandle) -> PoolResult<()> {
        let index = handle.index();
        let entry = self
            .entries
            .get_mut(index as usize)
            .ok_or(PoolError::ForeignHandle)?;
        if entry.generation != handle.generation() || entry.words.is_none() {
            return Err(PoolError::DoubleFree { index });
        }
        entry.words = None;
        self.vacant.push(index);
        Ok(())
    }

    fn live(&self, handle: SlotHandle) -> PoolResult<&[AtomicU64]> {
        let entry = self
            .entries
            .get(handle.index() as usize)
            .ok_or(PoolError::ForeignHandle)?;
        match &entry.words {
            Some(words) if entry.generation == handle.generation() => Ok(&**words),
            _ => Err(PoolError::StaleHandle),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(capacity: usize, growth: GrowthPolicy, mode: ThreadSafety) -> FixedBlockPool {
        FixedBlockPool::new(
            PoolConfig::new(64, capacity)
                .with_growth_policy(growth)
                .with_thread_safety(mode),
        )
        .unwrap()
    }

    const MODES: [ThreadSafety; 3] = [
        ThreadSafety::None,
        ThreadSafety::Locked,
        ThreadSafety::LockFree,
    ];

    #[test]
    fn test_pool_exhaustion_and_reuse() {
        for mode in MODES {
            let pool = pool(4, GrowthPolicy::None, mode);
            let handles: Vec<_> = (0..4).map(|_| pool.acquire().unwrap()).collect();
            assert_eq!(pool.free_len(), 0);

            let err = pool.acquire().unwrap_err();
            assert_eq!(err, PoolError::PoolExhausted { capacity: 4 });

            pool.release(handles[2]).unwrap();
            let again = pool.acquire().unwrap();
            assert_eq!(again.index(), handles[2].index());
            assert_ne!(again.generation(), handles[2].generation());
            assert_eq!(pool.stats().exhaustion_count, 1);
        }
    }

    #[test]
    fn test_double_free_leaves_free_list_unchanged() {
        let pool = pool(4, GrowthPolicy::None, ThreadSafety::Locked);
        let handle = pool.acquire().unwrap();
        pool.release(handle).unwrap();
        let free_before = pool.free_len();

        assert_eq!(
            pool.release(handle),
            Err(PoolError::DoubleFree {
                index: handle.index()
            })
        );
        assert_eq!(pool.free_len(), free_before);
        assert_eq!(pool.stats().double_free_count, 1);
    }

    #[test]
    fn test_stale_release_after_reacquire_is_double_free() {
        let pool = pool(1, GrowthPolicy::None, ThreadSafety::LockFree);
        let old = pool.acquire().unwrap();
        pool.release(old).unwrap();
        let new = pool.acquire().unwrap();
        assert_eq!(old.index(), new.index());

        assert!(matches!(pool.release(old), Err(PoolError::DoubleFree { .. })));
        // The current owner is unaffected
        assert!(pool.is_live(new));
        pool.release(new).unwrap();
    }

    #[test]
    fn test_foreign_handle_rejected() {
        let a = pool(2, GrowthPolicy::None, ThreadSafety::Locked);
        let b = pool(2, GrowthPolicy::None, ThreadSafety::Locked);
        let handle = a.acquire().unwrap();
        assert_eq!(b.release(handle), Err(PoolError::ForeignHandle));

        let forged = SlotHandle::new(a.id(), 99, 1, SlotOrigin::Pool);
        assert_eq!(a.release(forged), Err(PoolError::ForeignHandle));
    }

    #[test]
    fn test_grow_policy_appends_segment() {
        let pool = FixedBlockPool::new(
            PoolConfig::new(16, 2)
                .with_growth_policy(GrowthPolicy::Grow)
                .with_growth_increment(3),
        )
        .unwrap();
        let first: Vec<_> = (0..2).map(|_| pool.acquire().unwrap()).collect();
        let grown = pool.acquire().unwrap();

        assert_eq!(pool.capacity(), 5);
        assert_eq!(pool.stats().grow_count, 1);
        assert!(grown.index() >= 2);
        // Handles from before the growth are untouched
        for handle in first {
            assert!(pool.is_live(handle));
            pool.release(handle).unwrap();
        }
    }

    #[test]
    fn test_growth_stops_at_max_capacity() {
        let pool = FixedBlockPool::new(
            PoolConfig::new(16, 2)
                .with_growth_policy(GrowthPolicy::Grow)
                .with_max_capacity(3),
        )
        .unwrap();
        let _held: Vec<_> = (0..3).map(|_| pool.acquire().unwrap()).collect();
        assert_eq!(pool.capacity(), 3);
        assert!(matches!(pool.acquire(), Err(PoolError::PoolExhausted { .. })));
    }

    #[test]
    fn test_fallback_heap_routes_release() {
        let pool = pool(1, GrowthPolicy::FallbackHeap, ThreadSafety::Locked);
        let pooled = pool.acquire().unwrap();
        let heap = pool.acquire().unwrap();
        assert!(!pooled.is_heap());
        assert!(heap.is_heap());
        assert_eq!(pool.outstanding(), 2);

        pool.write(heap, 0, b"overflow").unwrap();
        let mut out = [0u8; 8];
        pool.read(heap, 0, &mut out).unwrap();
        assert_eq!(&out, b"overflow");

        pool.release(heap).unwrap();
        assert!(matches!(pool.release(heap), Err(PoolError::DoubleFree { .. })));
        assert!(!pool.is_live(heap));
        pool.release(pooled).unwrap();

        let stats = pool.stats();
        assert_eq!(stats.fallback_allocations, 1);
        assert_eq!(stats.outstanding(), 0);
        assert_eq!(stats.high_water_mark, 2);
    }

    #[test]
    fn test_read_write_roundtrip_and_bounds() {
        let pool = pool(2, GrowthPolicy::None, ThreadSafety::None);
        let handle = pool.acquire().unwrap();
        pool.write(handle, 10, &[7, 8, 9]).unwrap();

        let mut out = [0u8; 3];
        pool.read(handle, 10, &mut out).unwrap();
        assert_eq!(out, [7, 8, 9]);

        assert!(matches!(
            pool.write(handle, 62, &[1, 2, 3]),
            Err(PoolError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn test_access_after_release_is_stale() {
        let pool = pool(2, GrowthPolicy::None, ThreadSafety::Locked);
        let handle = pool.acquire().unwrap();
        pool.fill(handle, 0xEE).unwrap();
        pool.release(handle).unwrap();

        let mut out = [0u8; 4];
        assert_eq!(pool.read(handle, 0, &mut out), Err(PoolError::StaleHandle));
        assert_eq!(pool.slot_state(handle.index()), Some(SlotState::Free));
    }

    #[test]
    fn test_compact_requires_quiescence() {
        let mut pool = pool(2, GrowthPolicy::Grow, ThreadSafety::Locked);
        let handles: Vec<_> = (0..3).map(|_| pool.acquire().unwrap()).collect();
        assert_eq!(pool.capacity(), 4);
        assert!(matches!(
            pool.compact(),
            Err(PoolError::OutstandingAllocations { count: 3 })
        ));

        for handle in handles {
            pool.release(handle).unwrap();
        }
        assert_eq!(pool.compact().unwrap(), 2);
        assert_eq!(pool.capacity(), 2);
        assert_eq!(pool.free_len(), 2);
        assert!(pool.slot_state(3).is_none());
    }

    #[test]
    fn test_compact_keeps_old_handles_rejected() {
        let mut pool = FixedBlockPool::new(
            PoolConfig::new(8, 1)
                .with_growth_policy(GrowthPolicy::Grow)
                .with_growth_increment(1),
        )
        .unwrap();
        let first = pool.acquire().unwrap();
        let old = pool.acquire().unwrap();
        assert_eq!(old.index(), 1);
        pool.release(first).unwrap();
        pool.release(old).unwrap();
        assert_eq!(pool.compact().unwrap(), 1);

        let _again = pool.acquire().unwrap();
        let new_owner = pool.acquire().unwrap();
        assert_eq!(new_owner.index(), old.index());
        assert_ne!(new_owner.generation(), old.generation());

        assert!(matches!(pool.release(old), Err(PoolError::DoubleFree { .. })));
        assert!(!pool.is_live(old));
        assert!(pool.is_live(new_owner));
        pool.release(new_owner).unwrap();
    }

    #[test]
    fn test_compact_keeps_old_heap_handles_rejected() {
        let mut pool = FixedBlockPool::with_policy(8, 1, GrowthPolicy::FallbackHeap).unwrap();
        let pooled = pool.acquire().unwrap();
        let old = pool.acquire().unwrap();
        assert!(old.is_heap());
        pool.release(pooled).unwrap();
        pool.release(old).unwrap();
        pool.compact().unwrap();

        let _pooled = pool.acquire().unwrap();
        let new_owner = pool.acquire().unwrap();
        assert!(new_owner.is_heap());
        assert_eq!(new_owner.index(), old.index());
        assert_ne!(new_owner.generation(), old.generation());

        assert!(matches!(pool.release(old), Err(PoolError::DoubleFree { .. })));
        assert!(pool.is_live(new_owner));
        pool.release(new_owner).unwrap();
    }

    #[test]
    fn test_shutdown_retires_slots() {
        let mut pool = pool(2, GrowthPolicy::None, ThreadSafety::Locked);
        let handle = pool.acquire().unwrap();
        assert!(matches!(
            pool.shutdown(),
            Err(PoolError::OutstandingAllocations { count: 1 })
        ));

        pool.release(handle).unwrap();
        let stats = pool.shutdown().unwrap();
        assert_eq!(stats.high_water_mark, 1);
        assert_eq!(pool.slot_state(0), Some(SlotState::Retired));
        assert_eq!(pool.acquire(), Err(PoolError::Retired));
        assert_eq!(pool.release(handle), Err(PoolError::Retired));
    }

    #[test]
    fn test_zero_sized_requests_are_rejected() {
        assert!(FixedBlockPool::with_policy(0, 4, GrowthPolicy::None).is_err());
        assert!(FixedBlockPool::with_policy(8, 0, GrowthPolicy::None).is_err());
    }

    #[test]
    fn test_max_segments_bounds_growth() {
        let pool = FixedBlockPool::new(
            PoolConfig::new(8, 1)
                .with_growth_policy(GrowthPolicy::Grow)
                .with_growth_increment(1),
        )
        .unwrap();
        let held: Vec<_> = (0..MAX_SEGMENTS).map(|_| pool.acquire().unwrap()).collect();
        assert_eq!(held.len(), MAX_SEGMENTS);
        assert!(matches!(pool.acquire(), Err(PoolError::PoolExhausted { .. })));
    }
}
