//! # Allocator Telemetry
//!
//! Pools and arenas keep their counters in atomics on the hot path and
//! hand out plain snapshots. Snapshots are pushed to a [`TelemetrySink`];
//! the default sink forwards them to `tracing`.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Point-in-time counters for a fixed-block pool.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Bytes per slot.
    pub slot_size: usize,
    /// Slots in the pool's own storage.
    pub capacity: usize,
    /// Slots currently allocated from the pool's storage.
    pub allocated: usize,
    /// Most slots ever allocated at once (pool storage and heap fallback).
    pub high_water_mark: usize,
    /// Acquire calls that found the free list empty.
    pub exhaustion_count: u64,
    /// Release calls rejected as double frees.
    pub double_free_count: u64,
    /// Slots currently served from the heap fallback.
    pub fallback_live: usize,
    /// Total heap fallback allocations.
    pub fallback_allocations: u64,
    /// Growth steps performed.
    pub grow_count: u64,
}

impl PoolStats {
    /// Slots still held by callers, pool storage and fallback together.
    #[inline]
    #[must_use]
    pub const fn outstanding(&self) -> usize {
        self.allocated + self.fallback_live
    }
}

/// Point-in-time counters for an arena.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ArenaStats {
    /// Buffer size in bytes.
    pub capacity: usize,
    /// Bytes allocated since the last reset.
    pub used: usize,
    /// Most bytes ever allocated within one epoch.
    pub high_water_mark: usize,
    /// Allocations since the last reset.
    pub allocations: usize,
    /// Allocate calls rejected for lack of space.
    pub exhaustion_count: u64,
    /// Number of resets (the current epoch).
    pub resets: u64,
}

/// Receiver for allocator counters.
///
/// Implemented by the surrounding runtime's telemetry layer.
pub trait TelemetrySink: Send + Sync {
    /// Records a pool snapshot under `label`.
    fn record_pool(&self, label: &str, stats: &PoolStats);

    /// Records an arena snapshot under `label`.
    fn record_arena(&self, label: &str, stats: &ArenaStats);
}

/// Sink that emits every snapshot as a `tracing` event.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingSink;

impl TelemetrySink for TracingSink {
    fn record_pool(&self, label: &str, stats: &PoolStats) {
        tracing::info!(
            pool = label,
            capacity = stats.capacity,
            allocated = stats.allocated,
            high_water_mark = stats.high_water_mark,
            exhaustion_count = stats.exhaustion_count,
            double_free_count = stats.double_free_count,
            fallback_live = stats.fallback_live,
            grow_count = stats.grow_count,
            "pool stats"
        );
    }

    fn record_arena(&self, label: &str, stats: &ArenaStats) {
        tracing::info!(
            arena = label,
            capacity = stats.capacity,
            used = stats.used,
            high_water_mark = stats.high_water_mark,
            exhaustion_count = stats.exhaustion_count,
            resets = stats.resets,
            "arena stats"
        );
    }
}

/// Hot-path counters shared by every thread touching a pool.
#[derive(Debug, Default)]
pub(crate) struct PoolCounters {
    allocated: AtomicUsize,
    fallback_live: AtomicUsize,
    high_water_mark: AtomicUsize,
    exhaustion_count: AtomicU64,
    double_free_count: AtomicU64,
    fallback_allocations: AtomicU64,
    grow_count: AtomicU64,
}

impl PoolCounters {
    /// Records a slot leaving the free list.
    #[inline]
    pub(crate) fn on_acquire(&self) {
        let now = self.allocated.fetch_add(1, Ordering::Relaxed) + 1;
        self.bump_high_water(now + self.fallback_live.load(Ordering::Relaxed));
    }

    /// Records a slot returning to the free list.
    #[inline]
    pub(crate) fn on_release(&self) {
        self.allocated.fetch_sub(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn on_fallback_acquire(&self) {
        self.fallback_allocations.fetch_add(1, Ordering::Relaxed);
        let now = self.fallback_live.fetch_add(1, Ordering::Relaxed) + 1;
        self.bump_high_water(now + self.allocated.load(Ordering::Relaxed));
    }

    #[inline]
    pub(crate) fn on_fallback_release(&self) {
        self.fallback_live.fetch_sub(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn on_exhausted(&self) {
        self.exhaustion_count.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn on_double_free(&self) {
        self.double_free_count.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn on_grow(&self) {
        self.grow_count.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn allocated(&self) -> usize {
        self.allocated.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn fallback_live(&self) -> usize {
        self.fallback_live.load(Ordering::Relaxed)
    }

    pub(crate) fn snapshot(&self, slot_size: usize, capacity: usize) -> PoolStats {
        PoolStats {
            slot_size,
            capacity,
            allocated: self.allocated(),
            high_water_mark: self.high_water_mark.load(Ordering::Relaxed),
            exhaustion_count: self.exhaustion_count.load(Ordering::Relaxed),
            double_free_count: self.double_free_count.load(Ordering::Relaxed),
            fallback_live: self.fallback_live(),
            fallback_allocations: self.fallback_allocations.load(Ordering::Relaxed),
            grow_count: self.grow_count.load(Ordering::Relaxed),
        }
    }

    fn bump_high_water(&self, candidate: usize) {
        self.high_water_mark.fetch_max(candidate, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_high_water_mark_survives_release() {
        let counters = PoolCounters::default();
        counters.on_acquire();
        counters.on_acquire();
        counters.on_release();
        counters.on_release();

        let stats = counters.snapshot(64, 4);
        assert_eq!(stats.allocated, 0);
        assert_eq!(stats.high_water_mark, 2);
    }

    #[test]
    fn test_fallback_counts_toward_outstanding() {
        let counters = PoolCounters::default();
        counters.on_acquire();
        counters.on_fallback_acquire();

        let stats = counters.snapshot(64, 1);
        assert_eq!(stats.outstanding(), 2);
        assert_eq!(stats.high_water_mark, 2);
        assert_eq!(stats.fallback_allocations, 1);
    }

    #[test]
    fn test_tracing_sink_accepts_snapshots() {
        let sink = TracingSink;
        sink.record_pool("test", &PoolStats::default());
        sink.record_arena("test", &ArenaStats::default());
    }
}
