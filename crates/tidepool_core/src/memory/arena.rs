//! # Arena Allocator
//!
//! A bump allocator for scratch data that is freed all at once.
//!
//! Allocation bumps a cursor; [`Arena::reset`] moves it back to zero and
//! advances the arena's epoch. Every [`ArenaPointer`] carries the epoch it was
//! issued in, so a pointer that outlives a reset is rejected with
//! `StaleHandle` instead of silently aliasing newer data.

use std::fmt;
use std::ops::{Deref, DerefMut, Range};
use std::sync::atomic::{AtomicU32, Ordering};

use bytemuck::{Pod, PodCastError, Zeroable};

use crate::config::ArenaConfig;
use crate::error::{PoolError, PoolResult};
use crate::telemetry::{ArenaStats, TelemetrySink};

/// Largest alignment an arena can honor. The buffer itself is aligned to this.
pub const MAX_ALIGN: usize = 64;

static NEXT_ARENA_ID: AtomicU32 = AtomicU32::new(1);

/// Identity of one arena instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct ArenaId(u32);

impl ArenaId {
    fn next() -> Self {
        Self(NEXT_ARENA_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw identity value.
    #[inline]
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ArenaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "arena#{}", self.0)
    }
}

/// One cache line of arena storage.
#[repr(C, align(64))]
#[derive(Clone, Copy, Pod, Zeroable)]
struct Block([u8; MAX_ALIGN]);

/// Location of one arena allocation.
///
/// Valid until the arena that issued it is reset.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ArenaPointer {
    arena: ArenaId,
    epoch: u32,
    offset: usize,
    len: usize,
}

impl ArenaPointer {
    /// The arena that issued this pointer.
    #[inline]
    #[must_use]
    pub const fn arena(self) -> ArenaId {
        self.arena
    }

    /// Arena epoch at allocation time.
    #[inline]
    #[must_use]
    pub const fn epoch(self) -> u32 {
        self.epoch
    }

    /// Byte offset from the start of the arena buffer.
    #[inline]
    #[must_use]
    pub const fn offset(self) -> usize {
        self.offset
    }

    /// Allocation size in bytes.
    #[inline]
    #[must_use]
    pub const fn len(self) -> usize {
        self.len
    }

    /// Returns true for a zero-byte allocation.
    #[inline]
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.len == 0
    }
}

/// A bump-pointer arena over one contiguous, 64-byte-aligned buffer.
///
/// # Thread Safety
///
/// Mutation takes `&mut self`. Use one arena per thread, or wrap it in a lock.
///
/// # Example
///
/// ```rust
/// use tidepool_core::{Arena, PoolError};
///
/// let mut arena = Arena::new(1024)?;
/// let ids = arena.alloc_slice::<u32>(16)?;
/// arena.slice_mut::<u32>(ids)?[0] = 7;
///
/// arena.reset();
/// assert_eq!(arena.slice::<u32>(ids), Err(PoolError::StaleHandle));
/// # Ok::<(), PoolError>(())
/// ```
pub struct Arena {
    id: ArenaId,
    blocks: Vec<Block>,
    capacity: usize,
    /// Next free byte. Never exceeds `capacity`.
    cursor: usize,
    epoch: u32,
    high_water_mark: usize,
    allocations: usize,
    exhaustion_count: u64,
    resets: u64,
}

impl Arena {
    /// Creates an arena of `capacity` bytes.
    ///
    /// # Errors
    ///
    /// - `InvalidConfig` if `capacity` is zero
    /// - `AllocationFailed` if the buffer cannot be reserved
    pub fn new(capacity: usize) -> PoolResult<Self> {
        if capacity == 0 {
            return Err(PoolError::InvalidConfig(
                "arena capacity must be greater than zero".to_string(),
            ));
        }
        let mut arena = Self {
            id: ArenaId::next(),
            blocks: Vec::new(),
            capacity: 0,
            cursor: 0,
            epoch: 0,
            high_water_mark: 0,
            allocations: 0,
            exhaustion_count: 0,
            resets: 0,
        };
        arena.resize(capacity)?;
        tracing::debug!(arena = %arena.id, capacity, "arena created");
        Ok(arena)
    }

    /// Creates an arena from its configuration.
    ///
    /// # Errors
    ///
    /// Same as [`Arena::new`].
    pub fn from_config(config: &ArenaConfig) -> PoolResult<Self> {
        Self::new(config.capacity)
    }

    /// This arena's identity.
    #[inline]
    #[must_use]
    pub const fn id(&self) -> ArenaId {
        self.id
    }

    /// Total capacity in bytes.
    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes allocated since the last reset, alignment padding included.
    #[inline]
    #[must_use]
    pub const fn used(&self) -> usize {
        self.cursor
    }

    /// Bytes left before the arena is exhausted.
    #[inline]
    #[must_use]
    pub const fn remaining(&self) -> usize {
        self.capacity - self.cursor
    }

    /// Most bytes ever in use within a single epoch.
    #[inline]
    #[must_use]
    pub const fn high_water_mark(&self) -> usize {
        self.high_water_mark
    }

    /// Number of resets so far. Pointers from older epochs are stale.
    #[inline]
    #[must_use]
    pub const fn epoch(&self) -> u32 {
        self.epoch
    }

    /// Address of the first byte of the buffer.
    #[must_use]
    pub fn base_addr(&self) -> usize {
        self.blocks.as_ptr() as usize
    }

    /// Bump-allocates `size` bytes aligned to `align`.
    ///
    /// This is an **O(1)** operation. On failure nothing is allocated.
    ///
    /// # Errors
    ///
    /// - `InvalidAlignment` if `align` is not a power of two up to [`MAX_ALIGN`]
    /// - `ArenaExhausted` if the aligned request does not fit
    pub fn allocate(&mut self, size: usize, align: usize) -> PoolResult<ArenaPointer> {
        if !align.is_power_of_two() || align > MAX_ALIGN {
            return Err(PoolError::InvalidAlignment { align });
        }

        let remaining = self.remaining();
        let exhausted = |requested| PoolError::ArenaExhausted {
            requested,
            remaining,
        };
        let start = self
            .cursor
            .checked_next_multiple_of(align)
            .ok_or_else(|| exhausted(size))?;
        let end = start.checked_add(size).ok_or_else(|| exhausted(size))?;
        if end > self.capacity {
            self.exhaustion_count += 1;
            return Err(exhausted(end - self.cursor));
        }

        self.cursor = end;
        self.allocations += 1;
        self.high_water_mark = self.high_water_mark.max(end);
        Ok(ArenaPointer {
            arena: self.id,
            epoch: self.epoch,
            offset: start,
            len: size,
        })
    }

    /// Grows the buffer by `additional` bytes.
    ///
    /// Only allowed between scopes, while nothing is allocated.
    ///
    /// # Errors
    ///
    /// - `ArenaInUse` if allocations exist in the current epoch
    /// - `AllocationFailed` if the larger buffer cannot be reserved
    pub fn reserve(&mut self, additional: usize) -> PoolResult<()> {
        if self.cursor != 0 {
            return Err(PoolError::ArenaInUse { used: self.cursor });
        }
        let capacity = self
            .capacity
            .checked_add(additional)
            .ok_or(PoolError::AllocationFailed { bytes: usize::MAX })?;
        self.resize(capacity)?;
        tracing::debug!(arena = %self.id, capacity, "arena reserved");
        Ok(())
    }

    /// Frees every allocation at once.
    ///
    /// Pointers issued before the reset become stale. Memory is not
    /// cleared or returned to the heap.
    pub fn reset(&mut self) {
        tracing::trace!(
            arena = %self.id,
            used = self.cursor,
            allocations = self.allocations,
            high_water_mark = self.high_water_mark,
            "arena reset"
        );
        self.cursor = 0;
        self.allocations = 0;
        self.epoch = self.epoch.wrapping_add(1);
        self.resets += 1;
    }

    /// Opens a scope that resets the arena when it ends.
    pub fn scope(&mut self) -> ArenaScope<'_> {
        ArenaScope { arena: self }
    }

    /// The bytes of a live allocation.
    ///
    /// # Errors
    ///
    /// `ForeignHandle` or `StaleHandle` if `ptr` is not a live allocation of this arena.
    pub fn bytes(&self, ptr: ArenaPointer) -> PoolResult<&[u8]> {
        let range = self.range(ptr)?;
        Ok(&bytemuck::cast_slice::<Block, u8>(self.blocks.as_slice())[range])
    }

    /// The bytes of a live allocation, mutably.
    ///
    /// # Errors
    ///
    /// Same as [`Arena::bytes`].
    pub fn bytes_mut(&mut self, ptr: ArenaPointer) -> PoolResult<&mut [u8]> {
        let range = self.range(ptr)?;
        Ok(&mut bytemuck::cast_slice_mut::<Block, u8>(self.blocks.as_mut_slice())[range])
    }

    /// Allocates room for one `T` and moves `value` into it.
    ///
    /// # Errors
    ///
    /// Same as [`Arena::allocate`].
    pub fn alloc_value<T: Pod>(&mut self, value: T) -> PoolResult<ArenaPointer> {
        let ptr = self.allocate(std::mem::size_of::<T>(), std::mem::align_of::<T>())?;
        self.bytes_mut(ptr)?
            .copy_from_slice(bytemuck::bytes_of(&value));
        Ok(ptr)
    }

    /// Typed view of a value allocated with [`Arena::alloc_value`].
    ///
    /// # Errors
    ///
    /// Same as [`Arena::bytes`], plus `OutOfBounds` if `T` does not match the allocation size.
    pub fn value<T: Pod>(&self, ptr: ArenaPointer) -> PoolResult<&T> {
        bytemuck::try_from_bytes(self.bytes(ptr)?).map_err(|e| cast_error::<T>(e, ptr))
    }

    /// Mutable typed view of a value allocated with [`Arena::alloc_value`].
    ///
    /// # Errors
    ///
    /// Same as [`Arena::value`].
    pub fn value_mut<T: Pod>(&mut self, ptr: ArenaPointer) -> PoolResult<&mut T> {
        bytemuck::try_from_bytes_mut(self.bytes_mut(ptr)?).map_err(|e| cast_error::<T>(e, ptr))
    }

    /// Allocates `count` zeroed `T`s.
    ///
    /// # Errors
    ///
    /// Same as [`Arena::allocate`].
    pub fn alloc_slice<T: Pod>(&mut self, count: usize) -> PoolResult<ArenaPointer> {
        let size = std::mem::size_of::<T>()
            .checked_mul(count)
            .ok_or(PoolError::ArenaExhausted {
                requested: usize::MAX,
                remaining: self.remaining(),
            })?;
        let ptr = self.allocate(size, std::mem::align_of::<T>())?;
        // Previous epochs left their bytes behind
        self.bytes_mut(ptr)?.fill(0);
        Ok(ptr)
    }

    /// Typed view of a slice allocated with [`Arena::alloc_slice`].
    ///
    /// # Errors
    ///
    /// Same as [`Arena::value`].
    pub fn slice<T: Pod>(&self, ptr: ArenaPointer) -> PoolResult<&[T]> {
        bytemuck::try_cast_slice(self.bytes(ptr)?).map_err(|e| cast_error::<T>(e, ptr))
    }

    /// Mutable typed view of a slice allocated with [`Arena::alloc_slice`].
    ///
    /// # Errors
    ///
    /// Same as [`Arena::value`].
    pub fn slice_mut<T: Pod>(&mut self, ptr: ArenaPointer) -> PoolResult<&mut [T]> {
        bytemuck::try_cast_slice_mut(self.bytes_mut(ptr)?).map_err(|e| cast_error::<T>(e, ptr))
    }

    /// Absolute address of a live allocation.
    ///
    /// # Errors
    ///
    /// Same as [`Arena::bytes`].
    pub fn address_of(&self, ptr: ArenaPointer) -> PoolResult<usize> {
        self.range(ptr).map(|range| self.base_addr() + range.start)
    }

    /// Returns true if `ptr` is a live allocation of this arena.
    #[must_use]
    pub fn is_live(&self, ptr: ArenaPointer) -> bool {
        self.range(ptr).is_ok()
    }

    /// Snapshot of this arena's counters.
    #[must_use]
    pub const fn stats(&self) -> ArenaStats {
        ArenaStats {
            capacity: self.capacity,
            used: self.cursor,
            high_water_mark: self.high_water_mark,
            allocations: self.allocations,
            exhaustion_count: self.exhaustion_count,
            resets: self.resets,
        }
    }

    /// Pushes a counter snapshot to `sink` under `label`.
    pub fn report(&self, sink: &dyn TelemetrySink, label: &str) {
        sink.record_arena(label, &self.stats());
    }

    fn range(&self, ptr: ArenaPointer) -> PoolResult<Range<usize>> {
        if ptr.arena != self.id {
            return Err(PoolError::ForeignHandle);
        }
        if ptr.epoch != self.epoch {
            return Err(PoolError::StaleHandle);
        }
        match ptr.offset.checked_add(ptr.len) {
            Some(end) if end <= self.cursor => Ok(ptr.offset..end),
            _ => Err(PoolError::ForeignHandle),
        }
    }

    fn resize(&mut self, capacity: usize) -> PoolResult<()> {
        let blocks = capacity.div_ceil(MAX_ALIGN);
        let additional = blocks.saturating_sub(self.blocks.len());
        self.blocks
            .try_reserve_exact(additional)
            .map_err(|_| PoolError::AllocationFailed {
                bytes: blocks.saturating_mul(MAX_ALIGN),
            })?;
        self.blocks.resize(blocks, Block::zeroed());
        self.capacity = capacity;
        Ok(())
    }
}

fn cast_error<T>(err: PodCastError, ptr: ArenaPointer) -> PoolError {
    match err {
        PodCastError::SizeMismatch | PodCastError::OutputSliceWouldHaveSlop => {
            PoolError::OutOfBounds {
                offset: ptr.offset,
                len: std::mem::size_of::<T>(),
                slot_size: ptr.len,
            }
        }
        _ => PoolError::InvalidAlignment {
            align: std::mem::align_of::<T>(),
        },
    }
}

impl fmt::Debug for Arena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Arena")
            .field("id", &self.id)
            .field("capacity", &self.capacity)
            .field("used", &self.cursor)
            .field("epoch", &self.epoch)
            .finish_non_exhaustive()
    }
}

/// Scope guard that resets its arena on drop.
///
/// ```rust
/// use tidepool_core::Arena;
///
/// let mut arena = Arena::new(256)?;
/// {
///     let mut frame = arena.scope();
///     frame.allocate(128, 16)?;
/// }
/// assert_eq!(arena.used(), 0);
/// # Ok::<(), tidepool_core::PoolError>(())
/// ```
pub struct ArenaScope<'a> {
    arena: &'a mut Arena,
}

impl Deref for ArenaScope<'_> {
    type Target = Arena;

    fn deref(&self) -> &Arena {
        self.arena
    }
}

impl DerefMut for ArenaScope<'_> {
    fn deref_mut(&mut self) -> &mut Arena {
        self.arena
    }
}

impl Drop for ArenaScope<'_> {
    fn drop(&mut self) {
        self.arena.reset();
    }
}

impl fmt::Debug for ArenaScope<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ArenaScope").field(&self.arena).finish()
    }
}
