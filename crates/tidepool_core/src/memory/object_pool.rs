//! # Object Pool
//!
//! Typed layer over a [`FixedBlockPool`]. Each slot holds one `T`; the
//! type's [`Poolable`] hooks run when an object enters and leaves use.
//!
//! ```text
//!   acquire: pop slot -> reset(prior contents) -> hand out
//!   release: cleanup(current contents) -> push slot
//! ```

use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::ops::Deref;

use bytemuck::Pod;

use super::handle::SlotHandle;
use super::pool::FixedBlockPool;
use crate::config::ObjectPoolConfig;
use crate::error::PoolResult;
use crate::telemetry::PoolStats;

/// A type that can live in an [`ObjectPool`].
///
/// `Pod` means any bit pattern is a valid `T`, so `reset` always starts
/// from a well-formed value: zeroes for a fresh slot, the previous
/// occupant's contents for a recycled one.
pub trait Poolable: Pod + Send + Sync {
    /// Brings a recycled (or zeroed) value into its initial state.
    fn reset(&mut self);

    /// Runs just before the object returns to the pool.
    fn cleanup(&mut self) {}
}

/// Typed handle to a pooled object.
pub struct ObjectHandle<T> {
    slot: SlotHandle,
    _marker: PhantomData<fn() -> T>,
}

impl<T> ObjectHandle<T> {
    const fn new(slot: SlotHandle) -> Self {
        Self {
            slot,
            _marker: PhantomData,
        }
    }

    /// The underlying slot handle.
    #[inline]
    #[must_use]
    pub const fn slot(self) -> SlotHandle {
        self.slot
    }
}

impl<T> Clone for ObjectHandle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ObjectHandle<T> {}

impl<T> PartialEq for ObjectHandle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.slot == other.slot
    }
}

impl<T> Eq for ObjectHandle<T> {}

impl<T> Hash for ObjectHandle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.slot.hash(state);
    }
}

impl<T> fmt::Debug for ObjectHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ObjectHandle")
            .field(&std::any::type_name::<T>())
            .field(&self.slot)
            .finish()
    }
}

/// A pool of `T` values backed by fixed-size slots.
///
/// # Example
///
/// ```rust
/// use bytemuck::{Pod, Zeroable};
/// use tidepool_core::{ObjectPool, ObjectPoolConfig, OverflowPolicy, Poolable};
///
/// #[repr(C)]
/// #[derive(Clone, Copy, Pod, Zeroable)]
/// struct Particle {
///     position: [f32; 3],
///     ttl: u32,
/// }
///
/// impl Poolable for Particle {
///     fn reset(&mut self) {
///         *self = Particle { position: [0.0; 3], ttl: 60 };
///     }
/// }
///
/// let pool = ObjectPool::<Particle>::new(ObjectPoolConfig::new(128, OverflowPolicy::Reject))?;
/// let handle = pool.acquire()?;
/// assert_eq!(pool.get(handle)?.ttl, 60);
/// pool.update(handle, |p| p.ttl -= 1)?;
/// pool.release(handle)?;
/// # Ok::<(), tidepool_core::PoolError>(())
/// ```
pub struct ObjectPool<T: Poolable> {
    pool: FixedBlockPool,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Poolable> ObjectPool<T> {
    /// Creates a pool with one slot of `size_of::<T>()` bytes per object.
    ///
    /// # Errors
    ///
    /// Same as [`FixedBlockPool::new`].
    pub fn new(config: ObjectPoolConfig) -> PoolResult<Self> {
        let slot_size = std::mem::size_of::<T>().max(1);
        let pool = FixedBlockPool::new(config.pool_config(slot_size))?;
        tracing::debug!(
            pool = %pool.id(),
            object = std::any::type_name::<T>(),
            overflow = ?config.overflow,
            "object pool created"
        );
        Ok(Self {
            pool,
            _marker: PhantomData,
        })
    }

    /// Takes a slot and returns it holding a freshly reset `T`.
    ///
    /// # Errors
    ///
    /// Same as [`FixedBlockPool::acquire`].
    pub fn acquire(&self) -> PoolResult<ObjectHandle<T>> {
        let slot = self.pool.acquire()?;
        let prepared = self.load(slot).and_then(|mut value| {
            value.reset();
            self.store(slot, &value)
        });
        if let Err(err) = prepared {
            if let Err(release_err) = self.pool.release(slot) {
                tracing::warn!(error = %release_err, "releasing unprepared object failed");
            }
            return Err(err);
        }
        Ok(ObjectHandle::new(slot))
    }

    /// Acquires an object wrapped in a guard that releases it on drop.
    ///
    /// # Errors
    ///
    /// Same as [`ObjectPool::acquire`].
    pub fn acquire_scoped(&self) -> PoolResult<Pooled<'_, T>> {
        let handle = self.acquire()?;
        Ok(Pooled { pool: self, handle })
    }

    /// Runs the cleanup hook and returns the slot.
    ///
    /// # Errors
    ///
    /// - `DoubleFree` if the object was already released
    /// - `ForeignHandle` if the handle came from another pool
    pub fn release(&self, handle: ObjectHandle<T>) -> PoolResult<()> {
        if self.pool.is_live(handle.slot) {
            let mut value = self.load(handle.slot)?;
            value.cleanup();
            self.store(handle.slot, &value)?;
        }
        // A dead handle still goes to the block pool, which classifies it
        self.pool.release(handle.slot)
    }

    /// Copies the object out.
    ///
    /// # Errors
    ///
    /// `StaleHandle` once the object has been released.
    pub fn get(&self, handle: ObjectHandle<T>) -> PoolResult<T> {
        self.load(handle.slot)
    }

    /// Overwrites the object.
    ///
    /// # Errors
    ///
    /// `StaleHandle` once the object has been released.
    pub fn set(&self, handle: ObjectHandle<T>, value: T) -> PoolResult<()> {
        self.store(handle.slot, &value)
    }

    /// Modifies the object in place and returns the closure's result.
    ///
    /// # Errors
    ///
    /// `StaleHandle` once the object has been released.
    pub fn update<R>(&self, handle: ObjectHandle<T>, f: impl FnOnce(&mut T) -> R) -> PoolResult<R> {
        let mut value = self.load(handle.slot)?;
        let result = f(&mut value);
        self.store(handle.slot, &value)?;
        Ok(result)
    }

    /// Returns true if `handle` still refers to a live object.
    #[inline]
    #[must_use]
    pub fn is_live(&self, handle: ObjectHandle<T>) -> bool {
        self.pool.is_live(handle.slot)
    }

    /// The underlying block pool.
    #[inline]
    #[must_use]
    pub const fn pool(&self) -> &FixedBlockPool {
        &self.pool
    }

    /// Snapshot of the underlying pool's counters.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Shuts the underlying pool down.
    ///
    /// # Errors
    ///
    /// Same as [`FixedBlockPool::shutdown`].
    pub fn shutdown(&mut self) -> PoolResult<PoolStats> {
        self.pool.shutdown()
    }

    fn load(&self, slot: SlotHandle) -> PoolResult<T> {
        let mut value = T::zeroed();
        self.pool.read(slot, 0, bytemuck::bytes_of_mut(&mut value))?;
        Ok(value)
    }

    fn store(&self, slot: SlotHandle, value: &T) -> PoolResult<()> {
        self.pool.write(slot, 0, bytemuck::bytes_of(value))
    }
}

impl<T: Poolable> fmt::Debug for ObjectPool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectPool")
            .field("object", &std::any::type_name::<T>())
            .field("pool", &self.pool)
            .finish()
    }
}

/// An object that returns itself to its pool when dropped.
pub struct Pooled<'a, T: Poolable> {
    pool: &'a ObjectPool<T>,
    handle: ObjectHandle<T>,
}

impl<T: Poolable> Pooled<'_, T> {
    /// The object's handle.
    #[inline]
    #[must_use]
    pub const fn handle(&self) -> ObjectHandle<T> {
        self.handle
    }

    /// Copies the object out.
    ///
    /// # Errors
    ///
    /// Same as [`ObjectPool::get`].
    pub fn get(&self) -> PoolResult<T> {
        self.pool.get(self.handle)
    }

    /// Modifies the object in place.
    ///
    /// # Errors
    ///
    /// Same as [`ObjectPool::update`].
    pub fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> PoolResult<R> {
        self.pool.update(self.handle, f)
    }

    /// Detaches the object from the guard. The caller now owns the release.
    #[must_use]
    pub fn into_handle(self) -> ObjectHandle<T> {
        let handle = self.handle;
        std::mem::forget(self);
        handle
    }
}

impl<T: Poolable> Deref for Pooled<'_, T> {
    type Target = ObjectHandle<T>;

    fn deref(&self) -> &Self::Target {
        &self.handle
    }
}

impl<T: Poolable> Drop for Pooled<'_, T> {
    fn drop(&mut self) {
        if let Err(err) = self.pool.release(self.handle) {
            tracing::warn!(error = %err, "scoped object release failed");
        }
    }
}

impl<T: Poolable> fmt::Debug for Pooled<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Pooled").field(&self.handle).finish()
    }
}
