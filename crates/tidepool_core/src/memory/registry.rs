//! # Pool Registry
//!
//! Maps a requested size or a type tag to a shared [`FixedBlockPool`],
//! creating pools lazily on first use.
//!
//! ## Size Classes
//!
//! Sizes round up to the next power of two within `[min_class, max_class]`:
//!
//! ```text
//!   request:   1..=16   17..=32   33..=64   ...   2049..=4096
//!   class:       16        32        64     ...      4096
//! ```
//!
//! Type-tagged pools are bounded separately by `max_type_pools`.

use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use super::pool::FixedBlockPool;
use crate::config::RegistryConfig;
use crate::error::{PoolError, PoolResult};
use crate::telemetry::{PoolStats, TelemetrySink};

/// Identifies a dedicated per-type pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TypeTag {
    id: TypeId,
    size: usize,
    name: &'static str,
}

impl TypeTag {
    /// The tag for `T`.
    #[must_use]
    pub fn of<T: 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            size: std::mem::size_of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    /// Size of the tagged type in bytes.
    #[inline]
    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }

    /// Name of the tagged type.
    #[inline]
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }
}

/// What a caller asks the registry for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PoolKey {
    /// Any pool whose slots hold at least this many bytes.
    Size(usize),
    /// The dedicated pool for one type.
    Type(TypeTag),
}

/// Lazily populated set of shared pools.
pub struct PoolRegistry {
    config: RegistryConfig,
    /// One entry per size class, smallest first.
    classes: RwLock<Vec<Option<Arc<FixedBlockPool>>>>,
    typed: RwLock<HashMap<TypeTag, Arc<FixedBlockPool>>>,
}

impl PoolRegistry {
    /// Creates an empty registry.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if the size-class ladder is invalid.
    pub fn new(config: RegistryConfig) -> PoolResult<Self> {
        config.validate()?;
        let classes = (config.max_class.trailing_zeros() - config.min_class.trailing_zeros()) as usize + 1;
        Ok(Self {
            classes: RwLock::new(vec![None; classes]),
            typed: RwLock::new(HashMap::new()),
            config,
        })
    }

    /// The registry's configuration.
    #[inline]
    #[must_use]
    pub const fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Rounds `bytes` up to its size class.
    ///
    /// # Errors
    ///
    /// `SizeClassTooLarge` if `bytes` exceeds the largest class.
    pub fn size_class_for(&self, bytes: usize) -> PoolResult<usize> {
        let too_large = PoolError::SizeClassTooLarge {
            requested: bytes,
            max: self.config.max_class,
        };
        if bytes > self.config.max_class {
            return Err(too_large);
        }
        Ok(bytes.max(self.config.min_class).next_power_of_two())
    }

    /// Returns the pool for `key`, creating it on first use.
    ///
    /// # Errors
    ///
    /// - `SizeClassTooLarge` if a size key exceeds the largest class
    /// - `RegistryFull` if a new type pool would pass `max_type_pools`
    /// - `AllocationFailed` if a new pool's storage cannot be reserved
    pub fn pool_for(&self, key: PoolKey) -> PoolResult<Arc<FixedBlockPool>> {
        match key {
            PoolKey::Size(bytes) => self.class_pool(self.size_class_for(bytes)?),
            PoolKey::Type(tag) => self.type_pool(tag),
        }
    }

    /// Number of pools created so far.
    #[must_use]
    pub fn pool_count(&self) -> usize {
        let classes = self.classes.read().iter().flatten().count();
        classes + self.typed.read().len()
    }

    /// Labeled snapshots of every pool.
    #[must_use]
    pub fn stats(&self) -> Vec<(String, PoolStats)> {
        self.pools()
            .into_iter()
            .map(|(label, pool)| (label, pool.stats()))
            .collect()
    }

    /// Slots held by callers across every pool.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.pools().iter().map(|(_, pool)| pool.outstanding()).sum()
    }

    /// Pushes a snapshot of every pool to `sink`.
    pub fn report(&self, sink: &dyn TelemetrySink) {
        for (label, pool) in self.pools() {
            pool.report(sink, &label);
        }
    }

    /// Every created pool with its label, size classes first.
    pub(crate) fn pools(&self) -> Vec<(String, Arc<FixedBlockPool>)> {
        let classes = self.classes.read();
        let typed = self.typed.read();
        classes
            .iter()
            .flatten()
            .map(|pool| (format!("size:{}", pool.slot_size()), Arc::clone(pool)))
            .chain(
                typed
                    .iter()
                    .map(|(tag, pool)| (format!("type:{}", tag.name), Arc::clone(pool))),
            )
            .collect()
    }

    fn class_pool(&self, class: usize) -> PoolResult<Arc<FixedBlockPool>> {
        let index = (class.trailing_zeros() - self.config.min_class.trailing_zeros()) as usize;

        // Fast path: pool already exists
        if let Some(pool) = self.classes.read().get(index).and_then(Clone::clone) {
            return Ok(pool);
        }

        let mut classes = self.classes.write();
        let entry = classes.get_mut(index).ok_or(PoolError::SizeClassTooLarge {
            requested: class,
            max: self.config.max_class,
        })?;
        // Another thread may have created it between the two locks
        if let Some(pool) = entry {
            return Ok(Arc::clone(pool));
        }
        let pool = Arc::new(FixedBlockPool::new(self.config.pool_config(class))?);
        tracing::debug!(pool = %pool.id(), class, "registry created size-class pool");
        *entry = Some(Arc::clone(&pool));
        Ok(pool)
    }

    fn type_pool(&self, tag: TypeTag) -> PoolResult<Arc<FixedBlockPool>> {
        if let Some(pool) = self.typed.read().get(&tag) {
            return Ok(Arc::clone(pool));
        }

        let mut typed = self.typed.write();
        if let Some(pool) = typed.get(&tag) {
            return Ok(Arc::clone(pool));
        }
        if typed.len() >= self.config.max_type_pools {
            tracing::warn!(ty = tag.name, limit = self.config.max_type_pools, "type pool limit reached");
            return Err(PoolError::RegistryFull {
                limit: self.config.max_type_pools,
            });
        }
        let pool = Arc::new(FixedBlockPool::new(self.config.pool_config(tag.size.max(1)))?);
        tracing::debug!(pool = %pool.id(), ty = tag.name, size = tag.size, "registry created type pool");
        typed.insert(tag, Arc::clone(&pool));
        Ok(pool)
    }
}

impl fmt::Debug for PoolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolRegistry")
            .field("config", &self.config)
            .field("pools", &self.pool_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn registry() -> PoolRegistry {
        PoolRegistry::new(RegistryConfig::default()).unwrap()
    }

    #[test]
    fn test_size_class_ladder() {
        let registry = registry();
        assert_eq!(registry.size_class_for(0).unwrap(), 16);
        assert_eq!(registry.size_class_for(16).unwrap(), 16);
        assert_eq!(registry.size_class_for(17).unwrap(), 32);
        assert_eq!(registry.size_class_for(4096).unwrap(), 4096);
        assert_eq!(
            registry.size_class_for(4097),
            Err(PoolError::SizeClassTooLarge {
                requested: 4097,
                max: 4096
            })
        );
    }

    #[test]
    fn test_same_class_shares_pool() {
        let registry = registry();
        let a = registry.pool_for(PoolKey::Size(40)).unwrap();
        let b = registry.pool_for(PoolKey::Size(64)).unwrap();
        let c = registry.pool_for(PoolKey::Size(65)).unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(a.slot_size(), 64);
        assert_eq!(c.slot_size(), 128);
        assert_eq!(registry.pool_count(), 2);
    }

    #[test]
    fn test_type_pools_are_bounded() {
        let registry = PoolRegistry::new(RegistryConfig {
            max_type_pools: 1,
            ..RegistryConfig::default()
        })
        .unwrap();

        let pool = registry.pool_for(PoolKey::Type(TypeTag::of::<[u64; 3]>())).unwrap();
        assert_eq!(pool.slot_size(), 24);
        assert!(registry.pool_for(PoolKey::Type(TypeTag::of::<[u64; 3]>())).is_ok());
        assert_eq!(
            registry.pool_for(PoolKey::Type(TypeTag::of::<u8>())).unwrap_err(),
            PoolError::RegistryFull { limit: 1 }
        );
    }

    #[test]
    fn test_concurrent_lookup_creates_one_pool() {
        let registry = Arc::new(registry());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || registry.pool_for(PoolKey::Size(100)).unwrap().id())
            })
            .collect();
        let ids: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert!(ids.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(registry.pool_count(), 1);
    }

    #[test]
    fn test_stats_and_outstanding() {
        let registry = registry();
        let pool = registry.pool_for(PoolKey::Size(8)).unwrap();
        let handle = pool.acquire().unwrap();

        assert_eq!(registry.outstanding(), 1);
        let stats = registry.stats();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].0, "size:16");
        assert_eq!(stats[0].1.allocated, 1);
        pool.release(handle).unwrap();
    }
}
