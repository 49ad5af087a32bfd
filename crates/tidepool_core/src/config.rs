//! # Allocator Configuration
//!
//! Programmatic configuration for pools, arenas and the registry.
//! Every struct also deserializes from TOML so a whole memory subsystem
//! can be described in one file loaded once at startup:
//!
//! ```toml
//! [registry]
//! max_class = 2048
//!
//! [pools.particles]
//! slot_size = 64
//! initial_capacity = 4096
//! growth_policy = "grow"
//! thread_safety = "lock_free"
//!
//! [arenas.frame]
//! capacity = 1048576
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::{PoolError, PoolResult};

/// Largest slot count a single pool can address.
///
/// `u32::MAX` is reserved as the free-list sentinel.
pub const MAX_SLOTS: usize = (u32::MAX - 1) as usize;

/// Largest supported slot size (1 MiB).
pub const MAX_SLOT_SIZE: usize = 1 << 20;

/// Behavior when a pool's free list is empty.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrowthPolicy {
    /// Fail with `PoolExhausted`.
    #[default]
    None,
    /// Append a new segment and retry once.
    Grow,
    /// Serve the request from the general heap, outside the pool's storage.
    FallbackHeap,
}

/// How the free list is protected against concurrent mutation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadSafety {
    /// Caller serializes access. Misuse is reported as corruption.
    None,
    /// Mutex around free-list mutation only.
    #[default]
    Locked,
    /// Compare-and-swap on a tagged head.
    LockFree,
}

/// Overflow behavior for typed object pools.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Surface `PoolExhausted` for backpressure handling.
    #[default]
    Reject,
    /// Availability over determinism.
    FallbackHeapAllocate,
    /// Amortized capacity increase.
    GrowPool,
}

impl OverflowPolicy {
    /// The block-pool growth policy implementing this overflow policy.
    #[inline]
    #[must_use]
    pub const fn growth_policy(self) -> GrowthPolicy {
        match self {
            Self::Reject => GrowthPolicy::None,
            Self::FallbackHeapAllocate => GrowthPolicy::FallbackHeap,
            Self::GrowPool => GrowthPolicy::Grow,
        }
    }
}

/// Configuration for a [`FixedBlockPool`](crate::memory::FixedBlockPool).
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PoolConfig {
    /// Bytes per slot.
    pub slot_size: usize,
    /// Slots allocated at creation.
    pub initial_capacity: usize,
    /// What happens when the free list runs dry.
    pub growth_policy: GrowthPolicy,
    /// Free-list synchronization mode.
    pub thread_safety: ThreadSafety,
    /// Slots appended per growth step. Zero means "same as initial capacity".
    pub growth_increment: usize,
    /// Ceiling for the total slot count under growth.
    pub max_capacity: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            slot_size: 64,
            initial_capacity: 1024,
            growth_policy: GrowthPolicy::None,
            thread_safety: ThreadSafety::Locked,
            growth_increment: 0,
            max_capacity: MAX_SLOTS,
        }
    }
}

impl PoolConfig {
    /// Creates a config with the given slot size and capacity, defaults elsewhere.
    #[must_use]
    pub fn new(slot_size: usize, initial_capacity: usize) -> Self {
        Self {
            slot_size,
            initial_capacity,
            ..Self::default()
        }
    }

    /// Sets the growth policy.
    #[must_use]
    pub const fn with_growth_policy(mut self, policy: GrowthPolicy) -> Self {
        self.growth_policy = policy;
        self
    }

    /// Sets the thread-safety mode.
    #[must_use]
    pub const fn with_thread_safety(mut self, mode: ThreadSafety) -> Self {
        self.thread_safety = mode;
        self
    }

    /// Sets the number of slots appended per growth step.
    #[must_use]
    pub const fn with_growth_increment(mut self, slots: usize) -> Self {
        self.growth_increment = slots;
        self
    }

    /// Sets the total slot ceiling.
    #[must_use]
    pub const fn with_max_capacity(mut self, slots: usize) -> Self {
        self.max_capacity = slots;
        self
    }

    /// Slots appended per growth step after defaulting.
    #[inline]
    #[must_use]
    pub const fn effective_growth_increment(&self) -> usize {
        if self.growth_increment == 0 {
            self.initial_capacity
        } else {
            self.growth_increment
        }
    }

    /// Checks every value against the pool's hard limits.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` naming the first offending option.
    pub fn validate(&self) -> PoolResult<()> {
        if self.slot_size == 0 || self.slot_size > MAX_SLOT_SIZE {
            return Err(PoolError::InvalidConfig(format!(
                "slot_size must be in 1..={MAX_SLOT_SIZE}, got {}",
                self.slot_size
            )));
        }
        if self.initial_capacity == 0 {
            return Err(PoolError::InvalidConfig(
                "initial_capacity must be greater than zero".to_string(),
            ));
        }
        if self.max_capacity > MAX_SLOTS {
            return Err(PoolError::InvalidConfig(format!(
                "max_capacity must not exceed {MAX_SLOTS}, got {}",
                self.max_capacity
            )));
        }
        if self.initial_capacity > self.max_capacity {
            return Err(PoolError::InvalidConfig(format!(
                "initial_capacity {} exceeds max_capacity {}",
                self.initial_capacity, self.max_capacity
            )));
        }
        Ok(())
    }
}

/// Configuration for a typed [`ObjectPool`](crate::memory::ObjectPool).
///
/// The slot size always comes from the pooled type.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ObjectPoolConfig {
    /// Objects allocated at creation.
    pub initial_capacity: usize,
    /// Overflow behavior.
    pub overflow: OverflowPolicy,
    /// Free-list synchronization mode.
    pub thread_safety: ThreadSafety,
    /// Objects appended per growth step under `GrowPool`. Zero means "same as initial".
    pub growth_increment: usize,
}

impl Default for ObjectPoolConfig {
    fn default() -> Self {
        Self {
            initial_capacity: 256,
            overflow: OverflowPolicy::Reject,
            thread_safety: ThreadSafety::Locked,
            growth_increment: 0,
        }
    }
}

impl ObjectPoolConfig {
    /// Creates a config with the given capacity and overflow policy.
    #[must_use]
    pub fn new(initial_capacity: usize, overflow: OverflowPolicy) -> Self {
        Self {
            initial_capacity,
            overflow,
            ..Self::default()
        }
    }

    /// Sets the thread-safety mode.
    #[must_use]
    pub const fn with_thread_safety(mut self, mode: ThreadSafety) -> Self {
        self.thread_safety = mode;
        self
    }

    /// The block-pool config for objects of `slot_size` bytes.
    #[must_use]
    pub fn pool_config(&self, slot_size: usize) -> PoolConfig {
        PoolConfig::new(slot_size, self.initial_capacity)
            .with_growth_policy(self.overflow.growth_policy())
            .with_thread_safety(self.thread_safety)
            .with_growth_increment(self.growth_increment)
    }
}

/// Configuration for an [`Arena`](crate::memory::Arena).
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ArenaConfig {
    /// Buffer size in bytes.
    pub capacity: usize,
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            // 64 KiB of scratch per scope
            capacity: 64 * 1024,
        }
    }
}

/// Configuration for the [`PoolRegistry`](crate::memory::PoolRegistry).
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RegistryConfig {
    /// Smallest size class in bytes (power of two).
    pub min_class: usize,
    /// Largest size class in bytes (power of two).
    pub max_class: usize,
    /// Slots per lazily created pool.
    pub initial_capacity: usize,
    /// Growth policy for lazily created pools.
    pub growth_policy: GrowthPolicy,
    /// Thread-safety mode for lazily created pools.
    pub thread_safety: ThreadSafety,
    /// Upper bound on type-tagged pools.
    pub max_type_pools: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            min_class: 16,
            max_class: 4096,
            initial_capacity: 64,
            growth_policy: GrowthPolicy::Grow,
            thread_safety: ThreadSafety::Locked,
            max_type_pools: 32,
        }
    }
}

impl RegistryConfig {
    /// Checks the size-class ladder and pool defaults.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` naming the first offending option.
    pub fn validate(&self) -> PoolResult<()> {
        if !self.min_class.is_power_of_two() || !self.max_class.is_power_of_two() {
            return Err(PoolError::InvalidConfig(format!(
                "size classes must be powers of two, got {}..{}",
                self.min_class, self.max_class
            )));
        }
        if self.min_class > self.max_class || self.max_class > MAX_SLOT_SIZE {
            return Err(PoolError::InvalidConfig(format!(
                "invalid size class range {}..{}",
                self.min_class, self.max_class
            )));
        }
        if self.initial_capacity == 0 {
            return Err(PoolError::InvalidConfig(
                "registry initial_capacity must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Pool config for one size class.
    #[must_use]
    pub fn pool_config(&self, slot_size: usize) -> PoolConfig {
        PoolConfig::new(slot_size, self.initial_capacity)
            .with_growth_policy(self.growth_policy)
            .with_thread_safety(self.thread_safety)
    }
}

/// A whole memory subsystem: named pools, arena templates and the registry.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SubsystemConfig {
    /// Named fixed-block pools, created eagerly.
    pub pools: BTreeMap<String, PoolConfig>,
    /// Named arena templates, instantiated per scope.
    pub arenas: BTreeMap<String, ArenaConfig>,
    /// Size-class registry settings.
    pub registry: RegistryConfig,
}

impl SubsystemConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` on a parse error or an invalid value.
    pub fn from_toml_str(source: &str) -> PoolResult<Self> {
        let config: Self = toml::from_str(source)
            .map_err(|e| PoolError::InvalidConfig(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads and validates a TOML file.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the file cannot be read or is invalid.
    pub fn load(path: impl AsRef<Path>) -> PoolResult<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| {
            PoolError::InvalidConfig(format!("Failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&source)
    }

    /// Validates every pool, arena and the registry.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` prefixed with the offending entry's name.
    pub fn validate(&self) -> PoolResult<()> {
        for (name, pool) in &self.pools {
            pool.validate()
                .map_err(|e| PoolError::InvalidConfig(format!("pool '{name}': {e}")))?;
        }
        for (name, arena) in &self.arenas {
            if arena.capacity == 0 {
                return Err(PoolError::InvalidConfig(format!(
                    "arena '{name}': capacity must be greater than zero"
                )));
            }
        }
        self.registry.validate()
    }
}
