//! # Memory Subsystem
//!
//! Owns every long-lived allocator described by one [`SubsystemConfig`]:
//! named pools are built eagerly, the registry fills in lazily, and arenas
//! are stamped out per scope from named templates.
//!
//! ```text
//!   startup:   SubsystemConfig::load -> MemorySubsystem::new
//!   runtime:   pool("particles"), registry().pool_for(..), create_arena("frame")
//!   shutdown:  MemorySubsystem::shutdown -> ShutdownReport (leaks listed)
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use crate::config::SubsystemConfig;
use crate::error::{PoolError, PoolResult};
use crate::memory::{Arena, FixedBlockPool, PoolRegistry};
use crate::telemetry::{PoolStats, TelemetrySink};

/// Named pools, the shared registry and arena templates.
#[derive(Debug)]
pub struct MemorySubsystem {
    config: SubsystemConfig,
    pools: BTreeMap<String, Arc<FixedBlockPool>>,
    registry: PoolRegistry,
}

impl MemorySubsystem {
    /// Validates `config` and creates every named pool.
    ///
    /// # Errors
    ///
    /// - `InvalidConfig` naming the first invalid entry
    /// - `AllocationFailed` if a pool's storage cannot be reserved
    pub fn new(config: SubsystemConfig) -> PoolResult<Self> {
        config.validate()?;

        let mut pools = BTreeMap::new();
        for (name, pool_config) in &config.pools {
            let pool = FixedBlockPool::new(pool_config.clone())?;
            tracing::debug!(name = %name, pool = %pool.id(), "named pool ready");
            pools.insert(name.clone(), Arc::new(pool));
        }
        let registry = PoolRegistry::new(config.registry.clone())?;

        tracing::info!(
            pools = pools.len(),
            arenas = config.arenas.len(),
            "memory subsystem initialized"
        );
        Ok(Self {
            config,
            pools,
            registry,
        })
    }

    /// Loads a TOML file and builds the subsystem it describes.
    ///
    /// # Errors
    ///
    /// Same as [`SubsystemConfig::load`] and [`MemorySubsystem::new`].
    pub fn load(path: impl AsRef<Path>) -> PoolResult<Self> {
        Self::new(SubsystemConfig::load(path)?)
    }

    /// The configuration the subsystem was built from.
    #[inline]
    #[must_use]
    pub const fn config(&self) -> &SubsystemConfig {
        &self.config
    }

    /// A named pool, if configured.
    #[must_use]
    pub fn pool(&self, name: &str) -> Option<Arc<FixedBlockPool>> {
        self.pools.get(name).cloned()
    }

    /// The size-class registry.
    #[inline]
    #[must_use]
    pub const fn registry(&self) -> &PoolRegistry {
        &self.registry
    }

    /// Creates a fresh arena from the named template.
    ///
    /// # Errors
    ///
    /// - `InvalidConfig` if no arena template has that name
    /// - `AllocationFailed` if the buffer cannot be reserved
    pub fn create_arena(&self, name: &str) -> PoolResult<Arena> {
        let template = self
            .config
            .arenas
            .get(name)
            .ok_or_else(|| PoolError::InvalidConfig(format!("unknown arena '{name}'")))?;
        Arena::from_config(template)
    }

    /// Pushes a snapshot of every named and registry pool to `sink`.
    pub fn report(&self, sink: &dyn TelemetrySink) {
        for (name, pool) in &self.pools {
            pool.report(sink, name);
        }
        self.registry.report(sink);
    }

    /// Shuts down every pool and reports the ones that still had slots out.
    ///
    /// Pools with outstanding allocations are logged at error level and
    /// left to drop normally.
    #[must_use]
    pub fn shutdown(self) -> ShutdownReport {
        let registry_pools = self.registry.pools();
        drop(self.registry);

        let mut report = ShutdownReport::default();
        let all = self.pools.into_iter().chain(registry_pools);
        for (name, pool) in all {
            let mut pool = match Arc::try_unwrap(pool) {
                Ok(pool) => pool,
                Err(shared) => {
                    tracing::warn!(name = %name, pool = %shared.id(), "pool still shared at shutdown");
                    report.failures.push((name, PoolError::OutstandingAllocations {
                        count: shared.outstanding(),
                    }));
                    continue;
                }
            };
            match pool.shutdown() {
                Ok(stats) => report.pools.push((name, stats)),
                Err(PoolError::OutstandingAllocations { count }) => {
                    tracing::error!(name = %name, pool = %pool.id(), outstanding = count, "leaked allocations at shutdown");
                    report.leaks.push((name, pool.stats()));
                }
                Err(err) => {
                    tracing::error!(name = %name, error = %err, "pool shutdown failed");
                    report.failures.push((name, err));
                }
            }
        }

        tracing::info!(
            pools = report.pools.len(),
            leaks = report.leaks.len(),
            failures = report.failures.len(),
            "memory subsystem shut down"
        );
        report
    }
}

/// Outcome of [`MemorySubsystem::shutdown`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Pools retired cleanly, with their final counters.
    pub pools: Vec<(String, PoolStats)>,
    /// Pools that still had slots held by callers.
    pub leaks: Vec<(String, PoolStats)>,
    /// Pools that could not be shut down for another reason.
    pub failures: Vec<(String, PoolError)>,
}

impl ShutdownReport {
    /// Returns true if every pool shut down without leaks.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.leaks.is_empty() && self.failures.is_empty()
    }
}
