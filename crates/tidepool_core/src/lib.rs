//! # TIDEPOOL Core
//!
//! Pooled and arena memory for latency-sensitive runtimes:
//! - Fixed-block pools with O(1) acquire/release
//! - Typed object pools with reset and cleanup hooks
//! - Bump-pointer arenas freed in bulk once per scope
//! - A size-class registry for callers that pick pools by size or type
//!
//! ## Architecture Rules
//!
//! 1. **Reserve up front** - Storage is allocated at startup, not per object
//! 2. **Report, never corrupt** - Double frees, stale handles and foreign
//!    handles come back as [`PoolError`] values
//! 3. **Exhaustion is backpressure** - Running out of slots is an ordinary result
//!
//! ## Example
//!
//! ```rust
//! use tidepool_core::{Arena, FixedBlockPool, GrowthPolicy};
//!
//! let pool = FixedBlockPool::with_policy(64, 1024, GrowthPolicy::None)?;
//! let slot = pool.acquire()?;
//! pool.write(slot, 0, b"payload")?;
//! pool.release(slot)?;
//!
//! let mut arena = Arena::new(64 * 1024)?;
//! let scratch = arena.alloc_slice::<f32>(256)?;
//! arena.slice_mut::<f32>(scratch)?.fill(1.0);
//! arena.reset();
//! # Ok::<(), tidepool_core::PoolError>(())
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod config;
pub mod error;
pub mod memory;
pub mod subsystem;
pub mod telemetry;

pub use config::{
    ArenaConfig, GrowthPolicy, ObjectPoolConfig, OverflowPolicy, PoolConfig, RegistryConfig,
    SubsystemConfig, ThreadSafety,
};
pub use error::{PoolError, PoolResult};
pub use memory::{
    Arena, ArenaPointer, ArenaScope, FixedBlockPool, LivenessTracker, ObjectHandle, ObjectPool,
    PoolId, PoolKey, PoolRegistry, Poolable, Pooled, SlotHandle, SlotOrigin, SlotState, TypeTag,
};
pub use subsystem::{MemorySubsystem, ShutdownReport};
pub use telemetry::{ArenaStats, PoolStats, TelemetrySink, TracingSink};
