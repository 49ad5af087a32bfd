//! # Memory Management
//!
//! Pre-allocated slot pools and scratch arenas.
//!
//! ## Design Philosophy
//!
//! Storage is reserved up front. On the hot path:
//! - Acquire and release are O(1) free-list operations
//! - No heap traffic unless a growth policy asks for it
//! - Misuse (double free, stale or foreign handles) is reported, never undefined

mod arena;
mod free_list;
mod handle;
mod object_pool;
mod pool;
mod registry;
mod segment;
mod tracker;

pub use arena::{Arena, ArenaId, ArenaPointer, ArenaScope, MAX_ALIGN};
pub use handle::{PoolId, SlotHandle, SlotOrigin, SlotState};
pub use object_pool::{ObjectHandle, ObjectPool, Poolable, Pooled};
pub use pool::FixedBlockPool;
pub use registry::{PoolKey, PoolRegistry, TypeTag};
pub use tracker::{HandleSource, LivenessTracker, Trackable, TrackedId};
