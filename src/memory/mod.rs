//! Arena allocation and reusable-object pools.

pub mod arena;
pub mod object_pool;

pub use arena::{Allocation, ArenaAllocator, ManagedBlock, MemoryBlock, MemoryStats};
pub use object_pool::{ObjectPool, PoolMaintenance, PoolStats, PooledObject, Reset};
