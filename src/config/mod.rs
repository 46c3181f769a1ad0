//! Configuration models for pools, schedulers and the memory subsystem.

pub mod env;
pub mod map;
pub mod pool;

pub use env::config_map_from_env;
pub use map::{log_unknown_keys, MapKey};
pub use pool::{
    MemoryConfig, SchedulerConfig, WorkerPoolConfig, DEFAULT_ALIGNMENT, DEFAULT_ARENA_BYTES,
};
