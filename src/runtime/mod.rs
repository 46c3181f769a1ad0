//! Lifecycle managers and the combined [`CoreContext`].

pub mod context;
pub mod memory_manager;
pub mod scheduler_manager;

pub use context::CoreContext;
pub use memory_manager::{MemoryManager, HEALTHY_FRAGMENTATION_LIMIT};
pub use scheduler_manager::{SchedulerManager, SchedulerStats, DEFAULT_SCHEDULER_NAME};
