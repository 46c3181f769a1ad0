//! Infrastructure adapters for queues.

pub mod queue;
pub use queue::InMemoryQueue;
