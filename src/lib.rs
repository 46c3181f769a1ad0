//! # Prometheus Scheduler
//!
//! Work-stealing task scheduling and arena memory for CPU-heavy inference
//! pipelines.
//!
//! The crate provides the execution core underneath the Prometheus runtime:
//! a resizable pool of OS worker threads that drains a priority-ordered
//! queue, a scheduler that hands back awaitable task handles, and a memory
//! subsystem that serves aligned regions from one pre-reserved arena.
//!
//! ## Key Features
//!
//! - **Priority Scheduling**: `Critical` work runs before `High`, `Normal`
//!   and `Low`, FIFO within a priority
//! - **Work Stealing**: tasks submitted from a worker stay on its local deque
//!   until an idle sibling steals them
//! - **Blocking or Async**: every [`TaskHandle`](core::TaskHandle) can be
//!   waited on from a thread or awaited from any executor
//! - **Cooperative Cancellation**: timeouts and explicit cancels signal a
//!   token; queued jobs whose token is set never run
//! - **Admission Control**: a FIFO counting semaphore bounds concurrent work
//! - **Arena Allocation**: first-fit, aligned, offset-addressed blocks with
//!   fragmentation statistics and compaction
//! - **Object Pools**: bounded caches of reusable values, per element type
//! - **No Globals**: [`CoreContext`](runtime::CoreContext) owns its managers;
//!   several may coexist in one process
//!
//! ## Scheduling
//!
//! ```rust,ignore
//! use prometheus_scheduler::core::AsyncScheduler;
//! use prometheus_scheduler::util::Priority;
//!
//! let scheduler = AsyncScheduler::with_threads(4)?;
//! let urgent = scheduler.schedule_with_priority(Priority::Critical, || 6 * 7)?;
//! assert_eq!(urgent.get()?, 42);
//!
//! // From async code the same handle is a future.
//! let value = scheduler.schedule(|| "hello")?.await?;
//!
//! // Deadlines cancel the job cooperatively and yield `None`.
//! let late = scheduler
//!     .schedule_with_timeout(|| expensive(), Duration::from_millis(50))
//!     .await?;
//! scheduler.shutdown();
//! ```
//!
//! ## Memory
//!
//! ```rust,ignore
//! use prometheus_scheduler::memory::ArenaAllocator;
//!
//! let arena = ArenaAllocator::new(1 << 20);
//! let block = arena.allocate(4096, 64).expect("arena has room");
//! arena.write(&block, 0, b"weights")?;
//! arena.deallocate(block);
//! assert_eq!(arena.get_stats().current_usage, 0);
//! ```
//!
//! ## Configuration
//!
//! Managers consume a flat string map, typically loaded with
//! [`config::config_map_from_env`]:
//!
//! ```rust,ignore
//! use prometheus_scheduler::config::config_map_from_env;
//! use prometheus_scheduler::runtime::CoreContext;
//!
//! prometheus_scheduler::util::init_tracing();
//! let ctx = CoreContext::new();
//! ctx.initialize(&config_map_from_env("SCHED_"))?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Task primitives, the work-stealing pool and the scheduler.
pub mod core;
/// Configuration models for pools, schedulers and memory.
pub mod config;
/// Builders to construct scheduler and memory components from configuration.
pub mod builders;
/// Infrastructure: the priority queue shared by the pool's workers.
pub mod infra;
/// Arena allocator and object pools.
pub mod memory;
/// Lifecycle managers and the combined context.
pub mod runtime;
/// Shared utilities.
pub mod util;
