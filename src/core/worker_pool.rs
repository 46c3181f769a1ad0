//! Work-stealing thread pool.
//!
//! The pool runs a resizable set of OS worker threads. Each worker owns a
//! local deque and a single-threaded tokio runtime for async jobs. All
//! workers share one priority heap.
//!
//! # Key Features
//!
//! - **Priority**: the shared heap drains `Critical` before `High` before
//!   `Normal` before `Low`, FIFO within a priority
//! - **Locality**: work submitted from inside a worker stays on its deque
//! - **Stealing**: idle workers take from the back of a sibling's deque
//! - **No polling**: idle workers park on a `Condvar`
//!
//! # Example
//!
//! ```rust,ignore
//! use prometheus_scheduler::config::WorkerPoolConfig;
//! use prometheus_scheduler::core::WorkStealingPool;
//! use prometheus_scheduler::util::Priority;
//!
//! let pool = WorkStealingPool::new(WorkerPoolConfig::new().with_worker_count(4))?;
//! let handle = pool.submit_priority_task(Priority::High, || 6 * 7)?;
//! assert_eq!(handle.get()?, 42);
//! pool.shutdown();
//! ```

mod native;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::executor::JobStatus;
use crate::util::serde::WorkerId;

pub use native::{Route, WorkStealingPool};

/// Weight of the newest sample in the average task duration.
pub const DURATION_EWMA_ALPHA: f64 = 0.2;

/// Snapshot of pool utilization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoadInfo {
    /// Live worker threads.
    pub total_threads: usize,
    /// Workers executing a job.
    pub active_threads: usize,
    /// Workers waiting for work.
    pub idle_threads: usize,
    /// Jobs queued in the shared heap and all local deques.
    pub pending_tasks: usize,
    /// Jobs that produced a value.
    pub completed_tasks: u64,
    /// Jobs that returned an error or panicked.
    pub failed_tasks: u64,
    /// Jobs skipped or discarded before running.
    pub cancelled_tasks: u64,
    /// Jobs accepted by the pool.
    pub submitted_tasks: u64,
    /// Jobs taken from a sibling's deque.
    pub total_steals: u64,
    /// Local deque depth per worker.
    pub local_queue_depths: BTreeMap<WorkerId, usize>,
    /// `active_threads / total_threads`.
    pub cpu_usage: f64,
    /// Exponentially weighted average run time of finished jobs.
    pub avg_task_duration: Duration,
    /// Whether workers are paused.
    pub paused: bool,
}

/// Internal counters for pool statistics (thread-safe).
#[derive(Debug, Default)]
pub(crate) struct PoolCounters {
    pub submitted_tasks: AtomicU64,
    pub completed_tasks: AtomicU64,
    pub failed_tasks: AtomicU64,
    pub cancelled_tasks: AtomicU64,
    pub steals: AtomicU64,
    /// EWMA of run time in nanoseconds; 0 until the first sample.
    pub avg_duration_ns: AtomicU64,
}

impl PoolCounters {
    /// Account for a finished job.
    pub fn record(&self, status: JobStatus, elapsed: Duration) {
        match status {
            JobStatus::Completed => {
                self.completed_tasks.fetch_add(1, Ordering::Relaxed);
            }
            JobStatus::Failed => {
                self.failed_tasks.fetch_add(1, Ordering::Relaxed);
            }
            JobStatus::Cancelled => {
                self.cancelled_tasks.fetch_add(1, Ordering::Relaxed);
                return;
            }
        }
        let sample = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        let _ = self
            .avg_duration_ns
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |old| {
                Some(ewma(old, sample))
            });
    }

    /// Copy counter values into `info`.
    pub fn fill(&self, info: &mut LoadInfo) {
        info.submitted_tasks = self.submitted_tasks.load(Ordering::Relaxed);
        info.completed_tasks = self.completed_tasks.load(Ordering::Relaxed);
        info.failed_tasks = self.failed_tasks.load(Ordering::Relaxed);
        info.cancelled_tasks = self.cancelled_tasks.load(Ordering::Relaxed);
        info.total_steals = self.steals.load(Ordering::Relaxed);
        info.avg_task_duration =
            Duration::from_nanos(self.avg_duration_ns.load(Ordering::Relaxed));
    }
}

#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
fn ewma(old: u64, sample: u64) -> u64 {
    if old == 0 {
        return sample.max(1);
    }
    let blended =
        (1.0 - DURATION_EWMA_ALPHA).mul_add(old as f64, DURATION_EWMA_ALPHA * sample as f64);
    (blended.round() as u64).max(1)
}
