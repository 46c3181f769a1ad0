//! Task primitives, admission control, the work-stealing pool and the
//! scheduler built on top of it.

pub mod error;
pub mod executor;
pub mod limiter;
pub mod outcome;
pub mod scheduler;
pub mod task;
pub mod worker_pool;

pub use error::{AppResult, CoreError, ErrorCode, TaskError};
pub use executor::{package, package_future, Job, JobStatus, WorkerContext, WorkerExecutor};
pub use limiter::{AcquirePermit, ConcurrencyLimiter, Permit};
pub use outcome::Outcome;
pub use scheduler::{wait_all, when_all, when_both, AsyncScheduler, TaskGroup};
pub use task::{task_pair, CancelToken, Completer, TaskHandle, TaskMetadata, TaskState};
pub use worker_pool::{LoadInfo, Route, WorkStealingPool};
