//! Job packaging and the executor trait for collaborator workloads.
//!
//! Every closure or future handed to the pool is wrapped into a [`Job`]: a
//! type-erased, run-once unit that checks cancellation, stamps the task's
//! metadata, catches panics at the task boundary, and resolves the
//! [`TaskHandle`](super::task::TaskHandle).

use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};

use async_trait::async_trait;
use tokio::runtime::Runtime;

use super::error::TaskError;
use super::task::{task_pair, CancelToken, Completer, TaskHandle, TaskMetadata};
use crate::util::serde::{Priority, TaskId, WorkerId};

/// Execution environment handed to a running job.
pub struct WorkerContext<'a> {
    /// Id of the worker running the job.
    pub worker_id: WorkerId,
    /// The worker's own single-threaded runtime.
    pub runtime: &'a Runtime,
}

/// How a job ended, used for pool accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    /// Produced a value.
    Completed,
    /// Returned an error or panicked.
    Failed,
    /// Skipped because its token was cancelled.
    Cancelled,
}

/// Outcome of running a job whose handle has not been resolved yet.
struct Settled {
    status: JobStatus,
    resolve: Box<dyn FnOnce() + Send>,
}

type JobFn = Box<dyn FnOnce(&WorkerContext<'_>) -> Settled + Send + 'static>;

/// Type-erased unit of work queued in a pool.
///
/// Dropping a job without running it resolves its task as `Cancelled`.
pub struct Job {
    id: TaskId,
    priority: Priority,
    cancel: CancelToken,
    run: JobFn,
}

impl Job {
    /// Task id.
    #[must_use]
    pub const fn id(&self) -> TaskId {
        self.id
    }

    /// Queue priority.
    #[must_use]
    pub const fn priority(&self) -> Priority {
        self.priority
    }

    /// Whether the owning handle requested cancellation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Run the job on the calling worker.
    pub fn run(self, ctx: &WorkerContext<'_>) -> JobStatus {
        self.run_with(ctx, |_| {})
    }

    /// Run the job and pass its status to `account` before the task handle
    /// resolves. Anyone woken by the handle observes the accounting.
    pub fn run_with(self, ctx: &WorkerContext<'_>, account: impl FnOnce(JobStatus)) -> JobStatus {
        let settled = (self.run)(ctx);
        account(settled.status);
        (settled.resolve)();
        settled.status
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}

fn finish<T: Send + 'static>(completer: Completer<T>, result: Result<T, TaskError>) -> Settled {
    let status = if result.is_ok() {
        JobStatus::Completed
    } else {
        JobStatus::Failed
    };
    Settled {
        status,
        resolve: Box::new(move || completer.complete(result)),
    }
}

fn skip<T: Send + 'static>(completer: Completer<T>) -> Settled {
    Settled {
        status: JobStatus::Cancelled,
        resolve: Box::new(move || completer.cancel("cancelled before start")),
    }
}

/// Package a closure that receives its task's cancel token.
pub fn package<T, F>(meta: TaskMetadata, f: F) -> (Job, TaskHandle<T>)
where
    T: Send + 'static,
    F: FnOnce(&CancelToken) -> Result<T, TaskError> + Send + 'static,
{
    let (completer, handle) = task_pair(meta);
    let cancel = completer.cancel_token().clone();
    let run: JobFn = Box::new(move |_ctx| {
        if completer.is_cancelled() {
            return skip(completer);
        }
        completer.mark_running();
        let token = completer.cancel_token().clone();
        let result = catch_unwind(AssertUnwindSafe(|| f(&token)))
            .unwrap_or_else(|payload| Err(TaskError::from_panic(payload.as_ref())));
        finish(completer, result)
    });
    (
        Job {
            id: meta.id,
            priority: meta.priority,
            cancel,
            run,
        },
        handle,
    )
}

/// Package a future driven to completion on the worker's runtime.
pub fn package_future<T, Fut>(meta: TaskMetadata, fut: Fut) -> (Job, TaskHandle<T>)
where
    T: Send + 'static,
    Fut: Future<Output = Result<T, TaskError>> + Send + 'static,
{
    let (completer, handle) = task_pair(meta);
    let cancel = completer.cancel_token().clone();
    let run: JobFn = Box::new(move |ctx| {
        if completer.is_cancelled() {
            return skip(completer);
        }
        completer.mark_running();
        let result = catch_unwind(AssertUnwindSafe(|| ctx.runtime.block_on(fut)))
            .unwrap_or_else(|payload| Err(TaskError::from_panic(payload.as_ref())));
        finish(completer, result)
    });
    (
        Job {
            id: meta.id,
            priority: meta.priority,
            cancel,
            run,
        },
        handle,
    )
}

/// Executor for collaborator workloads (inference engines, GPU wrappers)
/// that are driven by the scheduler instead of a plain closure.
///
/// `execute` runs on a pool worker inside that worker's single-threaded
/// tokio runtime, so blocking compute does not stall the caller's runtime.
/// Results need not be serializable.
///
/// # Example
///
/// ```rust,ignore
/// use async_trait::async_trait;
/// use prometheus_scheduler::core::{TaskMetadata, WorkerExecutor};
///
/// #[derive(Clone)]
/// struct EchoModel;
///
/// #[async_trait]
/// impl WorkerExecutor<String, String> for EchoModel {
///     async fn execute(&self, prompt: String, _meta: TaskMetadata) -> String {
///         prompt.to_uppercase()
///     }
/// }
/// ```
#[async_trait]
pub trait WorkerExecutor<P, R>: Send + Sync + Clone + 'static
where
    P: Send + 'static,
    R: Send + 'static,
{
    /// Execute a payload and return its result.
    async fn execute(&self, payload: P, meta: TaskMetadata) -> R;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ErrorCode;
    use crate::core::task::TaskState;

    fn runtime() -> Runtime {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
    }

    #[test]
    fn test_package_runs_and_resolves() {
        let rt = runtime();
        let ctx = WorkerContext { worker_id: 0, runtime: &rt };
        let (job, handle) = package(TaskMetadata::new(1, Priority::High), |_| Ok(21 * 2));
        assert_eq!(job.priority(), Priority::High);
        assert_eq!(job.run(&ctx), JobStatus::Completed);
        assert_eq!(handle.get().unwrap(), 42);
    }

    #[test]
    fn test_panic_is_captured() {
        let rt = runtime();
        let ctx = WorkerContext { worker_id: 0, runtime: &rt };
        let (job, handle) = package::<(), _>(TaskMetadata::new(2, Priority::Normal), |_| {
            panic!("kernel launch failed")
        });
        assert_eq!(job.run(&ctx), JobStatus::Failed);
        let err = handle.get().unwrap_err();
        assert_eq!(err.code(), ErrorCode::InternalError);
        assert!(err.message().contains("kernel launch failed"));
    }

    #[test]
    fn test_cancelled_job_is_skipped() {
        let rt = runtime();
        let ctx = WorkerContext { worker_id: 0, runtime: &rt };
        let (job, handle) = package(TaskMetadata::new(3, Priority::Low), |_| Ok(1));
        handle.cancel();
        assert!(job.is_cancelled());
        assert_eq!(job.run(&ctx), JobStatus::Cancelled);
        assert_eq!(handle.state(), TaskState::Cancelled);
    }

    #[test]
    fn test_dropped_job_resolves_cancelled() {
        let (job, handle) = package(TaskMetadata::new(4, Priority::Low), |_| Ok("never"));
        drop(job);
        assert_eq!(handle.get().unwrap_err().code(), ErrorCode::Cancelled);
    }

    #[test]
    fn test_future_runs_on_worker_runtime() {
        let rt = runtime();
        let ctx = WorkerContext { worker_id: 1, runtime: &rt };
        let (job, handle) = package_future(TaskMetadata::new(5, Priority::Normal), async {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            Ok::<_, TaskError>("slept")
        });
        assert_eq!(job.run(&ctx), JobStatus::Completed);
        assert_eq!(handle.get().unwrap(), "slept");
    }
}
