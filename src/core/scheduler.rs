//! Async scheduler: a work-stealing pool plus admission control.
//!
//! The scheduler packages closures, futures and [`WorkerExecutor`] payloads
//! into jobs, pushes them onto its pool and hands back [`TaskHandle`]s that
//! can be awaited or waited on.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{info, warn};

use super::error::{CoreError, TaskError};
use super::executor::{package, package_future, WorkerExecutor};
use super::limiter::ConcurrencyLimiter;
use super::task::{CancelToken, TaskHandle};
use super::worker_pool::{LoadInfo, Route, WorkStealingPool};
use crate::config::SchedulerConfig;
use crate::util::serde::Priority;

/// Schedules work onto an owned [`WorkStealingPool`].
pub struct AsyncScheduler {
    pool: Arc<WorkStealingPool>,
    limiter: RwLock<ConcurrencyLimiter>,
    config: SchedulerConfig,
}

impl AsyncScheduler {
    /// Build a scheduler and its pool.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidConfig` for an invalid configuration, or the
    /// pool's startup error.
    pub fn new(config: SchedulerConfig) -> Result<Self, CoreError> {
        config.validate().map_err(CoreError::InvalidConfig)?;
        let pool = WorkStealingPool::new(config.pool.clone())?;
        info!(
            threads = config.pool.worker_count,
            max_concurrency = config.max_concurrency,
            "AsyncScheduler started"
        );
        Ok(Self {
            pool: Arc::new(pool),
            limiter: RwLock::new(ConcurrencyLimiter::new(config.max_concurrency)),
            config,
        })
    }

    /// Scheduler over `threads` workers with default settings.
    ///
    /// # Errors
    ///
    /// See [`new`](Self::new).
    pub fn with_threads(threads: usize) -> Result<Self, CoreError> {
        Self::new(SchedulerConfig::with_threads(threads))
    }

    /// Run `f` at `Normal` priority.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::PoolShutdown` or `CoreError::QueueFull` when the
    /// pool rejects the job.
    pub fn schedule<T, F>(&self, f: F) -> Result<TaskHandle<T>, CoreError>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        self.pool.submit_task(f)
    }

    /// Run `f` at `priority`.
    ///
    /// # Errors
    ///
    /// See [`schedule`](Self::schedule).
    pub fn schedule_with_priority<T, F>(
        &self,
        priority: Priority,
        f: F,
    ) -> Result<TaskHandle<T>, CoreError>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        self.pool.submit_priority_task(priority, f)
    }

    /// Run a fallible closure. Its error becomes the task's [`TaskError`],
    /// keeping the code when the error already is one.
    ///
    /// # Errors
    ///
    /// See [`schedule`](Self::schedule).
    pub fn try_schedule<T, E, F>(&self, f: F) -> Result<TaskHandle<T>, CoreError>
    where
        T: Send + 'static,
        E: Into<anyhow::Error>,
        F: FnOnce() -> Result<T, E> + Send + 'static,
    {
        let (job, handle) = package(self.pool.new_metadata(Priority::Normal), move |_| {
            f().map_err(|e| TaskError::from_anyhow(&e.into()))
        });
        self.pool.submit_job(job, Route::Auto)?;
        Ok(handle)
    }

    /// Run `f` with access to its task's cancel token.
    ///
    /// # Errors
    ///
    /// See [`schedule`](Self::schedule).
    pub fn schedule_cancellable<T, F>(&self, f: F) -> Result<TaskHandle<T>, CoreError>
    where
        T: Send + 'static,
        F: FnOnce(&CancelToken) -> T + Send + 'static,
    {
        let (job, handle) =
            package(self.pool.new_metadata(Priority::Normal), move |token| Ok(f(token)));
        self.pool.submit_job(job, Route::Auto)?;
        Ok(handle)
    }

    /// Wait for a limiter permit, then run `f`. The permit is held until `f`
    /// returns, or until the job is discarded.
    ///
    /// # Errors
    ///
    /// See [`schedule`](Self::schedule).
    pub async fn schedule_limited<T, F>(&self, f: F) -> Result<TaskHandle<T>, CoreError>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let permit = self.concurrency_limiter().acquire_permit().await;
        let (job, handle) = package(self.pool.new_metadata(Priority::Normal), move |_| {
            let _permit = permit;
            Ok(f())
        });
        self.pool.submit_job(job, Route::Global)?;
        Ok(handle)
    }

    /// Run `f` and await it for at most `timeout`. `Ok(None)` means the
    /// deadline passed; the task's cancel token has then been signalled.
    ///
    /// # Errors
    ///
    /// Returns the submission error converted to a [`TaskError`], or the
    /// task's own error.
    pub async fn schedule_with_timeout<T, F>(
        &self,
        f: F,
        timeout: Duration,
    ) -> Result<Option<T>, TaskError>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let mut meta = self.pool.new_metadata(Priority::Normal);
        meta.timeout = Some(timeout);
        let (job, handle) = package(meta, move |_| Ok(f()));
        self.pool.submit_job(job, Route::Auto)?;
        handle.timeout(timeout).await
    }

    /// Run `f` under the configured default deadline, or without one.
    ///
    /// # Errors
    ///
    /// See [`schedule_with_timeout`](Self::schedule_with_timeout).
    pub async fn schedule_with_default_timeout<T, F>(&self, f: F) -> Result<Option<T>, TaskError>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        match self.config.default_timeout() {
            Some(timeout) => self.schedule_with_timeout(f, timeout).await,
            None => self.schedule(f)?.await.map(Some),
        }
    }

    /// Schedule every closure; the group resolves to their values in order.
    ///
    /// # Errors
    ///
    /// Returns the first submission error. Jobs accepted before it are
    /// cancelled.
    pub fn parallel<T, F, I>(&self, fs: I) -> Result<TaskGroup<T>, CoreError>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
        I: IntoIterator<Item = F>,
    {
        let mut handles = Vec::new();
        for f in fs {
            match self.schedule(f) {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    handles.iter().for_each(TaskHandle::cancel);
                    return Err(e);
                }
            }
        }
        Ok(TaskGroup { handles })
    }

    /// Run a collaborator executor on a worker's runtime.
    ///
    /// # Errors
    ///
    /// See [`schedule`](Self::schedule).
    pub fn execute<P, R, E>(
        &self,
        executor: E,
        payload: P,
        priority: Priority,
    ) -> Result<TaskHandle<R>, CoreError>
    where
        P: Send + 'static,
        R: Send + 'static,
        E: WorkerExecutor<P, R>,
    {
        let meta = self.pool.new_metadata(priority);
        let (job, handle) = package_future(meta, async move {
            Ok::<_, TaskError>(executor.execute(payload, meta).await)
        });
        self.pool.submit_job(job, Route::Global)?;
        Ok(handle)
    }

    /// Install a fresh limiter with `max_permits`. Permits taken from the
    /// previous limiter are released against it.
    pub fn set_global_concurrency_limit(&self, max_permits: usize) {
        *self.limiter.write() = ConcurrencyLimiter::new(max_permits);
        info!(max_permits = max_permits, "Concurrency limit updated");
    }

    /// Current limiter.
    #[must_use]
    pub fn concurrency_limiter(&self) -> ConcurrencyLimiter {
        self.limiter.read().clone()
    }

    /// Pool load snapshot.
    #[must_use]
    pub fn get_scheduler_stats(&self) -> LoadInfo {
        self.pool.get_load_info()
    }

    /// Underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &Arc<WorkStealingPool> {
        &self.pool
    }

    /// Configuration the scheduler was built with.
    #[must_use]
    pub const fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Block until no job is queued or running.
    pub fn wait_for_all_tasks(&self) {
        self.pool.wait_for_all_tasks();
    }

    /// Drain and stop the pool.
    pub fn shutdown(&self) {
        self.pool.shutdown();
    }
}

impl std::fmt::Debug for AsyncScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncScheduler")
            .field("pool", &self.pool)
            .field("limiter", &*self.limiter.read())
            .finish()
    }
}

/// Handles produced by [`AsyncScheduler::parallel`].
#[derive(Debug)]
pub struct TaskGroup<T> {
    handles: Vec<TaskHandle<T>>,
}

impl<T> TaskGroup<T> {
    /// Number of tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// `true` for an empty group.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Cancel every task in the group.
    pub fn cancel_all(&self) {
        self.handles.iter().for_each(TaskHandle::cancel);
    }

    /// Await all values in submission order.
    ///
    /// # Errors
    ///
    /// Returns the first error; remaining tasks are cancelled.
    pub async fn join(self) -> Result<Vec<T>, TaskError> {
        when_all(self.handles).await
    }

    /// Block for all values in submission order.
    ///
    /// # Errors
    ///
    /// Returns the first error; remaining tasks are cancelled.
    pub fn wait(self) -> Result<Vec<T>, TaskError> {
        wait_all(self.handles)
    }

    /// Give up the grouping.
    #[must_use]
    pub fn into_handles(self) -> Vec<TaskHandle<T>> {
        self.handles
    }
}

/// Await every handle in order.
///
/// # Errors
///
/// Returns the first error; remaining tasks are cancelled.
pub async fn when_all<T>(handles: Vec<TaskHandle<T>>) -> Result<Vec<T>, TaskError> {
    let mut values = Vec::with_capacity(handles.len());
    let mut iter = handles.into_iter();
    while let Some(handle) = iter.next() {
        match handle.await {
            Ok(value) => values.push(value),
            Err(e) => {
                iter.for_each(|rest| rest.cancel());
                return Err(e);
            }
        }
    }
    Ok(values)
}

/// Block on every handle in order.
///
/// # Errors
///
/// Returns the first error; remaining tasks are cancelled.
pub fn wait_all<T>(handles: Vec<TaskHandle<T>>) -> Result<Vec<T>, TaskError> {
    let mut values = Vec::with_capacity(handles.len());
    let mut iter = handles.into_iter();
    while let Some(handle) = iter.next() {
        match handle.get() {
            Ok(value) => values.push(value),
            Err(e) => {
                iter.for_each(|rest| rest.cancel());
                return Err(e);
            }
        }
    }
    Ok(values)
}

/// Await two handles of different types.
///
/// # Errors
///
/// Returns the first error; the other task is cancelled if still pending.
pub async fn when_both<A, B>(a: TaskHandle<A>, b: TaskHandle<B>) -> Result<(A, B), TaskError> {
    match a.await {
        Ok(first) => Ok((first, b.await?)),
        Err(e) => {
            if !b.is_ready() {
                warn!(task_id = b.id(), "Cancelling sibling after failure");
                b.cancel();
            }
            Err(e)
        }
    }
}
