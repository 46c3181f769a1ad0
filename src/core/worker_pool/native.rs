//! Native implementation of the work-stealing pool using OS threads.
//!
//! # Design Principles
//!
//! - **No polling**: idle workers and `wait_for_all_tasks` park on condvars
//! - **One lock**: the shared heap, local deques and worker registry live
//!   under a single `parking_lot::Mutex`; counters are atomics
//! - **Drain on shutdown**: `shutdown` lets queued work finish,
//!   `shutdown_now` discards it first

use std::cell::Cell;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info, warn};

use super::{LoadInfo, PoolCounters};
use crate::config::WorkerPoolConfig;
use crate::core::error::{CoreError, TaskError};
use crate::core::executor::{package, package_future, Job, WorkerContext};
use crate::core::task::{TaskHandle, TaskMetadata};
use crate::infra::queue::InMemoryQueue;
use crate::util::serde::{Priority, WorkerId};

static NEXT_POOL_UID: AtomicUsize = AtomicUsize::new(0);

thread_local! {
    /// `(pool uid, worker id)` of the pool worker running on this thread.
    static CURRENT_WORKER: Cell<Option<(usize, WorkerId)>> = const { Cell::new(None) };
}

/// Where a submitted job is queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// The calling worker's local deque when called from one of this pool's
    /// workers, the shared heap otherwise.
    Auto,
    /// The shared priority heap.
    Global,
    /// A specific worker's local deque.
    Worker(WorkerId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkerState {
    Idle,
    Running,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Accepting,
    Draining,
}

struct WorkerSlot {
    state: WorkerState,
    retiring: bool,
    local: VecDeque<Job>,
}

struct QueueState {
    global: InMemoryQueue<Job>,
    workers: BTreeMap<WorkerId, WorkerSlot>,
    paused: bool,
    mode: Mode,
    /// Jobs queued anywhere (heap plus deques).
    pending: usize,
    /// Jobs currently executing.
    running: usize,
}

impl QueueState {
    /// Own deque front, then the shared heap, then a sibling's deque back.
    fn next_job(&mut self, id: WorkerId) -> Option<(Job, bool)> {
        if let Some(job) = self.workers.get_mut(&id).and_then(|w| w.local.pop_front()) {
            return Some((job, false));
        }
        if let Some(job) = self.global.pop() {
            return Some((job, false));
        }
        let victim = self
            .workers
            .range(id + 1..)
            .chain(self.workers.range(..id))
            .find(|(_, slot)| !slot.local.is_empty())
            .map(|(victim, _)| *victim)?;
        self.workers
            .get_mut(&victim)
            .and_then(|slot| slot.local.pop_back())
            .map(|job| (job, true))
    }

    fn take_all(&mut self) -> Vec<Job> {
        let mut jobs = self.global.drain();
        for slot in self.workers.values_mut() {
            jobs.extend(slot.local.drain(..));
        }
        self.pending = 0;
        jobs
    }

    fn is_quiescent(&self) -> bool {
        self.pending == 0 && self.running == 0
    }
}

struct Shared {
    uid: usize,
    config: WorkerPoolConfig,
    state: Mutex<QueueState>,
    /// Signalled when work arrives, on resume, on retire, and on shutdown.
    work_ready: Condvar,
    /// Signalled when the pool becomes quiescent.
    idle: Condvar,
    counters: PoolCounters,
    next_task_id: AtomicU64,
}

/// Resizable work-stealing thread pool.
///
/// Each worker runs its own single-threaded tokio runtime, so async jobs
/// submitted through [`submit_future`](Self::submit_future) never block the
/// caller's runtime.
pub struct WorkStealingPool {
    shared: Arc<Shared>,
    /// Join handles by worker id; also serializes resizes.
    handles: Mutex<HashMap<WorkerId, JoinHandle<()>>>,
    next_worker_id: AtomicUsize,
    shutdown: AtomicBool,
}

impl WorkStealingPool {
    /// Create a pool and spawn `config.worker_count` workers.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidConfig` if the configuration is invalid and
    /// `CoreError::WorkerSpawn` if a worker thread cannot be started.
    pub fn new(config: WorkerPoolConfig) -> Result<Self, CoreError> {
        config.validate().map_err(CoreError::InvalidConfig)?;
        let worker_count = config.worker_count;

        let pool = Self {
            shared: Arc::new(Shared {
                uid: NEXT_POOL_UID.fetch_add(1, Ordering::Relaxed),
                state: Mutex::new(QueueState {
                    global: InMemoryQueue::with_capacity(config.max_queue_depth),
                    workers: BTreeMap::new(),
                    paused: false,
                    mode: Mode::Accepting,
                    pending: 0,
                    running: 0,
                }),
                config,
                work_ready: Condvar::new(),
                idle: Condvar::new(),
                counters: PoolCounters::default(),
                next_task_id: AtomicU64::new(1),
            }),
            handles: Mutex::new(HashMap::new()),
            next_worker_id: AtomicUsize::new(0),
            shutdown: AtomicBool::new(false),
        };

        {
            let mut handles = pool.handles.lock();
            for _ in 0..worker_count {
                let (id, handle) = pool.spawn_worker()?;
                handles.insert(id, handle);
            }
        }

        info!(
            worker_count = worker_count,
            max_queue_depth = pool.shared.config.max_queue_depth,
            "WorkStealingPool initialized"
        );
        Ok(pool)
    }

    fn spawn_worker(&self) -> Result<(WorkerId, JoinHandle<()>), CoreError> {
        let id = self.next_worker_id.fetch_add(1, Ordering::Relaxed);
        self.shared.state.lock().workers.insert(
            id,
            WorkerSlot {
                state: WorkerState::Idle,
                retiring: false,
                local: VecDeque::new(),
            },
        );

        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name(format!("{}-{id}", self.shared.config.thread_name_prefix))
            .stack_size(self.shared.config.thread_stack_size)
            .spawn(move || worker_loop(&shared, id));

        match spawned {
            Ok(handle) => Ok((id, handle)),
            Err(e) => {
                let orphaned = {
                    let mut state = self.shared.state.lock();
                    state.workers.remove(&id)
                };
                drop(orphaned);
                error!(worker_id = id, error = %e, "Failed to spawn worker thread");
                Err(CoreError::WorkerSpawn(e.to_string()))
            }
        }
    }

    /// Metadata with a fresh task id.
    #[must_use]
    pub fn new_metadata(&self, priority: Priority) -> TaskMetadata {
        TaskMetadata::new(
            self.shared.next_task_id.fetch_add(1, Ordering::Relaxed),
            priority,
        )
    }

    /// Id of the calling thread if it is one of this pool's workers.
    #[must_use]
    pub fn current_worker_id(&self) -> Option<WorkerId> {
        CURRENT_WORKER
            .with(Cell::get)
            .and_then(|(uid, id)| (uid == self.shared.uid).then_some(id))
    }

    /// Queue a packaged job.
    ///
    /// # Errors
    ///
    /// - `CoreError::PoolShutdown` once shutdown has begun
    /// - `CoreError::QueueFull` when `max_queue_depth` jobs are queued
    /// - `CoreError::UnknownWorker` when an explicit `Route::Worker` names a
    ///   missing or retiring worker
    ///
    /// `Route::Auto` from a worker that is being retired falls back to the
    /// shared heap.
    pub fn submit_job(&self, job: Job, route: Route) -> Result<(), CoreError> {
        let current = self.current_worker_id();

        let mut state = self.shared.state.lock();
        if state.mode != Mode::Accepting {
            drop(state);
            warn!(task_id = job.id(), "Submission rejected: pool is shutting down");
            return Err(CoreError::PoolShutdown);
        }
        let max_depth = self.shared.config.max_queue_depth;
        if state.pending >= max_depth {
            drop(state);
            warn!(task_id = job.id(), max_depth = max_depth, "Worker pool queue is full");
            return Err(CoreError::QueueFull(format!(
                "{max_depth} jobs already queued"
            )));
        }

        let task_id = job.id();
        let placed = match route {
            Route::Auto => current
                .filter(|id| state.workers.get(id).is_some_and(|slot| !slot.retiring))
                .map_or(Route::Global, Route::Worker),
            other => other,
        };
        match placed {
            Route::Worker(id) => match state.workers.get_mut(&id) {
                Some(slot) if !slot.retiring => slot.local.push_back(job),
                _ => return Err(CoreError::UnknownWorker(id)),
            },
            Route::Global | Route::Auto => {
                let priority = job.priority();
                state.global.push(job, priority);
            }
        }
        state.pending += 1;
        drop(state);

        self.shared.counters.submitted_tasks.fetch_add(1, Ordering::Relaxed);
        match placed {
            Route::Worker(_) => {
                self.shared.work_ready.notify_all();
            }
            _ => {
                self.shared.work_ready.notify_one();
            }
        }
        debug!(task_id = task_id, route = ?placed, "Task submitted to worker pool");
        Ok(())
    }

    /// Submit a closure at `Normal` priority.
    ///
    /// Called from one of this pool's workers, the job goes to that worker's
    /// local deque; otherwise to the shared heap.
    ///
    /// # Errors
    ///
    /// See [`submit_job`](Self::submit_job).
    pub fn submit_task<T, F>(&self, f: F) -> Result<TaskHandle<T>, CoreError>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (job, handle) = package(self.new_metadata(Priority::Normal), move |_| Ok(f()));
        self.submit_job(job, Route::Auto)?;
        Ok(handle)
    }

    /// Submit a closure to the shared heap at `priority`.
    ///
    /// # Errors
    ///
    /// See [`submit_job`](Self::submit_job).
    pub fn submit_priority_task<T, F>(
        &self,
        priority: Priority,
        f: F,
    ) -> Result<TaskHandle<T>, CoreError>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (job, handle) = package(self.new_metadata(priority), move |_| Ok(f()));
        self.submit_job(job, Route::Global)?;
        Ok(handle)
    }

    /// Submit a closure to `worker_id`'s local deque. Idle siblings may steal it.
    ///
    /// # Errors
    ///
    /// See [`submit_job`](Self::submit_job).
    pub fn submit_to_worker<T, F>(
        &self,
        worker_id: WorkerId,
        f: F,
    ) -> Result<TaskHandle<T>, CoreError>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (job, handle) = package(self.new_metadata(Priority::Normal), move |_| Ok(f()));
        self.submit_job(job, Route::Worker(worker_id))?;
        Ok(handle)
    }

    /// Submit a future, driven on the executing worker's own runtime.
    ///
    /// # Errors
    ///
    /// See [`submit_job`](Self::submit_job).
    pub fn submit_future<T, Fut>(
        &self,
        priority: Priority,
        fut: Fut,
    ) -> Result<TaskHandle<T>, CoreError>
    where
        T: Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        let (job, handle) = package_future(self.new_metadata(priority), async move {
            Ok::<_, TaskError>(fut.await)
        });
        self.submit_job(job, Route::Global)?;
        Ok(handle)
    }

    /// Stop picking up queued work. Running jobs finish.
    pub fn pause(&self) {
        self.shared.state.lock().paused = true;
        debug!("Worker pool paused");
    }

    /// Resume picking up queued work.
    pub fn resume(&self) {
        self.shared.state.lock().paused = false;
        self.shared.work_ready.notify_all();
        debug!("Worker pool resumed");
    }

    /// Whether the pool is paused.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.shared.state.lock().paused
    }

    /// Number of live, non-retiring workers.
    #[must_use]
    pub fn thread_count(&self) -> usize {
        self.shared
            .state
            .lock()
            .workers
            .values()
            .filter(|slot| !slot.retiring)
            .count()
    }

    /// Ids of live, non-retiring workers in ascending order.
    #[must_use]
    pub fn worker_ids(&self) -> Vec<WorkerId> {
        self.shared
            .state
            .lock()
            .workers
            .iter()
            .filter(|(_, slot)| !slot.retiring)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Grow or shrink the pool to `count` workers.
    ///
    /// Growing spawns workers with fresh ids. Shrinking retires the newest
    /// workers: each finishes its in-flight job, hands its local deque back
    /// to the shared heap, and exits. The call returns once every retired
    /// worker has been joined. Must not be called from a pool worker.
    ///
    /// # Errors
    ///
    /// - `CoreError::InvalidConfig` for `count == 0`
    /// - `CoreError::PoolShutdown` once shutdown has begun
    /// - `CoreError::WorkerSpawn` if a new worker cannot be started
    pub fn set_thread_count(&self, count: usize) -> Result<(), CoreError> {
        if count == 0 {
            return Err(CoreError::InvalidConfig(
                "thread count must be greater than 0".into(),
            ));
        }
        if self.shutdown.load(Ordering::Acquire) {
            return Err(CoreError::PoolShutdown);
        }

        let mut handles = self.handles.lock();
        let current = self.worker_ids();
        let previous = current.len();

        if count > previous {
            for _ in previous..count {
                let (id, handle) = self.spawn_worker()?;
                handles.insert(id, handle);
            }
        } else if count < previous {
            let retiring = &current[count..];
            {
                let mut state = self.shared.state.lock();
                for id in retiring {
                    if let Some(slot) = state.workers.get_mut(id) {
                        slot.retiring = true;
                    }
                }
            }
            self.shared.work_ready.notify_all();

            for id in retiring {
                if let Some(handle) = handles.remove(id) {
                    if handle.join().is_err() {
                        warn!(worker_id = *id, "Retired worker panicked");
                    }
                }
            }
        }

        info!(from = previous, to = count, "Worker pool resized");
        Ok(())
    }

    /// Block until no job is queued or running. Blocks indefinitely while the
    /// pool is paused with queued work. Must not be called from a pool worker.
    pub fn wait_for_all_tasks(&self) {
        let mut state = self.shared.state.lock();
        while !state.is_quiescent() {
            self.shared.idle.wait(&mut state);
        }
    }

    /// Like [`wait_for_all_tasks`](Self::wait_for_all_tasks) with a deadline.
    /// Returns `true` if the pool became quiescent in time.
    #[must_use]
    pub fn wait_for_all_tasks_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        while !state.is_quiescent() {
            if self.shared.idle.wait_until(&mut state, deadline).timed_out() {
                return state.is_quiescent();
            }
        }
        true
    }

    /// Discard every queued job; their handles resolve to `Cancelled`.
    /// Returns the number discarded.
    pub fn clear_pending_tasks(&self) -> usize {
        let discarded = {
            let mut state = self.shared.state.lock();
            let jobs = state.take_all();
            if state.is_quiescent() {
                self.shared.idle.notify_all();
            }
            jobs
        };
        let count = discarded.len();
        self.shared
            .counters
            .cancelled_tasks
            .fetch_add(count as u64, Ordering::Relaxed);
        drop(discarded);
        if count > 0 {
            info!(discarded = count, "Cleared pending tasks");
        }
        count
    }

    /// Remove queued jobs whose handles requested cancellation.
    /// Returns the number removed.
    pub fn purge_cancelled(&self) -> usize {
        let purged = {
            let mut state = self.shared.state.lock();
            let mut purged = state.global.prune(Job::is_cancelled);
            for slot in state.workers.values_mut() {
                let (cancelled, kept): (VecDeque<_>, VecDeque<_>) =
                    slot.local.drain(..).partition(Job::is_cancelled);
                slot.local = kept;
                purged.extend(cancelled);
            }
            state.pending -= purged.len();
            if state.is_quiescent() {
                self.shared.idle.notify_all();
            }
            purged
        };
        let count = purged.len();
        self.shared
            .counters
            .cancelled_tasks
            .fetch_add(count as u64, Ordering::Relaxed);
        count
    }

    /// Utilization snapshot.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn get_load_info(&self) -> LoadInfo {
        let mut info = LoadInfo::default();
        {
            let state = self.shared.state.lock();
            info.total_threads = state.workers.len();
            info.active_threads = state
                .workers
                .values()
                .filter(|slot| slot.state == WorkerState::Running)
                .count();
            info.pending_tasks = state.pending;
            info.local_queue_depths = state
                .workers
                .iter()
                .map(|(id, slot)| (*id, slot.local.len()))
                .collect();
            info.paused = state.paused;
        }
        info.idle_threads = info.total_threads - info.active_threads;
        info.cpu_usage = if info.total_threads == 0 {
            0.0
        } else {
            info.active_threads as f64 / info.total_threads as f64
        };
        self.shared.counters.fill(&mut info);
        info
    }

    /// Pool configuration.
    #[must_use]
    pub fn config(&self) -> &WorkerPoolConfig {
        &self.shared.config
    }

    /// Whether shutdown has begun.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Reject new work, let workers drain the queue, then join them.
    ///
    /// Each worker is given `shutdown_timeout`; workers that do not exit in
    /// time are detached.
    pub fn shutdown(&self) {
        self.stop(false);
    }

    /// Discard queued work, then shut down as [`shutdown`](Self::shutdown).
    pub fn shutdown_now(&self) {
        self.stop(true);
    }

    fn stop(&self, discard: bool) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        info!(discard = discard, "Shutting down worker pool");

        let discarded = {
            let mut state = self.shared.state.lock();
            state.mode = Mode::Draining;
            state.paused = false;
            if discard {
                state.take_all()
            } else {
                Vec::new()
            }
        };
        self.shared
            .counters
            .cancelled_tasks
            .fetch_add(discarded.len() as u64, Ordering::Relaxed);
        drop(discarded);
        self.shared.work_ready.notify_all();

        let timeout = self.shared.config.shutdown_timeout();
        let mut handles = self.handles.lock();
        let worker_count = handles.len();
        for (worker_id, handle) in handles.drain() {
            join_with_timeout(worker_id, handle, timeout);
        }

        info!(worker_count = worker_count, "Worker pool shut down complete");
    }
}

impl Drop for WorkStealingPool {
    fn drop(&mut self) {
        // Signal shutdown but do not join; explicit shutdown() joins.
        if !self.shutdown.swap(true, Ordering::AcqRel) {
            {
                let mut state = self.shared.state.lock();
                state.mode = Mode::Draining;
                state.paused = false;
            }
            self.shared.work_ready.notify_all();
            debug!("WorkStealingPool dropped without explicit shutdown - workers will be detached");
        }
    }
}

impl std::fmt::Debug for WorkStealingPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkStealingPool")
            .field("threads", &self.thread_count())
            .field("shutdown", &self.is_shutdown())
            .finish_non_exhaustive()
    }
}

fn join_with_timeout(worker_id: WorkerId, handle: JoinHandle<()>, timeout: Duration) {
    let (tx, rx) = crossbeam_channel::bounded(1);
    let joiner = thread::spawn(move || {
        let _ = tx.send(handle.join().is_ok());
    });

    match rx.recv_timeout(timeout) {
        Ok(true) => {
            debug!(worker_id = worker_id, "Worker joined successfully");
            let _ = joiner.join();
        }
        Ok(false) => {
            warn!(worker_id = worker_id, "Worker panicked");
            let _ = joiner.join();
        }
        Err(_) => {
            warn!(worker_id = worker_id, "Worker did not exit within timeout - detaching");
        }
    }
}

fn worker_loop(shared: &Arc<Shared>, id: WorkerId) {
    debug!(worker_id = id, "Worker thread started");

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!(worker_id = id, error = %e, "Failed to create worker runtime");
            retire(shared, id);
            return;
        }
    };

    CURRENT_WORKER.with(|current| current.set(Some((shared.uid, id))));
    let ctx = WorkerContext {
        worker_id: id,
        runtime: &runtime,
    };

    while let Some(job) = next_job(shared, id) {
        let started = Instant::now();
        job.run_with(&ctx, |status| shared.counters.record(status, started.elapsed()));

        let mut state = shared.state.lock();
        state.running -= 1;
        if let Some(slot) = state.workers.get_mut(&id) {
            slot.state = WorkerState::Idle;
        }
        if state.is_quiescent() {
            shared.idle.notify_all();
        }
    }

    CURRENT_WORKER.with(|current| current.set(None));
    debug!(worker_id = id, "Worker thread exiting");
}

/// Block until a job is available for worker `id`; `None` means exit.
fn next_job(shared: &Shared, id: WorkerId) -> Option<Job> {
    let mut state = shared.state.lock();
    loop {
        let retiring = state.workers.get(&id).is_none_or(|slot| slot.retiring);
        if retiring {
            drop(state);
            retire(shared, id);
            return None;
        }
        if !state.paused {
            if let Some((job, stolen)) = state.next_job(id) {
                state.pending -= 1;
                state.running += 1;
                if let Some(slot) = state.workers.get_mut(&id) {
                    slot.state = WorkerState::Running;
                }
                if stolen {
                    shared.counters.steals.fetch_add(1, Ordering::Relaxed);
                    debug!(worker_id = id, task_id = job.id(), "Stole task from sibling");
                }
                return Some(job);
            }
        }
        if state.mode == Mode::Draining && state.pending == 0 {
            state.workers.remove(&id);
            return None;
        }
        shared.work_ready.wait(&mut state);
    }
}

/// Remove worker `id`, returning its local deque to the shared heap.
fn retire(shared: &Shared, id: WorkerId) {
    let handed_back = {
        let mut state = shared.state.lock();
        let Some(slot) = state.workers.remove(&id) else {
            return;
        };
        let count = slot.local.len();
        for job in slot.local {
            let priority = job.priority();
            state.global.push(job, priority);
        }
        count
    };
    if handed_back > 0 {
        shared.work_ready.notify_all();
    }
    debug!(worker_id = id, handed_back = handed_back, "Worker retired");
}
