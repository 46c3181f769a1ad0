//! Task handles, completion slots and cooperative cancellation.
//!
//! A submitted job owns a [`Completer`]; the caller owns the matching
//! [`TaskHandle`]. Both point at one shared slot guarded by a
//! `parking_lot::Mutex`:
//!
//! - blocking waiters park on the slot's `Condvar` (no polling)
//! - async waiters register a `Waker` that the completer wakes
//!
//! The slot is resolved at most once. A completer dropped without resolving
//! (job discarded, pool torn down) resolves the task as `Cancelled`.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};

use super::error::{ErrorCode, TaskError};
use super::outcome::Outcome;
use crate::util::serde::{Priority, TaskId};

/// Lifecycle of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Queued, not yet picked up by a worker.
    Pending,
    /// A worker is executing the job.
    Running,
    /// Resolved with a value.
    Completed,
    /// Resolved with an error.
    Failed,
    /// Resolved without running, or aborted through its cancel token.
    Cancelled,
}

impl TaskState {
    /// `true` once the task has been resolved.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Timing and scheduling data attached to every task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskMetadata {
    /// Unique id assigned at submission.
    pub id: TaskId,
    /// Queue priority.
    pub priority: Priority,
    /// Submission time.
    pub created_at: Instant,
    /// Time a worker began executing the job.
    pub started_at: Option<Instant>,
    /// Time the task was resolved.
    pub completed_at: Option<Instant>,
    /// Deadline requested by the caller, if any.
    pub timeout: Option<Duration>,
}

impl TaskMetadata {
    /// Fresh metadata stamped with the current time.
    #[must_use]
    pub fn new(id: TaskId, priority: Priority) -> Self {
        Self {
            id,
            priority,
            created_at: Instant::now(),
            started_at: None,
            completed_at: None,
            timeout: None,
        }
    }

    /// Time between start and completion, once both are known.
    #[must_use]
    pub fn run_duration(&self) -> Option<Duration> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some(end.saturating_duration_since(start)),
            _ => None,
        }
    }
}

/// Cooperative cancellation flag shared by a handle and its job.
///
/// Cancelling never interrupts a running closure; queued jobs observe the
/// flag and are skipped, running closures may poll [`is_cancelled`](Self::is_cancelled).
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    /// New, not-cancelled token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Whether cancellation was signalled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

struct Slot<T> {
    state: TaskState,
    result: Option<Result<T, TaskError>>,
    waker: Option<Waker>,
    meta: TaskMetadata,
}

struct Shared<T> {
    slot: Mutex<Slot<T>>,
    ready: Condvar,
}

impl<T> Shared<T> {
    fn resolve(&self, result: Result<T, TaskError>) -> bool {
        let waker = {
            let mut slot = self.slot.lock();
            if slot.state.is_terminal() {
                return false;
            }
            slot.state = match &result {
                Ok(_) => TaskState::Completed,
                Err(err) if err.code() == ErrorCode::Cancelled => TaskState::Cancelled,
                Err(_) => TaskState::Failed,
            };
            slot.meta.completed_at = Some(Instant::now());
            slot.result = Some(result);
            self.ready.notify_all();
            slot.waker.take()
        };
        if let Some(waker) = waker {
            waker.wake();
        }
        true
    }
}

/// Create a linked completer/handle pair for a new task.
#[must_use]
pub fn task_pair<T>(meta: TaskMetadata) -> (Completer<T>, TaskHandle<T>) {
    let shared = Arc::new(Shared {
        slot: Mutex::new(Slot {
            state: TaskState::Pending,
            result: None,
            waker: None,
            meta,
        }),
        ready: Condvar::new(),
    });
    let cancel = CancelToken::new();
    (
        Completer {
            shared: Some(Arc::clone(&shared)),
            cancel: cancel.clone(),
        },
        TaskHandle { shared, cancel },
    )
}

/// Producer side of a task slot, owned by the queued job.
pub struct Completer<T> {
    shared: Option<Arc<Shared<T>>>,
    cancel: CancelToken,
}

impl<T> Completer<T> {
    /// Task id.
    #[must_use]
    pub fn id(&self) -> TaskId {
        self.shared.as_ref().map_or(0, |s| s.slot.lock().meta.id)
    }

    /// Token shared with the handle.
    #[must_use]
    pub const fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Whether the handle side requested cancellation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Transition `Pending -> Running` and stamp the start time.
    pub fn mark_running(&self) {
        if let Some(shared) = &self.shared {
            let mut slot = shared.slot.lock();
            if slot.state == TaskState::Pending {
                slot.state = TaskState::Running;
                slot.meta.started_at = Some(Instant::now());
            }
        }
    }

    /// Resolve the task and wake every waiter.
    pub fn complete(mut self, result: Result<T, TaskError>) {
        if let Some(shared) = self.shared.take() {
            shared.resolve(result);
        }
    }

    /// Resolve as `Cancelled` without running.
    pub fn cancel(self, reason: &str) {
        self.complete(Err(TaskError::cancelled(reason)));
    }
}

impl<T> Drop for Completer<T> {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.take() {
            shared.resolve(Err(TaskError::cancelled("task dropped before completion")));
        }
    }
}

/// Consumer side of a task: awaitable or blockingly waitable.
///
/// Dropping a handle abandons the result; the job still runs unless
/// [`cancel`](Self::cancel) was called first.
pub struct TaskHandle<T> {
    shared: Arc<Shared<T>>,
    cancel: CancelToken,
}

impl<T> TaskHandle<T> {
    /// Task id.
    #[must_use]
    pub fn id(&self) -> TaskId {
        self.shared.slot.lock().meta.id
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> TaskState {
        self.shared.slot.lock().state
    }

    /// `true` once the task has been resolved.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state().is_terminal()
    }

    /// Snapshot of the task's metadata.
    #[must_use]
    pub fn metadata(&self) -> TaskMetadata {
        self.shared.slot.lock().meta
    }

    /// Request cooperative cancellation.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Token shared with the job.
    #[must_use]
    pub const fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Block until resolved and return the value or the captured error.
    ///
    /// # Errors
    ///
    /// Returns the task's error, including panics captured as `InternalError`
    /// and `Cancelled` for discarded jobs.
    pub fn get(self) -> Result<T, TaskError> {
        let mut slot = self.shared.slot.lock();
        loop {
            if let Some(result) = slot.result.take() {
                return result;
            }
            if slot.state.is_terminal() {
                return Err(already_taken());
            }
            self.shared.ready.wait(&mut slot);
        }
    }

    /// Block for at most `timeout`. `Ok(None)` means the deadline passed first;
    /// the handle stays usable.
    ///
    /// # Errors
    ///
    /// Returns the task's error if it resolved unsuccessfully in time.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<Option<T>, TaskError> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.shared.slot.lock();
        loop {
            if let Some(result) = slot.result.take() {
                return result.map(Some);
            }
            if slot.state.is_terminal() {
                return Err(already_taken());
            }
            if self.shared.ready.wait_until(&mut slot, deadline).timed_out() {
                return match slot.result.take() {
                    Some(result) => result.map(Some),
                    None => Ok(None),
                };
            }
        }
    }

    /// Blocking [`get`](Self::get) converted into an [`Outcome`].
    pub fn outcome(self) -> Outcome<T> {
        self.get().into()
    }

    /// Await the task for at most `timeout`. On expiry the cancel token is
    /// signalled and `Ok(None)` returned.
    ///
    /// # Errors
    ///
    /// Returns the task's error if it resolved unsuccessfully in time.
    pub async fn timeout(mut self, timeout: Duration) -> Result<Option<T>, TaskError> {
        match tokio::time::timeout(timeout, &mut self).await {
            Ok(result) => result.map(Some),
            Err(_) => {
                self.cancel.cancel();
                Ok(None)
            }
        }
    }
}

impl<T> Future for TaskHandle<T> {
    type Output = Result<T, TaskError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut slot = self.shared.slot.lock();
        if let Some(result) = slot.result.take() {
            return Poll::Ready(result);
        }
        if slot.state.is_terminal() {
            return Poll::Ready(Err(already_taken()));
        }
        match &mut slot.waker {
            Some(waker) if waker.will_wake(cx.waker()) => {}
            waker => *waker = Some(cx.waker().clone()),
        }
        Poll::Pending
    }
}

impl<T> std::fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let slot = self.shared.slot.lock();
        f.debug_struct("TaskHandle")
            .field("id", &slot.meta.id)
            .field("state", &slot.state)
            .finish_non_exhaustive()
    }
}

fn already_taken() -> TaskError {
    TaskError::new(ErrorCode::InternalError, "task result already taken")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn pair<T>(id: TaskId) -> (Completer<T>, TaskHandle<T>) {
        task_pair(TaskMetadata::new(id, Priority::Normal))
    }

    #[test]
    fn test_complete_wakes_blocking_waiter() {
        let (completer, handle) = pair::<u32>(1);
        assert_eq!(handle.state(), TaskState::Pending);

        let producer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            completer.mark_running();
            completer.complete(Ok(42));
        });

        assert_eq!(handle.get().unwrap(), 42);
        producer.join().unwrap();
    }

    #[test]
    fn test_state_and_metadata_transitions() {
        let (completer, handle) = pair::<()>(7);
        completer.mark_running();
        assert_eq!(handle.state(), TaskState::Running);
        assert!(handle.metadata().started_at.is_some());

        completer.complete(Err(TaskError::new(ErrorCode::InferenceFailed, "nan logits")));
        assert_eq!(handle.state(), TaskState::Failed);
        assert!(handle.is_ready());
        let meta = handle.metadata();
        assert_eq!(meta.id, 7);
        assert!(meta.run_duration().is_some());
        assert_eq!(handle.get().unwrap_err().code(), ErrorCode::InferenceFailed);
    }

    #[test]
    fn test_dropped_completer_resolves_cancelled() {
        let (completer, handle) = pair::<String>(3);
        drop(completer);
        assert_eq!(handle.state(), TaskState::Cancelled);
        assert_eq!(handle.get().unwrap_err().code(), ErrorCode::Cancelled);
    }

    #[test]
    fn test_wait_timeout_keeps_handle_usable() {
        let (completer, handle) = pair::<u8>(4);
        assert_eq!(handle.wait_timeout(Duration::from_millis(10)).unwrap(), None);
        assert!(!handle.cancel_token().is_cancelled());
        completer.complete(Ok(9));
        assert_eq!(handle.wait_timeout(Duration::from_millis(10)).unwrap(), Some(9));
    }

    #[test]
    fn test_cancel_is_visible_to_completer() {
        let (completer, handle) = pair::<u8>(5);
        handle.cancel();
        assert!(completer.is_cancelled());
    }

    #[test]
    fn test_future_resolves_without_runtime() {
        let (completer, handle) = pair::<i64>(6);
        let producer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            completer.complete(Ok(-5));
        });
        assert_eq!(futures::executor::block_on(handle).unwrap(), -5);
        producer.join().unwrap();
    }

    #[tokio::test]
    async fn test_async_timeout_signals_cancel() {
        let (completer, handle) = pair::<u8>(8);
        let token = handle.cancel_token().clone();
        assert_eq!(handle.timeout(Duration::from_millis(10)).await.unwrap(), None);
        assert!(token.is_cancelled());
        assert!(completer.is_cancelled());
    }

    #[test]
    fn test_resolve_is_at_most_once() {
        let (completer, handle) = pair::<u8>(9);
        let shared = Arc::clone(&handle.shared);
        completer.complete(Ok(1));
        assert!(!shared.resolve(Ok(2)));
        assert_eq!(handle.get().unwrap(), 1);
    }
}
