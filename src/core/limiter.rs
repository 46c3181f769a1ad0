//! Counting semaphore with FIFO hand-off.
//!
//! Permits are granted in arrival order: once anyone is waiting, new callers
//! queue behind them, and a release hands its permit straight to the oldest
//! waiter instead of returning it to the pool. Blocking waiters park on a
//! `Condvar`; async waiters register a `Waker`.

use std::collections::{HashSet, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::warn;

struct Waiter {
    ticket: u64,
    waker: Option<Waker>,
}

struct LimiterState {
    max: usize,
    current: usize,
    next_ticket: u64,
    waiters: VecDeque<Waiter>,
    /// Tickets that received a handed-off permit but have not claimed it yet.
    granted: HashSet<u64>,
}

impl LimiterState {
    fn can_take_fast(&self) -> bool {
        self.waiters.is_empty() && self.current < self.max
    }

    fn enqueue(&mut self, waker: Option<Waker>) -> u64 {
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        self.waiters.push_back(Waiter { ticket, waker });
        ticket
    }

    fn dequeue(&mut self, ticket: u64) {
        self.waiters.retain(|w| w.ticket != ticket);
    }

    /// Release one permit; returns the waker of the waiter it was handed to.
    fn release(&mut self) -> Option<Waker> {
        if let Some(next) = self.waiters.pop_front() {
            self.granted.insert(next.ticket);
            return next.waker;
        }
        if self.current == 0 {
            warn!("release without an outstanding permit ignored");
        } else {
            self.current -= 1;
        }
        None
    }
}

struct Inner {
    state: Mutex<LimiterState>,
    granted: Condvar,
}

/// Bounds how many operations run concurrently.
///
/// Cloning is cheap and yields a handle to the same semaphore.
/// Invariant: `0 <= current_permits() <= max_permits()`.
#[derive(Clone)]
pub struct ConcurrencyLimiter {
    inner: Arc<Inner>,
}

impl ConcurrencyLimiter {
    /// Limiter allowing `max_permits` concurrent holders (at least one).
    #[must_use]
    pub fn new(max_permits: usize) -> Self {
        if max_permits == 0 {
            warn!("concurrency limit of 0 raised to 1");
        }
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(LimiterState {
                    max: max_permits.max(1),
                    current: 0,
                    next_ticket: 0,
                    waiters: VecDeque::new(),
                    granted: HashSet::new(),
                }),
                granted: Condvar::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LimiterState> {
        self.inner.state.lock()
    }

    fn release_locked(&self, mut state: MutexGuard<'_, LimiterState>) {
        let waker = state.release();
        self.inner.granted.notify_all();
        drop(state);
        if let Some(waker) = waker {
            waker.wake();
        }
    }

    /// Take a permit if one is free and nobody is queued.
    #[must_use]
    pub fn try_acquire(&self) -> bool {
        let mut state = self.lock();
        if state.can_take_fast() {
            state.current += 1;
            true
        } else {
            false
        }
    }

    /// Block until a permit is held.
    pub fn acquire(&self) {
        let mut state = self.lock();
        if state.can_take_fast() {
            state.current += 1;
            return;
        }
        let ticket = state.enqueue(None);
        while !state.granted.remove(&ticket) {
            self.inner.granted.wait(&mut state);
        }
    }

    /// Block for at most `timeout`. A timed-out call leaves the count unchanged.
    #[must_use]
    pub fn acquire_for(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        if state.can_take_fast() {
            state.current += 1;
            return true;
        }
        let ticket = state.enqueue(None);
        loop {
            if state.granted.remove(&ticket) {
                return true;
            }
            if self.inner.granted.wait_until(&mut state, deadline).timed_out() {
                if state.granted.remove(&ticket) {
                    return true;
                }
                state.dequeue(ticket);
                return false;
            }
        }
    }

    /// Return a permit, handing it to the oldest waiter if there is one.
    pub fn release(&self) {
        let state = self.lock();
        self.release_locked(state);
    }

    /// Future resolving to a [`Permit`] without blocking a thread.
    #[must_use]
    pub fn acquire_permit(&self) -> AcquirePermit {
        AcquirePermit {
            limiter: self.clone(),
            ticket: None,
            done: false,
        }
    }

    /// Blocking acquire returning an RAII guard.
    #[must_use]
    pub fn scoped(&self) -> Permit {
        self.acquire();
        Permit::new(self.clone())
    }

    /// Non-blocking acquire returning an RAII guard.
    #[must_use]
    pub fn try_scoped(&self) -> Option<Permit> {
        self.try_acquire().then(|| Permit::new(self.clone()))
    }

    /// Timed acquire returning an RAII guard.
    #[must_use]
    pub fn scoped_for(&self, timeout: Duration) -> Option<Permit> {
        self.acquire_for(timeout).then(|| Permit::new(self.clone()))
    }

    /// Permits currently held, including ones handed off but not yet claimed.
    #[must_use]
    pub fn current_permits(&self) -> usize {
        self.lock().current
    }

    /// Permits that can be taken right now.
    #[must_use]
    pub fn available_permits(&self) -> usize {
        let state = self.lock();
        state.max - state.current
    }

    /// Configured limit.
    #[must_use]
    pub fn max_permits(&self) -> usize {
        self.lock().max
    }

    /// Callers queued for a permit.
    #[must_use]
    pub fn waiting_count(&self) -> usize {
        self.lock().waiters.len()
    }
}

impl std::fmt::Debug for ConcurrencyLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("ConcurrencyLimiter")
            .field("max", &state.max)
            .field("current", &state.current)
            .field("waiting", &state.waiters.len())
            .finish()
    }
}

/// Held permit; released when dropped, including during unwinding.
#[must_use = "dropping a Permit releases it immediately"]
pub struct Permit {
    limiter: ConcurrencyLimiter,
}

impl Permit {
    const fn new(limiter: ConcurrencyLimiter) -> Self {
        Self { limiter }
    }

    /// The limiter this permit belongs to.
    #[must_use]
    pub const fn limiter(&self) -> &ConcurrencyLimiter {
        &self.limiter
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        self.limiter.release();
    }
}

impl std::fmt::Debug for Permit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Permit").finish_non_exhaustive()
    }
}

/// Future returned by [`ConcurrencyLimiter::acquire_permit`].
///
/// Dropping it before completion leaves the queue, or passes on a permit
/// that was already handed to it.
pub struct AcquirePermit {
    limiter: ConcurrencyLimiter,
    ticket: Option<u64>,
    done: bool,
}

impl Future for AcquirePermit {
    type Output = Permit;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Permit> {
        let limiter = self.limiter.clone();
        let mut state = limiter.lock();
        match self.ticket {
            None => {
                if state.can_take_fast() {
                    state.current += 1;
                    drop(state);
                    self.done = true;
                    return Poll::Ready(Permit::new(limiter.clone()));
                }
                let ticket = state.enqueue(Some(cx.waker().clone()));
                drop(state);
                self.ticket = Some(ticket);
                Poll::Pending
            }
            Some(ticket) => {
                if state.granted.remove(&ticket) {
                    drop(state);
                    self.done = true;
                    return Poll::Ready(Permit::new(limiter.clone()));
                }
                if let Some(waiter) = state.waiters.iter_mut().find(|w| w.ticket == ticket) {
                    waiter.waker = Some(cx.waker().clone());
                }
                Poll::Pending
            }
        }
    }
}

impl Drop for AcquirePermit {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        if let Some(ticket) = self.ticket {
            let mut state = self.limiter.lock();
            if state.granted.remove(&ticket) {
                self.limiter.release_locked(state);
            } else {
                state.dequeue(ticket);
            }
        }
    }
}
