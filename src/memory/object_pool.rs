//! Reusable-object cache.
//!
//! Objects are either resident (owned by the pool) or checked out (owned by
//! the caller). Ownership moves on `acquire`/`release`, so an object cannot
//! be released twice. Resident objects never exceed `max_size`; surplus
//! releases are dropped.

use std::collections::{HashMap, VecDeque};
use std::hash::BuildHasher;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Restore an object to a reusable state before it goes back into a pool.
pub trait Reset {
    /// Clear per-use state, keeping allocations where possible.
    fn reset(&mut self);
}

impl<T> Reset for Vec<T> {
    fn reset(&mut self) {
        self.clear();
    }
}

impl<T> Reset for VecDeque<T> {
    fn reset(&mut self) {
        self.clear();
    }
}

impl Reset for String {
    fn reset(&mut self) {
        self.clear();
    }
}

impl<K, V, S: BuildHasher> Reset for HashMap<K, V, S> {
    fn reset(&mut self) {
        self.clear();
    }
}

/// Object pool statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    /// Resident cap.
    pub capacity: usize,
    /// Objects currently resident.
    pub available: usize,
    /// Objects currently checked out.
    pub checked_out: u64,
    /// Objects ever constructed.
    pub total_allocated: u64,
    /// Objects ever handed out.
    pub total_acquired: u64,
    /// Objects returned and kept.
    pub total_released: u64,
    /// Objects returned while the pool was full.
    pub total_discarded: u64,
}

/// Maintenance operations shared by every pool regardless of element type.
pub trait PoolMaintenance: Send + Sync {
    /// Drop resident objects beyond `keep`. Returns the number dropped.
    fn trim(&self, keep: usize) -> usize;
    /// Statistics snapshot.
    fn pool_stats(&self) -> PoolStats;
    /// Element type name, for logs.
    fn element_type(&self) -> &'static str;
}

type Factory<T> = Box<dyn Fn() -> T + Send + Sync>;
type ResetHook<T> = Box<dyn Fn(&mut T) + Send + Sync>;

/// Bounded cache of reusable `T`s.
pub struct ObjectPool<T> {
    objects: Mutex<Vec<T>>,
    max_size: usize,
    factory: Factory<T>,
    reset: Option<ResetHook<T>>,
    allocated: AtomicU64,
    acquired: AtomicU64,
    released: AtomicU64,
    discarded: AtomicU64,
}

impl<T: Default + Send + 'static> ObjectPool<T> {
    /// Pool of `T::default()` objects, `initial_size` of them pre-built.
    #[must_use]
    pub fn new(initial_size: usize, max_size: usize) -> Self {
        Self::with_factory(initial_size, max_size, T::default)
    }
}

impl<T: Default + Reset + Send + 'static> ObjectPool<T> {
    /// Like [`new`](Self::new), resetting objects as they are returned.
    #[must_use]
    pub fn resettable(initial_size: usize, max_size: usize) -> Self {
        Self::new(initial_size, max_size).with_reset(T::reset)
    }
}

impl<T: Send + 'static> ObjectPool<T> {
    /// Pool building objects with `factory`.
    pub fn with_factory<F>(initial_size: usize, max_size: usize, factory: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        let pool = Self {
            objects: Mutex::new(Vec::with_capacity(initial_size.min(max_size))),
            max_size,
            factory: Box::new(factory),
            reset: None,
            allocated: AtomicU64::new(0),
            acquired: AtomicU64::new(0),
            released: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
        };
        pool.preallocate(initial_size);
        pool
    }

    /// Install a hook run on every object kept by [`release`](Self::release).
    #[must_use]
    pub fn with_reset<R>(mut self, reset: R) -> Self
    where
        R: Fn(&mut T) + Send + Sync + 'static,
    {
        self.reset = Some(Box::new(reset));
        self
    }

    fn build(&self) -> T {
        self.allocated.fetch_add(1, Ordering::Relaxed);
        (self.factory)()
    }

    /// Take a resident object, or build one if none is resident.
    pub fn acquire(&self) -> T {
        self.acquired.fetch_add(1, Ordering::Relaxed);
        let resident = self.objects.lock().pop();
        resident.unwrap_or_else(|| self.build())
    }

    /// Return an object. Returns `false` if the pool was full and the object
    /// was dropped. Only kept objects go through the reset hook.
    pub fn release(&self, mut obj: T) -> bool {
        if self.objects.lock().len() >= self.max_size {
            return self.discard(obj);
        }
        if let Some(reset) = &self.reset {
            reset(&mut obj);
        }
        let mut objects = self.objects.lock();
        if objects.len() >= self.max_size {
            drop(objects);
            return self.discard(obj);
        }
        objects.push(obj);
        drop(objects);
        self.released.fetch_add(1, Ordering::Relaxed);
        true
    }

    fn discard(&self, obj: T) -> bool {
        drop(obj);
        self.discarded.fetch_add(1, Ordering::Relaxed);
        false
    }

    /// Acquire an object that returns itself to the pool on drop.
    pub fn acquire_guard(&self) -> PooledObject<'_, T> {
        PooledObject {
            pool: self,
            obj: Some(self.acquire()),
        }
    }

    /// Resident cap.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.max_size
    }

    /// Objects currently resident.
    #[must_use]
    pub fn available(&self) -> usize {
        self.objects.lock().len()
    }

    /// Statistics snapshot.
    #[must_use]
    pub fn get_stats(&self) -> PoolStats {
        let acquired = self.acquired.load(Ordering::Relaxed);
        let released = self.released.load(Ordering::Relaxed);
        let discarded = self.discarded.load(Ordering::Relaxed);
        PoolStats {
            capacity: self.max_size,
            available: self.available(),
            checked_out: acquired.saturating_sub(released + discarded),
            total_allocated: self.allocated.load(Ordering::Relaxed),
            total_acquired: acquired,
            total_released: released,
            total_discarded: discarded,
        }
    }

    /// Build up to `count` resident objects, stopping at the cap. Returns the
    /// number added.
    pub fn preallocate(&self, count: usize) -> usize {
        let room = self.max_size.saturating_sub(self.available());
        let fresh: Vec<T> = (0..count.min(room)).map(|_| self.build()).collect();
        let mut objects = self.objects.lock();
        let room = self.max_size.saturating_sub(objects.len());
        let added = fresh.len().min(room);
        objects.extend(fresh.into_iter().take(added));
        added
    }

    /// Drop every resident object. Returns the number dropped.
    pub fn clear(&self) -> usize {
        let drained = std::mem::take(&mut *self.objects.lock());
        drained.len()
    }
}

impl<T: Send + 'static> PoolMaintenance for ObjectPool<T> {
    fn trim(&self, keep: usize) -> usize {
        let surplus = {
            let mut objects = self.objects.lock();
            let keep = keep.min(objects.len());
            objects.split_off(keep)
        };
        surplus.len()
    }

    fn pool_stats(&self) -> PoolStats {
        self.get_stats()
    }

    fn element_type(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

impl<T> std::fmt::Debug for ObjectPool<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectPool")
            .field("type", &std::any::type_name::<T>())
            .field("max_size", &self.max_size)
            .field("resident", &self.objects.lock().len())
            .finish()
    }
}

/// Pooled object that returns itself on drop.
pub struct PooledObject<'a, T: Send + 'static> {
    pool: &'a ObjectPool<T>,
    obj: Option<T>,
}

impl<T: Send + 'static> PooledObject<'_, T> {
    /// Take the object out of the guard; it will not return to the pool.
    #[must_use]
    pub fn detach(mut self) -> T {
        // Only `Drop` empties the slot.
        match self.obj.take() {
            Some(obj) => obj,
            None => unreachable!("pooled object already taken"),
        }
    }
}

impl<T: Send + 'static> Deref for PooledObject<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        match &self.obj {
            Some(obj) => obj,
            None => unreachable!("pooled object already taken"),
        }
    }
}

impl<T: Send + 'static> DerefMut for PooledObject<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        match &mut self.obj {
            Some(obj) => obj,
            None => unreachable!("pooled object already taken"),
        }
    }
}

impl<T: Send + 'static> Drop for PooledObject<'_, T> {
    fn drop(&mut self) {
        if let Some(obj) = self.obj.take() {
            self.pool.release(obj);
        }
    }
}
