//! Combined scheduling and memory context.
//!
//! A [`CoreContext`] owns one [`SchedulerManager`] and one [`MemoryManager`]
//! and is the usual entry point for applications. Contexts are independent:
//! several may coexist in one process, each with its own threads and arena.
//!
//! ```rust,ignore
//! use std::collections::HashMap;
//! use prometheus_scheduler::runtime::CoreContext;
//!
//! let ctx = CoreContext::new();
//! ctx.initialize(&HashMap::from([("thread_count".into(), "4".into())]))?;
//! let answer = ctx.submit(|| 6 * 7)?.get()?;
//! let block = ctx.allocate(256, 64).expect("arena has room");
//! ctx.deallocate(block);
//! ctx.shutdown();
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use super::memory_manager::MemoryManager;
use super::scheduler_manager::SchedulerManager;
use crate::config::map::log_unknown_keys;
use crate::core::error::CoreError;
use crate::core::task::TaskHandle;
use crate::memory::Allocation;
use crate::util::serde::Priority;

/// Owner of a scheduler manager and a memory manager.
#[derive(Debug, Default)]
pub struct CoreContext {
    schedulers: Arc<SchedulerManager>,
    memory: Arc<MemoryManager>,
}

impl CoreContext {
    /// Uninitialized context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Context over existing managers, for callers that share them.
    #[must_use]
    pub const fn from_managers(
        schedulers: Arc<SchedulerManager>,
        memory: Arc<MemoryManager>,
    ) -> Self {
        Self { schedulers, memory }
    }

    /// Initialize memory first, then scheduling. Unknown keys are logged and
    /// ignored. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns the first manager's initialization error. If scheduling fails
    /// and this call started the memory manager, it is shut down again.
    pub fn initialize(&self, config: &HashMap<String, String>) -> Result<(), CoreError> {
        log_unknown_keys(config);
        let memory_was_running = self.memory.is_initialized();
        self.memory.initialize(config)?;
        if let Err(e) = self.schedulers.initialize(config) {
            if !memory_was_running {
                self.memory.shutdown();
            }
            return Err(e);
        }
        info!("CoreContext initialized");
        Ok(())
    }

    /// Stop scheduling, then release memory. Idempotent.
    pub fn shutdown(&self) {
        self.schedulers.shutdown_all();
        self.memory.shutdown();
        info!("CoreContext shut down");
    }

    /// Whether both managers are initialized.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.schedulers.is_initialized() && self.memory.is_initialized()
    }

    /// Scheduler manager.
    #[must_use]
    pub const fn schedulers(&self) -> &Arc<SchedulerManager> {
        &self.schedulers
    }

    /// Memory manager.
    #[must_use]
    pub const fn memory(&self) -> &Arc<MemoryManager> {
        &self.memory
    }

    /// Run `f` on the default scheduler at `Normal` priority.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotInitialized` before `initialize`, or the pool's
    /// rejection.
    pub fn submit<T, F>(&self, f: F) -> Result<TaskHandle<T>, CoreError>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        self.schedulers.default_scheduler()?.schedule(f)
    }

    /// Run `f` on the default scheduler at `priority`.
    ///
    /// # Errors
    ///
    /// See [`submit`](Self::submit).
    pub fn submit_with_priority<T, F>(
        &self,
        priority: Priority,
        f: F,
    ) -> Result<TaskHandle<T>, CoreError>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        self.schedulers
            .default_scheduler()?
            .schedule_with_priority(priority, f)
    }

    /// Allocate from the context's arena.
    #[must_use]
    pub fn allocate(&self, size: usize, alignment: usize) -> Option<Allocation> {
        self.memory.allocate(size, alignment)
    }

    /// Return an allocation to the context's arena.
    pub fn deallocate(&self, allocation: Allocation) -> bool {
        self.memory.deallocate(allocation)
    }

    /// Take a `T` from the context's pool for `T`.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotInitialized` before `initialize`.
    pub fn acquire<T>(&self) -> Result<T, CoreError>
    where
        T: Default + Send + 'static,
    {
        self.memory.acquire()
    }

    /// Return a `T` to the context's pool for `T`.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotInitialized` before `initialize`.
    pub fn release<T>(&self, obj: T) -> Result<bool, CoreError>
    where
        T: Default + Send + 'static,
    {
        self.memory.release(obj)
    }
}

impl Drop for CoreContext {
    fn drop(&mut self) {
        // Shared managers outlive this context.
        if Arc::strong_count(&self.schedulers) == 1 {
            self.schedulers.shutdown_all();
        }
        if Arc::strong_count(&self.memory) == 1 {
            self.memory.shutdown();
        }
    }
}
