//! Owner of the default scheduler and any named dedicated schedulers.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::SchedulerConfig;
use crate::core::error::CoreError;
use crate::core::scheduler::AsyncScheduler;
use crate::core::worker_pool::LoadInfo;

/// Key of the default scheduler in [`SchedulerStats::schedulers`].
pub const DEFAULT_SCHEDULER_NAME: &str = "default";

/// Aggregated load over every scheduler a manager owns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchedulerStats {
    /// Per-scheduler snapshots, keyed by name.
    pub schedulers: BTreeMap<String, LoadInfo>,
    /// Sum of live worker threads.
    pub total_threads: usize,
    /// Sum of busy worker threads.
    pub active_threads: usize,
    /// Sum of queued jobs.
    pub pending_tasks: usize,
    /// Sum of completed jobs.
    pub completed_tasks: u64,
    /// Sum of failed jobs.
    pub failed_tasks: u64,
    /// Sum of cancelled jobs.
    pub cancelled_tasks: u64,
}

impl SchedulerStats {
    fn absorb(&mut self, name: &str, info: LoadInfo) {
        self.total_threads += info.total_threads;
        self.active_threads += info.active_threads;
        self.pending_tasks += info.pending_tasks;
        self.completed_tasks += info.completed_tasks;
        self.failed_tasks += info.failed_tasks;
        self.cancelled_tasks += info.cancelled_tasks;
        self.schedulers.insert(name.to_owned(), info);
    }
}

struct Schedulers {
    config: SchedulerConfig,
    default: Arc<AsyncScheduler>,
    dedicated: BTreeMap<String, Arc<AsyncScheduler>>,
}

/// Lifecycle owner for schedulers. Construct one per context.
#[derive(Default)]
pub struct SchedulerManager {
    inner: RwLock<Option<Schedulers>>,
}

impl SchedulerManager {
    /// Uninitialized manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start the default scheduler from a flat configuration map. A second
    /// call is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidConfig` for bad values, or the pool's
    /// startup error.
    pub fn initialize(&self, config: &HashMap<String, String>) -> Result<(), CoreError> {
        if self.is_initialized() {
            debug!("SchedulerManager already initialized");
            return Ok(());
        }
        self.initialize_with(SchedulerConfig::from_map(config)?)
    }

    /// Start the default scheduler from a parsed configuration. A second call
    /// is a no-op.
    ///
    /// # Errors
    ///
    /// See [`initialize`](Self::initialize).
    pub fn initialize_with(&self, config: SchedulerConfig) -> Result<(), CoreError> {
        let mut inner = self.inner.write();
        if inner.is_some() {
            return Ok(());
        }
        let default = Arc::new(AsyncScheduler::new(config.clone())?);
        info!(threads = config.pool.worker_count, "SchedulerManager initialized");
        *inner = Some(Schedulers {
            config,
            default,
            dedicated: BTreeMap::new(),
        });
        Ok(())
    }

    /// Whether the default scheduler is running.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.inner.read().is_some()
    }

    /// The default scheduler.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotInitialized` before `initialize`.
    pub fn default_scheduler(&self) -> Result<Arc<AsyncScheduler>, CoreError> {
        self.inner
            .read()
            .as_ref()
            .map(|s| Arc::clone(&s.default))
            .ok_or(CoreError::NotInitialized("scheduler manager"))
    }

    /// Start a scheduler named `name` over `threads` workers, `0` meaning
    /// the default thread count. An existing scheduler of that name is
    /// returned unchanged.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotInitialized` before `initialize`, or the pool's
    /// startup error.
    pub fn create_dedicated_scheduler(
        &self,
        name: &str,
        threads: usize,
    ) -> Result<Arc<AsyncScheduler>, CoreError> {
        let mut inner = self.inner.write();
        let inner = inner
            .as_mut()
            .ok_or(CoreError::NotInitialized("scheduler manager"))?;
        if let Some(existing) = inner.dedicated.get(name) {
            debug!(name = %name, "Dedicated scheduler already exists");
            return Ok(Arc::clone(existing));
        }

        let mut config = inner.config.clone();
        if threads > 0 {
            config.pool.worker_count = threads;
            config.max_concurrency = threads * 2;
        }
        config.pool.thread_name_prefix = format!("{}-{name}", config.pool.thread_name_prefix);
        let scheduler = Arc::new(AsyncScheduler::new(config)?);
        info!(
            name = %name,
            threads = scheduler.pool().thread_count(),
            "Dedicated scheduler created"
        );
        inner.dedicated.insert(name.to_owned(), Arc::clone(&scheduler));
        Ok(scheduler)
    }

    /// Look up a dedicated scheduler.
    #[must_use]
    pub fn dedicated_scheduler(&self, name: &str) -> Option<Arc<AsyncScheduler>> {
        self.inner
            .read()
            .as_ref()
            .and_then(|s| s.dedicated.get(name).cloned())
    }

    /// Drain, stop and forget a dedicated scheduler. Returns whether it
    /// existed.
    pub fn remove_dedicated_scheduler(&self, name: &str) -> bool {
        let removed = self
            .inner
            .write()
            .as_mut()
            .and_then(|s| s.dedicated.remove(name));
        removed.is_some_and(|scheduler| {
            scheduler.shutdown();
            true
        })
    }

    /// Drain and stop every scheduler. The manager can be initialized again
    /// afterwards.
    pub fn shutdown_all(&self) {
        let Some(schedulers) = self.inner.write().take() else {
            return;
        };
        for (name, scheduler) in &schedulers.dedicated {
            debug!(name = %name, "Stopping dedicated scheduler");
            scheduler.shutdown();
        }
        schedulers.default.shutdown();
        info!(dedicated = schedulers.dedicated.len(), "All schedulers shut down");
    }

    /// Load across every owned scheduler; empty when uninitialized.
    #[must_use]
    pub fn get_global_stats(&self) -> SchedulerStats {
        let mut stats = SchedulerStats::default();
        if let Some(schedulers) = self.inner.read().as_ref() {
            stats.absorb(DEFAULT_SCHEDULER_NAME, schedulers.default.get_scheduler_stats());
            for (name, scheduler) in &schedulers.dedicated {
                stats.absorb(name, scheduler.get_scheduler_stats());
            }
        }
        stats
    }
}

impl std::fmt::Debug for SchedulerManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("SchedulerManager")
            .field("initialized", &inner.is_some())
            .field(
                "dedicated",
                &inner.as_ref().map_or(0, |s| s.dedicated.len()),
            )
            .finish()
    }
}
