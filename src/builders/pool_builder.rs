//! Builders to construct pools, schedulers and memory components from configuration.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tracing::debug;

use crate::config::{MemoryConfig, SchedulerConfig, WorkerPoolConfig};
use crate::core::{AsyncScheduler, CoreError, WorkStealingPool};
use crate::memory::{ArenaAllocator, ObjectPool};

/// Validate `cfg` and start a pool.
///
/// # Errors
///
/// Returns `CoreError::InvalidConfig` or the pool's startup error.
pub fn build_pool(cfg: &WorkerPoolConfig) -> Result<WorkStealingPool, CoreError> {
    cfg.validate()
        .map_err(|e| CoreError::InvalidConfig(format!("pool config invalid: {e}")))?;
    WorkStealingPool::new(cfg.clone())
}

/// Validate `cfg` and start a scheduler.
///
/// # Errors
///
/// See [`build_pool`].
pub fn build_scheduler(cfg: &SchedulerConfig) -> Result<AsyncScheduler, CoreError> {
    cfg.validate()
        .map_err(|e| CoreError::InvalidConfig(format!("scheduler config invalid: {e}")))?;
    AsyncScheduler::new(cfg.clone())
}

/// Start one scheduler per named configuration. Already started schedulers
/// are shut down if a later one fails.
///
/// # Errors
///
/// Returns the first failure, prefixed with the scheduler's name.
pub fn build_schedulers(
    cfgs: &HashMap<String, SchedulerConfig>,
) -> Result<BTreeMap<String, Arc<AsyncScheduler>>, CoreError> {
    let mut schedulers = BTreeMap::new();
    for (name, cfg) in cfgs {
        match build_scheduler(cfg) {
            Ok(scheduler) => {
                debug!(name = %name, threads = cfg.pool.worker_count, "Built scheduler");
                schedulers.insert(name.clone(), Arc::new(scheduler));
            }
            Err(e) => {
                for scheduler in schedulers.values() {
                    scheduler.shutdown();
                }
                return Err(CoreError::InvalidConfig(format!("scheduler {name}: {e}")));
            }
        }
    }
    Ok(schedulers)
}

/// Validate `cfg` and reserve an arena of `pool_size_bytes`.
///
/// # Errors
///
/// Returns `CoreError::InvalidConfig` for an invalid configuration.
pub fn build_arena(cfg: &MemoryConfig) -> Result<ArenaAllocator, CoreError> {
    cfg.validate()
        .map_err(|e| CoreError::InvalidConfig(format!("memory config invalid: {e}")))?;
    Ok(ArenaAllocator::new(cfg.pool_size_bytes))
}

/// Object pool sized by `cfg`, building objects with `factory`.
///
/// # Errors
///
/// Returns `CoreError::InvalidConfig` for an invalid configuration.
pub fn build_object_pool<T, F>(cfg: &MemoryConfig, factory: F) -> Result<ObjectPool<T>, CoreError>
where
    T: Send + 'static,
    F: Fn() -> T + Send + Sync + 'static,
{
    cfg.validate()
        .map_err(|e| CoreError::InvalidConfig(format!("memory config invalid: {e}")))?;
    Ok(ObjectPool::with_factory(
        cfg.object_pool_initial_size,
        cfg.object_pool_max_size,
        factory,
    ))
}
