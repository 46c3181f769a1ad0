//! Lifecycle owner of the arena and the typed object pools.

use std::any::{Any, TypeId};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::config::MemoryConfig;
use crate::core::error::CoreError;
use crate::memory::{
    Allocation, ArenaAllocator, MemoryStats, ObjectPool, PoolMaintenance, PoolStats, Reset,
};

/// Fragmentation above which memory is reported unhealthy.
pub const HEALTHY_FRAGMENTATION_LIMIT: f64 = 0.5;

struct PoolEntry {
    any: Arc<dyn Any + Send + Sync>,
    maintenance: Arc<dyn PoolMaintenance>,
}

struct MemoryState {
    config: MemoryConfig,
    allocator: Arc<ArenaAllocator>,
    pools: HashMap<TypeId, PoolEntry>,
}

/// Owns the arena allocator and one object pool per element type.
///
/// Construct one per context and share it through `Arc`; nothing is global.
#[derive(Default)]
pub struct MemoryManager {
    state: RwLock<Option<MemoryState>>,
    config_map: RwLock<HashMap<String, String>>,
}

impl MemoryManager {
    /// Uninitialized manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `config` and build the arena. A second call is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidConfig` for unparseable or invalid values.
    pub fn initialize(&self, config: &HashMap<String, String>) -> Result<(), CoreError> {
        if self.is_initialized() {
            debug!("MemoryManager already initialized");
            return Ok(());
        }
        let parsed = MemoryConfig::from_map(config)?;
        *self.config_map.write() = config.clone();
        self.initialize_with(parsed)
    }

    /// Build the arena from an already parsed configuration. A second call is
    /// a no-op.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidConfig` if `config` fails validation.
    pub fn initialize_with(&self, config: MemoryConfig) -> Result<(), CoreError> {
        config.validate().map_err(CoreError::InvalidConfig)?;
        let mut state = self.state.write();
        if state.is_some() {
            return Ok(());
        }
        info!(
            pool_size = config.pool_size_bytes,
            object_pool_max_size = config.object_pool_max_size,
            "MemoryManager initialized"
        );
        *state = Some(MemoryState {
            allocator: Arc::new(ArenaAllocator::new(config.pool_size_bytes)),
            config,
            pools: HashMap::new(),
        });
        Ok(())
    }

    /// Release the arena and every pool. Outstanding allocations become
    /// invalid. A no-op when not initialized.
    pub fn shutdown(&self) {
        let Some(state) = self.state.write().take() else {
            return;
        };
        let stats = state.allocator.get_stats();
        if state.allocator.live_allocations() > 0 {
            warn!(
                live = state.allocator.live_allocations(),
                bytes = stats.current_usage,
                "MemoryManager shut down with live allocations"
            );
        }
        info!(
            peak_usage = stats.peak_usage,
            allocations = stats.allocation_count,
            pools = state.pools.len(),
            "MemoryManager shut down"
        );
    }

    /// Whether [`initialize`](Self::initialize) has run.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.state.read().is_some()
    }

    /// The arena.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotInitialized` before `initialize`.
    pub fn allocator(&self) -> Result<Arc<ArenaAllocator>, CoreError> {
        self.state
            .read()
            .as_ref()
            .map(|state| Arc::clone(&state.allocator))
            .ok_or(CoreError::NotInitialized("memory manager"))
    }

    /// Allocate from the arena. `None` when uninitialized, on invalid
    /// arguments, or on exhaustion.
    #[must_use]
    pub fn allocate(&self, size: usize, alignment: usize) -> Option<Allocation> {
        match self.allocator() {
            Ok(allocator) => allocator.allocate(size, alignment),
            Err(e) => {
                warn!(error = %e, "allocate called on uninitialized MemoryManager");
                None
            }
        }
    }

    /// Allocate with the configured default alignment.
    #[must_use]
    pub fn allocate_default(&self, size: usize) -> Option<Allocation> {
        let alignment = self
            .state
            .read()
            .as_ref()
            .map_or(crate::config::DEFAULT_ALIGNMENT, |s| s.config.default_alignment);
        self.allocate(size, alignment)
    }

    /// Return an allocation to the arena.
    pub fn deallocate(&self, allocation: Allocation) -> bool {
        self.allocator()
            .is_ok_and(|allocator| allocator.deallocate(allocation))
    }

    fn pool_with<T, F>(&self, build: F) -> Result<Arc<ObjectPool<T>>, CoreError>
    where
        T: Send + 'static,
        F: FnOnce(&MemoryConfig) -> ObjectPool<T>,
    {
        let key = TypeId::of::<T>();
        {
            let state = self.state.read();
            let state = state.as_ref().ok_or(CoreError::NotInitialized("memory manager"))?;
            if let Some(entry) = state.pools.get(&key) {
                if let Ok(pool) = Arc::clone(&entry.any).downcast::<ObjectPool<T>>() {
                    return Ok(pool);
                }
            }
        }

        let mut state = self.state.write();
        let state = state.as_mut().ok_or(CoreError::NotInitialized("memory manager"))?;
        if let Some(entry) = state.pools.get(&key) {
            if let Ok(pool) = Arc::clone(&entry.any).downcast::<ObjectPool<T>>() {
                return Ok(pool);
            }
        }
        let pool = Arc::new(build(&state.config));
        debug!(element = std::any::type_name::<T>(), "Registered object pool");
        state.pools.insert(
            key,
            PoolEntry {
                any: Arc::clone(&pool) as Arc<dyn Any + Send + Sync>,
                maintenance: Arc::clone(&pool) as Arc<dyn PoolMaintenance>,
            },
        );
        Ok(pool)
    }

    /// The pool for `T`, created on first use with the configured sizes.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotInitialized` before `initialize`.
    pub fn object_pool<T>(&self) -> Result<Arc<ObjectPool<T>>, CoreError>
    where
        T: Default + Send + 'static,
    {
        self.pool_with(|cfg| {
            ObjectPool::new(cfg.object_pool_initial_size, cfg.object_pool_max_size)
        })
    }

    /// Like [`object_pool`](Self::object_pool), resetting released objects.
    /// The first registration of a type decides whether its pool resets.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotInitialized` before `initialize`.
    pub fn resettable_object_pool<T>(&self) -> Result<Arc<ObjectPool<T>>, CoreError>
    where
        T: Default + Reset + Send + 'static,
    {
        self.pool_with(|cfg| {
            ObjectPool::resettable(cfg.object_pool_initial_size, cfg.object_pool_max_size)
        })
    }

    /// Take a `T` from its pool.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotInitialized` before `initialize`.
    pub fn acquire<T>(&self) -> Result<T, CoreError>
    where
        T: Default + Send + 'static,
    {
        Ok(self.object_pool::<T>()?.acquire())
    }

    /// Return a `T` to its pool. `Ok(false)` if the pool was full.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotInitialized` before `initialize`.
    pub fn release<T>(&self, obj: T) -> Result<bool, CoreError>
    where
        T: Default + Send + 'static,
    {
        Ok(self.object_pool::<T>()?.release(obj))
    }

    /// Arena statistics; defaults when uninitialized.
    #[must_use]
    pub fn get_global_stats(&self) -> MemoryStats {
        self.allocator()
            .map(|allocator| allocator.get_stats())
            .unwrap_or_default()
    }

    /// Statistics of every registered object pool keyed by element type.
    #[must_use]
    pub fn object_pool_stats(&self) -> BTreeMap<&'static str, PoolStats> {
        self.state.read().as_ref().map_or_else(BTreeMap::new, |state| {
            state
                .pools
                .values()
                .map(|entry| (entry.maintenance.element_type(), entry.maintenance.pool_stats()))
                .collect()
        })
    }

    /// `false` when arena fragmentation exceeds
    /// [`HEALTHY_FRAGMENTATION_LIMIT`].
    #[must_use]
    pub fn is_memory_healthy(&self) -> bool {
        self.get_global_stats().fragmentation_ratio <= HEALTHY_FRAGMENTATION_LIMIT
    }

    /// Merge adjacent free arena blocks. Returns the number of merges.
    pub fn compact_memory(&self) -> usize {
        self.allocator().map_or(0, |allocator| allocator.compact())
    }

    /// Compact the arena and trim every object pool back to its initial
    /// size. Returns the number of pooled objects dropped.
    pub fn force_gc(&self) -> usize {
        let state = self.state.read();
        let Some(state) = state.as_ref() else {
            return 0;
        };
        let merged = state.allocator.compact();
        let keep = state.config.object_pool_initial_size;
        let dropped: usize = state
            .pools
            .values()
            .map(|entry| entry.maintenance.trim(keep))
            .sum();
        info!(merged_blocks = merged, dropped_objects = dropped, "Forced memory collection");
        dropped
    }

    /// Replace the stored configuration map. Pool sizes apply to pools
    /// created afterwards; the arena size applies after the next
    /// `shutdown`/`initialize` cycle.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidConfig` for unparseable or invalid values;
    /// the previous configuration is kept.
    pub fn update_config(&self, config: HashMap<String, String>) -> Result<(), CoreError> {
        let parsed = MemoryConfig::from_map(&config)?;
        if let Some(state) = self.state.write().as_mut() {
            if parsed.pool_size_bytes != state.config.pool_size_bytes {
                info!(
                    current = state.config.pool_size_bytes,
                    requested = parsed.pool_size_bytes,
                    "Arena size change takes effect after re-initialization"
                );
            }
            let pool_size = state.config.pool_size_bytes;
            state.config = MemoryConfig {
                pool_size_bytes: pool_size,
                ..parsed
            };
        }
        *self.config_map.write() = config;
        Ok(())
    }

    /// The stored configuration map.
    #[must_use]
    pub fn get_config(&self) -> HashMap<String, String> {
        self.config_map.read().clone()
    }

    /// The parsed configuration in effect, once initialized.
    #[must_use]
    pub fn memory_config(&self) -> Option<MemoryConfig> {
        self.state.read().as_ref().map(|state| state.config.clone())
    }
}

impl std::fmt::Debug for MemoryManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryManager")
            .field("initialized", &self.is_initialized())
            .finish_non_exhaustive()
    }
}
