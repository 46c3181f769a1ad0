//! Pool, scheduler and memory configuration structures.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::map::{parse_key, MapKey};
use crate::core::error::CoreError;

/// Default arena size when neither size key is configured.
pub const DEFAULT_ARENA_BYTES: usize = 64 * 1024 * 1024;

/// Default alignment of arena allocations.
pub const DEFAULT_ALIGNMENT: usize = 64;

/// Worker pool configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerPoolConfig {
    /// Number of worker threads.
    pub worker_count: usize,
    /// Maximum jobs queued (global heap plus local deques) before rejection.
    pub max_queue_depth: usize,
    /// Stack size of each worker thread in bytes.
    pub thread_stack_size: usize,
    /// Per-worker join timeout during shutdown, in milliseconds.
    pub shutdown_timeout_ms: u64,
    /// Worker thread names are `{prefix}-{id}`.
    pub thread_name_prefix: String,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            worker_count: num_cpus::get().max(1),
            max_queue_depth: 10_000,
            thread_stack_size: 2 * 1024 * 1024,
            shutdown_timeout_ms: 2_000,
            thread_name_prefix: "sched-worker".into(),
        }
    }
}

impl WorkerPoolConfig {
    /// Defaults: one worker per CPU.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of worker threads.
    #[must_use]
    pub const fn with_worker_count(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }

    /// Set the maximum queue depth.
    #[must_use]
    pub const fn with_max_queue_depth(mut self, max_queue_depth: usize) -> Self {
        self.max_queue_depth = max_queue_depth;
        self
    }

    /// Set the worker thread stack size.
    #[must_use]
    pub const fn with_thread_stack_size(mut self, thread_stack_size: usize) -> Self {
        self.thread_stack_size = thread_stack_size;
        self
    }

    /// Set the per-worker shutdown join timeout.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the worker thread name prefix.
    #[must_use]
    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    /// Per-worker shutdown join timeout.
    #[must_use]
    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.worker_count == 0 {
            return Err("worker_count must be greater than 0".into());
        }
        if self.max_queue_depth == 0 {
            return Err("max_queue_depth must be greater than 0".into());
        }
        if self.thread_stack_size < 64 * 1024 {
            return Err("thread_stack_size must be at least 64 KiB".into());
        }
        if self.thread_name_prefix.is_empty() {
            return Err("thread_name_prefix must not be empty".into());
        }
        Ok(())
    }

    /// Apply `thread_count`, `max_queue_depth` and `shutdown_timeout_ms` from a flat map.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidConfig`] for unparseable or invalid values.
    pub fn from_map(map: &HashMap<String, String>) -> Result<Self, CoreError> {
        let mut cfg = Self::default();
        if let Some(n) = parse_key::<usize>(map, MapKey::ThreadCount)? {
            cfg.worker_count = n;
        }
        if let Some(n) = parse_key::<usize>(map, MapKey::MaxQueueDepth)? {
            cfg.max_queue_depth = n;
        }
        if let Some(ms) = parse_key::<u64>(map, MapKey::ShutdownTimeoutMs)? {
            cfg.shutdown_timeout_ms = ms;
        }
        cfg.validate().map_err(CoreError::InvalidConfig)?;
        Ok(cfg)
    }
}

/// Scheduler configuration: a pool plus admission control.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Underlying worker pool.
    pub pool: WorkerPoolConfig,
    /// Permits of the scheduler's concurrency limiter.
    pub max_concurrency: usize,
    /// Deadline applied by `schedule_with_default_timeout`, in milliseconds.
    pub default_timeout_ms: Option<u64>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        let pool = WorkerPoolConfig::default();
        Self {
            max_concurrency: pool.worker_count * 2,
            pool,
            default_timeout_ms: None,
        }
    }
}

impl SchedulerConfig {
    /// Scheduler over `worker_count` threads with matching defaults.
    #[must_use]
    pub fn with_threads(worker_count: usize) -> Self {
        let pool = WorkerPoolConfig::new().with_worker_count(worker_count.max(1));
        Self {
            max_concurrency: pool.worker_count * 2,
            pool,
            default_timeout_ms: None,
        }
    }

    /// Default deadline, if configured.
    #[must_use]
    pub fn default_timeout(&self) -> Option<Duration> {
        self.default_timeout_ms.map(Duration::from_millis)
    }

    /// Validate the pool and limiter settings.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        self.pool.validate().map_err(|e| format!("pool invalid: {e}"))?;
        if self.max_concurrency == 0 {
            return Err("max_concurrency must be greater than 0".into());
        }
        if self.default_timeout_ms == Some(0) {
            return Err("default_timeout_ms must be greater than 0".into());
        }
        Ok(())
    }

    /// Parse from a flat key/value map. Unknown keys are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidConfig`] for unparseable or invalid values.
    pub fn from_map(map: &HashMap<String, String>) -> Result<Self, CoreError> {
        let pool = WorkerPoolConfig::from_map(map)?;
        let max_concurrency =
            parse_key::<usize>(map, MapKey::MaxConcurrency)?.unwrap_or(pool.worker_count * 2);
        let default_timeout_ms = parse_key::<u64>(map, MapKey::DefaultTimeoutMs)?;
        let cfg = Self {
            pool,
            max_concurrency,
            default_timeout_ms,
        };
        cfg.validate().map_err(CoreError::InvalidConfig)?;
        Ok(cfg)
    }

    /// Parse scheduler configuration from a JSON string and validate.
    ///
    /// # Errors
    ///
    /// Returns a description of the parse or validation failure.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }
}

/// Memory subsystem configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Arena size in bytes.
    pub pool_size_bytes: usize,
    /// Objects pre-constructed by each typed pool.
    pub object_pool_initial_size: usize,
    /// Resident object cap of each typed pool.
    pub object_pool_max_size: usize,
    /// Alignment used by `MemoryManager::allocate`.
    pub default_alignment: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            pool_size_bytes: DEFAULT_ARENA_BYTES,
            object_pool_initial_size: 10,
            object_pool_max_size: 1000,
            default_alignment: DEFAULT_ALIGNMENT,
        }
    }
}

impl MemoryConfig {
    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.pool_size_bytes == 0 {
            return Err("pool_size_bytes must be greater than 0".into());
        }
        if !self.default_alignment.is_power_of_two() {
            return Err("default_alignment must be a power of two".into());
        }
        if self.object_pool_initial_size > self.object_pool_max_size {
            return Err("object_pool_initial_size must not exceed object_pool_max_size".into());
        }
        Ok(())
    }

    /// Parse from a flat key/value map. `allocator_pool_size_bytes` wins over
    /// `allocator_pool_size_mb` when both are present.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidConfig`] for unparseable or invalid values.
    pub fn from_map(map: &HashMap<String, String>) -> Result<Self, CoreError> {
        let mut cfg = Self::default();
        if let Some(mb) = parse_key::<usize>(map, MapKey::AllocatorPoolSizeMb)? {
            cfg.pool_size_bytes = mb.checked_mul(1024 * 1024).ok_or_else(|| {
                CoreError::InvalidConfig(format!("allocator_pool_size_mb too large: {mb}"))
            })?;
        }
        if let Some(bytes) = parse_key::<usize>(map, MapKey::AllocatorPoolSizeBytes)? {
            cfg.pool_size_bytes = bytes;
        }
        if let Some(n) = parse_key::<usize>(map, MapKey::ObjectPoolInitialSize)? {
            cfg.object_pool_initial_size = n;
        }
        if let Some(n) = parse_key::<usize>(map, MapKey::ObjectPoolMaxSize)? {
            cfg.object_pool_max_size = n;
        }
        cfg.validate().map_err(CoreError::InvalidConfig)?;
        Ok(cfg)
    }

    /// Parse memory configuration from a JSON string and validate.
    ///
    /// # Errors
    ///
    /// Returns a description of the parse or validation failure.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }
}
