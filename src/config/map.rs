//! Flat `key -> value` configuration maps as consumed by `initialize`.

use std::collections::HashMap;
use std::fmt::Display;
use std::str::FromStr;

use tracing::debug;

use crate::core::error::CoreError;

/// Keys recognised in a flat configuration map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MapKey {
    /// Worker threads of the default scheduler.
    ThreadCount,
    /// Queue depth limit of the default scheduler.
    MaxQueueDepth,
    /// Limiter permits of the default scheduler.
    MaxConcurrency,
    /// Default task deadline.
    DefaultTimeoutMs,
    /// Per-worker shutdown join timeout.
    ShutdownTimeoutMs,
    /// Arena size in MiB.
    AllocatorPoolSizeMb,
    /// Arena size in bytes; overrides the MiB key.
    AllocatorPoolSizeBytes,
    /// Objects pre-constructed per typed pool.
    ObjectPoolInitialSize,
    /// Resident cap per typed pool.
    ObjectPoolMaxSize,
}

impl MapKey {
    /// Every recognised key.
    pub const ALL: [Self; 9] = [
        Self::ThreadCount,
        Self::MaxQueueDepth,
        Self::MaxConcurrency,
        Self::DefaultTimeoutMs,
        Self::ShutdownTimeoutMs,
        Self::AllocatorPoolSizeMb,
        Self::AllocatorPoolSizeBytes,
        Self::ObjectPoolInitialSize,
        Self::ObjectPoolMaxSize,
    ];

    /// Key as it appears in the map.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ThreadCount => "thread_count",
            Self::MaxQueueDepth => "max_queue_depth",
            Self::MaxConcurrency => "max_concurrency",
            Self::DefaultTimeoutMs => "default_timeout_ms",
            Self::ShutdownTimeoutMs => "shutdown_timeout_ms",
            Self::AllocatorPoolSizeMb => "allocator_pool_size_mb",
            Self::AllocatorPoolSizeBytes => "allocator_pool_size_bytes",
            Self::ObjectPoolInitialSize => "object_pool_initial_size",
            Self::ObjectPoolMaxSize => "object_pool_max_size",
        }
    }

    /// Look up a key by its map name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|key| key.as_str() == name)
    }
}

/// Parse `key` from `map`. Absent keys yield `Ok(None)`.
///
/// # Errors
///
/// Returns [`CoreError::InvalidConfig`] when the value does not parse.
pub fn parse_key<T>(map: &HashMap<String, String>, key: MapKey) -> Result<Option<T>, CoreError>
where
    T: FromStr,
    T::Err: Display,
{
    map.get(key.as_str())
        .map(|raw| {
            raw.trim().parse::<T>().map_err(|e| {
                CoreError::InvalidConfig(format!("{}={raw:?}: {e}", key.as_str()))
            })
        })
        .transpose()
}

/// Log keys that no component consumes. Returns them sorted.
pub fn log_unknown_keys(map: &HashMap<String, String>) -> Vec<String> {
    let mut unknown: Vec<String> = map
        .keys()
        .filter(|k| MapKey::from_name(k).is_none())
        .cloned()
        .collect();
    unknown.sort();
    for key in &unknown {
        debug!(key = %key, "ignoring unknown configuration key");
    }
    unknown
}
