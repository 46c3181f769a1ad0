//! Tests for configuration validation and parsing

use prometheus_scheduler::config::env::config_map_from_vars;
use prometheus_scheduler::config::{
    log_unknown_keys, MapKey, MemoryConfig, SchedulerConfig, WorkerPoolConfig, DEFAULT_ALIGNMENT,
    DEFAULT_ARENA_BYTES,
};
use std::collections::HashMap;
use std::time::Duration;

fn map(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}

#[test]
fn test_worker_pool_config_validation() {
    let valid = WorkerPoolConfig::new()
        .with_worker_count(4)
        .with_max_queue_depth(50)
        .with_shutdown_timeout(Duration::from_millis(500));
    assert!(valid.validate().is_ok());
    assert_eq!(valid.shutdown_timeout(), Duration::from_millis(500));
}

#[test]
fn test_worker_pool_config_invalid_worker_count() {
    let invalid = WorkerPoolConfig::new().with_worker_count(0);
    assert!(invalid.validate().is_err());
}

#[test]
fn test_worker_pool_config_invalid_queue_depth() {
    let invalid = WorkerPoolConfig::new().with_max_queue_depth(0);
    assert!(invalid.validate().is_err());
}

#[test]
fn test_worker_pool_config_invalid_stack() {
    let invalid = WorkerPoolConfig::new().with_thread_stack_size(1024);
    assert!(invalid.validate().is_err());
}

#[test]
fn test_scheduler_config_from_map() {
    let cfg = SchedulerConfig::from_map(&map(&[
        ("thread_count", "3"),
        ("max_queue_depth", "64"),
        ("default_timeout_ms", "250"),
    ]))
    .unwrap();
    assert_eq!(cfg.pool.worker_count, 3);
    assert_eq!(cfg.pool.max_queue_depth, 64);
    assert_eq!(cfg.max_concurrency, 6);
    assert_eq!(cfg.default_timeout(), Some(Duration::from_millis(250)));
}

#[test]
fn test_scheduler_config_rejects_garbage() {
    assert!(SchedulerConfig::from_map(&map(&[("thread_count", "many")])).is_err());
    assert!(SchedulerConfig::from_map(&map(&[("max_concurrency", "0")])).is_err());
    assert!(SchedulerConfig::from_map(&map(&[("default_timeout_ms", "0")])).is_err());
}

#[test]
fn test_scheduler_config_json() {
    let cfg = SchedulerConfig::from_json_str(
        r#"{"pool": {"worker_count": 2}, "max_concurrency": 8}"#,
    )
    .unwrap();
    assert_eq!(cfg.pool.worker_count, 2);
    assert_eq!(cfg.max_concurrency, 8);
    assert_eq!(cfg.default_timeout_ms, None);
    assert!(SchedulerConfig::from_json_str(r#"{"max_concurrency": 0}"#).is_err());
    assert!(SchedulerConfig::from_json_str("not json").is_err());
}

#[test]
fn test_memory_config_defaults_and_sizes() {
    let cfg = MemoryConfig::default();
    assert_eq!(cfg.pool_size_bytes, DEFAULT_ARENA_BYTES);
    assert_eq!(cfg.default_alignment, DEFAULT_ALIGNMENT);

    let cfg = MemoryConfig::from_map(&map(&[("allocator_pool_size_mb", "2")])).unwrap();
    assert_eq!(cfg.pool_size_bytes, 2 * 1024 * 1024);

    let cfg = MemoryConfig::from_map(&map(&[
        ("allocator_pool_size_mb", "2"),
        ("allocator_pool_size_bytes", "4096"),
    ]))
    .unwrap();
    assert_eq!(cfg.pool_size_bytes, 4096);
}

#[test]
fn test_memory_config_invalid_pool_sizes() {
    let err = MemoryConfig::from_map(&map(&[
        ("object_pool_initial_size", "50"),
        ("object_pool_max_size", "10"),
    ]));
    assert!(err.is_err());
    assert!(MemoryConfig::from_json_str(r#"{"default_alignment": 48}"#).is_err());
}

#[test]
fn test_unknown_keys_are_reported() {
    let unknown = log_unknown_keys(&map(&[("thread_count", "2"), ("gpu_layers", "40")]));
    assert_eq!(unknown, vec!["gpu_layers".to_string()]);
    assert!(MapKey::ALL.iter().all(|k| MapKey::from_name(k.as_str()) == Some(*k)));
}

#[test]
fn test_env_prefix_mapping() {
    let vars = vec![
        ("SCHED_THREAD_COUNT".to_string(), "6".to_string()),
        ("SCHED_OBJECT_POOL_MAX_SIZE".to_string(), "12".to_string()),
        ("HOME".to_string(), "/root".to_string()),
    ];
    let mapped = config_map_from_vars("SCHED_", vars);
    assert_eq!(mapped.len(), 2);
    assert_eq!(mapped["thread_count"], "6");
    assert_eq!(mapped["object_pool_max_size"], "12");
}
