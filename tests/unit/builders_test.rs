//! Tests for builder functions

use prometheus_scheduler::builders::{
    build_arena, build_object_pool, build_pool, build_scheduler, build_schedulers,
};
use prometheus_scheduler::config::{MemoryConfig, SchedulerConfig, WorkerPoolConfig};
use prometheus_scheduler::core::CoreError;
use std::collections::HashMap;

#[test]
fn test_build_pool_and_scheduler() {
    let pool = build_pool(&WorkerPoolConfig::new().with_worker_count(2)).unwrap();
    assert_eq!(pool.thread_count(), 2);
    pool.shutdown();

    let scheduler = build_scheduler(&SchedulerConfig::with_threads(1)).unwrap();
    assert_eq!(scheduler.schedule(|| 9).unwrap().get().unwrap(), 9);
    scheduler.shutdown();
}

#[test]
fn test_build_rejects_invalid_config() {
    let err = build_pool(&WorkerPoolConfig::new().with_worker_count(0)).unwrap_err();
    assert!(matches!(err, CoreError::InvalidConfig(_)));
    assert!(err.to_string().contains("worker_count"));
}

#[test]
fn test_build_named_schedulers() {
    let cfgs = HashMap::from([
        ("inference".to_string(), SchedulerConfig::with_threads(2)),
        ("io".to_string(), SchedulerConfig::with_threads(1)),
    ]);
    let schedulers = build_schedulers(&cfgs).unwrap();
    assert_eq!(schedulers.len(), 2);
    assert_eq!(schedulers["inference"].pool().thread_count(), 2);
    for scheduler in schedulers.values() {
        scheduler.shutdown();
    }

    let mut bad = SchedulerConfig::with_threads(1);
    bad.max_concurrency = 0;
    let err = build_schedulers(&HashMap::from([("bad".to_string(), bad)])).unwrap_err();
    assert!(err.to_string().contains("bad"));
}

#[test]
fn test_build_memory_components() {
    let cfg = MemoryConfig {
        pool_size_bytes: 8192,
        object_pool_initial_size: 2,
        object_pool_max_size: 4,
        ..MemoryConfig::default()
    };
    let arena = build_arena(&cfg).unwrap();
    assert_eq!(arena.pool_size(), 8192);

    let pool = build_object_pool(&cfg, || Vec::<f32>::with_capacity(128)).unwrap();
    assert_eq!(pool.available(), 2);
    assert_eq!(pool.capacity(), 4);
    assert!(pool.acquire().capacity() >= 128);

    let bad = MemoryConfig {
        pool_size_bytes: 0,
        ..MemoryConfig::default()
    };
    assert!(build_arena(&bad).is_err());
}
