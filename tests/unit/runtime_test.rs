//! Tests for runtime managers and the combined context

use prometheus_scheduler::core::{CoreError, ErrorCode};
use prometheus_scheduler::runtime::{CoreContext, MemoryManager, SchedulerManager};
use prometheus_scheduler::util::Priority;
use std::collections::HashMap;
use std::sync::Arc;

fn config(threads: &str) -> HashMap<String, String> {
    HashMap::from([
        ("thread_count".to_string(), threads.to_string()),
        ("allocator_pool_size_bytes".to_string(), "16384".to_string()),
        ("object_pool_initial_size".to_string(), "1".to_string()),
        ("object_pool_max_size".to_string(), "4".to_string()),
    ])
}

#[test]
fn test_context_round_trip() {
    let ctx = CoreContext::new();
    ctx.initialize(&config("2")).unwrap();
    ctx.initialize(&config("8")).unwrap();
    assert_eq!(
        ctx.schedulers().default_scheduler().unwrap().pool().thread_count(),
        2
    );

    let handle = ctx.submit_with_priority(Priority::Critical, || 1 + 1).unwrap();
    assert_eq!(handle.get().unwrap(), 2);

    let block = ctx.allocate(1000, 64).unwrap();
    assert_eq!(block.offset % 64, 0);
    assert!(ctx.deallocate(block));
    assert!(!ctx.deallocate(block));

    ctx.shutdown();
    ctx.shutdown();
    let err = ctx.submit(|| ()).unwrap_err();
    assert_eq!(err.code(), ErrorCode::InternalError);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_context_handles_are_awaitable() {
    let ctx = CoreContext::new();
    ctx.initialize(&config("2")).unwrap();
    let value = ctx.submit(|| String::from("async")).unwrap().await.unwrap();
    assert_eq!(value, "async");
    ctx.shutdown();
}

#[test]
fn test_shared_managers_survive_context_drop() {
    let schedulers = Arc::new(SchedulerManager::new());
    let memory = Arc::new(MemoryManager::new());
    {
        let ctx = CoreContext::from_managers(Arc::clone(&schedulers), Arc::clone(&memory));
        ctx.initialize(&config("1")).unwrap();
    }
    assert!(schedulers.is_initialized());
    assert!(memory.is_initialized());
    let scheduler = schedulers.default_scheduler().unwrap();
    assert_eq!(scheduler.schedule(|| 3).unwrap().get().unwrap(), 3);
    schedulers.shutdown_all();
    memory.shutdown();
}

#[test]
fn test_memory_manager_pools_reset_objects() {
    let memory = MemoryManager::new();
    memory.initialize(&config("1")).unwrap();
    let pool = memory.resettable_object_pool::<Vec<u64>>().unwrap();
    let mut buf = pool.acquire();
    buf.extend([1, 2, 3]);
    assert!(memory.release(buf).unwrap());
    let reused: Vec<u64> = memory.acquire().unwrap();
    assert!(reused.is_empty());

    assert_eq!(memory.get_config()["object_pool_max_size"], "4");
    assert!(memory.object_pool_stats().contains_key(std::any::type_name::<Vec<u64>>()));
    memory.shutdown();
}

#[test]
fn test_uninitialized_managers() {
    let schedulers = SchedulerManager::new();
    assert!(matches!(
        schedulers.default_scheduler(),
        Err(CoreError::NotInitialized("scheduler manager"))
    ));
    schedulers.shutdown_all();

    let memory = MemoryManager::new();
    assert_eq!(memory.compact_memory(), 0);
    assert_eq!(memory.force_gc(), 0);
    assert!(memory.is_memory_healthy());
}
