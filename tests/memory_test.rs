//! Integration tests for the arena allocator, object pools and managers
//!
//! These tests exercise the memory subsystem under realistic load:
//! - Concurrent allocate/deallocate cycles from many threads
//! - Exhaustion and recovery of a small arena
//! - Randomized workloads checked against the tiling invariant
//! - Typed object pools reached through the managers

use prometheus_scheduler::memory::{ArenaAllocator, ObjectPool};
use prometheus_scheduler::runtime::{CoreContext, MemoryManager};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::Arc;
use std::thread;

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

/// Every byte belongs to exactly one block, in address order.
fn assert_tiles(arena: &ArenaAllocator) {
    let mut cursor = 0;
    for block in arena.blocks() {
        assert_eq!(block.offset, cursor, "gap or overlap at offset {cursor}");
        cursor += block.size;
    }
    assert_eq!(cursor, arena.pool_size());
}

// ============================================================================
// ARENA
// ============================================================================

#[test]
fn test_concurrent_allocation_cycles() {
    println!("\n=== Test: 20 Threads x 100 Cycles ===");

    let arena = Arc::new(ArenaAllocator::new(4 * 1024 * 1024));
    let threads: Vec<_> = (0..20)
        .map(|t| {
            let arena = Arc::clone(&arena);
            thread::spawn(move || {
                for i in 0..100 {
                    let size = 64 + (t * 100 + i) % 1024;
                    let allocation = arena.allocate(size, 16).expect("arena has room");
                    arena
                        .write(&allocation, 0, &[t as u8; 8])
                        .expect("write within bounds");
                    assert_eq!(arena.read(&allocation, 0, 8).unwrap(), vec![t as u8; 8]);
                    assert!(arena.deallocate(allocation));
                }
            })
        })
        .collect();
    for t in threads {
        t.join().expect("worker thread panicked");
    }

    let stats = arena.get_stats();
    println!(
        "allocations={} deallocations={} peak={}",
        stats.allocation_count, stats.deallocation_count, stats.peak_usage
    );
    assert_eq!(stats.allocation_count, 2000);
    assert_eq!(stats.allocation_count, stats.deallocation_count);
    assert_eq!(stats.current_usage, 0);
    assert_eq!(stats.total_allocated, stats.total_deallocated);
    assert_eq!(stats.free_blocks, 1);
    assert_tiles(&arena);
    println!("=== PASSED ===\n");
}

#[test]
fn test_small_arena_exhaustion() {
    println!("\n=== Test: 1024-Byte Exhaustion ===");

    let arena = ArenaAllocator::new(1024);
    let mut live = Vec::new();
    while let Some(allocation) = arena.allocate(100, 8) {
        live.push(allocation);
    }
    println!("Fitted {} allocations", live.len());
    assert_eq!(live.len(), 9);
    assert!(arena.allocate(100, 8).is_none());
    assert_tiles(&arena);

    let freed = live.remove(3);
    assert!(arena.deallocate(freed));
    assert!(!arena.deallocate(freed), "double free must be rejected");
    let again = arena.allocate(100, 8).expect("freed slot is reusable");
    assert_eq!(again.offset, freed.offset);

    live.push(again);
    for allocation in live {
        assert!(arena.deallocate(allocation));
    }
    assert_eq!(arena.get_stats().current_usage, 0);
    assert_eq!(arena.get_stats().largest_free_block, 1024);
    println!("=== PASSED ===\n");
}

#[test]
fn test_random_workload_keeps_tiling() {
    println!("\n=== Test: Randomized Tiling ===");

    let arena = ArenaAllocator::new(64 * 1024);
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let mut live = Vec::new();

    for step in 0..2000 {
        if live.is_empty() || rng.random_bool(0.6) {
            let size = rng.random_range(1..=2048);
            let alignment = 1_usize << rng.random_range(0..=7_u32);
            if let Some(allocation) = arena.allocate(size, alignment) {
                assert_eq!(allocation.offset % alignment, 0);
                assert!(allocation.size >= size);
                live.push(allocation);
            }
        } else {
            let idx = rng.random_range(0..live.len());
            assert!(arena.deallocate(live.swap_remove(idx)));
        }
        if step % 100 == 0 {
            assert_tiles(&arena);
            let stats = arena.get_stats();
            assert!((0.0..=1.0).contains(&stats.fragmentation_ratio));
            assert_eq!(stats.current_usage, live.iter().map(|a| a.size).sum::<usize>());
        }
    }

    for allocation in live.drain(..) {
        assert!(arena.deallocate(allocation));
    }
    assert_tiles(&arena);
    assert_eq!(arena.get_stats().free_blocks, 1);
    println!("=== PASSED ===\n");
}

// ============================================================================
// OBJECT POOLS / MANAGERS
// ============================================================================

#[test]
fn test_object_pool_release_storm() {
    let pool = Arc::new(ObjectPool::<Vec<u8>>::resettable(4, 32));
    let threads: Vec<_> = (0..10)
        .map(|_| {
            let pool = Arc::clone(&pool);
            thread::spawn(move || {
                for _ in 0..200 {
                    let mut buf = pool.acquire();
                    buf.extend_from_slice(b"tokens");
                    pool.release(buf);
                    assert!(pool.available() <= pool.capacity());
                }
            })
        })
        .collect();
    for t in threads {
        t.join().unwrap();
    }
    let stats = pool.get_stats();
    assert_eq!(stats.total_acquired, 2000);
    assert_eq!(stats.checked_out, 0);
    assert!(pool.acquire().is_empty());
}

#[test]
fn test_memory_manager_lifecycle() {
    let manager = MemoryManager::new();
    let config = HashMap::from([
        ("allocator_pool_size_mb".to_owned(), "1".to_owned()),
        ("object_pool_initial_size".to_owned(), "3".to_owned()),
    ]);
    manager.initialize(&config).unwrap();
    assert_eq!(manager.allocator().unwrap().pool_size(), 1024 * 1024);

    let blocks: Vec<_> = (0..16).filter_map(|_| manager.allocate(4096, 64)).collect();
    assert_eq!(blocks.len(), 16);
    for (i, block) in blocks.iter().enumerate() {
        if i % 2 == 0 {
            assert!(manager.deallocate(*block));
        }
    }
    assert!(manager.is_memory_healthy());

    let scratch: String = manager.acquire().unwrap();
    manager.release(scratch).unwrap();
    assert_eq!(manager.object_pool::<String>().unwrap().available(), 3);

    manager.shutdown();
    assert!(manager.allocate(64, 8).is_none());
}

#[test]
fn test_context_submits_memory_work() {
    let ctx = Arc::new(CoreContext::new());
    ctx.initialize(&HashMap::from([
        ("thread_count".to_owned(), "4".to_owned()),
        ("allocator_pool_size_bytes".to_owned(), "65536".to_owned()),
    ]))
    .unwrap();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let worker_ctx = Arc::clone(&ctx);
            ctx.submit(move || {
                let allocation = worker_ctx.allocate(1024, 64)?;
                Some(worker_ctx.deallocate(allocation))
            })
            .unwrap()
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.get().unwrap(), Some(true));
    }

    let stats = ctx.memory().get_global_stats();
    assert_eq!(stats.allocation_count, 8);
    assert_eq!(stats.current_usage, 0);
    ctx.shutdown();
}
