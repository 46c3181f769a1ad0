//! First-fit arena allocator over one pre-reserved byte region.
//!
//! Allocations are handed out as offsets into the arena, never as raw
//! pointers; bytes are reached through [`ArenaAllocator::write`] and
//! [`ArenaAllocator::read`], which check the allocation is live and the
//! access is in bounds.
//!
//! Invariant: free blocks plus live allocations tile `[0, pool_size)`
//! exactly, and no two free blocks are adjacent.
//!
//! Lock order: bookkeeping (`state`) before bytes (`storage`).

use std::collections::HashMap;
use std::time::Instant;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::core::error::CoreError;

/// Handle to a live arena allocation.
///
/// Each handle carries the id of the allocation that produced it, so a handle
/// to a released block never matches a later allocation at the same offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Allocation {
    /// Start of the block inside the arena; a multiple of `alignment`.
    pub offset: usize,
    /// Usable size of the block, at least `requested`.
    pub size: usize,
    /// Size the caller asked for.
    pub requested: usize,
    /// Alignment the caller asked for.
    pub alignment: usize,
    id: u64,
}

impl Allocation {
    /// Arena-unique id of this allocation.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }
}

/// Snapshot of one arena block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryBlock {
    /// Start of the block.
    pub offset: usize,
    /// Size of the block.
    pub size: usize,
    /// Alignment of the allocation; 1 for free blocks.
    pub alignment: usize,
    /// Whether the block is allocated.
    pub in_use: bool,
    /// Last allocation or release of the block.
    pub last_used: Instant,
}

/// Allocator statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryStats {
    /// Bytes handed out over the arena's lifetime.
    pub total_allocated: usize,
    /// Bytes returned over the arena's lifetime.
    pub total_deallocated: usize,
    /// Bytes currently allocated.
    pub current_usage: usize,
    /// High-water mark of `current_usage`.
    pub peak_usage: usize,
    /// Successful allocations.
    pub allocation_count: u64,
    /// Successful deallocations.
    pub deallocation_count: u64,
    /// `1 - largest_free_block / total_free`; 0 without free space.
    pub fragmentation_ratio: f64,
    /// Number of free blocks.
    pub free_blocks: usize,
    /// Size of the largest free block.
    pub largest_free_block: usize,
    /// Arena size.
    pub pool_size: usize,
}

#[derive(Debug, Clone, Copy)]
struct FreeBlock {
    offset: usize,
    size: usize,
    last_used: Instant,
}

impl FreeBlock {
    const fn end(&self) -> usize {
        self.offset + self.size
    }
}

#[derive(Debug, Clone, Copy)]
struct LiveRecord {
    id: u64,
    size: usize,
    alignment: usize,
    last_used: Instant,
}

struct ArenaState {
    /// Sorted by offset, never adjacent.
    free: Vec<FreeBlock>,
    live: HashMap<usize, LiveRecord>,
    stats: MemoryStats,
    /// Survives `reset` so old handles stay unknown.
    next_id: u64,
}

impl ArenaState {
    fn fresh(pool_size: usize) -> Self {
        Self {
            free: vec![FreeBlock {
                offset: 0,
                size: pool_size,
                last_used: Instant::now(),
            }],
            live: HashMap::new(),
            stats: MemoryStats {
                pool_size,
                ..MemoryStats::default()
            },
            next_id: 0,
        }
    }

    /// Live record for `allocation`, if the handle is still current.
    fn record(&self, allocation: &Allocation) -> Option<LiveRecord> {
        self.live
            .get(&allocation.offset)
            .copied()
            .filter(|record| record.id == allocation.id && record.size == allocation.size)
    }

    /// Insert a freed block at its address and merge it with its neighbours.
    fn release_block(&mut self, block: FreeBlock) {
        let idx = self.free.partition_point(|b| b.offset < block.offset);
        self.free.insert(idx, block);

        if idx + 1 < self.free.len() && self.free[idx].end() == self.free[idx + 1].offset {
            let next = self.free.remove(idx + 1);
            self.free[idx].size += next.size;
        }
        if idx > 0 && self.free[idx - 1].end() == self.free[idx].offset {
            let current = self.free.remove(idx);
            self.free[idx - 1].size += current.size;
            self.free[idx - 1].last_used = current.last_used;
        }
    }

    /// Sort by address and merge every adjacent pair. Returns merges performed.
    fn merge_free_blocks(&mut self) -> usize {
        self.free.sort_by_key(|b| b.offset);
        let before = self.free.len();
        let mut merged: Vec<FreeBlock> = Vec::with_capacity(before);
        for block in self.free.drain(..) {
            match merged.last_mut() {
                Some(last) if last.end() == block.offset => {
                    last.size += block.size;
                    last.last_used = last.last_used.max(block.last_used);
                }
                _ => merged.push(block),
            }
        }
        self.free = merged;
        before - self.free.len()
    }

    #[allow(clippy::cast_precision_loss)]
    fn snapshot_stats(&self) -> MemoryStats {
        let total_free: usize = self.free.iter().map(|b| b.size).sum();
        let largest = self.free.iter().map(|b| b.size).max().unwrap_or(0);
        let mut stats = self.stats.clone();
        stats.free_blocks = self.free.len();
        stats.largest_free_block = largest;
        stats.fragmentation_ratio = if total_free == 0 {
            0.0
        } else {
            1.0 - largest as f64 / total_free as f64
        };
        stats
    }

    fn check_access(
        &self,
        allocation: &Allocation,
        offset: usize,
        len: usize,
    ) -> Result<(), CoreError> {
        if self.record(allocation).is_none() {
            return Err(CoreError::UnknownAllocation(allocation.offset));
        }
        match offset.checked_add(len) {
            Some(end) if end <= allocation.size => Ok(()),
            _ => Err(CoreError::OutOfBounds {
                offset,
                len,
                size: allocation.size,
            }),
        }
    }
}

/// Round `value` up to a multiple of the power-of-two `align`.
const fn align_up(value: usize, align: usize) -> Option<usize> {
    match value.checked_add(align - 1) {
        Some(v) => Some(v & !(align - 1)),
        None => None,
    }
}

/// Arena allocator with first-fit placement, block splitting, and
/// coalescing on release.
pub struct ArenaAllocator {
    pool_size: usize,
    state: Mutex<ArenaState>,
    storage: Mutex<Vec<u8>>,
}

impl ArenaAllocator {
    /// Reserve an arena of `pool_size` bytes.
    #[must_use]
    pub fn new(pool_size: usize) -> Self {
        info!(pool_size = pool_size, "Arena allocator initialized");
        Self {
            pool_size,
            state: Mutex::new(ArenaState::fresh(pool_size)),
            storage: Mutex::new(vec![0; pool_size]),
        }
    }

    /// Arena size in bytes.
    #[must_use]
    pub const fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Allocate `size` bytes aligned to `alignment`.
    ///
    /// Returns `None` for a zero size, a non-power-of-two alignment, or when
    /// no free block fits.
    #[must_use]
    pub fn allocate(&self, size: usize, alignment: usize) -> Option<Allocation> {
        if size == 0 || !alignment.is_power_of_two() {
            debug!(size = size, alignment = alignment, "Rejected allocation request");
            return None;
        }
        let rounded = align_up(size, alignment)?;

        let mut state = self.state.lock();
        let (idx, start) = state.free.iter().enumerate().find_map(|(idx, block)| {
            let start = align_up(block.offset, alignment)?;
            let padding = start - block.offset;
            (padding.checked_add(rounded)? <= block.size).then_some((idx, start))
        })?;

        let now = Instant::now();
        let block = state.free.remove(idx);
        let padding = start - block.offset;
        let remainder = block.size - padding - rounded;

        let mut insert_at = idx;
        if padding > 0 {
            state.free.insert(
                insert_at,
                FreeBlock {
                    offset: block.offset,
                    size: padding,
                    last_used: block.last_used,
                },
            );
            insert_at += 1;
        }
        let size_taken = if remainder > alignment {
            state.free.insert(
                insert_at,
                FreeBlock {
                    offset: start + rounded,
                    size: remainder,
                    last_used: block.last_used,
                },
            );
            rounded
        } else {
            rounded + remainder
        };

        let id = state.next_id;
        state.next_id += 1;
        state.live.insert(
            start,
            LiveRecord {
                id,
                size: size_taken,
                alignment,
                last_used: now,
            },
        );
        let stats = &mut state.stats;
        stats.total_allocated += size_taken;
        stats.current_usage += size_taken;
        stats.peak_usage = stats.peak_usage.max(stats.current_usage);
        stats.allocation_count += 1;

        Some(Allocation {
            offset: start,
            size: size_taken,
            requested: size,
            alignment,
            id,
        })
    }

    /// Return an allocation to the arena. Unknown or already released
    /// allocations are ignored and yield `false`.
    pub fn deallocate(&self, allocation: Allocation) -> bool {
        let mut state = self.state.lock();
        let Some(record) = state.record(&allocation) else {
            drop(state);
            warn!(
                offset = allocation.offset,
                size = allocation.size,
                "Ignoring deallocation of unknown allocation"
            );
            return false;
        };
        state.live.remove(&allocation.offset);
        state.release_block(FreeBlock {
            offset: allocation.offset,
            size: record.size,
            last_used: Instant::now(),
        });
        let stats = &mut state.stats;
        stats.total_deallocated += record.size;
        stats.current_usage -= record.size;
        stats.deallocation_count += 1;
        true
    }

    /// Whether `allocation` is currently live.
    #[must_use]
    pub fn contains(&self, allocation: &Allocation) -> bool {
        self.state.lock().record(allocation).is_some()
    }

    /// Statistics snapshot.
    #[must_use]
    pub fn get_stats(&self) -> MemoryStats {
        self.state.lock().snapshot_stats()
    }

    /// Merge adjacent free blocks. Returns the number of merges.
    pub fn compact(&self) -> usize {
        let merged = self.state.lock().merge_free_blocks();
        debug!(merged = merged, "Arena compacted");
        merged
    }

    /// Drop every allocation and clear statistics. Outstanding handles
    /// become unknown to the arena.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        let dropped = state.live.len();
        let next_id = state.next_id;
        *state = ArenaState::fresh(self.pool_size);
        state.next_id = next_id;
        drop(state);
        info!(dropped_allocations = dropped, "Arena reset");
    }

    /// Every block in address order.
    #[must_use]
    pub fn blocks(&self) -> Vec<MemoryBlock> {
        let state = self.state.lock();
        let mut blocks: Vec<MemoryBlock> = state
            .free
            .iter()
            .map(|b| MemoryBlock {
                offset: b.offset,
                size: b.size,
                alignment: 1,
                in_use: false,
                last_used: b.last_used,
            })
            .chain(state.live.iter().map(|(offset, r)| MemoryBlock {
                offset: *offset,
                size: r.size,
                alignment: r.alignment,
                in_use: true,
                last_used: r.last_used,
            }))
            .collect();
        blocks.sort_by_key(|b| b.offset);
        blocks
    }

    /// Bytes currently allocated.
    #[must_use]
    pub fn allocated_size(&self) -> usize {
        self.state.lock().stats.current_usage
    }

    /// Number of live allocations.
    #[must_use]
    pub fn live_allocations(&self) -> usize {
        self.state.lock().live.len()
    }

    /// Copy `data` into `allocation` starting at `offset`.
    ///
    /// # Errors
    ///
    /// `CoreError::UnknownAllocation` for a released handle,
    /// `CoreError::OutOfBounds` when the write does not fit.
    pub fn write(
        &self,
        allocation: &Allocation,
        offset: usize,
        data: &[u8],
    ) -> Result<(), CoreError> {
        let mut state = self.state.lock();
        state.check_access(allocation, offset, data.len())?;
        if let Some(record) = state.live.get_mut(&allocation.offset) {
            record.last_used = Instant::now();
        }
        let start = allocation.offset + offset;
        self.storage.lock()[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }

    /// Read `len` bytes of `allocation` starting at `offset`.
    ///
    /// # Errors
    ///
    /// `CoreError::UnknownAllocation` for a released handle,
    /// `CoreError::OutOfBounds` when the read does not fit.
    pub fn read(
        &self,
        allocation: &Allocation,
        offset: usize,
        len: usize,
    ) -> Result<Vec<u8>, CoreError> {
        let state = self.state.lock();
        state.check_access(allocation, offset, len)?;
        let start = allocation.offset + offset;
        let bytes = self.storage.lock()[start..start + len].to_vec();
        Ok(bytes)
    }

    /// Allocate a block that is released when the guard drops.
    #[must_use]
    pub fn allocate_managed(&self, size: usize, alignment: usize) -> Option<ManagedBlock<'_>> {
        self.allocate(size, alignment).map(|allocation| ManagedBlock {
            arena: self,
            allocation: Some(allocation),
        })
    }
}

impl std::fmt::Debug for ArenaAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArenaAllocator")
            .field("pool_size", &self.pool_size)
            .field("allocated", &self.allocated_size())
            .finish()
    }
}

/// Arena allocation released on drop.
#[derive(Debug)]
pub struct ManagedBlock<'a> {
    arena: &'a ArenaAllocator,
    allocation: Option<Allocation>,
}

impl ManagedBlock<'_> {
    /// The underlying allocation.
    #[must_use]
    pub fn allocation(&self) -> Option<&Allocation> {
        self.allocation.as_ref()
    }

    /// Usable size.
    #[must_use]
    pub fn size(&self) -> usize {
        self.allocation.map_or(0, |a| a.size)
    }

    /// See [`ArenaAllocator::write`].
    ///
    /// # Errors
    ///
    /// As [`ArenaAllocator::write`].
    pub fn write(&self, offset: usize, data: &[u8]) -> Result<(), CoreError> {
        let allocation = self.allocation.as_ref().ok_or(CoreError::UnknownAllocation(0))?;
        self.arena.write(allocation, offset, data)
    }

    /// See [`ArenaAllocator::read`].
    ///
    /// # Errors
    ///
    /// As [`ArenaAllocator::read`].
    pub fn read(&self, offset: usize, len: usize) -> Result<Vec<u8>, CoreError> {
        let allocation = self.allocation.as_ref().ok_or(CoreError::UnknownAllocation(0))?;
        self.arena.read(allocation, offset, len)
    }

    /// Keep the allocation alive past the guard and return its handle.
    #[must_use]
    pub fn into_allocation(mut self) -> Option<Allocation> {
        self.allocation.take()
    }
}

impl Drop for ManagedBlock<'_> {
    fn drop(&mut self) {
        if let Some(allocation) = self.allocation.take() {
            self.arena.deallocate(allocation);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_tiles(arena: &ArenaAllocator) {
        let blocks = arena.blocks();
        let mut cursor = 0;
        for pair in blocks.windows(2) {
            assert!(pair[0].in_use || pair[1].in_use, "adjacent free blocks");
        }
        for block in &blocks {
            assert_eq!(block.offset, cursor, "gap or overlap at {cursor}");
            cursor += block.size;
        }
        assert_eq!(cursor, arena.pool_size());
    }

    #[test]
    fn test_allocate_rounds_and_aligns() {
        let arena = ArenaAllocator::new(4096);
        let a = arena.allocate(10, 8).unwrap();
        assert_eq!(a.offset % 8, 0);
        assert_eq!(a.size, 16);
        assert_eq!(a.requested, 10);
        let b = arena.allocate(1, 256).unwrap();
        assert_eq!(b.offset % 256, 0);
        assert_tiles(&arena);
    }

    #[test]
    fn test_invalid_requests() {
        let arena = ArenaAllocator::new(1024);
        assert!(arena.allocate(0, 8).is_none());
        assert!(arena.allocate(16, 3).is_none());
        assert!(arena.allocate(2048, 8).is_none());
    }

    #[test]
    fn test_small_remainder_is_absorbed() {
        let arena = ArenaAllocator::new(100);
        let a = arena.allocate(92, 8).unwrap();
        assert_eq!(a.size, 100);
        assert!(arena.blocks().iter().all(|b| b.in_use));
        assert_tiles(&arena);
    }

    #[test]
    fn test_deallocate_merges_neighbours() {
        let arena = ArenaAllocator::new(1024);
        let a = arena.allocate(128, 64).unwrap();
        let b = arena.allocate(128, 64).unwrap();
        let c = arena.allocate(128, 64).unwrap();
        assert!(arena.deallocate(a));
        assert!(arena.deallocate(c));
        assert_tiles(&arena);
        assert!(arena.deallocate(b));
        assert_eq!(arena.blocks().len(), 1);
        assert_eq!(arena.get_stats().current_usage, 0);
    }

    #[test]
    fn test_double_free_is_ignored() {
        let arena = ArenaAllocator::new(512);
        let a = arena.allocate(64, 8).unwrap();
        assert!(arena.deallocate(a));
        assert!(!arena.deallocate(a));
        assert_eq!(arena.get_stats().deallocation_count, 1);
    }

    #[test]
    fn test_stale_handle_cannot_touch_reused_block() {
        let arena = ArenaAllocator::new(512);
        let old = arena.allocate(64, 8).unwrap();
        assert!(arena.deallocate(old));
        let current = arena.allocate(64, 8).unwrap();
        assert_eq!(current.offset, old.offset);
        assert_ne!(current.id(), old.id());

        assert!(!arena.deallocate(old));
        assert!(arena.contains(&current));
        assert!(!arena.contains(&old));
        assert!(matches!(
            arena.write(&old, 0, b"OLD!"),
            Err(CoreError::UnknownAllocation(_))
        ));

        arena.write(&current, 0, b"live").unwrap();
        let next = arena.allocate(64, 8).unwrap();
        assert_ne!(next.offset, current.offset);
        assert_eq!(arena.read(&current, 0, 4).unwrap(), b"live");
        assert_eq!(arena.get_stats().deallocation_count, 1);
    }

    #[test]
    fn test_handles_from_before_reset_stay_unknown() {
        let arena = ArenaAllocator::new(512);
        let before = arena.allocate(64, 8).unwrap();
        arena.reset();
        let after = arena.allocate(64, 8).unwrap();
        assert_eq!(after.offset, before.offset);
        assert!(!arena.deallocate(before));
        assert!(arena.contains(&after));
    }

    #[test]
    fn test_fragmentation_ratio() {
        let arena = ArenaAllocator::new(1024);
        let blocks: Vec<_> = (0..8).map(|_| arena.allocate(128, 8).unwrap()).collect();
        assert_eq!(arena.get_stats().fragmentation_ratio, 0.0);
        for (i, block) in blocks.into_iter().enumerate() {
            if i % 2 == 0 {
                arena.deallocate(block);
            }
        }
        let stats = arena.get_stats();
        assert_eq!(stats.free_blocks, 4);
        assert_eq!(stats.largest_free_block, 128);
        assert!((stats.fragmentation_ratio - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_write_read_bounds() {
        let arena = ArenaAllocator::new(256);
        let a = arena.allocate(16, 16).unwrap();
        arena.write(&a, 4, b"tensor").unwrap();
        assert_eq!(arena.read(&a, 4, 6).unwrap(), b"tensor");
        assert!(matches!(
            arena.write(&a, 12, b"overflow"),
            Err(CoreError::OutOfBounds { .. })
        ));
        arena.deallocate(a);
        assert!(matches!(arena.read(&a, 0, 1), Err(CoreError::UnknownAllocation(_))));
    }

    #[test]
    fn test_managed_block_releases_on_drop() {
        let arena = ArenaAllocator::new(256);
        {
            let block = arena.allocate_managed(32, 8).unwrap();
            block.write(0, &[1, 2, 3]).unwrap();
            assert_eq!(arena.live_allocations(), 1);
        }
        assert_eq!(arena.live_allocations(), 0);

        let kept = arena.allocate_managed(32, 8).unwrap().into_allocation().unwrap();
        assert!(arena.contains(&kept));
    }

    #[test]
    fn test_reset_and_compact() {
        let arena = ArenaAllocator::new(512);
        let a = arena.allocate(64, 8).unwrap();
        assert_eq!(arena.compact(), 0);
        arena.reset();
        assert!(!arena.contains(&a));
        let stats = arena.get_stats();
        assert_eq!(stats.allocation_count, 0);
        assert_eq!(stats.free_blocks, 1);
        assert_tiles(&arena);
    }
}
