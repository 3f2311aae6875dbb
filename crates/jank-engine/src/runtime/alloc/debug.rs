//! Tracking allocator for detecting memory issues.
//!
//! Unlike the arena, this allocator records every allocation individually so
//! it can detect double frees and leaks.

use std::alloc::{alloc as sys_alloc, dealloc as sys_dealloc, Layout};

use rustc_hash::FxHashMap;

use super::{AllocStats, Allocator};

/// Tracking record for one allocation.
#[derive(Debug, Clone, Copy)]
pub struct AllocInfo {
    /// Allocation address.
    pub ptr: *mut u8,
    /// Requested size.
    pub size: usize,
    /// Requested alignment.
    pub align: usize,
    /// Whether the allocation has been freed.
    pub is_freed: bool,
}

/// Extended statistics for the debug allocator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DebugStats {
    /// Total bytes allocated.
    pub total_allocated: usize,
    /// Total bytes freed.
    pub total_freed: usize,
    /// Currently live bytes.
    pub current_live: usize,
    /// Number of allocations.
    pub allocation_count: usize,
    /// Number of frees.
    pub free_count: usize,
    /// Double-free attempts detected.
    pub double_free_count: usize,
    /// Leaks found by the last `detect_leaks` call.
    pub leak_count: usize,
}

/// Allocator that tracks individual allocations for leak and double-free
/// detection.
#[derive(Default)]
pub struct DebugAllocator {
    allocations: FxHashMap<usize, AllocInfo>,
    stats: DebugStats,
}

impl DebugAllocator {
    /// Fresh debug allocator with no outstanding allocations.
    pub fn new() -> Self {
        Self::default()
    }

    /// Extended statistics.
    pub fn debug_stats(&self) -> DebugStats {
        self.stats
    }

    /// Whether any allocation has not been freed.
    pub fn has_leaks(&self) -> bool {
        self.allocations.values().any(|info| !info.is_freed)
    }

    /// Count leaks and record the count in the stats.
    pub fn detect_leaks(&mut self) -> usize {
        let leaks = self.allocations.values().filter(|info| !info.is_freed).count();
        self.stats.leak_count = leaks;
        leaks
    }

    /// Details for every leaked allocation.
    pub fn leaked_allocations(&self) -> Vec<AllocInfo> {
        self.allocations
            .values()
            .filter(|info| !info.is_freed)
            .copied()
            .collect()
    }

    /// Number of detected double-free attempts.
    pub fn double_free_count(&self) -> usize {
        self.stats.double_free_count
    }

    fn layout_for(size: usize, align: usize) -> Option<Layout> {
        Layout::from_size_align(size, align.max(1)).ok()
    }
}

impl Allocator for DebugAllocator {
    fn alloc(&mut self, size: usize, align: usize) -> *mut u8 {
        let layout = match Self::layout_for(size, align) {
            Some(layout) => layout,
            None => return std::ptr::null_mut(),
        };
        let ptr = unsafe { sys_alloc(layout) };
        if ptr.is_null() {
            return ptr;
        }

        self.allocations.insert(
            ptr as usize,
            AllocInfo {
                ptr,
                size,
                align,
                is_freed: false,
            },
        );
        self.stats.total_allocated += size;
        self.stats.current_live += size;
        self.stats.allocation_count += 1;
        ptr
    }

    fn free(&mut self, ptr: *mut u8, size: usize, align: usize) {
        match self.allocations.get_mut(&(ptr as usize)) {
            Some(info) if info.is_freed => {
                self.stats.double_free_count += 1;
            }
            Some(info) => {
                info.is_freed = true;
                self.stats.total_freed += size;
                self.stats.current_live = self.stats.current_live.saturating_sub(size);
                self.stats.free_count += 1;
                if let Some(layout) = Self::layout_for(size, align) {
                    unsafe { sys_dealloc(ptr, layout) };
                }
            }
            None => {
                // Freeing memory this allocator never handed out counts as a
                // double free for reporting purposes.
                self.stats.double_free_count += 1;
            }
        }
    }

    fn reset(&mut self) {
        for info in self.allocations.values() {
            if !info.is_freed {
                if let Some(layout) = Self::layout_for(info.size, info.align) {
                    unsafe { sys_dealloc(info.ptr, layout) };
                }
            }
        }
        self.allocations.clear();
        self.stats = DebugStats::default();
    }

    fn stats(&self) -> AllocStats {
        AllocStats {
            total_allocated: self.stats.total_allocated,
            total_used: self.stats.current_live,
        }
    }
}

impl Drop for DebugAllocator {
    fn drop(&mut self) {
        self.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracks_allocations() {
        let mut dbg = DebugAllocator::new();
        let ptr = dbg.alloc(32, 8);
        assert!(!ptr.is_null());
        let stats = dbg.debug_stats();
        assert_eq!(stats.allocation_count, 1);
        assert_eq!(stats.current_live, 32);
        assert!(dbg.has_leaks());
    }

    #[test]
    fn test_free_clears_leak() {
        let mut dbg = DebugAllocator::new();
        let ptr = dbg.alloc(32, 8);
        dbg.free(ptr, 32, 8);
        assert!(!dbg.has_leaks());
        assert_eq!(dbg.detect_leaks(), 0);
        assert_eq!(dbg.debug_stats().free_count, 1);
    }

    #[test]
    fn test_double_free_detected() {
        let mut dbg = DebugAllocator::new();
        let ptr = dbg.alloc(16, 8);
        dbg.free(ptr, 16, 8);
        dbg.free(ptr, 16, 8);
        assert_eq!(dbg.double_free_count(), 1);
    }

    #[test]
    fn test_unknown_free_detected() {
        let mut dbg = DebugAllocator::new();
        let mut other = [0u8; 8];
        dbg.free(other.as_mut_ptr(), 8, 8);
        assert_eq!(dbg.double_free_count(), 1);
    }

    #[test]
    fn test_leak_details() {
        let mut dbg = DebugAllocator::new();
        dbg.alloc(24, 8);
        dbg.alloc(40, 8);
        assert_eq!(dbg.detect_leaks(), 2);
        let leaked = dbg.leaked_allocations();
        assert_eq!(leaked.len(), 2);
        let sizes: Vec<usize> = leaked.iter().map(|info| info.size).collect();
        assert!(sizes.contains(&24));
        assert!(sizes.contains(&40));
    }
}
