//! Default value heap.
//!
//! Used whenever no scoped allocator is installed. Values boxed here live
//! for the rest of the process (REPL semantics: vars, interned names, and
//! cached numbers dominate, and superseded values are rare enough not to
//! matter); scope-local reclamation is the arena's job.

use std::alloc::{alloc as sys_alloc, dealloc as sys_dealloc, Layout};
use std::sync::atomic::{AtomicUsize, Ordering};

use once_cell::sync::Lazy;

/// Heap statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStats {
    /// Bytes currently live.
    pub live_bytes: usize,
    /// Allocations served.
    pub allocation_count: usize,
    /// Frees served.
    pub free_count: usize,
}

/// Process-wide default heap with allocation accounting.
pub struct Heap {
    live_bytes: AtomicUsize,
    allocation_count: AtomicUsize,
    free_count: AtomicUsize,
}

static GLOBAL_HEAP: Lazy<Heap> = Lazy::new(|| Heap {
    live_bytes: AtomicUsize::new(0),
    allocation_count: AtomicUsize::new(0),
    free_count: AtomicUsize::new(0),
});

/// The process-wide default heap.
pub fn global_heap() -> &'static Heap {
    &GLOBAL_HEAP
}

impl Heap {
    /// Allocate `layout` bytes.
    ///
    /// # Panics
    ///
    /// Panics when the system allocator fails.
    pub fn alloc(&self, layout: Layout) -> *mut u8 {
        let ptr = unsafe { sys_alloc(layout) };
        if ptr.is_null() {
            panic!("out of memory: {} bytes", layout.size());
        }
        self.live_bytes.fetch_add(layout.size(), Ordering::Relaxed);
        self.allocation_count.fetch_add(1, Ordering::Relaxed);
        ptr
    }

    /// Release a previous allocation.
    ///
    /// # Safety
    ///
    /// `ptr` must have come from [`Heap::alloc`] with the same layout and
    /// must not be used afterwards.
    pub unsafe fn free(&self, ptr: *mut u8, layout: Layout) {
        sys_dealloc(ptr, layout);
        self.live_bytes.fetch_sub(layout.size(), Ordering::Relaxed);
        self.free_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Current statistics snapshot.
    pub fn stats(&self) -> HeapStats {
        HeapStats {
            live_bytes: self.live_bytes.load(Ordering::Relaxed),
            allocation_count: self.allocation_count.load(Ordering::Relaxed),
            free_count: self.free_count.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_free_accounting() {
        let heap = global_heap();
        let before = heap.stats();
        let layout = Layout::from_size_align(64, 16).unwrap();
        let ptr = heap.alloc(layout);
        assert!(heap.stats().allocation_count > before.allocation_count);
        unsafe { heap.free(ptr, layout) };
        assert!(heap.stats().free_count > before.free_count);
    }
}
