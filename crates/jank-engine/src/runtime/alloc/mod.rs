//! Pluggable allocator surface.
//!
//! Value boxing consults a thread-local current allocator before falling
//! back to the default heap. Arenas and the debug allocator implement the
//! same interface and are installed scope-locally via [`AllocatorScope`].
//!
//! Memory handed out by a scoped allocator is only valid within that scope;
//! values that must escape have to be copied into the default heap by the
//! caller. Objects allocated from an arena never run destructors, so arenas
//! are only appropriate for short-lived, pointer-free values.

mod arena;
mod debug;
mod heap;

pub use arena::{Arena, ArenaScope, ArenaStats, DEFAULT_CHUNK_SIZE, MAX_SMALL_ALLOC};
pub use debug::{AllocInfo, DebugAllocator, DebugStats};
pub use heap::{global_heap, Heap, HeapStats};

use std::cell::Cell;
use std::ptr::NonNull;

/// Allocation statistics common to every allocator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AllocStats {
    /// Total bytes claimed from the system.
    pub total_allocated: usize,
    /// Total bytes handed to callers.
    pub total_used: usize,
}

/// Abstract allocator interface.
///
/// Implementations may be bump allocators, pools, or tracking wrappers. The
/// hot allocation path is [`try_allocator_alloc`]; everything else is
/// bookkeeping.
pub trait Allocator {
    /// Allocate `size` bytes at `align`. Returns null on failure.
    fn alloc(&mut self, size: usize, align: usize) -> *mut u8;

    /// Release a previous allocation. Arena-style allocators ignore this;
    /// pool allocators return the memory to the pool.
    fn free(&mut self, _ptr: *mut u8, _size: usize, _align: usize) {}

    /// Reset the allocator, invalidating all outstanding allocations.
    fn reset(&mut self) {}

    /// Allocation statistics.
    fn stats(&self) -> AllocStats {
        AllocStats::default()
    }
}

thread_local! {
    /// Current allocator for this thread; `None` means the default heap.
    static CURRENT_ALLOCATOR: Cell<Option<*mut dyn Allocator>> = const { Cell::new(None) };
}

/// Allocate from the thread's current allocator, if one is installed.
///
/// Returns `None` when no allocator is active (callers then use the default
/// heap) or when the active allocator is out of memory.
#[inline]
pub fn try_allocator_alloc(size: usize, align: usize) -> Option<NonNull<u8>> {
    let current = CURRENT_ALLOCATOR.with(Cell::get)?;
    // The scope guard guarantees the allocator outlives every allocation
    // attempt made while it is installed.
    let ptr = unsafe { (*current).alloc(size, align) };
    NonNull::new(ptr)
}

/// Whether a scoped allocator is installed on this thread.
pub fn allocator_installed() -> bool {
    CURRENT_ALLOCATOR.with(Cell::get).is_some()
}

/// Installs an allocator as the thread's current one for the guard's
/// lifetime, restoring the previous allocator on drop (on every exit path,
/// including unwinds).
pub struct AllocatorScope<'a> {
    previous: Option<*mut dyn Allocator>,
    _allocator: std::marker::PhantomData<&'a mut dyn Allocator>,
}

impl<'a> AllocatorScope<'a> {
    /// Install `allocator` for the current thread.
    pub fn new(allocator: &'a mut (dyn Allocator + 'a)) -> Self {
        // Erase the lifetime for thread-local storage; PhantomData ties the
        // guard back to 'a so the borrow outlives every use.
        let raw = unsafe {
            std::mem::transmute::<*mut (dyn Allocator + 'a), *mut (dyn Allocator + 'static)>(
                allocator as *mut dyn Allocator,
            )
        };
        let previous = CURRENT_ALLOCATOR.with(|cell| cell.replace(Some(raw)));
        Self {
            previous,
            _allocator: std::marker::PhantomData,
        }
    }
}

impl Drop for AllocatorScope<'_> {
    fn drop(&mut self) {
        CURRENT_ALLOCATOR.with(|cell| cell.set(self.previous));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountingAllocator {
        calls: usize,
        backing: Vec<Box<[u8]>>,
    }

    impl CountingAllocator {
        fn new() -> Self {
            Self {
                calls: 0,
                backing: Vec::new(),
            }
        }
    }

    impl Allocator for CountingAllocator {
        fn alloc(&mut self, size: usize, _align: usize) -> *mut u8 {
            self.calls += 1;
            self.backing.push(vec![0u8; size].into_boxed_slice());
            self.backing.last_mut().unwrap().as_mut_ptr()
        }
    }

    #[test]
    fn test_no_allocator_by_default() {
        assert!(!allocator_installed());
        assert!(try_allocator_alloc(16, 8).is_none());
    }

    #[test]
    fn test_scope_installs_and_restores() {
        let mut counting = CountingAllocator::new();
        {
            let _scope = AllocatorScope::new(&mut counting);
            assert!(allocator_installed());
            assert!(try_allocator_alloc(16, 8).is_some());
        }
        assert!(!allocator_installed());
        assert_eq!(counting.calls, 1);
    }

    #[test]
    fn test_scopes_nest() {
        let mut outer = CountingAllocator::new();
        let mut inner = CountingAllocator::new();
        {
            let _outer_scope = AllocatorScope::new(&mut outer);
            {
                let _inner_scope = AllocatorScope::new(&mut inner);
                try_allocator_alloc(8, 8);
            }
            try_allocator_alloc(8, 8);
        }
        assert_eq!(inner.calls, 1);
        assert_eq!(outer.calls, 1);
    }
}
