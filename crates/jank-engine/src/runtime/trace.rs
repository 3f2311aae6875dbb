//! Thread-local diagnostics state.
//!
//! Two small facilities used when building error messages: a stack of
//! source hints (what the runtime was working on when an error fired) and a
//! bounded ring of recently touched source locations.

use std::cell::RefCell;
use std::collections::VecDeque;

/// Capacity of the debug-trace ring.
pub const TRACE_RING_CAPACITY: usize = 32;

thread_local! {
    static SOURCE_HINTS: RefCell<Vec<String>> = const { RefCell::new(Vec::new()) };
    static TRACE_RING: RefCell<VecDeque<String>> = const { RefCell::new(VecDeque::new()) };
}

/// Pushes a source hint for the guard's lifetime; pops on every exit path.
pub struct SourceHintScope;

impl SourceHintScope {
    /// Push `hint` onto this thread's hint stack.
    pub fn new(hint: impl Into<String>) -> Self {
        SOURCE_HINTS.with(|stack| stack.borrow_mut().push(hint.into()));
        Self
    }
}

impl Drop for SourceHintScope {
    fn drop(&mut self) {
        SOURCE_HINTS.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

/// Innermost source hint, if any.
pub fn current_source_hint() -> Option<String> {
    SOURCE_HINTS.with(|stack| stack.borrow().last().cloned())
}

/// Depth of the hint stack.
pub fn source_hint_depth() -> usize {
    SOURCE_HINTS.with(|stack| stack.borrow().len())
}

/// Record a source location in the debug-trace ring, evicting the oldest
/// entry when full.
pub fn trace_location(location: impl Into<String>) {
    TRACE_RING.with(|ring| {
        let mut ring = ring.borrow_mut();
        if ring.len() == TRACE_RING_CAPACITY {
            ring.pop_front();
        }
        ring.push_back(location.into());
    });
}

/// Recently traced locations, oldest first.
pub fn recent_locations() -> Vec<String> {
    TRACE_RING.with(|ring| ring.borrow().iter().cloned().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hint_scope_balances() {
        let depth_before = source_hint_depth();
        {
            let _outer = SourceHintScope::new("outer");
            assert_eq!(current_source_hint().as_deref(), Some("outer"));
            {
                let _inner = SourceHintScope::new("inner");
                assert_eq!(current_source_hint().as_deref(), Some("inner"));
            }
            assert_eq!(current_source_hint().as_deref(), Some("outer"));
        }
        assert_eq!(source_hint_depth(), depth_before);
    }

    #[test]
    fn test_trace_ring_bounded() {
        for i in 0..(TRACE_RING_CAPACITY + 8) {
            trace_location(format!("loc-{}", i));
        }
        let recent = recent_locations();
        assert_eq!(recent.len(), TRACE_RING_CAPACITY);
        assert_eq!(recent.last().unwrap(), &format!("loc-{}", TRACE_RING_CAPACITY + 7));
        assert_eq!(recent.first().unwrap(), "loc-8");
    }
}
