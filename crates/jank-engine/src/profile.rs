//! Wall-clock profiling timers.
//!
//! Scoped timers around the expensive phases (JIT construction, eval,
//! module loads). Disabled timers cost one atomic load; enabled timers log
//! through `tracing` with the thread's nesting depth so traces read as a
//! call tree.

use std::cell::Cell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use tracing::debug;

static ENABLED: AtomicBool = AtomicBool::new(false);

thread_local! {
    static DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// Enable or disable profiling process-wide.
pub fn set_enabled(enabled: bool) {
    ENABLED.store(enabled, Ordering::Relaxed);
}

/// Whether profiling is enabled.
pub fn enabled() -> bool {
    ENABLED.load(Ordering::Relaxed)
}

/// Scoped timer; logs label and elapsed time on drop when profiling is
/// enabled.
pub struct Timer {
    label: &'static str,
    start: Option<Instant>,
}

impl Timer {
    /// Start a timer for `label`.
    pub fn new(label: &'static str) -> Self {
        if !enabled() {
            return Self { label, start: None };
        }
        DEPTH.with(|depth| depth.set(depth.get() + 1));
        Self {
            label,
            start: Some(Instant::now()),
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        if let Some(start) = self.start {
            let depth = DEPTH.with(|depth| {
                let current = depth.get();
                depth.set(current - 1);
                current
            });
            debug!(
                target: "jank::profile",
                label = self.label,
                depth,
                elapsed_us = start.elapsed().as_micros() as u64,
                "timer"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timer_enablement_and_depth() {
        set_enabled(false);
        let timer = Timer::new("noop");
        assert!(timer.start.is_none());
        drop(timer);

        set_enabled(true);
        {
            let _outer = Timer::new("outer");
            let _inner = Timer::new("inner");
            DEPTH.with(|depth| assert_eq!(depth.get(), 2));
        }
        DEPTH.with(|depth| assert_eq!(depth.get(), 0));
        set_enabled(false);
    }
}
