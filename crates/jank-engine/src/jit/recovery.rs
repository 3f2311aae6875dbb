//! Fatal-error recovery.
//!
//! The embedded evaluator reports some failures through a fatal handler
//! that would ordinarily terminate the process. When a recovery point is
//! registered on the current thread, [`raise_fatal_error`] transfers
//! control back to the innermost [`with_recovery`] boundary instead, with a
//! distinguished signal value; without one, the process exits (70 when a
//! crash diagnostic was requested, 1 otherwise).
//!
//! The transfer rides a panic with a private payload type caught at the
//! recovery boundary, so no frames written in other languages are unwound.

use std::cell::Cell;
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};

use tracing::error;

/// Signal value delivered to a recovery point by a fatal error.
pub const FATAL_ERROR_SIGNAL: i32 = 99;

thread_local! {
    static RECOVERY_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// A recovered fatal error.
#[derive(Debug, Clone, thiserror::Error)]
#[error("fatal evaluator error (signal {signal}): {message}")]
pub struct FatalError {
    /// Always [`FATAL_ERROR_SIGNAL`] for handler-raised errors.
    pub signal: i32,
    /// Handler-provided message.
    pub message: String,
}

struct FatalPayload {
    signal: i32,
    message: String,
}

/// Registers a recovery point on the current thread for the guard's
/// lifetime. Usually used through [`with_recovery`].
pub struct RecoveryGuard;

impl RecoveryGuard {
    /// Register a recovery point.
    pub fn new() -> Self {
        RECOVERY_DEPTH.with(|depth| depth.set(depth.get() + 1));
        Self
    }
}

impl Default for RecoveryGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for RecoveryGuard {
    fn drop(&mut self) {
        RECOVERY_DEPTH.with(|depth| depth.set(depth.get() - 1));
    }
}

/// Whether a recovery point is registered on this thread.
pub fn recovery_point_installed() -> bool {
    RECOVERY_DEPTH.with(Cell::get) > 0
}

/// Report a fatal evaluator error.
///
/// Returns control to the innermost recovery point when one is installed;
/// otherwise terminates the process.
pub fn raise_fatal_error(message: &str, gen_crash_diag: bool) -> ! {
    error!(message, "fatal evaluator error");

    if recovery_point_installed() {
        std::panic::panic_any(FatalPayload {
            signal: FATAL_ERROR_SIGNAL,
            message: message.to_string(),
        });
    }

    std::process::exit(if gen_crash_diag { 70 } else { 1 });
}

/// Run `f` under a recovery point.
///
/// Fatal errors raised inside `f` surface as `Err(FatalError)`; ordinary
/// panics propagate unchanged.
pub fn with_recovery<T>(f: impl FnOnce() -> T) -> Result<T, FatalError> {
    let _guard = RecoveryGuard::new();
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => Ok(value),
        Err(payload) => match payload.downcast::<FatalPayload>() {
            Ok(fatal) => Err(FatalError {
                signal: fatal.signal,
                message: fatal.message,
            }),
            Err(other) => resume_unwind(other),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_recovery_point_by_default() {
        assert!(!recovery_point_installed());
    }

    #[test]
    fn test_fatal_error_transfers_to_recovery_point() {
        let result = with_recovery(|| {
            raise_fatal_error("llvm assertion", true);
        });
        let err = result.unwrap_err();
        assert_eq!(err.signal, FATAL_ERROR_SIGNAL);
        assert!(err.message.contains("llvm assertion"));
        assert!(!recovery_point_installed());
    }

    #[test]
    fn test_successful_body_passes_through() {
        let result = with_recovery(|| 42);
        assert_eq!(result.unwrap(), 42);
    }

    #[test]
    fn test_nested_recovery_innermost_wins() {
        let outer = with_recovery(|| {
            let inner = with_recovery(|| {
                raise_fatal_error("inner failure", false);
            });
            assert!(inner.is_err());
            "survived"
        });
        assert_eq!(outer.unwrap(), "survived");
    }

    #[test]
    fn test_ordinary_panics_propagate() {
        let caught = std::panic::catch_unwind(|| {
            let _ = with_recovery(|| panic!("plain panic"));
        });
        assert!(caught.is_err());
        assert!(!recovery_point_installed());
    }
}
