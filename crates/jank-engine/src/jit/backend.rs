//! Backend seam for the embedded evaluator.
//!
//! The JIT processor is written against this trait; the production backend
//! drives the system C++ toolchain and the platform loader, and tests plug
//! in an in-memory evaluator.

use std::ffi::c_void;
use std::path::Path;

/// Result of evaluating an expression with value capture.
#[derive(Debug, Clone)]
pub struct NativeValue {
    /// Whether evaluation produced a usable result.
    pub valid: bool,
    /// Whether the result is void (valid, but carries no value).
    pub is_void: bool,
    /// Raw pointer to the result value, when applicable.
    pub ptr: *mut c_void,
    /// Printed type, e.g. `jank::runtime::object*`.
    pub type_str: String,
    /// Printed representation of the value.
    pub repr: String,
}

unsafe impl Send for NativeValue {}

impl Default for NativeValue {
    fn default() -> Self {
        Self {
            valid: false,
            is_void: false,
            ptr: std::ptr::null_mut(),
            type_str: String::new(),
            repr: String::new(),
        }
    }
}

impl NativeValue {
    /// A valid void result.
    pub fn void() -> Self {
        Self {
            valid: true,
            is_void: true,
            ptr: std::ptr::null_mut(),
            type_str: "void".to_string(),
            repr: "(void)".to_string(),
        }
    }
}

/// The embedded evaluator: incremental C++ parse/execute plus object and
/// library loading and symbol table access.
///
/// Failures carry the evaluator's accumulated diagnostic text; the
/// processor attaches code previews.
pub trait Interpreter: Send {
    /// Parse and execute a chunk of code.
    fn eval(&mut self, code: &str) -> Result<(), String>;

    /// Parse and execute, capturing the value of the final expression. The
    /// code must not end in a statement terminator.
    fn eval_with_result(&mut self, code: &str) -> Result<NativeValue, String>;

    /// Add a relocatable object file to the evaluator's image.
    fn add_object(&mut self, path: &Path) -> Result<(), String>;

    /// Add a textual IR module.
    fn add_ir_module(&mut self, name: &str, ir: &[u8]) -> Result<(), String>;

    /// Remove a symbol from the symbol table.
    fn remove_symbol(&mut self, name: &str) -> Result<(), String>;

    /// Resolve a symbol to an address.
    fn find_symbol(&mut self, name: &str) -> Option<*mut c_void>;

    /// Load a dynamic library for symbol resolution.
    fn load_dynamic_library(&mut self, path: &str) -> Result<(), String>;

    /// Hook invoked after new code lands, so freshly JIT-compiled frames can
    /// be registered with the out-of-process stacktrace subsystem.
    fn register_debug_frames(&mut self) {}

    /// Install the plugin set that registers JIT frames with the OS
    /// profiler.
    fn enable_perf_support(&mut self) -> Result<(), String> {
        Ok(())
    }
}
