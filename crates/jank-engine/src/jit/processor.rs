//! Incremental JIT processor.
//!
//! One process-wide instance wrapping the embedded evaluator: snippet eval
//! with diagnostics, idempotent object loading, IR/bitcode loading, symbol
//! table access, and dynamic library resolution. Startup loads the
//! configured `--lib`/`--jit-lib` libraries and `--obj` objects.

use std::ffi::c_void;
use std::path::{Path, PathBuf};

use rustc_hash::FxHashSet;
use tracing::debug;

use crate::config::Config;
use crate::error::JitError;
use crate::jit::backend::{Interpreter, NativeValue};
use crate::jit::toolchain::default_shared_lib_name;
use crate::profile::Timer;

const EVAL_PREVIEW_LIMIT: usize = 500;
const RESULT_PREVIEW_LIMIT: usize = 200;

fn preview(code: &str, limit: usize) -> String {
    if code.len() <= limit {
        return code.to_string();
    }
    let mut cut = limit;
    while !code.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}...(truncated)", &code[..cut])
}

/// JIT orchestration over a pluggable evaluator backend.
pub struct JitProcessor {
    backend: Box<dyn Interpreter>,
    library_dirs: Vec<PathBuf>,
    // Canonical paths of loaded objects; repeat loads are no-ops.
    loaded_objects: FxHashSet<String>,
}

impl JitProcessor {
    /// Construct the processor and run the startup sequence: perf plugin
    /// installation when profiling is enabled, then `--lib`, `--jit-lib`,
    /// and `--obj` loading.
    pub fn new(config: &Config, mut backend: Box<dyn Interpreter>) -> Result<Self, JitError> {
        let _timer = Timer::new("jit ctor");

        if config.perf_profiling_enabled {
            backend
                .enable_perf_support()
                .map_err(JitError::Init)?;
        }

        let library_dirs = config
            .library_dirs
            .iter()
            .map(|dir| {
                std::fs::canonicalize(dir).unwrap_or_else(|_| PathBuf::from(dir))
            })
            .collect();

        let mut processor = Self {
            backend,
            library_dirs,
            loaded_objects: FxHashSet::default(),
        };

        processor.load_dynamic_libs(&config.libs)?;
        // JIT-only libraries resolve symbols but are not handed to the AOT
        // linker.
        processor.load_dynamic_libs(&config.jit_libs)?;

        for object in &config.object_files {
            processor.load_object(Path::new(object))?;
        }

        Ok(processor)
    }

    /// Parse and execute a snippet; failures carry a preview of the code
    /// and the evaluator's diagnostics.
    pub fn eval(&mut self, code: &str) -> Result<(), JitError> {
        let _timer = Timer::new("jit eval");
        self.backend.eval(code).map_err(|diagnostics| JitError::Eval {
            preview: preview(code, EVAL_PREVIEW_LIMIT),
            diagnostics,
        })?;
        self.backend.register_debug_frames();
        Ok(())
    }

    /// Parse and execute, capturing the last expression's value. The code
    /// must not end in a statement terminator; the final form is the
    /// result expression.
    pub fn eval_with_result(&mut self, code: &str) -> Result<NativeValue, JitError> {
        let _timer = Timer::new("jit eval_with_result");
        let result = self
            .backend
            .eval_with_result(code)
            .map_err(|diagnostics| JitError::Eval {
                preview: preview(code, RESULT_PREVIEW_LIMIT),
                diagnostics,
            })?;
        self.backend.register_debug_frames();
        Ok(result)
    }

    /// Add a relocatable object to the JIT. Idempotent per canonical path.
    pub fn load_object(&mut self, path: &Path) -> Result<(), JitError> {
        let key = std::fs::canonicalize(path)
            .map(|canonical| canonical.display().to_string())
            .unwrap_or_else(|_| path.display().to_string());

        if self.loaded_objects.contains(&key) {
            return Ok(());
        }

        self.backend
            .add_object(path)
            .map_err(|e| JitError::LoadObject(format!("{}: {}", path.display(), e)))?;
        self.loaded_objects.insert(key);
        self.backend.register_debug_frames();
        debug!(path = %path.display(), "loaded object");
        Ok(())
    }

    /// Number of distinct objects loaded.
    pub fn loaded_object_count(&self) -> usize {
        self.loaded_objects.len()
    }

    /// Add an IR module from bytes; the backend initializes it after
    /// adding.
    pub fn load_bitcode(&mut self, module: &str, bitcode: &[u8]) -> Result<(), JitError> {
        let _timer = Timer::new("jit ir module");
        self.backend
            .add_ir_module(module, bitcode)
            .map_err(|e| JitError::LoadModule(format!("{}: {}", module, e)))?;
        self.backend.register_debug_frames();
        Ok(())
    }

    /// Remove a symbol from the JIT symbol table.
    pub fn remove_symbol(&mut self, name: &str) -> Result<(), JitError> {
        self.backend
            .remove_symbol(name)
            .map_err(|_| JitError::SymbolNotRemoved(name.to_string()))
    }

    /// Resolve a symbol to an address.
    pub fn find_symbol(&mut self, name: &str) -> Result<*mut c_void, JitError> {
        self.backend
            .find_symbol(name)
            .ok_or_else(|| JitError::SymbolNotFound(name.to_string()))
    }

    /// Load one dynamic library by path.
    pub fn load_dynamic_library(&mut self, path: &str) -> Result<(), JitError> {
        if path.is_empty() {
            return Err(JitError::LoadLibrary {
                path: String::new(),
                message: "Attempted to load an empty library path.".to_string(),
            });
        }
        self.backend
            .load_dynamic_library(path)
            .map_err(|message| JitError::LoadLibrary {
                path: path.to_string(),
                message,
            })
    }

    /// Search the configured library directories for `lib`, preferring the
    /// platform-default file name over the raw name.
    pub fn find_dynamic_lib(&self, lib: &str) -> Option<String> {
        let default_name = default_shared_lib_name(lib);
        for dir in &self.library_dirs {
            let default_path = dir.join(&default_name);
            if default_path.exists() {
                return Some(default_path.display().to_string());
            }
            let raw_path = dir.join(lib);
            if raw_path.exists() {
                return Some(raw_path.display().to_string());
            }
        }
        None
    }

    /// Load a list of libraries. Each name resolves by (a) absolute path,
    /// (b) library-directory search, (c) platform-default name then raw
    /// name relative to the process loader.
    pub fn load_dynamic_libs(&mut self, libs: &[String]) -> Result<(), JitError> {
        for lib in libs {
            if Path::new(lib).is_absolute() {
                self.load_dynamic_library(lib)?;
                continue;
            }

            if let Some(found) = self.find_dynamic_lib(lib) {
                self.load_dynamic_library(&found)?;
                continue;
            }

            let default_name = default_shared_lib_name(lib);
            if self.load_dynamic_library(&default_name).is_ok() {
                continue;
            }

            self.load_dynamic_library(lib)?;
        }
        Ok(())
    }
}
