//! Runtime configuration surface.
//!
//! The core consumes these options from whatever front end owns argument
//! parsing; nothing here reads argv. Environment variables are the one
//! exception: `JANK_EXTRA_FLAGS` and the `JANK_OPT_*` toggles are read
//! directly because they must work in embedded hosts with no CLI at all.

use std::path::PathBuf;

/// Code generation target for the compile pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CodegenTarget {
    /// Emit LLVM IR and load it into the evaluator.
    LlvmIr,
    /// Emit C++ translation units (default for incremental eval).
    #[default]
    Cpp,
    /// Ahead-of-time WASM module output.
    WasmAot,
    /// WASM hot-reload patch output.
    WasmPatch,
}

/// Options consumed by the runtime, JIT, cache, and servers.
#[derive(Debug, Clone)]
pub struct Config {
    /// Additional `-I` include directories.
    pub include_dirs: Vec<String>,
    /// Additional `-L` library directories.
    pub library_dirs: Vec<String>,
    /// Libraries to load at JIT startup and pass to the AOT linker.
    pub libs: Vec<String>,
    /// Libraries loaded only into the JIT for symbol resolution.
    pub jit_libs: Vec<String>,
    /// Libraries passed only to the AOT linker.
    pub link_libs: Vec<String>,
    /// Loose object files to load at JIT startup.
    pub object_files: Vec<String>,
    /// `-D` preprocessor defines.
    pub define_macros: Vec<String>,
    /// macOS frameworks.
    pub frameworks: Vec<String>,
    /// Optimization level, 0..=3.
    pub optimization_level: u8,
    /// Emit debug symbols.
    pub debug_symbols: bool,
    /// Call vars directly instead of through the var cell when safe.
    pub direct_var_call: bool,
    /// Code generation target.
    pub codegen: CodegenTarget,
    /// Mirror generated C++ to this path.
    pub save_cpp: Option<PathBuf>,
    /// Mirror generated LLVM IR to this path.
    pub save_llvm_ir: Option<PathBuf>,
    /// Register JIT frames with the OS profiler.
    pub perf_profiling_enabled: bool,
    /// Profiler sample rate in Hz.
    pub profiler_sample_rate: u32,
    /// Profiler output path.
    pub profiler_output: Option<PathBuf>,
    /// Compile-server bind port.
    pub compile_server_port: u16,
    /// Resource directory holding the prelude header and bundled PCH.
    pub resource_dir: Option<PathBuf>,
    /// nREPL server port; 0 picks an ephemeral port.
    pub nrepl_port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            include_dirs: Vec::new(),
            library_dirs: Vec::new(),
            libs: Vec::new(),
            jit_libs: Vec::new(),
            link_libs: Vec::new(),
            object_files: Vec::new(),
            define_macros: Vec::new(),
            frameworks: Vec::new(),
            optimization_level: 0,
            debug_symbols: false,
            direct_var_call: false,
            codegen: CodegenTarget::default(),
            save_cpp: None,
            save_llvm_ir: None,
            perf_profiling_enabled: false,
            profiler_sample_rate: 99,
            profiler_output: None,
            compile_server_port: 5559,
            resource_dir: None,
            nrepl_port: 0,
        }
    }
}

/// Version string pinning on-disk artifacts to this build. Cached objects are
/// ABI-coupled to the runtime, so the cache directory embeds this value.
pub fn binary_version() -> String {
    format!(
        "{}-{}-{}",
        env!("CARGO_PKG_VERSION"),
        std::env::consts::OS,
        std::env::consts::ARCH
    )
}

/// Extra C++ flags appended at JIT init, from `JANK_EXTRA_FLAGS`.
pub fn extra_jit_flags() -> Vec<String> {
    match std::env::var("JANK_EXTRA_FLAGS") {
        Ok(flags) => flags.split_whitespace().map(str::to_string).collect(),
        Err(_) => Vec::new(),
    }
}
