//! JIT subsystem: evaluator backend seam, incremental processor, artifact
//! caches, fatal-error recovery, and the eval pipeline.

pub mod backend;
pub mod incremental;
pub mod persistent_cache;
pub mod pipeline;
pub mod processor;
pub mod recovery;
#[cfg(unix)]
pub mod system;
pub mod toolchain;

pub use backend::{Interpreter, NativeValue};
pub use incremental::{CompiledDef, IncrementalRegistry, RegistryStats};
pub use persistent_cache::{format_hash, CacheEntry, CacheStats, PersistentCache};
pub use pipeline::{
    AnalyzedForm, Analyzer, Codegen, GeneratedUnit, IncrementalPipeline, RemoteArtifact,
    RemoteCompiler,
};
pub use processor::JitProcessor;
pub use recovery::{
    raise_fatal_error, recovery_point_installed, with_recovery, FatalError, RecoveryGuard,
    FATAL_ERROR_SIGNAL,
};
#[cfg(unix)]
pub use system::SystemInterpreter;
