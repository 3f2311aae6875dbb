//! Core error types.

use crate::runtime::value::ObjRef;

/// Errors produced while evaluating jank source through the incremental
/// pipeline. The taxonomy mirrors the protocol-level error classes: analysis
/// and codegen rejections are compile errors, thrown values and foreign
/// failures are runtime errors.
#[derive(Debug, thiserror::Error)]
pub enum EvalError {
    /// The analyzer rejected the source.
    #[error("Analysis error: {0}")]
    Analysis(String),

    /// Code generation rejected the expression.
    #[error("Codegen error: {0}")]
    Codegen(String),

    /// The C++ toolchain or embedded evaluator failed.
    #[error("Compile error: {0}")]
    Compile(String),

    /// A foreign error surfaced with a message.
    #[error("{0}")]
    Runtime(String),

    /// A runtime value was thrown as an exception.
    #[error("{}", crate::runtime::value::to_code_string_ref(.0))]
    Thrown(ObjRef),

    /// The evaluator hit a fatal error and control returned through a
    /// recovery point.
    #[error("fatal evaluator error (signal {0})")]
    FatalRecovered(i32),

    /// JIT subsystem failure.
    #[error(transparent)]
    Jit(#[from] JitError),
}

impl EvalError {
    /// Short class name used by protocol layers to tag failures.
    pub fn kind_name(&self) -> &'static str {
        match self {
            EvalError::Analysis(_) | EvalError::Codegen(_) | EvalError::Compile(_) => "compile",
            EvalError::Runtime(_) | EvalError::Thrown(_) => "runtime",
            EvalError::FatalRecovered(_) => "compile",
            EvalError::Jit(_) => "compile",
        }
    }

    /// Printable type name for nREPL exception reporting.
    pub fn type_name(&self) -> String {
        match self {
            EvalError::Analysis(_) => "jank.analysis-error".to_string(),
            EvalError::Codegen(_) => "jank.codegen-error".to_string(),
            EvalError::Compile(_) => "jank.compile-error".to_string(),
            EvalError::Runtime(_) => "jank.runtime-error".to_string(),
            EvalError::Thrown(value) => {
                format!("jank.thrown/{}", value.kind().name())
            }
            EvalError::FatalRecovered(_) => "jank.fatal-error".to_string(),
            EvalError::Jit(_) => "jank.jit-error".to_string(),
        }
    }
}

/// Errors from the JIT subsystem.
#[derive(Debug, thiserror::Error)]
pub enum JitError {
    /// Startup failed; missing toolchain, resource dir, or precompiled
    /// header. Fatal at init.
    #[error("JIT init failure: {0}")]
    Init(String),

    /// The evaluator rejected a snippet. Carries a preview of the failing
    /// code plus accumulated diagnostics.
    #[error("Failed to evaluate C++ code:\n{preview}\n{diagnostics}")]
    Eval {
        /// Up to 500 characters of the failing code.
        preview: String,
        /// Accumulated interpreter diagnostics.
        diagnostics: String,
    },

    /// An object file could not be loaded.
    #[error("failed to load object file: {0}")]
    LoadObject(String),

    /// An IR module or bitcode buffer could not be loaded.
    #[error("unable to load module {0}")]
    LoadModule(String),

    /// A dynamic library could not be loaded.
    #[error("Failed to load dynamic library '{path}': {message}")]
    LoadLibrary {
        /// Path or name that was attempted.
        path: String,
        /// Underlying loader message.
        message: String,
    },

    /// Symbol table lookup failed.
    #[error("Failed to find symbol: '{0}'")]
    SymbolNotFound(String),

    /// Symbol removal failed.
    #[error("Failed to remove the symbol: '{0}'")]
    SymbolNotRemoved(String),

    /// The external C++ toolchain exited non-zero.
    #[error("toolchain failure: {0}")]
    Toolchain(String),
}
