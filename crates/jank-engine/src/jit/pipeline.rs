//! Incremental compile/eval pipeline.
//!
//! The control flow for every eval: analyzer output is fingerprinted, the
//! incremental registry is consulted, then the persistent cache, and only
//! then is code generated and compiled — locally through the JIT, or on a
//! remote peer when remote compilation is enabled. Compiled defs execute
//! through their synthesized factory symbol and land in a var.
//!
//! The analyzer and code generator are external collaborators bound by the
//! traits below.

use std::ffi::c_void;
use std::io::Write as _;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::analyze::expr::{Expr, Sym};
use crate::analyze::fingerprint::hash_expr;
use crate::config::Config;
use crate::error::EvalError;
use crate::jit::incremental::{IncrementalRegistry, RegistryStats};
use crate::jit::persistent_cache::{CacheStats, PersistentCache};
use crate::jit::processor::JitProcessor;
use crate::profile::Timer;
use crate::runtime::context::{Context, Evaluator};
use crate::runtime::value::{make_box, nil, ObjRef, Object};

/// One analyzed top-level form plus the source text it came from (the
/// source travels with the form for remote compilation).
#[derive(Debug, Clone)]
pub struct AnalyzedForm {
    /// Analyzed expression.
    pub expr: Expr,
    /// Original source text of the form.
    pub source: String,
}

/// External analyzer: source text to analyzed forms.
pub trait Analyzer: Send + Sync {
    /// Analyze `code` in the context's current namespace.
    fn analyze(&self, ctx: &Context, code: &str) -> Result<Vec<AnalyzedForm>, EvalError>;
}

/// One generated translation unit.
#[derive(Debug, Clone, Default)]
pub struct GeneratedUnit {
    /// C++ source of the unit; may be empty when the expression alone
    /// suffices.
    pub source: String,
    /// Qualified name of the defined symbol; empty for plain expressions.
    pub qualified_name: String,
    /// Unique generated symbol name.
    pub unique_name: String,
    /// Instantiation expression producing the form's value.
    pub expression_str: String,
}

/// External code generator: analyzed form to C++ unit.
pub trait Codegen: Send + Sync {
    /// Generate a unit for `form`.
    fn generate(&self, ctx: &Context, form: &AnalyzedForm) -> Result<GeneratedUnit, EvalError>;
}

/// Object produced by a remote compile peer.
#[derive(Debug, Clone)]
pub struct RemoteArtifact {
    /// Entry symbol to execute after loading.
    pub entry_symbol: String,
    /// Relocatable object bytes.
    pub object: Vec<u8>,
}

/// Delegates compilation to a peer when the local host cannot run the
/// compiler.
pub trait RemoteCompiler: Send + Sync {
    /// Whether remote compilation is currently enabled and connected.
    fn is_enabled(&self) -> bool;

    /// Compile `code` in namespace `ns` on the peer.
    fn compile(&self, code: &str, ns: &str) -> Result<RemoteArtifact, EvalError>;
}

type FactoryFn = extern "C" fn() -> *mut Object;

static REMOTE_OBJECT_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// The incremental pipeline; installed as the context's evaluator.
pub struct IncrementalPipeline {
    analyzer: Arc<dyn Analyzer>,
    codegen: Arc<dyn Codegen>,
    jit: Mutex<JitProcessor>,
    cache: PersistentCache,
    registry: Mutex<IncrementalRegistry>,
    remote: Option<Arc<dyn RemoteCompiler>>,
    save_cpp: Option<PathBuf>,
}

impl IncrementalPipeline {
    /// Assemble the pipeline.
    pub fn new(
        config: &Config,
        analyzer: Arc<dyn Analyzer>,
        codegen: Arc<dyn Codegen>,
        jit: JitProcessor,
        cache: PersistentCache,
    ) -> Self {
        Self {
            analyzer,
            codegen,
            jit: Mutex::new(jit),
            cache,
            registry: Mutex::new(IncrementalRegistry::new()),
            remote: None,
            save_cpp: config.save_cpp.clone(),
        }
    }

    /// Attach a remote compile delegate.
    pub fn with_remote(mut self, remote: Arc<dyn RemoteCompiler>) -> Self {
        self.remote = Some(remote);
        self
    }

    /// Incremental-registry statistics.
    pub fn registry_stats(&self) -> RegistryStats {
        self.registry.lock().stats()
    }

    /// Persistent-cache statistics.
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Invalidate one def (REPL redefinition).
    pub fn invalidate(&self, ns: &str, name: &str) {
        self.registry.lock().invalidate(ns, name);
    }

    /// Invalidate a whole namespace (reload).
    pub fn invalidate_namespace(&self, ns: &str) {
        self.registry.lock().invalidate_namespace(ns);
    }

    fn mirror_generated(&self, unit: &GeneratedUnit) {
        let Some(path) = &self.save_cpp else {
            return;
        };
        let result = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .and_then(|mut file| file.write_all(unit.source.as_bytes()));
        if let Err(e) = result {
            warn!(error = %e, "failed to mirror generated C++");
        }
    }

    fn def_target(&self, ctx: &Context, name: &Sym) -> (String, String) {
        let ns = name
            .ns
            .clone()
            .unwrap_or_else(|| ctx.current_ns_name());
        (ns, name.name.clone())
    }

    /// Run an already-loaded factory symbol and bind its value.
    fn run_factory(
        &self,
        ctx: &Context,
        jit: &mut JitProcessor,
        symbol: &str,
        ns: &str,
        name: &str,
        hash: u64,
    ) -> Result<ObjRef, EvalError> {
        let address = jit.find_symbol(symbol)?;
        // Factory functions are generated with this exact signature.
        let factory: FactoryFn = unsafe { std::mem::transmute::<*mut c_void, FactoryFn>(address) };
        let value = ObjRef::from_raw_or_nil(factory());

        let var = ctx.intern_var(ns, name);
        var.bind_root(value);
        self.registry.lock().store(ns, name, hash, var.clone());
        Ok(make_box(Object::Var(var)))
    }

    /// Try to satisfy a def from the on-disk cache. Returns `None` when the
    /// entry is unusable for any reason; the caller then compiles fresh.
    fn eval_def_from_disk(
        &self,
        ctx: &Context,
        ns: &str,
        name: &str,
        hash: u64,
    ) -> Option<ObjRef> {
        if !self.cache.has_cached_source(hash) {
            self.cache.record_disk_miss();
            return None;
        }
        self.cache.record_disk_hit();

        if !self.cache.has_compiled_object(hash) && !self.cache.compile_to_object(hash) {
            return None;
        }
        let object_path = self.cache.object_path(hash)?;

        let mut jit = self.jit.lock();
        if let Err(e) = jit.load_object(&object_path) {
            warn!(error = %e, "cached object failed to load");
            return None;
        }
        let factory = PersistentCache::factory_name(hash);
        match self.run_factory(ctx, &mut jit, &factory, ns, name, hash) {
            Ok(value) => Some(value),
            Err(e) => {
                debug!(error = %e, "cached factory failed; recompiling");
                None
            }
        }
    }

    fn eval_def_remote(
        &self,
        ctx: &Context,
        remote: &dyn RemoteCompiler,
        form: &AnalyzedForm,
        ns: &str,
        name: &str,
        hash: u64,
    ) -> Result<ObjRef, EvalError> {
        let artifact = remote.compile(&form.source, ns)?;

        let object_path = std::env::temp_dir().join(format!(
            "jank-remote-{}-{}.o",
            std::process::id(),
            REMOTE_OBJECT_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        std::fs::write(&object_path, &artifact.object)
            .map_err(|e| EvalError::Compile(format!("cannot stage remote object: {}", e)))?;

        let mut jit = self.jit.lock();
        jit.load_object(&object_path)?;
        self.run_factory(ctx, &mut jit, &artifact.entry_symbol, ns, name, hash)
    }

    fn eval_def_local(
        &self,
        ctx: &Context,
        form: &AnalyzedForm,
        ns: &str,
        name: &str,
        hash: u64,
    ) -> Result<ObjRef, EvalError> {
        let unit = self.codegen.generate(ctx, form)?;
        self.mirror_generated(&unit);

        let value = {
            let mut jit = self.jit.lock();
            if !unit.source.is_empty() {
                jit.eval(&unit.source)?;
            }
            let native = jit.eval_with_result(&unit.expression_str)?;
            ObjRef::from_raw_or_nil(native.ptr.cast())
        };

        self.cache
            .save_source(hash, &unit.source, &unit.qualified_name, &unit.unique_name);
        self.cache.save_expression(hash, &unit.expression_str);

        let var = ctx.intern_var(ns, name);
        var.bind_root(value);
        self.registry.lock().store(ns, name, hash, var.clone());
        Ok(make_box(Object::Var(var)))
    }

    fn eval_def(
        &self,
        ctx: &Context,
        form: &AnalyzedForm,
        name: &Sym,
    ) -> Result<ObjRef, EvalError> {
        let (ns, def_name) = self.def_target(ctx, name);
        let hash = hash_expr(&form.expr);

        if let Some(var) = self.registry.lock().get(&ns, &def_name, hash) {
            // Unchanged definition; nothing is re-emitted.
            return Ok(make_box(Object::Var(var)));
        }

        if let Some(value) = self.eval_def_from_disk(ctx, &ns, &def_name, hash) {
            return Ok(value);
        }

        match &self.remote {
            Some(remote) if remote.is_enabled() => {
                self.eval_def_remote(ctx, remote.as_ref(), form, &ns, &def_name, hash)
            }
            _ => self.eval_def_local(ctx, form, &ns, &def_name, hash),
        }
    }

    fn eval_expression(&self, ctx: &Context, form: &AnalyzedForm) -> Result<ObjRef, EvalError> {
        let unit = self.codegen.generate(ctx, form)?;
        self.mirror_generated(&unit);

        let mut jit = self.jit.lock();
        if !unit.source.is_empty() {
            jit.eval(&unit.source)?;
        }
        let native = jit.eval_with_result(&unit.expression_str)?;
        Ok(ObjRef::from_raw_or_nil(native.ptr.cast()))
    }

    fn eval_form(&self, ctx: &Context, form: &AnalyzedForm) -> Result<ObjRef, EvalError> {
        match &form.expr {
            Expr::Def {
                name,
                value: Some(_),
                ..
            } => self.eval_def(ctx, form, name),
            Expr::Def { name, value: None, .. } => {
                // Declaration without a value: intern the var unbound.
                let (ns, def_name) = self.def_target(ctx, name);
                let var = ctx.intern_var(&ns, &def_name);
                Ok(make_box(Object::Var(var)))
            }
            _ => self.eval_expression(ctx, form),
        }
    }
}

impl Evaluator for IncrementalPipeline {
    fn eval_string(&self, ctx: &Context, code: &str) -> Result<ObjRef, EvalError> {
        let _timer = Timer::new("pipeline eval_string");
        let forms = self.analyzer.analyze(ctx, code)?;
        let mut result = nil();
        for form in &forms {
            result = self.eval_form(ctx, form)?;
        }
        Ok(result)
    }
}
