//! Process runtime context.
//!
//! Owns the namespace registry, the current-namespace binding, the scoped
//! stdout redirect stack, and the installed evaluator (the incremental
//! pipeline in production, anything in tests). Compile and eval are
//! serialized by callers; the context only guards its own tables.

use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::OnceCell;
use parking_lot::RwLock;

use crate::error::EvalError;
use crate::runtime::ns::{Namespace, NamespaceRef, VarRef};
use crate::runtime::value::ObjRef;

/// Default namespace for fresh sessions.
pub const DEFAULT_NS: &str = "user";

/// Evaluates source text against a context. Implemented by the incremental
/// pipeline; the seam exists so hosts and tests can substitute their own.
pub trait Evaluator: Send + Sync {
    /// Evaluate `code`, returning the value of the last form.
    fn eval_string(&self, ctx: &Context, code: &str) -> Result<ObjRef, EvalError>;
}

type OutputSink = Arc<dyn Fn(&str) + Send + Sync>;

/// Process-wide runtime state.
pub struct Context {
    namespaces: DashMap<String, NamespaceRef>,
    current_ns: RwLock<String>,
    output_sinks: RwLock<Vec<OutputSink>>,
    evaluator: RwLock<Option<Arc<dyn Evaluator>>>,
}

static GLOBAL: OnceCell<Arc<Context>> = OnceCell::new();

impl Context {
    /// Fresh context with `user` and `clojure.core` interned.
    pub fn new() -> Arc<Self> {
        let ctx = Arc::new(Self {
            namespaces: DashMap::new(),
            current_ns: RwLock::new(DEFAULT_NS.to_string()),
            output_sinks: RwLock::new(Vec::new()),
            evaluator: RwLock::new(None),
        });
        ctx.intern_ns(DEFAULT_NS);
        ctx.intern_ns("clojure.core");
        ctx
    }

    /// Install the context consulted by C ABI exports. First install wins.
    pub fn install_global(ctx: Arc<Context>) {
        let _ = GLOBAL.set(ctx);
    }

    /// The globally installed context, if any.
    pub fn global() -> Option<Arc<Context>> {
        GLOBAL.get().cloned()
    }

    // ── Namespaces ───────────────────────────────────────────────────────

    /// Find a namespace by name.
    pub fn find_ns(&self, name: &str) -> Option<NamespaceRef> {
        self.namespaces.get(name).map(|entry| entry.value().clone())
    }

    /// Find or create a namespace.
    pub fn intern_ns(&self, name: &str) -> NamespaceRef {
        self.namespaces
            .entry(name.to_string())
            .or_insert_with(|| Namespace::new(name))
            .value()
            .clone()
    }

    /// Names of all namespaces, sorted.
    pub fn ns_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.namespaces.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Current namespace name.
    pub fn current_ns_name(&self) -> String {
        self.current_ns.read().clone()
    }

    /// Current namespace, interning it if something unbound it.
    pub fn current_ns(&self) -> NamespaceRef {
        let name = self.current_ns_name();
        self.intern_ns(&name)
    }

    /// Switch the current namespace.
    pub fn set_current_ns(&self, name: &str) {
        self.intern_ns(name);
        *self.current_ns.write() = name.to_string();
    }

    /// Find a var by namespace and name.
    pub fn find_var(&self, ns: &str, name: &str) -> Option<VarRef> {
        self.find_ns(ns)?.find_var(name)
    }

    /// Intern a var, creating namespace and var as needed.
    pub fn intern_var(&self, ns: &str, name: &str) -> VarRef {
        self.intern_ns(ns).intern_var(name)
    }

    // ── Output redirection ───────────────────────────────────────────────

    /// Write to the innermost redirect sink, or the process stdout when no
    /// redirect scope is active.
    pub fn write_stdout(&self, chunk: &str) {
        let sinks = self.output_sinks.read();
        match sinks.last() {
            Some(sink) => sink(chunk),
            None => print!("{}", chunk),
        }
    }

    fn push_output_sink(&self, sink: OutputSink) {
        self.output_sinks.write().push(sink);
    }

    fn pop_output_sink(&self) {
        self.output_sinks.write().pop();
    }

    // ── Evaluation ───────────────────────────────────────────────────────

    /// Install the evaluator behind `eval_string`.
    pub fn install_evaluator(&self, evaluator: Arc<dyn Evaluator>) {
        *self.evaluator.write() = Some(evaluator);
    }

    /// Evaluate source text with the installed evaluator.
    pub fn eval_string(self: &Arc<Self>, code: &str) -> Result<ObjRef, EvalError> {
        let evaluator = self
            .evaluator
            .read()
            .clone()
            .ok_or_else(|| EvalError::Runtime("no evaluator installed".to_string()))?;
        evaluator.eval_string(self, code)
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("current_ns", &self.current_ns_name())
            .field("namespaces", &self.namespaces.len())
            .finish()
    }
}

/// Binds the current namespace for the guard's lifetime, restoring the
/// previous one on every exit path.
pub struct NsBindingScope<'a> {
    ctx: &'a Context,
    previous: String,
}

impl<'a> NsBindingScope<'a> {
    /// Bind `ns` as current.
    pub fn new(ctx: &'a Context, ns: &str) -> Self {
        let previous = ctx.current_ns_name();
        ctx.set_current_ns(ns);
        Self { ctx, previous }
    }
}

impl Drop for NsBindingScope<'_> {
    fn drop(&mut self) {
        self.ctx.set_current_ns(&self.previous);
    }
}

/// Redirects runtime stdout into a sink for the guard's lifetime.
pub struct OutputRedirectScope<'a> {
    ctx: &'a Context,
}

impl<'a> OutputRedirectScope<'a> {
    /// Push `sink` as the innermost redirect.
    pub fn new(ctx: &'a Context, sink: impl Fn(&str) + Send + Sync + 'static) -> Self {
        ctx.push_output_sink(Arc::new(sink));
        Self { ctx }
    }
}

impl Drop for OutputRedirectScope<'_> {
    fn drop(&mut self) {
        self.ctx.pop_output_sink();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::value::{make_int, nil};
    use parking_lot::Mutex;

    #[test]
    fn test_default_namespaces() {
        let ctx = Context::new();
        assert!(ctx.find_ns("user").is_some());
        assert!(ctx.find_ns("clojure.core").is_some());
        assert_eq!(ctx.current_ns_name(), "user");
    }

    #[test]
    fn test_ns_binding_scope_restores() {
        let ctx = Context::new();
        {
            let _scope = NsBindingScope::new(&ctx, "demo.core");
            assert_eq!(ctx.current_ns_name(), "demo.core");
        }
        assert_eq!(ctx.current_ns_name(), "user");
    }

    #[test]
    fn test_output_redirect_scope() {
        let ctx = Context::new();
        let captured = Arc::new(Mutex::new(String::new()));
        {
            let sink = captured.clone();
            let _scope = OutputRedirectScope::new(&ctx, move |chunk| {
                sink.lock().push_str(chunk);
            });
            ctx.write_stdout("a");
            ctx.write_stdout("b");
        }
        assert_eq!(captured.lock().as_str(), "ab");
    }

    #[test]
    fn test_eval_without_evaluator_errors() {
        let ctx = Context::new();
        assert!(ctx.eval_string("(+ 1 2)").is_err());
    }

    #[test]
    fn test_installed_evaluator_runs() {
        struct Fixed;
        impl Evaluator for Fixed {
            fn eval_string(&self, _ctx: &Context, code: &str) -> Result<ObjRef, EvalError> {
                if code.is_empty() {
                    Ok(nil())
                } else {
                    Ok(make_int(code.len() as i64))
                }
            }
        }
        let ctx = Context::new();
        ctx.install_evaluator(Arc::new(Fixed));
        assert_eq!(ctx.eval_string("abc").unwrap().as_integer(), Some(3));
    }
}
