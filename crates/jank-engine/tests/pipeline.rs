//! End-to-end pipeline scenarios over mock collaborators: registry hits,
//! disk-cache round trips, and remote compile delegation.

use std::ffi::c_void;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use jank_engine::analyze::expr::{Expr, Literal, SourcePos, Sym};
use jank_engine::config::Config;
use jank_engine::error::EvalError;
use jank_engine::jit::backend::{Interpreter, NativeValue};
use jank_engine::jit::pipeline::{
    AnalyzedForm, Analyzer, Codegen, GeneratedUnit, IncrementalPipeline, RemoteArtifact,
    RemoteCompiler,
};
use jank_engine::jit::{JitProcessor, PersistentCache};
use jank_engine::runtime::context::{Context, Evaluator};
use jank_engine::runtime::value::{make_int, Object, ObjectKind};

// ── Mock collaborators ───────────────────────────────────────────────────

/// Analyzer for a toy subset: `(def <name> <int>)` and bare integers.
struct MiniAnalyzer;

impl Analyzer for MiniAnalyzer {
    fn analyze(&self, _ctx: &Context, code: &str) -> Result<Vec<AnalyzedForm>, EvalError> {
        let trimmed = code.trim();
        let expr = if let Some(body) = trimmed.strip_prefix("(def ") {
            let body = body
                .strip_suffix(')')
                .ok_or_else(|| EvalError::Analysis("unbalanced form".to_string()))?;
            let (name, value) = body
                .split_once(' ')
                .ok_or_else(|| EvalError::Analysis("def needs a value".to_string()))?;
            let value: i64 = value
                .trim()
                .parse()
                .map_err(|_| EvalError::Analysis("value must be an integer".to_string()))?;
            Expr::Def {
                pos: SourcePos::default(),
                name: Sym::new(name.trim()),
                value: Some(Box::new(Expr::Literal {
                    pos: SourcePos::default(),
                    value: Literal::Int(value),
                })),
            }
        } else {
            let value: i64 = trimmed
                .parse()
                .map_err(|_| EvalError::Analysis(format!("cannot analyze: {}", trimmed)))?;
            Expr::Literal {
                pos: SourcePos::default(),
                value: Literal::Int(value),
            }
        };
        Ok(vec![AnalyzedForm {
            expr,
            source: trimmed.to_string(),
        }])
    }
}

/// Codegen that emits the integer literal as the instantiation expression.
struct MiniCodegen;

impl Codegen for MiniCodegen {
    fn generate(&self, ctx: &Context, form: &AnalyzedForm) -> Result<GeneratedUnit, EvalError> {
        match &form.expr {
            Expr::Def { name, value, .. } => {
                let literal = match value.as_deref() {
                    Some(Expr::Literal {
                        value: Literal::Int(i),
                        ..
                    }) => *i,
                    _ => return Err(EvalError::Codegen("unsupported def body".to_string())),
                };
                let ns = name.ns.clone().unwrap_or_else(|| ctx.current_ns_name());
                Ok(GeneratedUnit {
                    source: format!("// def {}/{}\n", ns, name.name),
                    qualified_name: format!("{}/{}", ns, name.name),
                    unique_name: format!("{}_{}_fn", ns.replace('.', "_"), name.name),
                    expression_str: literal.to_string(),
                })
            }
            Expr::Literal {
                value: Literal::Int(i),
                ..
            } => Ok(GeneratedUnit {
                expression_str: i.to_string(),
                ..GeneratedUnit::default()
            }),
            _ => Err(EvalError::Codegen("unsupported form".to_string())),
        }
    }
}

#[derive(Default)]
struct MockState {
    evals: Vec<String>,
    result_evals: Vec<String>,
    objects: Vec<PathBuf>,
    symbol_queries: Vec<String>,
}

#[derive(Clone, Default)]
struct SharedMock(Arc<Mutex<MockState>>);

extern "C" fn cached_factory() -> *mut Object {
    make_int(3).into_raw()
}

extern "C" fn remote_factory() -> *mut Object {
    make_int(17).into_raw()
}

impl Interpreter for SharedMock {
    fn eval(&mut self, code: &str) -> Result<(), String> {
        self.0.lock().evals.push(code.to_string());
        Ok(())
    }

    fn eval_with_result(&mut self, code: &str) -> Result<NativeValue, String> {
        self.0.lock().result_evals.push(code.to_string());
        let value: i64 = code
            .trim()
            .parse()
            .map_err(|_| format!("cannot evaluate expression: {}", code))?;
        Ok(NativeValue {
            valid: true,
            is_void: false,
            ptr: make_int(value).into_raw().cast(),
            type_str: "jank::runtime::object*".to_string(),
            repr: value.to_string(),
        })
    }

    fn add_object(&mut self, path: &Path) -> Result<(), String> {
        self.0.lock().objects.push(path.to_path_buf());
        Ok(())
    }

    fn add_ir_module(&mut self, _name: &str, _ir: &[u8]) -> Result<(), String> {
        Ok(())
    }

    fn remove_symbol(&mut self, _name: &str) -> Result<(), String> {
        Ok(())
    }

    fn find_symbol(&mut self, name: &str) -> Option<*mut c_void> {
        let mut state = self.0.lock();
        state.symbol_queries.push(name.to_string());
        if state.objects.is_empty() {
            return None;
        }
        if name.starts_with("jank_pcache_factory_") {
            Some(cached_factory as *mut c_void)
        } else if name == "remote_entry_0" {
            Some(remote_factory as *mut c_void)
        } else {
            None
        }
    }

    fn load_dynamic_library(&mut self, _path: &str) -> Result<(), String> {
        Ok(())
    }
}

fn build_pipeline(cache_dir: &Path, mock: SharedMock) -> IncrementalPipeline {
    let config = Config::default();
    let jit = JitProcessor::new(&config, Box::new(mock)).unwrap();
    let cache = PersistentCache::open_at(cache_dir, &config);
    IncrementalPipeline::new(
        &config,
        Arc::new(MiniAnalyzer),
        Arc::new(MiniCodegen),
        jit,
        cache,
    )
}

// ── Scenarios ────────────────────────────────────────────────────────────

#[test]
fn test_def_compiles_and_binds_var() {
    let dir = tempfile::tempdir().unwrap();
    let mock = SharedMock::default();
    let pipeline = build_pipeline(dir.path(), mock.clone());
    let ctx = Context::new();

    let result = pipeline.eval_string(&ctx, "(def x 3)").unwrap();
    assert_eq!(result.kind(), ObjectKind::Var);

    let var = ctx.find_var("user", "x").unwrap();
    assert_eq!(var.deref().as_integer(), Some(3));

    // Source, metadata, and expression landed in the cache.
    let entries: Vec<String> = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(Result::ok)
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    assert!(entries.iter().any(|name| name.ends_with(".cpp")));
    assert!(entries.iter().any(|name| name.ends_with(".meta")));
    assert!(entries.iter().any(|name| name.ends_with(".expr")));

    assert_eq!(mock.0.lock().evals.len(), 1);
    assert_eq!(pipeline.cache_stats().disk_misses, 1);
}

#[test]
fn test_unchanged_def_skips_recompile() {
    let dir = tempfile::tempdir().unwrap();
    let mock = SharedMock::default();
    let pipeline = build_pipeline(dir.path(), mock.clone());
    let ctx = Context::new();

    pipeline.eval_string(&ctx, "(def x 3)").unwrap();
    let evals_after_first = mock.0.lock().evals.len();

    let again = pipeline.eval_string(&ctx, "(def x 3)").unwrap();
    assert_eq!(again.kind(), ObjectKind::Var);
    // Registry hit: nothing re-emitted.
    assert_eq!(mock.0.lock().evals.len(), evals_after_first);
    assert_eq!(pipeline.registry_stats().hits, 1);

    // A changed body recompiles.
    pipeline.eval_string(&ctx, "(def x 4)").unwrap();
    assert_eq!(mock.0.lock().evals.len(), evals_after_first + 1);
    let var = ctx.find_var("user", "x").unwrap();
    assert_eq!(var.deref().as_integer(), Some(4));
}

#[test]
fn test_disk_cache_round_trip_in_fresh_process() {
    let dir = tempfile::tempdir().unwrap();

    // First "process": compile and populate the cache.
    {
        let pipeline = build_pipeline(dir.path(), SharedMock::default());
        let ctx = Context::new();
        pipeline.eval_string(&ctx, "(def x 3)").unwrap();
    }

    // The object is produced out of band (the toolchain is absent in this
    // test); a reader that finds source but no object would recompile, so
    // stage the object next to the source.
    let meta_name = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(Result::ok)
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .find(|name| name.ends_with(".meta"))
        .unwrap();
    let hash_hex = meta_name.trim_end_matches(".meta").to_string();
    std::fs::write(dir.path().join(format!("{}.o", hash_hex)), b"fake-object").unwrap();

    // Second "process": same binary version, same cache directory.
    let mock = SharedMock::default();
    let pipeline = build_pipeline(dir.path(), mock.clone());
    let ctx = Context::new();
    let result = pipeline.eval_string(&ctx, "(def x 3)").unwrap();
    assert_eq!(result.kind(), ObjectKind::Var);

    let state = mock.0.lock();
    // No C++ was generated or evaluated; the cached object was loaded and
    // its factory executed.
    assert!(state.evals.is_empty());
    assert!(state.result_evals.is_empty());
    assert_eq!(state.objects.len(), 1);
    assert!(state
        .symbol_queries
        .iter()
        .any(|s| s == &format!("jank_pcache_factory_{}", hash_hex)));
    drop(state);

    assert_eq!(pipeline.cache_stats().disk_hits, 1);
    let var = ctx.find_var("user", "x").unwrap();
    assert_eq!(var.deref().as_integer(), Some(3));
}

#[test]
fn test_expression_form_evaluates_without_caching() {
    let dir = tempfile::tempdir().unwrap();
    let mock = SharedMock::default();
    let pipeline = build_pipeline(dir.path(), mock.clone());
    let ctx = Context::new();

    let result = pipeline.eval_string(&ctx, "41").unwrap();
    assert_eq!(result.as_integer(), Some(41));
    assert_eq!(pipeline.cache_stats().entries, 0);
}

#[test]
fn test_remote_compile_delegation() {
    struct MockRemote {
        requests: Mutex<Vec<(String, String)>>,
    }

    impl RemoteCompiler for MockRemote {
        fn is_enabled(&self) -> bool {
            true
        }

        fn compile(&self, code: &str, ns: &str) -> Result<RemoteArtifact, EvalError> {
            self.requests
                .lock()
                .push((code.to_string(), ns.to_string()));
            Ok(RemoteArtifact {
                entry_symbol: "remote_entry_0".to_string(),
                object: b"remote-object".to_vec(),
            })
        }
    }

    let dir = tempfile::tempdir().unwrap();
    let mock = SharedMock::default();
    let remote = Arc::new(MockRemote {
        requests: Mutex::new(Vec::new()),
    });
    let pipeline = build_pipeline(dir.path(), mock.clone()).with_remote(remote.clone());
    let ctx = Context::new();

    let result = pipeline.eval_string(&ctx, "(def y 17)").unwrap();
    assert_eq!(result.kind(), ObjectKind::Var);

    // The peer received the form source and namespace; no local codegen ran.
    let requests = remote.requests.lock();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0], ("(def y 17)".to_string(), "user".to_string()));
    assert!(mock.0.lock().evals.is_empty());

    let var = ctx.find_var("user", "y").unwrap();
    assert_eq!(var.deref().as_integer(), Some(17));
}

#[test]
fn test_analysis_error_propagates() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = build_pipeline(dir.path(), SharedMock::default());
    let ctx = Context::new();
    let err = pipeline.eval_string(&ctx, "(not-parseable").unwrap_err();
    assert!(matches!(err, EvalError::Analysis(_)));
}
