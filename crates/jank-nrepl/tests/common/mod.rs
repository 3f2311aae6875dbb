//! Shared test fixtures: a small scripted evaluator standing in for the
//! compile pipeline.

use std::sync::Arc;

use jank_engine::error::EvalError;
use jank_engine::jit::recovery::raise_fatal_error;
use jank_engine::runtime::context::{Context, Evaluator};
use jank_engine::runtime::value::{make_box, make_int, make_string, nil, ObjRef, Object};

/// Evaluator for a scripted subset of forms, enough to exercise every
/// engine op: integers, `(+ a b)`, `(def name <int-expr>)`, `(do ...)` with
/// `(println "...")` side effects, `(in-ns 'name)`, `(require 'name)`,
/// `(throw "msg")`, `(fail)`, and `(fatal)`.
pub struct ScriptedEvaluator;

fn eval_int_expr(expr: &str) -> Option<i64> {
    let expr = expr.trim();
    if let Ok(value) = expr.parse::<i64>() {
        return Some(value);
    }
    let body = expr.strip_prefix("(+ ")?.strip_suffix(')')?;
    let mut total = 0i64;
    for token in body.split_whitespace() {
        total += token.parse::<i64>().ok()?;
    }
    Some(total)
}

fn run_printlns(ctx: &Context, code: &str) {
    let mut rest = code;
    while let Some(at) = rest.find("(println \"") {
        let after = &rest[at + "(println \"".len()..];
        let Some(end) = after.find('"') else {
            return;
        };
        ctx.write_stdout(&after[..end]);
        ctx.write_stdout("\n");
        rest = &after[end..];
    }
}

impl Evaluator for ScriptedEvaluator {
    fn eval_string(&self, ctx: &Context, code: &str) -> Result<ObjRef, EvalError> {
        let code = code.trim();

        if code == "(fail)" {
            return Err(EvalError::Runtime("deliberate failure".to_string()));
        }
        if code == "(fatal)" {
            raise_fatal_error("forced fatal error", true);
        }
        if let Some(body) = code.strip_prefix("(throw \"") {
            let message = body.trim_end_matches("\")");
            return Err(EvalError::Thrown(make_string(message)));
        }
        if let Some(body) = code.strip_prefix("(in-ns '") {
            let ns = body.trim_end_matches(')');
            ctx.set_current_ns(ns);
            return Ok(nil());
        }
        if code.starts_with("(require '") {
            return Ok(nil());
        }
        if let Some(body) = code.strip_prefix("(def ") {
            let body = body
                .strip_suffix(')')
                .ok_or_else(|| EvalError::Analysis("unbalanced def".to_string()))?;
            let (name, value_expr) = body
                .split_once(' ')
                .ok_or_else(|| EvalError::Analysis("def needs a value".to_string()))?;
            let value = eval_int_expr(value_expr)
                .map(make_int)
                .ok_or_else(|| EvalError::Analysis(format!("bad def body: {}", value_expr)))?;
            let var = ctx.intern_var(&ctx.current_ns_name(), name.trim());
            var.bind_root(value);
            return Ok(make_box(Object::Var(var)));
        }
        if code.starts_with("(do ") {
            run_printlns(ctx, code);
            let inner = code.trim_end_matches(')');
            let last = inner.split_whitespace().last().unwrap_or("");
            return Ok(last.parse::<i64>().map(make_int).unwrap_or_else(|_| nil()));
        }
        if let Some(value) = eval_int_expr(code) {
            return Ok(make_int(value));
        }

        Err(EvalError::Analysis(format!("cannot evaluate: {}", code)))
    }
}

/// Context with the scripted evaluator installed.
pub fn scripted_context() -> Arc<Context> {
    let ctx = Context::new();
    ctx.install_evaluator(Arc::new(ScriptedEvaluator));
    ctx
}
