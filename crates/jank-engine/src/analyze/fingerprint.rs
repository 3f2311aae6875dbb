//! Structural expression fingerprint.
//!
//! Produces a 64-bit hash of an analyzed expression that is stable across
//! source positions and freshly generated function names. Two forms that
//! analyze to the same shape share a fingerprint, which is what lets the
//! incremental registry and the on-disk cache skip recompilation.

use std::hash::{Hash, Hasher};

use rustc_hash::FxHasher;

use super::expr::{Expr, Literal};

/// Fold `next` into `prev`.
///
/// The combination rule is fixed by the cache format: changing it silently
/// invalidates every on-disk entry, so the directory is also pinned to the
/// binary version.
#[inline]
pub fn hash_combine(prev: u64, next: u64) -> u64 {
    prev ^ (next
        .wrapping_add(0x9e37_79b9)
        .wrapping_add(prev << 6)
        .wrapping_add(prev >> 2))
}

/// Deterministic, unseeded string hash.
fn hash_str(s: &str) -> u64 {
    let mut hasher = FxHasher::default();
    s.hash(&mut hasher);
    hasher.finish()
}

fn hash_literal(lit: &Literal) -> u64 {
    match lit {
        Literal::Nil => 0,
        Literal::Bool(b) => hash_combine(1, *b as u64),
        Literal::Int(i) => hash_combine(2, *i as u64),
        Literal::Real(r) => hash_combine(3, r.to_bits()),
        Literal::Char(c) => hash_combine(4, *c as u64),
        Literal::String(s) => hash_combine(5, hash_str(s)),
        Literal::Keyword(sym) => hash_combine(6, sym.to_hash()),
        Literal::Symbol(sym) => hash_combine(7, sym.to_hash()),
    }
}

/// Kind tags. Distinct per variant so that, e.g., an empty `do` and an empty
/// vector cannot collide on structure alone.
fn kind_tag(expr: &Expr) -> u64 {
    match expr {
        Expr::Def { .. } => 1,
        Expr::VarDeref { .. } => 2,
        Expr::VarRef { .. } => 3,
        Expr::Call { .. } => 4,
        Expr::Literal { .. } => 5,
        Expr::List { .. } => 6,
        Expr::Vector { .. } => 7,
        Expr::Map { .. } => 8,
        Expr::Set { .. } => 9,
        Expr::Function { .. } => 10,
        Expr::Recur { .. } => 11,
        Expr::RecursionRef { .. } => 12,
        Expr::NamedRecursion { .. } => 13,
        Expr::LocalRef { .. } => 14,
        Expr::Let { .. } => 15,
        Expr::Letfn { .. } => 16,
        Expr::Do { .. } => 17,
        Expr::If { .. } => 18,
        Expr::Throw { .. } => 19,
        Expr::Try { .. } => 20,
        Expr::Case { .. } => 21,
        Expr::RawNative { .. } => 22,
        Expr::NativeType { .. } => 23,
        Expr::NativeValue { .. } => 24,
        Expr::NativeCast { .. } => 25,
        Expr::NativeCall { .. } => 26,
        Expr::NativeConstructorCall { .. } => 27,
        Expr::NativeMemberCall { .. } => 28,
        Expr::NativeMemberAccess { .. } => 29,
        Expr::NativeBuiltinOp { .. } => 30,
        Expr::NativeBox { .. } => 31,
        Expr::NativeUnbox { .. } => 32,
        Expr::NativeNew { .. } => 33,
        Expr::NativeDelete { .. } => 34,
    }
}

fn fold_seq(mut h: u64, items: &[Expr]) -> u64 {
    h = hash_combine(h, items.len() as u64);
    for item in items {
        h = hash_combine(h, hash_expr(item));
    }
    h
}

/// Hash an analyzed expression.
///
/// Excluded by design: source positions, `Function::unique_name` (and any
/// other freshly generated identifier), and metadata whose presence does not
/// change behavior. Included: qualified names referenced by var nodes,
/// function arities with parameter names, literal values, builtin operator
/// kinds, cast policies, and the text of raw foreign snippets.
pub fn hash_expr(expr: &Expr) -> u64 {
    let mut h = kind_tag(expr);
    match expr {
        Expr::Def { name, value, .. } => {
            h = hash_combine(h, name.to_hash());
            if let Some(value) = value {
                h = hash_combine(h, hash_expr(value));
            }
        }
        Expr::VarDeref { qualified_name, .. } | Expr::VarRef { qualified_name, .. } => {
            h = hash_combine(h, qualified_name.to_hash());
        }
        Expr::Call { callee, args, .. } => {
            h = hash_combine(h, hash_expr(callee));
            h = fold_seq(h, args);
        }
        Expr::Literal { value, .. } => {
            h = hash_combine(h, hash_literal(value));
        }
        Expr::List { items, .. } | Expr::Vector { items, .. } | Expr::Set { items, .. } => {
            h = fold_seq(h, items);
        }
        Expr::Map { entries, .. } => {
            h = hash_combine(h, entries.len() as u64);
            for (k, v) in entries {
                h = hash_combine(h, hash_expr(k));
                h = hash_combine(h, hash_expr(v));
            }
        }
        Expr::Function { arities, .. } => {
            // unique_name changes on every analysis; hash the shape instead.
            h = hash_combine(h, arities.len() as u64);
            for arity in arities {
                h = hash_combine(h, arity.params.len() as u64);
                for param in &arity.params {
                    h = hash_combine(h, param.to_hash());
                }
                h = hash_combine(h, hash_expr(&arity.body));
            }
        }
        Expr::Recur { args, .. } => {
            h = fold_seq(h, args);
        }
        Expr::RecursionRef { .. } => {
            // The target is the enclosing function; its generated name is
            // excluded, so the kind tag alone identifies the node.
        }
        Expr::NamedRecursion { args, .. } => {
            h = fold_seq(h, args);
        }
        Expr::LocalRef { binding, .. } => {
            h = hash_combine(h, binding.to_hash());
        }
        Expr::Let {
            is_loop,
            bindings,
            body,
            ..
        } => {
            h = hash_combine(h, *is_loop as u64);
            h = hash_combine(h, bindings.len() as u64);
            for (sym, value) in bindings {
                h = hash_combine(h, sym.to_hash());
                h = hash_combine(h, hash_expr(value));
            }
            h = hash_combine(h, hash_expr(body));
        }
        Expr::Letfn { bindings, body, .. } => {
            h = hash_combine(h, bindings.len() as u64);
            for (sym, func) in bindings {
                h = hash_combine(h, sym.to_hash());
                h = hash_combine(h, hash_expr(func));
            }
            h = hash_combine(h, hash_expr(body));
        }
        Expr::Do { values, .. } => {
            h = fold_seq(h, values);
        }
        Expr::If {
            condition,
            then,
            else_,
            ..
        } => {
            h = hash_combine(h, hash_expr(condition));
            h = hash_combine(h, hash_expr(then));
            if let Some(else_) = else_ {
                h = hash_combine(h, hash_expr(else_));
            }
        }
        Expr::Throw { value, .. } => {
            h = hash_combine(h, hash_expr(value));
        }
        Expr::Try {
            body,
            catch,
            finally,
            ..
        } => {
            h = hash_combine(h, hash_expr(body));
            if let Some((sym, catch_body)) = catch {
                h = hash_combine(h, sym.to_hash());
                h = hash_combine(h, hash_expr(catch_body));
            }
            if let Some(finally) = finally {
                h = hash_combine(h, hash_expr(finally));
            }
        }
        Expr::Case {
            value,
            shift,
            mask,
            keys,
            exprs,
            default,
            ..
        } => {
            h = hash_combine(h, hash_expr(value));
            h = hash_combine(h, *shift as u64);
            h = hash_combine(h, *mask as u64);
            h = hash_combine(h, keys.len() as u64);
            for key in keys {
                h = hash_combine(h, *key as u64);
            }
            h = hash_combine(h, exprs.len() as u64);
            for result in exprs {
                h = hash_combine(h, hash_expr(result));
            }
            h = hash_combine(h, hash_expr(default));
        }
        Expr::RawNative { code, .. } => {
            h = hash_combine(h, hash_str(code));
        }
        Expr::NativeType { sym, .. } => {
            h = hash_combine(h, sym.to_hash());
        }
        Expr::NativeValue { val_kind, form, .. } => {
            h = hash_combine(h, *val_kind as u64);
            h = hash_combine(h, hash_literal(form));
        }
        Expr::NativeCast { policy, value, .. } => {
            h = hash_combine(h, *policy as u64);
            h = hash_combine(h, hash_expr(value));
        }
        Expr::NativeCall {
            source,
            args,
            function_code,
            ..
        } => {
            h = hash_combine(h, hash_expr(source));
            h = fold_seq(h, args);
            h = hash_combine(h, hash_str(function_code));
        }
        Expr::NativeConstructorCall { args, .. } => {
            h = fold_seq(h, args);
        }
        Expr::NativeMemberCall { args, .. } => {
            h = fold_seq(h, args);
        }
        Expr::NativeMemberAccess { name, object, .. } => {
            h = hash_combine(h, hash_str(name));
            h = hash_combine(h, hash_expr(object));
        }
        Expr::NativeBuiltinOp { op, args, .. } => {
            h = hash_combine(h, *op as u64);
            h = fold_seq(h, args);
        }
        Expr::NativeBox { value, .. }
        | Expr::NativeUnbox { value, .. }
        | Expr::NativeNew { value, .. }
        | Expr::NativeDelete { value, .. } => {
            h = hash_combine(h, hash_expr(value));
        }
    }
    h
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyze::expr::{Arity, SourcePos, Sym};

    fn lit_int(value: i64) -> Expr {
        Expr::Literal {
            pos: SourcePos::default(),
            value: Literal::Int(value),
        }
    }

    fn def_fn(unique_name: &str, pos: SourcePos, body_value: i64) -> Expr {
        Expr::Def {
            pos,
            name: Sym::qualified("user", "f"),
            value: Some(Box::new(Expr::Function {
                pos,
                unique_name: unique_name.to_string(),
                arities: vec![Arity {
                    params: vec![Sym::new("x")],
                    body: Box::new(lit_int(body_value)),
                }],
            })),
        }
    }

    #[test]
    fn test_source_positions_do_not_affect_hash() {
        let a = def_fn("f_1234", SourcePos::new(1, 1), 42);
        let b = def_fn("f_1234", SourcePos::new(80, 12), 42);
        assert_eq!(hash_expr(&a), hash_expr(&b));
    }

    #[test]
    fn test_fresh_function_names_do_not_affect_hash() {
        let a = def_fn("f_1234", SourcePos::default(), 42);
        let b = def_fn("f_9999", SourcePos::default(), 42);
        assert_eq!(hash_expr(&a), hash_expr(&b));
    }

    #[test]
    fn test_body_change_changes_hash() {
        let a = def_fn("f_1234", SourcePos::default(), 42);
        let b = def_fn("f_1234", SourcePos::default(), 43);
        assert_ne!(hash_expr(&a), hash_expr(&b));
    }

    #[test]
    fn test_empty_do_differs_from_do_with_nil() {
        let empty = Expr::Do {
            pos: SourcePos::default(),
            values: vec![],
        };
        let with_nil = Expr::Do {
            pos: SourcePos::default(),
            values: vec![Expr::Literal {
                pos: SourcePos::default(),
                value: Literal::Nil,
            }],
        };
        assert_ne!(hash_expr(&empty), hash_expr(&with_nil));
    }

    #[test]
    fn test_kind_tag_distinguishes_equal_shapes() {
        let vector = Expr::Vector {
            pos: SourcePos::default(),
            items: vec![lit_int(1)],
        };
        let set = Expr::Set {
            pos: SourcePos::default(),
            items: vec![lit_int(1)],
        };
        assert_ne!(hash_expr(&vector), hash_expr(&set));
    }

    #[test]
    fn test_var_deref_hashes_qualified_name() {
        let a = Expr::VarDeref {
            pos: SourcePos::default(),
            qualified_name: Sym::qualified("user", "x"),
        };
        let b = Expr::VarDeref {
            pos: SourcePos::default(),
            qualified_name: Sym::qualified("user", "y"),
        };
        assert_ne!(hash_expr(&a), hash_expr(&b));
    }

    #[test]
    fn test_param_rename_changes_hash() {
        let a = def_fn("f_1", SourcePos::default(), 1);
        let mut b = a.clone();
        if let Expr::Def {
            value: Some(func), ..
        } = &mut b
        {
            if let Expr::Function { arities, .. } = func.as_mut() {
                arities[0].params[0] = Sym::new("y");
            }
        }
        assert_ne!(hash_expr(&a), hash_expr(&b));
    }

    #[test]
    fn test_hash_is_deterministic_across_calls() {
        let e = def_fn("f_77", SourcePos::new(3, 9), 7);
        let h1 = hash_expr(&e);
        let h2 = hash_expr(&e);
        assert_eq!(h1, h2);
    }
}
