//! Analyzed-expression model and structural fingerprinting.
//!
//! The reader and analyzer live outside this crate; they hand the pipeline a
//! tree of [`expr::Expr`] nodes. This module owns the shape of that tree and
//! the 64-bit fingerprint used to key the incremental and persistent caches.

pub mod expr;
pub mod fingerprint;

pub use expr::{Arity, BuiltinOp, CastPolicy, Expr, Literal, NativeValueKind, SourcePos, Sym};
pub use fingerprint::hash_expr;
