//! Analyzed expression tree.
//!
//! Each node carries a kind tag (via the enum discriminant) and a source
//! position. Positions exist for error reporting only and never participate
//! in fingerprinting.

use std::hash::{Hash, Hasher};

use rustc_hash::FxHasher;

/// Source position of an analyzed form. Ignored by fingerprinting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SourcePos {
    /// 1-based line, 0 when unknown.
    pub line: u32,
    /// 1-based column, 0 when unknown.
    pub col: u32,
}

impl SourcePos {
    /// Position at the given line and column.
    pub fn new(line: u32, col: u32) -> Self {
        Self { line, col }
    }
}

/// A possibly namespace-qualified symbol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sym {
    /// Namespace part, `None` for unqualified symbols.
    pub ns: Option<String>,
    /// Name part.
    pub name: String,
}

impl Sym {
    /// Unqualified symbol.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            ns: None,
            name: name.into(),
        }
    }

    /// Namespace-qualified symbol.
    pub fn qualified(ns: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            ns: Some(ns.into()),
            name: name.into(),
        }
    }

    /// Deterministic hash of the qualified name.
    pub fn to_hash(&self) -> u64 {
        let mut hasher = FxHasher::default();
        self.ns.hash(&mut hasher);
        self.name.hash(&mut hasher);
        hasher.finish()
    }
}

impl std::fmt::Display for Sym {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.ns {
            Some(ns) => write!(f, "{}/{}", ns, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// Literal values carried by `Expr::Literal` and `Expr::NativeValue`.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    /// nil
    Nil,
    /// true / false
    Bool(bool),
    /// Fixed-width integer.
    Int(i64),
    /// Double-precision real.
    Real(f64),
    /// Character.
    Char(char),
    /// String.
    String(String),
    /// Keyword, optionally qualified.
    Keyword(Sym),
    /// Quoted symbol.
    Symbol(Sym),
}

/// One function arity: parameter list plus body.
#[derive(Debug, Clone, PartialEq)]
pub struct Arity {
    /// Parameter names.
    pub params: Vec<Sym>,
    /// Arity body.
    pub body: Box<Expr>,
}

/// Cast policy of a native cast expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastPolicy {
    /// static_cast
    Static,
    /// reinterpret_cast
    Reinterpret,
    /// const_cast
    Const,
    /// dynamic_cast
    Dynamic,
    /// implicit conversion
    Implicit,
}

/// Builtin operator of a native builtin-operator call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Shl,
    Shr,
    BitAnd,
    BitOr,
    BitXor,
    Eq,
    Neq,
    Lt,
    Gt,
    Le,
    Ge,
    Not,
    Neg,
    Deref,
    AddressOf,
    Index,
}

/// Kind of a native value reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeValueKind {
    /// Null pointer constant.
    Null,
    /// Boolean constant.
    Bool,
    /// Integer constant.
    Int,
    /// Real constant.
    Real,
    /// String constant.
    String,
    /// Named native entity.
    Identifier,
}

/// An analyzed expression.
///
/// `Function` nodes carry a `unique_name` generated freshly per analysis;
/// fingerprinting ignores it so that re-analyzing the same form produces the
/// same hash.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// `(def name value?)`
    Def {
        pos: SourcePos,
        /// Interned name; qualified against the current namespace by the
        /// analyzer when the source form is unqualified.
        name: Sym,
        value: Option<Box<Expr>>,
    },
    /// Dereference of a var's current value.
    VarDeref { pos: SourcePos, qualified_name: Sym },
    /// Reference to the var object itself.
    VarRef { pos: SourcePos, qualified_name: Sym },
    /// Call with evaluated callee and arguments.
    Call {
        pos: SourcePos,
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    /// Primitive literal.
    Literal { pos: SourcePos, value: Literal },
    /// List literal.
    List { pos: SourcePos, items: Vec<Expr> },
    /// Vector literal.
    Vector { pos: SourcePos, items: Vec<Expr> },
    /// Map literal with evaluated keys and values.
    Map {
        pos: SourcePos,
        entries: Vec<(Expr, Expr)>,
    },
    /// Set literal.
    Set { pos: SourcePos, items: Vec<Expr> },
    /// Function with one or more arities.
    Function {
        pos: SourcePos,
        /// Freshly generated per analysis; excluded from fingerprinting.
        unique_name: String,
        arities: Vec<Arity>,
    },
    /// Tail recursion to the enclosing loop or function.
    Recur { pos: SourcePos, args: Vec<Expr> },
    /// Reference to the enclosing function for self-call.
    RecursionRef { pos: SourcePos },
    /// Direct self-call of the enclosing function.
    NamedRecursion { pos: SourcePos, args: Vec<Expr> },
    /// Reference to a local binding.
    LocalRef { pos: SourcePos, binding: Sym },
    /// `(let [..] ..)` or `(loop [..] ..)`.
    Let {
        pos: SourcePos,
        is_loop: bool,
        bindings: Vec<(Sym, Expr)>,
        body: Box<Expr>,
    },
    /// `(letfn [..] ..)`
    Letfn {
        pos: SourcePos,
        bindings: Vec<(Sym, Expr)>,
        body: Box<Expr>,
    },
    /// `(do ..)`
    Do { pos: SourcePos, values: Vec<Expr> },
    /// `(if cond then else?)`
    If {
        pos: SourcePos,
        condition: Box<Expr>,
        then: Box<Expr>,
        else_: Option<Box<Expr>>,
    },
    /// `(throw value)`
    Throw { pos: SourcePos, value: Box<Expr> },
    /// `(try body (catch sym ..)? (finally ..)?)`
    Try {
        pos: SourcePos,
        body: Box<Expr>,
        catch: Option<(Sym, Box<Expr>)>,
        finally: Option<Box<Expr>>,
    },
    /// Compiled `(case ..)` with a packed jump table.
    Case {
        pos: SourcePos,
        value: Box<Expr>,
        shift: i64,
        mask: i64,
        keys: Vec<i64>,
        exprs: Vec<Expr>,
        default: Box<Expr>,
    },
    /// Raw foreign code snippet spliced into the generated unit.
    RawNative { pos: SourcePos, code: String },
    /// Reference to a foreign type.
    NativeType { pos: SourcePos, sym: Sym },
    /// Reference to a foreign value or constant.
    NativeValue {
        pos: SourcePos,
        val_kind: NativeValueKind,
        form: Literal,
    },
    /// Cast of a value under an explicit policy.
    NativeCast {
        pos: SourcePos,
        policy: CastPolicy,
        value: Box<Expr>,
    },
    /// Foreign function invocation with generated wrapper code.
    NativeCall {
        pos: SourcePos,
        source: Box<Expr>,
        args: Vec<Expr>,
        function_code: String,
    },
    /// Foreign constructor invocation.
    NativeConstructorCall { pos: SourcePos, args: Vec<Expr> },
    /// Foreign member function invocation.
    NativeMemberCall {
        pos: SourcePos,
        name: String,
        object: Box<Expr>,
        args: Vec<Expr>,
    },
    /// Foreign member access.
    NativeMemberAccess {
        pos: SourcePos,
        name: String,
        object: Box<Expr>,
    },
    /// Builtin operator applied to foreign operands.
    NativeBuiltinOp {
        pos: SourcePos,
        op: BuiltinOp,
        args: Vec<Expr>,
    },
    /// Box a foreign value into the runtime representation.
    NativeBox { pos: SourcePos, value: Box<Expr> },
    /// Unbox a runtime value into its foreign representation.
    NativeUnbox { pos: SourcePos, value: Box<Expr> },
    /// Foreign heap allocation.
    NativeNew { pos: SourcePos, value: Box<Expr> },
    /// Foreign heap release.
    NativeDelete { pos: SourcePos, value: Box<Expr> },
}

impl Expr {
    /// Source position of this node.
    pub fn pos(&self) -> SourcePos {
        match self {
            Expr::Def { pos, .. }
            | Expr::VarDeref { pos, .. }
            | Expr::VarRef { pos, .. }
            | Expr::Call { pos, .. }
            | Expr::Literal { pos, .. }
            | Expr::List { pos, .. }
            | Expr::Vector { pos, .. }
            | Expr::Map { pos, .. }
            | Expr::Set { pos, .. }
            | Expr::Function { pos, .. }
            | Expr::Recur { pos, .. }
            | Expr::RecursionRef { pos }
            | Expr::NamedRecursion { pos, .. }
            | Expr::LocalRef { pos, .. }
            | Expr::Let { pos, .. }
            | Expr::Letfn { pos, .. }
            | Expr::Do { pos, .. }
            | Expr::If { pos, .. }
            | Expr::Throw { pos, .. }
            | Expr::Try { pos, .. }
            | Expr::Case { pos, .. }
            | Expr::RawNative { pos, .. }
            | Expr::NativeType { pos, .. }
            | Expr::NativeValue { pos, .. }
            | Expr::NativeCast { pos, .. }
            | Expr::NativeCall { pos, .. }
            | Expr::NativeConstructorCall { pos, .. }
            | Expr::NativeMemberCall { pos, .. }
            | Expr::NativeMemberAccess { pos, .. }
            | Expr::NativeBuiltinOp { pos, .. }
            | Expr::NativeBox { pos, .. }
            | Expr::NativeUnbox { pos, .. }
            | Expr::NativeNew { pos, .. }
            | Expr::NativeDelete { pos, .. } => *pos,
        }
    }
}
