//! Kind-tagged runtime value model.
//!
//! Values are boxed [`Object`]s addressed by a small copyable handle,
//! [`ObjRef`]. Every operation over values (printing, equality, calling)
//! dispatches on the kind tag. Boxing goes through the allocator surface:
//! a scoped allocator if one is installed, the default heap otherwise.
//!
//! Handles are shared across threads under the runtime's serialization of
//! eval; the handle type asserts `Send`/`Sync` on that basis.

use std::alloc::Layout;
use std::ffi::c_void;
use std::fmt::Write as _;
use std::ptr::NonNull;
use std::sync::Arc;

use once_cell::sync::Lazy;

use crate::error::EvalError;
use crate::runtime::alloc::{global_heap, try_allocator_alloc};
use crate::runtime::ns::VarRef;
use crate::runtime::number_cache;
use crate::runtime::optimization::opt_flags;

/// Kind tag of a boxed value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    /// nil
    Nil,
    /// true / false
    Boolean,
    /// 64-bit integer
    Integer,
    /// 64-bit real
    Real,
    /// UTF-8 string
    String,
    /// Keyword
    Keyword,
    /// Symbol
    Symbol,
    /// List
    List,
    /// Vector
    Vector,
    /// Set
    Set,
    /// Map
    Map,
    /// Callable function
    Fn,
    /// Var handle
    Var,
}

impl ObjectKind {
    /// Lowercase kind name for diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            ObjectKind::Nil => "nil",
            ObjectKind::Boolean => "boolean",
            ObjectKind::Integer => "integer",
            ObjectKind::Real => "real",
            ObjectKind::String => "string",
            ObjectKind::Keyword => "keyword",
            ObjectKind::Symbol => "symbol",
            ObjectKind::List => "list",
            ObjectKind::Vector => "vector",
            ObjectKind::Set => "set",
            ObjectKind::Map => "map",
            ObjectKind::Fn => "fn",
            ObjectKind::Var => "var",
        }
    }
}

/// C-ABI function pointer taking no boxed arguments.
pub type NativeFn0 = extern "C" fn() -> *mut Object;
/// C-ABI function pointer taking one boxed argument.
pub type NativeFn1 = extern "C" fn(*mut Object) -> *mut Object;
/// C-ABI function pointer taking two boxed arguments.
pub type NativeFn2 = extern "C" fn(*mut Object, *mut Object) -> *mut Object;
/// C-ABI function pointer taking three boxed arguments.
pub type NativeFn3 = extern "C" fn(*mut Object, *mut Object, *mut Object) -> *mut Object;
/// C-ABI function pointer taking four boxed arguments.
pub type NativeFn4 =
    extern "C" fn(*mut Object, *mut Object, *mut Object, *mut Object) -> *mut Object;

/// Callable payload of a function value.
pub enum Callable {
    /// Fixed-arity C-ABI function pointers, as produced by JIT-compiled code
    /// and hot-reload patches.
    Arity0(NativeFn0),
    /// One argument.
    Arity1(NativeFn1),
    /// Two arguments.
    Arity2(NativeFn2),
    /// Three arguments.
    Arity3(NativeFn3),
    /// Four arguments.
    Arity4(NativeFn4),
    /// Host function implemented in Rust.
    Boxed(Arc<dyn Fn(&[ObjRef]) -> Result<ObjRef, EvalError> + Send + Sync>),
}

impl Callable {
    /// Fixed arity of this callable, `None` for boxed host functions.
    pub fn fixed_arity(&self) -> Option<usize> {
        match self {
            Callable::Arity0(_) => Some(0),
            Callable::Arity1(_) => Some(1),
            Callable::Arity2(_) => Some(2),
            Callable::Arity3(_) => Some(3),
            Callable::Arity4(_) => Some(4),
            Callable::Boxed(_) => None,
        }
    }
}

impl std::fmt::Debug for Callable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.fixed_arity() {
            Some(arity) => write!(f, "Callable::Arity{}", arity),
            None => write!(f, "Callable::Boxed"),
        }
    }
}

/// A boxed runtime value.
#[derive(Debug)]
pub enum Object {
    /// nil
    Nil,
    /// Boolean.
    Boolean(bool),
    /// Integer.
    Integer(i64),
    /// Real.
    Real(f64),
    /// String.
    String(String),
    /// Keyword with optional namespace.
    Keyword {
        /// Namespace part.
        ns: Option<String>,
        /// Name part.
        name: String,
    },
    /// Symbol with optional namespace.
    Symbol {
        /// Namespace part.
        ns: Option<String>,
        /// Name part.
        name: String,
    },
    /// List of values.
    List(Vec<ObjRef>),
    /// Vector of values.
    Vector(Vec<ObjRef>),
    /// Set of values (linear representation; membership uses structural
    /// equality).
    Set(Vec<ObjRef>),
    /// Map of key/value pairs (linear representation).
    Map(Vec<(ObjRef, ObjRef)>),
    /// Callable function.
    Fn {
        /// Display name.
        name: String,
        /// Invocation payload.
        callable: Callable,
    },
    /// Var handle.
    Var(VarRef),
}

impl Object {
    /// Kind tag of this object.
    pub fn kind(&self) -> ObjectKind {
        match self {
            Object::Nil => ObjectKind::Nil,
            Object::Boolean(_) => ObjectKind::Boolean,
            Object::Integer(_) => ObjectKind::Integer,
            Object::Real(_) => ObjectKind::Real,
            Object::String(_) => ObjectKind::String,
            Object::Keyword { .. } => ObjectKind::Keyword,
            Object::Symbol { .. } => ObjectKind::Symbol,
            Object::List(_) => ObjectKind::List,
            Object::Vector(_) => ObjectKind::Vector,
            Object::Set(_) => ObjectKind::Set,
            Object::Map(_) => ObjectKind::Map,
            Object::Fn { .. } => ObjectKind::Fn,
            Object::Var(_) => ObjectKind::Var,
        }
    }
}

/// Handle to a boxed value.
///
/// Copyable and pointer-sized. Identity comparison is pointer equality;
/// structural comparison goes through [`ObjRef::equals`].
#[derive(Clone, Copy)]
pub struct ObjRef(NonNull<Object>);

unsafe impl Send for ObjRef {}
unsafe impl Sync for ObjRef {}

impl ObjRef {
    /// Wrap a non-null object pointer.
    ///
    /// # Safety
    ///
    /// `ptr` must point to a live `Object` that outlives every use of the
    /// returned handle.
    pub unsafe fn from_ptr(ptr: NonNull<Object>) -> Self {
        Self(ptr)
    }

    /// Wrap a raw pointer from the C ABI; null becomes nil.
    pub fn from_raw_or_nil(ptr: *mut Object) -> Self {
        match NonNull::new(ptr) {
            Some(ptr) => Self(ptr),
            None => nil(),
        }
    }

    /// Raw pointer for the C ABI.
    pub fn into_raw(self) -> *mut Object {
        self.0.as_ptr()
    }

    /// Borrow the underlying object.
    pub fn obj(&self) -> &Object {
        // Boxed objects are never moved or freed while reachable through a
        // handle; see the module docs for the retention model.
        unsafe { self.0.as_ref() }
    }

    /// Kind tag.
    pub fn kind(&self) -> ObjectKind {
        self.obj().kind()
    }

    /// Pointer identity.
    pub fn same(self, other: ObjRef) -> bool {
        self.0.as_ptr() == other.0.as_ptr()
    }

    /// Integer payload, if this is an integer.
    pub fn as_integer(&self) -> Option<i64> {
        match self.obj() {
            Object::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Real payload, if this is a real.
    pub fn as_real(&self) -> Option<f64> {
        match self.obj() {
            Object::Real(r) => Some(*r),
            _ => None,
        }
    }

    /// Boolean payload, if this is a boolean.
    pub fn as_bool(&self) -> Option<bool> {
        match self.obj() {
            Object::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// String payload, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self.obj() {
            Object::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Whether this is nil.
    pub fn is_nil(&self) -> bool {
        matches!(self.obj(), Object::Nil)
    }

    /// nil and false are falsey; everything else is truthy.
    pub fn is_truthy(&self) -> bool {
        !matches!(self.obj(), Object::Nil | Object::Boolean(false))
    }

    /// Structural equality.
    pub fn equals(&self, other: &ObjRef) -> bool {
        if self.same(*other) {
            return true;
        }
        match (self.obj(), other.obj()) {
            (Object::Nil, Object::Nil) => true,
            (Object::Boolean(a), Object::Boolean(b)) => a == b,
            (Object::Integer(a), Object::Integer(b)) => a == b,
            (Object::Real(a), Object::Real(b)) => a == b,
            (Object::String(a), Object::String(b)) => a == b,
            (
                Object::Keyword { ns: a_ns, name: a },
                Object::Keyword { ns: b_ns, name: b },
            ) => a_ns == b_ns && a == b,
            (
                Object::Symbol { ns: a_ns, name: a },
                Object::Symbol { ns: b_ns, name: b },
            ) => a_ns == b_ns && a == b,
            (Object::List(a), Object::List(b)) | (Object::Vector(a), Object::Vector(b)) => {
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.equals(y))
            }
            (Object::Set(a), Object::Set(b)) => {
                a.len() == b.len() && a.iter().all(|x| b.iter().any(|y| x.equals(y)))
            }
            (Object::Map(a), Object::Map(b)) => {
                a.len() == b.len()
                    && a.iter().all(|(k, v)| {
                        b.iter().any(|(k2, v2)| k.equals(k2) && v.equals(v2))
                    })
            }
            (Object::Var(a), Object::Var(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl std::fmt::Debug for ObjRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", to_code_string(*self))
    }
}

// ── Boxing ───────────────────────────────────────────────────────────────

fn write_object(ptr: NonNull<u8>, obj: Object) -> ObjRef {
    let ptr = ptr.cast::<Object>();
    unsafe {
        ptr.as_ptr().write(obj);
        ObjRef::from_ptr(ptr)
    }
}

/// Box an object through the allocator surface.
///
/// Objects placed in a scoped allocator never run destructors; the default
/// heap retains them for process lifetime.
pub fn make_box(obj: Object) -> ObjRef {
    let layout = Layout::new::<Object>();
    if opt_flags().arena {
        if let Some(ptr) = try_allocator_alloc(layout.size(), layout.align()) {
            return write_object(ptr, obj);
        }
    }
    allocate_on_heap(obj)
}

/// Box an object directly on the default heap, bypassing any scoped
/// allocator. Canonical values (cached numbers, singletons) use this so a
/// scope reset can never invalidate them.
pub(crate) fn allocate_on_heap(obj: Object) -> ObjRef {
    let layout = Layout::new::<Object>();
    let ptr = global_heap().alloc(layout);
    write_object(NonNull::new(ptr).expect("heap alloc"), obj)
}

static NIL: Lazy<ObjRef> = Lazy::new(|| allocate_on_heap(Object::Nil));
static TRUE: Lazy<ObjRef> = Lazy::new(|| allocate_on_heap(Object::Boolean(true)));
static FALSE: Lazy<ObjRef> = Lazy::new(|| allocate_on_heap(Object::Boolean(false)));

/// The canonical nil.
pub fn nil() -> ObjRef {
    *NIL
}

/// Canonical booleans.
pub fn make_bool(value: bool) -> ObjRef {
    if value {
        *TRUE
    } else {
        *FALSE
    }
}

/// Box an integer, consulting the integer cache for the hot range.
pub fn make_int(value: i64) -> ObjRef {
    if opt_flags().integer_cache {
        if let Some(cached) = number_cache::cached_integer(value) {
            return cached;
        }
    }
    make_box(Object::Integer(value))
}

/// Box a real, consulting the real cache for common values.
pub fn make_real(value: f64) -> ObjRef {
    if opt_flags().real_cache {
        if let Some(cached) = number_cache::cached_real(value) {
            return cached;
        }
    }
    make_box(Object::Real(value))
}

/// Box a string.
pub fn make_string(value: impl Into<String>) -> ObjRef {
    make_box(Object::String(value.into()))
}

/// Box a keyword.
pub fn make_keyword(ns: Option<&str>, name: &str) -> ObjRef {
    make_box(Object::Keyword {
        ns: ns.map(str::to_string),
        name: name.to_string(),
    })
}

/// Box a symbol.
pub fn make_symbol(ns: Option<&str>, name: &str) -> ObjRef {
    make_box(Object::Symbol {
        ns: ns.map(str::to_string),
        name: name.to_string(),
    })
}

/// Box a vector.
pub fn make_vector(items: Vec<ObjRef>) -> ObjRef {
    make_box(Object::Vector(items))
}

/// Box a set, deduplicating structurally equal elements.
pub fn make_set(items: Vec<ObjRef>) -> ObjRef {
    let mut unique: Vec<ObjRef> = Vec::with_capacity(items.len());
    for item in items {
        if !unique.iter().any(|existing| existing.equals(&item)) {
            unique.push(item);
        }
    }
    make_box(Object::Set(unique))
}

/// Box a map from interleaved key/value pairs.
pub fn make_map(entries: Vec<(ObjRef, ObjRef)>) -> ObjRef {
    make_box(Object::Map(entries))
}

/// Box a host function.
pub fn make_host_fn(
    name: impl Into<String>,
    f: impl Fn(&[ObjRef]) -> Result<ObjRef, EvalError> + Send + Sync + 'static,
) -> ObjRef {
    make_box(Object::Fn {
        name: name.into(),
        callable: Callable::Boxed(Arc::new(f)),
    })
}

/// Box a fixed-arity native function.
pub fn make_native_fn(name: impl Into<String>, callable: Callable) -> ObjRef {
    make_box(Object::Fn {
        name: name.into(),
        callable,
    })
}

// ── Map access ───────────────────────────────────────────────────────────

/// Look up a keyword key in a map value.
pub fn map_lookup_keyword(map: ObjRef, name: &str) -> Option<ObjRef> {
    match map.obj() {
        Object::Map(entries) => entries.iter().find_map(|(k, v)| match k.obj() {
            Object::Keyword { ns: None, name: n } if n == name => Some(*v),
            _ => None,
        }),
        _ => None,
    }
}

// ── Calling ──────────────────────────────────────────────────────────────

/// Invoke a function value with the given arguments.
pub fn dynamic_call(f: ObjRef, args: &[ObjRef]) -> Result<ObjRef, EvalError> {
    let (name, callable) = match f.obj() {
        Object::Fn { name, callable } => (name, callable),
        Object::Var(var) => return dynamic_call(var.deref(), args),
        other => {
            return Err(EvalError::Runtime(format!(
                "value of kind {} is not callable",
                other.kind().name()
            )))
        }
    };

    if let Some(arity) = callable.fixed_arity() {
        if arity != args.len() {
            return Err(EvalError::Runtime(format!(
                "Wrong number of args ({}) passed to {} (expects {})",
                args.len(),
                name,
                arity
            )));
        }
    }

    let raw = |i: usize| args[i].into_raw();
    let result = match callable {
        Callable::Arity0(f) => f(),
        Callable::Arity1(f) => f(raw(0)),
        Callable::Arity2(f) => f(raw(0), raw(1)),
        Callable::Arity3(f) => f(raw(0), raw(1), raw(2)),
        Callable::Arity4(f) => f(raw(0), raw(1), raw(2), raw(3)),
        Callable::Boxed(f) => return f(args),
    };
    Ok(ObjRef::from_raw_or_nil(result))
}

/// Raw pointer view of a handle for FFI hand-off.
pub fn as_void_ptr(value: ObjRef) -> *mut c_void {
    value.into_raw().cast()
}

// ── Printing ─────────────────────────────────────────────────────────────

fn escape_string(s: &str, out: &mut String) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            _ => out.push(c),
        }
    }
    out.push('"');
}

fn format_real(value: f64) -> String {
    if value.fract() == 0.0 && value.is_finite() && value.abs() < 1e15 {
        format!("{:.1}", value)
    } else {
        format!("{}", value)
    }
}

fn write_seq(out: &mut String, items: &[ObjRef], open: &str, close: &str) {
    out.push_str(open);
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        out.push_str(&to_code_string(*item));
    }
    out.push_str(close);
}

/// Reader-form representation of a value.
pub fn to_code_string(value: ObjRef) -> String {
    let mut out = String::new();
    match value.obj() {
        Object::Nil => out.push_str("nil"),
        Object::Boolean(b) => {
            let _ = write!(out, "{}", b);
        }
        Object::Integer(i) => {
            let _ = write!(out, "{}", i);
        }
        Object::Real(r) => out.push_str(&format_real(*r)),
        Object::String(s) => escape_string(s, &mut out),
        Object::Keyword { ns, name } => match ns {
            Some(ns) => {
                let _ = write!(out, ":{}/{}", ns, name);
            }
            None => {
                let _ = write!(out, ":{}", name);
            }
        },
        Object::Symbol { ns, name } => match ns {
            Some(ns) => {
                let _ = write!(out, "{}/{}", ns, name);
            }
            None => out.push_str(name),
        },
        Object::List(items) => write_seq(&mut out, items, "(", ")"),
        Object::Vector(items) => write_seq(&mut out, items, "[", "]"),
        Object::Set(items) => write_seq(&mut out, items, "#{", "}"),
        Object::Map(entries) => {
            out.push('{');
            for (i, (k, v)) in entries.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                out.push_str(&to_code_string(*k));
                out.push(' ');
                out.push_str(&to_code_string(*v));
            }
            out.push('}');
        }
        Object::Fn { name, .. } => {
            let _ = write!(out, "#object[fn {}]", name);
        }
        Object::Var(var) => {
            let _ = write!(out, "#'{}", var.qualified_name());
        }
    }
    out
}

/// [`to_code_string`] by reference; Display-attribute helper.
pub fn to_code_string_ref(value: &ObjRef) -> String {
    to_code_string(*value)
}

/// Human-facing representation: like [`to_code_string`] but strings print
/// raw.
pub fn to_display_string(value: ObjRef) -> String {
    match value.obj() {
        Object::String(s) => s.clone(),
        _ => to_code_string(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nil_singleton() {
        assert!(nil().same(nil()));
        assert!(nil().is_nil());
        assert!(!nil().is_truthy());
    }

    #[test]
    fn test_structural_equality() {
        let a = make_vector(vec![make_int(1), make_string("x")]);
        let b = make_vector(vec![make_int(1), make_string("x")]);
        assert!(a.equals(&b));
        assert!(!a.same(b));
    }

    #[test]
    fn test_set_dedup() {
        let s = make_set(vec![make_int(2000), make_int(2000), make_int(3000)]);
        match s.obj() {
            Object::Set(items) => assert_eq!(items.len(), 2),
            _ => panic!("expected set"),
        }
    }

    #[test]
    fn test_code_string_shapes() {
        assert_eq!(to_code_string(nil()), "nil");
        assert_eq!(to_code_string(make_int(42)), "42");
        assert_eq!(to_code_string(make_string("a\nb")), "\"a\\nb\"");
        assert_eq!(to_code_string(make_keyword(None, "k")), ":k");
        assert_eq!(
            to_code_string(make_vector(vec![make_int(1), make_int(2)])),
            "[1 2]"
        );
    }

    #[test]
    fn test_display_string_raw() {
        assert_eq!(to_display_string(make_string("plain")), "plain");
    }

    #[test]
    fn test_dynamic_call_host_fn() {
        let add = make_host_fn("add", |args| {
            let total = args.iter().filter_map(|a| a.as_integer()).sum();
            Ok(make_int(total))
        });
        let result = dynamic_call(add, &[make_int(1), make_int(2)]).unwrap();
        assert_eq!(result.as_integer(), Some(3));
    }

    #[test]
    fn test_dynamic_call_arity_mismatch() {
        extern "C" fn one(arg: *mut Object) -> *mut Object {
            arg
        }
        let f = make_native_fn("one", Callable::Arity1(one));
        assert!(dynamic_call(f, &[]).is_err());
        let ok = dynamic_call(f, &[make_int(9000)]).unwrap();
        assert_eq!(ok.as_integer(), Some(9000));
    }

    #[test]
    fn test_dynamic_call_non_callable() {
        assert!(dynamic_call(make_int(1), &[]).is_err());
    }
}
