//! Runtime value model and process state.

pub mod alloc;
pub mod context;
#[cfg(unix)]
pub mod hot_reload;
#[cfg(unix)]
pub mod library;
pub mod ns;
pub mod number_cache;
pub mod optimization;
pub mod testing;
pub mod trace;
pub mod value;

pub use context::{Context, Evaluator, NsBindingScope, OutputRedirectScope, DEFAULT_NS};
pub use ns::{Namespace, NamespaceRef, Var, VarRef};
pub use value::{
    dynamic_call, make_bool, make_box, make_host_fn, make_int, make_keyword, make_map,
    make_native_fn, make_real, make_set, make_string, make_symbol, make_vector, nil,
    to_code_string, to_display_string, Callable, ObjRef, Object, ObjectKind,
};
