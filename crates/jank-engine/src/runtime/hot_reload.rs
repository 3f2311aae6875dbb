//! Hot-reload registry.
//!
//! Loads separately compiled "patch" side modules and rebinds vars to the
//! function pointers they export. A patch exposes
//! `jank_patch_symbols_<N>(*out_count)` (or the unsuffixed name) returning
//! an array of `{qualified_name, signature, fn_ptr}` records; the signature
//! is the decimal fixed arity. Loaded modules are retained so their code is
//! never unmapped while a var still points into it.
//!
//! The `jank_*` C exports at the bottom are the ABI surface patches compile
//! against; they go through the globally installed context.

use std::ffi::{c_char, c_int, c_void, CStr, CString};

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tracing::{error, info, warn};

use crate::runtime::context::Context;
use crate::runtime::library::{Library, LoadError, Visibility};
use crate::runtime::value::{
    self, dynamic_call, make_native_fn, nil, Callable, ObjRef, Object,
};

/// Highest fixed arity a patch function may declare.
pub const MAX_PATCH_ARITY: i64 = 4;

/// Patch symbol record as exported by side modules.
#[repr(C)]
pub struct PatchSymbol {
    /// `ns/name` the function binds to.
    pub qualified_name: *const c_char,
    /// Decimal fixed arity.
    pub signature: *const c_char,
    /// Function pointer matching the arity.
    pub fn_ptr: *mut c_void,
}

type PatchSymbolsFn = unsafe extern "C" fn(*mut c_int) -> *mut PatchSymbol;

struct ModuleInfo {
    // Held to keep the image mapped.
    _handle: Library,
    path: String,
    symbols: Vec<String>,
}

/// Statistics over loaded patches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HotReloadStats {
    /// Number of loaded patch modules.
    pub loaded_modules: usize,
    /// Number of successfully registered symbols.
    pub registered_symbols: usize,
    /// Paths of loaded modules, in load order.
    pub module_paths: Vec<String>,
}

/// Registry of loaded patch modules and rebound symbols.
#[derive(Default)]
pub struct HotReloadRegistry {
    modules: Vec<ModuleInfo>,
    registered_symbols: usize,
}

static REGISTRY: Lazy<Mutex<HotReloadRegistry>> =
    Lazy::new(|| Mutex::new(HotReloadRegistry::default()));

/// The process-wide registry.
pub fn registry() -> &'static Mutex<HotReloadRegistry> {
    &REGISTRY
}

impl HotReloadRegistry {
    /// Load a patch module and register every symbol it exports.
    ///
    /// On failure the registry is left unchanged. Returns the number of
    /// registered symbols.
    pub fn load_patch(
        &mut self,
        ctx: &Context,
        module_path: &str,
        symbol_name: &str,
    ) -> Result<usize, LoadError> {
        info!(path = module_path, symbol = symbol_name, "loading patch");

        let library = Library::open(module_path, Visibility::Local)?;
        let get_symbols: PatchSymbolsFn = unsafe { library.get(symbol_name)? };

        let mut count: c_int = 0;
        let symbols = unsafe { get_symbols(&mut count) };
        if symbols.is_null() || count <= 0 {
            return Err(LoadError::InvalidPatch(format!(
                "{} returned no symbols",
                symbol_name
            )));
        }

        let mut registered = Vec::new();
        for i in 0..count as usize {
            let record = unsafe { &*symbols.add(i) };
            let qualified_name = unsafe { CStr::from_ptr(record.qualified_name) }
                .to_string_lossy()
                .into_owned();
            let signature = unsafe { CStr::from_ptr(record.signature) }
                .to_string_lossy()
                .into_owned();

            match self.register_symbol(ctx, &qualified_name, record.fn_ptr, &signature) {
                Ok(()) => registered.push(qualified_name),
                Err(e) => warn!(symbol = %qualified_name, error = %e, "patch symbol skipped"),
            }
        }

        let symbol_count = registered.len();
        self.modules.push(ModuleInfo {
            _handle: library,
            path: module_path.to_string(),
            symbols: registered,
        });

        info!(path = module_path, count = symbol_count, "patch loaded");
        Ok(symbol_count)
    }

    /// Rebind `qname` to `fn_ptr`, wrapping it in a dispatcher for the arity
    /// encoded in `signature`.
    pub fn register_symbol(
        &mut self,
        ctx: &Context,
        qualified_name: &str,
        fn_ptr: *mut c_void,
        signature: &str,
    ) -> Result<(), LoadError> {
        let (ns_name, sym_name) = qualified_name.split_once('/').ok_or_else(|| {
            LoadError::InvalidPatch(format!(
                "invalid qualified name (missing /): {}",
                qualified_name
            ))
        })?;

        let arity: i64 = signature.trim().parse().map_err(|_| {
            LoadError::InvalidPatch(format!(
                "invalid signature '{}' for {}",
                signature, qualified_name
            ))
        })?;

        let callable = callable_for_arity(fn_ptr, arity).ok_or_else(|| {
            LoadError::InvalidPatch(format!(
                "unsupported arity {} for {} (max {})",
                arity, qualified_name, MAX_PATCH_ARITY
            ))
        })?;

        let var = ctx.intern_var(ns_name, sym_name);
        var.bind_root(make_native_fn(qualified_name, callable));
        self.registered_symbols += 1;
        info!(symbol = qualified_name, arity, "registered patch symbol");
        Ok(())
    }

    /// Registry statistics.
    pub fn stats(&self) -> HotReloadStats {
        HotReloadStats {
            loaded_modules: self.modules.len(),
            registered_symbols: self.registered_symbols,
            module_paths: self.modules.iter().map(|m| m.path.clone()).collect(),
        }
    }

    /// Names registered by the most recently loaded module.
    pub fn last_module_symbols(&self) -> &[String] {
        self.modules.last().map(|m| m.symbols.as_slice()).unwrap_or(&[])
    }
}

/// Wrap a raw function pointer in the matching fixed-arity callable.
fn callable_for_arity(fn_ptr: *mut c_void, arity: i64) -> Option<Callable> {
    if !(0..=MAX_PATCH_ARITY).contains(&arity) {
        return None;
    }
    // The patch contract guarantees the pointer's true signature matches the
    // declared arity; the transmutes below only fix up the type.
    unsafe {
        Some(match arity {
            0 => Callable::Arity0(std::mem::transmute::<*mut c_void, value::NativeFn0>(fn_ptr)),
            1 => Callable::Arity1(std::mem::transmute::<*mut c_void, value::NativeFn1>(fn_ptr)),
            2 => Callable::Arity2(std::mem::transmute::<*mut c_void, value::NativeFn2>(fn_ptr)),
            3 => Callable::Arity3(std::mem::transmute::<*mut c_void, value::NativeFn3>(fn_ptr)),
            _ => Callable::Arity4(std::mem::transmute::<*mut c_void, value::NativeFn4>(fn_ptr)),
        })
    }
}

// ── C ABI exports ────────────────────────────────────────────────────────

unsafe fn c_str<'a>(ptr: *const c_char) -> Option<&'a str> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok()
}

/// Load a patch module; returns 0 on success, -1 on failure.
#[no_mangle]
pub extern "C" fn jank_hot_reload_load_patch(
    path: *const c_char,
    symbol_name: *const c_char,
) -> c_int {
    let (path, symbol_name) = unsafe {
        match (c_str(path), c_str(symbol_name)) {
            (Some(p), Some(s)) => (p, s),
            _ => return -1,
        }
    };
    let ctx = match Context::global() {
        Some(ctx) => ctx,
        None => {
            error!("hot-reload: no global context installed");
            return -1;
        }
    };
    match registry().lock().load_patch(&ctx, path, symbol_name) {
        Ok(_) => 0,
        Err(e) => {
            error!(error = %e, "hot-reload load failed");
            -1
        }
    }
}

/// Registry statistics as a heap-allocated JSON string; the caller frees it
/// with `free()`.
#[no_mangle]
pub extern "C" fn jank_hot_reload_get_stats() -> *mut c_char {
    let stats = registry().lock().stats();
    let mut json = format!(
        "{{\"loaded_modules\":{},\"registered_symbols\":{},\"module_paths\":[",
        stats.loaded_modules, stats.registered_symbols
    );
    for (i, path) in stats.module_paths.iter().enumerate() {
        if i > 0 {
            json.push(',');
        }
        json.push('"');
        json.push_str(path);
        json.push('"');
    }
    json.push_str("]}");

    // Allocated with malloc so C callers can release it with free().
    let Ok(c_json) = CString::new(json) else {
        return std::ptr::null_mut();
    };
    let bytes = c_json.as_bytes_with_nul();
    unsafe {
        let out = libc::malloc(bytes.len()) as *mut c_char;
        if out.is_null() {
            return out;
        }
        std::ptr::copy_nonoverlapping(bytes.as_ptr().cast::<c_char>(), out, bytes.len());
        out
    }
}

/// Box an integer.
#[no_mangle]
pub extern "C" fn jank_box_integer(v: i64) -> *mut Object {
    value::make_int(v).into_raw()
}

/// Unbox an integer; non-integers unbox to 0.
#[no_mangle]
pub extern "C" fn jank_unbox_integer(obj: *mut Object) -> i64 {
    ObjRef::from_raw_or_nil(obj).as_integer().unwrap_or(0)
}

/// Box a real.
#[no_mangle]
pub extern "C" fn jank_box_double(v: f64) -> *mut Object {
    value::make_real(v).into_raw()
}

/// Unbox a real; integers widen, anything else unboxes to 0.0.
#[no_mangle]
pub extern "C" fn jank_unbox_double(obj: *mut Object) -> f64 {
    let value = ObjRef::from_raw_or_nil(obj);
    value
        .as_real()
        .or_else(|| value.as_integer().map(|i| i as f64))
        .unwrap_or(0.0)
}

/// The canonical nil.
#[no_mangle]
pub extern "C" fn jank_nil_value() -> *mut Object {
    nil().into_raw()
}

/// Box a keyword; `ns` may be null or empty.
#[no_mangle]
pub extern "C" fn jank_make_keyword(ns: *const c_char, name: *const c_char) -> *mut Object {
    let ns = unsafe { c_str(ns) }.filter(|s| !s.is_empty());
    let name = match unsafe { c_str(name) } {
        Some(name) => name,
        None => return nil().into_raw(),
    };
    value::make_keyword(ns, name).into_raw()
}

/// Box a symbol; `ns` may be null or empty.
#[no_mangle]
pub extern "C" fn jank_make_symbol(ns: *const c_char, name: *const c_char) -> *mut Object {
    let ns = unsafe { c_str(ns) }.filter(|s| !s.is_empty());
    let name = match unsafe { c_str(name) } {
        Some(name) => name,
        None => return nil().into_raw(),
    };
    value::make_symbol(ns, name).into_raw()
}

/// Box a string.
#[no_mangle]
pub extern "C" fn jank_make_string(s: *const c_char) -> *mut Object {
    match unsafe { c_str(s) } {
        Some(s) => value::make_string(s).into_raw(),
        None => nil().into_raw(),
    }
}

unsafe fn collect_args(argc: c_int, args: *mut *mut Object) -> Vec<ObjRef> {
    let mut collected = Vec::with_capacity(argc.max(0) as usize);
    for i in 0..argc.max(0) as usize {
        collected.push(ObjRef::from_raw_or_nil(*args.add(i)));
    }
    collected
}

/// Box a vector from an argv.
#[no_mangle]
pub extern "C" fn jank_make_vector(argc: c_int, args: *mut *mut Object) -> *mut Object {
    let items = if args.is_null() {
        Vec::new()
    } else {
        unsafe { collect_args(argc, args) }
    };
    value::make_vector(items).into_raw()
}

/// Box a set from an argv.
#[no_mangle]
pub extern "C" fn jank_make_set(argc: c_int, args: *mut *mut Object) -> *mut Object {
    let items = if args.is_null() {
        Vec::new()
    } else {
        unsafe { collect_args(argc, args) }
    };
    value::make_set(items).into_raw()
}

/// Call a var by `ns`/`name` with an argv; failures return nil.
#[no_mangle]
pub extern "C" fn jank_call_var(
    ns: *const c_char,
    name: *const c_char,
    argc: c_int,
    args: *mut *mut Object,
) -> *mut Object {
    let (ns, name) = unsafe {
        match (c_str(ns), c_str(name)) {
            (Some(ns), Some(name)) => (ns, name),
            _ => return nil().into_raw(),
        }
    };
    let ctx = match Context::global() {
        Some(ctx) => ctx,
        None => return nil().into_raw(),
    };
    let var = match ctx.find_var(ns, name) {
        Some(var) => var,
        None => {
            error!(ns, name, "var not found");
            return nil().into_raw();
        }
    };
    let call_args = if args.is_null() {
        Vec::new()
    } else {
        unsafe { collect_args(argc, args) }
    };
    match dynamic_call(var.deref(), &call_args) {
        Ok(result) => result.into_raw(),
        Err(e) => {
            error!(ns, name, error = %e, "var call failed");
            nil().into_raw()
        }
    }
}

/// Deref a var by `ns`/`name`; unknown vars deref to nil.
#[no_mangle]
pub extern "C" fn jank_deref_var(ns: *const c_char, name: *const c_char) -> *mut Object {
    let (ns, name) = unsafe {
        match (c_str(ns), c_str(name)) {
            (Some(ns), Some(name)) => (ns, name),
            _ => return nil().into_raw(),
        }
    };
    match Context::global().and_then(|ctx| ctx.find_var(ns, name)) {
        Some(var) => var.deref().into_raw(),
        None => nil().into_raw(),
    }
}

/// Print arguments through the runtime stdout path.
#[no_mangle]
pub extern "C" fn jank_println(argc: c_int, args: *mut *mut Object) -> *mut Object {
    let ctx = match Context::global() {
        Some(ctx) => ctx,
        None => return nil().into_raw(),
    };
    let items = if args.is_null() {
        Vec::new()
    } else {
        unsafe { collect_args(argc, args) }
    };
    let line = items
        .iter()
        .map(|item| value::to_display_string(*item))
        .collect::<Vec<_>>()
        .join(" ");
    ctx.write_stdout(&line);
    ctx.write_stdout("\n");
    nil().into_raw()
}

/// Wrap an anonymous function pointer so it can be passed to higher-order
/// functions; unsupported arities return nil.
#[no_mangle]
pub extern "C" fn jank_make_fn_wrapper(fn_ptr: *mut c_void, arity: c_int) -> *mut Object {
    match callable_for_arity(fn_ptr, arity as i64) {
        Some(callable) => make_native_fn("anonymous-patch-fn", callable).into_raw(),
        None => {
            error!(arity, "unsupported wrapper arity");
            nil().into_raw()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::value::make_int;

    extern "C" fn add_one(arg: *mut Object) -> *mut Object {
        let v = ObjRef::from_raw_or_nil(arg).as_integer().unwrap_or(0);
        value::make_int(v + 1).into_raw()
    }

    #[test]
    fn test_register_symbol_rebinds_var() {
        let ctx = Context::new();
        let mut registry = HotReloadRegistry::default();

        // Pre-register ex/g returning 10.
        let var = ctx.intern_var("ex", "g");
        var.bind_root(value::make_host_fn("g", |_| Ok(make_int(10))));
        let before = dynamic_call(var.deref(), &[make_int(5)]).unwrap();
        assert_eq!(before.as_integer(), Some(10));

        registry
            .register_symbol(&ctx, "ex/g", add_one as *mut c_void, "1")
            .unwrap();

        let after = dynamic_call(var.deref(), &[make_int(5)]).unwrap();
        assert_eq!(after.as_integer(), Some(6));
        assert_eq!(registry.stats().registered_symbols, 1);
    }

    #[test]
    fn test_register_symbol_requires_qualified_name() {
        let ctx = Context::new();
        let mut registry = HotReloadRegistry::default();
        let err = registry
            .register_symbol(&ctx, "no-namespace", add_one as *mut c_void, "1")
            .unwrap_err();
        assert!(matches!(err, LoadError::InvalidPatch(_)));
    }

    #[test]
    fn test_register_symbol_rejects_high_arity() {
        let ctx = Context::new();
        let mut registry = HotReloadRegistry::default();
        let err = registry
            .register_symbol(&ctx, "ex/high", add_one as *mut c_void, "9")
            .unwrap_err();
        assert!(matches!(err, LoadError::InvalidPatch(_)));
        assert_eq!(registry.stats().registered_symbols, 0);
    }

    #[test]
    fn test_register_symbol_rejects_bad_signature() {
        let ctx = Context::new();
        let mut registry = HotReloadRegistry::default();
        assert!(registry
            .register_symbol(&ctx, "ex/bad", add_one as *mut c_void, "many")
            .is_err());
    }

    #[test]
    fn test_load_patch_missing_module_leaves_registry_unchanged() {
        let ctx = Context::new();
        let mut registry = HotReloadRegistry::default();
        assert!(registry
            .load_patch(&ctx, "/nonexistent/patch.so", "jank_patch_symbols")
            .is_err());
        assert_eq!(registry.stats().loaded_modules, 0);
    }

    #[test]
    fn test_box_helpers_round_trip() {
        assert_eq!(jank_unbox_integer(jank_box_integer(41)), 41);
        assert_eq!(jank_unbox_double(jank_box_double(2.5)), 2.5);
        // Integers widen through the double unboxer.
        assert_eq!(jank_unbox_double(jank_box_integer(2)), 2.0);
        assert_eq!(jank_unbox_integer(std::ptr::null_mut()), 0);
    }
}
