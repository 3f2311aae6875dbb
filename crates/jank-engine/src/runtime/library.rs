//! Dynamic library loading.
//!
//! Thin wrapper over the platform loader used by the hot-reload registry and
//! the JIT backend. Symbols are resolved eagerly (`RTLD_NOW`); visibility is
//! chosen per call site: patches load `RTLD_LOCAL`, JIT images load
//! `RTLD_GLOBAL` so later snippets can link against earlier ones.

use std::ffi::{CStr, CString};
use std::path::Path;

use thiserror::Error;

/// Errors that can occur during library loading.
#[derive(Debug, Error)]
pub enum LoadError {
    /// Library file not found or could not be loaded.
    #[error("Library not found: {path}")]
    NotFound {
        /// Path that was attempted, with the loader's message appended.
        path: String,
    },

    /// Symbol not found in the library.
    #[error("Symbol not found: {symbol} in {library}")]
    SymbolNotFound {
        /// Symbol name that was not found.
        symbol: String,
        /// Library path.
        library: String,
    },

    /// The patch module's symbol table was malformed.
    #[error("Invalid patch module: {0}")]
    InvalidPatch(String),

    /// Platform-specific error.
    #[error("Platform error: {0}")]
    Platform(String),
}

/// Symbol visibility of a loaded image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    /// Symbols stay private to the image.
    Local,
    /// Symbols join the process-global table.
    Global,
}

/// An open dynamic library. Closing happens on drop; callers that must keep
/// an image resident (patches, JIT snippets) hold the handle for as long as
/// any code pointer into it may run.
pub struct Library {
    handle: *mut std::ffi::c_void,
    path: String,
}

unsafe impl Send for Library {}
unsafe impl Sync for Library {}

impl Library {
    /// Load a dynamic library from `path`.
    pub fn open<P: AsRef<Path>>(path: P, visibility: Visibility) -> Result<Self, LoadError> {
        let path_ref = path.as_ref();
        let path_str = path_ref
            .to_str()
            .ok_or_else(|| LoadError::Platform(format!("non-UTF-8 path: {:?}", path_ref)))?;
        let c_path = CString::new(path_str)
            .map_err(|e| LoadError::Platform(format!("invalid path: {}", e)))?;

        let flags = libc::RTLD_NOW
            | match visibility {
                Visibility::Local => libc::RTLD_LOCAL,
                Visibility::Global => libc::RTLD_GLOBAL,
            };
        let handle = unsafe { libc::dlopen(c_path.as_ptr(), flags) };
        if handle.is_null() {
            return Err(LoadError::NotFound {
                path: format!("{}: {}", path_str, last_dl_error()),
            });
        }

        Ok(Self {
            handle,
            path: path_str.to_string(),
        })
    }

    /// Resolve a symbol to a typed function or data pointer.
    ///
    /// # Safety
    ///
    /// The caller must guarantee the symbol's actual type matches `T` and
    /// that the library outlives every use of the pointer.
    pub unsafe fn get<T: Copy>(&self, symbol: &str) -> Result<T, LoadError> {
        let c_name = CString::new(symbol)
            .map_err(|e| LoadError::Platform(format!("invalid symbol name: {}", e)))?;

        // Clear any stale error state before probing.
        libc::dlerror();
        let ptr = libc::dlsym(self.handle, c_name.as_ptr());
        let err = libc::dlerror();
        if !err.is_null() {
            return Err(LoadError::SymbolNotFound {
                symbol: symbol.to_string(),
                library: format!("{}: {}", self.path, CStr::from_ptr(err).to_string_lossy()),
            });
        }
        if ptr.is_null() {
            return Err(LoadError::SymbolNotFound {
                symbol: symbol.to_string(),
                library: self.path.clone(),
            });
        }
        Ok(std::mem::transmute_copy(&ptr))
    }

    /// Path this library was loaded from.
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl Drop for Library {
    fn drop(&mut self) {
        unsafe {
            libc::dlclose(self.handle);
        }
    }
}

/// Resolve a symbol in the process-global table.
pub fn global_symbol(name: &str) -> Option<*mut std::ffi::c_void> {
    let c_name = CString::new(name).ok()?;
    let ptr = unsafe { libc::dlsym(libc::RTLD_DEFAULT, c_name.as_ptr()) };
    if ptr.is_null() {
        None
    } else {
        Some(ptr)
    }
}

fn last_dl_error() -> String {
    unsafe {
        let err = libc::dlerror();
        if err.is_null() {
            "unknown error".to_string()
        } else {
            CStr::from_ptr(err).to_string_lossy().into_owned()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_not_found() {
        let result = Library::open("/nonexistent/library.so", Visibility::Local);
        assert!(matches!(result, Err(LoadError::NotFound { .. })));
    }

    #[test]
    fn test_global_symbol_resolves_libc() {
        // malloc is always resolvable through the default table.
        assert!(global_symbol("malloc").is_some());
        assert!(global_symbol("definitely_not_a_symbol_xyz").is_none());
    }
}
