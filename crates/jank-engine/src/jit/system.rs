//! Production evaluator backend over the system C++ toolchain.
//!
//! Each snippet is compiled into a shared image and loaded with global
//! symbol visibility, so later snippets link against everything loaded
//! before them. Relocatable objects and IR modules are linked into loadable
//! images the same way; symbol lookup goes through the process-global
//! table. Loaded images are retained for the life of the backend because
//! vars hold code pointers into them.

use std::ffi::c_void;
use std::fs;
use std::path::{Path, PathBuf};

use rustc_hash::FxHashSet;
use tracing::debug;

use crate::config::{binary_version, Config};
use crate::error::JitError;
use crate::jit::backend::{Interpreter, NativeValue};
use crate::jit::toolchain::{
    assemble_compile_flags, build_pch, find_pch, find_toolchain, link_shared,
};
use crate::runtime::library::{global_symbol, Library, Visibility};

/// Evaluator backed by the system C++ toolchain and the platform loader.
pub struct SystemInterpreter {
    toolchain: PathBuf,
    flags: Vec<String>,
    scratch_dir: PathBuf,
    // Retained so JIT-compiled code is never unmapped.
    images: Vec<Library>,
    removed_symbols: FxHashSet<String>,
    counter: usize,
}

impl SystemInterpreter {
    /// Configure the backend: locate the toolchain, assemble the flag set
    /// (build flags, `JANK_EXTRA_FLAGS`, user includes/libs/defines), and
    /// locate or build the prelude PCH when a resource dir is configured.
    ///
    /// Missing toolchain or PCH build failure is fatal at init.
    pub fn create(config: &Config) -> Result<Self, JitError> {
        let toolchain =
            find_toolchain().ok_or_else(|| JitError::Init("C++ toolchain not found".to_string()))?;
        let mut flags = assemble_compile_flags(config);

        if config.resource_dir.is_some() {
            let version = binary_version();
            let pch = match find_pch(config, &version) {
                Some(pch) => pch,
                None => build_pch(config, &flags, &version)?,
            };
            flags.push("-include-pch".to_string());
            flags.push(pch.display().to_string());
        }

        let scratch_dir = std::env::temp_dir().join(format!("jank-jit-{}", std::process::id()));
        fs::create_dir_all(&scratch_dir)
            .map_err(|e| JitError::Init(format!("cannot create scratch dir: {}", e)))?;

        Ok(Self {
            toolchain,
            flags,
            scratch_dir,
            images: Vec::new(),
            removed_symbols: FxHashSet::default(),
            counter: 0,
        })
    }

    fn next_path(&mut self, stem: &str, ext: &str) -> PathBuf {
        self.counter += 1;
        self.scratch_dir
            .join(format!("{}_{}.{}", stem, self.counter, ext))
    }

    fn load_image(&mut self, path: &Path) -> Result<(), String> {
        let image = Library::open(path, Visibility::Global).map_err(|e| e.to_string())?;
        self.images.push(image);
        Ok(())
    }

    fn compile_and_load(&mut self, source: &str, stem: &str) -> Result<(), String> {
        let src_path = self.next_path(stem, "cpp");
        let image_path = self.next_path(stem, "so");
        fs::write(&src_path, source).map_err(|e| e.to_string())?;

        let result = link_shared(&self.toolchain, &self.flags, &[&src_path], &image_path)
            .map_err(|e| e.to_string());
        let _ = fs::remove_file(&src_path);
        result?;

        self.load_image(&image_path)?;
        debug!(image = %image_path.display(), "loaded JIT image");
        Ok(())
    }
}

impl Interpreter for SystemInterpreter {
    fn eval(&mut self, code: &str) -> Result<(), String> {
        self.compile_and_load(code, "eval")
    }

    fn eval_with_result(&mut self, code: &str) -> Result<NativeValue, String> {
        self.counter += 1;
        let entry = format!("jank_eval_result_{}", self.counter);
        let source = format!(
            "extern \"C\" void* {}() {{\n  return (void*)({});\n}}\n",
            entry, code
        );
        self.compile_and_load(&source, "expr")?;

        let ptr = global_symbol(&entry).ok_or_else(|| format!("entry {} not found", entry))?;
        // The entry has no parameters and returns the expression value.
        let factory: extern "C" fn() -> *mut c_void = unsafe { std::mem::transmute(ptr) };
        let result = factory();

        Ok(NativeValue {
            valid: true,
            is_void: false,
            ptr: result,
            type_str: "jank::runtime::object*".to_string(),
            repr: format!("{:p}", result),
        })
    }

    fn add_object(&mut self, path: &Path) -> Result<(), String> {
        // Relocatable objects cannot be loaded directly; link into a
        // loadable image first.
        let image_path = self.next_path("object", "so");
        link_shared(&self.toolchain, &self.flags, &[path], &image_path)
            .map_err(|e| e.to_string())?;
        self.load_image(&image_path)
    }

    fn add_ir_module(&mut self, name: &str, ir: &[u8]) -> Result<(), String> {
        let stem = format!("ir_{}", name.replace(['/', '.'], "_"));
        let ir_path = self.next_path(&stem, "ll");
        fs::write(&ir_path, ir).map_err(|e| e.to_string())?;

        let image_path = self.next_path(&stem, "so");
        let result = link_shared(&self.toolchain, &self.flags, &[&ir_path], &image_path)
            .map_err(|e| e.to_string());
        let _ = fs::remove_file(&ir_path);
        result?;
        self.load_image(&image_path)
    }

    fn remove_symbol(&mut self, name: &str) -> Result<(), String> {
        // Images stay mapped; removal shadows the name for later lookups.
        self.removed_symbols.insert(name.to_string());
        Ok(())
    }

    fn find_symbol(&mut self, name: &str) -> Option<*mut c_void> {
        if self.removed_symbols.contains(name) {
            return None;
        }
        global_symbol(name)
    }

    fn load_dynamic_library(&mut self, path: &str) -> Result<(), String> {
        let image = Library::open(path, Visibility::Global).map_err(|e| e.to_string())?;
        self.images.push(image);
        Ok(())
    }
}

impl Drop for SystemInterpreter {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.scratch_dir);
    }
}
