//! System C++ toolchain discovery and flag assembly.
//!
//! The runtime records the compiler flags it was built with so JIT-compiled
//! code and cache objects stay ABI-compatible with it. Everything here is
//! shared between the JIT backend and the persistent cache's object
//! compiler.

use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::debug;

use crate::config::{extra_jit_flags, Config};
use crate::error::JitError;

/// Flags the runtime itself is built with; prepended to every JIT and cache
/// compile so object files link cleanly against the running binary.
pub const BUILD_JIT_FLAGS: &str = "-std=c++20 -fPIC -w -Wno-c++11-narrowing";

/// Locate the system C++ compiler.
///
/// Honors `JANK_CXX` first, then probes `clang++` and `c++` on `PATH`.
pub fn find_toolchain() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("JANK_CXX") {
        let path = PathBuf::from(path);
        if path.exists() {
            return Some(path);
        }
    }

    for candidate in ["clang++", "c++"] {
        let probe = Command::new(candidate).arg("--version").output();
        if matches!(probe, Ok(ref output) if output.status.success()) {
            return Some(PathBuf::from(candidate));
        }
    }
    None
}

/// Locate the precompiled prelude header for this binary version, searching
/// the configured resource directory.
pub fn find_pch(config: &Config, binary_version: &str) -> Option<PathBuf> {
    let resource_dir = config.resource_dir.as_ref()?;
    let candidate = resource_dir.join(format!("prelude-{}.pch", binary_version));
    candidate.exists().then_some(candidate)
}

/// Build the prelude PCH on demand (desktop targets only; constrained
/// platforms bundle one).
pub fn build_pch(
    config: &Config,
    flags: &[String],
    binary_version: &str,
) -> Result<PathBuf, JitError> {
    let resource_dir = config
        .resource_dir
        .as_ref()
        .ok_or_else(|| JitError::Init("no resource directory configured".to_string()))?;
    let prelude = resource_dir.join("include/jank/prelude.hpp");
    if !prelude.exists() {
        return Err(JitError::Init(format!(
            "prelude header not found: {}",
            prelude.display()
        )));
    }

    let toolchain =
        find_toolchain().ok_or_else(|| JitError::Init("C++ toolchain not found".to_string()))?;
    let output = resource_dir.join(format!("prelude-{}.pch", binary_version));

    let status = Command::new(&toolchain)
        .args(flags)
        .arg("-x")
        .arg("c++-header")
        .arg(&prelude)
        .arg("-o")
        .arg(&output)
        .status()
        .map_err(|e| JitError::Init(format!("failed to spawn toolchain: {}", e)))?;

    if !status.success() {
        return Err(JitError::Init(format!(
            "PCH build failed with status {}",
            status
        )));
    }
    debug!(path = %output.display(), "built prelude PCH");
    Ok(output)
}

/// Assemble the compile flags for JIT snippets and cache objects: build
/// flags, `JANK_EXTRA_FLAGS`, then config-supplied includes, library dirs,
/// and defines.
pub fn assemble_compile_flags(config: &Config) -> Vec<String> {
    let mut flags: Vec<String> = BUILD_JIT_FLAGS
        .split_whitespace()
        .map(str::to_string)
        .collect();

    flags.extend(extra_jit_flags());

    if config.debug_symbols || config.perf_profiling_enabled {
        flags.push("-g".to_string());
    }
    if config.optimization_level > 0 {
        flags.push(format!("-O{}", config.optimization_level.min(3)));
    }

    if let Some(resource_dir) = &config.resource_dir {
        flags.push(format!("-I{}", resource_dir.join("include").display()));
        flags.push(format!("-L{}", resource_dir.join("lib").display()));
    }

    for include in &config.include_dirs {
        flags.push(format!("-I{}", include));
    }
    for lib_dir in &config.library_dirs {
        flags.push(format!("-L{}", lib_dir));
    }
    for define in &config.define_macros {
        flags.push(format!("-D{}", define));
    }

    flags
}

/// Platform-default shared library file name for a bare library name.
pub fn default_shared_lib_name(lib: &str) -> String {
    if cfg!(target_os = "macos") {
        format!("{}.dylib", lib)
    } else {
        format!("lib{}.so", lib)
    }
}

/// Compile one C++ source file to a relocatable object.
pub fn compile_object(
    toolchain: &Path,
    flags: &[String],
    source: &Path,
    object: &Path,
) -> Result<(), JitError> {
    let output = Command::new(toolchain)
        .args(flags)
        .arg("-c")
        .arg(source)
        .arg("-o")
        .arg(object)
        .output()
        .map_err(|e| JitError::Toolchain(format!("failed to spawn toolchain: {}", e)))?;

    if !output.status.success() {
        return Err(JitError::Toolchain(
            String::from_utf8_lossy(&output.stderr).into_owned(),
        ));
    }
    Ok(())
}

/// Link inputs (sources or objects) into a loadable shared image.
pub fn link_shared(
    toolchain: &Path,
    flags: &[String],
    inputs: &[&Path],
    output: &Path,
) -> Result<(), JitError> {
    let result = Command::new(toolchain)
        .args(flags)
        .arg("-shared")
        .args(inputs)
        .arg("-o")
        .arg(output)
        .output()
        .map_err(|e| JitError::Toolchain(format!("failed to spawn toolchain: {}", e)))?;

    if !result.status.success() {
        return Err(JitError::Toolchain(
            String::from_utf8_lossy(&result.stderr).into_owned(),
        ));
    }
    Ok(())
}
