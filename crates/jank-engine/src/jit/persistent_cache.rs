//! Persistent JIT cache.
//!
//! Content-addressed store for compiled defs, keyed by the expression
//! fingerprint and pinned to the binary version so a rebuilt runtime never
//! loads ABI-skewed objects. Each entry is four co-located files:
//!
//! ```text
//! <user-cache>/jank/<binary-version>/jit_cache/
//! ├── <hash>.cpp    # generated C++ source
//! ├── <hash>.meta   # two lines: qualified name, unique symbol
//! ├── <hash>.expr   # instantiation expression for the factory body
//! └── <hash>.o      # compiled relocatable object (produced on demand)
//! ```
//!
//! An entry is complete when `.cpp` and `.meta` exist; a reader that finds
//! source but no object recompiles. If the cache directory cannot be
//! created the cache degrades to disabled and every operation becomes a
//! no-op rather than failing eval.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::{debug, warn};

use crate::config::Config;
use crate::jit::toolchain::{assemble_compile_flags, compile_object, find_toolchain};

/// One loaded cache entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheEntry {
    /// Qualified name of the cached def.
    pub qualified_name: String,
    /// Unique symbol of the generated function.
    pub unique_name: String,
    /// Generated C++ source.
    pub cpp_source: String,
    /// Instantiation expression; empty for entries written before the
    /// expression was recorded.
    pub expression_str: String,
}

/// Cache statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Complete entries on disk.
    pub entries: usize,
    /// Disk hits this process.
    pub disk_hits: usize,
    /// Disk misses this process.
    pub disk_misses: usize,
}

/// On-disk content-addressed cache of compiled defs.
pub struct PersistentCache {
    // None when the directory could not be created; all operations no-op.
    cache_dir: Option<PathBuf>,
    compile_flags: Vec<String>,
    disk_hits: AtomicUsize,
    disk_misses: AtomicUsize,
}

/// 16-digit lowercase zero-padded hex, locale-independent.
pub fn format_hash(hash: u64) -> String {
    format!("{:016x}", hash)
}

impl PersistentCache {
    /// Open the cache for this binary version under the user cache
    /// directory.
    pub fn open(binary_version: &str, config: &Config) -> Self {
        let cache_dir = dirs::cache_dir()
            .map(|base| base.join("jank").join(binary_version).join("jit_cache"));
        Self::open_dir(cache_dir, config)
    }

    /// Open the cache rooted at an explicit directory.
    pub fn open_at(dir: impl Into<PathBuf>, config: &Config) -> Self {
        Self::open_dir(Some(dir.into()), config)
    }

    fn open_dir(cache_dir: Option<PathBuf>, config: &Config) -> Self {
        let cache_dir = cache_dir.and_then(|dir| match fs::create_dir_all(&dir) {
            Ok(()) => Some(dir),
            Err(e) => {
                warn!(error = %e, dir = %dir.display(), "JIT cache disabled");
                None
            }
        });
        Self {
            cache_dir,
            compile_flags: assemble_compile_flags(config),
            disk_hits: AtomicUsize::new(0),
            disk_misses: AtomicUsize::new(0),
        }
    }

    /// Whether the cache is usable.
    pub fn enabled(&self) -> bool {
        self.cache_dir.is_some()
    }

    /// The cache directory, when enabled.
    pub fn cache_dir(&self) -> Option<&Path> {
        self.cache_dir.as_deref()
    }

    fn entry_path(&self, hash: u64, ext: &str) -> Option<PathBuf> {
        self.cache_dir
            .as_ref()
            .map(|dir| dir.join(format!("{}.{}", format_hash(hash), ext)))
    }

    /// Path of the source file for `hash`.
    pub fn source_path(&self, hash: u64) -> Option<PathBuf> {
        self.entry_path(hash, "cpp")
    }

    /// Path of the expression file for `hash`.
    pub fn expression_path(&self, hash: u64) -> Option<PathBuf> {
        self.entry_path(hash, "expr")
    }

    /// Path of the object file for `hash`.
    pub fn object_path(&self, hash: u64) -> Option<PathBuf> {
        self.entry_path(hash, "o")
    }

    /// Factory function synthesized into the object for `hash`.
    pub fn factory_name(hash: u64) -> String {
        format!("jank_pcache_factory_{}", format_hash(hash))
    }

    /// Whether a complete source entry (`.cpp` and `.meta`) exists.
    pub fn has_cached_source(&self, hash: u64) -> bool {
        match (self.entry_path(hash, "cpp"), self.entry_path(hash, "meta")) {
            (Some(cpp), Some(meta)) => cpp.exists() && meta.exists(),
            _ => false,
        }
    }

    /// Whether a compiled object exists.
    pub fn has_compiled_object(&self, hash: u64) -> bool {
        self.entry_path(hash, "o").is_some_and(|path| path.exists())
    }

    /// Write the source and metadata files for an entry.
    ///
    /// The metadata is written after the source so a crashed writer can
    /// never leave `has_cached_source` true with missing source; stale
    /// object files are tolerated because readers recompile when in doubt.
    pub fn save_source(&self, hash: u64, cpp_source: &str, qualified_name: &str, unique_name: &str) {
        let (Some(cpp_path), Some(meta_path)) =
            (self.entry_path(hash, "cpp"), self.entry_path(hash, "meta"))
        else {
            return;
        };

        if let Err(e) = fs::write(&cpp_path, cpp_source) {
            warn!(error = %e, "failed to write cache source");
            return;
        }
        let meta = format!("{}\n{}\n", qualified_name, unique_name);
        if let Err(e) = fs::write(&meta_path, meta) {
            warn!(error = %e, "failed to write cache metadata");
        }
    }

    /// Write the instantiation expression for an entry.
    pub fn save_expression(&self, hash: u64, expression: &str) {
        let Some(expr_path) = self.entry_path(hash, "expr") else {
            return;
        };
        if let Err(e) = fs::write(&expr_path, expression) {
            warn!(error = %e, "failed to write cache expression");
        }
    }

    /// Load an entry's four fields; `None` when the entry is incomplete.
    pub fn load_entry(&self, hash: u64) -> Option<CacheEntry> {
        let cpp_path = self.entry_path(hash, "cpp")?;
        let meta_path = self.entry_path(hash, "meta")?;
        if !cpp_path.exists() || !meta_path.exists() {
            return None;
        }

        let meta = fs::read_to_string(&meta_path).ok()?;
        let mut lines = meta.lines();
        let qualified_name = lines.next().unwrap_or("").to_string();
        let unique_name = lines.next().unwrap_or("").to_string();

        let cpp_source = fs::read_to_string(&cpp_path).ok()?;

        // The expression file is optional for entries written before it
        // existed.
        let expression_str = self
            .expression_path(hash)
            .filter(|path| path.exists())
            .and_then(|path| fs::read_to_string(path).ok())
            .unwrap_or_default();

        Some(CacheEntry {
            qualified_name,
            unique_name,
            cpp_source,
            expression_str,
        })
    }

    /// Compile an entry's source to a relocatable object.
    ///
    /// Reads `.cpp` and `.expr`, appends a deterministic factory function
    /// whose body returns the recorded expression, and invokes the system
    /// toolchain with the runtime's build flags. Returns true iff the
    /// object exists afterwards.
    pub fn compile_to_object(&self, hash: u64) -> bool {
        let (Some(src_path), Some(obj_path)) =
            (self.source_path(hash), self.object_path(hash))
        else {
            return false;
        };
        if !src_path.exists() {
            return false;
        }

        let Ok(cpp_source) = fs::read_to_string(&src_path) else {
            return false;
        };
        let expression = self
            .expression_path(hash)
            .filter(|path| path.exists())
            .and_then(|path| fs::read_to_string(path).ok())
            .unwrap_or_default();

        let mut full_source = cpp_source;
        if !expression.is_empty() {
            full_source.push_str(&format!(
                "\nextern \"C\" jank::runtime::object* {}() {{\n  return {};\n}}\n",
                Self::factory_name(hash),
                expression
            ));
        }

        let Some(toolchain) = find_toolchain() else {
            return false;
        };

        let Some(temp_src) = self
            .cache_dir
            .as_ref()
            .map(|dir| dir.join(format!("{}_full.cpp", format_hash(hash))))
        else {
            return false;
        };
        if fs::write(&temp_src, &full_source).is_err() {
            return false;
        }

        let result = compile_object(&toolchain, &self.compile_flags, &temp_src, &obj_path);
        let _ = fs::remove_file(&temp_src);

        match result {
            Ok(()) => obj_path.exists(),
            Err(e) => {
                // Source referencing external types is expected to fail
                // here; the pipeline falls back to a fresh compile.
                debug!(hash = %format_hash(hash), error = %e, "cache object compile failed");
                false
            }
        }
    }

    /// Remove every entry, leaving an empty usable directory.
    pub fn clear(&self) {
        let Some(dir) = &self.cache_dir else {
            return;
        };
        let _ = fs::remove_dir_all(dir);
        let _ = fs::create_dir_all(dir);
    }

    /// Record a disk hit.
    pub fn record_disk_hit(&self) {
        self.disk_hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a disk miss.
    pub fn record_disk_miss(&self) {
        self.disk_misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Statistics snapshot; `entries` counts `.meta` files on disk.
    pub fn stats(&self) -> CacheStats {
        let entries = match &self.cache_dir {
            Some(dir) => fs::read_dir(dir)
                .map(|read| {
                    read.filter_map(Result::ok)
                        .filter(|entry| {
                            entry.path().extension().is_some_and(|ext| ext == "meta")
                        })
                        .count()
                })
                .unwrap_or(0),
            None => 0,
        };
        CacheStats {
            entries,
            disk_hits: self.disk_hits.load(Ordering::Relaxed),
            disk_misses: self.disk_misses.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_cache() -> (tempfile::TempDir, PersistentCache) {
        let dir = tempfile::tempdir().unwrap();
        let cache = PersistentCache::open_at(dir.path().join("jit_cache"), &Config::default());
        (dir, cache)
    }

    #[test]
    fn test_format_hash_sixteen_lower_hex() {
        assert_eq!(format_hash(0xdead_beef), "00000000deadbeef");
        assert_eq!(format_hash(u64::MAX), "ffffffffffffffff");
        assert_eq!(format_hash(0), "0000000000000000");
    }

    #[test]
    fn test_factory_name_embeds_hash() {
        assert_eq!(
            PersistentCache::factory_name(0x1234),
            "jank_pcache_factory_0000000000001234"
        );
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let (_dir, cache) = temp_cache();
        let hash = 0xabcdef;

        assert!(!cache.has_cached_source(hash));
        cache.save_source(hash, "// generated\n", "user/x", "user_x_123");
        cache.save_expression(hash, "make_fn_user_x_123()");
        assert!(cache.has_cached_source(hash));

        let entry = cache.load_entry(hash).unwrap();
        assert_eq!(entry.qualified_name, "user/x");
        assert_eq!(entry.unique_name, "user_x_123");
        assert_eq!(entry.cpp_source, "// generated\n");
        assert_eq!(entry.expression_str, "make_fn_user_x_123()");
    }

    #[test]
    fn test_entry_without_expression_loads_empty() {
        let (_dir, cache) = temp_cache();
        cache.save_source(7, "src", "user/y", "user_y_1");
        let entry = cache.load_entry(7).unwrap();
        assert_eq!(entry.expression_str, "");
    }

    #[test]
    fn test_missing_entry_is_none() {
        let (_dir, cache) = temp_cache();
        assert!(cache.load_entry(42).is_none());
        assert!(!cache.has_compiled_object(42));
    }

    #[test]
    fn test_stats_count_meta_files() {
        let (_dir, cache) = temp_cache();
        cache.save_source(1, "a", "user/a", "a_1");
        cache.save_source(2, "b", "user/b", "b_1");
        cache.record_disk_hit();
        cache.record_disk_miss();
        cache.record_disk_miss();

        let stats = cache.stats();
        assert_eq!(stats.entries, 2);
        assert_eq!(stats.disk_hits, 1);
        assert_eq!(stats.disk_misses, 2);
    }

    #[test]
    fn test_clear_leaves_empty_directory() {
        let (_dir, cache) = temp_cache();
        cache.save_source(1, "a", "user/a", "a_1");
        cache.clear();
        assert_eq!(cache.stats().entries, 0);
        assert!(cache.cache_dir().unwrap().exists());
        // Still usable after clear.
        cache.save_source(2, "b", "user/b", "b_1");
        assert!(cache.has_cached_source(2));
    }

    #[test]
    fn test_disabled_cache_is_noop() {
        // A path that cannot be created: a file in the way.
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, "x").unwrap();
        let cache = PersistentCache::open_at(blocker.join("jit_cache"), &Config::default());

        assert!(!cache.enabled());
        cache.save_source(1, "a", "user/a", "a_1");
        assert!(!cache.has_cached_source(1));
        assert!(cache.load_entry(1).is_none());
        assert!(!cache.compile_to_object(1));
        assert_eq!(cache.stats().entries, 0);
    }
}
