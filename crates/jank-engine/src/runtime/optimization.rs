//! Runtime optimization toggles.
//!
//! Each toggle reads a `JANK_OPT_*` environment variable accepting
//! `0/1/true/false/yes/no` (case-insensitive) and defaults to enabled. The
//! flags are sampled once at first use.

use once_cell::sync::Lazy;

/// Parsed optimization toggles.
#[derive(Debug, Clone, Copy)]
pub struct OptFlags {
    /// Canonical boxed integers for the hot range.
    pub integer_cache: bool,
    /// Canonical boxed reals for common values.
    pub real_cache: bool,
    /// Honor scoped arenas on the value-allocation path.
    pub arena: bool,
    /// Unboxed primitive loop induction variables.
    pub primitive_loops: bool,
    /// Collect per-allocator statistics.
    pub allocation_stats: bool,
}

fn env_flag(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(value) => match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => true,
            "0" | "false" | "no" => false,
            _ => default,
        },
        Err(_) => default,
    }
}

static FLAGS: Lazy<OptFlags> = Lazy::new(|| OptFlags {
    integer_cache: env_flag("JANK_OPT_INTEGER_CACHE", true),
    real_cache: env_flag("JANK_OPT_REAL_CACHE", true),
    arena: env_flag("JANK_OPT_ARENA", true),
    primitive_loops: env_flag("JANK_OPT_PRIMITIVE_LOOPS", true),
    allocation_stats: env_flag("JANK_OPT_ALLOCATION_STATS", true),
});

/// The process's optimization toggles.
pub fn opt_flags() -> OptFlags {
    *FLAGS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_flag_parsing() {
        std::env::set_var("JANK_OPT_TEST_FLAG_A", "no");
        assert!(!env_flag("JANK_OPT_TEST_FLAG_A", true));
        std::env::set_var("JANK_OPT_TEST_FLAG_A", "YES");
        assert!(env_flag("JANK_OPT_TEST_FLAG_A", false));
        std::env::set_var("JANK_OPT_TEST_FLAG_A", "garbage");
        assert!(env_flag("JANK_OPT_TEST_FLAG_A", true));
        std::env::remove_var("JANK_OPT_TEST_FLAG_A");
        assert!(env_flag("JANK_OPT_TEST_FLAG_A", true));
    }
}
