//! Incremental compile registry.
//!
//! In-memory map from qualified symbol to the fingerprint and var of its
//! last compiled definition. Consulted at analyzer-output time: a hit means
//! the def is not re-emitted at all. Invalidation happens on explicit REPL
//! redefinition and on namespace reload.

use rustc_hash::FxHashMap;

use crate::runtime::ns::VarRef;

/// Information about one compiled def.
#[derive(Clone)]
pub struct CompiledDef {
    /// Fingerprint of the def's body.
    pub body_hash: u64,
    /// Var the runtime resolves the symbol through.
    pub var: VarRef,
}

/// Registry statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Live entries.
    pub entries: usize,
    /// Hits recorded.
    pub hits: usize,
    /// Misses recorded.
    pub misses: usize,
}

/// Map of qualified symbol to compiled-def info.
#[derive(Default)]
pub struct IncrementalRegistry {
    defs: FxHashMap<(String, String), CompiledDef>,
    hits: usize,
    misses: usize,
}

impl IncrementalRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a def must be recompiled: unknown symbol or changed body.
    pub fn needs_recompile(&self, ns: &str, name: &str, body_hash: u64) -> bool {
        match self.defs.get(&(ns.to_string(), name.to_string())) {
            Some(def) => def.body_hash != body_hash,
            None => true,
        }
    }

    /// Store a compiled def.
    pub fn store(&mut self, ns: &str, name: &str, body_hash: u64, var: VarRef) {
        self.defs
            .insert((ns.to_string(), name.to_string()), CompiledDef { body_hash, var });
    }

    /// Cached var for a matching fingerprint; records hit/miss.
    pub fn get(&mut self, ns: &str, name: &str, body_hash: u64) -> Option<VarRef> {
        match self.defs.get(&(ns.to_string(), name.to_string())) {
            Some(def) if def.body_hash == body_hash => {
                self.hits += 1;
                Some(def.var.clone())
            }
            _ => {
                self.misses += 1;
                None
            }
        }
    }

    /// Drop one def (REPL redefinition).
    pub fn invalidate(&mut self, ns: &str, name: &str) {
        self.defs.remove(&(ns.to_string(), name.to_string()));
    }

    /// Drop every def in a namespace (namespace reload).
    pub fn invalidate_namespace(&mut self, ns: &str) {
        self.defs.retain(|(def_ns, _), _| def_ns != ns);
    }

    /// Drop everything.
    pub fn clear(&mut self) {
        self.defs.clear();
    }

    /// Statistics snapshot.
    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            entries: self.defs.len(),
            hits: self.hits,
            misses: self.misses,
        }
    }
}
