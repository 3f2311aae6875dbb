//! Namespaces and vars.
//!
//! Namespaces own interned vars plus alias tables. Each table carries its
//! own lock so readers of one table never contend with writers of another.

use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::runtime::value::{nil, ObjRef};

/// A mutable global binding.
pub struct Var {
    ns: String,
    name: String,
    root: RwLock<Option<ObjRef>>,
    meta: RwLock<Option<ObjRef>>,
}

/// Shared var handle.
pub type VarRef = Arc<Var>;

impl Var {
    fn new(ns: &str, name: &str) -> VarRef {
        Arc::new(Self {
            ns: ns.to_string(),
            name: name.to_string(),
            root: RwLock::new(None),
            meta: RwLock::new(None),
        })
    }

    /// Namespace name this var is interned in.
    pub fn ns(&self) -> &str {
        &self.ns
    }

    /// Var name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// `ns/name`.
    pub fn qualified_name(&self) -> String {
        format!("{}/{}", self.ns, self.name)
    }

    /// Current root value; nil when unbound.
    pub fn deref(&self) -> ObjRef {
        self.root.read().unwrap_or_else(nil)
    }

    /// Whether a root value has been bound.
    pub fn is_bound(&self) -> bool {
        self.root.read().is_some()
    }

    /// Replace the root value.
    pub fn bind_root(&self, value: ObjRef) {
        *self.root.write() = Some(value);
    }

    /// Var metadata map, if any.
    pub fn meta(&self) -> Option<ObjRef> {
        *self.meta.read()
    }

    /// Replace the metadata map.
    pub fn set_meta(&self, meta: ObjRef) {
        *self.meta.write() = Some(meta);
    }
}

impl std::fmt::Debug for Var {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#'{}", self.qualified_name())
    }
}

/// A namespace: named collection of vars plus alias tables.
pub struct Namespace {
    name: String,
    vars: RwLock<FxHashMap<String, VarRef>>,
    aliases: RwLock<FxHashMap<String, String>>,
    native_aliases: RwLock<FxHashMap<String, String>>,
}

/// Shared namespace handle.
pub type NamespaceRef = Arc<Namespace>;

impl Namespace {
    /// Fresh namespace with the given name.
    pub fn new(name: &str) -> NamespaceRef {
        Arc::new(Self {
            name: name.to_string(),
            vars: RwLock::new(FxHashMap::default()),
            aliases: RwLock::new(FxHashMap::default()),
            native_aliases: RwLock::new(FxHashMap::default()),
        })
    }

    /// Namespace name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Find an interned var.
    pub fn find_var(&self, name: &str) -> Option<VarRef> {
        self.vars.read().get(name).cloned()
    }

    /// Intern a var, creating it unbound when absent.
    pub fn intern_var(&self, name: &str) -> VarRef {
        if let Some(existing) = self.find_var(name) {
            return existing;
        }
        let mut vars = self.vars.write();
        vars.entry(name.to_string())
            .or_insert_with(|| Var::new(&self.name, name))
            .clone()
    }

    /// Snapshot of interned vars, sorted by name.
    pub fn vars_snapshot(&self) -> Vec<(String, VarRef)> {
        let mut entries: Vec<(String, VarRef)> = self
            .vars
            .read()
            .iter()
            .map(|(name, var)| (name.clone(), var.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    /// Register a namespace alias.
    pub fn add_alias(&self, alias: &str, target_ns: &str) {
        self.aliases
            .write()
            .insert(alias.to_string(), target_ns.to_string());
    }

    /// Resolve a namespace alias.
    pub fn resolve_alias(&self, alias: &str) -> Option<String> {
        self.aliases.read().get(alias).cloned()
    }

    /// Register a native-header alias.
    pub fn add_native_alias(&self, alias: &str, header: &str) {
        self.native_aliases
            .write()
            .insert(alias.to_string(), header.to_string());
    }

    /// Resolve a native-header alias.
    pub fn resolve_native_alias(&self, alias: &str) -> Option<String> {
        self.native_aliases.read().get(alias).cloned()
    }
}

impl std::fmt::Debug for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#namespace[{}]", self.name)
    }
}
