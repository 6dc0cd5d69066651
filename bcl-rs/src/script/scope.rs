//! Two-level variable namespace.
//!
//! BCL has exactly two places a variable can live: the global table, or the
//! local table of the innermost procedure call.  There is no lexical chain.
//! Inside a procedure, names declared with `GLOBAL` are routed to the global
//! table; for array elements the declaration may cover the whole container
//! (`name(` prefix).
//!
//! Array elements are stored under flat keys that keep the `container(index)`
//! split explicit, see [`VarKey`].

use std::collections::{HashMap, HashSet};

use super::error::ScriptError;
use super::value::Value;

// ── VarKey ────────────────────────────────────────────────────────────────────

/// A case-folded variable name, split into its container and optional array
/// index.  `arr(1)` and `ARR(1)` are the same key; `arr` is a distinct scalar.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VarKey {
    container: String,
    index: Option<String>,
}

impl VarKey {
    pub fn parse(name: &str) -> Self {
        match name.split_once('(') {
            Some((container, rest)) => {
                let index = rest.strip_suffix(')').unwrap_or(rest);
                VarKey {
                    container: container.to_ascii_lowercase(),
                    index: Some(index.to_ascii_lowercase()),
                }
            }
            None => VarKey {
                container: name.to_ascii_lowercase(),
                index: None,
            },
        }
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    pub fn is_element(&self) -> bool {
        self.index.is_some()
    }
}

impl std::fmt::Display for VarKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.index {
            Some(idx) => write!(f, "{}({})", self.container, idx),
            None => f.write_str(&self.container),
        }
    }
}

// ── Scope ─────────────────────────────────────────────────────────────────────

/// One procedure call's local namespace.
#[derive(Debug, Default)]
pub struct Scope {
    vars: HashMap<VarKey, Value>,
    /// Exact names declared global (folded).
    global_names: HashSet<String>,
    /// Array containers declared global; matches every `container(...)` key.
    global_prefixes: HashSet<String>,
    /// Procedure that opened this scope, named when the stack overflows.
    owner: String,
}

impl Scope {
    fn new(owner: &str) -> Self {
        Scope {
            owner: owner.to_owned(),
            ..Scope::default()
        }
    }

    fn routes_global(&self, key: &VarKey) -> bool {
        if self.global_names.contains(&key.to_string()) {
            return true;
        }
        key.is_element() && self.global_prefixes.contains(key.container())
    }

    fn declare_global(&mut self, name: &str) {
        let key = VarKey::parse(name);
        self.global_names.insert(key.to_string());
        if !key.is_element() {
            self.global_prefixes.insert(key.container().to_owned());
        }
    }
}

// ── ScopeStack ────────────────────────────────────────────────────────────────

/// The global table plus the stack of procedure scopes.
#[derive(Debug)]
pub struct ScopeStack {
    globals: HashMap<VarKey, Value>,
    frames: Vec<Scope>,
    max_depth: usize,
}

impl Default for ScopeStack {
    fn default() -> Self {
        ScopeStack::new(crate::config::DEFAULT_MAX_SCOPE_DEPTH)
    }
}

impl ScopeStack {
    pub fn new(max_depth: usize) -> Self {
        ScopeStack {
            globals: HashMap::new(),
            frames: Vec::new(),
            max_depth,
        }
    }

    /// Number of local scopes currently open (0 at top level).
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Open a fresh local scope for a call to `owner`.
    pub fn push(&mut self, owner: &str) -> Result<(), ScriptError> {
        if self.frames.len() >= self.max_depth {
            let caller = self.frames.last().map_or("", |s| s.owner.as_str());
            tracing::warn!(proc = owner, caller, depth = self.frames.len(), "scope stack full");
            return Err(ScriptError::ScopeDepth);
        }
        self.frames.push(Scope::new(owner));
        Ok(())
    }

    /// Discard the innermost local scope.
    pub fn pop(&mut self) {
        self.frames.pop();
    }

    /// Mark `name` as global in the current scope.  No-op at top level.
    pub fn declare_global(&mut self, name: &str) {
        if let Some(scope) = self.frames.last_mut() {
            scope.declare_global(name);
        }
    }

    /// Table that writes for `key` go to.
    fn table_for_write(&mut self, key: &VarKey) -> &mut HashMap<VarKey, Value> {
        match self.frames.last_mut() {
            Some(scope) if !scope.routes_global(key) => &mut scope.vars,
            _ => &mut self.globals,
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        let key = VarKey::parse(name);
        if let Some(scope) = self.frames.last() {
            if !scope.routes_global(&key) {
                if let Some(v) = scope.vars.get(&key) {
                    return Some(v);
                }
            }
        }
        self.globals.get(&key)
    }

    pub fn set(&mut self, name: &str, value: Value) {
        let key = VarKey::parse(name);
        self.table_for_write(&key).insert(key, value);
    }

    /// Remove a variable: the local binding if there is one, else the global.
    /// Returns `true` if something was removed.
    pub fn unset(&mut self, name: &str) -> bool {
        let key = VarKey::parse(name);
        if let Some(scope) = self.frames.last_mut() {
            if !scope.routes_global(&key) && scope.vars.remove(&key).is_some() {
                return true;
            }
        }
        self.globals.remove(&key).is_some()
    }

    pub fn exists(&self, name: &str) -> bool {
        self.get(name).is_some()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Value {
        Value::from(s)
    }

    #[test]
    fn key_parsing_splits_container_and_index() {
        let k = VarKey::parse("Arr(Key)");
        assert_eq!(k.container(), "arr");
        assert!(k.is_element());
        assert_eq!(k.to_string(), "arr(key)");
        assert!(!VarKey::parse("plain").is_element());
    }

    #[test]
    fn names_are_case_insensitive() {
        let mut s = ScopeStack::default();
        s.set("Count", v("3"));
        assert_eq!(s.get("COUNT"), Some(&v("3")));
        assert!(s.exists("count"));
    }

    #[test]
    fn locals_shadow_and_vanish_on_pop() {
        let mut s = ScopeStack::default();
        s.set("x", v("global"));
        s.push("p").unwrap();
        s.set("x", v("local"));
        assert_eq!(s.get("x"), Some(&v("local")));
        s.pop();
        assert_eq!(s.get("x"), Some(&v("global")));
    }

    #[test]
    fn reads_fall_back_to_globals() {
        let mut s = ScopeStack::default();
        s.set("shared", v("1"));
        s.push("p").unwrap();
        assert_eq!(s.get("shared"), Some(&v("1")));
        s.set("shared", v("2"));
        s.pop();
        assert_eq!(s.get("shared"), Some(&v("1")));
    }

    #[test]
    fn global_declaration_routes_writes() {
        let mut s = ScopeStack::default();
        s.push("p").unwrap();
        s.declare_global("total");
        s.set("total", v("10"));
        s.pop();
        assert_eq!(s.get("total"), Some(&v("10")));
    }

    #[test]
    fn global_container_covers_elements() {
        let mut s = ScopeStack::default();
        s.push("p").unwrap();
        s.declare_global("cfg");
        s.set("cfg(host)", v("localhost"));
        s.set("other(1)", v("local"));
        s.pop();
        assert_eq!(s.get("cfg(HOST)"), Some(&v("localhost")));
        assert_eq!(s.get("other(1)"), None);
    }

    #[test]
    fn unset_prefers_local_binding() {
        let mut s = ScopeStack::default();
        s.set("x", v("g"));
        s.push("p").unwrap();
        s.set("x", v("l"));
        assert!(s.unset("x"));
        assert_eq!(s.get("x"), Some(&v("g")));
        assert!(s.unset("x"));
        assert!(!s.exists("x"));
        assert!(!s.unset("x"));
    }

    #[test]
    fn declare_global_at_top_level_is_a_no_op() {
        let mut s = ScopeStack::default();
        s.declare_global("x");
        s.set("x", v("1"));
        s.push("p").unwrap();
        s.set("x", v("2"));
        s.pop();
        assert_eq!(s.get("x"), Some(&v("1")));
    }

    #[test]
    fn push_fails_past_max_depth() {
        let mut s = ScopeStack::new(2);
        s.push("a").unwrap();
        s.push("b").unwrap();
        assert_eq!(s.push("c"), Err(ScriptError::ScopeDepth));
        assert_eq!(s.depth(), 2);
        s.pop();
        assert_eq!(s.push("c"), Ok(()));
    }
}
