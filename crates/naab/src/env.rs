//! Lexically nested scopes.
//!
//! An [`Env`] is a shared handle to one scope frame. `get`/`set` walk the
//! parent chain; `define` always writes to the current frame. A scope that
//! doubles as a module namespace additionally carries export tables.

use std::{cell::RefCell, rc::Rc};

use ahash::AHashMap;
use indexmap::IndexMap;

use crate::{
    ast::EnumDecl,
    errors::{RunError, RunResult},
    suggest::suggestion_suffix,
    value::Value,
};

/// Export tables for a module-root scope.
#[derive(Debug, Default, Clone)]
pub struct Exports {
    pub functions: Vec<String>,
    pub variables: Vec<String>,
    pub structs: Vec<String>,
    pub enums: Vec<String>,
    pub default: Option<Value>,
}

struct Scope {
    bindings: IndexMap<String, Value>,
    enums: AHashMap<String, Rc<EnumDecl>>,
    parent: Option<Env>,
    exports: Option<Exports>,
}

#[derive(Clone)]
pub struct Env(Rc<RefCell<Scope>>);

impl Env {
    pub fn new() -> Self {
        Self(Rc::new(RefCell::new(Scope {
            bindings: IndexMap::new(),
            enums: AHashMap::new(),
            parent: None,
            exports: None,
        })))
    }

    /// A fresh frame whose parent is `self`.
    pub fn child(&self) -> Self {
        Self(Rc::new(RefCell::new(Scope {
            bindings: IndexMap::new(),
            enums: AHashMap::new(),
            parent: Some(self.clone()),
            exports: None,
        })))
    }

    /// Marks this scope as a module root with empty export tables.
    pub fn enable_exports(&self) {
        let mut scope = self.0.borrow_mut();
        if scope.exports.is_none() {
            scope.exports = Some(Exports::default());
        }
    }

    pub fn with_exports<R>(&self, f: impl FnOnce(&mut Exports) -> R) -> Option<R> {
        self.0.borrow_mut().exports.as_mut().map(f)
    }

    pub fn exports(&self) -> Option<Exports> {
        self.0.borrow().exports.clone()
    }

    /// Defines or overwrites a binding in the current frame.
    pub fn define(&self, name: &str, value: Value) {
        self.0.borrow_mut().bindings.insert(name.to_owned(), value);
    }

    pub fn has(&self, name: &str) -> bool {
        let scope = self.0.borrow();
        if scope.bindings.contains_key(name) {
            return true;
        }
        match &scope.parent {
            Some(parent) => parent.has(name),
            None => false,
        }
    }

    /// Looks a name up through the scope chain. Failures carry a suggestion
    /// drawn from all visible names.
    pub fn get(&self, name: &str) -> RunResult<Value> {
        if let Some(value) = self.lookup(name) {
            return Ok(value);
        }
        let names = self.all_names();
        Err(RunError::reference(format!(
            "Undefined variable '{name}'{}",
            suggestion_suffix(name, names.iter().map(String::as_str))
        )))
    }

    pub fn lookup(&self, name: &str) -> Option<Value> {
        let scope = self.0.borrow();
        if let Some(value) = scope.bindings.get(name) {
            return Some(value.clone());
        }
        scope.parent.as_ref().and_then(|parent| parent.lookup(name))
    }

    /// Reassigns an existing binding, walking the chain to the frame that
    /// holds it.
    pub fn set(&self, name: &str, value: Value) -> RunResult<()> {
        if self.try_set(name, &value) {
            return Ok(());
        }
        let names = self.all_names();
        Err(RunError::reference(format!(
            "Undefined variable '{name}'{}",
            suggestion_suffix(name, names.iter().map(String::as_str))
        )))
    }

    fn try_set(&self, name: &str, value: &Value) -> bool {
        let mut scope = self.0.borrow_mut();
        if let Some(slot) = scope.bindings.get_mut(name) {
            *slot = value.clone();
            return true;
        }
        let parent = scope.parent.clone();
        drop(scope);
        match parent {
            Some(parent) => parent.try_set(name, value),
            None => false,
        }
    }

    /// All names visible from this scope, innermost first.
    pub fn all_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        let mut current = Some(self.clone());
        while let Some(env) = current {
            let scope = env.0.borrow();
            for name in scope.bindings.keys() {
                if !names.contains(name) {
                    names.push(name.clone());
                }
            }
            current = scope.parent.clone();
        }
        names
    }

    /// Registers an enum declaration so member expressions can resolve
    /// `Enum.Variant`.
    pub fn register_enum(&self, decl: Rc<EnumDecl>) {
        self.0
            .borrow_mut()
            .enums
            .insert(decl.name.clone(), decl);
    }

    pub fn lookup_enum(&self, name: &str) -> Option<Rc<EnumDecl>> {
        let scope = self.0.borrow();
        if let Some(decl) = scope.enums.get(name) {
            return Some(Rc::clone(decl));
        }
        scope
            .parent
            .as_ref()
            .and_then(|parent| parent.lookup_enum(name))
    }

    /// Stable identity of this frame, used by the collector's visited set.
    pub fn scope_ptr(&self) -> usize {
        Rc::as_ptr(&self.0) as usize
    }

    pub fn parent(&self) -> Option<Env> {
        self.0.borrow().parent.clone()
    }

    /// Visits every binding in this frame (not parents), plus the export
    /// default if present. Used as a GC root walk.
    pub fn for_each_binding(&self, f: &mut dyn FnMut(&Value)) {
        let scope = self.0.borrow();
        for value in scope.bindings.values() {
            f(value);
        }
        if let Some(exports) = &scope.exports {
            if let Some(default) = &exports.default {
                f(default);
            }
        }
    }

    /// Snapshot of the bindings in this single frame.
    pub fn local_bindings(&self) -> Vec<(String, Value)> {
        self.0
            .borrow()
            .bindings
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

impl Default for Env {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn define_shadows_parent_and_set_walks_chain() {
        let root = Env::new();
        root.define("x", Value::Int(1));
        let child = root.child();
        assert_eq!(child.get("x").unwrap().to_int(), 1);

        child.define("x", Value::Int(2));
        assert_eq!(child.get("x").unwrap().to_int(), 2);
        assert_eq!(root.get("x").unwrap().to_int(), 1);

        let grandchild = child.child();
        grandchild.set("x", Value::Int(3)).unwrap();
        assert_eq!(child.get("x").unwrap().to_int(), 3);
        assert_eq!(root.get("x").unwrap().to_int(), 1);
    }

    #[test]
    fn undefined_variable_suggests_close_name() {
        let env = Env::new();
        env.define("counter", Value::Int(0));
        let err = env.get("countre").unwrap_err();
        assert!(err.message.contains("Undefined variable 'countre'"));
        assert!(err.message.contains("did you mean 'counter'?"));
    }

    #[test]
    fn set_on_missing_name_fails() {
        let env = Env::new();
        assert!(env.set("nope", Value::Null).is_err());
    }
}
