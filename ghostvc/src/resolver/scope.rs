//! Lexical scope stack for local bindings
//!
//! A `Vec<HashMap>` of scopes; the innermost scope is searched first so
//! inner declarations shadow outer ones.

use std::collections::HashMap;

use super::LocalBinding;

#[derive(Debug, Clone)]
pub struct ScopeStack {
    /// Index 0 holds receiver, parameters and results
    scopes: Vec<HashMap<String, LocalBinding>>,
}

impl ScopeStack {
    pub fn new() -> Self {
        ScopeStack {
            scopes: vec![HashMap::new()],
        }
    }

    pub fn push_scope(&mut self) -> usize {
        self.scopes.push(HashMap::new());
        self.scopes.len() - 1
    }

    /// Pop the innermost scope; the function scope is never popped.
    pub fn pop_scope(&mut self) {
        if self.scopes.len() > 1 {
            self.scopes.pop();
        }
    }

    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    /// Define a local in the innermost scope, shadowing outer ones.
    pub fn define(&mut self, binding: LocalBinding) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(binding.name.clone(), binding);
        }
    }

    pub fn get(&self, name: &str) -> Option<&LocalBinding> {
        self.scopes.iter().rev().find_map(|scope| scope.get(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Every visible name, innermost first, for typo hints
    pub fn visible_names(&self) -> Vec<&str> {
        self.scopes
            .iter()
            .rev()
            .flat_map(|scope| scope.keys().map(String::as_str))
            .collect()
    }
}

impl Default for ScopeStack {
    fn default() -> Self {
        Self::new()
    }
}
