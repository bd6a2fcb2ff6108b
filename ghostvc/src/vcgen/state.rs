//! Symbolic state of one execution path

use std::collections::{BTreeMap, BTreeSet};

use crate::logic::Term;
use crate::resolver::LocalId;
use crate::symbols::DeclId;

/// Identity of a heap object (struct value or pointee)
pub type ObjId = usize;

/// A heap location: object plus field name
pub type Location = (ObjId, String);

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Scalar(Term),
    /// Struct value or pointer, both denote an object
    Ref(ObjId),
    Tuple(Vec<Value>),
    Unit,
}

impl Value {
    pub fn as_term(&self) -> Option<&Term> {
        match self {
            Value::Scalar(t) => Some(t),
            _ => None,
        }
    }

    /// Results of a call, spread when there are several
    pub fn spread(self) -> Vec<Value> {
        match self {
            Value::Tuple(items) => items,
            Value::Unit => Vec::new(),
            other => vec![other],
        }
    }

    pub fn gather(mut items: Vec<Value>) -> Value {
        match items.len() {
            0 => Value::Unit,
            1 => items.pop().unwrap_or(Value::Unit),
            _ => Value::Tuple(items),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Object {
    /// Source-like name used for fresh field values (`r`, `Rectangle{..}`)
    pub name: String,
    /// Struct declaration
    pub owner: DeclId,
}

/// Field cells and the permissions currently held
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Heap {
    cells: BTreeMap<Location, Value>,
    perms: BTreeSet<Location>,
}

impl Heap {
    pub fn cell(&self, loc: &Location) -> Option<&Value> {
        self.cells.get(loc)
    }

    pub fn write(&mut self, loc: Location, value: Value) {
        self.cells.insert(loc, value);
    }

    pub fn holds(&self, loc: &Location) -> bool {
        self.perms.contains(loc)
    }

    pub fn grant(&mut self, loc: Location) {
        self.perms.insert(loc);
    }

    /// Give up a permission; the caller havocs the cell
    pub fn revoke(&mut self, loc: &Location) -> bool {
        self.perms.remove(loc)
    }

    pub fn permissions(&self) -> impl Iterator<Item = &Location> {
        self.perms.iter()
    }
}

/// Locals, heap and path condition of one path
#[derive(Debug, Clone, Default)]
pub struct State {
    pub locals: BTreeMap<LocalId, Value>,
    pub heap: Heap,
    pub path: Vec<Term>,
}

/// Fresh symbol names: the first use of a base name keeps it, later uses
/// get an internal `!n` suffix
#[derive(Debug, Default)]
pub struct Names {
    used: BTreeMap<String, usize>,
}

impl Names {
    pub fn fresh(&mut self, base: &str) -> String {
        let count = self.used.entry(base.to_string()).or_insert(0);
        let name = if *count == 0 { base.to_string() } else { format!("{base}!{count}") };
        *count += 1;
        name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::Sort;

    #[test]
    fn test_fresh_names_keep_first_use() {
        let mut names = Names::default();
        assert_eq!(names.fresh("x"), "x");
        assert_eq!(names.fresh("x"), "x!1");
        assert_eq!(names.fresh("r.Width"), "r.Width");
        assert_eq!(names.fresh("x"), "x!2");
    }

    #[test]
    fn test_spread_and_gather() {
        let x = Value::Scalar(Term::var("x", Sort::Int));
        assert_eq!(Value::gather(vec![x.clone()]), x);
        assert_eq!(Value::gather(Vec::new()), Value::Unit);
        assert_eq!(Value::Tuple(vec![x.clone(), Value::Ref(0)]).spread().len(), 2);
        assert!(Value::Unit.spread().is_empty());
    }

    #[test]
    fn test_permissions_are_per_location() {
        let mut heap = Heap::default();
        let width = (0, "Width".to_string());
        heap.grant(width.clone());
        assert!(heap.holds(&width));
        assert!(!heap.holds(&(1, "Width".to_string())));
        assert!(heap.revoke(&width));
        assert!(!heap.revoke(&width));
    }
}
