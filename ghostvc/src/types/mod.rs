//! Static types of resolved expressions

use serde::Serialize;

use crate::ast::CollectionKind;
use crate::symbols::{DeclId, SymbolTable};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum Ty {
    Int,
    Bool,
    Perm,
    Set(Box<Ty>),
    Multiset(Box<Ty>),
    /// Named struct type
    Struct(DeclId),
    Pointer(Box<Ty>),
    /// Result of a call with several results
    Tuple(Vec<Ty>),
    Unit,
}

impl Ty {
    /// Predeclared type names
    pub fn universe(name: &str) -> Option<Ty> {
        match name {
            "int" | "int8" | "int16" | "int32" | "int64" | "uint" | "uint8" | "uint16" | "uint32" | "uint64" => {
                Some(Ty::Int)
            }
            "bool" => Some(Ty::Bool),
            "perm" => Some(Ty::Perm),
            _ => None,
        }
    }

    pub fn collection(kind: CollectionKind, elem: Ty) -> Ty {
        match kind {
            CollectionKind::Set => Ty::Set(Box::new(elem)),
            CollectionKind::Multiset => Ty::Multiset(Box::new(elem)),
        }
    }

    /// Collection kind and element type of `set[T]` / `mset[T]`
    pub fn as_collection(&self) -> Option<(CollectionKind, &Ty)> {
        match self {
            Ty::Set(elem) => Some((CollectionKind::Set, elem)),
            Ty::Multiset(elem) => Some((CollectionKind::Multiset, elem)),
            _ => None,
        }
    }

    /// Pointer auto-dereference for selectors
    pub fn deref(&self) -> &Ty {
        match self {
            Ty::Pointer(inner) => inner,
            other => other,
        }
    }

    pub fn struct_id(&self) -> Option<DeclId> {
        match self.deref() {
            Ty::Struct(id) => Some(*id),
            _ => None,
        }
    }

    pub fn display(&self, table: &SymbolTable) -> String {
        match self {
            Ty::Int => "int".to_string(),
            Ty::Bool => "bool".to_string(),
            Ty::Perm => "perm".to_string(),
            Ty::Set(elem) => format!("set[{}]", elem.display(table)),
            Ty::Multiset(elem) => format!("mset[{}]", elem.display(table)),
            Ty::Struct(id) => table.decl(*id).name.to_string(),
            Ty::Pointer(inner) => format!("*{}", inner.display(table)),
            Ty::Tuple(items) => {
                let items: Vec<String> = items.iter().map(|t| t.display(table)).collect();
                format!("({})", items.join(", "))
            }
            Ty::Unit => "()".to_string(),
        }
    }
}
