//! Type AST nodes

use super::Spanned;
use serde::{Deserialize, Serialize};

/// Type as written in the source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TypeExpr {
    /// `int`, `bool`, `Rectangle`, `b.Rectangle`
    Named {
        package: Option<Spanned<String>>,
        name: Spanned<String>,
    },
    /// `*T`
    Pointer(Box<Spanned<TypeExpr>>),
    /// `set[T]`
    Set(Box<Spanned<TypeExpr>>),
    /// `mset[T]`
    Multiset(Box<Spanned<TypeExpr>>),
}

impl TypeExpr {
    pub fn named(name: Spanned<String>) -> Self {
        TypeExpr::Named {
            package: None,
            name,
        }
    }

    pub fn qualified(package: Spanned<String>, name: Spanned<String>) -> Self {
        TypeExpr::Named {
            package: Some(package),
            name,
        }
    }
}

impl std::fmt::Display for TypeExpr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TypeExpr::Named {
                package: Some(pkg),
                name,
            } => write!(f, "{}.{}", pkg.node, name.node),
            TypeExpr::Named {
                package: None,
                name,
            } => write!(f, "{}", name.node),
            TypeExpr::Pointer(inner) => write!(f, "*{}", inner.node),
            TypeExpr::Set(elem) => write!(f, "set[{}]", elem.node),
            TypeExpr::Multiset(elem) => write!(f, "mset[{}]", elem.node),
        }
    }
}
