//! Abstract Syntax Tree definitions

mod expr;
mod span;
mod stmt;
mod types;

pub use expr::*;
pub use span::*;
pub use stmt::*;
pub use types::*;

use serde::{Deserialize, Serialize};

/// A program is the set of packages loaded for one verification run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Program {
    pub packages: Vec<Package>,
}

/// A package: one import path, one package clause, one or more files
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Package {
    /// Import path (`"bar"`); the entry package uses its own name
    pub path: String,
    /// Name from the package clause
    pub name: String,
    pub files: Vec<SourceFile>,
}

impl Package {
    /// Group parsed files into a package keyed by `path`
    pub fn new(path: impl Into<String>, files: Vec<SourceFile>) -> Self {
        let path = path.into();
        let name = files
            .first()
            .map(|f| f.package.node.clone())
            .unwrap_or_else(|| path.clone());
        Self { path, name, files }
    }
}

/// A parsed source file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceFile {
    pub name: String,
    pub package: Spanned<String>,
    pub imports: Vec<Import>,
    pub items: Vec<Item>,
    #[serde(skip)]
    pub lines: LineIndex,
}

/// `import alias "path"`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Import {
    pub alias: ImportAlias,
    pub path: Spanned<String>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ImportAlias {
    /// `import "p"`: bound under the imported package's own name
    Implicit,
    /// `import a "p"`
    Named(Spanned<String>),
    /// `import . "p"`
    Dot,
    /// `import _ "p"`
    Blank,
}

/// Top-level item
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Item {
    Struct(StructDef),
    Func(FuncDef),
}

impl Item {
    pub fn name(&self) -> &Spanned<String> {
        match self {
            Item::Struct(def) => &def.name,
            Item::Func(def) => &def.name,
        }
    }
}

/// Go visibility: exported iff the first letter is upper case
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Visibility {
    Exported,
    Package,
}

impl Visibility {
    pub fn of(name: &str) -> Self {
        if name.chars().next().is_some_and(|c| c.is_uppercase()) {
            Visibility::Exported
        } else {
            Visibility::Package
        }
    }
}

/// `type Name struct { ... }`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructDef {
    pub name: Spanned<String>,
    pub fields: Vec<FieldDef>,
    pub span: Span,
}

/// Struct field
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: Spanned<String>,
    pub ty: Spanned<TypeExpr>,
    pub ghost: bool,
}

/// Function or method definition together with its specification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FuncDef {
    pub name: Spanned<String>,
    pub receiver: Option<Receiver>,
    pub params: Vec<Param>,
    pub results: Vec<Param>,
    pub spec: SpecClauses,
    /// `None` for abstract functions
    pub body: Option<Block>,
    pub ghost: bool,
    pub pure: bool,
    pub span: Span,
}

/// `(r *Rectangle)`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Receiver {
    pub name: Spanned<String>,
    pub ty: Spanned<TypeExpr>,
}

/// Function parameter or result; results may be unnamed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Param {
    pub name: Option<Spanned<String>>,
    pub ty: Spanned<TypeExpr>,
    pub ghost: bool,
}

/// `requires` / `ensures` / `preserves` clauses, in source order
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpecClauses {
    pub requires: Vec<Spanned<Expr>>,
    pub ensures: Vec<Spanned<Expr>>,
    pub preserves: Vec<Spanned<Expr>>,
}

impl SpecClauses {
    pub fn is_empty(&self) -> bool {
        self.requires.is_empty() && self.ensures.is_empty() && self.preserves.is_empty()
    }
}
