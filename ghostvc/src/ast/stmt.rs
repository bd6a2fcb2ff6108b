//! Statement AST nodes

use super::{Expr, Span, Spanned, TypeExpr};
use serde::{Deserialize, Serialize};

/// A statement; `ghost` is set for statements written with the `ghost` prefix
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stmt {
    pub kind: StmtKind,
    pub ghost: bool,
    pub span: Span,
}

impl Stmt {
    pub fn new(kind: StmtKind, span: Span) -> Self {
        Self {
            kind,
            ghost: false,
            span,
        }
    }
}

/// Name introduced by a short variable declaration; `r!` marks it addressable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeclName {
    pub name: Spanned<String>,
    pub addressable: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StmtKind {
    /// `var x T = e`
    VarDecl {
        name: Spanned<String>,
        ty: Option<Spanned<TypeExpr>>,
        init: Option<Spanned<Expr>>,
    },
    /// `x, y := e1, e2`
    ShortVarDecl {
        names: Vec<DeclName>,
        values: Vec<Spanned<Expr>>,
    },
    /// `x, r.f = e1, e2`
    Assign {
        targets: Vec<Spanned<Expr>>,
        values: Vec<Spanned<Expr>>,
    },
    Assert(Spanned<Expr>),
    Assume(Spanned<Expr>),
    Return(Vec<Spanned<Expr>>),
    If {
        cond: Spanned<Expr>,
        then_block: Block,
        else_block: Option<Block>,
    },
    /// `invariant I` ... `for cond { body }`
    For {
        invariants: Vec<Spanned<Expr>>,
        cond: Option<Spanned<Expr>>,
        body: Block,
    },
    /// Expression statement (calls)
    Expr(Spanned<Expr>),
    Block(Block),
}

/// `{ stmt* }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub stmts: Vec<Stmt>,
    pub span: Span,
}

impl Block {
    pub fn new(stmts: Vec<Stmt>, span: Span) -> Self {
        Self { stmts, span }
    }
}
