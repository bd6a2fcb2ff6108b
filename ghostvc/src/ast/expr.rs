//! Expression AST nodes

use super::{Spanned, TypeExpr};
use serde::{Deserialize, Serialize};

/// Expression
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    /// Integer literal
    IntLit(i64),
    /// Boolean literal
    BoolLit(bool),

    /// Identifier: local, package-level declaration or import alias
    Ident(String),

    /// Selector: `x.f`, `x.M`, `alias.Name`, `(*(T)).M`
    Selector {
        base: Box<Spanned<Expr>>,
        field: Spanned<String>,
    },

    /// Call of a function, method value or method expression
    Call {
        callee: Box<Spanned<Expr>>,
        args: Vec<Spanned<Expr>>,
    },

    /// Binary operation
    Binary {
        left: Box<Spanned<Expr>>,
        op: BinOp,
        right: Box<Spanned<Expr>>,
    },

    /// Unary operation
    Unary {
        op: UnOp,
        expr: Box<Spanned<Expr>>,
    },

    /// Cardinality: `|s|`
    Cardinality(Box<Spanned<Expr>>),

    /// Collection literal: `set[int] { 1, 2 }`, `mset[bool] { true }`
    Collection {
        kind: CollectionKind,
        elem_ty: Spanned<TypeExpr>,
        elems: Vec<Spanned<Expr>>,
    },

    /// Composite literal: `Rectangle{Width: 2, Height: 5}` or positional `Rectangle{2, 5}`
    Composite {
        ty: Spanned<TypeExpr>,
        fields: Vec<(Option<Spanned<String>>, Spanned<Expr>)>,
    },

    /// Old-state reference: `old(e)`
    Old(Box<Spanned<Expr>>),

    /// Permission: `acc(x.f)`
    Acc(Box<Spanned<Expr>>),

    /// Pre-state snapshot introduced by the contract model in place of `old(e)`
    Snapshot(usize),
}

impl Expr {
    /// Visit direct sub-expressions.
    pub fn children(&self) -> Vec<&Spanned<Expr>> {
        match self {
            Expr::IntLit(_) | Expr::BoolLit(_) | Expr::Ident(_) | Expr::Snapshot(_) => Vec::new(),
            Expr::Selector { base, .. } => vec![base.as_ref()],
            Expr::Call { callee, args } => {
                let mut out = vec![callee.as_ref()];
                out.extend(args.iter());
                out
            }
            Expr::Binary { left, right, .. } => vec![left.as_ref(), right.as_ref()],
            Expr::Unary { expr, .. } => vec![expr.as_ref()],
            Expr::Cardinality(inner) | Expr::Old(inner) | Expr::Acc(inner) => vec![inner.as_ref()],
            Expr::Collection { elems, .. } => elems.iter().collect(),
            Expr::Composite { fields, .. } => fields.iter().map(|(_, value)| value).collect(),
        }
    }
}

/// Source-like rendering; nested binary operands are parenthesized
impl std::fmt::Display for Expr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fn operand(e: &Spanned<Expr>, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match &e.node {
                Expr::Binary { .. } => write!(f, "({})", e.node),
                other => write!(f, "{other}"),
            }
        }
        fn list(items: &[Spanned<Expr>], f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", item.node)?;
            }
            Ok(())
        }

        match self {
            Expr::IntLit(n) => write!(f, "{n}"),
            Expr::BoolLit(b) => write!(f, "{b}"),
            Expr::Ident(name) => write!(f, "{name}"),
            Expr::Selector { base, field } => {
                operand(base, f)?;
                write!(f, ".{}", field.node)
            }
            Expr::Call { callee, args } => {
                write!(f, "{}(", callee.node)?;
                list(args, f)?;
                write!(f, ")")
            }
            Expr::Binary { left, op, right } => {
                operand(left, f)?;
                write!(f, " {op} ")?;
                operand(right, f)
            }
            Expr::Unary { op, expr } => {
                write!(f, "{op}")?;
                operand(expr, f)
            }
            Expr::Cardinality(inner) => write!(f, "|{}|", inner.node),
            Expr::Collection { kind, elem_ty, elems } => {
                write!(f, "{kind}[{}] {{", elem_ty.node)?;
                list(elems, f)?;
                write!(f, "}}")
            }
            Expr::Composite { ty, fields } => {
                write!(f, "{}{{", ty.node)?;
                for (i, (key, value)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    if let Some(key) = key {
                        write!(f, "{}: ", key.node)?;
                    }
                    write!(f, "{}", value.node)?;
                }
                write!(f, "}}")
            }
            Expr::Old(inner) => write!(f, "old({})", inner.node),
            Expr::Acc(inner) => write!(f, "acc({})", inner.node),
            Expr::Snapshot(index) => write!(f, "old#{index}"),
        }
    }
}

/// Kind of a collection literal or type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CollectionKind {
    Set,
    Multiset,
}

impl std::fmt::Display for CollectionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CollectionKind::Set => write!(f, "set"),
            CollectionKind::Multiset => write!(f, "mset"),
        }
    }
}

/// Binary operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinOp {
    // Arithmetic
    Add,
    Sub,
    Mul,
    Div,
    Mod,

    // Comparison
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,

    // Logical
    And,
    Or,
    Implies,

    // Collections
    In,
    Subset,
    Multiplicity,
    Union,
    Intersection,
    SetMinus,
}

impl BinOp {
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge
        )
    }

    pub fn is_arithmetic(self) -> bool {
        matches!(
            self,
            BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod
        )
    }

    pub fn is_logical(self) -> bool {
        matches!(self, BinOp::And | BinOp::Or | BinOp::Implies)
    }

    pub fn is_collection_op(self) -> bool {
        matches!(self, BinOp::Union | BinOp::Intersection | BinOp::SetMinus)
    }
}

impl std::fmt::Display for BinOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BinOp::Add => write!(f, "+"),
            BinOp::Sub => write!(f, "-"),
            BinOp::Mul => write!(f, "*"),
            BinOp::Div => write!(f, "/"),
            BinOp::Mod => write!(f, "%"),
            BinOp::Eq => write!(f, "=="),
            BinOp::Ne => write!(f, "!="),
            BinOp::Lt => write!(f, "<"),
            BinOp::Gt => write!(f, ">"),
            BinOp::Le => write!(f, "<="),
            BinOp::Ge => write!(f, ">="),
            BinOp::And => write!(f, "&&"),
            BinOp::Or => write!(f, "||"),
            BinOp::Implies => write!(f, "==>"),
            BinOp::In => write!(f, "in"),
            BinOp::Subset => write!(f, "subset"),
            BinOp::Multiplicity => write!(f, "#"),
            BinOp::Union => write!(f, "union"),
            BinOp::Intersection => write!(f, "intersection"),
            BinOp::SetMinus => write!(f, "setminus"),
        }
    }
}

/// Unary operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnOp {
    /// Negation (-)
    Neg,
    /// Logical not (!)
    Not,
    /// Dereference or pointer type (*)
    Deref,
    /// Address-of (&)
    AddrOf,
}

impl std::fmt::Display for UnOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnOp::Neg => write!(f, "-"),
            UnOp::Not => write!(f, "!"),
            UnOp::Deref => write!(f, "*"),
            UnOp::AddrOf => write!(f, "&"),
        }
    }
}
