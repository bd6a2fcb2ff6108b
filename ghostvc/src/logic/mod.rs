//! Verification-condition terms
//!
//! A small many-sorted term language: integer and boolean connectives,
//! finite set/multiset operations and uninterpreted applications. Integers
//! are mathematical; constants use `i128` and folding never wraps.

mod simplify;

pub use simplify::{Simplifier, simplify};

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::ast::CollectionKind;
use crate::types::Ty;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Sort {
    Int,
    Bool,
    Set(Box<Sort>),
    Multiset(Box<Sort>),
}

impl Sort {
    pub fn collection(kind: CollectionKind, elem: Sort) -> Sort {
        match kind {
            CollectionKind::Set => Sort::Set(Box::new(elem)),
            CollectionKind::Multiset => Sort::Multiset(Box::new(elem)),
        }
    }

    pub fn as_collection(&self) -> Option<(CollectionKind, &Sort)> {
        match self {
            Sort::Set(elem) => Some((CollectionKind::Set, elem)),
            Sort::Multiset(elem) => Some((CollectionKind::Multiset, elem)),
            _ => None,
        }
    }

    /// Sort of a value of a static type; structs and pointers have none
    pub fn of(ty: &Ty) -> Option<Sort> {
        match ty {
            Ty::Int | Ty::Perm => Some(Sort::Int),
            Ty::Bool => Some(Sort::Bool),
            Ty::Set(elem) => Some(Sort::Set(Box::new(Sort::of(elem)?))),
            Ty::Multiset(elem) => Some(Sort::Multiset(Box::new(Sort::of(elem)?))),
            _ => None,
        }
    }
}

impl std::fmt::Display for Sort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Sort::Int => write!(f, "Int"),
            Sort::Bool => write!(f, "Bool"),
            Sort::Set(elem) => write!(f, "(Set {elem})"),
            Sort::Multiset(elem) => write!(f, "(Multiset {elem})"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Symbol {
    pub name: String,
    pub sort: Sort,
}

impl Symbol {
    pub fn new(name: impl Into<String>, sort: Sort) -> Self {
        Self {
            name: name.into(),
            sort,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum CmpOp {
    Lt,
    Le,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    /// Truncating division
    Div,
    /// Remainder with the sign of the dividend
    Mod,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum BagOp {
    /// Per-element maximum
    Union,
    /// Per-element minimum
    Intersection,
    /// Per-element saturating subtraction
    Difference,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Term {
    Int(i128),
    Bool(bool),
    Var(Symbol),
    Not(Box<Term>),
    And(Vec<Term>),
    Or(Vec<Term>),
    Implies(Box<Term>, Box<Term>),
    Ite(Box<Term>, Box<Term>, Box<Term>),
    Eq(Box<Term>, Box<Term>),
    Cmp(CmpOp, Box<Term>, Box<Term>),
    Arith(ArithOp, Box<Term>, Box<Term>),
    Neg(Box<Term>),
    /// Collection literal
    Bag {
        kind: CollectionKind,
        elem: Sort,
        elems: Vec<Term>,
    },
    BagOp(BagOp, Box<Term>, Box<Term>),
    Subset(Box<Term>, Box<Term>),
    /// `x in S`
    Member(Box<Term>, Box<Term>),
    /// `x # S`
    Multiplicity(Box<Term>, Box<Term>),
    /// `|S|`
    Card(Box<Term>),
    /// Uninterpreted function application
    App {
        func: String,
        args: Vec<Term>,
        sort: Sort,
    },
}

impl Term {
    pub fn int(n: i128) -> Term {
        Term::Int(n)
    }

    pub fn var(name: impl Into<String>, sort: Sort) -> Term {
        Term::Var(Symbol::new(name, sort))
    }

    pub fn not(t: Term) -> Term {
        Term::Not(Box::new(t))
    }

    pub fn and(terms: Vec<Term>) -> Term {
        match terms.len() {
            0 => Term::Bool(true),
            1 => terms.into_iter().next().unwrap_or(Term::Bool(true)),
            _ => Term::And(terms),
        }
    }

    pub fn or(terms: Vec<Term>) -> Term {
        match terms.len() {
            0 => Term::Bool(false),
            1 => terms.into_iter().next().unwrap_or(Term::Bool(false)),
            _ => Term::Or(terms),
        }
    }

    pub fn implies(a: Term, b: Term) -> Term {
        Term::Implies(Box::new(a), Box::new(b))
    }

    pub fn ite(c: Term, a: Term, b: Term) -> Term {
        Term::Ite(Box::new(c), Box::new(a), Box::new(b))
    }

    pub fn eq(a: Term, b: Term) -> Term {
        Term::Eq(Box::new(a), Box::new(b))
    }

    pub fn lt(a: Term, b: Term) -> Term {
        Term::Cmp(CmpOp::Lt, Box::new(a), Box::new(b))
    }

    pub fn le(a: Term, b: Term) -> Term {
        Term::Cmp(CmpOp::Le, Box::new(a), Box::new(b))
    }

    pub fn gt(a: Term, b: Term) -> Term {
        Term::lt(b, a)
    }

    pub fn ge(a: Term, b: Term) -> Term {
        Term::le(b, a)
    }

    pub fn arith(op: ArithOp, a: Term, b: Term) -> Term {
        Term::Arith(op, Box::new(a), Box::new(b))
    }

    pub fn add(a: Term, b: Term) -> Term {
        Term::arith(ArithOp::Add, a, b)
    }

    pub fn sub(a: Term, b: Term) -> Term {
        Term::arith(ArithOp::Sub, a, b)
    }

    pub fn mul(a: Term, b: Term) -> Term {
        Term::arith(ArithOp::Mul, a, b)
    }

    pub fn card(s: Term) -> Term {
        Term::Card(Box::new(s))
    }

    pub fn multiplicity(x: Term, s: Term) -> Term {
        Term::Multiplicity(Box::new(x), Box::new(s))
    }

    pub fn member(x: Term, s: Term) -> Term {
        Term::Member(Box::new(x), Box::new(s))
    }

    pub fn subset(a: Term, b: Term) -> Term {
        Term::Subset(Box::new(a), Box::new(b))
    }

    pub fn bag_op(op: BagOp, a: Term, b: Term) -> Term {
        Term::BagOp(op, Box::new(a), Box::new(b))
    }

    /// `max(a, b)` as an if-then-else
    pub fn max(a: Term, b: Term) -> Term {
        Term::ite(Term::ge(a.clone(), b.clone()), a, b)
    }

    /// `min(a, b)` as an if-then-else
    pub fn min(a: Term, b: Term) -> Term {
        Term::ite(Term::le(a.clone(), b.clone()), a, b)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Term::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i128> {
        match self {
            Term::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn is_true(&self) -> bool {
        self.as_bool() == Some(true)
    }

    pub fn sort(&self) -> Sort {
        match self {
            Term::Int(_) | Term::Arith(..) | Term::Neg(_) | Term::Multiplicity(..) | Term::Card(_) => Sort::Int,
            Term::Bool(_)
            | Term::Not(_)
            | Term::And(_)
            | Term::Or(_)
            | Term::Implies(..)
            | Term::Eq(..)
            | Term::Cmp(..)
            | Term::Subset(..)
            | Term::Member(..) => Sort::Bool,
            Term::Var(sym) => sym.sort.clone(),
            Term::Ite(_, a, _) => a.sort(),
            Term::Bag { kind, elem, .. } => Sort::collection(*kind, elem.clone()),
            Term::BagOp(_, a, _) => a.sort(),
            Term::App { sort, .. } => sort.clone(),
        }
    }

    /// Direct subterms
    pub fn children(&self) -> Vec<&Term> {
        match self {
            Term::Int(_) | Term::Bool(_) | Term::Var(_) => Vec::new(),
            Term::Not(t) | Term::Neg(t) | Term::Card(t) => vec![t],
            Term::And(ts) | Term::Or(ts) => ts.iter().collect(),
            Term::Bag { elems, .. } => elems.iter().collect(),
            Term::App { args, .. } => args.iter().collect(),
            Term::Ite(c, a, b) => vec![c, a, b],
            Term::Implies(a, b)
            | Term::Eq(a, b)
            | Term::Cmp(_, a, b)
            | Term::Arith(_, a, b)
            | Term::BagOp(_, a, b)
            | Term::Subset(a, b)
            | Term::Member(a, b)
            | Term::Multiplicity(a, b) => vec![a, b],
        }
    }

    /// Pre-order traversal
    pub fn visit(&self, f: &mut impl FnMut(&Term)) {
        f(self);
        for child in self.children() {
            child.visit(f);
        }
    }

    pub fn free_vars(&self) -> BTreeSet<Symbol> {
        let mut vars = BTreeSet::new();
        self.visit(&mut |t| {
            if let Term::Var(sym) = t {
                vars.insert(sym.clone());
            }
        });
        vars
    }

    /// Replace variables by terms; the result is not simplified
    pub fn substitute(&self, map: &BTreeMap<Symbol, Term>) -> Term {
        let sub = |t: &Term| Box::new(t.substitute(map));
        match self {
            Term::Var(sym) => map.get(sym).cloned().unwrap_or_else(|| self.clone()),
            Term::Int(_) | Term::Bool(_) => self.clone(),
            Term::Not(t) => Term::Not(sub(t)),
            Term::Neg(t) => Term::Neg(sub(t)),
            Term::Card(t) => Term::Card(sub(t)),
            Term::And(ts) => Term::And(ts.iter().map(|t| t.substitute(map)).collect()),
            Term::Or(ts) => Term::Or(ts.iter().map(|t| t.substitute(map)).collect()),
            Term::Bag { kind, elem, elems } => Term::Bag {
                kind: *kind,
                elem: elem.clone(),
                elems: elems.iter().map(|t| t.substitute(map)).collect(),
            },
            Term::App { func, args, sort } => Term::App {
                func: func.clone(),
                args: args.iter().map(|t| t.substitute(map)).collect(),
                sort: sort.clone(),
            },
            Term::Ite(c, a, b) => Term::Ite(sub(c), sub(a), sub(b)),
            Term::Implies(a, b) => Term::Implies(sub(a), sub(b)),
            Term::Eq(a, b) => Term::Eq(sub(a), sub(b)),
            Term::Cmp(op, a, b) => Term::Cmp(*op, sub(a), sub(b)),
            Term::Arith(op, a, b) => Term::Arith(*op, sub(a), sub(b)),
            Term::BagOp(op, a, b) => Term::BagOp(*op, sub(a), sub(b)),
            Term::Subset(a, b) => Term::Subset(sub(a), sub(b)),
            Term::Member(a, b) => Term::Member(sub(a), sub(b)),
            Term::Multiplicity(a, b) => Term::Multiplicity(sub(a), sub(b)),
        }
    }

    /// True when the term mentions a set or multiset anywhere
    pub fn touches_collections(&self) -> bool {
        let mut found = false;
        self.visit(&mut |t| {
            if matches!(
                t,
                Term::Bag { .. } | Term::BagOp(..) | Term::Subset(..) | Term::Member(..) | Term::Multiplicity(..) | Term::Card(_)
            ) || t.sort().as_collection().is_some()
            {
                found = true;
            }
        });
        found
    }
}

impl std::fmt::Display for Term {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fn list(f: &mut std::fmt::Formatter<'_>, head: &str, items: &[&Term]) -> std::fmt::Result {
            write!(f, "({head}")?;
            for item in items {
                write!(f, " {item}")?;
            }
            write!(f, ")")
        }
        match self {
            Term::Int(n) if *n < 0 => write!(f, "(- {})", n.unsigned_abs()),
            Term::Int(n) => write!(f, "{n}"),
            Term::Bool(b) => write!(f, "{b}"),
            Term::Var(sym) => write!(f, "{}", sym.name),
            Term::Not(t) => list(f, "not", &[t]),
            Term::And(ts) => list(f, "and", &ts.iter().collect::<Vec<_>>()),
            Term::Or(ts) => list(f, "or", &ts.iter().collect::<Vec<_>>()),
            Term::Implies(a, b) => list(f, "=>", &[a, b]),
            Term::Ite(c, a, b) => list(f, "ite", &[c, a, b]),
            Term::Eq(a, b) => list(f, "=", &[a, b]),
            Term::Cmp(CmpOp::Lt, a, b) => list(f, "<", &[a, b]),
            Term::Cmp(CmpOp::Le, a, b) => list(f, "<=", &[a, b]),
            Term::Arith(op, a, b) => {
                let head = match op {
                    ArithOp::Add => "+",
                    ArithOp::Sub => "-",
                    ArithOp::Mul => "*",
                    ArithOp::Div => "div",
                    ArithOp::Mod => "mod",
                };
                list(f, head, &[a, b])
            }
            Term::Neg(t) => list(f, "-", &[t]),
            Term::Bag { kind, elems, .. } => list(f, &kind.to_string(), &elems.iter().collect::<Vec<_>>()),
            Term::BagOp(op, a, b) => {
                let head = match op {
                    BagOp::Union => "union",
                    BagOp::Intersection => "intersection",
                    BagOp::Difference => "setminus",
                };
                list(f, head, &[a, b])
            }
            Term::Subset(a, b) => list(f, "subset", &[a, b]),
            Term::Member(a, b) => list(f, "in", &[a, b]),
            Term::Multiplicity(a, b) => list(f, "#", &[a, b]),
            Term::Card(s) => list(f, "card", &[s]),
            Term::App { func, args, .. } if args.is_empty() => write!(f, "{func}"),
            Term::App { func, args, .. } => list(f, func, &args.iter().collect::<Vec<_>>()),
        }
    }
}
