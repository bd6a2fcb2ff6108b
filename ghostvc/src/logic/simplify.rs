//! Bottom-up simplification and constant folding
//!
//! Integer arithmetic is folded with checked 128-bit operations; a result
//! that would overflow stays symbolic. Constant collections are evaluated
//! with [`Bag`] when collection folding is enabled.

use tracing::trace;

use super::{ArithOp, BagOp, CmpOp, Term};
use crate::theory::{Bag, Element};

/// Stack red zone for deep terms
const STACK_RED_ZONE: usize = 128 * 1024;
const STACK_GROW_SIZE: usize = 4 * 1024 * 1024;

#[derive(Debug, Clone, Copy)]
pub struct Simplifier {
    fold_collections: bool,
}

impl Default for Simplifier {
    fn default() -> Self {
        Self::new(true)
    }
}

/// Simplify with collection folding enabled
pub fn simplify(term: &Term) -> Term {
    Simplifier::default().simplify(term)
}

impl Simplifier {
    pub fn new(fold_collections: bool) -> Self {
        Self { fold_collections }
    }

    pub fn simplify(&self, term: &Term) -> Term {
        stacker::maybe_grow(STACK_RED_ZONE, STACK_GROW_SIZE, || self.simplify_inner(term))
    }

    fn simplify_inner(&self, term: &Term) -> Term {
        match term {
            Term::Int(_) | Term::Bool(_) | Term::Var(_) => term.clone(),
            Term::Not(t) => negate(self.simplify(t)),
            Term::And(ts) => self.junction(ts, true),
            Term::Or(ts) => self.junction(ts, false),
            Term::Implies(a, b) => {
                let a = self.simplify(a);
                let b = self.simplify(b);
                match (a.as_bool(), b.as_bool()) {
                    (Some(true), _) => b,
                    (Some(false), _) | (_, Some(true)) => Term::Bool(true),
                    (_, Some(false)) => negate(a),
                    _ if a == b => Term::Bool(true),
                    _ => Term::implies(a, b),
                }
            }
            Term::Ite(c, a, b) => {
                let c = self.simplify(c);
                let a = self.simplify(a);
                let b = self.simplify(b);
                match c.as_bool() {
                    Some(true) => a,
                    Some(false) => b,
                    None if a == b => a,
                    None => Term::ite(c, a, b),
                }
            }
            Term::Eq(a, b) => {
                let a = self.simplify(a);
                let b = self.simplify(b);
                self.equality(a, b)
            }
            Term::Cmp(op, a, b) => {
                let a = self.simplify(a);
                let b = self.simplify(b);
                match (a.as_int(), b.as_int()) {
                    (Some(x), Some(y)) => Term::Bool(match op {
                        CmpOp::Lt => x < y,
                        CmpOp::Le => x <= y,
                    }),
                    _ if a == b => Term::Bool(*op == CmpOp::Le),
                    _ => Term::Cmp(*op, Box::new(a), Box::new(b)),
                }
            }
            Term::Arith(op, a, b) => arith(*op, self.simplify(a), self.simplify(b)),
            Term::Neg(t) => {
                let t = self.simplify(t);
                match t.as_int().and_then(i128::checked_neg) {
                    Some(n) => Term::Int(n),
                    None => Term::Neg(Box::new(t)),
                }
            }
            Term::Bag { kind, elem, elems } => {
                let lit = Term::Bag {
                    kind: *kind,
                    elem: elem.clone(),
                    elems: elems.iter().map(|e| self.simplify(e)).collect(),
                };
                match self.constant(&lit) {
                    Some(bag) => bag.to_term(),
                    None => lit,
                }
            }
            Term::BagOp(op, a, b) => {
                let a = self.simplify(a);
                let b = self.simplify(b);
                if let (Some(x), Some(y)) = (self.constant(&a), self.constant(&b)) {
                    let folded = match op {
                        BagOp::Union => x.union(&y),
                        BagOp::Intersection => x.intersection(&y),
                        BagOp::Difference => x.difference(&y),
                    };
                    match folded {
                        Ok(bag) => return bag.to_term(),
                        Err(err) => trace!(%err, "collection operation not folded"),
                    }
                }
                Term::bag_op(*op, a, b)
            }
            Term::Subset(a, b) => {
                let a = self.simplify(a);
                let b = self.simplify(b);
                if let (Some(x), Some(y)) = (self.constant(&a), self.constant(&b)) {
                    match x.is_subset(&y) {
                        Ok(result) => return Term::Bool(result),
                        Err(err) => trace!(%err, "subset not folded"),
                    }
                }
                if self.fold_collections && (a == b || is_empty_literal(&a)) {
                    return Term::Bool(true);
                }
                Term::subset(a, b)
            }
            Term::Member(x, s) => {
                let x = self.simplify(x);
                let s = self.simplify(s);
                if self.fold_collections && is_empty_literal(&s) {
                    return Term::Bool(false);
                }
                match (Element::from_term(&x), self.constant(&s)) {
                    (Some(e), Some(bag)) => Term::Bool(bag.contains(&e)),
                    _ => Term::member(x, s),
                }
            }
            Term::Multiplicity(x, s) => {
                let x = self.simplify(x);
                let s = self.simplify(s);
                if self.fold_collections && is_empty_literal(&s) {
                    return Term::Int(0);
                }
                match (Element::from_term(&x), self.constant(&s)) {
                    (Some(e), Some(bag)) => Term::Int(i128::from(bag.multiplicity(&e))),
                    _ => Term::multiplicity(x, s),
                }
            }
            Term::Card(s) => {
                let s = self.simplify(s);
                if let Some(bag) = self.constant(&s) {
                    return Term::Int(i128::from(bag.cardinality()));
                }
                // A multiset literal counts its elements whatever they are
                if let Term::Bag {
                    kind: crate::ast::CollectionKind::Multiset,
                    elems,
                    ..
                } = &s
                    && self.fold_collections
                {
                    return Term::Int(elems.len() as i128);
                }
                Term::card(s)
            }
            Term::App { func, args, sort } => Term::App {
                func: func.clone(),
                args: args.iter().map(|a| self.simplify(a)).collect(),
                sort: sort.clone(),
            },
        }
    }

    fn constant(&self, term: &Term) -> Option<Bag> {
        if self.fold_collections { Bag::from_term(term) } else { None }
    }

    fn junction(&self, terms: &[Term], is_and: bool) -> Term {
        let mut out: Vec<Term> = Vec::new();
        let mut pending: Vec<Term> = terms.iter().rev().map(|t| self.simplify(t)).collect();
        while let Some(t) = pending.pop() {
            match (t, is_and) {
                (Term::And(inner), true) | (Term::Or(inner), false) => pending.extend(inner.into_iter().rev()),
                (Term::Bool(b), _) if b == is_and => {}
                (Term::Bool(b), _) => return Term::Bool(b),
                (t, _) => {
                    if !out.contains(&t) {
                        out.push(t);
                    }
                }
            }
        }
        if is_and { Term::and(out) } else { Term::or(out) }
    }

    fn equality(&self, a: Term, b: Term) -> Term {
        if a == b {
            return Term::Bool(true);
        }
        match (&a, &b) {
            (Term::Int(x), Term::Int(y)) => return Term::Bool(x == y),
            (Term::Bool(x), Term::Bool(y)) => return Term::Bool(x == y),
            (Term::Bool(true), t) | (t, Term::Bool(true)) => return t.clone(),
            (Term::Bool(false), t) | (t, Term::Bool(false)) => return negate(t.clone()),
            _ => {}
        }
        if let (Some(x), Some(y)) = (self.constant(&a), self.constant(&b)) {
            match x.equals(&y) {
                Ok(result) => return Term::Bool(result),
                Err(err) => trace!(%err, "collection equality not folded"),
            }
        }
        Term::eq(a, b)
    }
}

fn negate(t: Term) -> Term {
    match t {
        Term::Bool(b) => Term::Bool(!b),
        Term::Not(inner) => *inner,
        other => Term::not(other),
    }
}

fn is_empty_literal(t: &Term) -> bool {
    matches!(t, Term::Bag { elems, .. } if elems.is_empty())
}

fn arith(op: ArithOp, a: Term, b: Term) -> Term {
    if let (Some(x), Some(y)) = (a.as_int(), b.as_int()) {
        let folded = match op {
            ArithOp::Add => x.checked_add(y),
            ArithOp::Sub => x.checked_sub(y),
            ArithOp::Mul => x.checked_mul(y),
            ArithOp::Div => x.checked_div(y),
            ArithOp::Mod => x.checked_rem(y),
        };
        if let Some(n) = folded {
            return Term::Int(n);
        }
    }
    match (op, a.as_int(), b.as_int()) {
        (ArithOp::Add, Some(0), _) => b,
        (ArithOp::Add | ArithOp::Sub, _, Some(0)) => a,
        (ArithOp::Mul, Some(1), _) => b,
        (ArithOp::Mul | ArithOp::Div, _, Some(1)) => a,
        (ArithOp::Mul, Some(0), _) | (ArithOp::Mul, _, Some(0)) => Term::Int(0),
        (ArithOp::Sub, _, _) if a == b => Term::Int(0),
        _ => Term::arith(op, a, b),
    }
}
