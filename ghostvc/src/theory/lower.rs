//! Reduction of collection queries to linear integer arithmetic
//!
//! Every collection term disappears:
//!
//! - `x # S` for an opaque `S` (variable or application) becomes an integer
//!   atom per distinct `(S, x)`, congruent in `x`; boolean elements expand to
//!   the two atoms for `true` and `false`
//! - literals expand by element equality, operators by max/min/saturation
//! - `|S|` of a literal is computed, otherwise it becomes an atom
//! - `A subset B` and `A == B` become a guard `p`: `p` implies the relation
//!   at every element term of the query, `!p` yields a Skolem witness
//!
//! Products of two non-constant terms and divisions by non-constants become
//! opaque atoms recorded in [`Reduced::opaque`] so a model can be checked.

use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;

use crate::ast::CollectionKind;
use crate::logic::{ArithOp, BagOp, Simplifier, Sort, Symbol, Term};

/// Bound on subset/equality instantiation rounds
const MAX_INSTANTIATION_ROUNDS: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LowerError {
    #[error("unsupported in the arithmetic reduction: {0}")]
    Unsupported(String),
}

/// Nonlinear atom `var == lhs op rhs`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpaqueDef {
    pub var: Symbol,
    pub op: ArithOp,
    pub lhs: Term,
    pub rhs: Term,
}

/// Quantifier-free query over integers and booleans
#[derive(Debug, Clone, Default)]
pub struct Reduced {
    /// Conjunction to check for satisfiability
    pub constraints: Vec<Term>,
    pub opaque: Vec<OpaqueDef>,
    /// Readable meaning of the atoms introduced by the reduction
    pub labels: BTreeMap<String, String>,
}

impl Reduced {
    /// Internal atoms carry a `!` in their name
    pub fn is_internal(name: &str) -> bool {
        name.contains('!')
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Relation {
    Subset,
    Equal,
}

#[derive(Debug, Clone)]
struct RelationAtom {
    guard: Term,
    relation: Relation,
    left: Term,
    right: Term,
    elem: Sort,
}

/// Reduce the conjunction of `conjuncts`
pub fn reduce(conjuncts: &[Term]) -> Result<Reduced, LowerError> {
    let mut lowerer = Lowerer::default();
    let mut constraints = Vec::with_capacity(conjuncts.len());
    for c in conjuncts {
        constraints.push(lowerer.term(c)?);
    }
    lowerer.instantiate()?;
    lowerer.congruence();

    let simplifier = Simplifier::default();
    constraints.append(&mut lowerer.side);
    Ok(Reduced {
        constraints: constraints
            .iter()
            .map(|c| simplifier.simplify(c))
            .filter(|c| !c.is_true())
            .collect(),
        opaque: lowerer.opaque,
        labels: lowerer.labels,
    })
}

#[derive(Default)]
struct Lowerer {
    next: usize,
    mult: BTreeMap<(Term, Term), Term>,
    card: BTreeMap<Term, Term>,
    apps: BTreeMap<Term, Term>,
    divisions: BTreeMap<(Term, i128), (Term, Term)>,
    opaque_cache: BTreeMap<(ArithOp, Term, Term), Term>,
    elements: BTreeMap<Sort, BTreeSet<Term>>,
    relations: Vec<RelationAtom>,
    side: Vec<Term>,
    opaque: Vec<OpaqueDef>,
    labels: BTreeMap<String, String>,
}

impl Lowerer {
    fn fresh(&mut self, prefix: &str, sort: Sort, label: Option<String>) -> Term {
        let name = format!("{prefix}!{}", self.next);
        self.next += 1;
        if let Some(label) = label {
            self.labels.insert(name.clone(), label);
        }
        Term::var(name, sort)
    }

    fn term(&mut self, t: &Term) -> Result<Term, LowerError> {
        Ok(match t {
            Term::Int(_) | Term::Bool(_) => t.clone(),
            Term::Var(sym) => {
                if sym.sort.as_collection().is_some() {
                    return Err(unsupported(t));
                }
                t.clone()
            }
            Term::Not(a) => Term::not(self.term(a)?),
            Term::And(ts) => Term::And(self.terms(ts)?),
            Term::Or(ts) => Term::Or(self.terms(ts)?),
            Term::Implies(a, b) => Term::implies(self.term(a)?, self.term(b)?),
            Term::Ite(c, a, b) => {
                if t.sort().as_collection().is_some() {
                    return Err(unsupported(t));
                }
                Term::ite(self.term(c)?, self.term(a)?, self.term(b)?)
            }
            Term::Eq(a, b) => {
                if a.sort().as_collection().is_some() {
                    self.relation(Relation::Equal, a, b)?
                } else {
                    Term::eq(self.term(a)?, self.term(b)?)
                }
            }
            Term::Cmp(op, a, b) => Term::Cmp(*op, Box::new(self.term(a)?), Box::new(self.term(b)?)),
            Term::Arith(op, a, b) => {
                let a = self.term(a)?;
                let b = self.term(b)?;
                self.arith(*op, a, b)
            }
            Term::Neg(a) => Term::Neg(Box::new(self.term(a)?)),
            Term::Bag { .. } | Term::BagOp(..) => return Err(unsupported(t)),
            Term::Subset(a, b) => self.relation(Relation::Subset, a, b)?,
            Term::Member(x, s) => {
                let x = self.term(x)?;
                Term::ge(self.mult(&x, s)?, Term::int(1))
            }
            Term::Multiplicity(x, s) => {
                let x = self.term(x)?;
                self.mult(&x, s)?
            }
            Term::Card(s) => self.card(s)?,
            Term::App { func, args, sort } => {
                if sort.as_collection().is_some() {
                    return Err(unsupported(t));
                }
                let mut lowered = Vec::with_capacity(args.len());
                for arg in args {
                    if arg.sort().as_collection().is_some() {
                        lowered.push(arg.clone());
                    } else {
                        lowered.push(self.term(arg)?);
                    }
                }
                let key = Term::App {
                    func: func.clone(),
                    args: lowered,
                    sort: sort.clone(),
                };
                if let Some(atom) = self.apps.get(&key) {
                    return Ok(atom.clone());
                }
                let atom = self.fresh("app", sort.clone(), Some(key.to_string()));
                self.apps.insert(key, atom.clone());
                atom
            }
        })
    }

    fn terms(&mut self, ts: &[Term]) -> Result<Vec<Term>, LowerError> {
        ts.iter().map(|t| self.term(t)).collect()
    }

    fn arith(&mut self, op: ArithOp, a: Term, b: Term) -> Term {
        match op {
            ArithOp::Add | ArithOp::Sub => Term::arith(op, a, b),
            ArithOp::Mul if a.as_int().is_some() || b.as_int().is_some() => Term::mul(a, b),
            ArithOp::Div | ArithOp::Mod if b.as_int().is_some_and(|c| c != 0) => {
                let c = b.as_int().unwrap_or(1);
                let (q, r) = self.division(a, c);
                if op == ArithOp::Div { q } else { r }
            }
            _ => {
                let key = (op, a.clone(), b.clone());
                if let Some(atom) = self.opaque_cache.get(&key) {
                    return atom.clone();
                }
                let label = Term::arith(op, a.clone(), b.clone()).to_string();
                let atom = self.fresh("nl", Sort::Int, Some(label));
                if let Term::Var(var) = &atom {
                    self.opaque.push(OpaqueDef {
                        var: var.clone(),
                        op,
                        lhs: a,
                        rhs: b,
                    });
                }
                self.opaque_cache.insert(key, atom.clone());
                atom
            }
        }
    }

    /// Truncating division by a non-zero constant: `a == c*q + r` with `r`
    /// taking the sign of `a` and `|r| < |c|`
    fn division(&mut self, a: Term, c: i128) -> (Term, Term) {
        if let Some(qr) = self.divisions.get(&(a.clone(), c)) {
            return qr.clone();
        }
        let q = self.fresh("q", Sort::Int, None);
        let r = self.fresh("r", Sort::Int, None);
        let bound = Term::int(c.saturating_abs());
        self.side.push(Term::eq(a.clone(), Term::add(Term::mul(Term::int(c), q.clone()), r.clone())));
        self.side.push(Term::implies(
            Term::ge(a.clone(), Term::int(0)),
            Term::and(vec![Term::le(Term::int(0), r.clone()), Term::lt(r.clone(), bound.clone())]),
        ));
        self.side.push(Term::implies(
            Term::lt(a.clone(), Term::int(0)),
            Term::and(vec![Term::lt(Term::Neg(Box::new(bound)), r.clone()), Term::le(r.clone(), Term::int(0))]),
        ));
        self.divisions.insert((a, c), (q.clone(), r.clone()));
        (q, r)
    }

    fn register(&mut self, elem: &Sort, x: &Term) {
        if *elem != Sort::Bool {
            self.elements.entry(elem.clone()).or_default().insert(x.clone());
        }
    }

    fn elem_sort(s: &Term) -> Result<(CollectionKind, Sort), LowerError> {
        match s.sort().as_collection() {
            Some((_, elem)) if elem.as_collection().is_some() => Err(LowerError::Unsupported(format!("nested collection {s}"))),
            Some((kind, elem)) => Ok((kind, elem.clone())),
            None => Err(unsupported(s)),
        }
    }

    /// Multiplicity of the lowered element `x` in the collection `s`
    fn mult(&mut self, x: &Term, s: &Term) -> Result<Term, LowerError> {
        let (kind, elem) = Self::elem_sort(s)?;
        self.register(&elem, x);
        Ok(match s {
            Term::Bag { kind, elems, .. } => {
                let mut hits = Vec::with_capacity(elems.len());
                for e in elems {
                    let e = self.term(e)?;
                    self.register(&elem, &e);
                    hits.push(Term::eq(x.clone(), e));
                }
                match kind {
                    CollectionKind::Set => Term::ite(Term::or(hits), Term::int(1), Term::int(0)),
                    CollectionKind::Multiset => hits
                        .into_iter()
                        .map(|hit| Term::ite(hit, Term::int(1), Term::int(0)))
                        .reduce(Term::add)
                        .unwrap_or(Term::int(0)),
                }
            }
            Term::BagOp(op, a, b) => {
                let ma = self.mult(x, a)?;
                let mb = self.mult(x, b)?;
                match op {
                    BagOp::Union => Term::max(ma, mb),
                    BagOp::Intersection => Term::min(ma, mb),
                    BagOp::Difference => Term::max(Term::sub(ma, mb), Term::int(0)),
                }
            }
            Term::Ite(c, a, b) => {
                let c = self.term(c)?;
                Term::ite(c, self.mult(x, a)?, self.mult(x, b)?)
            }
            Term::Var(_) | Term::App { .. } => {
                if elem == Sort::Bool && x.as_bool().is_none() {
                    let yes = self.mult_atom(kind, s, &Term::Bool(true));
                    let no = self.mult_atom(kind, s, &Term::Bool(false));
                    Term::ite(x.clone(), yes, no)
                } else {
                    self.mult_atom(kind, s, x)
                }
            }
            _ => return Err(unsupported(s)),
        })
    }

    fn mult_atom(&mut self, kind: CollectionKind, s: &Term, x: &Term) -> Term {
        let key = (s.clone(), x.clone());
        if let Some(atom) = self.mult.get(&key) {
            return atom.clone();
        }
        let atom = self.fresh("m", Sort::Int, Some(format!("{x} # {s}")));
        self.side.push(Term::le(Term::int(0), atom.clone()));
        if kind == CollectionKind::Set {
            self.side.push(Term::le(atom.clone(), Term::int(1)));
        }
        self.mult.insert(key, atom.clone());
        atom
    }

    fn card(&mut self, s: &Term) -> Result<Term, LowerError> {
        let (_, elem) = Self::elem_sort(s)?;
        Ok(match s {
            Term::Bag {
                kind: CollectionKind::Multiset,
                elems,
                ..
            } => Term::int(elems.len() as i128),
            Term::Bag {
                kind: CollectionKind::Set,
                elems,
                ..
            } => {
                let lowered = self.terms(elems)?;
                for e in &lowered {
                    self.register(&elem, e);
                }
                // Count each element that differs from all earlier ones
                lowered
                    .iter()
                    .enumerate()
                    .map(|(i, e)| {
                        let fresh = Term::and(lowered[..i].iter().map(|prev| Term::not(Term::eq(e.clone(), prev.clone()))).collect());
                        Term::ite(fresh, Term::int(1), Term::int(0))
                    })
                    .reduce(Term::add)
                    .unwrap_or(Term::int(0))
            }
            Term::Ite(c, a, b) => {
                let c = self.term(c)?;
                Term::ite(c, self.card(a)?, self.card(b)?)
            }
            Term::Var(_) | Term::App { .. } | Term::BagOp(..) => self.card_atom(s),
            _ => return Err(unsupported(s)),
        })
    }

    fn card_atom(&mut self, s: &Term) -> Term {
        if let Some(atom) = self.card.get(s) {
            return atom.clone();
        }
        let atom = self.fresh("c", Sort::Int, Some(format!("|{s}|")));
        self.side.push(Term::le(Term::int(0), atom.clone()));
        self.card.insert(s.clone(), atom.clone());
        atom
    }

    fn relation(&mut self, relation: Relation, a: &Term, b: &Term) -> Result<Term, LowerError> {
        let (_, elem) = Self::elem_sort(a)?;
        let label = match relation {
            Relation::Subset => format!("{a} subset {b}"),
            Relation::Equal => format!("{a} == {b}"),
        };
        let guard = self.fresh("p", Sort::Bool, Some(label));
        let witness = self.fresh("w", elem.clone(), None);

        let ma = self.mult(&witness, a)?;
        let mb = self.mult(&witness, b)?;
        let differs = match relation {
            Relation::Subset => Term::lt(mb, ma),
            Relation::Equal => Term::not(Term::eq(ma, mb)),
        };
        self.side.push(Term::or(vec![guard.clone(), differs]));

        let ca = self.card(a)?;
        let cb = self.card(b)?;
        let sizes = match relation {
            Relation::Subset => Term::le(ca, cb),
            Relation::Equal => Term::eq(ca, cb),
        };
        self.side.push(Term::implies(guard.clone(), sizes));

        self.relations.push(RelationAtom {
            guard: guard.clone(),
            relation,
            left: a.clone(),
            right: b.clone(),
            elem,
        });
        Ok(guard)
    }

    /// Instantiate every positive relation at every element term
    fn instantiate(&mut self) -> Result<(), LowerError> {
        let mut done: BTreeSet<(usize, Term)> = BTreeSet::new();
        for _ in 0..MAX_INSTANTIATION_ROUNDS {
            let mut progress = false;
            for i in 0..self.relations.len() {
                let atom = self.relations[i].clone();
                let candidates: Vec<Term> = if atom.elem == Sort::Bool {
                    vec![Term::Bool(true), Term::Bool(false)]
                } else {
                    self.elements.get(&atom.elem).map(|xs| xs.iter().cloned().collect()).unwrap_or_default()
                };
                for x in candidates {
                    if !done.insert((i, x.clone())) {
                        continue;
                    }
                    progress = true;
                    let ma = self.mult(&x, &atom.left)?;
                    let mb = self.mult(&x, &atom.right)?;
                    let holds = match atom.relation {
                        Relation::Subset => Term::le(ma, mb),
                        Relation::Equal => Term::eq(ma, mb),
                    };
                    self.side.push(Term::implies(atom.guard.clone(), holds));
                }
            }
            if !progress {
                break;
            }
        }
        Ok(())
    }

    /// Multiplicity bounded by cardinality, plus Ackermann constraints for
    /// atoms sharing a collection or a function
    fn congruence(&mut self) {
        let atoms: Vec<((Term, Term), Term)> = self.mult.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        for ((s, _), m) in &atoms {
            let c = self.card_atom(s);
            self.side.push(Term::le(m.clone(), c));
        }
        for (i, ((s1, x1), m1)) in atoms.iter().enumerate() {
            for ((s2, x2), m2) in &atoms[i + 1..] {
                if s1 == s2 && x1.sort() != Sort::Bool {
                    self.side.push(Term::implies(Term::eq(x1.clone(), x2.clone()), Term::eq(m1.clone(), m2.clone())));
                }
            }
        }

        let apps: Vec<(Term, Term)> = self.apps.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        for (i, (k1, r1)) in apps.iter().enumerate() {
            for (k2, r2) in &apps[i + 1..] {
                let (
                    Term::App {
                        func: f1, args: a1, ..
                    },
                    Term::App {
                        func: f2, args: a2, ..
                    },
                ) = (k1, k2)
                else {
                    continue;
                };
                if f1 != f2 || a1.len() != a2.len() || a1.iter().any(|a| a.sort().as_collection().is_some()) {
                    continue;
                }
                let same_args = Term::and(a1.iter().zip(a2).map(|(x, y)| Term::eq(x.clone(), y.clone())).collect());
                self.side.push(Term::implies(same_args, Term::eq(r1.clone(), r2.clone())));
            }
        }
    }
}

fn unsupported(t: &Term) -> LowerError {
    LowerError::Unsupported(t.to_string())
}
