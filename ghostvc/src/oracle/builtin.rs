//! Self-contained decision procedure
//!
//! Integer if-then-else terms are named by fresh variables, the query is put
//! in negation normal form and searched DPLL-style: literals are collected,
//! the arithmetic part is probed with Fourier-Motzkin after every step, and
//! the smallest open disjunction is split.

use std::collections::BTreeMap;
use std::time::Instant;

use tracing::{debug, trace};

use super::arith::{self, ArithError, Constraint, Feasibility, LinExpr};
use super::{OracleOutcome, ProofOracle, Witness};
use crate::logic::{ArithOp, CmpOp, Sort, Term};
use crate::theory::lower::{self, Reduced};
use crate::vcgen::ProofObligation;

/// Case splits per query before giving up
const DEFAULT_MAX_NODES: usize = 50_000;

#[derive(Debug, Clone)]
pub struct BuiltinOracle {
    max_nodes: usize,
}

impl Default for BuiltinOracle {
    fn default() -> Self {
        Self {
            max_nodes: DEFAULT_MAX_NODES,
        }
    }
}

impl ProofOracle for BuiltinOracle {
    fn name(&self) -> &'static str {
        "builtin"
    }

    fn check(&self, obligation: &ProofObligation, axioms: &[Term], deadline: Instant) -> OracleOutcome {
        self.decide(&super::query(obligation, axioms), deadline)
    }
}

impl BuiltinOracle {
    pub fn with_max_nodes(max_nodes: usize) -> Self {
        Self { max_nodes }
    }

    /// Decide unsatisfiability of the conjunction `query`
    pub fn decide(&self, query: &[Term], deadline: Instant) -> OracleOutcome {
        if query.iter().any(|t| t.as_bool() == Some(false)) {
            return OracleOutcome::Proved;
        }
        let reduced = match lower::reduce(query) {
            Ok(reduced) => reduced,
            Err(err) => return OracleOutcome::unknown(err.to_string()),
        };
        trace!(constraints = reduced.constraints.len(), opaque = reduced.opaque.len(), "reduced query");

        let mut solver = Solver {
            deadline,
            nodes: 0,
            max_nodes: self.max_nodes,
            next: 0,
            defs: Vec::new(),
        };
        let mut roots = Vec::new();
        for c in &reduced.constraints {
            let purified = solver.purify(c);
            match nnf(&purified, true) {
                Ok(f) => roots.push(f),
                Err(err) => return OracleOutcome::unknown(describe(err)),
            }
        }
        for d in std::mem::take(&mut solver.defs) {
            match nnf(&d, true) {
                Ok(f) => roots.push(f),
                Err(err) => return OracleOutcome::unknown(describe(err)),
            }
        }

        let outcome = match solver.search(roots, BTreeMap::new(), Vec::new()) {
            Search::Unsat => OracleOutcome::Proved,
            Search::Unknown(reason) => OracleOutcome::unknown(reason),
            Search::Sat(model) => validate(&reduced, &model),
        };
        debug!(nodes = solver.nodes, %outcome, "builtin oracle");
        outcome
    }
}

fn describe(err: ArithError) -> String {
    match err {
        ArithError::Overflow => "arithmetic overflow".to_string(),
        ArithError::NonLinear(t) => format!("nonlinear term {t}"),
    }
}

#[derive(Debug, Clone)]
enum Formula {
    True,
    False,
    /// Boolean variable with its required value
    Bool(String, bool),
    Arith(Constraint),
    And(Vec<Formula>),
    Or(Vec<Formula>),
}

#[derive(Debug, Clone, Default)]
struct Model {
    ints: BTreeMap<String, i128>,
    bools: BTreeMap<String, bool>,
}

enum Search {
    Sat(Model),
    Unsat,
    Unknown(String),
}

struct Solver {
    deadline: Instant,
    nodes: usize,
    max_nodes: usize,
    next: usize,
    defs: Vec<Term>,
}

impl Solver {
    /// Replace integer if-then-else by fresh variables with definitions
    fn purify(&mut self, t: &Term) -> Term {
        match t {
            Term::Ite(c, a, b) => {
                let c = self.purify(c);
                let a = self.purify(a);
                let b = self.purify(b);
                if a.sort() == Sort::Bool {
                    return Term::or(vec![
                        Term::and(vec![c.clone(), a]),
                        Term::and(vec![Term::not(c), b]),
                    ]);
                }
                let v = Term::var(format!("ite!{}", self.next), Sort::Int);
                self.next += 1;
                self.defs.push(Term::implies(c.clone(), Term::eq(v.clone(), a)));
                self.defs.push(Term::implies(Term::not(c), Term::eq(v.clone(), b)));
                v
            }
            Term::Not(a) => Term::not(self.purify(a)),
            Term::Neg(a) => Term::Neg(Box::new(self.purify(a))),
            Term::And(ts) => Term::And(ts.iter().map(|x| self.purify(x)).collect()),
            Term::Or(ts) => Term::Or(ts.iter().map(|x| self.purify(x)).collect()),
            Term::Implies(a, b) => Term::implies(self.purify(a), self.purify(b)),
            Term::Eq(a, b) => Term::eq(self.purify(a), self.purify(b)),
            Term::Cmp(op, a, b) => Term::Cmp(*op, Box::new(self.purify(a)), Box::new(self.purify(b))),
            Term::Arith(op, a, b) => Term::arith(*op, self.purify(a), self.purify(b)),
            other => other.clone(),
        }
    }

    fn search(&mut self, mut pending: Vec<Formula>, mut bools: BTreeMap<String, bool>, mut arith: Vec<Constraint>) -> Search {
        self.nodes += 1;
        if Instant::now() >= self.deadline {
            return Search::Unknown("timeout".to_string());
        }
        if self.nodes > self.max_nodes {
            return Search::Unknown("case split budget exhausted".to_string());
        }

        let mut open: Vec<Vec<Formula>> = Vec::new();
        loop {
            while let Some(f) = pending.pop() {
                match f {
                    Formula::True => {}
                    Formula::False => return Search::Unsat,
                    Formula::And(fs) => pending.extend(fs),
                    Formula::Bool(name, value) => {
                        if bools.insert(name, value).is_some_and(|old| old != value) {
                            return Search::Unsat;
                        }
                    }
                    Formula::Arith(c) => arith.push(c),
                    Formula::Or(fs) => open.push(fs),
                }
            }

            // Drop disjuncts falsified by the boolean assignment
            let mut still_open = Vec::with_capacity(open.len());
            for disjuncts in open {
                let mut remaining = Vec::with_capacity(disjuncts.len());
                let mut satisfied = false;
                for d in disjuncts {
                    match &d {
                        Formula::True => {
                            satisfied = true;
                            break;
                        }
                        Formula::False => {}
                        Formula::Bool(name, value) => match bools.get(name) {
                            Some(current) if current == value => {
                                satisfied = true;
                                break;
                            }
                            Some(_) => {}
                            None => remaining.push(d),
                        },
                        _ => remaining.push(d),
                    }
                }
                if satisfied {
                    continue;
                }
                match remaining.len() {
                    0 => return Search::Unsat,
                    1 => pending.extend(remaining),
                    _ => still_open.push(remaining),
                }
            }
            open = still_open;
            if pending.is_empty() {
                break;
            }
        }

        let probe = arith::check(&arith);
        if probe == Feasibility::Infeasible {
            return Search::Unsat;
        }
        if open.is_empty() {
            return match probe {
                Feasibility::Feasible(ints) => Search::Sat(Model { ints, bools }),
                Feasibility::Unknown(reason) => Search::Unknown(reason),
                Feasibility::Infeasible => Search::Unsat,
            };
        }

        let split = open
            .iter()
            .enumerate()
            .min_by_key(|(_, ds)| ds.len())
            .map(|(i, _)| i)
            .unwrap_or(0);
        let disjuncts = open.swap_remove(split);
        let rest: Vec<Formula> = open.into_iter().map(Formula::Or).collect();

        let mut unknown = None;
        for d in disjuncts {
            let mut branch = rest.clone();
            branch.push(d);
            match self.search(branch, bools.clone(), arith.clone()) {
                Search::Sat(model) => return Search::Sat(model),
                Search::Unsat => {}
                Search::Unknown(reason) => {
                    if reason == "timeout" {
                        return Search::Unknown(reason);
                    }
                    unknown.get_or_insert(reason);
                }
            }
        }
        match unknown {
            Some(reason) => Search::Unknown(reason),
            None => Search::Unsat,
        }
    }
}

fn difference(a: &Term, b: &Term) -> Result<LinExpr, ArithError> {
    LinExpr::from_term(a)?.add(&LinExpr::from_term(b)?, -1)
}

/// Negation normal form of a purified term; `positive` is the polarity
fn nnf(t: &Term, positive: bool) -> Result<Formula, ArithError> {
    Ok(match t {
        Term::Bool(b) => {
            if *b == positive {
                Formula::True
            } else {
                Formula::False
            }
        }
        Term::Var(sym) if sym.sort == Sort::Bool => Formula::Bool(sym.name.clone(), positive),
        Term::Not(a) => nnf(a, !positive)?,
        Term::And(ts) | Term::Or(ts) => {
            let parts = ts.iter().map(|x| nnf(x, positive)).collect::<Result<Vec<_>, _>>()?;
            if matches!(t, Term::And(_)) == positive {
                Formula::And(parts)
            } else {
                Formula::Or(parts)
            }
        }
        Term::Implies(a, b) => {
            if positive {
                Formula::Or(vec![nnf(a, false)?, nnf(b, true)?])
            } else {
                Formula::And(vec![nnf(a, true)?, nnf(b, false)?])
            }
        }
        Term::Eq(a, b) if a.sort() == Sort::Bool => {
            let (a_pos, a_neg, b_pos, b_neg) = (nnf(a, true)?, nnf(a, false)?, nnf(b, true)?, nnf(b, false)?);
            if positive {
                Formula::Or(vec![Formula::And(vec![a_pos, b_pos]), Formula::And(vec![a_neg, b_neg])])
            } else {
                Formula::Or(vec![Formula::And(vec![a_pos, b_neg]), Formula::And(vec![a_neg, b_pos])])
            }
        }
        Term::Eq(a, b) => {
            let d = difference(a, b)?;
            if positive {
                Formula::Arith(Constraint::Eq(d))
            } else {
                // a < b or a > b
                Formula::Or(vec![
                    Formula::Arith(Constraint::Le(d.add(&LinExpr::constant(1), 1)?)),
                    Formula::Arith(Constraint::Le(d.scale(-1)?.add(&LinExpr::constant(1), 1)?)),
                ])
            }
        }
        Term::Cmp(op, a, b) => {
            let d = difference(a, b)?;
            let one = LinExpr::constant(1);
            Formula::Arith(Constraint::Le(match (op, positive) {
                (CmpOp::Le, true) => d,
                (CmpOp::Le, false) => d.scale(-1)?.add(&one, 1)?,
                (CmpOp::Lt, true) => d.add(&one, 1)?,
                (CmpOp::Lt, false) => d.scale(-1)?,
            }))
        }
        other => return Err(ArithError::NonLinear(other.to_string())),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Value {
    Int(i128),
    Bool(bool),
}

fn eval(t: &Term, model: &Model) -> Option<Value> {
    let int = |t: &Term| match eval(t, model) {
        Some(Value::Int(n)) => Some(n),
        _ => None,
    };
    let boolean = |t: &Term| match eval(t, model) {
        Some(Value::Bool(b)) => Some(b),
        _ => None,
    };
    Some(match t {
        Term::Int(n) => Value::Int(*n),
        Term::Bool(b) => Value::Bool(*b),
        Term::Var(sym) if sym.sort == Sort::Bool => Value::Bool(model.bools.get(&sym.name).copied().unwrap_or(false)),
        Term::Var(sym) => Value::Int(model.ints.get(&sym.name).copied().unwrap_or(0)),
        Term::Not(a) => Value::Bool(!boolean(a)?),
        Term::And(ts) => {
            let mut all = true;
            for x in ts {
                all &= boolean(x)?;
            }
            Value::Bool(all)
        }
        Term::Or(ts) => {
            let mut any = false;
            for x in ts {
                any |= boolean(x)?;
            }
            Value::Bool(any)
        }
        Term::Implies(a, b) => Value::Bool(!boolean(a)? || boolean(b)?),
        Term::Ite(c, a, b) => {
            if boolean(c)? {
                eval(a, model)?
            } else {
                eval(b, model)?
            }
        }
        Term::Eq(a, b) => Value::Bool(eval(a, model)? == eval(b, model)?),
        Term::Cmp(CmpOp::Lt, a, b) => Value::Bool(int(a)? < int(b)?),
        Term::Cmp(CmpOp::Le, a, b) => Value::Bool(int(a)? <= int(b)?),
        Term::Neg(a) => Value::Int(int(a)?.checked_neg()?),
        Term::Arith(op, a, b) => Value::Int(apply(*op, int(a)?, int(b)?)?),
        _ => return None,
    })
}

fn apply(op: ArithOp, a: i128, b: i128) -> Option<i128> {
    match op {
        ArithOp::Add => a.checked_add(b),
        ArithOp::Sub => a.checked_sub(b),
        ArithOp::Mul => a.checked_mul(b),
        ArithOp::Div => a.checked_div(b),
        ArithOp::Mod => a.checked_rem(b),
    }
}

/// Check the model against the full reduced query, opaque atoms included
fn validate(reduced: &Reduced, model: &Model) -> OracleOutcome {
    for def in &reduced.opaque {
        let (Some(Value::Int(a)), Some(Value::Int(b))) = (eval(&def.lhs, model), eval(&def.rhs, model)) else {
            return OracleOutcome::unknown(format!("cannot evaluate nonlinear atom {}", def.var.name));
        };
        if b == 0 && def.op != ArithOp::Mul {
            continue;
        }
        let actual = model.ints.get(&def.var.name).copied().unwrap_or(0);
        if apply(def.op, a, b) != Some(actual) {
            let label = reduced.labels.get(&def.var.name).cloned().unwrap_or_else(|| def.var.name.clone());
            return OracleOutcome::unknown(format!("model violates nonlinear atom {label}"));
        }
    }
    for c in &reduced.constraints {
        if eval(c, model) != Some(Value::Bool(true)) {
            return OracleOutcome::unknown(format!("model does not satisfy {c}"));
        }
    }
    OracleOutcome::Refuted {
        witness: witness(reduced, model),
    }
}

fn witness(reduced: &Reduced, model: &Model) -> Witness {
    let ints = model.ints.iter().map(|(k, v)| (k.clone(), v.to_string()));
    let bools = model.bools.iter().map(|(k, v)| (k.clone(), v.to_string()));
    super::witness(&reduced.labels, ints.chain(bools))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::ast::CollectionKind;
    use crate::logic::BagOp;
    use crate::theory::axioms::background;

    fn x() -> Term {
        Term::var("x", Sort::Int)
    }

    fn mset(name: &str) -> Term {
        Term::var(name, Sort::Multiset(Box::new(Sort::Int)))
    }

    fn set(name: &str) -> Term {
        Term::var(name, Sort::Set(Box::new(Sort::Int)))
    }

    /// Validity of `assumptions ==> goal` with background axioms
    fn prove(assumptions: Vec<Term>, goal: Term) -> OracleOutcome {
        let mut query = assumptions;
        query.push(Term::not(goal));
        let axioms = background(&query);
        query.extend(axioms);
        let query: Vec<Term> = query.iter().map(crate::logic::simplify).collect();
        BuiltinOracle::default().decide(&query, Instant::now() + Duration::from_secs(10))
    }

    #[test]
    fn test_linear_validity() {
        let goal = Term::implies(Term::lt(x(), Term::int(3)), Term::le(x(), Term::int(2)));
        assert_eq!(prove(vec![], goal), OracleOutcome::Proved);
    }

    #[test]
    fn test_linear_refutation_has_witness() {
        let outcome = prove(vec![Term::le(Term::int(0), x())], Term::lt(x(), Term::int(1)));
        let OracleOutcome::Refuted { witness } = outcome else {
            panic!("expected refutation, got {outcome:?}");
        };
        assert_eq!(witness.get("x").map(String::as_str), Some("1"));
    }

    #[test]
    fn test_membership_in_union() {
        let u = Term::bag_op(BagOp::Union, mset("m1"), mset("m2"));
        let goal = Term::implies(Term::member(x(), mset("m1")), Term::member(x(), u.clone()));
        assert_eq!(prove(vec![], goal), OracleOutcome::Proved);
        let back = Term::implies(
            Term::member(x(), u),
            Term::or(vec![Term::member(x(), mset("m1")), Term::member(x(), mset("m2"))]),
        );
        assert_eq!(prove(vec![], back), OracleOutcome::Proved);
    }

    #[test]
    fn test_intersection_and_setminus() {
        let i = Term::bag_op(BagOp::Intersection, set("s1"), set("s2"));
        let goal = Term::implies(
            Term::lt(Term::int(0), Term::multiplicity(x(), i)),
            Term::and(vec![Term::member(x(), set("s1")), Term::member(x(), set("s2"))]),
        );
        assert_eq!(prove(vec![], goal), OracleOutcome::Proved);
        let d = Term::bag_op(BagOp::Difference, set("s1"), set("s2"));
        let goal = Term::implies(
            Term::lt(Term::int(0), Term::multiplicity(x(), d)),
            Term::and(vec![Term::member(x(), set("s1")), Term::not(Term::member(x(), set("s2")))]),
        );
        assert_eq!(prove(vec![], goal), OracleOutcome::Proved);
    }

    #[test]
    fn test_subset_monotonicity() {
        let goal = Term::le(Term::multiplicity(x(), set("s1")), Term::multiplicity(x(), set("s2")));
        assert_eq!(prove(vec![Term::subset(set("s1"), set("s2"))], goal), OracleOutcome::Proved);
        assert!(matches!(
            prove(vec![], Term::subset(set("s1"), set("s2"))),
            OracleOutcome::Refuted { .. }
        ));
    }

    #[test]
    fn test_multiplicity_bounded_by_cardinality() {
        let goal = Term::le(Term::multiplicity(x(), set("s")), Term::card(set("s")));
        assert_eq!(prove(vec![], goal), OracleOutcome::Proved);
        let set_bits = Term::and(vec![
            Term::le(Term::int(0), Term::multiplicity(x(), set("s"))),
            Term::le(Term::multiplicity(x(), set("s")), Term::int(1)),
        ]);
        assert_eq!(prove(vec![], set_bits), OracleOutcome::Proved);
    }

    #[test]
    fn test_union_cardinality_is_not_additive() {
        let u = Term::bag_op(BagOp::Union, mset("m1"), mset("m2"));
        let goal = Term::eq(Term::card(u), Term::add(Term::card(mset("m1")), Term::card(mset("m2"))));
        assert!(matches!(prove(vec![], goal), OracleOutcome::Refuted { .. }));
    }

    #[test]
    fn test_boolean_element_chain() {
        let bools = Term::var("m2", Sort::Multiset(Box::new(Sort::Bool)));
        let inner = Term::member(x(), mset("m1"));
        let b = Term::var("b", Sort::Bool);
        let assumptions = vec![inner.clone(), Term::eq(b.clone(), Term::member(inner, bools.clone()))];
        let goal = Term::eq(b, Term::member(Term::Bool(true), bools));
        assert_eq!(prove(assumptions, goal), OracleOutcome::Proved);
    }

    #[test]
    fn test_literal_membership_with_symbolic_element() {
        let lit = Term::Bag {
            kind: CollectionKind::Set,
            elem: Sort::Int,
            elems: vec![Term::int(1), Term::int(2)],
        };
        let goal = Term::implies(Term::member(x(), lit), Term::le(x(), Term::int(2)));
        assert_eq!(prove(vec![], goal), OracleOutcome::Proved);
    }

    #[test]
    fn test_nonlinear_counterexample_is_unknown() {
        let y = Term::var("y", Sort::Int);
        let goal = Term::not(Term::eq(Term::mul(x(), y), Term::int(5)));
        let outcome = prove(vec![Term::eq(x(), Term::int(2))], goal);
        assert!(matches!(outcome, OracleOutcome::Unknown { .. }), "{outcome:?}");
    }

    #[test]
    fn test_truncating_division() {
        let goal = Term::implies(
            Term::eq(x(), Term::int(-7)),
            Term::eq(Term::arith(ArithOp::Div, x(), Term::int(2)), Term::int(-3)),
        );
        assert_eq!(prove(vec![], goal), OracleOutcome::Proved);
    }

    #[test]
    fn test_expired_deadline_is_unknown() {
        let y = Term::var("y", Sort::Int);
        let query = vec![Term::or(vec![Term::lt(x(), y.clone()), Term::lt(y, x())])];
        let outcome = BuiltinOracle::default().decide(&query, Instant::now());
        assert_eq!(outcome, OracleOutcome::unknown("timeout"));
    }
}
