//! Proof oracles
//!
//! An oracle decides one obligation at a time: the obligation is valid when
//! its assumptions, the background axioms and the negated goal are jointly
//! unsatisfiable. Both oracles work on the arithmetic reduction of
//! [`crate::theory::lower`].

mod arith;
mod builtin;
mod smtlib;

pub use builtin::BuiltinOracle;
pub use smtlib::{SmtOracle, render_script};

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::config::VerifierConfig;
use crate::logic::{Sort, Symbol, Term, simplify};
use crate::theory::lower::Reduced;
use crate::vcgen::ProofObligation;

/// Counterexample: variable or atom description to value
pub type Witness = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum OracleOutcome {
    Proved,
    Refuted { witness: Witness },
    Unknown { reason: String },
}

impl OracleOutcome {
    pub fn unknown(reason: impl Into<String>) -> Self {
        OracleOutcome::Unknown { reason: reason.into() }
    }

    pub fn is_proved(&self) -> bool {
        matches!(self, OracleOutcome::Proved)
    }
}

impl std::fmt::Display for OracleOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OracleOutcome::Proved => write!(f, "proved"),
            OracleOutcome::Refuted { .. } => write!(f, "refuted"),
            OracleOutcome::Unknown { reason } => write!(f, "unknown ({reason})"),
        }
    }
}

pub trait ProofOracle: Send + Sync {
    fn name(&self) -> &'static str;

    /// Decide `obligation` under `axioms`; must return by `deadline`
    fn check(&self, obligation: &ProofObligation, axioms: &[Term], deadline: Instant) -> OracleOutcome;
}

/// Which oracle a run uses
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OracleKind {
    #[default]
    Builtin,
    Smt,
}

pub fn from_config(config: &VerifierConfig) -> Arc<dyn ProofOracle> {
    match config.oracle {
        OracleKind::Builtin => Arc::new(BuiltinOracle::default()),
        OracleKind::Smt => Arc::new(SmtOracle::new(config.solver_path.clone())),
    }
}

/// Counterexample from solver values: user variables keep their names,
/// reduction atoms are shown by what they stand for, other internals are
/// dropped
pub(crate) fn witness(labels: &BTreeMap<String, String>, values: impl IntoIterator<Item = (String, String)>) -> Witness {
    values
        .into_iter()
        .filter_map(|(name, value)| {
            if !Reduced::is_internal(&name) {
                Some((name, value))
            } else {
                labels.get(&name).map(|label| (label.clone(), value))
            }
        })
        .collect()
}

/// Conjunction whose unsatisfiability proves the obligation
pub fn query(obligation: &ProofObligation, axioms: &[Term]) -> Vec<Term> {
    let conjuncts = obligation
        .assumptions
        .iter()
        .chain(axioms)
        .cloned()
        .chain(std::iter::once(Term::not(obligation.goal.clone())))
        .map(|t| simplify(&t))
        .filter(|t| !t.is_true())
        .collect();
    propagate(conjuncts).into_iter().filter(|t| !t.is_true()).collect()
}

const PROPAGATION_ROUNDS: usize = 8;

/// Substitute facts `v == c` (`c` an integer or boolean constant) into the
/// other conjuncts until nothing changes. The defining conjuncts are kept so
/// counterexamples still mention `v`.
fn propagate(mut terms: Vec<Term>) -> Vec<Term> {
    for _ in 0..PROPAGATION_ROUNDS {
        let mut map = BTreeMap::new();
        let mut defining = BTreeSet::new();
        for (i, t) in terms.iter().enumerate() {
            if let Some((sym, value)) = constant_fact(t)
                && !map.contains_key(&sym)
            {
                map.insert(sym, value);
                defining.insert(i);
            }
        }
        if map.is_empty() {
            break;
        }
        let mut changed = false;
        terms = terms
            .into_iter()
            .enumerate()
            .map(|(i, t)| {
                if defining.contains(&i) {
                    return t;
                }
                let next = simplify(&t.substitute(&map));
                changed |= next != t;
                next
            })
            .collect();
        if !changed {
            break;
        }
    }
    terms
}

fn constant_fact(t: &Term) -> Option<(Symbol, Term)> {
    let literal = |c: &Term| matches!(c, Term::Int(_) | Term::Bool(_));
    match t {
        Term::Eq(a, b) => match (a.as_ref(), b.as_ref()) {
            (Term::Var(sym), c) | (c, Term::Var(sym)) if literal(c) => Some((sym.clone(), c.clone())),
            _ => None,
        },
        Term::Var(sym) if sym.sort == Sort::Bool => Some((sym.clone(), Term::Bool(true))),
        Term::Not(inner) => match inner.as_ref() {
            Term::Var(sym) if sym.sort == Sort::Bool => Some((sym.clone(), Term::Bool(false))),
            _ => None,
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{SourceLocation, Span};
    use crate::vcgen::ObligationKind;

    fn obligation(assumptions: Vec<Term>, goal: Term) -> ProofObligation {
        ProofObligation {
            id: 0,
            decl: "p.f".into(),
            kind: ObligationKind::Assertion,
            description: "assertion at line 1".into(),
            location: SourceLocation {
                file: "p.go".into(),
                line: 1,
                column: 1,
                span: Span::new(0, 1),
            },
            assumptions,
            goal,
        }
    }

    #[test]
    fn test_query_propagates_constants_into_products() {
        let w = Term::var("w", Sort::Int);
        let q = query(
            &obligation(vec![Term::eq(w.clone(), Term::int(2))], Term::eq(Term::mul(w.clone(), w.clone()), Term::int(4))),
            &[],
        );
        assert!(q.iter().any(|t| t.as_bool() == Some(false)), "{q:?}");
    }

    #[test]
    fn test_query_keeps_defining_facts() {
        let b = Term::var("b", Sort::Bool);
        let x = Term::var("x", Sort::Int);
        let q = query(&obligation(vec![b.clone()], Term::implies(b.clone(), Term::gt(x.clone(), Term::int(0)))), &[]);
        assert_eq!(q, vec![b, Term::not(Term::gt(x, Term::int(0)))]);
    }

    #[test]
    fn test_builtin_oracle_on_obligation() {
        let x = Term::var("x", Sort::Int);
        let ob = obligation(vec![Term::gt(x.clone(), Term::int(1))], Term::ge(x.clone(), Term::int(2)));
        let deadline = Instant::now() + std::time::Duration::from_secs(5);
        assert!(BuiltinOracle::default().check(&ob, &[], deadline).is_proved());

        let ob = obligation(Vec::new(), Term::ge(x, Term::int(2)));
        assert!(matches!(BuiltinOracle::default().check(&ob, &[], deadline), OracleOutcome::Refuted { .. }));
    }
}
