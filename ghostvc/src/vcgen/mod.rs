//! Verification-condition generation
//!
//! Each declaration with a body is executed symbolically against the
//! contracts of itself and its callees. Every check becomes a
//! [`ProofObligation`]; checks from the same source site on different paths
//! are merged into one obligation.

mod exec;
mod state;

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::debug;

use crate::ast::{SourceLocation, Span};
use crate::contract::{ContractDb, check_ghost};
use crate::error::{Result, VerifyError};
use crate::logic::Term;
use crate::resolver::Bindings;
use crate::symbols::{DeclId, SymbolTable};

use exec::{Executor, Pending};

/// Default limit on execution paths per declaration
pub const DEFAULT_MAX_PATHS: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ObligationKind {
    Assertion,
    Precondition,
    Postcondition,
    Permission,
    DivisionByZero,
    InvariantEntry,
    InvariantPreserved,
}

impl std::fmt::Display for ObligationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ObligationKind::Assertion => "assertion",
            ObligationKind::Precondition => "precondition",
            ObligationKind::Postcondition => "postcondition",
            ObligationKind::Permission => "permission",
            ObligationKind::DivisionByZero => "division by zero",
            ObligationKind::InvariantEntry => "invariant entry",
            ObligationKind::InvariantPreserved => "invariant preservation",
        };
        write!(f, "{name}")
    }
}

/// A closed formula whose validity discharges one check:
/// `assumptions ==> goal`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProofObligation {
    /// Position within the declaration, from 0
    pub id: usize,
    /// Qualified name of the declaration
    pub decl: String,
    pub kind: ObligationKind,
    pub description: String,
    pub location: SourceLocation,
    pub assumptions: Vec<Term>,
    pub goal: Term,
}

impl ProofObligation {
    pub fn formula(&self) -> Term {
        Term::implies(Term::and(self.assumptions.clone()), self.goal.clone())
    }
}

/// Read-only inputs shared by every declaration of a run
pub struct VcContext<'a> {
    pub table: &'a SymbolTable,
    pub bindings: &'a Bindings,
    pub contracts: &'a ContractDb,
    pub max_paths: usize,
}

impl<'a> VcContext<'a> {
    pub fn new(table: &'a SymbolTable, bindings: &'a Bindings, contracts: &'a ContractDb) -> Self {
        Self {
            table,
            bindings,
            contracts,
            max_paths: DEFAULT_MAX_PATHS,
        }
    }

    pub fn with_max_paths(mut self, max_paths: usize) -> Self {
        self.max_paths = max_paths;
        self
    }
}

/// Obligations of one declaration. Bodiless declarations and types have
/// none; an ill-formed contract or a ghost violation is an error for this
/// declaration only.
pub fn generate(ctx: &VcContext<'_>, decl: DeclId) -> Result<Vec<ProofObligation>> {
    let declaration = ctx.table.decl(decl);
    let contract = ctx.contracts.get(decl)?;
    let Some(body) = declaration.func().and_then(|f| f.body.as_ref()) else {
        return Ok(Vec::new());
    };
    check_ghost(ctx.table, ctx.bindings, decl)?;
    let Some(signature) = ctx.bindings.signature(decl) else {
        return Err(VerifyError::config(format!("no signature for `{}`", declaration.name)));
    };

    let pending = Executor::new(ctx, decl, contract, signature).run(body)?;
    let raw = pending.len();
    let obligations = merge(ctx.table, declaration, pending);
    debug!(decl = %declaration.name, raw, obligations = obligations.len(), "generated obligations");
    Ok(obligations)
}

/// One obligation per site; several paths reaching a site give the
/// conjunction of their implications
fn merge(table: &SymbolTable, declaration: &crate::symbols::Declaration, pending: Vec<Pending>) -> Vec<ProofObligation> {
    type Key = (ObligationKind, Span, usize, String);
    let mut order: Vec<Key> = Vec::new();
    let mut groups: BTreeMap<Key, Vec<(Vec<Term>, Term)>> = BTreeMap::new();
    for p in pending {
        let key = (p.kind, p.span, p.clause, p.description);
        let entry = groups.entry(key.clone()).or_default();
        if entry.is_empty() {
            order.push(key);
        }
        entry.push((p.assumptions, p.goal));
    }

    let decl = declaration.name.to_string();
    order
        .into_iter()
        .enumerate()
        .filter_map(|(id, key)| {
            let mut paths = groups.remove(&key)?;
            let (kind, span, _, description) = key;
            let (assumptions, goal) = if paths.len() == 1 {
                paths.pop()?
            } else {
                let goal = Term::and(
                    paths
                        .into_iter()
                        .map(|(path, goal)| Term::implies(Term::and(path), goal))
                        .collect(),
                );
                (Vec::new(), goal)
            };
            Some(ProofObligation {
                id,
                decl: decl.clone(),
                kind,
                description,
                location: table.site(declaration.file, span),
                assumptions,
                goal,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::load_sources;
    use crate::resolver::resolve_program;

    fn obligations(src: &str, name: &str) -> Result<Vec<ProofObligation>> {
        let (program, _) = load_sources(&[("p", &[("p.go", src)])])?;
        let table = SymbolTable::from_program(program)?;
        let bindings = resolve_program(&table)?;
        let contracts = ContractDb::build(&table, &bindings);
        let ctx = VcContext::new(&table, &bindings, &contracts);
        let id = table
            .declarations()
            .find(|d| d.name.name == name)
            .map(|d| d.id)
            .expect("declaration exists");
        generate(&ctx, id)
    }

    fn summary(obligations: &[ProofObligation]) -> Vec<(ObligationKind, String)> {
        obligations.iter().map(|o| (o.kind, o.description.clone())).collect()
    }

    #[test]
    fn test_assertions_and_postconditions() {
        let src = "package p\nrequires x > 0\nensures y > x\nfunc f(x int) (y int) {\n  y = x + 1\n  assert y > 1\n  return\n}\n";
        let obs = obligations(src, "f").unwrap();
        assert_eq!(
            summary(&obs),
            vec![
                (ObligationKind::Assertion, "assertion at line 6".to_string()),
                (ObligationKind::Postcondition, "postcondition of p.f".to_string()),
            ]
        );
        assert_eq!(obs[0].assumptions.len(), 1);
        assert_eq!(obs[0].location.line, 6);
        assert_eq!(obs[1].id, 1);
    }

    #[test]
    fn test_branches_merge_at_shared_site() {
        let src = "package p\nensures y >= 0\nfunc f(x int) (y int) {\n  if x > 0 {\n    y = x\n  } else {\n    y = 0 - x\n  }\n  return\n}\n";
        let obs = obligations(src, "f").unwrap();
        assert_eq!(obs.len(), 1);
        assert!(obs[0].assumptions.is_empty());
        assert!(matches!(&obs[0].goal, Term::And(parts) if parts.len() == 2));
    }

    #[test]
    fn test_constant_branch_is_pruned() {
        let src = "package p\nfunc f() {\n  if false {\n    assert false\n  }\n}\n";
        assert!(obligations(src, "f").unwrap().is_empty());
    }

    #[test]
    fn test_call_checks_callee_precondition() {
        let src = "package p\nrequires x > 0\nensures y == x\nfunc g(x int) (y int)\nfunc f() {\n  v := g(3)\n  assert v == 3\n}\n";
        let obs = obligations(src, "f").unwrap();
        assert_eq!(obs[0].kind, ObligationKind::Precondition);
        assert_eq!(obs[0].description, "precondition of p.g");
        assert_eq!(obs[1].kind, ObligationKind::Assertion);
    }

    #[test]
    fn test_bodiless_declaration_has_no_obligations() {
        let src = "package p\nensures y > 0\nfunc g() (y int)\n";
        assert!(obligations(src, "g").unwrap().is_empty());
    }

    #[test]
    fn test_bodiless_declaration_contract_still_checked() {
        let src = "package p\nrequires old(x) > 0\nfunc g(x int)\n";
        let err = obligations(src, "g").unwrap_err();
        assert_eq!(err.kind(), "IllFormedContract");
    }

    #[test]
    fn test_division_emits_safety_obligation() {
        let src = "package p\nfunc f(x int, d int) (y int) {\n  y = x / d\n  return\n}\n";
        let obs = obligations(src, "f").unwrap();
        assert_eq!(summary(&obs), vec![(ObligationKind::DivisionByZero, "divisor is non-zero".to_string())]);
    }

    #[test]
    fn test_field_write_without_permission() {
        let src = "package p\ntype T struct {\n  W int\n}\nfunc f(r *T) {\n  r.W = 1\n}\n";
        let obs = obligations(src, "f").unwrap();
        assert_eq!(obs.len(), 1);
        assert_eq!(obs[0].kind, ObligationKind::Permission);
        assert_eq!(obs[0].description, "permission to write r.W");
        assert_eq!(obs[0].goal, Term::Bool(false));
    }

    #[test]
    fn test_loop_invariant_obligations() {
        let src = "package p\nfunc f(n int) {\n  i := 0\n  invariant i >= 0\n  for i < n {\n    i = i + 1\n  }\n}\n";
        let obs = obligations(src, "f").unwrap();
        assert_eq!(
            summary(&obs),
            vec![
                (ObligationKind::InvariantEntry, "loop invariant holds on entry".to_string()),
                (ObligationKind::InvariantPreserved, "loop invariant is preserved".to_string()),
            ]
        );
    }

    #[test]
    fn test_ghost_violation_fails_declaration() {
        let src = "package p\nfunc f(ghost x int) (y int) {\n  y = x\n  return\n}\n";
        let err = obligations(src, "f").unwrap_err();
        assert_eq!(err.kind(), "GhostViolation");
    }

    #[test]
    fn test_ill_formed_callee_fails_caller() {
        let src = "package p\nrequires old(x) > 0\nfunc g(x int)\nfunc f() {\n  g(1)\n}\n";
        let err = obligations(src, "f").unwrap_err();
        assert!(err.message().contains("calls `p.g` whose contract is ill-formed"), "{}", err.message());
    }
}
