//! Contract model
//!
//! For every function and method: ordered pre- and postconditions with
//! `old(e)` lifted out into indexed snapshots, ghost parameters and results,
//! and the definition of a pure function. Contracts are built once per run;
//! an ill-formed contract fails only its own declaration and the call sites
//! that target it.

mod ghost;

pub use ghost::check_ghost;

use std::collections::BTreeMap;

use crate::ast::{BinOp, Expr, Span, Spanned, StmtKind};
use crate::error::{Result, VerifyError};
use crate::resolver::{Binding, Bindings, LocalId, LocalKind};
use crate::symbols::{DeclId, FileId, SymbolTable};

#[derive(Debug, Clone, PartialEq)]
pub struct Contract {
    pub decl: DeclId,
    /// File whose bindings the clauses resolve against
    pub file: FileId,
    pub requires: Vec<Spanned<Expr>>,
    /// Postconditions; `Expr::Snapshot(i)` stands for `snapshots[i]`
    pub ensures: Vec<Spanned<Expr>>,
    /// Bodies of `old(...)`, evaluated in the pre-state
    pub snapshots: Vec<Spanned<Expr>>,
    pub ghost_params: Vec<LocalId>,
    pub ghost_results: Vec<LocalId>,
    /// `e` of a pure function whose body is `return e`
    pub pure_body: Option<Spanned<Expr>>,
    pub pure: bool,
}

impl Contract {
    pub fn build(table: &SymbolTable, bindings: &Bindings, id: DeclId) -> Result<Contract> {
        let decl = table.decl(id);
        let name = decl.name.to_string();
        let fail = |message: String, span: Span| VerifyError::ill_formed(&name, message, table.site(decl.file, span));

        let Some(def) = decl.func() else {
            return Err(fail("not a function or method".into(), decl.span));
        };
        if let Some(err) = bindings.clause_error(id) {
            return Err(err.clone());
        }
        let Some(signature) = bindings.signature(id) else {
            return Err(fail("signature was not resolved".into(), decl.span));
        };

        let requires: Vec<Spanned<Expr>> = def.spec.requires.iter().chain(&def.spec.preserves).cloned().collect();
        let mut ensures = Vec::with_capacity(def.spec.ensures.len() + def.spec.preserves.len());
        let mut snapshots = Vec::new();

        for clause in &requires {
            let mut problem = None;
            visit(clause, &mut |e| {
                if problem.is_some() {
                    return;
                }
                match &e.node {
                    Expr::Old(_) => problem = Some(("old(...) in a precondition".to_string(), e.span)),
                    Expr::Ident(_) => {
                        if let Some(Binding::Local(local)) = bindings.binding(decl.file, e.span)
                            && local.kind == LocalKind::Result
                        {
                            problem = Some((format!("precondition mentions result `{}`", local.name), e.span));
                        }
                    }
                    _ => {}
                }
            });
            if let Some((message, span)) = problem {
                return Err(fail(message, span));
            }
        }

        for clause in def.spec.preserves.iter().chain(&def.spec.ensures) {
            let lifted = lift_old(clause, &mut snapshots).map_err(|span| fail("nested old(...)".into(), span))?;
            ensures.push(lifted);
        }

        for clause in requires.iter().chain(&ensures).chain(&snapshots) {
            check_ownership(bindings, decl.file, id, clause).map_err(|(message, span)| fail(message, span))?;
            check_acc_position(clause).map_err(|span| fail("acc(...) must be a top-level conjunct".into(), span))?;
        }

        let pure_body = if def.pure {
            if signature.results.len() != 1 {
                return Err(fail("pure function must have exactly one result".into(), def.name.span));
            }
            match def.body.as_ref().map(|b| b.stmts.as_slice()) {
                None => None,
                Some([stmt]) => match &stmt.kind {
                    StmtKind::Return(values) if values.len() == 1 => Some(values[0].clone()),
                    _ => return Err(fail("pure function body must be a single return".into(), stmt.span)),
                },
                Some(_) => return Err(fail("pure function body must be a single return".into(), def.span)),
            }
        } else {
            None
        };

        Ok(Contract {
            decl: id,
            file: decl.file,
            requires,
            ensures,
            snapshots,
            ghost_params: signature.params.iter().filter(|p| p.ghost).map(|p| p.id).collect(),
            ghost_results: signature.results.iter().filter(|r| r.ghost).map(|r| r.id).collect(),
            pure_body,
            pure: def.pure,
        })
    }

    pub fn is_trivial(&self) -> bool {
        self.requires.is_empty() && self.ensures.is_empty()
    }
}

/// Contracts of every function and method of a run
#[derive(Debug, Default)]
pub struct ContractDb {
    contracts: BTreeMap<DeclId, Result<Contract>>,
}

impl ContractDb {
    pub fn build(table: &SymbolTable, bindings: &Bindings) -> Self {
        let mut contracts = BTreeMap::new();
        for decl in table.declarations().filter(|d| d.func().is_some()) {
            let contract = Contract::build(table, bindings, decl.id);
            if let Err(err) = &contract {
                tracing::debug!(decl = %decl.name, error = %err, "ill-formed contract");
            }
            contracts.insert(decl.id, contract);
        }
        Self { contracts }
    }

    /// The contract of `decl`, or the error that made it ill-formed
    pub fn get(&self, decl: DeclId) -> Result<&Contract> {
        match self.contracts.get(&decl) {
            Some(Ok(contract)) => Ok(contract),
            Some(Err(err)) => Err(err.clone()),
            None => Err(VerifyError::config(format!("no contract for declaration {}", decl.0))),
        }
    }

    pub fn len(&self) -> usize {
        self.contracts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contracts.is_empty()
    }
}

/// Operands of a `&&` chain, left to right
pub fn conjuncts(expr: &Spanned<Expr>) -> Vec<&Spanned<Expr>> {
    let mut out = Vec::new();
    let mut stack = vec![expr];
    while let Some(e) = stack.pop() {
        match &e.node {
            Expr::Binary {
                left,
                op: BinOp::And,
                right,
            } => {
                stack.push(right);
                stack.push(left);
            }
            _ => out.push(e),
        }
    }
    out
}

/// Pre-order walk over an expression tree
pub fn visit<'e>(expr: &'e Spanned<Expr>, f: &mut impl FnMut(&'e Spanned<Expr>)) {
    f(expr);
    for child in expr.node.children() {
        visit(child, f);
    }
}

fn contains_old(expr: &Spanned<Expr>) -> Option<Span> {
    let mut found = None;
    visit(expr, &mut |e| {
        if found.is_none() && matches!(e.node, Expr::Old(_)) {
            found = Some(e.span);
        }
    });
    found
}

/// Replace every `old(e)` by a snapshot index; `Err` carries the span of a
/// nested `old`
fn lift_old(expr: &Spanned<Expr>, snapshots: &mut Vec<Spanned<Expr>>) -> std::result::Result<Spanned<Expr>, Span> {
    let node = match &expr.node {
        Expr::Old(inner) => {
            if let Some(span) = contains_old(inner) {
                return Err(span);
            }
            snapshots.push(inner.as_ref().clone());
            Expr::Snapshot(snapshots.len() - 1)
        }
        Expr::IntLit(_) | Expr::BoolLit(_) | Expr::Ident(_) | Expr::Snapshot(_) => expr.node.clone(),
        Expr::Selector { base, field } => Expr::Selector {
            base: Box::new(lift_old(base, snapshots)?),
            field: field.clone(),
        },
        Expr::Call { callee, args } => Expr::Call {
            callee: callee.clone(),
            args: lift_all(args, snapshots)?,
        },
        Expr::Binary { left, op, right } => Expr::Binary {
            left: Box::new(lift_old(left, snapshots)?),
            op: *op,
            right: Box::new(lift_old(right, snapshots)?),
        },
        Expr::Unary { op, expr: inner } => Expr::Unary {
            op: *op,
            expr: Box::new(lift_old(inner, snapshots)?),
        },
        Expr::Cardinality(inner) => Expr::Cardinality(Box::new(lift_old(inner, snapshots)?)),
        Expr::Acc(inner) => Expr::Acc(Box::new(lift_old(inner, snapshots)?)),
        Expr::Collection { kind, elem_ty, elems } => Expr::Collection {
            kind: *kind,
            elem_ty: elem_ty.clone(),
            elems: lift_all(elems, snapshots)?,
        },
        Expr::Composite { ty, fields } => {
            let mut lifted = Vec::with_capacity(fields.len());
            for (key, value) in fields {
                lifted.push((key.clone(), lift_old(value, snapshots)?));
            }
            Expr::Composite { ty: ty.clone(), fields: lifted }
        }
    };
    Ok(Spanned::new(node, expr.span))
}

fn lift_all(exprs: &[Spanned<Expr>], snapshots: &mut Vec<Spanned<Expr>>) -> std::result::Result<Vec<Spanned<Expr>>, Span> {
    exprs.iter().map(|e| lift_old(e, snapshots)).collect()
}

/// Contract clauses may only mention the receiver, parameters and results
/// of their own declaration
fn check_ownership(bindings: &Bindings, file: FileId, owner: DeclId, clause: &Spanned<Expr>) -> std::result::Result<(), (String, Span)> {
    let mut problem = None;
    visit(clause, &mut |e| {
        if problem.is_none()
            && let Some(Binding::Local(local)) = bindings.binding(file, e.span)
            && (local.id.owner != owner || local.kind == LocalKind::Var)
        {
            problem = Some((format!("`{}` is not owned by this declaration", local.name), e.span));
        }
    });
    problem.map_or(Ok(()), Err)
}

fn check_acc_position(clause: &Spanned<Expr>) -> std::result::Result<(), Span> {
    for conjunct in conjuncts(clause) {
        let nested = match &conjunct.node {
            Expr::Acc(inner) => inner.as_ref(),
            _ => conjunct,
        };
        let mut found = None;
        visit(nested, &mut |e| {
            if found.is_none() && matches!(e.node, Expr::Acc(_)) {
                found = Some(e.span);
            }
        });
        if let Some(span) = found {
            return Err(span);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::load_sources;
    use crate::resolver::resolve_program;

    fn contract_of(src: &str, name: &str) -> Result<Contract> {
        let (program, _) = load_sources(&[("p", &[("p.go", src)])])?;
        let table = SymbolTable::from_program(program)?;
        let bindings = resolve_program(&table)?;
        let id = table
            .declarations()
            .find(|d| d.name.name == name)
            .map(|d| d.id)
            .expect("declaration exists");
        let db = ContractDb::build(&table, &bindings);
        db.get(id).cloned()
    }

    #[test]
    fn test_old_lifted_into_snapshots() {
        let src = "package p\ntype T struct {\n  W int\n}\nrequires acc(r.W)\nensures acc(r.W)\nensures old(r.W) == r.W && old(r.W + 1) > 0\nfunc (r *T) M() {\n}\n";
        let contract = contract_of(src, "T.M").unwrap();
        assert_eq!(contract.snapshots.len(), 2);
        assert_eq!(contract.snapshots[1].node.to_string(), "r.W + 1");
        assert_eq!(contract.ensures[1].node.to_string(), "(old#0 == r.W) && (old#1 > 0)");
    }

    #[test]
    fn test_preserves_contributes_to_both_sides() {
        let src = "package p\npreserves x > 0\nrequires x < 10\nfunc f(x int) {\n}\n";
        let contract = contract_of(src, "f").unwrap();
        assert_eq!(contract.requires.len(), 2);
        assert_eq!(contract.ensures.len(), 1);
        assert_eq!(contract.ensures[0].node.to_string(), "x > 0");
    }

    #[test]
    fn test_old_in_precondition_rejected() {
        let src = "package p\nrequires old(x) == x\nfunc f(x int) {\n}\n";
        let err = contract_of(src, "f").unwrap_err();
        assert!(matches!(&err, VerifyError::IllFormedContract { message, .. } if message.contains("precondition")));
    }

    #[test]
    fn test_nested_old_rejected() {
        let src = "package p\nensures old(old(x)) == x\nfunc f(x int) {\n}\n";
        let err = contract_of(src, "f").unwrap_err();
        assert!(matches!(&err, VerifyError::IllFormedContract { message, .. } if message == "nested old(...)"));
    }

    #[test]
    fn test_result_in_precondition_rejected() {
        let src = "package p\nrequires n > 0\nfunc f() (n int) {\n  return 1\n}\n";
        let err = contract_of(src, "f").unwrap_err();
        assert_eq!(err.message(), "precondition mentions result `n`");
    }

    #[test]
    fn test_acc_under_disjunction_rejected() {
        let src = "package p\ntype T struct {\n  W int\n}\nrequires x > 0 || acc(r.W)\nfunc g(x int, r *T) {\n}\n";
        assert!(contract_of(src, "g").is_err());
    }

    #[test]
    fn test_pure_definition_and_ghost_params() {
        let src = "package p\npure func sq(x int) int {\n  return x * x\n}\nfunc h(ghost m mset[int], y int) (ghost n int) {\n  n = |m|\n  return\n}\n";
        let sq = contract_of(src, "sq").unwrap();
        assert_eq!(sq.pure_body.map(|b| b.node.to_string()).as_deref(), Some("x * x"));
        let h = contract_of(src, "h").unwrap();
        assert_eq!(h.ghost_params.len(), 1);
        assert_eq!(h.ghost_results.len(), 1);
        assert!(h.is_trivial());
    }

    #[test]
    fn test_conjuncts_flatten_left_to_right() {
        let src = "package p\ntype T struct {\n  W, H int\n}\nrequires acc(r.W) && acc(r.H) && r.W > 0\nfunc (r *T) M() {\n}\n";
        let contract = contract_of(src, "T.M").unwrap();
        let parts: Vec<String> = conjuncts(&contract.requires[0]).iter().map(|c| c.node.to_string()).collect();
        assert_eq!(parts, vec!["acc(r.W)", "acc(r.H)", "r.W > 0"]);
    }
}
