//! Ghost discipline
//!
//! A statement is ghost when written with `ghost`, when it sits in a ghost
//! function, or when every target it assigns is ghost. Ghost statements may
//! only write ghost state and call ghost or pure functions; real statements
//! may not read ghost state or call ghost functions. Assertions, assumptions
//! and loop invariants are specification and may do either.

use crate::ast::{Block, Expr, Spanned, Stmt, StmtKind, UnOp};
use crate::error::{Result, VerifyError};
use crate::resolver::{Binding, Bindings, MethodForm, Signature};
use crate::symbols::{DeclId, FileId, SymbolTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Real,
    Ghost,
    Spec,
}

/// Check the body of `decl`; declarations without a body pass trivially.
pub fn check_ghost(table: &SymbolTable, bindings: &Bindings, decl: DeclId) -> Result<()> {
    let declaration = table.decl(decl);
    let (Some(def), Some(signature)) = (declaration.func(), bindings.signature(decl)) else {
        return Ok(());
    };
    let Some(body) = &def.body else {
        return Ok(());
    };
    let checker = GhostChecker {
        table,
        bindings,
        decl,
        file: declaration.file,
        signature,
    };
    let mode = if def.ghost { Mode::Ghost } else { Mode::Real };
    checker.block(body, mode)
}

struct GhostChecker<'a> {
    table: &'a SymbolTable,
    bindings: &'a Bindings,
    decl: DeclId,
    file: FileId,
    signature: &'a Signature,
}

impl GhostChecker<'_> {
    fn violation<T>(&self, message: String, span: crate::ast::Span) -> Result<T> {
        Err(VerifyError::ghost_violation(
            self.table.decl(self.decl).name.to_string(),
            message,
            self.table.site(self.file, span),
        ))
    }

    fn block(&self, block: &Block, mode: Mode) -> Result<()> {
        block.stmts.iter().try_for_each(|stmt| self.stmt(stmt, mode))
    }

    fn stmt(&self, stmt: &Stmt, outer: Mode) -> Result<()> {
        let mode = if outer == Mode::Ghost || stmt.ghost || self.assigns_only_ghost(stmt) {
            Mode::Ghost
        } else {
            outer
        };
        match &stmt.kind {
            StmtKind::VarDecl { init, .. } => match init {
                Some(init) => self.expr(init, mode),
                None => Ok(()),
            },
            StmtKind::ShortVarDecl { values, .. } => values.iter().try_for_each(|v| self.expr(v, mode)),
            StmtKind::Assign { targets, values } => {
                for target in targets {
                    let ghost_target = self.is_ghost_target(target);
                    if mode == Mode::Ghost && !ghost_target {
                        return self.violation(format!("ghost code assigns non-ghost `{}`", target.node), target.span);
                    }
                    self.target(target, mode)?;
                }
                if targets.len() == values.len() {
                    for (target, value) in targets.iter().zip(values) {
                        let value_mode = if self.is_ghost_target(target) { Mode::Ghost } else { mode };
                        self.expr(value, value_mode)?;
                    }
                    Ok(())
                } else {
                    values.iter().try_for_each(|v| self.expr(v, mode))
                }
            }
            StmtKind::Assert(e) | StmtKind::Assume(e) => self.expr(e, Mode::Spec),
            StmtKind::Return(values) => {
                if values.len() == self.signature.results.len() {
                    for (value, result) in values.iter().zip(&self.signature.results) {
                        self.expr(value, if result.ghost { Mode::Ghost } else { mode })?;
                    }
                    Ok(())
                } else {
                    values.iter().try_for_each(|v| self.expr(v, mode))
                }
            }
            StmtKind::If {
                cond,
                then_block,
                else_block,
            } => {
                self.expr(cond, mode)?;
                self.block(then_block, mode)?;
                match else_block {
                    Some(block) => self.block(block, mode),
                    None => Ok(()),
                }
            }
            StmtKind::For { invariants, cond, body } => {
                for inv in invariants {
                    self.expr(inv, Mode::Spec)?;
                }
                if let Some(cond) = cond {
                    self.expr(cond, mode)?;
                }
                self.block(body, mode)
            }
            StmtKind::Expr(e) => self.expr(e, mode),
            StmtKind::Block(block) => self.block(block, mode),
        }
    }

    fn assigns_only_ghost(&self, stmt: &Stmt) -> bool {
        match &stmt.kind {
            StmtKind::Assign { targets, .. } => !targets.is_empty() && targets.iter().all(|t| self.is_ghost_target(t)),
            _ => false,
        }
    }

    fn is_ghost_target(&self, target: &Spanned<Expr>) -> bool {
        match self.bindings.binding(self.file, target.span) {
            Some(Binding::Local(local)) => local.ghost,
            Some(Binding::Field { owner, name }) => self.field_is_ghost(*owner, name),
            _ => false,
        }
    }

    fn field_is_ghost(&self, owner: DeclId, name: &str) -> bool {
        self.bindings
            .layout(owner)
            .and_then(|layout| layout.field(name))
            .is_some_and(|(_, f)| f.ghost)
    }

    /// Sub-expressions of an assignment target that are evaluated
    fn target(&self, target: &Spanned<Expr>, mode: Mode) -> Result<()> {
        match &target.node {
            Expr::Ident(_) => Ok(()),
            Expr::Selector { base, .. } => self.expr(base, mode),
            Expr::Unary { op: UnOp::Deref, expr } => self.expr(expr, mode),
            _ => self.expr(target, mode),
        }
    }

    fn expr(&self, expr: &Spanned<Expr>, mode: Mode) -> Result<()> {
        stacker::maybe_grow(128 * 1024, 4 * 1024 * 1024, || self.expr_inner(expr, mode))
    }

    fn expr_inner(&self, expr: &Spanned<Expr>, mode: Mode) -> Result<()> {
        match &expr.node {
            Expr::Ident(name) => {
                if mode == Mode::Real
                    && let Some(Binding::Local(local)) = self.bindings.binding(self.file, expr.span)
                    && local.ghost
                {
                    return self.violation(format!("non-ghost code reads ghost `{name}`"), expr.span);
                }
                Ok(())
            }
            Expr::Selector { base, field } => {
                if mode == Mode::Real
                    && let Some(Binding::Field { owner, name }) = self.bindings.binding(self.file, expr.span)
                    && self.field_is_ghost(*owner, name)
                {
                    return self.violation(format!("non-ghost code reads ghost field `{}`", field.node), field.span);
                }
                match self.bindings.binding(self.file, base.span) {
                    Some(Binding::Package(_) | Binding::Type(_)) => Ok(()),
                    _ => self.expr(base, mode),
                }
            }
            Expr::Call { callee, args } => self.call(expr, callee, args, mode),
            Expr::Old(inner) | Expr::Acc(inner) => self.expr(inner, Mode::Spec),
            _ => expr.node.children().into_iter().try_for_each(|child| self.expr(child, mode)),
        }
    }

    fn call(&self, call: &Spanned<Expr>, callee: &Spanned<Expr>, args: &[Spanned<Expr>], mode: Mode) -> Result<()> {
        let Some((target, receivers)) = self.bindings.call_target(self.file, callee) else {
            return args.iter().try_for_each(|a| self.expr(a, mode));
        };
        let decl = self.table.decl(target);
        let pure = decl.func().is_some_and(|f| f.pure);
        match mode {
            Mode::Real if decl.is_ghost() => {
                return self.violation(format!("non-ghost code calls ghost function `{}`", decl.name), call.span);
            }
            Mode::Ghost if !decl.is_ghost() && !pure => {
                return self.violation(format!("ghost code calls non-ghost function `{}`", decl.name), call.span);
            }
            _ => {}
        }

        if let Expr::Selector { base, .. } = &callee.node
            && matches!(self.bindings.binding(self.file, callee.span), Some(Binding::Method { form: MethodForm::Value, .. }))
        {
            self.expr(base, mode)?;
        }
        let params = self.bindings.signature(target).map(|s| s.params.as_slice()).unwrap_or(&[]);
        for (i, arg) in args.iter().enumerate() {
            let ghost_param = i >= receivers && params.get(i - receivers).is_some_and(|p| p.ghost);
            let arg_mode = if ghost_param && mode != Mode::Spec { Mode::Ghost } else { mode };
            self.expr(arg, arg_mode)?;
        }
        Ok(())
    }
}
