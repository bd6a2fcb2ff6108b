//! Symbolic execution of one body
//!
//! Paths fork at `if` and are never joined. Calls are modular: the callee's
//! precondition is checked, its permissions are exhaled and the fields they
//! cover havocked, then its postcondition is inhaled. Loops are cut at their
//! invariants.

use std::collections::{BTreeMap, BTreeSet};

use super::state::{Heap, Location, Names, ObjId, Object, State, Value};
use super::{ObligationKind, VcContext};
use crate::ast::{BinOp, Block, Expr, Span, Spanned, Stmt, StmtKind, UnOp};
use crate::contract::{Contract, conjuncts, visit};
use crate::error::{Result, VerifyError};
use crate::logic::{ArithOp, BagOp, Sort, Term, simplify};
use crate::resolver::{Binding, LocalBinding, LocalId, MethodForm, Signature, StructLayout};
use crate::symbols::{DeclId, FileId};
use crate::types::Ty;

/// How often a pure definition is unfolded inside another one
const PURE_UNFOLD_DEPTH: usize = 3;

/// An obligation before per-site merging
#[derive(Debug, Clone)]
pub(super) struct Pending {
    pub kind: ObligationKind,
    pub span: Span,
    /// Distinguishes conjuncts of one callee precondition at the same call
    pub clause: usize,
    pub description: String,
    pub assumptions: Vec<Term>,
    pub goal: Term,
}

/// What an expression is evaluated against
#[derive(Clone, Copy)]
struct Frame<'f> {
    file: FileId,
    locals: &'f BTreeMap<LocalId, Value>,
    snapshots: &'f [Value],
    /// Field reads need a held permission
    check_perms: bool,
}

pub(super) struct Executor<'a> {
    ctx: &'a VcContext<'a>,
    name: String,
    file: FileId,
    span: Span,
    contract: &'a Contract,
    signature: &'a Signature,
    names: Names,
    objects: Vec<Object>,
    /// Value of a field never written since its object appeared
    initial: BTreeMap<Location, Value>,
    entry_heap: Heap,
    entry_snapshots: Vec<Value>,
    pending: Vec<Pending>,
    depth: usize,
    /// Set while unfolding pure definitions: no obligations are recorded
    quiet: bool,
}

impl<'a> Executor<'a> {
    pub(super) fn new(ctx: &'a VcContext<'a>, decl: DeclId, contract: &'a Contract, signature: &'a Signature) -> Self {
        let declaration = ctx.table.decl(decl);
        Self {
            ctx,
            name: declaration.name.to_string(),
            file: declaration.file,
            span: declaration.span,
            contract,
            signature,
            names: Names::default(),
            objects: Vec::new(),
            initial: BTreeMap::new(),
            entry_heap: Heap::default(),
            entry_snapshots: Vec::new(),
            pending: Vec::new(),
            depth: 0,
            quiet: false,
        }
    }

    pub(super) fn run(mut self, body: &Block) -> Result<Vec<Pending>> {
        let mut st = State::default();
        self.enter(&mut st)?;
        let ends = self.block(&body.stmts, vec![st])?;
        for st in ends {
            self.finish(st)?;
        }
        Ok(self.pending)
    }

    // ------------------------------------------------------------------
    // Entry and exit
    // ------------------------------------------------------------------

    fn enter(&mut self, st: &mut State) -> Result<()> {
        let signature = self.signature;
        let contract = self.contract;
        for local in signature.receiver.iter().chain(&signature.params) {
            let value = self.fresh(&local.ty, &local.name, &mut st.heap, self.span)?;
            st.locals.insert(local.id, value);
        }
        for local in &signature.results {
            let value = self.zero(&local.ty, &mut st.heap, self.span)?;
            st.locals.insert(local.id, value);
        }

        let State { locals, heap, path } = st;
        let frame = Frame {
            file: contract.file,
            locals,
            snapshots: &[],
            check_perms: false,
        };
        for clause in &contract.requires {
            for conj in conjuncts(clause) {
                if let Expr::Acc(inner) = &conj.node {
                    let loc = self.location(frame, heap, path, inner)?;
                    heap.grant(loc);
                } else {
                    let t = self.term(frame, heap, path, conj)?;
                    path.push(t);
                }
            }
        }
        let mut snapshots = Vec::with_capacity(contract.snapshots.len());
        for snapshot in &contract.snapshots {
            snapshots.push(self.eval(frame, heap, path, snapshot)?);
        }
        self.entry_snapshots = snapshots;
        self.entry_heap = heap.clone();
        tracing::trace!(decl = %self.name, assumptions = path.len(), "entered body");
        Ok(())
    }

    /// Postconditions at a return point
    fn finish(&mut self, mut st: State) -> Result<()> {
        let contract = self.contract;
        let snapshots = self.entry_snapshots.clone();
        let State { locals, heap, path } = &mut st;
        let frame = Frame {
            file: contract.file,
            locals,
            snapshots: &snapshots,
            check_perms: false,
        };
        for clause in &contract.ensures {
            for conj in conjuncts(clause) {
                if let Expr::Acc(inner) = &conj.node {
                    let loc = self.location(frame, heap, path, inner)?;
                    if !heap.holds(&loc) {
                        self.fail_permission(conj.span, format!("permission to {} at return", inner.node), path);
                    }
                } else {
                    let goal = self.term(frame, heap, path, conj)?;
                    let description = format!("postcondition of {}", self.name);
                    self.obligation(ObligationKind::Postcondition, conj.span, 0, description, path, goal);
                }
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn block(&mut self, stmts: &[Stmt], mut states: Vec<State>) -> Result<Vec<State>> {
        for stmt in stmts {
            let mut next = Vec::with_capacity(states.len());
            for st in states {
                next.extend(self.stmt(stmt, st)?);
            }
            if next.len() > self.ctx.max_paths {
                return Err(self.unsupported(
                    self.file,
                    stmt.span,
                    format!("more than {} execution paths", self.ctx.max_paths),
                ));
            }
            states = next;
            if states.is_empty() {
                break;
            }
        }
        Ok(states)
    }

    fn stmt(&mut self, stmt: &Stmt, st: State) -> Result<Vec<State>> {
        stacker::maybe_grow(128 * 1024, 4 * 1024 * 1024, || self.stmt_inner(stmt, st))
    }

    fn stmt_inner(&mut self, stmt: &Stmt, mut st: State) -> Result<Vec<State>> {
        let file = self.file;
        match &stmt.kind {
            StmtKind::VarDecl { name, init, .. } => {
                let local = self.local_at(file, name.span)?;
                let State { locals, heap, path } = &mut st;
                let value = match init {
                    Some(init) => self.value_of(body_frame(file, locals), heap, path, init)?,
                    None => self.zero(&local.ty, heap, name.span)?,
                };
                locals.insert(local.id, value);
            }
            StmtKind::ShortVarDecl { names, values } => {
                let State { locals, heap, path } = &mut st;
                let mut computed = self.values(body_frame(file, locals), heap, path, values)?;
                if computed.len() == 1 && names.len() > 1 {
                    computed = computed.pop().map(Value::spread).unwrap_or_default();
                }
                if computed.len() != names.len() {
                    return Err(self.unsupported(file, stmt.span, "mismatched number of values"));
                }
                for (name, value) in names.iter().zip(computed) {
                    let local = self.local_at(file, name.name.span)?;
                    locals.insert(local.id, value);
                }
            }
            StmtKind::Assign { targets, values } => {
                let State { locals, heap, path } = &mut st;
                let mut computed = self.values(body_frame(file, locals), heap, path, values)?;
                if computed.len() == 1 && targets.len() > 1 {
                    computed = computed.pop().map(Value::spread).unwrap_or_default();
                }
                if computed.len() != targets.len() {
                    return Err(self.unsupported(file, stmt.span, "mismatched number of values"));
                }
                for (target, value) in targets.iter().zip(computed) {
                    self.assign(&mut st, target, value)?;
                }
            }
            StmtKind::Assert(e) => {
                let State { locals, heap, path } = &mut st;
                let goal = self.term(body_frame(file, locals), heap, path, e)?;
                let line = self.ctx.table.site(file, stmt.span).line;
                self.obligation(
                    ObligationKind::Assertion,
                    stmt.span,
                    0,
                    format!("assertion at line {line}"),
                    path,
                    goal.clone(),
                );
                path.push(goal);
            }
            StmtKind::Assume(e) => {
                let State { locals, heap, path } = &mut st;
                let t = self.term(body_frame(file, locals), heap, path, e)?;
                path.push(t);
            }
            StmtKind::Expr(e) => {
                let State { locals, heap, path } = &mut st;
                self.eval(body_frame(file, locals), heap, path, e)?;
            }
            StmtKind::Return(values) => {
                let State { locals, heap, path } = &mut st;
                let mut computed = self.values(body_frame(file, locals), heap, path, values)?;
                let results = &self.signature.results;
                if computed.len() == 1 && results.len() > 1 {
                    computed = computed.pop().map(Value::spread).unwrap_or_default();
                }
                if !computed.is_empty() {
                    if computed.len() != results.len() {
                        return Err(self.unsupported(file, stmt.span, "mismatched number of results"));
                    }
                    for (result, value) in results.iter().zip(computed) {
                        locals.insert(result.id, value);
                    }
                }
                self.finish(st)?;
                return Ok(Vec::new());
            }
            StmtKind::If {
                cond,
                then_block,
                else_block,
            } => {
                let State { locals, heap, path } = &mut st;
                let c = self.term(body_frame(file, locals), heap, path, cond)?;
                let folded = simplify(&c).as_bool();
                let mut out = Vec::new();
                if folded != Some(false) {
                    let mut taken = st.clone();
                    taken.path.push(c.clone());
                    out.extend(self.block(&then_block.stmts, vec![taken])?);
                }
                if folded != Some(true) {
                    st.path.push(Term::not(c));
                    match else_block {
                        Some(block) => out.extend(self.block(&block.stmts, vec![st])?),
                        None => out.push(st),
                    }
                }
                return Ok(out);
            }
            StmtKind::For { invariants, cond, body } => return self.for_loop(st, invariants, cond.as_ref(), body),
            StmtKind::Block(block) => return self.block(&block.stmts, vec![st]),
        }
        Ok(vec![st])
    }

    fn for_loop(
        &mut self,
        mut st: State,
        invariants: &[Spanned<Expr>],
        cond: Option<&Spanned<Expr>>,
        body: &Block,
    ) -> Result<Vec<State>> {
        let invariants: Vec<&Spanned<Expr>> = invariants.iter().flat_map(conjuncts).collect();
        self.check_invariants(&mut st, &invariants, ObligationKind::InvariantEntry, "loop invariant holds on entry")?;
        self.havoc_loop_targets(&mut st, body)?;

        let file = self.file;
        {
            let State { locals, heap, path } = &mut st;
            let frame = Frame {
                check_perms: false,
                ..body_frame(file, locals)
            };
            for inv in &invariants {
                if !matches!(inv.node, Expr::Acc(_)) {
                    let t = self.term(frame, heap, path, inv)?;
                    path.push(t);
                }
            }
        }
        let c = match cond {
            Some(cond) => {
                let State { locals, heap, path } = &mut st;
                self.term(body_frame(file, locals), heap, path, cond)?
            }
            None => Term::Bool(true),
        };

        let mut inside = st.clone();
        inside.path.push(c.clone());
        for mut end in self.block(&body.stmts, vec![inside])? {
            self.check_invariants(&mut end, &invariants, ObligationKind::InvariantPreserved, "loop invariant is preserved")?;
        }

        st.path.push(Term::not(c));
        if simplify(&Term::and(st.path.clone())).as_bool() == Some(false) {
            return Ok(Vec::new());
        }
        Ok(vec![st])
    }

    fn check_invariants(
        &mut self,
        st: &mut State,
        invariants: &[&Spanned<Expr>],
        kind: ObligationKind,
        description: &str,
    ) -> Result<()> {
        let file = self.file;
        let State { locals, heap, path } = st;
        let frame = Frame {
            check_perms: false,
            ..body_frame(file, locals)
        };
        for inv in invariants {
            if let Expr::Acc(inner) = &inv.node {
                let loc = self.location(frame, heap, path, inner)?;
                if !heap.holds(&loc) {
                    self.fail_permission(inv.span, format!("permission to {} for loop invariant", inner.node), path);
                }
            } else {
                let goal = self.term(frame, heap, path, inv)?;
                self.obligation(kind, inv.span, 0, description.to_string(), path, goal);
            }
        }
        Ok(())
    }

    /// Forget what the loop body may change: assigned locals, and the
    /// permitted fields it writes (all permitted fields if it calls anything)
    fn havoc_loop_targets(&mut self, st: &mut State, body: &Block) -> Result<()> {
        let mut writes = Writes::default();
        writes.block(self.ctx.bindings, self.file, body);

        for id in &writes.locals {
            let Some(local) = self.ctx.bindings.local(*id) else {
                continue;
            };
            if st.locals.contains_key(id) {
                let value = self.fresh(&local.ty, &local.name, &mut st.heap, body.span)?;
                st.locals.insert(*id, value);
            }
        }
        let cells: Vec<Location> = st
            .heap
            .permissions()
            .filter(|(_, field)| writes.any_field || writes.fields.contains(field))
            .cloned()
            .collect();
        for loc in cells {
            let value = self.havoc_value(&mut st.heap, &loc, body.span)?;
            st.heap.write(loc, value);
        }
        Ok(())
    }

    fn assign(&mut self, st: &mut State, target: &Spanned<Expr>, value: Value) -> Result<()> {
        let file = self.file;
        let State { locals, heap, path } = st;
        match &target.node {
            Expr::Ident(_) => {
                let local = self.local_at(file, target.span)?;
                locals.insert(local.id, value);
            }
            Expr::Selector { base, field } => {
                let obj = self.object(body_frame(file, locals), heap, path, base)?;
                let loc = (obj, field.node.clone());
                if !heap.holds(&loc) {
                    self.fail_permission(target.span, format!("permission to write {}", target.node), path);
                }
                heap.write(loc, value);
            }
            Expr::Unary { op: UnOp::Deref, expr } => {
                let dst = self.object(body_frame(file, locals), heap, path, expr)?;
                let Value::Ref(src) = value else {
                    return Err(self.unsupported(file, target.span, "expected a struct value"));
                };
                let owner = self.objects[dst].owner;
                for field in self.layout(file, owner, target.span)?.fields.iter() {
                    let dst_loc = (dst, field.name.clone());
                    if !heap.holds(&dst_loc) {
                        self.fail_permission(target.span, format!("permission to write {}.{}", target.node, field.name), path);
                    }
                    let v = self.read_cell(heap, (src, field.name.clone()), target.span)?;
                    heap.write(dst_loc, v);
                }
            }
            _ => return Err(self.unsupported(file, target.span, "cannot assign to this expression")),
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    fn eval(&mut self, frame: Frame<'_>, heap: &mut Heap, path: &mut Vec<Term>, e: &Spanned<Expr>) -> Result<Value> {
        stacker::maybe_grow(128 * 1024, 4 * 1024 * 1024, || self.eval_inner(frame, heap, path, e))
    }

    fn eval_inner(&mut self, frame: Frame<'_>, heap: &mut Heap, path: &mut Vec<Term>, e: &Spanned<Expr>) -> Result<Value> {
        Ok(match &e.node {
            Expr::IntLit(n) => Value::Scalar(Term::int(i128::from(*n))),
            Expr::BoolLit(b) => Value::Scalar(Term::Bool(*b)),
            Expr::Ident(name) => match self.ctx.bindings.binding(frame.file, e.span) {
                Some(Binding::Local(local)) => frame
                    .locals
                    .get(&local.id)
                    .cloned()
                    .ok_or_else(|| self.unsupported(frame.file, e.span, format!("`{name}` has no value here")))?,
                _ => return Err(self.unsupported(frame.file, e.span, format!("`{name}` is not a value"))),
            },
            Expr::Selector { base, field } => {
                if !matches!(self.ctx.bindings.binding(frame.file, e.span), Some(Binding::Field { .. })) {
                    return Err(self.unsupported(frame.file, e.span, "method values must be called"));
                }
                let obj = self.object(frame, heap, path, base)?;
                let loc = (obj, field.node.clone());
                if frame.check_perms && !heap.holds(&loc) {
                    self.fail_permission(e.span, format!("permission to read {}", e.node), path);
                }
                self.read_cell(heap, loc, e.span)?
            }
            Expr::Call { callee, args } => self.call(frame, heap, path, e, callee, args)?,
            Expr::Binary { left, op, right } => self.binary(frame, heap, path, e, left, *op, right)?,
            Expr::Unary { op, expr } => match op {
                UnOp::Not => Value::Scalar(Term::not(self.term(frame, heap, path, expr)?)),
                UnOp::Neg => Value::Scalar(Term::Neg(Box::new(self.term(frame, heap, path, expr)?))),
                UnOp::AddrOf | UnOp::Deref => match self.eval(frame, heap, path, expr)? {
                    Value::Ref(obj) => Value::Ref(obj),
                    _ => return Err(self.unsupported(frame.file, e.span, "pointers are supported to structs only")),
                },
            },
            Expr::Cardinality(inner) => Value::Scalar(Term::card(self.term(frame, heap, path, inner)?)),
            Expr::Collection { kind, elems, .. } => {
                let elem = self
                    .ty_at(frame.file, e.span)
                    .and_then(|ty| ty.as_collection())
                    .and_then(|(_, elem)| Sort::of(elem))
                    .ok_or_else(|| self.unsupported(frame.file, e.span, "collection element type has no sort"))?;
                let mut terms = Vec::with_capacity(elems.len());
                for elem in elems {
                    terms.push(self.term(frame, heap, path, elem)?);
                }
                Value::Scalar(Term::Bag {
                    kind: *kind,
                    elem,
                    elems: terms,
                })
            }
            Expr::Composite { fields, .. } => self.composite(frame, heap, path, e, fields)?,
            Expr::Old(inner) => {
                let mut old = self.entry_heap.clone();
                let frame = Frame {
                    check_perms: false,
                    ..frame
                };
                self.eval(frame, &mut old, path, inner)?
            }
            Expr::Acc(inner) => {
                let loc = self.location(frame, heap, path, inner)?;
                Value::Scalar(Term::Bool(heap.holds(&loc)))
            }
            Expr::Snapshot(index) => frame
                .snapshots
                .get(*index)
                .cloned()
                .ok_or_else(|| self.unsupported(frame.file, e.span, "old(...) outside a postcondition"))?,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn binary(
        &mut self,
        frame: Frame<'_>,
        heap: &mut Heap,
        path: &mut Vec<Term>,
        e: &Spanned<Expr>,
        left: &Spanned<Expr>,
        op: BinOp,
        right: &Spanned<Expr>,
    ) -> Result<Value> {
        match op {
            BinOp::And => {
                let l = self.term(frame, heap, path, left)?;
                let r = self.guarded(frame, heap, path, l.clone(), right)?;
                return Ok(Value::Scalar(Term::and(vec![l, r])));
            }
            BinOp::Or => {
                let l = self.term(frame, heap, path, left)?;
                let r = self.guarded(frame, heap, path, Term::not(l.clone()), right)?;
                return Ok(Value::Scalar(Term::or(vec![l, r])));
            }
            BinOp::Implies => {
                let l = self.term(frame, heap, path, left)?;
                let r = self.guarded(frame, heap, path, l.clone(), right)?;
                return Ok(Value::Scalar(Term::implies(l, r)));
            }
            BinOp::Eq | BinOp::Ne => {
                let ty = self.ty_at(frame.file, left.span).cloned().unwrap_or(Ty::Int);
                let l = self.eval(frame, heap, path, left)?;
                let r = self.eval(frame, heap, path, right)?;
                let eq = self.equal(frame, heap, path, e.span, &ty, l, r)?;
                return Ok(Value::Scalar(if op == BinOp::Eq { eq } else { Term::not(eq) }));
            }
            _ => {}
        }

        let l = self.term(frame, heap, path, left)?;
        let r = self.term(frame, heap, path, right)?;
        Ok(Value::Scalar(match op {
            BinOp::Add => Term::add(l, r),
            BinOp::Sub => Term::sub(l, r),
            BinOp::Mul => Term::mul(l, r),
            BinOp::Div | BinOp::Mod => {
                let nonzero = Term::not(Term::eq(r.clone(), Term::int(0)));
                self.obligation(ObligationKind::DivisionByZero, e.span, 0, "divisor is non-zero".into(), path, nonzero);
                let arith = if op == BinOp::Div { ArithOp::Div } else { ArithOp::Mod };
                Term::arith(arith, l, r)
            }
            BinOp::Lt => Term::lt(l, r),
            BinOp::Le => Term::le(l, r),
            BinOp::Gt => Term::gt(l, r),
            BinOp::Ge => Term::ge(l, r),
            BinOp::In => Term::member(l, r),
            BinOp::Subset => Term::subset(l, r),
            BinOp::Multiplicity => Term::multiplicity(l, r),
            BinOp::Union => Term::bag_op(BagOp::Union, l, r),
            BinOp::Intersection => Term::bag_op(BagOp::Intersection, l, r),
            BinOp::SetMinus => Term::bag_op(BagOp::Difference, l, r),
            BinOp::And | BinOp::Or | BinOp::Implies | BinOp::Eq | BinOp::Ne => {
                return Err(self.unsupported(frame.file, e.span, "unexpected operator"));
            }
        }))
    }

    /// Evaluate `e` only where `guard` holds; assumptions it adds are
    /// kept under the guard
    fn guarded(&mut self, frame: Frame<'_>, heap: &mut Heap, path: &mut Vec<Term>, guard: Term, e: &Spanned<Expr>) -> Result<Term> {
        let mark = path.len();
        path.push(guard.clone());
        let t = self.term(frame, heap, path, e)?;
        let added: Vec<Term> = path.drain(mark + 1..).collect();
        path.truncate(mark);
        path.extend(added.into_iter().map(|a| Term::implies(guard.clone(), a)));
        Ok(t)
    }

    #[allow(clippy::too_many_arguments)]
    fn equal(&mut self, frame: Frame<'_>, heap: &mut Heap, path: &mut Vec<Term>, span: Span, ty: &Ty, l: Value, r: Value) -> Result<Term> {
        match (l, r) {
            (Value::Scalar(a), Value::Scalar(b)) => Ok(Term::eq(a, b)),
            (Value::Ref(a), Value::Ref(b)) => match ty {
                Ty::Struct(owner) => {
                    let mut parts = Vec::new();
                    for field in self.layout(frame.file, *owner, span)?.fields.iter() {
                        let x = self.read_field(frame, heap, path, span, (a, field.name.clone()))?;
                        let y = self.read_field(frame, heap, path, span, (b, field.name.clone()))?;
                        parts.push(self.equal(frame, heap, path, span, &field.ty, x, y)?);
                    }
                    Ok(Term::and(parts))
                }
                _ => Ok(Term::Bool(a == b)),
            },
            (Value::Unit, Value::Unit) => Ok(Term::Bool(true)),
            _ => Err(self.unsupported(frame.file, span, "cannot compare these values")),
        }
    }

    fn composite(
        &mut self,
        frame: Frame<'_>,
        heap: &mut Heap,
        path: &mut Vec<Term>,
        e: &Spanned<Expr>,
        fields: &[(Option<Spanned<String>>, Spanned<Expr>)],
    ) -> Result<Value> {
        let Some(Ty::Struct(owner)) = self.ty_at(frame.file, e.span).cloned() else {
            return Err(self.unsupported(frame.file, e.span, "composite literal of a non-struct type"));
        };
        let layout = self.layout(frame.file, owner, e.span)?;
        let mut given = BTreeMap::new();
        for (i, (key, value)) in fields.iter().enumerate() {
            let name = match key {
                Some(key) => key.node.clone(),
                None => layout
                    .fields
                    .get(i)
                    .map(|f| f.name.clone())
                    .ok_or_else(|| self.unsupported(frame.file, value.span, "too many values"))?,
            };
            let v = self.value_of(frame, heap, path, value)?;
            given.insert(name, v);
        }

        let obj = self.new_object(self.ctx.table.decl(owner).local_name().to_string(), owner);
        for field in &layout.fields {
            let v = match given.remove(&field.name) {
                Some(v) => v,
                None => self.zero(&field.ty, heap, e.span)?,
            };
            heap.write((obj, field.name.clone()), v);
            heap.grant((obj, field.name.clone()));
        }
        Ok(Value::Ref(obj))
    }

    fn call(
        &mut self,
        frame: Frame<'_>,
        heap: &mut Heap,
        path: &mut Vec<Term>,
        call: &Spanned<Expr>,
        callee: &Spanned<Expr>,
        args: &[Spanned<Expr>],
    ) -> Result<Value> {
        let ctx = self.ctx;
        let Some((target, receivers)) = ctx.bindings.call_target(frame.file, callee) else {
            return Err(self.unsupported(frame.file, callee.span, "call target is not a function"));
        };
        let declaration = ctx.table.decl(target);
        let callee_name = declaration.name.to_string();
        let contract = ctx.contracts.get(target).map_err(|_| {
            VerifyError::ill_formed(
                &self.name,
                format!("calls `{callee_name}` whose contract is ill-formed"),
                ctx.table.site(frame.file, call.span),
            )
        })?;
        let Some(signature) = ctx.bindings.signature(target) else {
            return Err(self.unsupported(frame.file, callee.span, "callee signature is missing"));
        };

        let mut callee_locals = BTreeMap::new();
        let mut args = args.iter();
        let receiver_expr = if receivers == 1 {
            args.next()
        } else {
            match (&callee.node, ctx.bindings.binding(frame.file, callee.span)) {
                (
                    Expr::Selector { base, .. },
                    Some(Binding::Method {
                        form: MethodForm::Value,
                        ..
                    }),
                ) => Some(base.as_ref()),
                _ => None,
            }
        };
        if let (Some(receiver), Some(expr)) = (&signature.receiver, receiver_expr) {
            let v = self.eval(frame, heap, path, expr)?;
            let v = self.copy_value(frame, heap, path, expr.span, &receiver.ty, v)?;
            callee_locals.insert(receiver.id, v);
        }
        for (param, arg) in signature.params.iter().zip(args) {
            let v = self.value_of(frame, heap, path, arg)?;
            callee_locals.insert(param.id, v);
        }

        let mut exhaled = Vec::new();
        {
            let pre = Frame {
                file: contract.file,
                locals: &callee_locals,
                snapshots: &[],
                check_perms: false,
            };
            for (index, conj) in contract.requires.iter().flat_map(conjuncts).enumerate() {
                if let Expr::Acc(inner) = &conj.node {
                    let loc = self.location(pre, heap, path, inner)?;
                    if !heap.holds(&loc) {
                        self.fail_permission(call.span, format!("permission to {} required by {callee_name}", inner.node), path);
                    }
                    exhaled.push(loc);
                } else {
                    let goal = self.term(pre, heap, path, conj)?;
                    let description = format!("precondition of {callee_name}");
                    self.obligation(ObligationKind::Precondition, call.span, index, description, path, goal);
                }
            }
        }

        let mut snapshots = Vec::with_capacity(contract.snapshots.len());
        for snapshot in &contract.snapshots {
            let pre = Frame {
                file: contract.file,
                locals: &callee_locals,
                snapshots: &[],
                check_perms: false,
            };
            snapshots.push(self.eval(pre, heap, path, snapshot)?);
        }

        for loc in exhaled {
            heap.revoke(&loc);
            let value = self.havoc_value(heap, &loc, call.span)?;
            heap.write(loc, value);
        }

        let scalar_args: Option<Vec<Term>> = signature
            .receiver
            .iter()
            .chain(&signature.params)
            .map(|local| callee_locals.get(&local.id).and_then(Value::as_term).cloned())
            .collect();
        let mut results = Vec::with_capacity(signature.results.len());
        for result in &signature.results {
            let value = match (contract.pure, Sort::of(&result.ty), &scalar_args) {
                (true, Some(sort), Some(args)) => Value::Scalar(Term::App {
                    func: callee_name.clone(),
                    args: args.clone(),
                    sort,
                }),
                _ => {
                    let base = format!("{}.{}", declaration.local_name(), result.name);
                    self.fresh(&result.ty, &base, heap, call.span)?
                }
            };
            callee_locals.insert(result.id, value.clone());
            results.push(value);
        }

        if let (Some(body), [Value::Scalar(result)]) = (&contract.pure_body, results.as_slice())
            && self.depth < PURE_UNFOLD_DEPTH
        {
            let definition = Frame {
                file: contract.file,
                locals: &callee_locals,
                snapshots: &[],
                check_perms: false,
            };
            let quiet = std::mem::replace(&mut self.quiet, true);
            self.depth += 1;
            let unfolded = self.term(definition, heap, path, body);
            self.depth -= 1;
            self.quiet = quiet;
            path.push(Term::eq(result.clone(), unfolded?));
        }

        let post = Frame {
            file: contract.file,
            locals: &callee_locals,
            snapshots: &snapshots,
            check_perms: false,
        };
        for conj in contract.ensures.iter().flat_map(conjuncts) {
            if let Expr::Acc(inner) = &conj.node {
                let loc = self.location(post, heap, path, inner)?;
                heap.grant(loc);
            } else {
                let t = self.term(post, heap, path, conj)?;
                path.push(t);
            }
        }
        tracing::trace!(caller = %self.name, callee = %callee_name, "inlined call contract");
        Ok(Value::gather(results))
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn term(&mut self, frame: Frame<'_>, heap: &mut Heap, path: &mut Vec<Term>, e: &Spanned<Expr>) -> Result<Term> {
        match self.eval(frame, heap, path, e)? {
            Value::Scalar(t) => Ok(t),
            _ => Err(self.unsupported(frame.file, e.span, "expected a scalar value")),
        }
    }

    /// Value of an expression that is stored somewhere: struct values
    /// read from a place are copied
    fn value_of(&mut self, frame: Frame<'_>, heap: &mut Heap, path: &mut Vec<Term>, e: &Spanned<Expr>) -> Result<Value> {
        let v = self.eval(frame, heap, path, e)?;
        if is_place(e)
            && let Some(ty) = self.ty_at(frame.file, e.span)
        {
            return self.copy_value(frame, heap, path, e.span, ty, v);
        }
        Ok(v)
    }

    fn values(&mut self, frame: Frame<'_>, heap: &mut Heap, path: &mut Vec<Term>, exprs: &[Spanned<Expr>]) -> Result<Vec<Value>> {
        let mut out = Vec::with_capacity(exprs.len());
        for e in exprs {
            out.push(self.value_of(frame, heap, path, e)?);
        }
        Ok(out)
    }

    /// Copy a struct value into a fresh object; other values are shared
    fn copy_value(&mut self, frame: Frame<'_>, heap: &mut Heap, path: &mut Vec<Term>, span: Span, ty: &Ty, v: Value) -> Result<Value> {
        let (Ty::Struct(owner), Value::Ref(src)) = (ty, &v) else {
            return Ok(v);
        };
        let name = self.objects[*src].name.clone();
        let copy = self.new_object(name, *owner);
        for field in self.layout(frame.file, *owner, span)?.fields.iter() {
            let value = self.read_field(frame, heap, path, span, (*src, field.name.clone()))?;
            let value = self.copy_value(frame, heap, path, span, &field.ty, value)?;
            heap.write((copy, field.name.clone()), value);
            heap.grant((copy, field.name.clone()));
        }
        Ok(Value::Ref(copy))
    }

    fn read_field(&mut self, frame: Frame<'_>, heap: &mut Heap, path: &[Term], span: Span, loc: Location) -> Result<Value> {
        if frame.check_perms && !heap.holds(&loc) {
            let name = self.objects[loc.0].name.clone();
            self.fail_permission(span, format!("permission to read {name}.{}", loc.1), path);
        }
        self.read_cell(heap, loc, span)
    }

    fn read_cell(&mut self, heap: &mut Heap, loc: Location, span: Span) -> Result<Value> {
        if let Some(v) = heap.cell(&loc) {
            return Ok(v.clone());
        }
        if let Some(v) = self.initial.get(&loc) {
            return Ok(v.clone());
        }
        let v = self.havoc_value(heap, &loc, span)?;
        self.initial.insert(loc, v.clone());
        Ok(v)
    }

    /// A fresh value for a field
    fn havoc_value(&mut self, heap: &mut Heap, loc: &Location, span: Span) -> Result<Value> {
        let Object { name, owner } = self.objects[loc.0].clone();
        let ty = self
            .layout(self.file, owner, span)?
            .field(&loc.1)
            .map(|(_, f)| f.ty.clone())
            .ok_or_else(|| self.unsupported(self.file, span, format!("no field `{}`", loc.1)))?;
        self.fresh(&ty, &format!("{name}.{}", loc.1), heap, span)
    }

    fn location(&mut self, frame: Frame<'_>, heap: &mut Heap, path: &mut Vec<Term>, target: &Spanned<Expr>) -> Result<Location> {
        let Expr::Selector { base, field } = &target.node else {
            return Err(self.unsupported(frame.file, target.span, "expected a field access"));
        };
        let obj = self.object(frame, heap, path, base)?;
        Ok((obj, field.node.clone()))
    }

    fn object(&mut self, frame: Frame<'_>, heap: &mut Heap, path: &mut Vec<Term>, e: &Spanned<Expr>) -> Result<ObjId> {
        match self.eval(frame, heap, path, e)? {
            Value::Ref(obj) => Ok(obj),
            _ => Err(self.unsupported(frame.file, e.span, "expected a struct or pointer")),
        }
    }

    /// Unconstrained value of a type. Struct values own their fields,
    /// pointees start without permissions.
    fn fresh(&mut self, ty: &Ty, base: &str, heap: &mut Heap, span: Span) -> Result<Value> {
        Ok(match ty {
            Ty::Struct(owner) => {
                let obj = self.new_object(base.to_string(), *owner);
                for field in self.layout(self.file, *owner, span)?.fields.iter() {
                    heap.grant((obj, field.name.clone()));
                }
                Value::Ref(obj)
            }
            Ty::Pointer(inner) => match inner.as_ref() {
                Ty::Struct(owner) => Value::Ref(self.new_object(base.to_string(), *owner)),
                _ => return Err(self.unsupported(self.file, span, "pointers are supported to structs only")),
            },
            Ty::Unit => Value::Unit,
            Ty::Tuple(items) => {
                let mut values = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    values.push(self.fresh(item, &format!("{base}.{i}"), heap, span)?);
                }
                Value::Tuple(values)
            }
            scalar => {
                let sort = Sort::of(scalar).ok_or_else(|| self.unsupported(self.file, span, "type has no sort"))?;
                Value::Scalar(Term::var(self.names.fresh(base), sort))
            }
        })
    }

    /// Go zero value
    fn zero(&mut self, ty: &Ty, heap: &mut Heap, span: Span) -> Result<Value> {
        Ok(match ty {
            Ty::Int | Ty::Perm => Value::Scalar(Term::int(0)),
            Ty::Bool => Value::Scalar(Term::Bool(false)),
            Ty::Set(_) | Ty::Multiset(_) => {
                let Some((kind, elem)) = Sort::of(ty).and_then(|s| s.as_collection().map(|(k, e)| (k, e.clone()))) else {
                    return Err(self.unsupported(self.file, span, "collection element type has no sort"));
                };
                Value::Scalar(Term::Bag {
                    kind,
                    elem,
                    elems: Vec::new(),
                })
            }
            Ty::Struct(owner) => {
                let obj = self.new_object(self.ctx.table.decl(*owner).local_name().to_string(), *owner);
                for field in self.layout(self.file, *owner, span)?.fields.iter() {
                    let v = self.zero(&field.ty, heap, span)?;
                    heap.write((obj, field.name.clone()), v);
                    heap.grant((obj, field.name.clone()));
                }
                Value::Ref(obj)
            }
            Ty::Pointer(inner) => match inner.as_ref() {
                Ty::Struct(owner) => Value::Ref(self.new_object("nil".to_string(), *owner)),
                _ => return Err(self.unsupported(self.file, span, "pointers are supported to structs only")),
            },
            Ty::Unit | Ty::Tuple(_) => Value::Unit,
        })
    }

    fn new_object(&mut self, name: String, owner: DeclId) -> ObjId {
        self.objects.push(Object { name, owner });
        self.objects.len() - 1
    }

    fn layout(&self, file: FileId, owner: DeclId, span: Span) -> Result<&'a StructLayout> {
        self.ctx
            .bindings
            .layout(owner)
            .ok_or_else(|| self.unsupported(file, span, "struct layout is missing"))
    }

    fn ty_at(&self, file: FileId, span: Span) -> Option<&'a Ty> {
        self.ctx.bindings.ty(file, span)
    }

    fn local_at(&self, file: FileId, span: Span) -> Result<LocalBinding> {
        match self.ctx.bindings.binding(file, span) {
            Some(Binding::Local(local)) => Ok(local.clone()),
            _ => Err(self.unsupported(file, span, "expected a local variable")),
        }
    }

    fn obligation(&mut self, kind: ObligationKind, span: Span, clause: usize, description: String, path: &[Term], goal: Term) {
        if self.quiet {
            return;
        }
        let assumptions = path.to_vec();
        if simplify(&Term::and(assumptions.clone())).as_bool() == Some(false) {
            return;
        }
        self.pending.push(Pending {
            kind,
            span,
            clause,
            description,
            assumptions,
            goal,
        });
    }

    fn fail_permission(&mut self, span: Span, description: String, path: &[Term]) {
        self.obligation(ObligationKind::Permission, span, 0, description, path, Term::Bool(false));
    }

    fn unsupported(&self, file: FileId, span: Span, message: impl Into<String>) -> VerifyError {
        VerifyError::unsupported(&self.name, message, self.ctx.table.site(file, span))
    }
}

fn body_frame(file: FileId, locals: &BTreeMap<LocalId, Value>) -> Frame<'_> {
    Frame {
        file,
        locals,
        snapshots: &[],
        check_perms: true,
    }
}

/// Expressions that denote storage rather than a new value
fn is_place(e: &Spanned<Expr>) -> bool {
    matches!(
        e.node,
        Expr::Ident(_) | Expr::Selector { .. } | Expr::Unary { op: UnOp::Deref, .. }
    )
}

/// What a loop body may write
#[derive(Debug, Default)]
struct Writes {
    locals: BTreeSet<LocalId>,
    fields: BTreeSet<String>,
    /// Calls and writes through `*p` may touch any permitted field
    any_field: bool,
}

impl Writes {
    fn block(&mut self, bindings: &crate::resolver::Bindings, file: FileId, block: &Block) {
        for stmt in &block.stmts {
            self.stmt(bindings, file, stmt);
        }
    }

    fn stmt(&mut self, bindings: &crate::resolver::Bindings, file: FileId, stmt: &Stmt) {
        let mut exprs: Vec<&Spanned<Expr>> = Vec::new();
        match &stmt.kind {
            StmtKind::VarDecl { init, .. } => exprs.extend(init.iter()),
            StmtKind::ShortVarDecl { values, .. } => exprs.extend(values),
            StmtKind::Assign { targets, values } => {
                for target in targets {
                    match &target.node {
                        Expr::Ident(_) => {
                            if let Some(Binding::Local(local)) = bindings.binding(file, target.span) {
                                self.locals.insert(local.id);
                            }
                        }
                        Expr::Selector { field, .. } => {
                            self.fields.insert(field.node.clone());
                        }
                        _ => self.any_field = true,
                    }
                }
                exprs.extend(targets);
                exprs.extend(values);
            }
            StmtKind::Assert(e) | StmtKind::Assume(e) | StmtKind::Expr(e) => exprs.push(e),
            StmtKind::Return(values) => exprs.extend(values),
            StmtKind::If {
                cond,
                then_block,
                else_block,
            } => {
                exprs.push(cond);
                self.block(bindings, file, then_block);
                if let Some(block) = else_block {
                    self.block(bindings, file, block);
                }
            }
            StmtKind::For { invariants, cond, body } => {
                exprs.extend(invariants);
                exprs.extend(cond.iter());
                self.block(bindings, file, body);
            }
            StmtKind::Block(block) => self.block(bindings, file, block),
        }
        for e in exprs {
            visit(e, &mut |sub| {
                if matches!(sub.node, Expr::Call { .. }) {
                    self.any_field = true;
                }
            });
        }
    }
}
