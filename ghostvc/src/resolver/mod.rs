//! Name resolution
//!
//! Binds every identifier and selector of every body and contract to
//! exactly one declaration or local, and records the static type of each
//! expression. Resolution is nominal: methods are found through the
//! declared receiver type, never by signature.

mod scope;

pub use scope::ScopeStack;

use std::collections::BTreeMap;

use serde::Serialize;

use crate::ast::*;
use crate::error::{Result, VerifyError};
use crate::symbols::{DeclId, DeclKind, FileId, PackageId, ResolutionContext, SymbolTable};
use crate::types::Ty;
use crate::util::suggest;

/// An occurrence in the source: file plus span
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SiteId {
    pub file: FileId,
    pub span: Span,
}

/// Local variable identity: owning declaration and declaration order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct LocalId {
    pub owner: DeclId,
    pub index: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LocalKind {
    Receiver,
    Param,
    Result,
    Var,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocalBinding {
    pub id: LocalId,
    pub name: String,
    pub kind: LocalKind,
    pub ghost: bool,
    pub ty: Ty,
    /// Declared with `x!`, may have its address taken
    pub addressable: bool,
}

/// `x.M(...)` versus `(*T).M(&x, ...)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MethodForm {
    Value,
    Expression,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Binding {
    Local(LocalBinding),
    Package(PackageId),
    Type(DeclId),
    /// Predeclared type such as `int`
    BuiltinType(Ty),
    Function(DeclId),
    Method {
        method: DeclId,
        receiver: DeclId,
        form: MethodForm,
    },
    Field {
        owner: DeclId,
        name: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldInfo {
    pub name: String,
    pub ty: Ty,
    pub ghost: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StructLayout {
    pub fields: Vec<FieldInfo>,
}

impl StructLayout {
    pub fn field(&self, name: &str) -> Option<(usize, &FieldInfo)> {
        self.fields.iter().enumerate().find(|(_, f)| f.name == name)
    }
}

/// Resolved signature of a function or method
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Signature {
    pub receiver: Option<LocalBinding>,
    pub params: Vec<LocalBinding>,
    pub results: Vec<LocalBinding>,
}

impl Signature {
    /// Type of a call expression
    pub fn result_ty(&self) -> Ty {
        match self.results.as_slice() {
            [] => Ty::Unit,
            [single] => single.ty.clone(),
            many => Ty::Tuple(many.iter().map(|r| r.ty.clone()).collect()),
        }
    }

    /// Receiver takes a pointer (`func (r *T)`)
    pub fn pointer_receiver(&self) -> bool {
        self.receiver.as_ref().is_some_and(|r| matches!(r.ty, Ty::Pointer(_)))
    }
}

/// Output of resolution: derived data, a pure function of the program
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bindings {
    sites: BTreeMap<SiteId, Binding>,
    types: BTreeMap<SiteId, Ty>,
    signatures: BTreeMap<DeclId, Signature>,
    layouts: BTreeMap<DeclId, StructLayout>,
    locals: BTreeMap<LocalId, LocalBinding>,
    /// Contract clauses that failed to resolve, as `IllFormedContract`
    clause_errors: BTreeMap<DeclId, VerifyError>,
}

impl Bindings {
    pub fn binding(&self, file: FileId, span: Span) -> Option<&Binding> {
        self.sites.get(&SiteId { file, span })
    }

    pub fn ty(&self, file: FileId, span: Span) -> Option<&Ty> {
        self.types.get(&SiteId { file, span })
    }

    pub fn signature(&self, decl: DeclId) -> Option<&Signature> {
        self.signatures.get(&decl)
    }

    pub fn layout(&self, decl: DeclId) -> Option<&StructLayout> {
        self.layouts.get(&decl)
    }

    pub fn local(&self, id: LocalId) -> Option<&LocalBinding> {
        self.locals.get(&id)
    }

    /// Locals declared by one function, in declaration order
    pub fn locals_of(&self, owner: DeclId) -> impl Iterator<Item = &LocalBinding> {
        self.locals
            .range(LocalId { owner, index: 0 }..=LocalId { owner, index: u32::MAX })
            .map(|(_, b)| b)
    }

    /// Declaration invoked by a call and the number of leading arguments
    /// that are receivers (one for method expressions)
    pub fn call_target(&self, file: FileId, callee: &Spanned<Expr>) -> Option<(DeclId, usize)> {
        match self.binding(file, callee.span)? {
            Binding::Function(id) => Some((*id, 0)),
            Binding::Method {
                method,
                form: MethodForm::Value,
                ..
            } => Some((*method, 0)),
            Binding::Method {
                method,
                form: MethodForm::Expression,
                ..
            } => Some((*method, 1)),
            _ => None,
        }
    }

    /// Why the contract of `decl` could not be resolved
    pub fn clause_error(&self, decl: DeclId) -> Option<&VerifyError> {
        self.clause_errors.get(&decl)
    }

    pub fn site_count(&self) -> usize {
        self.sites.len()
    }
}

/// Resolve every declaration of the table.
pub fn resolve_program(table: &SymbolTable) -> Result<Bindings> {
    let mut bindings = Bindings::default();
    let contexts = contexts(table)?;

    for decl in table.declarations() {
        if let DeclKind::Type(def) = &decl.kind {
            let ctx = &contexts[decl.file.0 as usize];
            let mut fields = Vec::with_capacity(def.fields.len());
            for field in &def.fields {
                fields.push(FieldInfo {
                    name: field.name.node.clone(),
                    ty: resolve_type(table, ctx, &field.ty)?,
                    ghost: field.ghost,
                });
            }
            bindings.layouts.insert(decl.id, StructLayout { fields });
        }
    }

    for decl in table.declarations() {
        if let Some(def) = decl.func() {
            let ctx = &contexts[decl.file.0 as usize];
            let signature = resolve_signature(table, ctx, decl.id, def)?;
            for local in signature.receiver.iter().chain(&signature.params).chain(&signature.results) {
                bindings.locals.insert(local.id, local.clone());
            }
            bindings.signatures.insert(decl.id, signature);
        }
    }

    for decl in table.declarations() {
        if let Some(def) = decl.func() {
            let ctx = contexts[decl.file.0 as usize].clone();
            let mut body = BodyResolver::new(table, &mut bindings, ctx, decl.id);
            body.function(def)?;
        }
    }

    tracing::debug!(sites = bindings.sites.len(), "resolved program");
    Ok(bindings)
}

/// Resolution context of every file, indexed by `FileId`
pub fn contexts(table: &SymbolTable) -> Result<Vec<ResolutionContext>> {
    table.files().map(|file| ResolutionContext::new(table, file.id)).collect()
}

/// Resolve one identifier. Lookup order, first match wins:
/// locals of the scope chain, the current package, dot imports,
/// import aliases, predeclared types.
pub fn resolve(table: &SymbolTable, scope: &ScopeStack, ctx: &ResolutionContext, ident: &str, span: Span) -> Result<Binding> {
    if let Some(local) = scope.get(ident) {
        return Ok(Binding::Local(local.clone()));
    }
    if let Some(id) = table.try_lookup(ctx, None, ident, span)? {
        let decl = table.decl(id);
        return Ok(match decl.kind {
            DeclKind::Type(_) => Binding::Type(id),
            DeclKind::Function(_) => Binding::Function(id),
            DeclKind::Method { receiver, .. } => Binding::Method {
                method: id,
                receiver,
                form: MethodForm::Expression,
            },
        });
    }
    if let Some(&pkg) = ctx.aliases.get(ident) {
        return Ok(Binding::Package(pkg));
    }
    if let Some(ty) = Ty::universe(ident) {
        return Ok(Binding::BuiltinType(ty));
    }

    let mut candidates = scope.visible_names();
    let aliases: Vec<&str> = ctx.aliases.keys().map(String::as_str).collect();
    candidates.extend(aliases);
    let hint = suggest(ident, candidates).or_else(|| table.suggest_member(ctx, None, ident));
    Err(VerifyError::unresolved(ident, table.site(ctx.file, span), hint))
}

/// Resolve a type expression in the context of a file.
pub fn resolve_type(table: &SymbolTable, ctx: &ResolutionContext, ty: &Spanned<TypeExpr>) -> Result<Ty> {
    match &ty.node {
        TypeExpr::Pointer(inner) => Ok(Ty::Pointer(Box::new(resolve_type(table, ctx, inner)?))),
        TypeExpr::Set(elem) => Ok(Ty::Set(Box::new(resolve_type(table, ctx, elem)?))),
        TypeExpr::Multiset(elem) => Ok(Ty::Multiset(Box::new(resolve_type(table, ctx, elem)?))),
        TypeExpr::Named {
            package: Some(alias),
            name,
        } => {
            let id = table.lookup(ctx, Some(&alias.node), &name.node, name.span)?;
            struct_type(table, ctx, id, &name.node, ty.span)
        }
        TypeExpr::Named { package: None, name } => match table.try_lookup(ctx, None, &name.node, name.span)? {
            Some(id) => struct_type(table, ctx, id, &name.node, ty.span),
            None => Ty::universe(&name.node).ok_or_else(|| {
                let hint = table.suggest_member(ctx, None, &name.node).or_else(|| {
                    suggest(&name.node, ["int", "bool", "perm"])
                });
                VerifyError::unresolved(name.node.clone(), table.site(ctx.file, name.span), hint)
            }),
        },
    }
}

fn struct_type(table: &SymbolTable, ctx: &ResolutionContext, id: DeclId, name: &str, span: Span) -> Result<Ty> {
    if table.decl(id).is_type() {
        Ok(Ty::Struct(id))
    } else {
        Err(VerifyError::unresolved(
            name,
            table.site(ctx.file, span),
            Some(format!("`{}` is not a type", table.decl(id).name)),
        ))
    }
}

fn resolve_signature(table: &SymbolTable, ctx: &ResolutionContext, owner: DeclId, def: &FuncDef) -> Result<Signature> {
    let mut index = 0;
    let mut next = |name: &str, kind: LocalKind, ghost: bool, ty: Ty| {
        let binding = LocalBinding {
            id: LocalId { owner, index },
            name: name.to_string(),
            kind,
            ghost,
            ty,
            addressable: false,
        };
        index += 1;
        binding
    };

    let receiver = match &def.receiver {
        Some(recv) => Some(next(&recv.name.node, LocalKind::Receiver, def.ghost, resolve_type(table, ctx, &recv.ty)?)),
        None => None,
    };
    let mut params = Vec::with_capacity(def.params.len());
    for param in &def.params {
        let name = param.name.as_ref().map(|n| n.node.as_str()).unwrap_or("_");
        let ty = resolve_type(table, ctx, &param.ty)?;
        params.push(next(name, LocalKind::Param, param.ghost || def.ghost, ty));
    }
    let mut results = Vec::with_capacity(def.results.len());
    for result in &def.results {
        let name = result.name.as_ref().map(|n| n.node.as_str()).unwrap_or("_");
        let ty = resolve_type(table, ctx, &result.ty)?;
        results.push(next(name, LocalKind::Result, result.ghost || def.ghost, ty));
    }
    Ok(Signature {
        receiver,
        params,
        results,
    })
}

/// What a selector `base.name` denotes
enum Selected {
    Value(Ty),
    Function(DeclId),
    Type(DeclId),
    Method {
        method: DeclId,
        receiver: DeclId,
        form: MethodForm,
    },
}

struct BodyResolver<'a> {
    table: &'a SymbolTable,
    out: &'a mut Bindings,
    ctx: ResolutionContext,
    scope: ScopeStack,
    owner: DeclId,
    next_local: u32,
    ghost_fn: bool,
}

impl<'a> BodyResolver<'a> {
    fn new(table: &'a SymbolTable, out: &'a mut Bindings, ctx: ResolutionContext, owner: DeclId) -> Self {
        let next_local = out.locals_of(owner).count() as u32;
        Self {
            table,
            out,
            ctx,
            scope: ScopeStack::new(),
            owner,
            next_local,
            ghost_fn: table.decl(owner).is_ghost(),
        }
    }

    fn function(&mut self, def: &FuncDef) -> Result<()> {
        let signature = self.out.signatures.get(&self.owner).cloned().ok_or_else(|| {
            VerifyError::unresolved(def.name.node.clone(), self.site(def.name.span), None)
        })?;
        if let (Some(recv), Some(binding)) = (&def.receiver, &signature.receiver) {
            self.declare_at(recv.name.span, binding.clone());
        }
        for (param, binding) in def.params.iter().zip(&signature.params) {
            if let Some(name) = &param.name {
                self.declare_at(name.span, binding.clone());
            }
        }
        for (result, binding) in def.results.iter().zip(&signature.results) {
            if let Some(name) = &result.name {
                self.declare_at(name.span, binding.clone());
            }
        }

        if let Err(err) = self.clauses(def) {
            if !err.is_resolution() {
                return Err(err);
            }
            let location = err.location().cloned().unwrap_or_else(|| self.site(def.name.span));
            let decl = self.table.decl(self.owner).name.to_string();
            tracing::debug!(%decl, error = %err, "contract clause does not resolve");
            self.out.clause_errors.insert(self.owner, VerifyError::ill_formed(decl, err.message(), location));
        }
        if let Some(body) = &def.body {
            self.block(body)?;
        }
        Ok(())
    }

    /// Contract clauses resolve against parameters and results; a failure
    /// only makes this declaration's contract ill-formed
    fn clauses(&mut self, def: &FuncDef) -> Result<()> {
        for clause in def.spec.requires.iter().chain(&def.spec.ensures).chain(&def.spec.preserves) {
            let ty = self.expr(clause)?;
            self.expect_assertion(clause, &ty)?;
        }
        Ok(())
    }

    fn site(&self, span: Span) -> crate::ast::SourceLocation {
        self.table.site(self.ctx.file, span)
    }

    fn record(&mut self, span: Span, binding: Binding) {
        self.out.sites.insert(SiteId { file: self.ctx.file, span }, binding);
    }

    fn record_ty(&mut self, span: Span, ty: Ty) -> Ty {
        self.out.types.insert(SiteId { file: self.ctx.file, span }, ty.clone());
        ty
    }

    fn misuse<T>(&self, name: &str, span: Span, hint: String) -> Result<T> {
        Err(VerifyError::unresolved(name, self.site(span), Some(hint)))
    }

    fn declare_at(&mut self, span: Span, binding: LocalBinding) {
        self.record(span, Binding::Local(binding.clone()));
        self.scope.define(binding);
    }

    fn declare_local(&mut self, name: &Spanned<String>, ty: Ty, ghost: bool, addressable: bool) {
        let binding = LocalBinding {
            id: LocalId {
                owner: self.owner,
                index: self.next_local,
            },
            name: name.node.clone(),
            kind: LocalKind::Var,
            ghost: ghost || self.ghost_fn,
            ty,
            addressable,
        };
        self.next_local += 1;
        self.out.locals.insert(binding.id, binding.clone());
        self.declare_at(name.span, binding);
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn block(&mut self, block: &Block) -> Result<()> {
        self.scope.push_scope();
        let result = block.stmts.iter().try_for_each(|stmt| self.stmt(stmt));
        self.scope.pop_scope();
        result
    }

    fn stmt(&mut self, stmt: &Stmt) -> Result<()> {
        match &stmt.kind {
            StmtKind::VarDecl { name, ty, init } => {
                let declared = match ty {
                    Some(ty) => Some(resolve_type(self.table, &self.ctx, ty)?),
                    None => None,
                };
                let init_ty = match init {
                    Some(init) => {
                        let init_ty = self.expr(init)?;
                        if let Some(declared) = &declared {
                            self.expect(init, &init_ty, declared)?;
                        }
                        Some(init_ty)
                    }
                    None => None,
                };
                let Some(ty) = declared.or(init_ty) else {
                    return self.misuse(&name.node, name.span, "variable needs a type or an initializer".into());
                };
                self.declare_local(name, ty, stmt.ghost, false);
            }
            StmtKind::ShortVarDecl { names, values } => {
                let mut tys = Vec::with_capacity(values.len());
                for value in values {
                    tys.push(self.expr(value)?);
                }
                if let [Ty::Tuple(items)] = tys.as_slice() {
                    tys = items.clone();
                }
                if tys.len() != names.len() {
                    return self.misuse(
                        &names[0].name.node,
                        stmt.span,
                        format!("{} names but {} values", names.len(), tys.len()),
                    );
                }
                for (name, ty) in names.iter().zip(tys) {
                    self.declare_local(&name.name, ty, stmt.ghost, name.addressable);
                }
            }
            StmtKind::Assign { targets, values } => {
                let mut target_tys = Vec::with_capacity(targets.len());
                for target in targets {
                    target_tys.push(self.expr(target)?);
                }
                self.expect_values(values, &target_tys, stmt.span)?;
            }
            StmtKind::Assert(e) | StmtKind::Assume(e) => {
                let ty = self.expr(e)?;
                self.expect_assertion(e, &ty)?;
            }
            StmtKind::Expr(e) => {
                self.expr(e)?;
            }
            StmtKind::Return(values) if values.is_empty() => {}
            StmtKind::Return(values) => {
                let results: Vec<Ty> = self
                    .out
                    .signatures
                    .get(&self.owner)
                    .map(|sig| sig.results.iter().map(|r| r.ty.clone()).collect())
                    .unwrap_or_default();
                self.expect_values(values, &results, stmt.span)?;
            }
            StmtKind::If {
                cond,
                then_block,
                else_block,
            } => {
                let ty = self.expr(cond)?;
                self.expect(cond, &ty, &Ty::Bool)?;
                self.block(then_block)?;
                if let Some(else_block) = else_block {
                    self.block(else_block)?;
                }
            }
            StmtKind::For { invariants, cond, body } => {
                for inv in invariants {
                    let ty = self.expr(inv)?;
                    self.expect_assertion(inv, &ty)?;
                }
                if let Some(cond) = cond {
                    let ty = self.expr(cond)?;
                    self.expect(cond, &ty, &Ty::Bool)?;
                }
                self.block(body)?;
            }
            StmtKind::Block(block) => self.block(block)?,
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    fn expr(&mut self, expr: &Spanned<Expr>) -> Result<Ty> {
        let ty = stacker::maybe_grow(128 * 1024, 4 * 1024 * 1024, || self.expr_inner(expr))?;
        Ok(self.record_ty(expr.span, ty))
    }

    fn expr_inner(&mut self, expr: &Spanned<Expr>) -> Result<Ty> {
        match &expr.node {
            Expr::IntLit(_) => Ok(Ty::Int),
            Expr::BoolLit(_) => Ok(Ty::Bool),
            Expr::Ident(name) => {
                let binding = resolve(self.table, &self.scope, &self.ctx, name, expr.span)?;
                self.record(expr.span, binding.clone());
                match binding {
                    Binding::Local(local) => Ok(local.ty),
                    Binding::Function(id) => self.misuse(name, expr.span, format!("function `{}` must be called", self.table.decl(id).name)),
                    Binding::Package(_) => self.misuse(name, expr.span, "package used as value".into()),
                    _ => self.misuse(name, expr.span, "type used as value".into()),
                }
            }
            Expr::Selector { base, field } => match self.selector(expr.span, base, field)? {
                Selected::Value(ty) => Ok(ty),
                Selected::Method { method, receiver, .. } => self.misuse(
                    &field.node,
                    field.span,
                    format!(
                        "method `{}` of `{}` must be called",
                        self.table.decl(method).name,
                        self.table.decl(receiver).name
                    ),
                ),
                Selected::Function(id) => self.misuse(
                    &field.node,
                    field.span,
                    format!("function `{}` must be called", self.table.decl(id).name),
                ),
                Selected::Type(id) => self.misuse(
                    &field.node,
                    field.span,
                    format!("type `{}` used as value", self.table.decl(id).name),
                ),
            },
            Expr::Call { callee, args } => self.call(callee, args),
            Expr::Binary { left, op, right } => {
                let left_ty = self.expr(left)?;
                let right_ty = self.expr(right)?;
                self.binary(*op, left, &left_ty, right, &right_ty)
            }
            Expr::Unary { op, expr: operand } => {
                let ty = self.expr(operand)?;
                match op {
                    UnOp::Not => self.expect(operand, &ty, &Ty::Bool).map(|()| Ty::Bool),
                    UnOp::Neg => self.expect(operand, &ty, &Ty::Int).map(|()| Ty::Int),
                    UnOp::AddrOf => Ok(Ty::Pointer(Box::new(ty))),
                    UnOp::Deref => match ty {
                        Ty::Pointer(inner) => Ok(*inner),
                        _ => self.misuse("*", expr.span, "dereference of a non-pointer".into()),
                    },
                }
            }
            Expr::Cardinality(inner) => {
                let ty = self.expr(inner)?;
                self.expect_collection(inner, &ty)?;
                Ok(Ty::Int)
            }
            Expr::Collection { kind, elem_ty, elems } => {
                let elem = resolve_type(self.table, &self.ctx, elem_ty)?;
                for e in elems {
                    let ty = self.expr(e)?;
                    self.expect(e, &ty, &elem)?;
                }
                Ok(Ty::collection(*kind, elem))
            }
            Expr::Composite { ty, fields } => {
                let resolved = resolve_type(self.table, &self.ctx, ty)?;
                let Some(owner) = resolved.struct_id().filter(|_| !matches!(resolved, Ty::Pointer(_))) else {
                    return self.misuse(&ty.node.to_string(), ty.span, "composite literal of a non-struct type".into());
                };
                let layout = self.out.layouts.get(&owner).cloned().unwrap_or(StructLayout { fields: Vec::new() });
                let positional = fields.iter().all(|(key, _)| key.is_none());
                if positional && !fields.is_empty() && fields.len() != layout.fields.len() {
                    return self.misuse(
                        &ty.node.to_string(),
                        expr.span,
                        format!("expected {} values, found {}", layout.fields.len(), fields.len()),
                    );
                }
                for (index, (key, value)) in fields.iter().enumerate() {
                    let field_ty = match key {
                        Some(key) => {
                            let Some((_, field)) = layout.field(&key.node) else {
                                let hint = suggest(&key.node, layout.fields.iter().map(|f| f.name.as_str()));
                                return Err(VerifyError::unresolved(key.node.clone(), self.site(key.span), hint));
                            };
                            let field_ty = field.ty.clone();
                            self.record(
                                key.span,
                                Binding::Field {
                                    owner,
                                    name: key.node.clone(),
                                },
                            );
                            Some(field_ty)
                        }
                        None if positional => layout.fields.get(index).map(|f| f.ty.clone()),
                        None => None,
                    };
                    let ty = self.expr(value)?;
                    if let Some(field_ty) = field_ty {
                        self.expect(value, &ty, &field_ty)?;
                    }
                }
                Ok(resolved)
            }
            Expr::Old(inner) => self.expr(inner),
            Expr::Acc(inner) => {
                self.expr(inner)?;
                let is_field = matches!(
                    self.out.binding(self.ctx.file, inner.span),
                    Some(Binding::Field { .. })
                );
                if !is_field {
                    return self.misuse("acc", inner.span, "acc expects a field access".into());
                }
                Ok(Ty::Perm)
            }
            Expr::Snapshot(_) => self.misuse("old", expr.span, "snapshot outside a contract".into()),
        }
    }

    fn binary(&self, op: BinOp, left: &Spanned<Expr>, left_ty: &Ty, right: &Spanned<Expr>, right_ty: &Ty) -> Result<Ty> {
        match op {
            BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod => {
                self.expect(left, left_ty, &Ty::Int)?;
                self.expect(right, right_ty, &Ty::Int)?;
                Ok(Ty::Int)
            }
            BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge => {
                self.expect(left, left_ty, &Ty::Int)?;
                self.expect(right, right_ty, &Ty::Int)?;
                Ok(Ty::Bool)
            }
            BinOp::Eq | BinOp::Ne => {
                self.expect(right, right_ty, left_ty)?;
                Ok(Ty::Bool)
            }
            // where `acc` may appear is checked with the contract
            BinOp::And | BinOp::Or => {
                self.expect_assertion(left, left_ty)?;
                self.expect_assertion(right, right_ty)?;
                Ok(Ty::Bool)
            }
            BinOp::Implies => {
                self.expect(left, left_ty, &Ty::Bool)?;
                self.expect_assertion(right, right_ty)?;
                Ok(Ty::Bool)
            }
            BinOp::In | BinOp::Multiplicity => {
                let (_, elem) = self.expect_collection(right, right_ty)?;
                self.expect(left, left_ty, elem)?;
                Ok(if op == BinOp::In { Ty::Bool } else { Ty::Int })
            }
            // Mixing sets and multisets is left to the theory, which rejects it
            BinOp::Subset | BinOp::Union | BinOp::Intersection | BinOp::SetMinus => {
                let (_, left_elem) = self.expect_collection(left, left_ty)?;
                let (_, right_elem) = self.expect_collection(right, right_ty)?;
                if left_elem != right_elem {
                    return self.mismatch(
                        right.span,
                        format!(
                            "`{op}` of {} and {}",
                            left_ty.display(self.table),
                            right_ty.display(self.table)
                        ),
                    );
                }
                Ok(if op == BinOp::Subset { Ty::Bool } else { left_ty.clone() })
            }
        }
    }

    fn mismatch<T>(&self, span: Span, message: String) -> Result<T> {
        Err(VerifyError::type_mismatch(message, self.site(span)))
    }

    fn expect(&self, expr: &Spanned<Expr>, found: &Ty, expected: &Ty) -> Result<()> {
        if found == expected {
            return Ok(());
        }
        self.mismatch(
            expr.span,
            format!("expected {}, found {}", expected.display(self.table), found.display(self.table)),
        )
    }

    /// Boolean or permission: what assertions and contract clauses hold
    fn expect_assertion(&self, expr: &Spanned<Expr>, found: &Ty) -> Result<()> {
        match found {
            Ty::Bool | Ty::Perm => Ok(()),
            _ => self.mismatch(expr.span, format!("expected an assertion, found {}", found.display(self.table))),
        }
    }

    fn expect_collection<'t>(&self, expr: &Spanned<Expr>, found: &'t Ty) -> Result<(CollectionKind, &'t Ty)> {
        match found.as_collection() {
            Some(collection) => Ok(collection),
            None => self.mismatch(
                expr.span,
                format!("expected a set or multiset, found {}", found.display(self.table)),
            ),
        }
    }

    /// Values assigned or returned against the types they flow into
    fn expect_values(&mut self, values: &[Spanned<Expr>], expected: &[Ty], span: Span) -> Result<()> {
        let mut tys = Vec::with_capacity(values.len());
        for value in values {
            tys.push(self.expr(value)?);
        }
        if let ([value], [Ty::Tuple(items)]) = (values, tys.as_slice())
            && expected.len() != 1
        {
            if items != expected {
                return self.mismatch(value.span, format!("expected {} values, found {}", expected.len(), items.len()));
            }
            return Ok(());
        }
        if tys.len() != expected.len() {
            return self.mismatch(span, format!("expected {} values, found {}", expected.len(), tys.len()));
        }
        for ((value, ty), expected_ty) in values.iter().zip(&tys).zip(expected) {
            self.expect(value, ty, expected_ty)?;
        }
        Ok(())
    }

    /// Struct type named by a type operand: `T`, `pkg.T`, `*T`, `(T)`
    fn type_operand(&mut self, expr: &Spanned<Expr>) -> Result<Option<DeclId>> {
        match &expr.node {
            Expr::Unary { op: UnOp::Deref, expr: inner } => self.type_operand(inner),
            Expr::Ident(name) => match resolve(self.table, &self.scope, &self.ctx, name, expr.span)? {
                Binding::Type(id) => {
                    self.record(expr.span, Binding::Type(id));
                    Ok(Some(id))
                }
                _ => Ok(None),
            },
            Expr::Selector { base, field } => {
                let Expr::Ident(alias) = &base.node else {
                    return Ok(None);
                };
                if !matches!(
                    resolve(self.table, &self.scope, &self.ctx, alias, base.span)?,
                    Binding::Package(_)
                ) {
                    return Ok(None);
                }
                let id = self.table.lookup(&self.ctx, Some(alias), &field.node, field.span)?;
                if self.table.decl(id).is_type() {
                    self.record(expr.span, Binding::Type(id));
                    Ok(Some(id))
                } else {
                    Ok(None)
                }
            }
            _ => Ok(None),
        }
    }

    fn selector(&mut self, span: Span, base: &Spanned<Expr>, field: &Spanned<String>) -> Result<Selected> {
        // Qualified reference `alias.Name`
        if let Expr::Ident(alias) = &base.node {
            let base_binding = match resolve(self.table, &self.scope, &self.ctx, alias, base.span) {
                Err(VerifyError::UnresolvedName { .. }) => {
                    return Err(VerifyError::UnknownPackageAlias {
                        alias: alias.clone(),
                        location: self.site(base.span),
                    });
                }
                other => other?,
            };
            if let Binding::Package(pkg) = base_binding {
                self.record(base.span, Binding::Package(pkg));
                let id = self.table.lookup(&self.ctx, Some(alias), &field.node, field.span)?;
                let decl = self.table.decl(id);
                return Ok(match decl.kind {
                    DeclKind::Type(_) => {
                        self.record(span, Binding::Type(id));
                        Selected::Type(id)
                    }
                    _ => {
                        self.record(span, Binding::Function(id));
                        Selected::Function(id)
                    }
                });
            }
        }

        // Method expression `(*T).M` / `(T).M`
        if let Some(owner) = self.type_operand(base)? {
            let Some(method) = self.table.method(owner, &field.node) else {
                let hint = suggest(&field.node, self.table.method_names(owner));
                return Err(VerifyError::unresolved(field.node.clone(), self.site(field.span), hint));
            };
            let binding = Binding::Method {
                method,
                receiver: owner,
                form: MethodForm::Expression,
            };
            self.record(span, binding);
            return Ok(Selected::Method {
                method,
                receiver: owner,
                form: MethodForm::Expression,
            });
        }

        // Field or method value on an expression (pointer auto-dereference)
        let base_ty = self.expr(base)?;
        let Some(owner) = base_ty.struct_id() else {
            return self.misuse(
                &field.node,
                field.span,
                format!("type {} has no fields or methods", base_ty.display(self.table)),
            );
        };
        let layout_field = self
            .out
            .layouts
            .get(&owner)
            .and_then(|layout| layout.field(&field.node).map(|(_, f)| f.ty.clone()));
        if let Some(ty) = layout_field {
            self.record(
                span,
                Binding::Field {
                    owner,
                    name: field.node.clone(),
                },
            );
            return Ok(Selected::Value(ty));
        }
        if let Some(method) = self.table.method(owner, &field.node) {
            self.record(
                span,
                Binding::Method {
                    method,
                    receiver: owner,
                    form: MethodForm::Value,
                },
            );
            return Ok(Selected::Method {
                method,
                receiver: owner,
                form: MethodForm::Value,
            });
        }

        let mut candidates: Vec<&str> = self
            .out
            .layouts
            .get(&owner)
            .map(|layout| layout.fields.iter().map(|f| f.name.as_str()).collect())
            .unwrap_or_default();
        candidates.extend(self.table.method_names(owner));
        let hint = suggest(&field.node, candidates);
        Err(VerifyError::unresolved(field.node.clone(), self.site(field.span), hint))
    }

    fn call(&mut self, callee: &Spanned<Expr>, args: &[Spanned<Expr>]) -> Result<Ty> {
        let (target, receiver_args) = match &callee.node {
            Expr::Ident(name) => {
                let binding = resolve(self.table, &self.scope, &self.ctx, name, callee.span)?;
                self.record(callee.span, binding.clone());
                match binding {
                    Binding::Function(id) => (id, 0),
                    _ => return self.misuse(name, callee.span, "not a function".into()),
                }
            }
            Expr::Selector { base, field } => match self.selector(callee.span, base, field)? {
                Selected::Function(id) => (id, 0),
                Selected::Method {
                    method,
                    form: MethodForm::Value,
                    ..
                } => (method, 0),
                Selected::Method {
                    method,
                    form: MethodForm::Expression,
                    ..
                } => (method, 1),
                _ => return self.misuse(&field.node, field.span, "not callable".into()),
            },
            _ => return self.misuse("call", callee.span, "expression is not callable".into()),
        };

        let signature = self
            .out
            .signatures
            .get(&target)
            .cloned()
            .ok_or_else(|| VerifyError::unresolved(self.table.decl(target).name.to_string(), self.site(callee.span), None))?;
        let expected = signature.params.len() + receiver_args;
        if args.len() != expected {
            return self.misuse(
                &self.table.decl(target).name.to_string(),
                callee.span,
                format!("expected {expected} arguments, found {}", args.len()),
            );
        }
        let mut expected_tys = signature.receiver.iter().take(receiver_args).chain(&signature.params).map(|p| &p.ty);
        for arg in args {
            let ty = self.expr(arg)?;
            if let Some(expected_ty) = expected_tys.next() {
                self.expect(arg, &ty, expected_ty)?;
            }
        }
        Ok(signature.result_ty())
    }
}
