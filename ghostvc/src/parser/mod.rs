//! Recursive-descent parser for annotated source files

use crate::ast::*;
use crate::error::{Result, VerifyError};
use crate::lexer::{Token, tokenize};

#[cfg(test)]
mod tests;

/// Stack growth guards for deeply nested expressions
const STACK_RED_ZONE: usize = 128 * 1024;
const STACK_GROW_SIZE: usize = 4 * 1024 * 1024;

/// Parse tokens into a source file
pub fn parse(filename: &str, source: &str, tokens: Vec<(Token, Span)>) -> Result<SourceFile> {
    let mut parser = Parser::new(tokens, source.len());
    let mut file = parser.source_file(filename)?;
    file.lines = LineIndex::new(source);
    Ok(file)
}

/// Lex and parse in one step
pub fn parse_source(filename: &str, source: &str) -> Result<SourceFile> {
    let tokens = tokenize(source)?;
    parse(filename, source, tokens)
}

/// Entry of a parameter list before Go's name grouping is applied
struct ParamEntry {
    ghost: bool,
    name: Option<Spanned<String>>,
    ty: Spanned<TypeExpr>,
}

struct Parser {
    tokens: Vec<(Token, Span)>,
    pos: usize,
    eof: Span,
    /// Set while parsing `if`/`for` headers, where `{` opens the body
    no_composite: bool,
}

impl Parser {
    fn new(tokens: Vec<(Token, Span)>, len: usize) -> Self {
        Self {
            tokens,
            pos: 0,
            eof: Span::new(len, len),
            no_composite: false,
        }
    }

    // ---------------------------------------------------------------
    // Token helpers
    // ---------------------------------------------------------------

    fn peek(&self) -> Option<&Token> {
        self.peek_nth(0)
    }

    fn peek_nth(&self, n: usize) -> Option<&Token> {
        self.tokens.get(self.pos + n).map(|(tok, _)| tok)
    }

    fn span(&self) -> Span {
        self.tokens.get(self.pos).map(|(_, span)| *span).unwrap_or(self.eof)
    }

    fn at(&self, tok: &Token) -> bool {
        self.peek() == Some(tok)
    }

    fn bump(&mut self) -> Span {
        let span = self.span();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        span
    }

    fn eat(&mut self, tok: &Token) -> bool {
        if self.at(tok) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, tok: Token) -> Result<Span> {
        if self.at(&tok) {
            Ok(self.bump())
        } else {
            self.error(&format!("`{tok}`"))
        }
    }

    fn error<T>(&self, expected: &str) -> Result<T> {
        let found = match self.peek() {
            Some(Token::Semi) => "newline or `;`".to_string(),
            Some(tok) => format!("`{tok}`"),
            None => "end of file".to_string(),
        };
        Err(VerifyError::parser(
            format!("expected {expected}, found {found}"),
            self.span(),
        ))
    }

    fn expect_ident(&mut self) -> Result<Spanned<String>> {
        match self.peek() {
            Some(Token::Ident(name)) => {
                let name = name.clone();
                Ok(Spanned::new(name, self.bump()))
            }
            _ => self.error("identifier"),
        }
    }

    fn skip_semis(&mut self) {
        while self.eat(&Token::Semi) {}
    }

    fn end_statement(&mut self) -> Result<()> {
        if self.eat(&Token::Semi) || self.at(&Token::RBrace) || self.peek().is_none() {
            Ok(())
        } else {
            self.error("newline or `;`")
        }
    }

    fn starts_type_at(&self, n: usize) -> bool {
        matches!(
            self.peek_nth(n),
            Some(Token::Ident(_) | Token::Star | Token::Set | Token::Mset)
        )
    }

    fn with_composites<T>(&mut self, allowed: bool, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let saved = std::mem::replace(&mut self.no_composite, !allowed);
        let result = f(self);
        self.no_composite = saved;
        result
    }

    // ---------------------------------------------------------------
    // Files and declarations
    // ---------------------------------------------------------------

    fn source_file(&mut self, filename: &str) -> Result<SourceFile> {
        self.skip_semis();
        self.expect(Token::Package)?;
        let package = self.expect_ident()?;
        self.end_statement()?;

        let mut imports = Vec::new();
        loop {
            self.skip_semis();
            if !self.at(&Token::Import) {
                break;
            }
            imports.extend(self.import_decl()?);
        }

        let mut items = Vec::new();
        loop {
            self.skip_semis();
            if self.peek().is_none() {
                break;
            }
            items.push(self.item()?);
        }

        Ok(SourceFile {
            name: filename.to_string(),
            package,
            imports,
            items,
            lines: LineIndex::default(),
        })
    }

    fn import_decl(&mut self) -> Result<Vec<Import>> {
        self.expect(Token::Import)?;
        let mut imports = Vec::new();
        if self.eat(&Token::LParen) {
            loop {
                self.skip_semis();
                if self.eat(&Token::RParen) {
                    break;
                }
                imports.push(self.import_spec()?);
            }
        } else {
            imports.push(self.import_spec()?);
        }
        self.end_statement()?;
        Ok(imports)
    }

    fn import_spec(&mut self) -> Result<Import> {
        let start = self.span();
        let alias = match self.peek() {
            Some(Token::Dot) => {
                self.bump();
                ImportAlias::Dot
            }
            Some(Token::Ident(_)) => {
                let alias = self.expect_ident()?;
                if alias.node == "_" {
                    ImportAlias::Blank
                } else {
                    ImportAlias::Named(alias)
                }
            }
            _ => ImportAlias::Implicit,
        };
        let path = match self.peek() {
            Some(Token::StringLit(path)) => {
                let path = path.clone();
                Spanned::new(path, self.bump())
            }
            _ => return self.error("import path"),
        };
        let span = start.merge(path.span);
        Ok(Import { alias, path, span })
    }

    fn item(&mut self) -> Result<Item> {
        let start = self.span();
        let mut spec = SpecClauses::default();
        let mut ghost = false;
        let mut pure = false;
        loop {
            match self.peek() {
                Some(Token::Requires) => {
                    self.bump();
                    spec.requires.push(self.expr()?);
                }
                Some(Token::Ensures) => {
                    self.bump();
                    spec.ensures.push(self.expr()?);
                }
                Some(Token::Preserves) => {
                    self.bump();
                    spec.preserves.push(self.expr()?);
                }
                Some(Token::Ghost) => {
                    self.bump();
                    ghost = true;
                }
                Some(Token::Pure) => {
                    self.bump();
                    pure = true;
                }
                Some(Token::Semi) => {
                    self.bump();
                }
                _ => break,
            }
        }

        match self.peek() {
            Some(Token::Func) => self.func_def(start, spec, ghost, pure).map(Item::Func),
            Some(Token::Type) if spec.is_empty() && !ghost && !pure => self.type_decl().map(Item::Struct),
            _ => self.error("`func` or `type`"),
        }
    }

    fn type_decl(&mut self) -> Result<StructDef> {
        let start = self.expect(Token::Type)?;
        let name = self.expect_ident()?;
        self.expect(Token::Struct)?;
        self.expect(Token::LBrace)?;

        let mut fields = Vec::new();
        loop {
            self.skip_semis();
            if self.at(&Token::RBrace) {
                break;
            }
            let ghost = self.eat(&Token::Ghost);
            let mut names = vec![self.expect_ident()?];
            while self.eat(&Token::Comma) {
                names.push(self.expect_ident()?);
            }
            let ty = self.type_expr()?;
            fields.extend(names.into_iter().map(|name| FieldDef {
                name,
                ty: ty.clone(),
                ghost,
            }));
            self.end_statement()?;
        }
        let end = self.expect(Token::RBrace)?;
        Ok(StructDef {
            name,
            fields,
            span: start.merge(end),
        })
    }

    fn func_def(&mut self, start: Span, spec: SpecClauses, ghost: bool, pure: bool) -> Result<FuncDef> {
        let mut end = self.expect(Token::Func)?;
        let receiver = if self.eat(&Token::LParen) {
            let name = self.expect_ident()?;
            let ty = self.type_expr()?;
            self.expect(Token::RParen)?;
            Some(Receiver { name, ty })
        } else {
            None
        };
        let name = self.expect_ident()?;
        self.expect(Token::LParen)?;
        let params = self.param_list()?;

        let results = if self.eat(&Token::LParen) {
            self.param_list()?
        } else if self.starts_type_at(0) {
            let ty = self.type_expr()?;
            vec![Param {
                name: None,
                ty,
                ghost: false,
            }]
        } else {
            Vec::new()
        };
        if let Some((_, span)) = self.tokens.get(self.pos.saturating_sub(1)) {
            end = *span;
        }

        let body = if self.at(&Token::LBrace) {
            let block = self.block()?;
            end = block.span;
            Some(block)
        } else {
            None
        };

        Ok(FuncDef {
            name,
            receiver,
            params,
            results,
            spec,
            body,
            ghost,
            pure,
            span: start.merge(end),
        })
    }

    /// Parameters after `(` up to and including `)`, with Go's
    /// `x, y int` grouping resolved.
    fn param_list(&mut self) -> Result<Vec<Param>> {
        let mut entries = Vec::new();
        loop {
            if self.eat(&Token::RParen) {
                break;
            }
            let ghost = self.eat(&Token::Ghost);
            let entry = if matches!(self.peek(), Some(Token::Ident(_))) && self.starts_type_at(1) {
                let name = self.expect_ident()?;
                let ty = self.type_expr()?;
                ParamEntry {
                    ghost,
                    name: Some(name),
                    ty,
                }
            } else {
                ParamEntry {
                    ghost,
                    name: None,
                    ty: self.type_expr()?,
                }
            };
            entries.push(entry);
            if !self.eat(&Token::Comma) {
                self.expect(Token::RParen)?;
                break;
            }
        }

        if entries.iter().all(|entry| entry.name.is_none()) {
            return Ok(entries
                .into_iter()
                .map(|entry| Param {
                    name: None,
                    ty: entry.ty,
                    ghost: entry.ghost,
                })
                .collect());
        }

        // Lone entries are names sharing the type of the next typed entry
        let mut params = Vec::with_capacity(entries.len());
        let mut pending: Option<Spanned<TypeExpr>> = None;
        for entry in entries.into_iter().rev() {
            match entry.name {
                Some(name) => {
                    pending = Some(entry.ty.clone());
                    params.push(Param {
                        name: Some(name),
                        ty: entry.ty,
                        ghost: entry.ghost,
                    });
                }
                None => {
                    let name = match entry.ty.node {
                        TypeExpr::Named { package: None, name } => name,
                        _ => {
                            return Err(VerifyError::parser("mixed named and unnamed parameters", entry.ty.span));
                        }
                    };
                    let Some(ty) = pending.clone() else {
                        return Err(VerifyError::parser("missing parameter type", name.span));
                    };
                    params.push(Param {
                        name: Some(name),
                        ty,
                        ghost: entry.ghost,
                    });
                }
            }
        }
        params.reverse();
        Ok(params)
    }

    fn type_expr(&mut self) -> Result<Spanned<TypeExpr>> {
        let start = self.span();
        match self.peek() {
            Some(Token::Star) => {
                self.bump();
                let inner = self.type_expr()?;
                let span = start.merge(inner.span);
                Ok(Spanned::new(TypeExpr::Pointer(Box::new(inner)), span))
            }
            Some(Token::Set | Token::Mset) => {
                let is_set = self.at(&Token::Set);
                self.bump();
                self.expect(Token::LBracket)?;
                let elem = Box::new(self.type_expr()?);
                let end = self.expect(Token::RBracket)?;
                let ty = if is_set { TypeExpr::Set(elem) } else { TypeExpr::Multiset(elem) };
                Ok(Spanned::new(ty, start.merge(end)))
            }
            Some(Token::Ident(_)) => {
                let name = self.expect_ident()?;
                if self.at(&Token::Dot) && matches!(self.peek_nth(1), Some(Token::Ident(_))) {
                    self.bump();
                    let member = self.expect_ident()?;
                    let span = name.span.merge(member.span);
                    Ok(Spanned::new(TypeExpr::qualified(name, member), span))
                } else {
                    let span = name.span;
                    Ok(Spanned::new(TypeExpr::named(name), span))
                }
            }
            Some(Token::LParen) => {
                self.bump();
                let inner = self.type_expr()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            _ => self.error("type"),
        }
    }

    // ---------------------------------------------------------------
    // Statements
    // ---------------------------------------------------------------

    fn block(&mut self) -> Result<Block> {
        let start = self.expect(Token::LBrace)?;
        let stmts = self.with_composites(true, |p| {
            let mut stmts = Vec::new();
            loop {
                p.skip_semis();
                if p.at(&Token::RBrace) || p.peek().is_none() {
                    break;
                }
                stmts.push(p.statement()?);
            }
            Ok(stmts)
        })?;
        let end = self.expect(Token::RBrace)?;
        Ok(Block::new(stmts, start.merge(end)))
    }

    fn statement(&mut self) -> Result<Stmt> {
        stacker::maybe_grow(STACK_RED_ZONE, STACK_GROW_SIZE, || self.statement_inner())
    }

    fn statement_inner(&mut self) -> Result<Stmt> {
        let start = self.span();
        match self.peek() {
            Some(Token::Ghost) => {
                self.bump();
                let mut stmt = self.statement()?;
                stmt.ghost = true;
                stmt.span = start.merge(stmt.span);
                Ok(stmt)
            }
            Some(Token::Var) => {
                self.bump();
                let name = self.expect_ident()?;
                let ty = if self.starts_type_at(0) { Some(self.type_expr()?) } else { None };
                let init = if self.eat(&Token::Eq) { Some(self.expr()?) } else { None };
                let end = init
                    .as_ref()
                    .map(|e| e.span)
                    .or(ty.as_ref().map(|t| t.span))
                    .unwrap_or(name.span);
                self.end_statement()?;
                Ok(Stmt::new(StmtKind::VarDecl { name, ty, init }, start.merge(end)))
            }
            Some(Token::Assert | Token::Assume) => {
                let is_assert = self.at(&Token::Assert);
                self.bump();
                let cond = self.expr()?;
                let span = start.merge(cond.span);
                self.end_statement()?;
                let kind = if is_assert { StmtKind::Assert(cond) } else { StmtKind::Assume(cond) };
                Ok(Stmt::new(kind, span))
            }
            Some(Token::Return) => {
                self.bump();
                let values = if self.at(&Token::Semi) || self.at(&Token::RBrace) {
                    Vec::new()
                } else {
                    self.expr_list()?
                };
                let span = values.iter().fold(start, |span, v| span.merge(v.span));
                self.end_statement()?;
                Ok(Stmt::new(StmtKind::Return(values), span))
            }
            Some(Token::If) => self.if_stmt(),
            Some(Token::Invariant | Token::For) => self.for_stmt(),
            Some(Token::LBrace) => {
                let block = self.block()?;
                let span = block.span;
                Ok(Stmt::new(StmtKind::Block(block), span))
            }
            _ => self.simple_stmt(),
        }
    }

    fn if_stmt(&mut self) -> Result<Stmt> {
        let start = self.expect(Token::If)?;
        let cond = self.header_expr()?;
        let then_block = self.block()?;
        let mut end = then_block.span;
        let else_block = if self.eat(&Token::Else) {
            let block = if self.at(&Token::If) {
                let nested = self.if_stmt()?;
                let span = nested.span;
                Block::new(vec![nested], span)
            } else {
                self.block()?
            };
            end = block.span;
            Some(block)
        } else {
            None
        };
        Ok(Stmt::new(
            StmtKind::If {
                cond,
                then_block,
                else_block,
            },
            start.merge(end),
        ))
    }

    fn for_stmt(&mut self) -> Result<Stmt> {
        let start = self.span();
        let mut invariants = Vec::new();
        while self.eat(&Token::Invariant) {
            invariants.push(self.expr()?);
            self.skip_semis();
        }
        self.expect(Token::For)?;
        let cond = if self.at(&Token::LBrace) { None } else { Some(self.header_expr()?) };
        let body = self.block()?;
        let span = start.merge(body.span);
        Ok(Stmt::new(StmtKind::For { invariants, cond, body }, span))
    }

    fn simple_stmt(&mut self) -> Result<Stmt> {
        let start = self.span();
        if let Some(names) = self.decl_names()? {
            let values = self.expr_list()?;
            let span = values.iter().fold(start, |span, v| span.merge(v.span));
            self.end_statement()?;
            return Ok(Stmt::new(StmtKind::ShortVarDecl { names, values }, span));
        }

        let mut targets = self.expr_list()?;
        if self.eat(&Token::Eq) {
            let values = self.expr_list()?;
            let span = values.iter().fold(start, |span, v| span.merge(v.span));
            self.end_statement()?;
            return Ok(Stmt::new(StmtKind::Assign { targets, values }, span));
        }
        if targets.len() != 1 {
            return self.error("`=` or `:=`");
        }
        self.end_statement()?;
        let expr = targets.remove(0);
        let span = expr.span;
        Ok(Stmt::new(StmtKind::Expr(expr), span))
    }

    /// `a, r! :=` prefix of a short variable declaration, consumed only if present
    fn decl_names(&mut self) -> Result<Option<Vec<DeclName>>> {
        let mut i = 0;
        loop {
            if !matches!(self.peek_nth(i), Some(Token::Ident(_))) {
                return Ok(None);
            }
            i += 1;
            if self.peek_nth(i) == Some(&Token::Bang) {
                i += 1;
            }
            match self.peek_nth(i) {
                Some(Token::ColonEq) => break,
                Some(Token::Comma) => i += 1,
                _ => return Ok(None),
            }
        }

        let mut names = Vec::new();
        loop {
            let name = self.expect_ident()?;
            let addressable = self.eat(&Token::Bang);
            names.push(DeclName { name, addressable });
            if self.eat(&Token::ColonEq) {
                return Ok(Some(names));
            }
            self.expect(Token::Comma)?;
        }
    }

    // ---------------------------------------------------------------
    // Expressions
    // ---------------------------------------------------------------

    fn expr_list(&mut self) -> Result<Vec<Spanned<Expr>>> {
        let mut exprs = vec![self.expr()?];
        while self.eat(&Token::Comma) {
            exprs.push(self.expr()?);
        }
        Ok(exprs)
    }

    fn header_expr(&mut self) -> Result<Spanned<Expr>> {
        self.with_composites(false, Self::expr)
    }

    fn expr(&mut self) -> Result<Spanned<Expr>> {
        stacker::maybe_grow(STACK_RED_ZONE, STACK_GROW_SIZE, || self.implication())
    }

    /// `==>` is right associative
    fn implication(&mut self) -> Result<Spanned<Expr>> {
        let left = self.disjunction()?;
        if self.eat(&Token::Implies) {
            let right = self.implication()?;
            return Ok(binary(left, BinOp::Implies, right));
        }
        Ok(left)
    }

    fn left_assoc(
        &mut self,
        operand: fn(&mut Self) -> Result<Spanned<Expr>>,
        operator: fn(&Token) -> Option<BinOp>,
    ) -> Result<Spanned<Expr>> {
        let mut left = operand(self)?;
        while let Some(op) = self.peek().and_then(operator) {
            self.bump();
            let right = operand(self)?;
            left = binary(left, op, right);
        }
        Ok(left)
    }

    fn disjunction(&mut self) -> Result<Spanned<Expr>> {
        self.left_assoc(Self::conjunction, |tok| (*tok == Token::PipePipe).then_some(BinOp::Or))
    }

    fn conjunction(&mut self) -> Result<Spanned<Expr>> {
        self.left_assoc(Self::comparison, |tok| (*tok == Token::AmpAmp).then_some(BinOp::And))
    }

    fn comparison(&mut self) -> Result<Spanned<Expr>> {
        self.left_assoc(Self::membership, |tok| match tok {
            Token::EqEq => Some(BinOp::Eq),
            Token::NotEq => Some(BinOp::Ne),
            Token::Lt => Some(BinOp::Lt),
            Token::Gt => Some(BinOp::Gt),
            Token::LtEq => Some(BinOp::Le),
            Token::GtEq => Some(BinOp::Ge),
            _ => None,
        })
    }

    /// `x in m1 in m2` groups as `(x in m1) in m2`
    fn membership(&mut self) -> Result<Spanned<Expr>> {
        self.left_assoc(Self::additive, |tok| match tok {
            Token::In => Some(BinOp::In),
            Token::Subset => Some(BinOp::Subset),
            Token::Hash => Some(BinOp::Multiplicity),
            _ => None,
        })
    }

    fn additive(&mut self) -> Result<Spanned<Expr>> {
        self.left_assoc(Self::multiplicative, |tok| match tok {
            Token::Plus => Some(BinOp::Add),
            Token::Minus => Some(BinOp::Sub),
            Token::Union => Some(BinOp::Union),
            Token::Setminus => Some(BinOp::SetMinus),
            _ => None,
        })
    }

    fn multiplicative(&mut self) -> Result<Spanned<Expr>> {
        self.left_assoc(Self::unary, |tok| match tok {
            Token::Star => Some(BinOp::Mul),
            Token::Slash => Some(BinOp::Div),
            Token::Percent => Some(BinOp::Mod),
            Token::Intersection => Some(BinOp::Intersection),
            _ => None,
        })
    }

    fn unary(&mut self) -> Result<Spanned<Expr>> {
        let start = self.span();
        let op = match self.peek() {
            Some(Token::Bang) => UnOp::Not,
            Some(Token::Minus) => UnOp::Neg,
            Some(Token::Star) => UnOp::Deref,
            Some(Token::Ampersand) => UnOp::AddrOf,
            _ => return self.postfix(),
        };
        self.bump();
        let operand = stacker::maybe_grow(STACK_RED_ZONE, STACK_GROW_SIZE, || self.unary())?;
        let span = start.merge(operand.span);
        Ok(Spanned::new(
            Expr::Unary {
                op,
                expr: Box::new(operand),
            },
            span,
        ))
    }

    fn postfix(&mut self) -> Result<Spanned<Expr>> {
        let mut expr = self.primary()?;
        loop {
            match self.peek() {
                Some(Token::Dot) => {
                    self.bump();
                    let field = self.expect_ident()?;
                    let span = expr.span.merge(field.span);
                    expr = Spanned::new(
                        Expr::Selector {
                            base: Box::new(expr),
                            field,
                        },
                        span,
                    );
                }
                Some(Token::LParen) => {
                    self.bump();
                    let (args, end) = self.with_composites(true, |p| p.delimited(Token::RParen, Self::expr))?;
                    let span = expr.span.merge(end);
                    expr = Spanned::new(
                        Expr::Call {
                            callee: Box::new(expr),
                            args,
                        },
                        span,
                    );
                }
                Some(Token::LBrace) if !self.no_composite => match composite_type(&expr) {
                    Some(ty) => {
                        self.bump();
                        let (fields, end) = self.delimited(Token::RBrace, Self::composite_field)?;
                        let span = expr.span.merge(end);
                        expr = Spanned::new(Expr::Composite { ty, fields }, span);
                    }
                    None => break,
                },
                _ => break,
            }
        }
        Ok(expr)
    }

    fn composite_field(&mut self) -> Result<(Option<Spanned<String>>, Spanned<Expr>)> {
        let key = if matches!(self.peek(), Some(Token::Ident(_))) && self.peek_nth(1) == Some(&Token::Colon) {
            let key = self.expect_ident()?;
            self.bump();
            Some(key)
        } else {
            None
        };
        Ok((key, self.expr()?))
    }

    /// Comma-separated elements after an opening delimiter, up to `close`
    fn delimited<T>(&mut self, close: Token, mut element: impl FnMut(&mut Self) -> Result<T>) -> Result<(Vec<T>, Span)> {
        let mut items = Vec::new();
        loop {
            self.skip_semis();
            if self.at(&close) {
                break;
            }
            items.push(element(self)?);
            if !self.eat(&Token::Comma) {
                self.skip_semis();
                break;
            }
        }
        let end = self.expect(close)?;
        Ok((items, end))
    }

    fn primary(&mut self) -> Result<Spanned<Expr>> {
        let start = self.span();
        let Some(tok) = self.peek().cloned() else {
            return self.error("expression");
        };
        match tok {
            Token::IntLit(n) => {
                self.bump();
                Ok(Spanned::new(Expr::IntLit(n), start))
            }
            Token::True | Token::False => {
                self.bump();
                Ok(Spanned::new(Expr::BoolLit(tok == Token::True), start))
            }
            Token::Ident(name) => {
                self.bump();
                Ok(Spanned::new(Expr::Ident(name), start))
            }
            Token::LParen => {
                self.bump();
                let inner = self.with_composites(true, Self::expr)?;
                let end = self.expect(Token::RParen)?;
                Ok(Spanned::new(inner.node, start.merge(end)))
            }
            Token::Pipe => {
                self.bump();
                let inner = self.expr()?;
                let end = self.expect(Token::Pipe)?;
                Ok(Spanned::new(Expr::Cardinality(Box::new(inner)), start.merge(end)))
            }
            Token::Old | Token::Acc => {
                self.bump();
                self.expect(Token::LParen)?;
                let inner = Box::new(self.with_composites(true, Self::expr)?);
                let end = self.expect(Token::RParen)?;
                let node = if tok == Token::Old { Expr::Old(inner) } else { Expr::Acc(inner) };
                Ok(Spanned::new(node, start.merge(end)))
            }
            Token::Set | Token::Mset => {
                let kind = if tok == Token::Set { CollectionKind::Set } else { CollectionKind::Multiset };
                self.bump();
                self.expect(Token::LBracket)?;
                let elem_ty = self.type_expr()?;
                self.expect(Token::RBracket)?;
                self.expect(Token::LBrace)?;
                let (elems, end) = self.with_composites(true, |p| p.delimited(Token::RBrace, Self::expr))?;
                Ok(Spanned::new(
                    Expr::Collection { kind, elem_ty, elems },
                    start.merge(end),
                ))
            }
            _ => self.error("expression"),
        }
    }
}

fn binary(left: Spanned<Expr>, op: BinOp, right: Spanned<Expr>) -> Spanned<Expr> {
    let span = left.span.merge(right.span);
    Spanned::new(
        Expr::Binary {
            left: Box::new(left),
            op,
            right: Box::new(right),
        },
        span,
    )
}

/// `T` or `pkg.T` in front of `{` names a composite literal type
fn composite_type(expr: &Spanned<Expr>) -> Option<Spanned<TypeExpr>> {
    match &expr.node {
        Expr::Ident(name) => Some(Spanned::new(
            TypeExpr::named(Spanned::new(name.clone(), expr.span)),
            expr.span,
        )),
        Expr::Selector { base, field } => match &base.node {
            Expr::Ident(pkg) => Some(Spanned::new(
                TypeExpr::qualified(Spanned::new(pkg.clone(), base.span), field.clone()),
                expr.span,
            )),
            _ => None,
        },
        _ => None,
    }
}
