//! Symbol table
//!
//! Flat store of package-qualified declarations, built once per run.
//! Registration is purely additive; lookups never mutate.

use std::collections::HashMap;

use serde::Serialize;

use crate::ast::*;
use crate::error::{Result, VerifyError};
use crate::util::suggest;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct DeclId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct FileId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct PackageId(pub u32);

/// Package path plus local name; methods are named `Type.Method`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct QualifiedName {
    pub package: String,
    pub name: String,
}

impl QualifiedName {
    pub fn new(package: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.package, self.name)
    }
}

#[derive(Debug, Clone)]
pub enum DeclKind {
    Type(StructDef),
    Function(FuncDef),
    /// Method attached to a struct of the same package
    Method { receiver: DeclId, def: FuncDef },
}

#[derive(Debug, Clone)]
pub struct Declaration {
    pub id: DeclId,
    pub name: QualifiedName,
    pub kind: DeclKind,
    pub package: PackageId,
    pub file: FileId,
    /// Span of the declared name
    pub span: Span,
    pub visibility: Visibility,
}

impl Declaration {
    /// Local (unqualified) name: `Area` for `Rectangle.Area`
    pub fn local_name(&self) -> &str {
        match &self.kind {
            DeclKind::Type(def) => &def.name.node,
            DeclKind::Function(def) | DeclKind::Method { def, .. } => &def.name.node,
        }
    }

    pub fn func(&self) -> Option<&FuncDef> {
        match &self.kind {
            DeclKind::Function(def) | DeclKind::Method { def, .. } => Some(def),
            DeclKind::Type(_) => None,
        }
    }

    pub fn struct_def(&self) -> Option<&StructDef> {
        match &self.kind {
            DeclKind::Type(def) => Some(def),
            _ => None,
        }
    }

    pub fn is_type(&self) -> bool {
        matches!(self.kind, DeclKind::Type(_))
    }

    pub fn is_ghost(&self) -> bool {
        self.func().is_some_and(|f| f.ghost)
    }

    fn kind_name(&self) -> &'static str {
        match self.kind {
            DeclKind::Type(_) => "type",
            DeclKind::Function(_) => "func",
            DeclKind::Method { .. } => "method",
        }
    }
}

/// Per-file data needed to resolve names: the file's imports and line table
#[derive(Debug, Clone)]
pub struct FileContext {
    pub id: FileId,
    pub name: String,
    pub package: PackageId,
    pub imports: Vec<Import>,
    pub lines: LineIndex,
    pub package_clause: Span,
}

#[derive(Debug, Clone)]
pub struct PackageEntry {
    pub id: PackageId,
    pub path: String,
    pub name: String,
    pub files: Vec<FileId>,
    /// Types and functions by local name
    pub members: HashMap<String, DeclId>,
}

#[derive(Debug, Default)]
pub struct SymbolTable {
    decls: Vec<Declaration>,
    files: Vec<FileContext>,
    packages: Vec<PackageEntry>,
    by_path: HashMap<String, PackageId>,
    by_name: HashMap<QualifiedName, DeclId>,
    methods: HashMap<(DeclId, String), DeclId>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from every package of a program.
    pub fn from_program(program: Program) -> Result<Self> {
        let mut table = Self::new();
        for package in program.packages {
            table.register(package)?;
        }
        Ok(table)
    }

    /// Add all declarations of a package.
    pub fn register(&mut self, package: Package) -> Result<PackageId> {
        let pkg_id = PackageId(self.packages.len() as u32);
        let first_clause = package
            .files
            .first()
            .map(|f| SourceLocation::new(&f.name, &f.lines, f.package.span));

        if let Some(&previous) = self.by_path.get(&package.path) {
            let previous = self.package_location(previous);
            return Err(VerifyError::DuplicateDeclaration {
                name: package.path.clone(),
                location: first_clause.unwrap_or_else(|| previous.clone()),
                previous,
            });
        }

        let mut entry = PackageEntry {
            id: pkg_id,
            path: package.path.clone(),
            name: package.name.clone(),
            files: Vec::new(),
            members: HashMap::new(),
        };

        // Pass 1: types and functions; methods wait for their receiver types
        let mut pending_methods = Vec::new();
        let mut new_decls = Vec::new();
        for file in package.files {
            let file_id = FileId(self.files.len() as u32);
            entry.files.push(file_id);
            self.files.push(FileContext {
                id: file_id,
                name: file.name.clone(),
                package: pkg_id,
                imports: file.imports.clone(),
                lines: file.lines.clone(),
                package_clause: file.package.span,
            });

            for item in file.items {
                let (name, kind, span) = match item {
                    Item::Func(def) if def.receiver.is_some() => {
                        pending_methods.push((file_id, def));
                        continue;
                    }
                    Item::Func(def) => {
                        let (name, span) = (def.name.node.clone(), def.name.span);
                        (name, DeclKind::Function(def), span)
                    }
                    Item::Struct(def) => {
                        let (name, span) = (def.name.node.clone(), def.name.span);
                        (name, DeclKind::Type(def), span)
                    }
                };
                let id = DeclId((self.decls.len() + new_decls.len()) as u32);
                if let Some(&previous) = entry.members.get(&name) {
                    let previous = self.decl_location_in(&new_decls, previous);
                    return Err(VerifyError::DuplicateDeclaration {
                        name: QualifiedName::new(&package.path, &name).to_string(),
                        location: self.site(file_id, span),
                        previous,
                    });
                }
                entry.members.insert(name.clone(), id);
                new_decls.push(Declaration {
                    id,
                    visibility: Visibility::of(&name),
                    name: QualifiedName::new(&package.path, name),
                    kind,
                    package: pkg_id,
                    file: file_id,
                    span,
                });
            }
        }

        // Pass 2: attach methods to receiver types by name
        let mut new_methods = HashMap::new();
        for (file_id, def) in pending_methods {
            let Some(receiver) = def.receiver.as_ref() else {
                continue;
            };
            let type_name = receiver_type_name(&receiver.ty)
                .ok_or_else(|| VerifyError::unresolved(receiver.ty.node.to_string(), self.site(file_id, receiver.ty.span), None))?;
            let receiver_id = match entry.members.get(&type_name.node) {
                Some(&id) if new_decls[(id.0 as usize) - self.decls.len()].is_type() => id,
                _ => {
                    let types = new_decls.iter().filter(|d| d.is_type()).map(|d| d.local_name());
                    let hint = suggest(&type_name.node, types);
                    return Err(VerifyError::unresolved(
                        type_name.node.clone(),
                        self.site(file_id, type_name.span),
                        hint,
                    ));
                }
            };

            let method_name = def.name.node.clone();
            let id = DeclId((self.decls.len() + new_decls.len()) as u32);
            let qualified = QualifiedName::new(&package.path, format!("{}.{}", type_name.node, method_name));
            if let Some(&previous) = new_methods.get(&(receiver_id, method_name.clone())) {
                let previous = self.decl_location_in(&new_decls, previous);
                return Err(VerifyError::DuplicateDeclaration {
                    name: qualified.to_string(),
                    location: self.site(file_id, def.name.span),
                    previous,
                });
            }
            new_methods.insert((receiver_id, method_name.clone()), id);
            new_decls.push(Declaration {
                id,
                visibility: Visibility::of(&method_name),
                name: qualified,
                span: def.name.span,
                kind: DeclKind::Method { receiver: receiver_id, def },
                package: pkg_id,
                file: file_id,
            });
        }

        tracing::debug!(
            package = %package.path,
            declarations = new_decls.len(),
            "registered package"
        );
        for decl in new_decls {
            self.by_name.insert(decl.name.clone(), decl.id);
            self.decls.push(decl);
        }
        self.methods.extend(new_methods);
        self.by_path.insert(package.path, pkg_id);
        self.packages.push(entry);
        Ok(pkg_id)
    }

    // ------------------------------------------------------------------
    // Lookup
    // ------------------------------------------------------------------

    /// Package-level lookup. `Ok(None)` when nothing matches, so that the
    /// name resolver can continue with the universe scope.
    pub fn try_lookup(&self, ctx: &ResolutionContext, alias: Option<&str>, name: &str, span: Span) -> Result<Option<DeclId>> {
        if let Some(alias) = alias {
            let Some(&pkg) = ctx.aliases.get(alias) else {
                return Err(VerifyError::UnknownPackageAlias {
                    alias: alias.to_string(),
                    location: self.site(ctx.file, span),
                });
            };
            return Ok(self.visible_member(pkg, ctx.package, name));
        }

        if let Some(&id) = self.packages[ctx.package.0 as usize].members.get(name) {
            return Ok(Some(id));
        }

        let candidates: Vec<DeclId> = ctx
            .dot_imports
            .iter()
            .filter_map(|&pkg| self.visible_member(pkg, ctx.package, name))
            .collect();
        match candidates.as_slice() {
            [] => Ok(None),
            [id] => Ok(Some(*id)),
            many => Err(VerifyError::AmbiguousName {
                name: name.to_string(),
                location: self.site(ctx.file, span),
                candidates: many.iter().map(|id| self.decl(*id).name.to_string()).collect(),
            }),
        }
    }

    /// Resolve `name` (optionally qualified by an import alias) to exactly one declaration.
    pub fn lookup(&self, ctx: &ResolutionContext, alias: Option<&str>, name: &str, span: Span) -> Result<DeclId> {
        match self.try_lookup(ctx, alias, name, span)? {
            Some(id) => Ok(id),
            None => {
                let hint = self.suggest_member(ctx, alias, name);
                let shown = match alias {
                    Some(alias) => format!("{alias}.{name}"),
                    None => name.to_string(),
                };
                Err(VerifyError::unresolved(shown, self.site(ctx.file, span), hint))
            }
        }
    }

    fn visible_member(&self, pkg: PackageId, from: PackageId, name: &str) -> Option<DeclId> {
        let id = *self.packages[pkg.0 as usize].members.get(name)?;
        (pkg == from || self.decl(id).visibility == Visibility::Exported).then_some(id)
    }

    /// Closest visible member name for a `did you mean` hint
    pub fn suggest_member(&self, ctx: &ResolutionContext, alias: Option<&str>, name: &str) -> Option<String> {
        let packages: Vec<PackageId> = match alias {
            Some(alias) => ctx.aliases.get(alias).copied().into_iter().collect(),
            None => std::iter::once(ctx.package).chain(ctx.dot_imports.iter().copied()).collect(),
        };
        let names: Vec<&str> = packages
            .iter()
            .flat_map(|&pkg| {
                self.packages[pkg.0 as usize]
                    .members
                    .iter()
                    .filter(move |(_, id)| pkg == ctx.package || self.decl(**id).visibility == Visibility::Exported)
                    .map(|(name, _)| name.as_str())
            })
            .collect();
        suggest(name, names)
    }

    /// Method declared on `receiver` (a struct declaration) with the given name
    pub fn method(&self, receiver: DeclId, name: &str) -> Option<DeclId> {
        self.methods.get(&(receiver, name.to_string())).copied()
    }

    /// Names of all methods declared on a type
    pub fn method_names(&self, receiver: DeclId) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .methods
            .keys()
            .filter(|(owner, _)| *owner == receiver)
            .map(|(_, name)| name.as_str())
            .collect();
        names.sort_unstable();
        names
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn decl(&self, id: DeclId) -> &Declaration {
        &self.decls[id.0 as usize]
    }

    pub fn by_qualified_name(&self, name: &QualifiedName) -> Option<&Declaration> {
        self.by_name.get(name).map(|id| self.decl(*id))
    }

    pub fn declarations(&self) -> impl Iterator<Item = &Declaration> {
        self.decls.iter()
    }

    pub fn file(&self, id: FileId) -> &FileContext {
        &self.files[id.0 as usize]
    }

    pub fn files(&self) -> impl Iterator<Item = &FileContext> {
        self.files.iter()
    }

    pub fn package(&self, id: PackageId) -> &PackageEntry {
        &self.packages[id.0 as usize]
    }

    pub fn package_by_path(&self, path: &str) -> Option<&PackageEntry> {
        self.by_path.get(path).map(|id| self.package(*id))
    }

    pub fn packages(&self) -> impl Iterator<Item = &PackageEntry> {
        self.packages.iter()
    }

    /// Resolve a span of a file to `file:line:column`
    pub fn site(&self, file: FileId, span: Span) -> SourceLocation {
        let ctx = self.file(file);
        SourceLocation::new(&ctx.name, &ctx.lines, span)
    }

    pub fn location(&self, id: DeclId) -> SourceLocation {
        let decl = self.decl(id);
        self.site(decl.file, decl.span)
    }

    fn package_location(&self, pkg: PackageId) -> SourceLocation {
        let entry = self.package(pkg);
        match entry.files.first() {
            Some(&file) => self.site(file, self.file(file).package_clause),
            None => SourceLocation::new(&entry.path, &LineIndex::default(), Span::default()),
        }
    }

    /// Location of a declaration that may not have been committed yet
    fn decl_location_in(&self, pending: &[Declaration], id: DeclId) -> SourceLocation {
        let index = id.0 as usize;
        let decl = if index < self.decls.len() {
            &self.decls[index]
        } else {
            &pending[index - self.decls.len()]
        };
        self.site(decl.file, decl.span)
    }

    /// Human-readable dump, one declaration per line
    pub fn dump(&self) -> String {
        let mut out = String::new();
        for pkg in &self.packages {
            out.push_str(&format!("package {} ({})\n", pkg.path, pkg.name));
            for decl in self.decls.iter().filter(|d| d.package == pkg.id) {
                out.push_str(&format!(
                    "  {:<6} {} @ {}\n",
                    decl.kind_name(),
                    decl.name,
                    self.location(decl.id)
                ));
            }
        }
        out
    }
}

/// `T` or `*T` in receiver position
fn receiver_type_name(ty: &Spanned<TypeExpr>) -> Option<&Spanned<String>> {
    match &ty.node {
        TypeExpr::Named { package: None, name } => Some(name),
        TypeExpr::Pointer(inner) => receiver_type_name(inner),
        _ => None,
    }
}

/// Per-file resolution environment: current package, alias map, dot imports
#[derive(Debug, Clone)]
pub struct ResolutionContext {
    pub file: FileId,
    pub package: PackageId,
    pub aliases: HashMap<String, PackageId>,
    pub dot_imports: Vec<PackageId>,
}

impl ResolutionContext {
    pub fn new(table: &SymbolTable, file: FileId) -> Result<Self> {
        let ctx = table.file(file);
        let mut aliases = HashMap::new();
        let mut alias_sites: HashMap<String, Span> = HashMap::new();
        let mut dot_imports = Vec::new();

        for import in &ctx.imports {
            let Some(pkg) = table.package_by_path(&import.path.node) else {
                return Err(VerifyError::unresolved(
                    import.path.node.clone(),
                    table.site(file, import.path.span),
                    None,
                ));
            };
            let alias = match &import.alias {
                ImportAlias::Blank => continue,
                ImportAlias::Dot => {
                    dot_imports.push(pkg.id);
                    continue;
                }
                ImportAlias::Implicit => Spanned::new(pkg.name.clone(), import.span),
                ImportAlias::Named(alias) => alias.clone(),
            };
            if let Some(previous) = alias_sites.insert(alias.node.clone(), alias.span) {
                return Err(VerifyError::DuplicateDeclaration {
                    name: alias.node,
                    location: table.site(file, alias.span),
                    previous: table.site(file, previous),
                });
            }
            aliases.insert(alias.node, pkg.id);
        }

        Ok(Self {
            file,
            package: ctx.package,
            aliases,
            dot_imports,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_source;

    fn package(path: &str, files: &[(&str, &str)]) -> Package {
        let files = files
            .iter()
            .map(|(name, src)| parse_source(name, src).expect("parse"))
            .collect();
        Package::new(path, files)
    }

    const BAR: &str = "package bar\ntype Rectangle struct {\n  Width, Height int\n}\nfunc (r *Rectangle) Area() int {\n  return r.Width * r.Height\n}\nfunc helper() {}\n";

    fn table_with(main: &str, libs: &[(&str, &str)]) -> (SymbolTable, FileId) {
        let mut table = SymbolTable::new();
        table.register(package("main", &[("main.go", main)])).expect("register main");
        for (path, src) in libs {
            table.register(package(path, &[(&format!("{path}.go"), src)])).expect("register lib");
        }
        (table, FileId(0))
    }

    #[test]
    fn test_register_methods_named_type_dot_method() {
        let (table, _) = table_with("package main\n", &[("bar", BAR)]);
        let area = table
            .by_qualified_name(&QualifiedName::new("bar", "Rectangle.Area"))
            .expect("method registered");
        let rect = table.by_qualified_name(&QualifiedName::new("bar", "Rectangle")).unwrap();
        assert!(matches!(area.kind, DeclKind::Method { receiver, .. } if receiver == rect.id));
        assert_eq!(table.method(rect.id, "Area"), Some(area.id));
    }

    #[test]
    fn test_duplicate_function_rejected() {
        let mut table = SymbolTable::new();
        let err = table
            .register(package("p", &[("a.go", "package p\nfunc f() {}\n"), ("b.go", "package p\nfunc f() {}\n")]))
            .unwrap_err();
        assert!(matches!(err, VerifyError::DuplicateDeclaration { ref name, .. } if name == "p.f"));
    }

    #[test]
    fn test_duplicate_method_rejected() {
        let src = "package p\ntype T struct {\n  x int\n}\nfunc (t T) M() {}\nfunc (t *T) M() {}\n";
        let err = SymbolTable::new().register(package("p", &[("p.go", src)])).unwrap_err();
        assert!(matches!(err, VerifyError::DuplicateDeclaration { ref name, .. } if name == "p.T.M"));
    }

    #[test]
    fn test_duplicate_package_path_rejected() {
        let mut table = SymbolTable::new();
        table.register(package("p", &[("a.go", "package p\n")])).unwrap();
        let err = table.register(package("p", &[("b.go", "package p\n")])).unwrap_err();
        assert!(matches!(err, VerifyError::DuplicateDeclaration { .. }));
    }

    #[test]
    fn test_method_on_unknown_receiver() {
        let src = "package p\ntype Rect struct {\n  x int\n}\nfunc (r *Rectt) Area() {}\n";
        let err = SymbolTable::new().register(package("p", &[("p.go", src)])).unwrap_err();
        match err {
            VerifyError::UnresolvedName { name, hint, .. } => {
                assert_eq!(name, "Rectt");
                assert_eq!(hint.as_deref(), Some("did you mean `Rect`?"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_lookup_qualified_respects_alias() {
        let (table, file) = table_with("package main\nimport b \"bar\"\n", &[("bar", BAR)]);
        let ctx = ResolutionContext::new(&table, file).unwrap();
        let id = table.lookup(&ctx, Some("b"), "Rectangle", Span::default()).unwrap();
        assert_eq!(table.decl(id).name.to_string(), "bar.Rectangle");
    }

    #[test]
    fn test_lookup_unexported_is_not_candidate() {
        let (table, file) = table_with("package main\nimport b \"bar\"\n", &[("bar", BAR)]);
        let ctx = ResolutionContext::new(&table, file).unwrap();
        let err = table.lookup(&ctx, Some("b"), "helper", Span::default()).unwrap_err();
        assert!(matches!(err, VerifyError::UnresolvedName { .. }));
    }

    #[test]
    fn test_lookup_unknown_alias() {
        let (table, file) = table_with("package main\nimport b \"bar\"\n", &[("bar", BAR)]);
        let ctx = ResolutionContext::new(&table, file).unwrap();
        let err = table.lookup(&ctx, Some("c"), "Rectangle", Span::default()).unwrap_err();
        assert!(matches!(err, VerifyError::UnknownPackageAlias { ref alias, .. } if alias == "c"));
    }

    #[test]
    fn test_lookup_implicit_alias_uses_package_name() {
        let (table, file) = table_with("package main\nimport \"bar\"\n", &[("bar", BAR)]);
        let ctx = ResolutionContext::new(&table, file).unwrap();
        assert!(table.lookup(&ctx, Some("bar"), "Rectangle", Span::default()).is_ok());
    }

    #[test]
    fn test_local_package_shadows_dot_import() {
        let main = "package main\nimport . \"bar\"\ntype Rectangle struct {\n  Width int\n}\n";
        let (table, file) = table_with(main, &[("bar", BAR)]);
        let ctx = ResolutionContext::new(&table, file).unwrap();
        let id = table.lookup(&ctx, None, "Rectangle", Span::default()).unwrap();
        assert_eq!(table.decl(id).name.package, "main");
    }

    #[test]
    fn test_two_dot_imports_are_ambiguous() {
        let other = "package baz\ntype Rectangle struct {\n  Side int\n}\n";
        let (table, file) = table_with(
            "package main\nimport (\n  . \"bar\"\n  . \"baz\"\n)\n",
            &[("bar", BAR), ("baz", other)],
        );
        let ctx = ResolutionContext::new(&table, file).unwrap();
        let err = table.lookup(&ctx, None, "Rectangle", Span::default()).unwrap_err();
        match err {
            VerifyError::AmbiguousName { mut candidates, .. } => {
                candidates.sort();
                assert_eq!(candidates, ["bar.Rectangle", "baz.Rectangle"]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_blank_import_binds_nothing() {
        let (table, file) = table_with("package main\nimport _ \"bar\"\n", &[("bar", BAR)]);
        let ctx = ResolutionContext::new(&table, file).unwrap();
        assert!(ctx.aliases.is_empty());
        assert!(ctx.dot_imports.is_empty());
    }
}
