//! Package loader
//!
//! Resolves import paths against include directories and parses every
//! package reachable from the entry files, each exactly once.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};

use crate::ast::{ImportAlias, Package, Program, SourceFile, SourceLocation};
use crate::error::{Result, VerifyError};
use crate::parser::parse_source;

/// File extensions recognized as package sources
const SOURCE_EXTENSIONS: &[&str] = &["gobra", "go"];

/// Source text of every loaded file, keyed by the name used in locations
#[derive(Debug, Clone, Default)]
pub struct SourceMap {
    files: BTreeMap<String, String>,
    /// Most recently inserted file, where a parse error happened
    last: Option<String>,
}

impl SourceMap {
    pub fn insert(&mut self, name: impl Into<String>, source: impl Into<String>) {
        let name = name.into();
        self.last = Some(name.clone());
        self.files.insert(name, source.into());
    }

    pub fn last(&self) -> Option<&str> {
        self.last.as_deref()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.files.get(name).map(String::as_str)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }
}

/// Loader for multi-package programs
#[derive(Debug)]
pub struct Loader {
    include_dirs: Vec<PathBuf>,
    /// Loaded packages in load order: entry package first
    packages: Vec<Package>,
    loaded: HashSet<String>,
    sources: SourceMap,
}

impl Loader {
    pub fn new(include_dirs: Vec<PathBuf>) -> Self {
        Self {
            include_dirs,
            packages: Vec::new(),
            loaded: HashSet::new(),
            sources: SourceMap::default(),
        }
    }

    pub fn include_dirs(&self) -> &[PathBuf] {
        &self.include_dirs
    }

    /// Parse the entry files as one package, then load its imports transitively.
    ///
    /// The directories of the entry files are searched after the configured
    /// include directories.
    pub fn load_entry(&mut self, files: &[PathBuf]) -> Result<()> {
        let mut parsed = Vec::with_capacity(files.len());
        for path in files {
            parsed.push(self.read_file(path)?);
            if let Some(parent) = path.parent() {
                let parent = parent.to_path_buf();
                if !self.include_dirs.contains(&parent) {
                    self.include_dirs.push(parent);
                }
            }
        }
        let Some(first) = parsed.first() else {
            return Err(VerifyError::config("no input files"));
        };
        let path = first.package.node.clone();
        self.add_package(Package::new(path, parsed))
    }

    /// Add an already parsed package and load everything it imports.
    pub fn add_package(&mut self, package: Package) -> Result<()> {
        self.loaded.insert(package.path.clone());
        let mut queue: VecDeque<(String, SourceLocation)> = imports_of(&package).collect();
        self.packages.push(package);

        while let Some((import_path, site)) = queue.pop_front() {
            if self.loaded.contains(&import_path) {
                continue;
            }
            let package = self.load_package(&import_path, &site)?;
            queue.extend(imports_of(&package));
            self.loaded.insert(import_path);
            self.packages.push(package);
        }
        Ok(())
    }

    /// Register in-memory source text as a file of the next package.
    pub fn parse_in_memory(&mut self, name: &str, source: &str) -> Result<SourceFile> {
        self.sources.insert(name, source);
        parse_source(name, source)
    }

    fn load_package(&mut self, import_path: &str, site: &SourceLocation) -> Result<Package> {
        let dir = self.resolve_package_dir(import_path).ok_or_else(|| {
            let searched: Vec<String> = self.include_dirs.iter().map(|d| d.display().to_string()).collect();
            VerifyError::unresolved(
                import_path,
                site.clone(),
                Some(format!("searched include directories: {}", searched.join(", "))),
            )
        })?;

        let mut paths: Vec<PathBuf> = std::fs::read_dir(&dir)
            .map_err(|e| VerifyError::io(dir.display().to_string(), &e))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| is_source_file(path))
            .collect();
        paths.sort();

        let mut files = Vec::with_capacity(paths.len());
        for path in &paths {
            files.push(self.read_file(path)?);
        }
        tracing::debug!(package = import_path, dir = %dir.display(), files = files.len(), "loaded package");
        Ok(Package::new(import_path, files))
    }

    /// First include directory holding `<dir>/<import_path>` with at least one source file
    fn resolve_package_dir(&self, import_path: &str) -> Option<PathBuf> {
        self.include_dirs
            .iter()
            .map(|dir| dir.join(import_path))
            .find(|candidate| {
                std::fs::read_dir(candidate)
                    .map(|mut entries| entries.any(|e| e.is_ok_and(|e| is_source_file(&e.path()))))
                    .unwrap_or(false)
            })
    }

    fn read_file(&mut self, path: &Path) -> Result<SourceFile> {
        let name = path.display().to_string();
        let source = std::fs::read_to_string(path).map_err(|e| VerifyError::io(name.clone(), &e))?;
        self.parse_in_memory(&name, &source)
    }

    pub fn finish(self) -> (Program, SourceMap) {
        (
            Program {
                packages: self.packages,
            },
            self.sources,
        )
    }
}

fn is_source_file(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| SOURCE_EXTENSIONS.contains(&ext))
}

/// Import paths of a package (blank imports excluded) with their sites
fn imports_of(package: &Package) -> impl Iterator<Item = (String, SourceLocation)> + '_ {
    package.files.iter().flat_map(|file| {
        file.imports
            .iter()
            .filter(|import| import.alias != ImportAlias::Blank)
            .map(move |import| {
                (
                    import.path.node.clone(),
                    SourceLocation::new(&file.name, &file.lines, import.path.span),
                )
            })
    })
}

/// Build a program from in-memory packages: `(import path, [(file name, source)])`.
/// The first package is the entry package.
pub fn load_sources(packages: &[(&str, &[(&str, &str)])]) -> Result<(Program, SourceMap)> {
    let mut loader = Loader::new(Vec::new());
    for (path, files) in packages {
        let mut parsed = Vec::with_capacity(files.len());
        for (name, source) in *files {
            parsed.push(loader.parse_in_memory(name, source)?);
        }
        loader.loaded.insert(path.to_string());
        loader.packages.push(Package::new(*path, parsed));
    }
    Ok(loader.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_load_entry_with_import() {
        let dir = tempfile::tempdir().unwrap();
        let bar = dir.path().join("bar");
        fs::create_dir(&bar).unwrap();
        fs::write(bar.join("bar.go"), "package bar\n\ntype Rectangle struct {\n  Width, Height int\n}\n").unwrap();
        let main = dir.path().join("main.go");
        fs::write(&main, "package main\n\nimport b \"bar\"\n\nfunc foo() {}\n").unwrap();

        let mut loader = Loader::new(vec![dir.path().to_path_buf()]);
        loader.load_entry(&[main]).unwrap();
        let (program, sources) = loader.finish();

        let paths: Vec<_> = program.packages.iter().map(|p| p.path.as_str()).collect();
        assert_eq!(paths, ["main", "bar"]);
        assert_eq!(program.packages[1].name, "bar");
        assert_eq!(sources.names().count(), 2);
    }

    #[test]
    fn test_entry_directory_is_searched() {
        let dir = tempfile::tempdir().unwrap();
        let lib = dir.path().join("lib");
        fs::create_dir(&lib).unwrap();
        fs::write(lib.join("lib.gobra"), "package lib\n").unwrap();
        let main = dir.path().join("main.gobra");
        fs::write(&main, "package main\nimport \"lib\"\n").unwrap();

        let mut loader = Loader::new(Vec::new());
        loader.load_entry(&[main]).unwrap();
        assert_eq!(loader.finish().0.packages.len(), 2);
    }

    #[test]
    fn test_missing_package_reports_import_site() {
        let dir = tempfile::tempdir().unwrap();
        let main = dir.path().join("main.go");
        fs::write(&main, "package main\n\nimport \"nowhere\"\n").unwrap();

        let mut loader = Loader::new(Vec::new());
        let err = loader.load_entry(&[main]).unwrap_err();
        match err {
            VerifyError::UnresolvedName { name, location, .. } => {
                assert_eq!(name, "nowhere");
                assert_eq!(location.line, 3);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_shared_import_loaded_once() {
        let dir = tempfile::tempdir().unwrap();
        for (pkg, src) in [
            ("a", "package a\nimport \"c\"\n"),
            ("b", "package b\nimport \"c\"\n"),
            ("c", "package c\n"),
        ] {
            let pkg_dir = dir.path().join(pkg);
            fs::create_dir(&pkg_dir).unwrap();
            fs::write(pkg_dir.join(format!("{pkg}.go")), src).unwrap();
        }
        let main = dir.path().join("main.go");
        fs::write(&main, "package main\nimport (\n  \"a\"\n  \"b\"\n)\n").unwrap();

        let mut loader = Loader::new(vec![dir.path().to_path_buf()]);
        loader.load_entry(&[main]).unwrap();
        let (program, _) = loader.finish();
        assert_eq!(program.packages.len(), 4);
    }

    #[test]
    fn test_load_sources_in_memory() {
        let (program, sources) = load_sources(&[("main", &[("main.go", "package main\n")])]).unwrap();
        assert_eq!(program.packages[0].name, "main");
        assert_eq!(sources.get("main.go"), Some("package main\n"));
    }
}
