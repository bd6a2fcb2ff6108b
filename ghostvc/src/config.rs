//! Verifier configuration
//!
//! Values come from built-in defaults, then `ghostvc.toml` (or the file named
//! with `--config`), then command-line flags.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, VerifyError};
use crate::oracle::OracleKind;
use crate::vcgen::DEFAULT_MAX_PATHS;

/// File looked up in the working directory when no `--config` is given
pub const CONFIG_FILE: &str = "ghostvc.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VerifierConfig {
    /// Per-obligation oracle deadline in milliseconds
    pub timeout_ms: u64,
    /// Declarations verified in parallel
    pub jobs: usize,
    pub oracle: OracleKind,
    /// External solver for the `smt` oracle
    pub solver_path: PathBuf,
    /// Discharge obligations that simplify to `true` without an oracle call
    pub fold_constants: bool,
    /// Execution paths per declaration before giving up
    pub max_paths: usize,
    /// Roots for resolving import paths
    pub include_dirs: Vec<PathBuf>,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            jobs: std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
            oracle: OracleKind::Builtin,
            solver_path: PathBuf::from("z3"),
            fold_constants: true,
            max_paths: DEFAULT_MAX_PATHS,
            include_dirs: Vec::new(),
        }
    }
}

impl VerifierConfig {
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: VerifierConfig = toml::from_str(text).map_err(|e| VerifyError::config(e.message().to_string()))?;
        config.validate()
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| VerifyError::io(path.display().to_string(), &e))?;
        Self::from_toml(&text).map_err(|e| VerifyError::config(format!("{}: {}", path.display(), e.message())))
    }

    /// `path` if given, else `ghostvc.toml` when present, else defaults
    pub fn discover(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None if Path::new(CONFIG_FILE).is_file() => Self::load(Path::new(CONFIG_FILE)),
            None => Ok(Self::default()),
        }
    }

    fn validate(self) -> Result<Self> {
        if self.jobs == 0 {
            return Err(VerifyError::config("`jobs` must be at least 1"));
        }
        if self.max_paths == 0 {
            return Err(VerifyError::config("`max_paths` must be at least 1"));
        }
        Ok(self)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Set the oracle deadline in milliseconds
    pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Set the number of worker threads; 0 is raised to 1
    pub fn jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs.max(1);
        self
    }

    pub fn oracle(mut self, oracle: OracleKind) -> Self {
        self.oracle = oracle;
        self
    }

    pub fn solver_path(mut self, path: PathBuf) -> Self {
        self.solver_path = path;
        self
    }

    pub fn include_dir(mut self, dir: PathBuf) -> Self {
        if !self.include_dirs.contains(&dir) {
            self.include_dirs.push(dir);
        }
        self
    }
}
