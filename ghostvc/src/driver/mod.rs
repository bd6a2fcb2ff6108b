//! Verification runs
//!
//! Declarations are independent units verified on a bounded rayon pool.
//! Obligations of one declaration go to the oracle one after another, each
//! with its own deadline.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use rayon::prelude::*;
use tracing::{debug, info, trace};

use crate::ast::Program;
use crate::config::VerifierConfig;
use crate::contract::ContractDb;
use crate::error::{Result, VerifyError};
use crate::logic::simplify;
use crate::oracle::{self, OracleOutcome, ProofOracle};
use crate::report::{DeclarationReport, VerificationReport};
use crate::resolver::{Bindings, resolve_program};
use crate::symbols::{DeclId, SymbolTable};
use crate::theory::axioms;
use crate::vcgen::{ProofObligation, VcContext, generate};

/// Stops a run from scheduling further oracle calls. Obligations not yet
/// checked are reported unknown.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle(Arc<AtomicBool>);

impl AbortHandle {
    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct Verifier {
    config: VerifierConfig,
    oracle: Arc<dyn ProofOracle>,
    abort: AbortHandle,
}

impl Verifier {
    pub fn new(config: VerifierConfig) -> Self {
        let oracle = oracle::from_config(&config);
        Self::with_oracle(config, oracle)
    }

    pub fn with_oracle(config: VerifierConfig, oracle: Arc<dyn ProofOracle>) -> Self {
        Self {
            config,
            oracle,
            abort: AbortHandle::default(),
        }
    }

    pub fn config(&self) -> &VerifierConfig {
        &self.config
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    /// Build the symbol table, resolve, then verify. Resolution errors are
    /// fatal for the run.
    pub fn verify_program(&self, program: Program) -> Result<VerificationReport> {
        let table = SymbolTable::from_program(program)?;
        let bindings = resolve_program(&table)?;
        self.verify(&table, &bindings)
    }

    pub fn verify(&self, table: &SymbolTable, bindings: &Bindings) -> Result<VerificationReport> {
        let contracts = ContractDb::build(table, bindings);
        let ctx = VcContext::new(table, bindings, &contracts).with_max_paths(self.config.max_paths);
        let decls: Vec<DeclId> = table.declarations().filter(|d| d.func().is_some()).map(|d| d.id).collect();
        info!(
            declarations = decls.len(),
            oracle = self.oracle.name(),
            jobs = self.config.jobs,
            "verification started"
        );

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.jobs)
            .build()
            .map_err(|e| VerifyError::config(format!("cannot start worker pool: {e}")))?;
        let reports: Vec<DeclarationReport> =
            pool.install(|| decls.par_iter().map(|&id| self.verify_declaration(&ctx, id)).collect());

        let mut report = VerificationReport::new(self.oracle.name());
        for decl in reports {
            report.insert(decl);
        }
        info!(
            verified = report.verified_count(),
            failed = report.failed_count(),
            obligations = report.obligation_count(),
            "verification finished"
        );
        Ok(report)
    }

    fn verify_declaration(&self, ctx: &VcContext<'_>, id: DeclId) -> DeclarationReport {
        let name = ctx.table.decl(id).name.to_string();
        let location = ctx.table.location(id);
        let obligations = match generate(ctx, id) {
            Ok(obligations) => obligations,
            Err(err) => {
                debug!(decl = %name, kind = err.kind(), error = %err.message(), "declaration rejected");
                return DeclarationReport::from_error(name, location, &err);
            }
        };

        let mut report = DeclarationReport::new(name, location);
        for obligation in &obligations {
            let start = Instant::now();
            let outcome = self.discharge(obligation);
            debug!(decl = %obligation.decl, id = obligation.id, description = %obligation.description, %outcome, "obligation");
            report.push(obligation, outcome, start.elapsed());
        }
        debug!(decl = %report.name, verified = report.is_verified(), "declaration done");
        report
    }

    fn discharge(&self, obligation: &ProofObligation) -> OracleOutcome {
        if self.abort.is_aborted() {
            return OracleOutcome::unknown("aborted");
        }
        if self.config.fold_constants && simplify(&obligation.formula()).is_true() {
            trace!(decl = %obligation.decl, id = obligation.id, "folded to true");
            return OracleOutcome::Proved;
        }

        let mut terms = obligation.assumptions.clone();
        terms.push(obligation.goal.clone());
        let axioms = axioms::background(&terms);
        trace!(decl = %obligation.decl, id = obligation.id, axioms = axioms.len(), "querying oracle");

        let deadline = Instant::now() + self.config.timeout();
        let outcome = self.oracle.check(obligation, &axioms, deadline);
        match outcome {
            OracleOutcome::Unknown { .. } if Instant::now() >= deadline => OracleOutcome::unknown("timeout"),
            outcome => outcome,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::load_sources;
    use crate::logic::Term;

    /// Refutes every obligation it is asked about
    struct Refuter;

    impl ProofOracle for Refuter {
        fn name(&self) -> &'static str {
            "refuter"
        }

        fn check(&self, _: &ProofObligation, _: &[Term], _: Instant) -> OracleOutcome {
            OracleOutcome::Refuted {
                witness: Default::default(),
            }
        }
    }

    fn run(src: &str, config: VerifierConfig) -> VerificationReport {
        let (program, _) = load_sources(&[("p", &[("p.go", src)])]).unwrap();
        Verifier::new(config).verify_program(program).unwrap()
    }

    #[test]
    fn test_verifies_simple_postcondition() {
        let src = "package p\nrequires x >= 0\nensures y > x\nfunc f(x int) (y int) {\n  return x + 1\n}\n";
        let report = run(src, VerifierConfig::default().jobs(2));
        assert!(report.all_verified(), "{report}");
        assert_eq!(report.get("p.f").unwrap().obligations.len(), 1);
    }

    #[test]
    fn test_refutes_wrong_postcondition() {
        let src = "package p\nensures y > x\nfunc f(x int) (y int) {\n  return x - 1\n}\n";
        let report = run(src, VerifierConfig::default());
        let f = report.get("p.f").unwrap();
        assert!(!f.is_verified());
        let failure = f.failure.as_ref().unwrap();
        assert_eq!(failure.description, "postcondition of p.f");
        assert!(matches!(failure.outcome, OracleOutcome::Refuted { .. }));
    }

    #[test]
    fn test_declaration_errors_stay_local() {
        let src = "package p\nrequires old(x) > 0\nfunc g(x int) {\n}\nfunc h() {\n  assert 1 + 1 == 2\n}\n";
        let report = run(src, VerifierConfig::default());
        assert_eq!(report.get("p.g").unwrap().error.as_ref().unwrap().kind, "IllFormedContract");
        assert!(report.get("p.h").unwrap().is_verified());
    }

    #[test]
    fn test_constant_obligations_skip_oracle() {
        let src = "package p\nfunc f() {\n  assert 2 * 3 == 6\n}\n";
        let (program, _) = load_sources(&[("p", &[("p.go", src)])]).unwrap();
        let verifier = Verifier::with_oracle(VerifierConfig::default(), Arc::new(Refuter));
        assert!(verifier.verify_program(program).unwrap().all_verified());

        let (program, _) = load_sources(&[("p", &[("p.go", src)])]).unwrap();
        let mut config = VerifierConfig::default();
        config.fold_constants = false;
        let verifier = Verifier::with_oracle(config, Arc::new(Refuter));
        assert!(!verifier.verify_program(program).unwrap().all_verified());
    }

    #[test]
    fn test_abort_reports_unknown() {
        let src = "package p\nfunc f(x int) {\n  assert x == x\n}\n";
        let (program, _) = load_sources(&[("p", &[("p.go", src)])]).unwrap();
        let mut config = VerifierConfig::default();
        config.fold_constants = false;
        let verifier = Verifier::new(config);
        verifier.abort_handle().abort();
        let report = verifier.verify_program(program).unwrap();
        let f = report.get("p.f").unwrap();
        assert_eq!(f.obligations[0].outcome, OracleOutcome::unknown("aborted"));
    }

    #[test]
    fn test_resolution_errors_are_fatal() {
        let src = "package p\nfunc f() {\n  assert y == 1\n}\n";
        let (program, _) = load_sources(&[("p", &[("p.go", src)])]).unwrap();
        let err = Verifier::new(VerifierConfig::default()).verify_program(program).unwrap_err();
        assert_eq!(err.kind(), "UnresolvedName");
    }
}
