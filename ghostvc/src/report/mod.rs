//! Verification report
//!
//! One entry per declaration, keyed by qualified name. A declaration
//! verifies when it has no error and every obligation is proved.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::ast::SourceLocation;
use crate::error::VerifyError;
use crate::oracle::OracleOutcome;
use crate::vcgen::{ObligationKind, ProofObligation};

#[derive(Debug, Clone, Serialize)]
pub struct ObligationReport {
    pub id: usize,
    pub kind: ObligationKind,
    pub description: String,
    pub location: SourceLocation,
    pub outcome: OracleOutcome,
    pub elapsed_ms: u64,
}

/// Where and why a declaration first failed
#[derive(Debug, Clone, Serialize)]
pub struct Failure {
    pub location: SourceLocation,
    pub description: String,
    pub outcome: OracleOutcome,
}

/// A declaration-local error that stopped obligation generation
#[derive(Debug, Clone, Serialize)]
pub struct ErrorReport {
    pub kind: &'static str,
    pub message: String,
    pub location: Option<SourceLocation>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeclarationReport {
    pub name: String,
    pub location: SourceLocation,
    pub obligations: Vec<ObligationReport>,
    pub failure: Option<Failure>,
    pub error: Option<ErrorReport>,
}

impl DeclarationReport {
    pub fn new(name: impl Into<String>, location: SourceLocation) -> Self {
        Self {
            name: name.into(),
            location,
            obligations: Vec::new(),
            failure: None,
            error: None,
        }
    }

    pub fn from_error(name: impl Into<String>, location: SourceLocation, error: &VerifyError) -> Self {
        let mut report = Self::new(name, location);
        report.error = Some(ErrorReport {
            kind: error.kind(),
            message: error.message(),
            location: error.location().cloned(),
        });
        report
    }

    /// Record the outcome of one obligation; the first one not proved
    /// becomes the declaration's failure
    pub fn push(&mut self, obligation: &ProofObligation, outcome: OracleOutcome, elapsed: Duration) {
        if self.failure.is_none() && !outcome.is_proved() {
            self.failure = Some(Failure {
                location: obligation.location.clone(),
                description: obligation.description.clone(),
                outcome: outcome.clone(),
            });
        }
        self.obligations.push(ObligationReport {
            id: obligation.id,
            kind: obligation.kind,
            description: obligation.description.clone(),
            location: obligation.location.clone(),
            outcome,
            elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
        });
    }

    pub fn is_verified(&self) -> bool {
        self.error.is_none() && self.obligations.iter().all(|o| o.outcome.is_proved())
    }

    pub fn proved_count(&self) -> usize {
        self.obligations.iter().filter(|o| o.outcome.is_proved()).count()
    }
}

impl std::fmt::Display for DeclarationReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(error) = &self.error {
            writeln!(f, "! {}: {} error: {}", self.name, error.kind, error.message)?;
            if let Some(location) = &error.location {
                writeln!(f, "  at {location}")?;
            }
            return Ok(());
        }
        match &self.failure {
            None => writeln!(f, "✓ {}: verified ({} obligation(s))", self.name, self.obligations.len()),
            Some(failure) => {
                match &failure.outcome {
                    OracleOutcome::Unknown { reason } => {
                        writeln!(f, "? {}: {} unknown ({reason})", self.name, failure.description)?
                    }
                    _ => writeln!(f, "✗ {}: {} failed", self.name, failure.description)?,
                }
                writeln!(f, "  at {}", failure.location)?;
                if let OracleOutcome::Refuted { witness } = &failure.outcome
                    && !witness.is_empty()
                {
                    let values: Vec<String> = witness.iter().map(|(k, v)| format!("{k} = {v}")).collect();
                    writeln!(f, "  counterexample: {}", values.join(", "))?;
                }
                writeln!(
                    f,
                    "  {}/{} obligation(s) proved",
                    self.proved_count(),
                    self.obligations.len()
                )
            }
        }
    }
}

/// Report for one verification run
#[derive(Debug, Clone, Serialize)]
pub struct VerificationReport {
    pub started_at: DateTime<Utc>,
    pub oracle: String,
    pub declarations: BTreeMap<String, DeclarationReport>,
}

impl VerificationReport {
    pub fn new(oracle: impl Into<String>) -> Self {
        Self {
            started_at: Utc::now(),
            oracle: oracle.into(),
            declarations: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, report: DeclarationReport) {
        self.declarations.insert(report.name.clone(), report);
    }

    pub fn get(&self, name: &str) -> Option<&DeclarationReport> {
        self.declarations.get(name)
    }

    /// Check if all declarations verified
    pub fn all_verified(&self) -> bool {
        self.declarations.values().all(|d| d.is_verified())
    }

    pub fn verified_count(&self) -> usize {
        self.declarations.values().filter(|d| d.is_verified()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.declarations.len() - self.verified_count()
    }

    pub fn obligation_count(&self) -> usize {
        self.declarations.values().map(|d| d.obligations.len()).sum()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl std::fmt::Display for VerificationReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for decl in self.declarations.values() {
            write!(f, "{decl}")?;
        }

        writeln!(f)?;
        if self.all_verified() {
            writeln!(f, "All {} declaration(s) verified successfully.", self.declarations.len())?;
        } else {
            writeln!(
                f,
                "Verified: {}/{}, Failed: {}",
                self.verified_count(),
                self.declarations.len(),
                self.failed_count()
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{LineIndex, Span};
    use crate::logic::Term;
    use crate::oracle::Witness;

    fn loc(line: usize) -> SourceLocation {
        let source = "x\n".repeat(line);
        let offset = 2 * (line - 1);
        SourceLocation::new("main.go", &LineIndex::new(&source), Span::new(offset, offset + 1))
    }

    fn obligation(id: usize, kind: ObligationKind, description: &str, line: usize) -> ProofObligation {
        ProofObligation {
            id,
            decl: "main.f".into(),
            kind,
            description: description.into(),
            location: loc(line),
            assumptions: Vec::new(),
            goal: Term::Bool(true),
        }
    }

    fn sample() -> VerificationReport {
        let mut report = VerificationReport::new("builtin");

        let mut ok = DeclarationReport::new("main.Area", loc(3));
        ok.push(&obligation(0, ObligationKind::Postcondition, "postcondition of main.Area", 4), OracleOutcome::Proved, Duration::ZERO);
        report.insert(ok);

        let mut bad = DeclarationReport::new("main.foo", loc(8));
        let witness: Witness = [("x".to_string(), "3".to_string())].into_iter().collect();
        bad.push(&obligation(0, ObligationKind::Assertion, "assertion at line 9", 9), OracleOutcome::Proved, Duration::ZERO);
        bad.push(&obligation(1, ObligationKind::Assertion, "assertion at line 10", 10), OracleOutcome::Refuted { witness }, Duration::ZERO);
        bad.push(&obligation(2, ObligationKind::Assertion, "assertion at line 11", 11), OracleOutcome::unknown("timeout"), Duration::ZERO);
        report.insert(bad);

        let err = VerifyError::ghost_violation("main.g", "non-ghost code reads ghost `x`", loc(14));
        report.insert(DeclarationReport::from_error("main.g", loc(13), &err));
        report
    }

    #[test]
    fn test_first_failure_is_recorded() {
        let report = sample();
        let foo = report.get("main.foo").unwrap();
        assert!(!foo.is_verified());
        let failure = foo.failure.as_ref().unwrap();
        assert_eq!(failure.description, "assertion at line 10");
        assert_eq!(failure.location.line, 10);
        assert_eq!(foo.obligations.len(), 3);
        assert!(report.get("main.Area").unwrap().is_verified());
        assert!(!report.get("main.g").unwrap().is_verified());
        assert_eq!(report.verified_count(), 1);
        assert_eq!(report.failed_count(), 2);
        assert_eq!(report.obligation_count(), 4);
    }

    #[test]
    fn test_report_text() {
        insta::assert_snapshot!(sample().to_string(), @r"
        ✓ main.Area: verified (1 obligation(s))
        ✗ main.foo: assertion at line 10 failed
          at main.go:10:1
          counterexample: x = 3
          1/3 obligation(s) proved
        ! main.g: GhostViolation error: non-ghost code reads ghost `x`
          at main.go:14:1

        Verified: 1/3, Failed: 2
        ");
    }

    #[test]
    fn test_report_json() {
        let json: serde_json::Value = serde_json::from_str(&sample().to_json().unwrap()).unwrap();
        assert_eq!(json["oracle"], "builtin");
        let foo = &json["declarations"]["main.foo"];
        assert_eq!(foo["failure"]["outcome"]["status"], "refuted");
        assert_eq!(foo["failure"]["outcome"]["witness"]["x"], "3");
        assert_eq!(foo["obligations"][2]["outcome"]["reason"], "timeout");
        assert_eq!(foo["obligations"][0]["kind"], "assertion");
        assert!(json["started_at"].is_string());
    }

    #[test]
    fn test_empty_report_verifies() {
        let report = VerificationReport::new("smt");
        assert!(report.all_verified());
        assert!(report.to_string().contains("All 0 declaration(s) verified successfully."));
    }
}
