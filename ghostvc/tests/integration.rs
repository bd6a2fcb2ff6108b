//! End-to-end tests for ghostvc
//!
//! Load packages, resolve, generate obligations and discharge them with the
//! builtin oracle:
//! - set and multiset fixtures
//! - shadowed types across package namespaces
//! - `old(...)` snapshots and permissions
//! - declaration-local failures

use std::path::PathBuf;

use ghostvc::VerifierConfig;
use ghostvc::driver::Verifier;
use ghostvc::loader::{Loader, load_sources};
use ghostvc::oracle::OracleOutcome;
use ghostvc::report::VerificationReport;
use ghostvc::resolver::resolve_program;
use ghostvc::symbols::SymbolTable;
use ghostvc::vcgen::ObligationKind;

fn fixtures() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests").join("fixtures")
}

fn config() -> VerifierConfig {
    VerifierConfig::default().jobs(2)
}

/// Verify fixture files as the entry package, with the fixture directory
/// as include root
fn verify_fixture(dir: &str, files: &[&str]) -> VerificationReport {
    let root = fixtures().join(dir);
    let mut loader = Loader::new(vec![root.clone()]);
    let paths: Vec<PathBuf> = files.iter().map(|f| root.join(f)).collect();
    loader.load_entry(&paths).expect("fixture loads");
    let (program, _) = loader.finish();
    Verifier::new(config()).verify_program(program).expect("fixture resolves")
}

fn verify_source(src: &str) -> VerificationReport {
    let (program, _) = load_sources(&[("p", &[("p.go", src)])]).expect("source parses");
    Verifier::new(config()).verify_program(program).expect("source resolves")
}

fn assert_verified(report: &VerificationReport, name: &str) {
    let decl = report.get(name).unwrap_or_else(|| panic!("no report for {name}:\n{report}"));
    assert!(decl.is_verified(), "{name} should verify:\n{report}");
}

fn assert_refuted(report: &VerificationReport, name: &str) -> String {
    let decl = report.get(name).unwrap_or_else(|| panic!("no report for {name}:\n{report}"));
    let failure = decl.failure.as_ref().unwrap_or_else(|| panic!("{name} should fail:\n{report}"));
    assert!(
        matches!(failure.outcome, OracleOutcome::Refuted { .. }),
        "{name} should be refuted, got {}:\n{report}",
        failure.outcome
    );
    failure.description.clone()
}

// ============================================================================
// Sets and multisets
// ============================================================================

#[test]
fn test_multiset_contains_fixture() {
    let report = verify_fixture("collections", &["multiset-contains-simple1.go"]);
    for i in 1..=7 {
        assert_verified(&report, &format!("pkg.example{i}"));
    }
    assert!(report.all_verified(), "{report}");
}

#[test]
fn test_multiset_cardinality_fixture() {
    let report = verify_fixture("collections", &["multiset-cardinality-simple1.go"]);
    assert_verified(&report, "pkg.example1");
    assert_verified(&report, "pkg.example2");
    // union takes the maximum multiplicity: |{1,2} union {2,3}| is 3, not 4
    assert_eq!(assert_refuted(&report, "pkg.example3"), "assertion at line 15");
    let example3 = report.get("pkg.example3").unwrap();
    assert_eq!(example3.proved_count(), 3);
    // for the same reason cardinalities do not add up
    let description = assert_refuted(&report, "pkg.example4");
    assert_eq!(description, "postcondition of pkg.example4");
}

#[test]
fn test_union_cardinality_of_literals() {
    let src = "package p\nfunc f() {\n\
        assert |mset[int]{1, 2, 2} union mset[int]{2, 3}| == 4\n\
        assert |mset[int]{1, 2} union mset[int]{2, 3}| == 3\n\
        assert |set[int]{1, 2} union set[int]{2, 3}| == 3\n}\n";
    assert_verified(&verify_source(src), "p.f");
}

#[test]
fn test_set_multiplicity_fixture() {
    let report = verify_fixture("collections", &["set-multiplicity-simple1.go"]);
    assert!(report.all_verified(), "{report}");
    assert_eq!(report.declarations.len(), 6);
}

#[test]
fn test_multiset_union_bounds() {
    let src = "package p\n\
        ensures |m1 union m2| >= |m1| && |m1 union m2| >= |m2|\n\
        ensures |m1 union m2| <= |m1| + |m2|\n\
        func f(ghost m1 mset[int], ghost m2 mset[int]) {\n}\n";
    assert_verified(&verify_source(src), "p.f");
}

#[test]
fn test_multiplicity_is_bounded_by_cardinality() {
    let src = "package p\n\
        ensures 0 <= x # m && x # m <= |m|\n\
        func f(ghost x int, ghost m mset[int]) {\n}\n\
        requires s1 subset s2\n\
        ensures x # s1 <= x # s2\n\
        func g(ghost x int, ghost s1 mset[int], ghost s2 mset[int]) {\n}\n";
    let report = verify_source(src);
    assert_verified(&report, "p.f");
    assert_verified(&report, "p.g");
}

#[test]
fn test_wrong_membership_refuted() {
    let src = "package p\nfunc f(ghost x int, ghost m1 mset[int], ghost m2 mset[int]) {\n  assert x in m1 union m2 ==> x in m1\n}\n";
    let report = verify_source(src);
    assert_eq!(assert_refuted(&report, "p.f"), "assertion at line 3");
}

// ============================================================================
// Package namespaces
// ============================================================================

#[test]
fn test_namespace_import_selects_shadowed_types() {
    let report = verify_fixture("namespace_import", &["main.go"]);
    assert_verified(&report, "main.foo");
    assert_verified(&report, "main.Rectangle.Area");
    assert_verified(&report, "bar.Rectangle.Area");
    let foo = report.get("main.foo").unwrap();
    assert_eq!(
        foo.obligations.iter().filter(|o| o.kind == ObligationKind::Assertion).count(),
        4
    );
}

const BAR: &str = "package bar\n\
type Rectangle struct {\n  Width, Height int\n}\n\
requires acc(r.Width) && acc(r.Height)\n\
ensures acc(r.Width) && acc(r.Height)\n\
ensures r.Width == old(r.Width) && r.Height == old(r.Height)\n\
ensures res == r.Width * r.Height\n\
func (r *Rectangle) Area() (res int) {\n  return r.Width * r.Height\n}\n";

const MAIN_HEADER: &str = "package main\nimport b \"bar\"\n\
type Rectangle struct {\n  Width, Height int\n}\n\
requires acc(r.Width)\n\
ensures acc(r.Width)\n\
ensures res == r.Width * r.Width\n\
ensures old(r.Width) == r.Width\n\
func (r *Rectangle) Area() (res int) {\n  return r.Width * r.Width\n}\n";

fn verify_with_bar(body: &str) -> VerificationReport {
    let main = format!("{MAIN_HEADER}func foo() {{\n{body}}}\n");
    let (program, _) = load_sources(&[("main", &[("main.go", &main)]), ("bar", &[("bar.go", BAR)])]).expect("sources parse");
    Verifier::new(config()).verify_program(program).expect("sources resolve")
}

#[test]
fn test_imported_area_cannot_be_the_local_one() {
    let report = verify_with_bar("  r! := b.Rectangle{Width: 2, Height: 5}\n  assert r.Area() == 4\n");
    assert_refuted(&report, "main.foo");
    let failure = report.get("main.foo").unwrap().failure.as_ref().unwrap();
    assert_eq!(failure.location.line, 15);
}

#[test]
fn test_local_area_cannot_be_the_imported_one() {
    let report = verify_with_bar("  r1! := Rectangle{Width: 2, Height: 5}\n  assert (*(Rectangle)).Area(&r1) == 10\n");
    assert_refuted(&report, "main.foo");
}

#[test]
fn test_positional_composite_literal() {
    let report = verify_with_bar("  r! := b.Rectangle{2, 5}\n  assert r.Area() == 10\n  assert r.Width == 2\n");
    assert_verified(&report, "main.foo");
}

// ============================================================================
// Snapshots and permissions
// ============================================================================

const COUNTER: &str = "package p\ntype Counter struct {\n  N int\n}\n";

#[test]
fn test_old_unchanged_field_verifies() {
    let src = format!(
        "{COUNTER}requires acc(c.N)\nensures acc(c.N) && old(c.N) == c.N\nfunc (c *Counter) Peek() (n int) {{\n  n = c.N\n  return\n}}\n"
    );
    assert_verified(&verify_source(&src), "p.Counter.Peek");
}

#[test]
fn test_old_mutated_field_refuted() {
    let src = format!(
        "{COUNTER}requires acc(c.N)\nensures acc(c.N)\nensures old(c.N) == c.N\nfunc (c *Counter) Grow() {{\n  c.N = c.N + 1\n}}\n"
    );
    let report = verify_source(&src);
    assert_eq!(assert_refuted(&report, "p.Counter.Grow"), "postcondition of p.Counter.Grow");
}

#[test]
fn test_old_relates_pre_and_post_state() {
    let src = format!(
        "{COUNTER}requires acc(c.N)\nensures acc(c.N) && c.N == old(c.N) + 1\nfunc (c *Counter) Grow() {{\n  c.N = c.N + 1\n}}\n\
         func use() {{\n  c! := Counter{{N: 1}}\n  c.Grow()\n  c.Grow()\n  assert c.N == 3\n}}\n"
    );
    let report = verify_source(&src);
    assert_verified(&report, "p.Counter.Grow");
    assert_verified(&report, "p.use");
}

#[test]
fn test_field_read_without_permission_fails() {
    let src = format!("{COUNTER}func (c *Counter) Peek() (n int) {{\n  return c.N\n}}\n");
    let report = verify_source(&src);
    let failure = report.get("p.Counter.Peek").unwrap().failure.as_ref().unwrap();
    assert_eq!(failure.description, "permission to read c.N");
}

#[test]
fn test_permission_handed_to_callee_is_not_returned() {
    let src = format!(
        "{COUNTER}requires acc(c.N)\nfunc (c *Counter) Take()\n\
         requires acc(c.N)\nensures acc(c.N)\nfunc (c *Counter) Twice() {{\n  c.Take()\n}}\n"
    );
    let report = verify_source(&src);
    let failure = report.get("p.Counter.Twice").unwrap().failure.as_ref().unwrap();
    assert_eq!(failure.description, "permission to c.N at return");
}

// ============================================================================
// Control flow
// ============================================================================

#[test]
fn test_branches_and_loops() {
    let src = "package p\n\
        requires n >= 0\n\
        ensures s == n\n\
        func count(n int) (s int) {\n\
          i := 0\n\
          invariant 0 <= i && i <= n && s == i\n\
          for i < n {\n\
            i = i + 1\n\
            s = s + 1\n\
          }\n\
          return\n\
        }\n\
        ensures m >= x && m >= y\n\
        func larger(x int, y int) (m int) {\n\
          if x > y {\n\
            return x\n\
          }\n\
          return y\n\
        }\n";
    let report = verify_source(src);
    assert_verified(&report, "p.count");
    assert_verified(&report, "p.larger");
}

#[test]
fn test_pure_function_unfolds_at_call() {
    let src = "package p\n\
        pure func sq(x int) int {\n  return x * x\n}\n\
        func f() {\n  assert sq(3) == 9\n}\n";
    assert_verified(&verify_source(src), "p.f");
}

// ============================================================================
// Declaration-local failures
// ============================================================================

#[test]
fn test_ghost_violation_fails_only_its_declaration() {
    let src = "package p\n\
        func leak(ghost x int) (y int) {\n  y = x\n  return\n}\n\
        func fine() {\n  assert 1 < 2\n}\n";
    let report = verify_source(src);
    let leak = report.get("p.leak").unwrap();
    assert_eq!(leak.error.as_ref().unwrap().kind, "GhostViolation");
    assert_verified(&report, "p.fine");
    assert_eq!(report.failed_count(), 1);
}

#[test]
fn test_unresolved_postcondition_fails_only_its_declaration() {
    let src = "package p\n\
        ensures zz == 1\n\
        func f() (n int) {\n  return 1\n}\n\
        func fine() {\n  assert 1 < 2\n}\n";
    let report = verify_source(src);
    let f = report.get("p.f").unwrap();
    let error = f.error.as_ref().unwrap();
    assert_eq!(error.kind, "IllFormedContract");
    assert_eq!(error.location.as_ref().unwrap().line, 2);
    assert_verified(&report, "p.fine");
    assert_eq!(report.failed_count(), 1);
}

#[test]
fn test_resolution_is_idempotent() {
    let root = fixtures().join("namespace_import");
    let mut loader = Loader::new(vec![root.clone()]);
    loader.load_entry(&[root.join("main.go")]).unwrap();
    let (program, _) = loader.finish();
    let table = SymbolTable::from_program(program).unwrap();
    let first = resolve_program(&table).unwrap();
    let second = resolve_program(&table).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_report_json_round_trip_fields() {
    let report = verify_fixture("collections", &["multiset-cardinality-simple1.go"]);
    let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
    assert_eq!(json["declarations"]["pkg.example4"]["failure"]["outcome"]["status"], "refuted");
    assert_eq!(json["oracle"], "builtin");
}
