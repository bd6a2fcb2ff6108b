//! External SMT solver over SMT-LIB2
//!
//! The reduced query is piped to `<solver> -in -smt2 -t:<ms>`; the process is
//! polled and killed when the deadline passes.

use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use super::{OracleOutcome, ProofOracle};
use crate::logic::{ArithOp, CmpOp, Term};
use crate::theory::lower::{self, Reduced};
use crate::vcgen::ProofObligation;

const POLL_INTERVAL: Duration = Duration::from_millis(5);

#[derive(Debug, Clone)]
pub struct SmtOracle {
    solver: PathBuf,
}

impl SmtOracle {
    pub fn new(solver: PathBuf) -> Self {
        Self { solver }
    }

    fn run(&self, script: &str, budget: Duration) -> Result<String, String> {
        let mut child = Command::new(&self.solver)
            .arg("-in")
            .arg("-smt2")
            .arg(format!("-t:{}", budget.as_millis().max(1)))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| format!("solver unavailable: {}: {e}", self.solver.display()))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(script.as_bytes())
                .map_err(|e| format!("cannot write to solver: {e}"))?;
        }

        let deadline = Instant::now() + budget;
        loop {
            match child.try_wait() {
                Ok(Some(_)) => break,
                Ok(None) if Instant::now() >= deadline => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err("timeout".to_string());
                }
                Ok(None) => std::thread::sleep(POLL_INTERVAL),
                Err(e) => return Err(format!("solver failed: {e}")),
            }
        }

        let mut output = String::new();
        if let Some(mut stdout) = child.stdout.take() {
            stdout
                .read_to_string(&mut output)
                .map_err(|e| format!("cannot read solver output: {e}"))?;
        }
        Ok(output)
    }
}

impl ProofOracle for SmtOracle {
    fn name(&self) -> &'static str {
        "smt"
    }

    fn check(&self, obligation: &ProofObligation, axioms: &[Term], deadline: Instant) -> OracleOutcome {
        let query = super::query(obligation, axioms);
        if query.iter().any(|t| t.as_bool() == Some(false)) {
            return OracleOutcome::Proved;
        }
        let reduced = match lower::reduce(&query) {
            Ok(reduced) => reduced,
            Err(err) => return OracleOutcome::unknown(err.to_string()),
        };
        let budget = deadline.saturating_duration_since(Instant::now());
        if budget.is_zero() {
            return OracleOutcome::unknown("timeout");
        }

        let script = render_script(&reduced);
        trace!(%script, "smt query");
        let output = match self.run(&script, budget) {
            Ok(output) => output,
            Err(reason) => return OracleOutcome::unknown(reason),
        };
        let outcome = interpret(&reduced, &output);
        debug!(decl = %obligation.decl, %outcome, "smt oracle");
        outcome
    }
}

fn interpret(reduced: &Reduced, output: &str) -> OracleOutcome {
    let mut lines = output.lines().map(str::trim).filter(|l| !l.is_empty());
    match lines.next() {
        Some("unsat") => OracleOutcome::Proved,
        Some("sat") => {
            if reduced.opaque.iter().any(|d| d.op != ArithOp::Mul) {
                return OracleOutcome::unknown("model depends on division by a symbolic divisor");
            }
            let rest: Vec<&str> = lines.collect();
            OracleOutcome::Refuted {
                witness: super::witness(&reduced.labels, parse_values(&rest.join(" "))),
            }
        }
        Some("unknown") | Some("timeout") => OracleOutcome::unknown("solver returned unknown"),
        Some(other) => OracleOutcome::unknown(format!("unexpected solver output: {other}")),
        None => OracleOutcome::unknown("solver produced no output"),
    }
}

/// SMT-LIB2 script for a reduced query
pub fn render_script(reduced: &Reduced) -> String {
    let mut vars = std::collections::BTreeSet::new();
    for c in &reduced.constraints {
        vars.extend(c.free_vars());
    }
    for def in &reduced.opaque {
        vars.insert(def.var.clone());
        vars.extend(def.lhs.free_vars());
        vars.extend(def.rhs.free_vars());
    }

    let mut out = String::from("(set-option :produce-models true)\n(set-logic ALL)\n");
    for v in &vars {
        out.push_str(&format!("(declare-const {} {})\n", quote(&v.name), v.sort));
    }
    for c in &reduced.constraints {
        out.push_str("(assert ");
        render(c, &mut out);
        out.push_str(")\n");
    }
    for def in reduced.opaque.iter().filter(|d| d.op == ArithOp::Mul) {
        out.push_str(&format!("(assert (= {} ", quote(&def.var.name)));
        render(&Term::mul(def.lhs.clone(), def.rhs.clone()), &mut out);
        out.push_str("))\n");
    }
    out.push_str("(check-sat)\n");
    if !vars.is_empty() {
        let names: Vec<String> = vars.iter().map(|v| quote(&v.name)).collect();
        out.push_str(&format!("(get-value ({}))\n", names.join(" ")));
    }
    out
}

fn quote(name: &str) -> String {
    let simple = !name.is_empty()
        && !name.starts_with(|c: char| c.is_ascii_digit())
        && name.chars().all(|c| c.is_ascii_alphanumeric() || "~!@$%^&*_-+=<>.?/".contains(c));
    if simple { name.to_string() } else { format!("|{name}|") }
}

fn app(head: &str, args: &[&Term], out: &mut String) {
    out.push('(');
    out.push_str(head);
    for a in args {
        out.push(' ');
        render(a, out);
    }
    out.push(')');
}

fn render(t: &Term, out: &mut String) {
    match t {
        Term::Int(n) if *n < 0 => out.push_str(&format!("(- {})", n.unsigned_abs())),
        Term::Int(n) => out.push_str(&n.to_string()),
        Term::Bool(b) => out.push_str(&b.to_string()),
        Term::Var(sym) => out.push_str(&quote(&sym.name)),
        Term::Not(a) => app("not", &[a], out),
        Term::And(ts) => app("and", &ts.iter().collect::<Vec<_>>(), out),
        Term::Or(ts) => app("or", &ts.iter().collect::<Vec<_>>(), out),
        Term::Implies(a, b) => app("=>", &[a, b], out),
        Term::Ite(c, a, b) => app("ite", &[c, a, b], out),
        Term::Eq(a, b) => app("=", &[a, b], out),
        Term::Cmp(CmpOp::Lt, a, b) => app("<", &[a, b], out),
        Term::Cmp(CmpOp::Le, a, b) => app("<=", &[a, b], out),
        Term::Arith(ArithOp::Add, a, b) => app("+", &[a, b], out),
        Term::Arith(ArithOp::Sub, a, b) => app("-", &[a, b], out),
        Term::Arith(ArithOp::Mul, a, b) => app("*", &[a, b], out),
        Term::Neg(a) => app("-", &[a], out),
        // Not produced by the reduction
        other => out.push_str(&other.to_string()),
    }
}

#[derive(Debug, Clone, PartialEq)]
enum SExpr {
    Atom(String),
    List(Vec<SExpr>),
}

fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '(' | ')' => tokens.push(c.to_string()),
            '|' => {
                let mut quoted = String::new();
                for q in chars.by_ref() {
                    if q == '|' {
                        break;
                    }
                    quoted.push(q);
                }
                tokens.push(quoted);
            }
            c if c.is_whitespace() => {}
            c => {
                let mut atom = c.to_string();
                while let Some(&n) = chars.peek() {
                    if n.is_whitespace() || n == '(' || n == ')' {
                        break;
                    }
                    atom.push(n);
                    chars.next();
                }
                tokens.push(atom);
            }
        }
    }
    tokens
}

fn parse_sexpr(tokens: &[String], pos: &mut usize) -> Option<SExpr> {
    let token = tokens.get(*pos)?;
    *pos += 1;
    match token.as_str() {
        "(" => {
            let mut items = Vec::new();
            while tokens.get(*pos).is_some_and(|t| t != ")") {
                items.push(parse_sexpr(tokens, pos)?);
            }
            *pos += 1;
            Some(SExpr::List(items))
        }
        ")" => None,
        atom => Some(SExpr::Atom(atom.to_string())),
    }
}

fn value_text(value: &SExpr) -> Option<String> {
    match value {
        SExpr::Atom(a) => Some(a.clone()),
        SExpr::List(items) => match items.as_slice() {
            [SExpr::Atom(minus), SExpr::Atom(n)] if minus == "-" => Some(format!("-{n}")),
            _ => None,
        },
    }
}

/// Pairs of a `get-value` response
fn parse_values(text: &str) -> Vec<(String, String)> {
    let tokens = tokenize(text);
    let mut pos = 0;
    let Some(SExpr::List(pairs)) = parse_sexpr(&tokens, &mut pos) else {
        return Vec::new();
    };
    pairs
        .iter()
        .filter_map(|pair| match pair {
            SExpr::List(kv) => match kv.as_slice() {
                [SExpr::Atom(name), value] => Some((name.clone(), value_text(value)?)),
                _ => None,
            },
            SExpr::Atom(_) => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::{Sort, Symbol};
    use crate::theory::lower::OpaqueDef;

    fn int(name: &str) -> Term {
        Term::var(name, Sort::Int)
    }

    #[test]
    fn test_render_script() {
        let reduced = Reduced {
            constraints: vec![Term::le(Term::int(0), int("x")), Term::lt(int("m!1"), Term::int(-2))],
            opaque: vec![OpaqueDef {
                var: Symbol::new("nl!0", Sort::Int),
                op: ArithOp::Mul,
                lhs: int("x"),
                rhs: int("y"),
            }],
            labels: Default::default(),
        };
        insta::assert_snapshot!(render_script(&reduced), @r"
        (set-option :produce-models true)
        (set-logic ALL)
        (declare-const m!1 Int)
        (declare-const nl!0 Int)
        (declare-const x Int)
        (declare-const y Int)
        (assert (<= 0 x))
        (assert (< m!1 (- 2)))
        (assert (= nl!0 (* x y)))
        (check-sat)
        (get-value (m!1 nl!0 x y))
        ");
    }

    #[test]
    fn test_quote() {
        assert_eq!(quote("r.Width@1"), "r.Width@1");
        assert_eq!(quote("a b"), "|a b|");
        assert_eq!(quote("1x"), "|1x|");
    }

    #[test]
    fn test_parse_values() {
        let values = parse_values("((x 3)\n (|m!1| (- 2)) (p true))");
        assert_eq!(
            values,
            vec![
                ("x".to_string(), "3".to_string()),
                ("m!1".to_string(), "-2".to_string()),
                ("p".to_string(), "true".to_string()),
            ]
        );
    }

    #[test]
    fn test_interpret_sat_with_labels() {
        let mut reduced = Reduced::default();
        reduced.labels.insert("c!0".to_string(), "|m1|".to_string());
        let outcome = interpret(&reduced, "sat\n((c!0 1) (x 0) (ite!3 2))\n");
        let OracleOutcome::Refuted { witness } = outcome else {
            panic!("expected refutation");
        };
        assert_eq!(witness.get("|m1|").map(String::as_str), Some("1"));
        assert_eq!(witness.get("x").map(String::as_str), Some("0"));
        assert_eq!(witness.len(), 2);
        assert_eq!(interpret(&reduced, "unsat\n"), OracleOutcome::Proved);
        assert!(matches!(interpret(&reduced, "unknown\n"), OracleOutcome::Unknown { .. }));
    }

    #[test]
    fn test_missing_solver_is_unknown() {
        let oracle = SmtOracle::new(PathBuf::from("/nonexistent/ghostvc-solver"));
        let err = oracle.run("(check-sat)\n", Duration::from_millis(100)).unwrap_err();
        assert!(err.starts_with("solver unavailable"), "{err}");
    }
}
