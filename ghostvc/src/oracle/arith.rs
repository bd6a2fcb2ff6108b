//! Integer feasibility of linear constraints
//!
//! Equalities with a unit coefficient are eliminated by substitution, the
//! remaining inequalities by Fourier-Motzkin with GCD tightening. Rational
//! infeasibility proves integer infeasibility; a feasible system gets an
//! integer model by back-substitution, which can fail in the gaps FM does
//! not see (reported as unknown).

use std::collections::{BTreeMap, BTreeSet};

use crate::logic::{ArithOp, Term};

/// Bound on the constraint set while eliminating
const MAX_CONSTRAINTS: usize = 20_000;

/// `Σ coeffs[x]·x + constant`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct LinExpr {
    pub coeffs: BTreeMap<String, i128>,
    pub constant: i128,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArithError {
    Overflow,
    NonLinear(String),
}

impl LinExpr {
    pub fn constant(k: i128) -> Self {
        Self {
            coeffs: BTreeMap::new(),
            constant: k,
        }
    }

    pub fn var(name: &str) -> Self {
        let mut coeffs = BTreeMap::new();
        coeffs.insert(name.to_string(), 1);
        Self { coeffs, constant: 0 }
    }

    /// Linear form of an integer term without if-then-else
    pub fn from_term(term: &Term) -> Result<LinExpr, ArithError> {
        match term {
            Term::Int(n) => Ok(LinExpr::constant(*n)),
            Term::Var(sym) => Ok(LinExpr::var(&sym.name)),
            Term::Neg(t) => LinExpr::from_term(t)?.scale(-1),
            Term::Arith(ArithOp::Add, a, b) => LinExpr::from_term(a)?.add(&LinExpr::from_term(b)?, 1),
            Term::Arith(ArithOp::Sub, a, b) => LinExpr::from_term(a)?.add(&LinExpr::from_term(b)?, -1),
            Term::Arith(ArithOp::Mul, a, b) => {
                let (a, b) = (LinExpr::from_term(a)?, LinExpr::from_term(b)?);
                if a.is_constant() {
                    b.scale(a.constant)
                } else if b.is_constant() {
                    a.scale(b.constant)
                } else {
                    Err(ArithError::NonLinear(term.to_string()))
                }
            }
            other => Err(ArithError::NonLinear(other.to_string())),
        }
    }

    pub fn is_constant(&self) -> bool {
        self.coeffs.is_empty()
    }

    pub fn scale(&self, k: i128) -> Result<LinExpr, ArithError> {
        if k == 0 {
            return Ok(LinExpr::default());
        }
        let mut coeffs = BTreeMap::new();
        for (x, c) in &self.coeffs {
            coeffs.insert(x.clone(), c.checked_mul(k).ok_or(ArithError::Overflow)?);
        }
        Ok(LinExpr {
            coeffs,
            constant: self.constant.checked_mul(k).ok_or(ArithError::Overflow)?,
        })
    }

    /// `self + k·other`
    pub fn add(&self, other: &LinExpr, k: i128) -> Result<LinExpr, ArithError> {
        let mut out = self.clone();
        for (x, c) in &other.coeffs {
            let term = c.checked_mul(k).ok_or(ArithError::Overflow)?;
            let entry = out.coeffs.entry(x.clone()).or_insert(0);
            *entry = entry.checked_add(term).ok_or(ArithError::Overflow)?;
            if *entry == 0 {
                out.coeffs.remove(x);
            }
        }
        let k_const = other.constant.checked_mul(k).ok_or(ArithError::Overflow)?;
        out.constant = out.constant.checked_add(k_const).ok_or(ArithError::Overflow)?;
        Ok(out)
    }

    /// Replace `x` by `def`
    fn substitute(&self, x: &str, def: &LinExpr) -> Result<LinExpr, ArithError> {
        match self.coeffs.get(x) {
            None => Ok(self.clone()),
            Some(&c) => {
                let mut rest = self.clone();
                rest.coeffs.remove(x);
                rest.add(def, c)
            }
        }
    }

    fn gcd_of_coeffs(&self) -> i128 {
        self.coeffs.values().fold(0, |g, c| gcd(g, *c))
    }

    fn eval(&self, model: &BTreeMap<String, i128>) -> Result<i128, ArithError> {
        let mut sum = self.constant;
        for (x, c) in &self.coeffs {
            let v = model.get(x).copied().unwrap_or(0);
            sum = c
                .checked_mul(v)
                .and_then(|p| sum.checked_add(p))
                .ok_or(ArithError::Overflow)?;
        }
        Ok(sum)
    }
}

/// `expr <= 0` or `expr == 0`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Constraint {
    Le(LinExpr),
    Eq(LinExpr),
}

impl Constraint {
    fn expr(&self) -> &LinExpr {
        match self {
            Constraint::Le(e) | Constraint::Eq(e) => e,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Feasibility {
    Infeasible,
    Feasible(BTreeMap<String, i128>),
    Unknown(String),
}

enum Normalized {
    Trivial,
    Contradiction,
    Constraint(Constraint),
}

fn gcd(a: i128, b: i128) -> i128 {
    let (mut a, mut b) = (a.unsigned_abs(), b.unsigned_abs());
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a as i128
}

fn div_floor(a: i128, b: i128) -> i128 {
    let q = a / b;
    if (a % b != 0) && ((a < 0) != (b < 0)) { q - 1 } else { q }
}

fn div_ceil(a: i128, b: i128) -> i128 {
    let q = a / b;
    if (a % b != 0) && ((a < 0) == (b < 0)) { q + 1 } else { q }
}

/// Divide by the coefficient GCD, tightening inequality constants
fn normalize(c: Constraint) -> Normalized {
    let e = c.expr();
    if e.is_constant() {
        let holds = match &c {
            Constraint::Le(e) => e.constant <= 0,
            Constraint::Eq(e) => e.constant == 0,
        };
        return if holds { Normalized::Trivial } else { Normalized::Contradiction };
    }
    let g = e.gcd_of_coeffs();
    if g <= 1 {
        return Normalized::Constraint(c);
    }
    let coeffs = e.coeffs.iter().map(|(x, k)| (x.clone(), k / g)).collect();
    match c {
        Constraint::Le(e) => Normalized::Constraint(Constraint::Le(LinExpr {
            coeffs,
            constant: div_ceil(e.constant, g),
        })),
        Constraint::Eq(e) if e.constant % g != 0 => Normalized::Contradiction,
        Constraint::Eq(e) => Normalized::Constraint(Constraint::Eq(LinExpr {
            coeffs,
            constant: e.constant / g,
        })),
    }
}

/// Back-substitution record
enum Step {
    /// `x = def`
    Substituted(String, LinExpr),
    /// `x` bounded by these constraints over later variables
    Eliminated(String, Vec<LinExpr>),
}

/// Decide integer feasibility of the conjunction of `constraints`
pub fn check(constraints: &[Constraint]) -> Feasibility {
    match solve(constraints) {
        Ok(result) => result,
        Err(ArithError::Overflow) => Feasibility::Unknown("arithmetic overflow".to_string()),
        Err(ArithError::NonLinear(t)) => Feasibility::Unknown(format!("nonlinear term {t}")),
    }
}

fn solve(constraints: &[Constraint]) -> Result<Feasibility, ArithError> {
    let mut eqs: Vec<LinExpr> = Vec::new();
    let mut les: BTreeSet<LinExpr> = BTreeSet::new();
    for c in constraints {
        match normalize(c.clone()) {
            Normalized::Trivial => {}
            Normalized::Contradiction => return Ok(Feasibility::Infeasible),
            Normalized::Constraint(Constraint::Eq(e)) => eqs.push(e),
            Normalized::Constraint(Constraint::Le(e)) => {
                les.insert(e);
            }
        }
    }

    let mut steps = Vec::new();
    let mut all_vars: BTreeSet<String> = BTreeSet::new();
    for e in eqs.iter().chain(les.iter()) {
        all_vars.extend(e.coeffs.keys().cloned());
    }

    // Equalities
    while let Some(pos) = eqs.iter().position(|e| e.coeffs.values().any(|c| c.abs() == 1)) {
        let e = eqs.swap_remove(pos);
        let Some((x, c)) = e.coeffs.iter().find(|(_, c)| c.abs() == 1).map(|(x, c)| (x.clone(), *c)) else {
            continue;
        };
        // c·x + rest == 0  ⇒  x = -c·rest
        let mut rest = e.clone();
        rest.coeffs.remove(&x);
        let def = rest.scale(-c)?;

        let mut next_eqs = Vec::with_capacity(eqs.len());
        for other in &eqs {
            match normalize(Constraint::Eq(other.substitute(&x, &def)?)) {
                Normalized::Trivial => {}
                Normalized::Contradiction => return Ok(Feasibility::Infeasible),
                Normalized::Constraint(c) => next_eqs.push(c.expr().clone()),
            }
        }
        eqs = next_eqs;
        let mut next_les = BTreeSet::new();
        for other in &les {
            match normalize(Constraint::Le(other.substitute(&x, &def)?)) {
                Normalized::Trivial => {}
                Normalized::Contradiction => return Ok(Feasibility::Infeasible),
                Normalized::Constraint(c) => {
                    next_les.insert(c.expr().clone());
                }
            }
        }
        les = next_les;
        steps.push(Step::Substituted(x, def));
    }
    // Equalities without a unit coefficient are kept as two inequalities
    for e in eqs {
        les.insert(e.scale(-1)?);
        les.insert(e);
    }

    // Fourier-Motzkin
    loop {
        // Cheapest variable first: fewest generated pairs
        let cheapest = {
            let vars: BTreeSet<&String> = les.iter().flat_map(|e| e.coeffs.keys()).collect();
            vars.into_iter()
                .min_by_key(|x| {
                    let pos = les.iter().filter(|e| e.coeffs.get(*x).is_some_and(|c| *c > 0)).count();
                    let neg = les.iter().filter(|e| e.coeffs.get(*x).is_some_and(|c| *c < 0)).count();
                    pos * neg
                })
                .cloned()
        };
        let Some(x) = cheapest else {
            break;
        };

        let (bounds, rest): (Vec<LinExpr>, Vec<LinExpr>) = les.into_iter().partition(|e| e.coeffs.contains_key(&x));
        let (uppers, lowers): (Vec<&LinExpr>, Vec<&LinExpr>) = bounds.iter().partition(|e| e.coeffs[&x] > 0);

        let mut next: BTreeSet<LinExpr> = rest.into_iter().collect();
        for lo in &lowers {
            for up in &uppers {
                let a_lo = -lo.coeffs[&x];
                let a_up = up.coeffs[&x];
                let combined = lo.scale(a_up)?.add(up, a_lo)?;
                match normalize(Constraint::Le(combined)) {
                    Normalized::Trivial => {}
                    Normalized::Contradiction => return Ok(Feasibility::Infeasible),
                    Normalized::Constraint(c) => {
                        next.insert(c.expr().clone());
                    }
                }
                if next.len() > MAX_CONSTRAINTS {
                    return Ok(Feasibility::Unknown("fourier-motzkin blowup".to_string()));
                }
            }
        }
        les = next;
        steps.push(Step::Eliminated(x, bounds));
    }
    for e in &les {
        if e.constant > 0 {
            return Ok(Feasibility::Infeasible);
        }
    }

    // Integer model, last eliminated first
    let mut model: BTreeMap<String, i128> = BTreeMap::new();
    for step in steps.iter().rev() {
        match step {
            Step::Eliminated(x, bounds) => {
                let (mut lo, mut hi) = (i128::MIN, i128::MAX);
                for b in bounds {
                    let a = b.coeffs[x];
                    let mut rest = b.clone();
                    rest.coeffs.remove(x);
                    let r = rest.eval(&model)?;
                    // a·x + r <= 0
                    if a > 0 {
                        hi = hi.min(div_floor(-r, a));
                    } else {
                        lo = lo.max(div_ceil(r, -a));
                    }
                }
                if lo > hi {
                    return Ok(Feasibility::Unknown(format!("no integer value for {x}")));
                }
                let value = if lo > 0 {
                    lo
                } else if hi < 0 {
                    hi
                } else {
                    0
                };
                model.insert(x.clone(), value);
            }
            Step::Substituted(x, def) => {
                let value = def.eval(&model)?;
                model.insert(x.clone(), value);
            }
        }
    }
    for x in all_vars {
        model.entry(x).or_insert(0);
    }
    Ok(Feasibility::Feasible(model))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lin(terms: &[(&str, i128)], constant: i128) -> LinExpr {
        LinExpr {
            coeffs: terms.iter().map(|(x, c)| (x.to_string(), *c)).collect(),
            constant,
        }
    }

    fn satisfies(model: &BTreeMap<String, i128>, cs: &[Constraint]) -> bool {
        cs.iter().all(|c| match c {
            Constraint::Le(e) => e.eval(model).unwrap() <= 0,
            Constraint::Eq(e) => e.eval(model).unwrap() == 0,
        })
    }

    #[test]
    fn test_simple_bounds_feasible() {
        // 1 <= x <= 3, y == x + 2
        let cs = vec![
            Constraint::Le(lin(&[("x", -1)], 1)),
            Constraint::Le(lin(&[("x", 1)], -3)),
            Constraint::Eq(lin(&[("y", 1), ("x", -1)], -2)),
        ];
        match check(&cs) {
            Feasibility::Feasible(model) => assert!(satisfies(&model, &cs)),
            other => panic!("expected feasible, got {other:?}"),
        }
    }

    #[test]
    fn test_contradictory_bounds() {
        // x >= 2 and x <= 1
        let cs = vec![Constraint::Le(lin(&[("x", -1)], 2)), Constraint::Le(lin(&[("x", 1)], -1))];
        assert_eq!(check(&cs), Feasibility::Infeasible);
    }

    #[test]
    fn test_gcd_tightening_detects_parity() {
        // 2x == 1 has no integer solution
        assert_eq!(check(&[Constraint::Eq(lin(&[("x", 2)], -1))]), Feasibility::Infeasible);
        // 1 <= 2x <= 1
        let cs = vec![Constraint::Le(lin(&[("x", -2)], 1)), Constraint::Le(lin(&[("x", 2)], -1))];
        assert_eq!(check(&cs), Feasibility::Infeasible);
    }

    #[test]
    fn test_chain_through_elimination() {
        // a <= b, b <= c, c <= a - 1
        let cs = vec![
            Constraint::Le(lin(&[("a", 1), ("b", -1)], 0)),
            Constraint::Le(lin(&[("b", 1), ("c", -1)], 0)),
            Constraint::Le(lin(&[("c", 1), ("a", -1)], 1)),
        ];
        assert_eq!(check(&cs), Feasibility::Infeasible);
    }

    #[test]
    fn test_union_cardinality_counterexample() {
        // u >= m1, u >= m2, u <= m1 + m2, m1, m2 >= 0, u < m1 + m2
        let cs = vec![
            Constraint::Le(lin(&[("m1", 1), ("u", -1)], 0)),
            Constraint::Le(lin(&[("m2", 1), ("u", -1)], 0)),
            Constraint::Le(lin(&[("u", 1), ("m1", -1), ("m2", -1)], 0)),
            Constraint::Le(lin(&[("m1", -1)], 0)),
            Constraint::Le(lin(&[("m2", -1)], 0)),
            Constraint::Le(lin(&[("u", 1), ("m1", -1), ("m2", -1)], 1)),
        ];
        match check(&cs) {
            Feasibility::Feasible(model) => assert!(satisfies(&model, &cs)),
            other => panic!("expected feasible, got {other:?}"),
        }
    }

    #[test]
    fn test_linearize_rejects_products() {
        let x = Term::var("x", crate::logic::Sort::Int);
        assert!(matches!(LinExpr::from_term(&Term::mul(x.clone(), x.clone())), Err(ArithError::NonLinear(_))));
        let e = LinExpr::from_term(&Term::sub(Term::mul(Term::int(3), x.clone()), Term::int(4))).unwrap();
        assert_eq!(e, lin(&[("x", 3)], -4));
    }

    #[test]
    fn test_rounding_helpers() {
        assert_eq!(div_floor(-7, 2), -4);
        assert_eq!(div_ceil(-7, 2), -3);
        assert_eq!(div_ceil(7, 2), 4);
        assert_eq!(div_floor(7, 2), 3);
    }
}
