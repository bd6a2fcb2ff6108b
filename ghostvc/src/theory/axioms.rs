//! Ground background axioms for collection terms
//!
//! Instantiated over the collection subterms of a query:
//!
//! - `|S| >= 0`
//! - `0 <= x # S <= |S|`, and `x # S <= 1` for sets
//! - `max(|A|, |B|) <= |A union B| <= |A| + |B|`
//! - `|A intersection B| <= min(|A|, |B|)`
//! - `|A| - |B| <= |A setminus B| <= |A|`

use std::collections::BTreeSet;

use crate::ast::CollectionKind;
use crate::logic::{BagOp, Term, simplify};

pub fn background(terms: &[Term]) -> Vec<Term> {
    let mut collections = BTreeSet::new();
    let mut multiplicities = BTreeSet::new();
    for term in terms {
        term.visit(&mut |t| {
            if t.sort().as_collection().is_some() && !matches!(t, Term::Bag { .. }) {
                collections.insert(t.clone());
            }
            if let Term::Multiplicity(x, s) = t {
                multiplicities.insert(((**x).clone(), (**s).clone()));
            }
        });
    }

    let mut axioms = Vec::new();
    for s in &collections {
        axioms.push(Term::ge(Term::card(s.clone()), Term::int(0)));
        if let Term::BagOp(op, a, b) = s {
            let (card_s, card_a, card_b) = (Term::card(s.clone()), Term::card((**a).clone()), Term::card((**b).clone()));
            match op {
                BagOp::Union => {
                    axioms.push(Term::ge(card_s.clone(), card_a.clone()));
                    axioms.push(Term::ge(card_s.clone(), card_b.clone()));
                    axioms.push(Term::le(card_s, Term::add(card_a, card_b)));
                }
                BagOp::Intersection => {
                    axioms.push(Term::le(card_s.clone(), card_a));
                    axioms.push(Term::le(card_s, card_b));
                }
                BagOp::Difference => {
                    axioms.push(Term::le(card_s.clone(), card_a.clone()));
                    axioms.push(Term::ge(card_s, Term::sub(card_a, card_b)));
                }
            }
        }
    }
    for (x, s) in multiplicities {
        let m = Term::multiplicity(x, s.clone());
        axioms.push(Term::le(Term::int(0), m.clone()));
        axioms.push(Term::le(m.clone(), Term::card(s.clone())));
        if matches!(s.sort().as_collection(), Some((CollectionKind::Set, _))) {
            axioms.push(Term::le(m, Term::int(1)));
        }
    }

    let mut seen = BTreeSet::new();
    axioms
        .iter()
        .map(simplify)
        .filter(|a| !a.is_true() && seen.insert(a.clone()))
        .collect()
}
