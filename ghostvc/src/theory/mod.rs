//! Finite set and multiset theory
//!
//! A collection is a map from elements to multiplicities. Sets cap every
//! multiplicity at one. Union takes the per-element maximum, intersection
//! the minimum and difference saturates at zero, so
//! `|mset{1,2,2} union mset{2,3}| == 4`.
//!
//! `Bag` evaluates fully constant collections; `axioms` and `lower` turn
//! symbolic collection terms into linear integer arithmetic for the oracles.

pub mod axioms;
pub mod lower;

use std::collections::BTreeMap;

use serde::Serialize;
use thiserror::Error;

use crate::ast::CollectionKind;
use crate::logic::{Sort, Term};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TheoryError {
    #[error("cannot combine a {left} with a {right}")]
    KindMismatch {
        left: CollectionKind,
        right: CollectionKind,
    },
    #[error("element sorts differ: {left} and {right}")]
    SortMismatch { left: Sort, right: Sort },
}

/// Constant collection element
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Element {
    Int(i128),
    Bool(bool),
}

impl Element {
    pub fn from_term(term: &Term) -> Option<Element> {
        match term {
            Term::Int(n) => Some(Element::Int(*n)),
            Term::Bool(b) => Some(Element::Bool(*b)),
            _ => None,
        }
    }

    pub fn to_term(&self) -> Term {
        match self {
            Element::Int(n) => Term::Int(*n),
            Element::Bool(b) => Term::Bool(*b),
        }
    }
}

impl std::fmt::Display for Element {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Element::Int(n) => write!(f, "{n}"),
            Element::Bool(b) => write!(f, "{b}"),
        }
    }
}

/// A fully evaluated set or multiset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bag {
    kind: CollectionKind,
    elem: Sort,
    /// Only positive multiplicities are stored
    counts: BTreeMap<Element, u64>,
}

impl Bag {
    pub fn empty(kind: CollectionKind, elem: Sort) -> Self {
        Self {
            kind,
            elem,
            counts: BTreeMap::new(),
        }
    }

    pub fn from_elements(kind: CollectionKind, elem: Sort, elements: impl IntoIterator<Item = Element>) -> Self {
        let mut bag = Bag::empty(kind, elem);
        for e in elements {
            bag.insert(e);
        }
        bag
    }

    /// Evaluate a collection literal whose elements are all constants
    pub fn from_term(term: &Term) -> Option<Bag> {
        match term {
            Term::Bag { kind, elem, elems } => {
                let elements = elems.iter().map(Element::from_term).collect::<Option<Vec<_>>>()?;
                Some(Bag::from_elements(*kind, elem.clone(), elements))
            }
            _ => None,
        }
    }

    /// Literal term listing every element once per occurrence, in order
    pub fn to_term(&self) -> Term {
        let elems = self
            .counts
            .iter()
            .flat_map(|(e, n)| std::iter::repeat_n(e.to_term(), *n as usize))
            .collect();
        Term::Bag {
            kind: self.kind,
            elem: self.elem.clone(),
            elems,
        }
    }

    fn insert(&mut self, e: Element) {
        let count = self.counts.entry(e).or_insert(0);
        *count = match self.kind {
            CollectionKind::Set => 1,
            CollectionKind::Multiset => count.saturating_add(1),
        };
    }

    pub fn kind(&self) -> CollectionKind {
        self.kind
    }

    pub fn elem_sort(&self) -> &Sort {
        &self.elem
    }

    pub fn multiplicity(&self, e: &Element) -> u64 {
        self.counts.get(e).copied().unwrap_or(0)
    }

    pub fn contains(&self, e: &Element) -> bool {
        self.multiplicity(e) >= 1
    }

    /// Total number of elements, counting multiplicity
    pub fn cardinality(&self) -> u64 {
        self.counts.values().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    fn check_compatible(&self, other: &Bag) -> Result<(), TheoryError> {
        if self.kind != other.kind {
            return Err(TheoryError::KindMismatch {
                left: self.kind,
                right: other.kind,
            });
        }
        if self.elem != other.elem {
            return Err(TheoryError::SortMismatch {
                left: self.elem.clone(),
                right: other.elem.clone(),
            });
        }
        Ok(())
    }

    fn combine(&self, other: &Bag, f: impl Fn(u64, u64) -> u64) -> Result<Bag, TheoryError> {
        self.check_compatible(other)?;
        let mut counts = BTreeMap::new();
        for e in self.counts.keys().chain(other.counts.keys()) {
            let n = f(self.multiplicity(e), other.multiplicity(e));
            if n > 0 {
                counts.insert(e.clone(), n);
            }
        }
        Ok(Bag {
            kind: self.kind,
            elem: self.elem.clone(),
            counts,
        })
    }

    pub fn union(&self, other: &Bag) -> Result<Bag, TheoryError> {
        self.combine(other, u64::max)
    }

    pub fn intersection(&self, other: &Bag) -> Result<Bag, TheoryError> {
        self.combine(other, u64::min)
    }

    pub fn difference(&self, other: &Bag) -> Result<Bag, TheoryError> {
        self.combine(other, u64::saturating_sub)
    }

    pub fn is_subset(&self, other: &Bag) -> Result<bool, TheoryError> {
        self.check_compatible(other)?;
        Ok(self.counts.iter().all(|(e, n)| *n <= other.multiplicity(e)))
    }

    /// Extensional equality; comparing a set with a multiset is an error
    pub fn equals(&self, other: &Bag) -> Result<bool, TheoryError> {
        self.check_compatible(other)?;
        Ok(self.counts == other.counts)
    }
}

impl std::fmt::Display for Bag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{{", self.kind)?;
        let mut first = true;
        for (e, n) in &self.counts {
            for _ in 0..*n {
                if !first {
                    write!(f, ", ")?;
                }
                first = false;
                write!(f, "{e}")?;
            }
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn mset(xs: &[i128]) -> Bag {
        Bag::from_elements(CollectionKind::Multiset, Sort::Int, xs.iter().map(|x| Element::Int(*x)))
    }

    fn set(xs: &[i128]) -> Bag {
        Bag::from_elements(CollectionKind::Set, Sort::Int, xs.iter().map(|x| Element::Int(*x)))
    }

    #[test]
    fn test_multiset_union_takes_max() {
        let u = mset(&[1, 2, 2]).union(&mset(&[2, 3])).unwrap();
        assert_eq!(u.multiplicity(&Element::Int(2)), 2);
        assert_eq!(u.cardinality(), 4);
    }

    #[test]
    fn test_literal_cardinalities() {
        assert_eq!(mset(&[1, 2, 2]).cardinality(), 3);
        assert_eq!(mset(&[1, 2, 2]).cardinality(), mset(&[2, 2, 3]).cardinality());
        assert_eq!(set(&[1, 2, 2]).cardinality(), 2);
        assert_eq!(mset(&[]).cardinality(), 0);
    }

    #[test]
    fn test_set_multiplicity_capped() {
        assert_eq!(set(&[1, 2, 3]).multiplicity(&Element::Int(2)), 1);
        assert_eq!(set(&[1, 2, 2, 3]).multiplicity(&Element::Int(2)), 1);
        assert_eq!(set(&[1, 2, 3]).multiplicity(&Element::Int(42)), 0);
        assert_eq!(set(&[]).multiplicity(&Element::Int(1)), 0);
    }

    #[test]
    fn test_intersection_and_difference() {
        let a = mset(&[1, 1, 1, 2]);
        let b = mset(&[1, 2, 2]);
        assert_eq!(a.intersection(&b).unwrap(), mset(&[1, 2]));
        assert_eq!(a.difference(&b).unwrap(), mset(&[1, 1]));
        assert_eq!(set(&[1, 2, 3]).difference(&set(&[2])).unwrap(), set(&[1, 3]));
    }

    #[test]
    fn test_chained_boolean_membership() {
        // 1 in {1} in {true} in {true, false}
        let first = mset(&[1]).contains(&Element::Int(1));
        let bools = |xs: &[bool]| Bag::from_elements(CollectionKind::Multiset, Sort::Bool, xs.iter().map(|b| Element::Bool(*b)));
        let second = bools(&[true]).contains(&Element::Bool(first));
        assert!(bools(&[true, false]).contains(&Element::Bool(second)));
        assert!(!bools(&[]).contains(&Element::Bool(false)));
    }

    #[test]
    fn test_kind_mismatch_is_an_error() {
        let err = set(&[1]).union(&mset(&[1])).unwrap_err();
        assert_eq!(
            err,
            TheoryError::KindMismatch {
                left: CollectionKind::Set,
                right: CollectionKind::Multiset
            }
        );
        assert!(set(&[1]).equals(&mset(&[1])).is_err());
    }

    #[test]
    fn test_to_term_and_display() {
        let bag = mset(&[3, 1, 3]);
        assert_eq!(bag.to_string(), "mset{1, 3, 3}");
        assert_eq!(Bag::from_term(&bag.to_term()), Some(bag));
    }

    proptest! {
        #[test]
        fn prop_union_cardinality_bounds(a in prop::collection::vec(0i128..6, 0..8), b in prop::collection::vec(0i128..6, 0..8)) {
            let (a, b) = (mset(&a), mset(&b));
            let u = a.union(&b).unwrap();
            prop_assert!(u.cardinality() >= a.cardinality().max(b.cardinality()));
            prop_assert!(u.cardinality() <= a.cardinality() + b.cardinality());
        }

        #[test]
        fn prop_multiplicity_bounded_by_cardinality(xs in prop::collection::vec(0i128..6, 0..10), x in 0i128..8) {
            for bag in [mset(&xs), set(&xs)] {
                let m = bag.multiplicity(&Element::Int(x));
                prop_assert!(m <= bag.cardinality());
                if bag.kind() == CollectionKind::Set {
                    prop_assert!(m <= 1);
                }
            }
        }

        #[test]
        fn prop_subset_is_monotone(a in prop::collection::vec(0i128..5, 0..8), extra in prop::collection::vec(0i128..5, 0..4), x in 0i128..6) {
            let small = mset(&a);
            let big = small.union(&mset(&extra)).unwrap();
            prop_assert!(small.is_subset(&big).unwrap());
            prop_assert!(small.multiplicity(&Element::Int(x)) <= big.multiplicity(&Element::Int(x)));
        }

        #[test]
        fn prop_difference_bounds(a in prop::collection::vec(0i128..5, 0..8), b in prop::collection::vec(0i128..5, 0..8)) {
            let (a, b) = (mset(&a), mset(&b));
            let d = a.difference(&b).unwrap();
            prop_assert!(d.cardinality() <= a.cardinality());
            prop_assert!(d.cardinality() as i128 >= a.cardinality() as i128 - b.cardinality() as i128);
        }
    }
}
