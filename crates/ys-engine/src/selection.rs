//! Named, composable boolean selections over event records.
//!
//! A selection pairs a human-readable name with a backend-evaluable
//! predicate string. AND-composition is canonical: the elementary terms of
//! both operands are merged, deduplicated by name, and sorted by name, so
//! `a & b` and `b & a` produce byte-identical names and predicates (and
//! therefore identical cache keys downstream).
//!
//! OR and NOT deliberately do *not* decompose: their result is a single
//! opaque term, atomic for any later AND-deduplication. Flattening an OR
//! into its branches would let a later AND dedup terms across the OR and
//! change the predicate's meaning.

use std::ops::{BitAnd, BitOr, Not};

/// One elementary (name, predicate) pair inside a selection.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Term {
    name: String,
    expr: String,
}

/// An immutable, named boolean predicate over event records.
///
/// Constructed once; all composition (`and`, `or`, `negate`, `remove`,
/// `swap`) produces new values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    name: String,
    expr: String,
    terms: Vec<Term>,
}

impl Selection {
    /// Create an elementary selection. Its component list is itself.
    pub fn new(name: impl Into<String>, expr: impl Into<String>) -> Self {
        let (name, expr) = (name.into(), expr.into());
        let terms = vec![Term { name: name.clone(), expr: expr.clone() }];
        Self { name, expr, terms }
    }

    /// The always-true selection.
    pub fn all() -> Self {
        Selection::new("NoCut", "1")
    }

    /// Canonical name (AND-joined, deduplicated, sorted term names).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Backend-evaluable predicate string.
    pub fn expr(&self) -> &str {
        &self.expr
    }

    /// Names of the elementary terms this selection decomposes into.
    pub fn term_names(&self) -> Vec<&str> {
        self.terms.iter().map(|t| t.name.as_str()).collect()
    }

    fn from_terms(terms: Vec<Term>) -> Self {
        if terms.is_empty() {
            return Selection::all();
        }
        let name = terms.iter().map(|t| t.name.as_str()).collect::<Vec<_>>().join(" AND ");
        let expr = terms.iter().map(|t| t.expr.as_str()).collect::<Vec<_>>().join(" && ");
        Self { name, expr, terms }
    }

    /// Conjunction with canonicalization: terms of both operands merged,
    /// deduplicated by name, sorted by name.
    pub fn and(&self, other: &Selection) -> Selection {
        let mut terms: Vec<Term> = self.terms.iter().chain(&other.terms).cloned().collect();
        terms.sort_by(|a, b| a.name.cmp(&b.name));
        terms.dedup_by(|a, b| a.name == b.name);
        Selection::from_terms(terms)
    }

    /// Disjunction. The operands are ordered by name for a canonical
    /// result, but the composite stays a single opaque term.
    pub fn or(&self, other: &Selection) -> Selection {
        let (first, second) =
            if self.name <= other.name { (self, other) } else { (other, self) };
        let name = format!("(({}) OR ({}))", first.name, second.name);
        let expr = format!("(({}) || ({}))", first.expr, second.expr);
        let terms = vec![Term { name: name.clone(), expr: expr.clone() }];
        Self { name, expr, terms }
    }

    /// Logical negation; the result is a single opaque term.
    pub fn negate(&self) -> Selection {
        let name = format!("NOT ({})", self.name);
        let expr = format!("!({})", self.expr);
        let terms = vec![Term { name: name.clone(), expr: expr.clone() }];
        Self { name, expr, terms }
    }

    /// Drop every term whose name matches `target`'s name, re-deriving the
    /// canonical name/predicate from the remainder. An empty remainder is
    /// the always-true selection.
    pub fn remove(&self, target: &Selection) -> Selection {
        let terms: Vec<Term> =
            self.terms.iter().filter(|t| t.name != target.name).cloned().collect();
        Selection::from_terms(terms)
    }

    /// `remove` followed by `and`.
    pub fn swap(&self, remove: &Selection, add: &Selection) -> Selection {
        self.remove(remove).and(add)
    }

    /// Conjunction of two optional selections; an absent operand is the
    /// identity element.
    pub fn and_opt(a: Option<&Selection>, b: Option<&Selection>) -> Option<Selection> {
        match (a, b) {
            (Some(a), Some(b)) => Some(a.and(b)),
            (Some(a), None) => Some(a.clone()),
            (None, Some(b)) => Some(b.clone()),
            (None, None) => None,
        }
    }

    /// Disjunction of two optional selections; an absent operand is the
    /// identity element.
    pub fn or_opt(a: Option<&Selection>, b: Option<&Selection>) -> Option<Selection> {
        match (a, b) {
            (Some(a), Some(b)) => Some(a.or(b)),
            (Some(a), None) => Some(a.clone()),
            (None, Some(b)) => Some(b.clone()),
            (None, None) => None,
        }
    }
}

impl BitAnd for &Selection {
    type Output = Selection;

    fn bitand(self, rhs: &Selection) -> Selection {
        self.and(rhs)
    }
}

impl BitOr for &Selection {
    type Output = Selection;

    fn bitor(self, rhs: &Selection) -> Selection {
        self.or(rhs)
    }
}

impl Not for &Selection {
    type Output = Selection;

    fn not(self) -> Selection {
        self.negate()
    }
}
