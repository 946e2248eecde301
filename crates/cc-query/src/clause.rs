//! # Filter Clause Builder
//!
//! Turns normalized parameters into [`FilterClause`]s. Each builder returns
//! `None` when its parameter is absent, so a [`ClauseList`] never holds an
//! empty clause.

use crate::params::{TextGroup, TimeRange};
use crate::predicate::{CompareOp, Field, Predicate, Scalar};

/// Logical slot a clause fills in the final conjunction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClauseSlot {
    Scope,
    Range,
    Membership,
    Text,
    Scalar,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterClause {
    slot: ClauseSlot,
    predicate: Predicate,
}

impl FilterClause {
    pub fn new(slot: ClauseSlot, predicate: Predicate) -> Self {
        Self { slot, predicate }
    }

    pub fn slot(&self) -> ClauseSlot {
        self.slot
    }

    pub fn predicate(&self) -> &Predicate {
        &self.predicate
    }
}

/// Ordered clauses combined with AND.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClauseList {
    clauses: Vec<FilterClause>,
}

impl ClauseList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, clause: Option<FilterClause>) -> &mut Self {
        self.clauses.extend(clause);
        self
    }

    pub fn extend(&mut self, clauses: impl IntoIterator<Item = FilterClause>) -> &mut Self {
        self.clauses.extend(clauses);
        self
    }

    pub fn len(&self) -> usize {
        self.clauses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FilterClause> {
        self.clauses.iter()
    }

    /// The AND of every clause; `None` means "match everything".
    pub fn into_predicate(self) -> Option<Predicate> {
        Predicate::all(self.clauses.into_iter().map(|c| c.predicate).collect())
    }
}

/// Start/end bounds on `field`.
///
/// A backward scan starts from the upper edge of the window, so both
/// operators flip.
pub fn range_clauses(field: Field, range: &TimeRange) -> Vec<FilterClause> {
    let (from_op, to_op) = if range.is_backward() {
        (CompareOp::Lte, CompareOp::Gte)
    } else {
        (CompareOp::Gte, CompareOp::Lte)
    };
    [(range.start, from_op), (range.end, to_op)]
        .into_iter()
        .filter_map(|(bound, op)| {
            bound.map(|v| FilterClause::new(ClauseSlot::Range, Predicate::compare(field, op, v)))
        })
        .collect()
}

/// `field IN [values]`, the whole list in one clause.
pub fn membership_clause(field: Field, values: &[String]) -> Option<FilterClause> {
    if values.is_empty() {
        return None;
    }
    let values = values.iter().cloned().map(Scalar::Str).collect();
    Some(FilterClause::new(
        ClauseSlot::Membership,
        Predicate::In { field, values },
    ))
}

/// Per-value equality (strict) or containment, joined with AND (conjunct) or
/// OR, optionally negated as a whole.
pub fn text_group_clause(group: Option<&TextGroup>) -> Option<FilterClause> {
    let group = group?;
    let field = group.facet.field();
    let parts: Vec<Predicate> = group
        .values
        .iter()
        .map(|value| {
            if group.strict {
                Predicate::eq(field, value.as_str())
            } else {
                Predicate::contains(field, value.as_str())
            }
        })
        .collect();
    let joined = if group.conjunct {
        Predicate::all(parts)
    } else {
        Predicate::any(parts)
    }?;
    let predicate = if group.negate {
        joined.negate()
    } else {
        joined
    };
    Some(FilterClause::new(ClauseSlot::Text, predicate))
}

/// Single equality on a scalar parameter.
pub fn scalar_clause<V: Into<Scalar>>(field: Field, value: Option<V>) -> Option<FilterClause> {
    value.map(|v| FilterClause::new(ClauseSlot::Scalar, Predicate::eq(field, v)))
}

/// The mandatory book filter of event queries.
pub fn scope_clause(book: &str) -> FilterClause {
    FilterClause::new(ClauseSlot::Scope, Predicate::eq(Field::Book, book))
}
