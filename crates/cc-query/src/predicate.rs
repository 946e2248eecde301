//! # Predicate AST
//!
//! Filters are built as a small tree of leaves (field / operator / value) and
//! combinators (AND / OR / NOT). The tree can be evaluated directly against a
//! JSON document, or handed to a [`crate::aql::QueryCompiler`] that renders it
//! in a store's native syntax.

use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;

/// Document attributes the gateway knows how to filter on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Key,
    Book,
    Scope,
    Id,
    EventName,
    EventType,
    StartTimestamp,
    ParentEventId,
    Body,
    Successful,
    Timestamp,
    Alias,
    AttachedEventIds,
    Message,
}

impl Field {
    /// Attribute name inside the stored document.
    pub fn path(self) -> &'static str {
        match self {
            Self::Key => "_key",
            Self::Book => "book",
            Self::Scope => "scope",
            Self::Id => "id",
            Self::EventName => "eventName",
            Self::EventType => "eventType",
            Self::StartTimestamp => "startTimestamp",
            Self::ParentEventId => "parentEventId",
            Self::Body => "body",
            Self::Successful => "successful",
            Self::Timestamp => "timestamp",
            Self::Alias => "alias",
            Self::AttachedEventIds => "attachedEventIds",
            Self::Message => "message",
        }
    }

    pub fn get(self, doc: &Value) -> Option<&Value> {
        doc.get(self.path()).filter(|v| !v.is_null())
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

/// A literal on the right-hand side of a comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scalar {
    Str(String),
    Int(i64),
    Bool(bool),
}

impl Scalar {
    fn compare(&self, value: &Value) -> Option<Ordering> {
        match (self, value) {
            (Self::Str(s), Value::String(v)) => Some(v.as_str().cmp(s.as_str())),
            (Self::Int(n), Value::Number(v)) => match v.as_i64() {
                Some(v) => Some(v.cmp(n)),
                None => v.as_f64()?.partial_cmp(&(*n as f64)),
            },
            (Self::Bool(b), Value::Bool(v)) => Some(v.cmp(b)),
            _ => None,
        }
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for Scalar {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<bool> for Scalar {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl CompareOp {
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Neq => "!=",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Lt => "<",
            Self::Lte => "<=",
        }
    }

    fn accepts(self, ordering: Ordering) -> bool {
        match self {
            Self::Eq => ordering == Ordering::Equal,
            Self::Neq => ordering != Ordering::Equal,
            Self::Gt => ordering == Ordering::Greater,
            Self::Gte => ordering != Ordering::Less,
            Self::Lt => ordering == Ordering::Less,
            Self::Lte => ordering != Ordering::Greater,
        }
    }
}

/// Filter tree.
///
/// Combinators are never built empty by the clause builder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    Compare {
        field: Field,
        op: CompareOp,
        value: Scalar,
    },
    In {
        field: Field,
        values: Vec<Scalar>,
    },
    Contains {
        field: Field,
        needle: String,
    },
    /// Attribute absent, null or the empty string.
    IsEmpty(Field),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    pub fn compare(field: Field, op: CompareOp, value: impl Into<Scalar>) -> Self {
        Self::Compare {
            field,
            op,
            value: value.into(),
        }
    }

    pub fn eq(field: Field, value: impl Into<Scalar>) -> Self {
        Self::compare(field, CompareOp::Eq, value)
    }

    pub fn contains(field: Field, needle: impl Into<String>) -> Self {
        Self::Contains {
            field,
            needle: needle.into(),
        }
    }

    pub fn negate(self) -> Self {
        Self::Not(Box::new(self))
    }

    /// Joins predicates with AND; a single predicate is returned as is.
    pub fn all(mut parts: Vec<Predicate>) -> Option<Self> {
        match parts.len() {
            0 => None,
            1 => parts.pop(),
            _ => Some(Self::And(parts)),
        }
    }

    /// Joins predicates with OR; a single predicate is returned as is.
    pub fn any(mut parts: Vec<Predicate>) -> Option<Self> {
        match parts.len() {
            0 => None,
            1 => parts.pop(),
            _ => Some(Self::Or(parts)),
        }
    }

    /// Evaluates the predicate against one stored document.
    pub fn matches(&self, doc: &Value) -> bool {
        match self {
            Self::Compare { field, op, value } => field
                .get(doc)
                .and_then(|v| value.compare(v))
                .is_some_and(|ordering| op.accepts(ordering)),
            Self::In { field, values } => field.get(doc).is_some_and(|v| {
                values
                    .iter()
                    .any(|s| s.compare(v) == Some(Ordering::Equal))
            }),
            Self::Contains { field, needle } => field
                .get(doc)
                .and_then(Value::as_str)
                .is_some_and(|v| v.contains(needle.as_str())),
            Self::IsEmpty(field) => match field.get(doc) {
                None => true,
                Some(Value::String(s)) => s.is_empty(),
                Some(_) => false,
            },
            Self::And(parts) => parts.iter().all(|p| p.matches(doc)),
            Self::Or(parts) => parts.iter().any(|p| p.matches(doc)),
            Self::Not(inner) => !inner.matches(doc),
        }
    }
}
