//! # Query Assembler
//!
//! Composes clauses, sort and pagination directives into a [`StoreQuery`].
//! Store adapters either execute the structured query directly or compile it
//! (see [`crate::aql`]).

use serde_json::Value;
use std::cmp::Ordering;

use crate::clause::{self, ClauseList};
use crate::params::{Direction, EventSearchParams, MessageSearchParams, TimeRange};
use crate::predicate::{Field, Predicate};
use crate::traversal::TraversalPlan;

pub const EVENT_COLLECTION: &str = "events";
pub const MESSAGE_COLLECTION: &str = "parsed_messages";
pub const EVENT_GRAPH: &str = "event_graph";

/// Hops walked upwards when resolving the root ancestor of an event.
pub const MAX_ANCESTOR_DEPTH: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collection {
    Events,
    Messages,
}

impl Collection {
    pub fn name(self) -> &'static str {
        match self {
            Self::Events => EVENT_COLLECTION,
            Self::Messages => MESSAGE_COLLECTION,
        }
    }
}

/// Row window. An offset without a limit is ignored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Window {
    pub offset: Option<u64>,
    pub limit: Option<u64>,
}

impl Window {
    pub fn limit(limit: u64) -> Self {
        Self {
            offset: None,
            limit: Some(limit),
        }
    }

    pub fn is_unbounded(&self) -> bool {
        self.limit.is_none()
    }

    /// Applies the window to an already filtered and sorted row set.
    pub fn apply<T>(&self, rows: Vec<T>) -> Vec<T> {
        match self.limit {
            None => rows,
            Some(limit) => rows
                .into_iter()
                .skip(self.offset.unwrap_or(0) as usize)
                .take(limit as usize)
                .collect(),
        }
    }
}

/// Sort by start time in a scan direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sort {
    pub field: Field,
    pub direction: Direction,
}

impl Sort {
    pub fn start_time(direction: Direction) -> Self {
        Self {
            field: Field::StartTimestamp,
            direction,
        }
    }

    /// Orders two documents by the sort field; ties fall back to the key so
    /// the order is total.
    pub fn compare(&self, a: &Value, b: &Value) -> Ordering {
        let ordering = compare_values(self.field.get(a), self.field.get(b))
            .then_with(|| compare_values(Field::Key.get(a), Field::Key.get(b)));
        match self.direction {
            Direction::Forward => ordering,
            Direction::Backward => ordering.reverse(),
        }
    }

    pub fn sort(&self, rows: &mut [&Value]) {
        rows.sort_by(|a, b| self.compare(a, b));
    }
}

// Missing values sort first, like null in the store.
fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(Value::Number(x)), Some(Value::Number(y))) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => x
                .as_f64()
                .partial_cmp(&y.as_f64())
                .unwrap_or(Ordering::Equal),
        },
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(x), Some(y)) => x.to_string().cmp(&y.to_string()),
    }
}

/// What each matching row returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Projection {
    Document,
    Field(Field),
    /// Session part of a message key (`<session>:<direction>:<sequence>`),
    /// deduplicated.
    SessionPrefix,
}

/// Filter → sort → window over one collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scan {
    pub collection: Collection,
    pub filter: Option<Predicate>,
    pub sort: Option<Sort>,
    pub window: Window,
    pub projection: Projection,
}

/// Every query shape the gateway issues.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreQuery {
    Scan(Scan),
    Children(TraversalPlan),
    /// Furthest ancestor of every event matching `filter`, deduplicated.
    RootAncestors { filter: Predicate, max_depth: u32 },
}

impl StoreQuery {
    /// Short name used in log fields.
    pub fn shape(&self) -> &'static str {
        match self {
            Self::Scan(scan) => match scan.collection {
                Collection::Events => "event_scan",
                Collection::Messages => "message_scan",
            },
            Self::Children(plan) => plan.strategy(),
            Self::RootAncestors { .. } => "root_ancestors",
        }
    }
}

// =============================================================================
// Point lookups
// =============================================================================

fn lookup(collection: Collection, filter: Predicate, projection: Projection) -> StoreQuery {
    StoreQuery::Scan(Scan {
        collection,
        filter: Some(filter),
        sort: None,
        window: Window::limit(1),
        projection,
    })
}

pub fn event(book: &str, scope: &str, id: &str) -> StoreQuery {
    let filter = Predicate::And(vec![
        Predicate::eq(Field::Book, book),
        Predicate::eq(Field::Scope, scope),
        Predicate::eq(Field::Id, id),
    ]);
    lookup(Collection::Events, filter, Projection::Document)
}

pub fn message(key: &str) -> StoreQuery {
    lookup(
        Collection::Messages,
        Predicate::eq(Field::Key, key),
        Projection::Document,
    )
}

pub fn message_body(key: &str) -> StoreQuery {
    lookup(
        Collection::Messages,
        Predicate::eq(Field::Key, key),
        Projection::Field(Field::Message),
    )
}

pub fn attached_events(key: &str) -> StoreQuery {
    lookup(
        Collection::Messages,
        Predicate::eq(Field::Key, key),
        Projection::Field(Field::AttachedEventIds),
    )
}

pub fn message_streams() -> StoreQuery {
    StoreQuery::Scan(Scan {
        collection: Collection::Messages,
        filter: None,
        sort: None,
        window: Window::default(),
        projection: Projection::SessionPrefix,
    })
}

pub fn event_parents(book: &str, scope: &str) -> StoreQuery {
    StoreQuery::RootAncestors {
        filter: Predicate::And(vec![
            Predicate::eq(Field::Book, book),
            Predicate::eq(Field::Scope, scope),
        ]),
        max_depth: MAX_ANCESTOR_DEPTH,
    }
}

// =============================================================================
// Scans
// =============================================================================

/// Flat message scan: timestamp bounds and session membership, no sort.
pub fn message_search(params: &MessageSearchParams) -> StoreQuery {
    let bounds = TimeRange {
        start: params.start,
        end: params.end,
        direction: None,
    };
    let mut clauses = ClauseList::new();
    clauses
        .extend(clause::range_clauses(Field::Timestamp, &bounds))
        .push(clause::membership_clause(Field::Alias, &params.sessions));
    StoreQuery::Scan(Scan {
        collection: Collection::Messages,
        filter: clauses.into_predicate(),
        sort: None,
        window: params.window,
        projection: Projection::Document,
    })
}

/// Directed event scan within one book, capped by `limit`.
pub fn event_search(params: &EventSearchParams) -> StoreQuery {
    let filters = &params.filters;
    let mut clauses = ClauseList::new();
    clauses
        .push(Some(clause::scope_clause(&params.book)))
        .extend(clause::range_clauses(Field::StartTimestamp, &filters.range))
        .push(clause::scalar_clause(
            Field::ParentEventId,
            params.parent_id.clone(),
        ))
        .push(clause::text_group_clause(filters.name.as_ref()))
        .push(clause::text_group_clause(filters.kind.as_ref()))
        .push(clause::scalar_clause(Field::Body, params.body.clone()))
        .push(clause::scalar_clause(Field::Successful, params.status));
    StoreQuery::Scan(Scan {
        collection: Collection::Events,
        filter: clauses.into_predicate(),
        sort: Some(Sort::start_time(filters.range.sort_direction())),
        window: params.limit.map(Window::limit).unwrap_or_default(),
        projection: Projection::Document,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::SearchParameters;
    use crate::predicate::CompareOp;

    fn params(pairs: &[(&str, &str)]) -> SearchParameters {
        SearchParameters::from_pairs(pairs.iter().copied())
    }

    #[test]
    fn test_message_search_pagination_and_filter() {
        let p = MessageSearchParams::from_params(&params(&[
            ("start-timestamp", "1000"),
            ("end-timestamp", "2000"),
            ("stream", "session-1"),
            ("page-size", "10"),
            ("page-number", "3"),
        ]))
        .unwrap();
        let StoreQuery::Scan(scan) = message_search(&p) else {
            panic!("expected a scan");
        };
        assert_eq!(scan.window, Window { offset: Some(20), limit: Some(10) });
        assert_eq!(
            scan.filter,
            Some(Predicate::And(vec![
                Predicate::compare(Field::Timestamp, CompareOp::Gte, 1000),
                Predicate::compare(Field::Timestamp, CompareOp::Lte, 2000),
                Predicate::In {
                    field: Field::Alias,
                    values: vec!["session-1".into()]
                },
            ]))
        );
        assert!(scan.sort.is_none());
    }

    #[test]
    fn test_event_search_always_scoped_to_book() {
        let p = EventSearchParams::from_params("b1", &params(&[])).unwrap();
        let StoreQuery::Scan(scan) = event_search(&p) else {
            panic!("expected a scan");
        };
        assert_eq!(scan.filter, Some(Predicate::eq(Field::Book, "b1")));
        assert_eq!(scan.sort, Some(Sort::start_time(Direction::Forward)));
        assert!(scan.window.is_unbounded());
    }

    #[test]
    fn test_event_search_clause_order() {
        let p = EventSearchParams::from_params(
            "b1",
            &params(&[
                ("status", "false"),
                ("start-timestamp", "5"),
                ("search-direction", "prev"),
                ("parent-id", "p"),
                ("limit", "7"),
            ]),
        )
        .unwrap();
        let StoreQuery::Scan(scan) = event_search(&p) else {
            panic!("expected a scan");
        };
        assert_eq!(
            scan.filter,
            Some(Predicate::And(vec![
                Predicate::eq(Field::Book, "b1"),
                Predicate::compare(Field::StartTimestamp, CompareOp::Lte, 5),
                Predicate::eq(Field::ParentEventId, "p"),
                Predicate::eq(Field::Successful, false),
            ]))
        );
        assert_eq!(scan.sort, Some(Sort::start_time(Direction::Backward)));
        assert_eq!(scan.window, Window::limit(7));
    }

    #[test]
    fn test_sort_by_start_time_with_key_tiebreak() {
        let a = serde_json::json!({"_key": "a", "startTimestamp": 2});
        let b = serde_json::json!({"_key": "b", "startTimestamp": 1});
        let c = serde_json::json!({"_key": "c", "startTimestamp": 2});
        let mut rows = vec![&a, &b, &c];
        Sort::start_time(Direction::Forward).sort(&mut rows);
        assert_eq!(rows, vec![&b, &a, &c]);
        Sort::start_time(Direction::Backward).sort(&mut rows);
        assert_eq!(rows, vec![&c, &a, &b]);
    }

    #[test]
    fn test_window_apply() {
        let rows: Vec<u32> = (0..10).collect();
        assert_eq!(Window { offset: Some(8), limit: Some(5) }.apply(rows.clone()), vec![8, 9]);
        assert_eq!(Window { offset: Some(3), limit: None }.apply(rows.clone()).len(), 10);
        assert_eq!(Window::limit(2).apply(rows), vec![0, 1]);
    }
}
