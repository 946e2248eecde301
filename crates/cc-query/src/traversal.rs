//! # Graph Traversal Planner
//!
//! Plans "children of event E" lookups over the parent/child event hierarchy.
//! Three strategies exist:
//!
//! * [`TraversalPlan::Roots`] when no anchor is given;
//! * [`TraversalPlan::Descendants`], a bounded outbound traversal, when the
//!   request has an anchor but no name/type filter;
//! * [`TraversalPlan::CompliantPaths`] when name/type filters are present: a
//!   candidate only counts when the hops between the anchor and the candidate
//!   match the filter too, which a plain outbound traversal cannot express.
//!
//! [`EventGraph`] evaluates every plan over an adjacency-by-parent-reference
//! view of the event documents.

use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};

use crate::clause::{self, ClauseList};
use crate::params::ChildrenParams;
use crate::plan::{Sort, Window};
use crate::predicate::{Field, Predicate};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraversalPlan {
    Roots {
        filter: Option<Predicate>,
        sort: Sort,
        window: Window,
    },
    Descendants {
        anchor: String,
        depth: u32,
        filter: Option<Predicate>,
        sort: Sort,
        window: Window,
    },
    CompliantPaths {
        anchor: String,
        depth: u32,
        filter: Predicate,
        sort: Sort,
        window: Window,
    },
}

/// Picks the traversal strategy for a children request.
pub fn plan_children(params: &ChildrenParams) -> TraversalPlan {
    let filters = &params.filters;
    let mut clauses = ClauseList::new();
    clauses
        .push(clause::text_group_clause(filters.name.as_ref()))
        .push(clause::text_group_clause(filters.kind.as_ref()))
        .extend(clause::range_clauses(Field::StartTimestamp, &filters.range));
    let filter = clauses.into_predicate();
    let sort = Sort::start_time(filters.range.sort_direction());
    let window = params.window;

    match (&params.anchor, filter) {
        (None, filter) => TraversalPlan::Roots {
            filter,
            sort,
            window,
        },
        (Some(anchor), Some(filter)) if filters.has_text_groups() => {
            TraversalPlan::CompliantPaths {
                anchor: anchor.clone(),
                depth: params.depth,
                filter,
                sort,
                window,
            }
        }
        (Some(anchor), filter) => TraversalPlan::Descendants {
            anchor: anchor.clone(),
            depth: params.depth,
            filter,
            sort,
            window,
        },
    }
}

impl TraversalPlan {
    pub fn strategy(&self) -> &'static str {
        match self {
            Self::Roots { .. } => "roots",
            Self::Descendants { .. } => "descendants",
            Self::CompliantPaths { .. } => "compliant_paths",
        }
    }

    /// Runs the plan and returns the keys of the selected events.
    pub fn evaluate(&self, graph: &EventGraph<'_>) -> Vec<String> {
        match self {
            Self::Roots {
                filter,
                sort,
                window,
            } => {
                let rows = graph
                    .documents()
                    .filter(|doc| Predicate::IsEmpty(Field::ParentEventId).matches(doc))
                    .filter(|doc| passes(filter.as_ref(), doc))
                    .collect();
                keys(window.apply(sorted(rows, sort)))
            }
            Self::Descendants {
                anchor,
                depth,
                filter,
                sort,
                window,
            } => {
                let rows = graph
                    .descendants(anchor, *depth)
                    .into_iter()
                    .filter(|doc| passes(filter.as_ref(), doc))
                    .collect();
                keys(window.apply(sorted(rows, sort)))
            }
            Self::CompliantPaths {
                anchor,
                depth,
                filter,
                sort,
                window,
            } => {
                let candidates: Vec<&Value> =
                    graph.documents().filter(|doc| filter.matches(doc)).collect();
                let mut seen = HashSet::new();
                let mut rows = Vec::new();
                for candidate in window.apply(candidates) {
                    let Some(target) = document_key(candidate) else {
                        continue;
                    };
                    let Some(path) = graph.path(anchor, target, *depth) else {
                        continue;
                    };
                    let trimmed = trim_path(&path);
                    let compliant = retain_path(trimmed, |key| {
                        graph.get(key).is_some_and(|doc| filter.matches(doc))
                    });
                    if !compliant {
                        continue;
                    }
                    for key in trimmed {
                        if seen.insert(*key) {
                            rows.extend(graph.get(key));
                        }
                    }
                }
                keys(sorted(rows, sort))
            }
        }
    }
}

fn passes(filter: Option<&Predicate>, doc: &Value) -> bool {
    filter.map_or(true, |f| f.matches(doc))
}

fn sorted<'a>(mut rows: Vec<&'a Value>, sort: &Sort) -> Vec<&'a Value> {
    sort.sort(&mut rows);
    rows
}

fn keys(rows: Vec<&Value>) -> Vec<String> {
    rows.into_iter()
        .filter_map(document_key)
        .map(str::to_string)
        .collect()
}

/// Drops the path's endpoints, keeping only intermediate hops. A path of
/// exactly two vertices only loses its anchor.
pub fn trim_path<T>(path: &[T]) -> &[T] {
    match path.len() {
        0 => path,
        1 | 2 => &path[1..],
        n => &path[1..n - 1],
    }
}

/// A trimmed path counts when it has exactly one vertex, or when every vertex
/// but the last satisfies `matches`.
pub fn retain_path<T>(trimmed: &[T], mut matches: impl FnMut(&T) -> bool) -> bool {
    match trimmed.split_last() {
        None => false,
        Some((_, [])) => true,
        Some((_, init)) => init.iter().all(|v| matches(v)),
    }
}

pub fn document_key(doc: &Value) -> Option<&str> {
    Field::Key.get(doc).and_then(Value::as_str)
}

fn parent_key(doc: &Value) -> Option<&str> {
    Field::ParentEventId
        .get(doc)
        .and_then(Value::as_str)
        .filter(|parent| !parent.is_empty())
}

// =============================================================================
// EventGraph
// =============================================================================

/// Event hierarchy built from each document's parent reference.
///
/// The hierarchy is acyclic by domain invariant; walks still stop on a
/// revisited vertex.
pub struct EventGraph<'a> {
    docs: Vec<&'a Value>,
    by_key: HashMap<&'a str, usize>,
    children: HashMap<&'a str, Vec<usize>>,
}

impl<'a> EventGraph<'a> {
    pub fn new(docs: impl IntoIterator<Item = &'a Value>) -> Self {
        let docs: Vec<&'a Value> = docs.into_iter().collect();
        let mut by_key = HashMap::with_capacity(docs.len());
        let mut children: HashMap<&'a str, Vec<usize>> = HashMap::new();
        for (idx, &doc) in docs.iter().enumerate() {
            if let Some(key) = document_key(doc) {
                by_key.insert(key, idx);
            }
            if let Some(parent) = parent_key(doc) {
                children.entry(parent).or_default().push(idx);
            }
        }
        Self {
            docs,
            by_key,
            children,
        }
    }

    /// Documents in store order.
    pub fn documents(&self) -> impl Iterator<Item = &'a Value> + '_ {
        self.docs.iter().copied()
    }

    pub fn get(&self, key: &str) -> Option<&'a Value> {
        self.by_key.get(key).map(|&idx| self.docs[idx])
    }

    /// Breadth-first outbound walk from `anchor`, at most `depth` hops,
    /// excluding the anchor itself.
    pub fn descendants(&self, anchor: &str, depth: u32) -> Vec<&'a Value> {
        let Some(start) = self.get(anchor).and_then(document_key) else {
            return Vec::new();
        };
        let mut visited: HashSet<&str> = HashSet::from([start]);
        let mut queue = VecDeque::from([(start, 0u32)]);
        let mut out = Vec::new();
        while let Some((key, level)) = queue.pop_front() {
            if level == depth {
                continue;
            }
            for &idx in self.children.get(key).into_iter().flatten() {
                let child = self.docs[idx];
                let Some(child_key) = document_key(child) else {
                    continue;
                };
                if visited.insert(child_key) {
                    out.push(child);
                    queue.push_back((child_key, level + 1));
                }
            }
        }
        out
    }

    /// Vertex keys on the path from `from` down to `to`, both included, when
    /// `to` lies within `depth` hops below `from`.
    pub fn path(&self, from: &str, to: &str, depth: u32) -> Option<Vec<&'a str>> {
        self.get(from)?;
        let mut current = self.get(to)?;
        let mut reversed = vec![document_key(current)?];
        for _ in 0..depth {
            let parent = self.get(parent_key(current)?)?;
            let key = document_key(parent)?;
            if reversed.contains(&key) {
                return None;
            }
            reversed.push(key);
            if key == from {
                reversed.reverse();
                return Some(reversed);
            }
            current = parent;
        }
        None
    }

    /// Furthest ancestor reachable within `max_depth` hops; the event itself
    /// when it has no known parent.
    pub fn root_ancestor(&self, key: &str, max_depth: u32) -> Option<&'a Value> {
        let mut current = self.get(key)?;
        let mut visited = HashSet::from([document_key(current)?]);
        for _ in 0..max_depth {
            let Some(parent) = parent_key(current).and_then(|p| self.get(p)) else {
                break;
            };
            if !visited.insert(document_key(parent)?) {
                break;
            }
            current = parent;
        }
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::SearchParameters;
    use serde_json::json;

    /// root ─┬─ a (login)  ── a1 (order) ── a2 (order)
    ///       └─ b (order)  ── b1 (login)
    /// other (root, order)
    fn fixture() -> Vec<Value> {
        vec![
            json!({"_key": "root", "parentEventId": "", "eventName": "session", "startTimestamp": 1}),
            json!({"_key": "a", "parentEventId": "root", "eventName": "login", "startTimestamp": 3}),
            json!({"_key": "b", "parentEventId": "root", "eventName": "order", "startTimestamp": 2}),
            json!({"_key": "a1", "parentEventId": "a", "eventName": "order", "startTimestamp": 5}),
            json!({"_key": "a2", "parentEventId": "a1", "eventName": "order", "startTimestamp": 6}),
            json!({"_key": "b1", "parentEventId": "b", "eventName": "login", "startTimestamp": 4}),
            json!({"_key": "other", "eventName": "order", "startTimestamp": 0}),
        ]
    }

    fn children(pairs: &[(&str, &str)]) -> TraversalPlan {
        let params = SearchParameters::from_pairs(pairs.iter().copied());
        plan_children(&ChildrenParams::from_params(&params).unwrap())
    }

    fn run(pairs: &[(&str, &str)]) -> Vec<String> {
        let docs = fixture();
        let graph = EventGraph::new(&docs);
        children(pairs).evaluate(&graph)
    }

    #[test]
    fn test_strategy_selection() {
        assert_eq!(children(&[]).strategy(), "roots");
        assert_eq!(children(&[("id", "root")]).strategy(), "descendants");
        assert_eq!(
            children(&[("id", "root"), ("start-timestamp", "1")]).strategy(),
            "descendants"
        );
        assert_eq!(
            children(&[("id", "root"), ("type-values", "x")]).strategy(),
            "compliant_paths"
        );
    }

    #[test]
    fn test_roots_sorted_and_windowed() {
        assert_eq!(run(&[]), vec!["other", "root"]);
        assert_eq!(run(&[("offset", "1"), ("limit", "1")]), vec!["root"]);
        assert_eq!(
            run(&[("start-timestamp", "9"), ("search-direction", "prev")]),
            vec!["root", "other"]
        );
    }

    #[test]
    fn test_depth_one_returns_direct_children_only() {
        assert_eq!(run(&[("id", "root")]), vec!["b", "a"]);
    }

    #[test]
    fn test_deeper_traversal_ignores_failing_ancestors() {
        // a (ts 3) fails the range but its descendants are still returned.
        assert_eq!(
            run(&[("id", "root"), ("search-depth", "3"), ("start-timestamp", "4")]),
            vec!["b1", "a1", "a2"]
        );
    }

    #[test]
    fn test_unknown_anchor_yields_nothing() {
        assert!(run(&[("id", "missing"), ("search-depth", "5")]).is_empty());
    }

    #[test]
    fn test_compliant_paths_keep_intermediate_hops() {
        // Candidates named "order": b, a1, a2, other.
        //   root→b           trims to [b]        single vertex, kept
        //   root→a→a1        trims to [a]        single vertex, kept
        //   root→a→a1→a2     trims to [a, a1]    a is "login", dropped
        //   other            unreachable
        assert_eq!(
            run(&[("id", "root"), ("search-depth", "3"), ("name-values", "order")]),
            vec!["b", "a"]
        );
    }

    #[test]
    fn test_compliant_paths_accept_matching_intermediates() {
        // From a: a→a1 trims to [a1]; a→a1→a2 trims to [a1], both kept.
        assert_eq!(
            run(&[("id", "a"), ("search-depth", "3"), ("name-values", "order")]),
            vec!["a1"]
        );
    }

    #[test]
    fn test_compliant_paths_respect_depth() {
        assert_eq!(
            run(&[("id", "root"), ("name-values", "order")]),
            vec!["b"]
        );
    }

    #[test]
    fn test_trim_path() {
        assert_eq!(trim_path(&["anchor", "c"]), ["c"]);
        assert_eq!(trim_path(&["anchor", "m", "c"]), ["m"]);
        assert_eq!(trim_path(&["anchor", "m1", "m2", "c"]), ["m1", "m2"]);
        assert!(trim_path::<&str>(&[]).is_empty());
    }

    #[test]
    fn test_retain_path() {
        assert!(retain_path(&["x"], |_| false));
        assert!(retain_path(&["ok", "x"], |v| *v == "ok"));
        assert!(!retain_path(&["bad", "x"], |v| *v == "ok"));
        assert!(!retain_path::<&str>(&[], |_| true));
    }

    #[test]
    fn test_root_ancestor() {
        let docs = fixture();
        let graph = EventGraph::new(&docs);
        let root = graph.root_ancestor("a2", 100).and_then(document_key);
        assert_eq!(root, Some("root"));
        let capped = graph.root_ancestor("a2", 1).and_then(document_key);
        assert_eq!(capped, Some("a1"));
        assert_eq!(graph.root_ancestor("other", 100).and_then(document_key), Some("other"));
    }

    #[test]
    fn test_path() {
        let docs = fixture();
        let graph = EventGraph::new(&docs);
        assert_eq!(graph.path("root", "a2", 3), Some(vec!["root", "a", "a1", "a2"]));
        assert_eq!(graph.path("root", "a2", 2), None);
        assert_eq!(graph.path("b", "a1", 5), None);
    }
}
