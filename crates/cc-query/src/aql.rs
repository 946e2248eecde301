//! # AQL Compiler
//!
//! Renders a [`StoreQuery`] as ArangoDB Query Language text. String literals
//! are emitted as JSON strings, so quoting and escaping live here and nowhere
//! else.

use serde_json::Value;

use crate::params::Direction;
use crate::plan::{Collection, Projection, Scan, Sort, StoreQuery, Window, EVENT_COLLECTION, EVENT_GRAPH};
use crate::predicate::{Field, Predicate, Scalar};
use crate::traversal::TraversalPlan;

/// Turns a structured query into a store's native query representation.
pub trait QueryCompiler {
    type Output;

    fn compile(&self, query: &StoreQuery) -> Self::Output;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AqlCompiler;

impl QueryCompiler for AqlCompiler {
    type Output = String;

    fn compile(&self, query: &StoreQuery) -> String {
        let lines = match query {
            StoreQuery::Scan(scan) => scan_lines(scan),
            StoreQuery::Children(plan) => children_lines(plan),
            StoreQuery::RootAncestors { filter, max_depth } => vec![
                format!("FOR event IN {EVENT_COLLECTION}"),
                format!("    FILTER {}", predicate(filter, "event")),
                "    LET root = LAST(".into(),
                format!("        FOR vertex IN 0..{max_depth} INBOUND event GRAPH {EVENT_GRAPH}"),
                "            RETURN vertex".into(),
                "    )".into(),
                "    RETURN DISTINCT root".into(),
            ],
        };
        lines.join("\n")
    }
}

fn scan_lines(scan: &Scan) -> Vec<String> {
    let var = match scan.collection {
        Collection::Events => "event",
        Collection::Messages => "message",
    };
    let mut lines = vec![format!("FOR {var} IN {}", scan.collection.name())];
    if let Some(filter) = &scan.filter {
        lines.push(format!("FILTER {}", predicate(filter, var)));
    }
    lines.extend(scan.sort.map(|sort| sort_line(&sort, var)));
    lines.extend(limit_line(&scan.window));
    lines.push(match scan.projection {
        Projection::Document => format!("RETURN {var}"),
        Projection::Field(field) => format!("RETURN {var}.{field}"),
        Projection::SessionPrefix => format!("RETURN DISTINCT FIRST(SPLIT({var}._key, \":\"))"),
    });
    lines
}

fn children_lines(plan: &TraversalPlan) -> Vec<String> {
    match plan {
        TraversalPlan::Roots {
            filter,
            sort,
            window,
        } => {
            let mut parts = vec![Predicate::IsEmpty(Field::ParentEventId)];
            parts.extend(filter.clone());
            let filter = Predicate::all(parts).unwrap_or(Predicate::IsEmpty(Field::ParentEventId));
            let mut lines = vec![
                format!("FOR doc IN {EVENT_COLLECTION}"),
                format!("    FILTER {}", predicate(&filter, "doc")),
            ];
            lines.extend(indented([sort_line(sort, "doc")]));
            lines.extend(indented(limit_line(window)));
            lines.push("    RETURN doc._key".into());
            lines
        }
        TraversalPlan::Descendants {
            anchor,
            depth,
            filter,
            sort,
            window,
        } => {
            let mut lines = vec![
                "LET anchor = FIRST(".into(),
                format!("    FOR doc IN {EVENT_COLLECTION}"),
                format!("        FILTER doc._key == {}", string(anchor)),
                "        RETURN doc".into(),
                ")".into(),
                format!("FOR vertex IN 1..{depth} OUTBOUND anchor GRAPH {EVENT_GRAPH}"),
                "    OPTIONS { order: \"bfs\", uniqueVertices: \"global\" }".into(),
            ];
            if let Some(filter) = filter {
                lines.push(format!("    FILTER {}", predicate(filter, "vertex")));
            }
            lines.extend(indented([sort_line(sort, "vertex")]));
            lines.extend(indented(limit_line(window)));
            lines.push("    RETURN vertex._key".into());
            lines
        }
        TraversalPlan::CompliantPaths {
            anchor,
            depth,
            filter,
            sort,
            window,
        } => {
            let mut lines = vec![
                "LET anchor = FIRST(".into(),
                format!("    FOR doc IN {EVENT_COLLECTION}"),
                format!("        FILTER doc._key == {}", string(anchor)),
                "        LIMIT 1".into(),
                "        RETURN doc._id".into(),
                ")".into(),
                "LET vertexArrays = (".into(),
                format!("    FOR doc IN {EVENT_COLLECTION}"),
                format!("        FILTER {}", predicate(filter, "doc")),
            ];
            lines.extend(limit_line(window).map(|l| format!("        {l}")));
            lines.extend([
                format!(
                    "        FOR path IN 1..{depth} OUTBOUND K_PATHS anchor TO doc._id GRAPH {EVENT_GRAPH}"
                ),
                "            RETURN LENGTH(path.vertices) > 2 ? POP(SHIFT(path.vertices)) : SHIFT(path.vertices)".into(),
                ")".into(),
                "LET compliant = (".into(),
                "    FOR vertexArray IN vertexArrays".into(),
                format!(
                    "        FILTER LENGTH(vertexArray) == 1 OR LENGTH(POP(vertexArray)[* FILTER NOT ({})]) == 0",
                    predicate(filter, "CURRENT")
                ),
                "        RETURN vertexArray".into(),
                ")".into(),
                "FOR vertex IN UNIQUE(FLATTEN(compliant))".into(),
                format!("    {}", sort_line(sort, "vertex")),
                "    RETURN vertex._key".into(),
            ]);
            lines
        }
    }
}

fn indented(lines: impl IntoIterator<Item = String>) -> impl Iterator<Item = String> {
    lines.into_iter().map(|line| format!("    {line}"))
}

fn sort_line(sort: &Sort, var: &str) -> String {
    let order = match sort.direction {
        Direction::Forward => "ASC",
        Direction::Backward => "DESC",
    };
    format!("SORT {var}.{} {order}", sort.field)
}

fn limit_line(window: &Window) -> Option<String> {
    let limit = window.limit?;
    Some(match window.offset {
        Some(offset) => format!("LIMIT {offset}, {limit}"),
        None => format!("LIMIT {limit}"),
    })
}

fn string(s: &str) -> String {
    Value::String(s.to_string()).to_string()
}

fn literal(scalar: &Scalar) -> String {
    match scalar {
        Scalar::Str(s) => string(s),
        Scalar::Int(n) => n.to_string(),
        Scalar::Bool(b) => b.to_string(),
    }
}

/// Renders a predicate against the document variable `var`.
pub fn predicate(p: &Predicate, var: &str) -> String {
    match p {
        Predicate::Compare { field, op, value } => {
            format!("{var}.{field} {} {}", op.symbol(), literal(value))
        }
        Predicate::In { field, values } => {
            let values: Vec<String> = values.iter().map(literal).collect();
            format!("{var}.{field} IN [{}]", values.join(", "))
        }
        Predicate::Contains { field, needle } => {
            format!("CONTAINS({var}.{field}, {})", string(needle))
        }
        Predicate::IsEmpty(field) => {
            format!("({var}.{field} == null OR {var}.{field} == \"\")")
        }
        Predicate::And(parts) => join(parts, " AND ", var),
        Predicate::Or(parts) => join(parts, " OR ", var),
        Predicate::Not(inner) => format!("NOT ({})", predicate(inner, var)),
    }
}

fn join(parts: &[Predicate], connective: &str, var: &str) -> String {
    parts
        .iter()
        .map(|part| match part {
            Predicate::And(_) | Predicate::Or(_) => format!("({})", predicate(part, var)),
            _ => predicate(part, var),
        })
        .collect::<Vec<_>>()
        .join(connective)
}
