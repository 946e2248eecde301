//! # cc-query: query translation for the cradle cache
//!
//! Turns a loose multi-valued parameter map into structured store queries:
//!
//! * [`params`] normalizes raw query-string pairs;
//! * [`clause`] builds filter clauses over a small [`predicate`] AST;
//! * [`plan`] assembles scans and point lookups into a [`StoreQuery`];
//! * [`traversal`] plans graph lookups over the event hierarchy;
//! * [`aql`] renders any [`StoreQuery`] as AQL text.
//!
//! Nothing here performs I/O. Store adapters live in `cc-hub`.

pub mod aql;
pub mod clause;
pub mod error;
pub mod params;
pub mod plan;
pub mod predicate;
pub mod record;
pub mod traversal;

pub use aql::{AqlCompiler, QueryCompiler};
pub use error::{QueryError, Result};
pub use params::SearchParameters;
pub use plan::StoreQuery;
pub use predicate::{Field, Predicate};
pub use record::{EventRecord, MessageRecord};
pub use traversal::{EventGraph, TraversalPlan};
