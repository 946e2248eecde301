//! # Memory Store
//!
//! Holds events and messages as JSON documents and evaluates every query
//! shape natively: predicates, sort and windows for scans, [`EventGraph`]
//! for traversals. The event graph is derived from `parentEventId`.

use cc_query::plan::{Collection, Projection, Scan};
use cc_query::traversal::document_key;
use cc_query::{EventGraph, EventRecord, MessageRecord, StoreQuery};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;
use std::path::Path;

use super::{DocumentStore, RowSink, StoreError};

#[derive(Deserialize, Default)]
struct Fixture {
    #[serde(default)]
    events: Vec<Value>,
    #[serde(default)]
    messages: Vec<Value>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    events: Vec<Value>,
    messages: Vec<Value>,
}

impl MemoryStore {
    /// Validates every document against its record projection.
    pub fn new(events: Vec<Value>, messages: Vec<Value>) -> Result<Self, StoreError> {
        for doc in &events {
            EventRecord::from_document(doc).map_err(|source| StoreError::InvalidDocument {
                collection: Collection::Events.name(),
                key: key_of(doc),
                source,
            })?;
        }
        for doc in &messages {
            MessageRecord::from_document(doc).map_err(|source| StoreError::InvalidDocument {
                collection: Collection::Messages.name(),
                key: key_of(doc),
                source,
            })?;
        }
        Ok(Self { events, messages })
    }

    pub fn from_fixture(path: &Path) -> Result<Self, StoreError> {
        let content = std::fs::read_to_string(path).map_err(|source| StoreError::Fixture {
            path: path.to_path_buf(),
            source,
        })?;
        let fixture: Fixture = serde_json::from_str(&content)?;
        let store = Self::new(fixture.events, fixture.messages)?;
        tracing::info!(
            path = %path.display(),
            events = store.events.len(),
            messages = store.messages.len(),
            "Loaded fixture"
        );
        Ok(store)
    }

    fn collection(&self, collection: Collection) -> &[Value] {
        match collection {
            Collection::Events => &self.events,
            Collection::Messages => &self.messages,
        }
    }

    fn scan(&self, scan: &Scan) -> Vec<Value> {
        let mut rows: Vec<&Value> = self
            .collection(scan.collection)
            .iter()
            .filter(|doc| scan.filter.as_ref().map_or(true, |f| f.matches(doc)))
            .collect();
        if let Some(sort) = &scan.sort {
            sort.sort(&mut rows);
        }
        let rows = scan.window.apply(rows);
        match scan.projection {
            Projection::Document => rows.into_iter().cloned().collect(),
            Projection::Field(field) => rows
                .into_iter()
                .map(|doc| field.get(doc).cloned().unwrap_or(Value::Null))
                .collect(),
            Projection::SessionPrefix => {
                let mut seen = HashSet::new();
                rows.into_iter()
                    .filter_map(document_key)
                    .filter_map(|key| key.split(':').next())
                    .filter(|session| seen.insert(*session))
                    .map(|session| Value::String(session.to_string()))
                    .collect()
            }
        }
    }

    fn root_ancestors(&self, filter: &cc_query::Predicate, max_depth: u32) -> Vec<Value> {
        let graph = EventGraph::new(&self.events);
        let mut seen = HashSet::new();
        graph
            .documents()
            .filter(|doc| filter.matches(doc))
            .filter_map(document_key)
            .filter_map(|key| graph.root_ancestor(key, max_depth))
            .filter(|root| document_key(*root).is_some_and(|key| seen.insert(key)))
            .cloned()
            .collect()
    }

    fn run(&self, query: &StoreQuery) -> Vec<Value> {
        match query {
            StoreQuery::Scan(scan) => self.scan(scan),
            StoreQuery::Children(plan) => plan
                .evaluate(&EventGraph::new(&self.events))
                .into_iter()
                .map(Value::String)
                .collect(),
            StoreQuery::RootAncestors { filter, max_depth } => {
                self.root_ancestors(filter, *max_depth)
            }
        }
    }
}

fn key_of(doc: &Value) -> String {
    document_key(doc).unwrap_or("<no key>").to_string()
}

#[async_trait::async_trait]
impl DocumentStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn for_each_row(
        &self,
        query: &StoreQuery,
        sink: &mut dyn RowSink,
    ) -> Result<u64, StoreError> {
        let mut count = 0;
        for row in self.run(query) {
            sink.accept(row).await?;
            count += 1;
        }
        Ok(count)
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use cc_query::params::{ChildrenParams, MessageSearchParams};
    use cc_query::{plan, traversal, SearchParameters};
    use serde_json::json;

    fn params(pairs: &[(&str, &str)]) -> SearchParameters {
        SearchParameters::from_pairs(pairs.iter().copied())
    }

    #[tokio::test]
    async fn test_point_lookups() {
        let store = fixture::store();
        let rows = store.execute(&plan::event("book", "scope", "a")).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["eventName"], "login");

        let rows = store.execute(&plan::message_body("s1:1:2")).await.unwrap();
        assert_eq!(rows, vec![json!({"fields": {"seq": "s1:1:2"}})]);

        let rows = store.execute(&plan::attached_events("s2:2:1")).await.unwrap();
        assert_eq!(rows, vec![json!(["root"])]);

        assert!(store.execute(&plan::message("missing")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_message_streams_are_distinct() {
        let store = fixture::store();
        let rows = store.execute(&plan::message_streams()).await.unwrap();
        assert_eq!(rows, vec![json!("s1"), json!("s2")]);
    }

    #[tokio::test]
    async fn test_message_search_window() {
        let store = fixture::store();
        let p = MessageSearchParams::from_params(&params(&[
            ("start-timestamp", "1000"),
            ("end-timestamp", "2000"),
            ("stream", "s1"),
        ]))
        .unwrap();
        let rows = store.execute(&plan::message_search(&p)).await.unwrap();
        let keys: Vec<&str> = rows.iter().filter_map(document_key).collect();
        assert_eq!(keys, vec!["s1:1:1", "s1:1:2"]);
    }

    #[tokio::test]
    async fn test_children_traversal() {
        let store = fixture::store();
        let p = ChildrenParams::from_params(&params(&[("id", "root"), ("search-depth", "2")])).unwrap();
        let rows = store
            .execute(&StoreQuery::Children(traversal::plan_children(&p)))
            .await
            .unwrap();
        assert_eq!(rows, vec![json!("b"), json!("a"), json!("a1")]);
    }

    #[tokio::test]
    async fn test_root_ancestors() {
        let store = fixture::store();
        let rows = store.execute(&plan::event_parents("book", "scope")).await.unwrap();
        let keys: Vec<&str> = rows.iter().filter_map(document_key).collect();
        assert_eq!(keys, vec!["root", "other"]);
    }

    #[tokio::test]
    async fn test_sink_closed_stops_iteration() {
        struct Closed;

        #[async_trait::async_trait]
        impl RowSink for Closed {
            async fn accept(&mut self, _row: Value) -> Result<(), StoreError> {
                Err(StoreError::SinkClosed)
            }
        }

        let store = fixture::store();
        let err = store
            .for_each_row(&plan::message_streams(), &mut Closed)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::SinkClosed));
    }

    #[tokio::test]
    async fn test_bundled_fixture() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("fixtures/cradle.json");
        let store = MemoryStore::from_fixture(&path).unwrap();
        let rows = store.execute(&plan::event_parents("demo", "default")).await.unwrap();
        let keys: Vec<&str> = rows.iter().filter_map(document_key).collect();
        assert_eq!(keys, vec!["run-1"]);
    }

    #[test]
    fn test_missing_fixture() {
        let err = MemoryStore::from_fixture(Path::new("/nonexistent/cradle.json")).unwrap_err();
        assert!(matches!(err, StoreError::Fixture { .. }));
    }

    #[test]
    fn test_invalid_document_is_rejected() {
        let err = MemoryStore::new(vec![json!({"_key": "x"})], vec![]).unwrap_err();
        assert!(matches!(
            err,
            StoreError::InvalidDocument { collection: "events", .. }
        ));
    }
}
