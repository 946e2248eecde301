//! # Query Execution
//!
//! Runs planned queries against the configured [`DocumentStore`] and applies
//! probe semantics in one place: an empty result is `Ok(None)` for probe
//! requests and [`GatewayError::DataNotFound`] otherwise.

use cc_query::StoreQuery;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;

use crate::error::GatewayError;
use crate::store::{DocumentStore, RowSink};

#[derive(Clone)]
pub struct Gateway {
    store: Arc<dyn DocumentStore>,
}

fn suppress<T>(value: Option<T>, probe: bool, what: &str) -> Result<Option<T>, GatewayError> {
    match value {
        Some(value) => Ok(Some(value)),
        None if probe => Ok(None),
        None => Err(GatewayError::not_found(what)),
    }
}

impl Gateway {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    pub fn backend(&self) -> &'static str {
        self.store.backend()
    }

    /// All rows of `query`; an empty result counts as absent.
    pub async fn rows(
        &self,
        query: &StoreQuery,
        probe: bool,
        what: &str,
    ) -> Result<Option<Vec<Value>>, GatewayError> {
        let started = Instant::now();
        let rows = self.store.execute(query).await?;
        tracing::debug!(
            shape = query.shape(),
            rows = rows.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Query executed"
        );
        suppress(Some(rows).filter(|rows| !rows.is_empty()), probe, what)
    }

    /// First row of `query`; a `null` row counts as absent.
    pub async fn single(
        &self,
        query: &StoreQuery,
        probe: bool,
        what: &str,
    ) -> Result<Option<Value>, GatewayError> {
        let row = self
            .store
            .execute(query)
            .await?
            .into_iter()
            .next()
            .filter(|row| !row.is_null());
        suppress(row, probe, what)
    }

    /// Streams rows into `sink` and returns how many were written.
    pub async fn stream(
        &self,
        query: &StoreQuery,
        sink: &mut dyn RowSink,
        probe: bool,
        what: &str,
    ) -> Result<u64, GatewayError> {
        let count = self.store.for_each_row(query, sink).await?;
        suppress(Some(count).filter(|n| *n > 0), probe, what)?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::fixture;
    use cc_query::plan;
    use serde_json::json;

    fn gateway() -> Gateway {
        Gateway::new(Arc::new(fixture::store()))
    }

    #[tokio::test]
    async fn test_missing_single_without_probe_is_not_found() {
        let err = gateway()
            .single(&plan::message("nope"), false, "message nope")
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::DataNotFound(ref m) if m == "message nope not found"));
    }

    #[tokio::test]
    async fn test_missing_single_with_probe_is_none() {
        let row = gateway().single(&plan::message("nope"), true, "message").await.unwrap();
        assert!(row.is_none());
    }

    #[tokio::test]
    async fn test_found_rows_ignore_probe() {
        let rows = gateway()
            .rows(&plan::message_streams(), false, "streams")
            .await
            .unwrap();
        assert_eq!(rows, Some(vec![json!("s1"), json!("s2")]));
    }

    #[tokio::test]
    async fn test_empty_stream() {
        let mut sink: Vec<Value> = Vec::new();
        let err = gateway()
            .stream(&plan::event_parents("nobook", "x"), &mut sink, false, "events")
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::DataNotFound(_)));

        let count = gateway()
            .stream(&plan::event_parents("nobook", "x"), &mut sink, true, "events")
            .await
            .unwrap();
        assert_eq!(count, 0);
    }
}
