//! # Document Store
//!
//! The seam between query planning and the backing store. Every adapter
//! executes a [`StoreQuery`] either to completion ([`DocumentStore::execute`])
//! or row by row into a [`RowSink`] ([`DocumentStore::for_each_row`]).
//!
//! Adapter calls are plain futures: dropping the future abandons the query.

pub mod arango;
pub mod memory;

use cc_query::StoreQuery;
use serde::Deserialize;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

pub use arango::{ArangoConfig, ArangoStore};
pub use memory::MemoryStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store request failed")]
    Http(#[from] reqwest::Error),
    #[error("store rejected the query (error {code}): {message}")]
    Rejected { code: i64, message: String },
    #[error("failed to read fixture {path:?}")]
    Fixture {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed {collection} document '{key}'")]
    InvalidDocument {
        collection: &'static str,
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("malformed document")]
    Malformed(#[from] serde_json::Error),
    /// The consumer of a row stream went away.
    #[error("result sink closed")]
    SinkClosed,
}

/// Receives rows as the store produces them.
#[async_trait::async_trait]
pub trait RowSink: Send {
    /// Fails with [`StoreError::SinkClosed`] once the consumer is gone.
    async fn accept(&mut self, row: Value) -> Result<(), StoreError>;
}

#[async_trait::async_trait]
impl RowSink for Vec<Value> {
    async fn accept(&mut self, row: Value) -> Result<(), StoreError> {
        self.push(row);
        Ok(())
    }
}

#[async_trait::async_trait]
pub trait DocumentStore: Send + Sync {
    /// Short backend name for logs.
    fn backend(&self) -> &'static str;

    async fn execute(&self, query: &StoreQuery) -> Result<Vec<Value>, StoreError> {
        let mut rows = Vec::new();
        self.for_each_row(query, &mut rows).await?;
        Ok(rows)
    }

    /// Pushes every result row into `sink` in store order and returns the
    /// row count.
    async fn for_each_row(
        &self,
        query: &StoreQuery,
        sink: &mut dyn RowSink,
    ) -> Result<u64, StoreError>;
}

// =============================================================================
// Config
// =============================================================================

#[derive(Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    #[default]
    Memory,
    Arango,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: Backend,
    /// JSON file with `events` and `messages` arrays for the memory backend.
    #[serde(default)]
    pub fixture: Option<PathBuf>,
    #[serde(default)]
    pub arango: ArangoConfig,
}

pub fn open(config: &StoreConfig) -> Result<Arc<dyn DocumentStore>, StoreError> {
    match config.backend {
        Backend::Memory => {
            let store = match &config.fixture {
                Some(path) => MemoryStore::from_fixture(path)?,
                None => {
                    tracing::warn!("No fixture configured, serving an empty memory store");
                    MemoryStore::default()
                }
            };
            Ok(Arc::new(store))
        }
        Backend::Arango => Ok(Arc::new(ArangoStore::new(config.arango.clone())?)),
    }
}
