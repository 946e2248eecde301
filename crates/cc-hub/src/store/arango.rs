//! # ArangoDB Store
//!
//! Compiles queries with [`AqlCompiler`] and runs them through the HTTP
//! cursor API. Batches are pulled one at a time and forwarded to the sink
//! before the next one is requested. A cursor that is left with unread
//! batches, whether by an error or by the caller dropping the query, is
//! deleted on the server.

use cc_query::{AqlCompiler, QueryCompiler, StoreQuery};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use super::{DocumentStore, RowSink, StoreError};

#[derive(Deserialize, Debug, Clone)]
pub struct ArangoConfig {
    #[serde(default = "default_url")]
    pub url: String,
    #[serde(default = "default_database")]
    pub database: String,
    #[serde(default = "default_user")]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
    /// Idle lifetime of a server-side cursor, in seconds.
    #[serde(default = "default_cursor_ttl")]
    pub cursor_ttl_secs: u64,
}

impl Default for ArangoConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            database: default_database(),
            user: default_user(),
            password: String::new(),
            batch_size: default_batch_size(),
            connect_timeout_ms: default_connect_timeout(),
            cursor_ttl_secs: default_cursor_ttl(),
        }
    }
}

fn default_url() -> String {
    "http://127.0.0.1:8529".into()
}
fn default_database() -> String {
    "cradle".into()
}
fn default_user() -> String {
    "root".into()
}
fn default_batch_size() -> u32 {
    1000
}
fn default_connect_timeout() -> u64 {
    5000
}
fn default_cursor_ttl() -> u64 {
    60
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CursorRequest<'a> {
    query: &'a str,
    batch_size: u32,
    ttl: u64,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
struct CursorBatch {
    #[serde(default)]
    result: Vec<Value>,
    #[serde(default)]
    has_more: bool,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    error: bool,
    #[serde(default)]
    error_num: Option<i64>,
    #[serde(default)]
    error_message: Option<String>,
}

/// Deletes the server-side cursor on drop unless it was read to the end.
struct OpenCursor {
    request: Option<reqwest::RequestBuilder>,
    id: String,
}

impl OpenCursor {
    fn exhausted(mut self) {
        self.request = None;
    }
}

impl Drop for OpenCursor {
    fn drop(&mut self) {
        let Some(request) = self.request.take() else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let id = std::mem::take(&mut self.id);
        runtime.spawn(async move {
            match request.send().await {
                Ok(_) => tracing::debug!(cursor = %id, "Closed cursor"),
                Err(e) => tracing::debug!(cursor = %id, "Failed to close cursor: {}", e),
            }
        });
    }
}

impl CursorBatch {
    fn into_result(self) -> Result<Self, StoreError> {
        if self.error {
            return Err(StoreError::Rejected {
                code: self.error_num.unwrap_or_default(),
                message: self.error_message.unwrap_or_default(),
            });
        }
        Ok(self)
    }
}

pub struct ArangoStore {
    client: reqwest::Client,
    config: ArangoConfig,
    compiler: AqlCompiler,
}

impl ArangoStore {
    pub fn new(config: ArangoConfig) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .build()?;
        tracing::info!(url = %config.url, database = %config.database, "Using ArangoDB store");
        Ok(Self {
            client,
            config,
            compiler: AqlCompiler,
        })
    }

    fn cursor_url(&self, id: Option<&str>) -> String {
        let base = format!(
            "{}/_db/{}/_api/cursor",
            self.config.url.trim_end_matches('/'),
            self.config.database
        );
        match id {
            Some(id) => format!("{base}/{id}"),
            None => base,
        }
    }

    async fn read_batch(response: reqwest::Response) -> Result<CursorBatch, StoreError> {
        let batch: CursorBatch = response.json().await?;
        batch.into_result()
    }

    async fn open_cursor(&self, aql: &str) -> Result<CursorBatch, StoreError> {
        let response = self
            .client
            .post(self.cursor_url(None))
            .basic_auth(&self.config.user, Some(&self.config.password))
            .json(&CursorRequest {
                query: aql,
                batch_size: self.config.batch_size,
                ttl: self.config.cursor_ttl_secs,
            })
            .send()
            .await?;
        Self::read_batch(response).await
    }

    async fn next_batch(&self, id: &str) -> Result<CursorBatch, StoreError> {
        let response = self
            .client
            .put(self.cursor_url(Some(id)))
            .basic_auth(&self.config.user, Some(&self.config.password))
            .send()
            .await?;
        Self::read_batch(response).await
    }

    fn guard_cursor(&self, id: &str) -> OpenCursor {
        OpenCursor {
            request: Some(
                self.client
                    .delete(self.cursor_url(Some(id)))
                    .basic_auth(&self.config.user, Some(&self.config.password)),
            ),
            id: id.to_string(),
        }
    }

    async fn drain(
        &self,
        mut batch: CursorBatch,
        sink: &mut dyn RowSink,
        count: &mut u64,
    ) -> Result<(), StoreError> {
        loop {
            for row in std::mem::take(&mut batch.result) {
                sink.accept(row).await?;
                *count += 1;
            }
            if !batch.has_more {
                return Ok(());
            }
            let id = batch.id.take().ok_or_else(|| StoreError::Rejected {
                code: 0,
                message: "cursor has more results but no id".into(),
            })?;
            batch = self.next_batch(&id).await?;
        }
    }
}

#[async_trait::async_trait]
impl DocumentStore for ArangoStore {
    fn backend(&self) -> &'static str {
        "arango"
    }

    async fn for_each_row(
        &self,
        query: &StoreQuery,
        sink: &mut dyn RowSink,
    ) -> Result<u64, StoreError> {
        let aql = self.compiler.compile(query);
        tracing::debug!(shape = query.shape(), %aql, "Executing AQL");
        let batch = self.open_cursor(&aql).await?;
        let cursor = match (&batch.id, batch.has_more) {
            (Some(id), true) => Some(self.guard_cursor(id)),
            _ => None,
        };
        let mut count = 0;
        self.drain(batch, sink, &mut count).await?;
        if let Some(cursor) = cursor {
            cursor.exhausted();
        }
        Ok(count)
    }
}
