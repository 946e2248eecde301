//! # API Handlers
//!
//! REST lookups answer with JSON (or `null` for an absent probe result) and
//! a `Cache-Control` directive per object class. Message search answers with
//! an SSE stream driven by [`StreamController`].

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use cc_query::params::{ChildrenParams, EventSearchParams, MessageSearchParams};
use cc_query::{plan, traversal, EventRecord, SearchParameters, StoreQuery};
use futures_util::StreamExt;
use serde::Serialize;
use serde_json::Value;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::Instrument;

use crate::error::GatewayError;
use crate::store::StoreError;
use crate::stream::StreamController;
use crate::{AppState, CacheConfig};

type RawParams = Query<Vec<(String, String)>>;
type ApiResult = Result<Response, GatewayError>;

const SSE_CACHE_CONTROL: &str = "no-cache, no-store, no-transform";

/// How long clients may keep a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifetime {
    NotModified,
    RarelyModified,
}

pub fn cache_control(cache: &CacheConfig, lifetime: Lifetime) -> String {
    if !cache.enable_caching {
        return "no-cache, public".into();
    }
    let age = match lifetime {
        Lifetime::NotModified => cache.not_modified_objects_lifetime,
        Lifetime::RarelyModified => cache.rarely_modified_objects,
    };
    format!("public, max-age={age}, s-maxage={age}")
}

fn respond<T: Serialize>(state: &AppState, lifetime: Lifetime, body: T) -> Response {
    (
        [(header::CACHE_CONTROL, cache_control(&state.config.cache, lifetime))],
        Json(body),
    )
        .into_response()
}

fn events(rows: Option<Vec<Value>>) -> Result<Option<Vec<EventRecord>>, GatewayError> {
    let records = rows
        .map(|rows| {
            rows.iter()
                .map(EventRecord::from_document)
                .collect::<Result<Vec<_>, _>>()
        })
        .transpose()
        .map_err(StoreError::Malformed)?;
    Ok(records)
}

// =============================================================================
// Events
// =============================================================================

pub async fn get_event(
    State(state): State<Arc<AppState>>,
    Path((book, scope, id)): Path<(String, String, String)>,
    Query(raw): RawParams,
) -> ApiResult {
    let params = SearchParameters::from_pairs(raw);
    let row = state
        .gateway
        .single(
            &plan::event(&book, &scope, &id),
            params.probe(),
            &format!("event {book}/{scope}/{id}"),
        )
        .await?;
    let event = row
        .as_ref()
        .map(EventRecord::from_document)
        .transpose()
        .map_err(StoreError::Malformed)?;
    Ok(respond(&state, Lifetime::NotModified, event))
}

pub async fn event_children(
    State(state): State<Arc<AppState>>,
    Query(raw): RawParams,
) -> ApiResult {
    let params = SearchParameters::from_pairs(raw);
    let children = ChildrenParams::from_params(&params)?;
    let plan = traversal::plan_children(&children);
    tracing::debug!(strategy = plan.strategy(), "Planned children lookup");
    let keys = state
        .gateway
        .rows(&StoreQuery::Children(plan), params.probe(), "event children")
        .await?;
    Ok(respond(&state, Lifetime::NotModified, keys))
}

pub async fn search_events(
    State(state): State<Arc<AppState>>,
    Path(book): Path<String>,
    Query(raw): RawParams,
) -> ApiResult {
    let params = SearchParameters::from_pairs(raw);
    let search = EventSearchParams::from_params(book.as_str(), &params)?;
    let rows = state
        .gateway
        .rows(
            &plan::event_search(&search),
            params.probe(),
            &format!("events in book {book}"),
        )
        .await?;
    Ok(respond(&state, Lifetime::RarelyModified, events(rows)?))
}

pub async fn event_parents(
    State(state): State<Arc<AppState>>,
    Path((book, scope)): Path<(String, String)>,
    Query(raw): RawParams,
) -> ApiResult {
    let params = SearchParameters::from_pairs(raw);
    let rows = state
        .gateway
        .rows(
            &plan::event_parents(&book, &scope),
            params.probe(),
            &format!("root events of {book}/{scope}"),
        )
        .await?;
    Ok(respond(&state, Lifetime::RarelyModified, events(rows)?))
}

// =============================================================================
// Messages
// =============================================================================

pub async fn message_streams(State(state): State<Arc<AppState>>) -> ApiResult {
    let sessions = state
        .gateway
        .rows(&plan::message_streams(), true, "message streams")
        .await?
        .unwrap_or_default();
    Ok(respond(&state, Lifetime::RarelyModified, sessions))
}

async fn message_lookup(
    state: &AppState,
    query: StoreQuery,
    raw: Vec<(String, String)>,
    what: String,
) -> ApiResult {
    let params = SearchParameters::from_pairs(raw);
    let row = state.gateway.single(&query, params.probe(), &what).await?;
    Ok(respond(state, Lifetime::RarelyModified, row))
}

pub async fn get_message(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(raw): RawParams,
) -> ApiResult {
    message_lookup(&state, plan::message(&id), raw, format!("message {id}")).await
}

pub async fn message_body(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(raw): RawParams,
) -> ApiResult {
    message_lookup(
        &state,
        plan::message_body(&id),
        raw,
        format!("body of message {id}"),
    )
    .await
}

pub async fn attached_events(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(raw): RawParams,
) -> ApiResult {
    message_lookup(
        &state,
        plan::attached_events(&id),
        raw,
        format!("events attached to message {id}"),
    )
    .await
}

/// Parameters are validated before the stream opens, so a bad request is a
/// plain 400 rather than an `error` frame.
pub async fn search_messages(
    State(state): State<Arc<AppState>>,
    Query(raw): RawParams,
) -> ApiResult {
    let params = SearchParameters::from_pairs(raw);
    let search = MessageSearchParams::from_params(&params)?;
    let query = plan::message_search(&search);
    let probe = params.probe();

    let request_id = uuid::Uuid::new_v4();
    let span = tracing::info_span!("sse", %request_id);
    span.in_scope(|| {
        tracing::info!(sessions = ?search.sessions, start = ?search.start, end = ?search.end, "Message search started")
    });

    let (tx, rx) = mpsc::channel(state.config.server.stream_buffer.max(1));
    let controller = StreamController::new(
        tx.clone(),
        Arc::new(tx),
        Duration::from_millis(state.config.server.check_requests_alive_delay_ms),
    );
    let gateway = state.gateway.clone();
    tokio::spawn(
        async move {
            if let Err(e) = controller.run(&gateway, &query, probe, "messages").await {
                match e {
                    GatewayError::Store(_) => tracing::error!("Stream failed: {}", e.cause_chain()),
                    _ => tracing::info!("Stream ended with {}: {}", e.kind(), e.cause_chain()),
                }
            }
        }
        .instrument(span),
    );

    let body = Body::from_stream(ReceiverStream::new(rx).map(Ok::<_, Infallible>));
    Ok((
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, SSE_CACHE_CONTROL),
        ],
        body,
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::Gateway;
    use crate::store::memory::fixture;
    use crate::Config;
    use axum::http::{HeaderValue, StatusCode};

    fn state_with(config: Config) -> Arc<AppState> {
        Arc::new(AppState {
            gateway: Gateway::new(Arc::new(fixture::store())),
            config,
        })
    }

    fn state() -> Arc<AppState> {
        state_with(Config::default())
    }

    fn query(pairs: &[(&str, &str)]) -> RawParams {
        Query(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    async fn body(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    async fn json(response: Response) -> Value {
        serde_json::from_str(&body(response).await).unwrap()
    }

    #[test]
    fn test_cache_control_directives() {
        let mut cache = CacheConfig::default();
        cache.not_modified_objects_lifetime = 600;
        cache.rarely_modified_objects = 30;
        assert_eq!(
            cache_control(&cache, Lifetime::NotModified),
            "public, max-age=600, s-maxage=600"
        );
        assert_eq!(
            cache_control(&cache, Lifetime::RarelyModified),
            "public, max-age=30, s-maxage=30"
        );
        cache.enable_caching = false;
        assert_eq!(cache_control(&cache, Lifetime::NotModified), "no-cache, public");
    }

    #[tokio::test]
    async fn test_get_event() {
        let response = get_event(
            State(state()),
            Path(("book".into(), "scope".into(), "a".into())),
            query(&[]),
        )
        .await
        .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response
            .headers()
            .get(header::CACHE_CONTROL)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("public, max-age=")));
        let event = json(response).await;
        assert_eq!(event["eventName"], "login");
        assert_eq!(event["parentEventId"], "root");
        assert!(event["startTimestamp"].as_str().is_some_and(|ts| ts.starts_with("1970-01-01T")));
    }

    #[tokio::test]
    async fn test_missing_event_probe_and_not_found() {
        let path = || Path(("book".to_string(), "scope".to_string(), "zzz".to_string()));
        let err = get_event(State(state()), path(), query(&[])).await.unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);

        let response = get_event(State(state()), path(), query(&[("probe", "true")]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body(response).await, "null");
    }

    #[tokio::test]
    async fn test_event_children_compliant_paths() {
        let response = event_children(
            State(state()),
            query(&[("id", "root"), ("search-depth", "3"), ("name-values", "order")]),
        )
        .await
        .unwrap();
        assert_eq!(json(response).await, serde_json::json!(["b", "a"]));
    }

    #[tokio::test]
    async fn test_event_children_rejects_direction_without_start() {
        let err = event_children(State(state()), query(&[("search-direction", "prev")]))
            .await
            .unwrap_err();
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(body(response)
            .await
            .ends_with("start-timestamp should be specified in order to use search-direction"));
    }

    #[tokio::test]
    async fn test_search_events_backward() {
        let response = search_events(
            State(state()),
            Path("book".into()),
            query(&[
                ("start-timestamp", "4"),
                ("search-direction", "prev"),
                ("limit", "2"),
            ]),
        )
        .await
        .unwrap();
        let events = json(response).await;
        let ids: Vec<&str> = events
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|e| e["id"].as_str())
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_event_parents() {
        let response = event_parents(
            State(state()),
            Path(("book".into(), "scope".into())),
            query(&[]),
        )
        .await
        .unwrap();
        let roots = json(response).await;
        assert_eq!(roots.as_array().map(Vec::len), Some(2));
    }

    #[tokio::test]
    async fn test_message_endpoints() {
        let streams = json(message_streams(State(state())).await.unwrap()).await;
        assert_eq!(streams, serde_json::json!(["s1", "s2"]));

        let body_json = json(
            message_body(State(state()), Path("s1:1:1".into()), query(&[]))
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(body_json, serde_json::json!({"fields": {"seq": "s1:1:1"}}));

        let attached = json(
            attached_events(State(state()), Path("s1:1:1".into()), query(&[]))
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(attached, serde_json::json!(["root"]));

        let err = get_message(State(state()), Path("nope".into()), query(&[]))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::DataNotFound(_)));
    }

    #[tokio::test]
    async fn test_caching_disabled() {
        let mut config = Config::default();
        config.cache.enable_caching = false;
        let response = message_streams(State(state_with(config))).await.unwrap();
        assert_eq!(
            response.headers().get(header::CACHE_CONTROL),
            Some(&HeaderValue::from_static("no-cache, public"))
        );
    }

    #[tokio::test]
    async fn test_search_messages_streams_frames() {
        let response = search_messages(
            State(state()),
            query(&[
                ("stream", "s1"),
                ("start-timestamp", "1000"),
                ("end-timestamp", "2000"),
            ]),
        )
        .await
        .unwrap();
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE),
            Some(&HeaderValue::from_static("text/event-stream"))
        );
        assert_eq!(
            response.headers().get(header::CACHE_CONTROL),
            Some(&HeaderValue::from_static(SSE_CACHE_CONTROL))
        );
        let text = body(response).await;
        assert_eq!(text.matches("event: message\n").count(), 2);
        assert!(text.ends_with("event: close\ndata: empty data\n\n"));
    }

    #[tokio::test]
    async fn test_search_messages_requires_stream() {
        let err = search_messages(State(state()), query(&[("page-size", "10")]))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_search_messages_empty_emits_error_frame() {
        let response = search_messages(State(state()), query(&[("stream", "nobody")]))
            .await
            .unwrap();
        let text = body(response).await;
        assert!(text.starts_with("event: error\n"));
        assert!(text.ends_with("event: close\ndata: empty data\n\n"));
    }
}
