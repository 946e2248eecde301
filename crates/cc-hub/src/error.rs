//! # Gateway Errors
//!
//! One error type for every request path. REST handlers turn it into a
//! status code with a plain-text cause chain; the streaming controller turns
//! it into an `error` frame.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use cc_query::QueryError;
use thiserror::Error;

use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("invalid request")]
    InvalidRequest(#[from] QueryError),
    #[error("{0}")]
    DataNotFound(String),
    #[error("client disconnected")]
    ClientDisconnected,
    #[error("store query failed")]
    Store(#[source] StoreError),
}

impl From<StoreError> for GatewayError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::SinkClosed => Self::ClientDisconnected,
            other => Self::Store(other),
        }
    }
}

impl GatewayError {
    pub fn not_found(what: impl std::fmt::Display) -> Self {
        Self::DataNotFound(format!("{what} not found"))
    }

    /// Identifying name carried in `error` frames.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "InvalidRequest",
            Self::DataNotFound(_) => "DataNotFound",
            Self::ClientDisconnected => "ClientDisconnected",
            Self::Store(_) => "StoreError",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::DataNotFound(_) => StatusCode::NOT_FOUND,
            Self::ClientDisconnected | Self::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Every message in the source chain, newline-joined, innermost last.
    pub fn cause_chain(&self) -> String {
        let mut lines = vec![self.to_string()];
        let mut source = std::error::Error::source(self);
        while let Some(cause) = source {
            lines.push(cause.to_string());
            source = cause.source();
        }
        lines.join("\n")
    }

    pub fn info(&self) -> ErrorInfo {
        ErrorInfo {
            kind: self.kind(),
            cause: self.cause_chain(),
        }
    }
}

/// Payload of an `error` frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub kind: &'static str,
    pub cause: String,
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        match &self {
            Self::Store(_) => tracing::error!("Request failed: {}", self.cause_chain()),
            _ => tracing::debug!("Request rejected: {}", self.cause_chain()),
        }
        (self.status(), self.cause_chain()).into_response()
    }
}
