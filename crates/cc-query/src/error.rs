//! Errors raised while translating request parameters into store queries.

use thiserror::Error;

/// Every variant describes a malformed or inconsistent request.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    #[error("{required} should be specified in order to use {dependent}")]
    MissingDependency {
        dependent: &'static str,
        required: &'static str,
    },
    #[error("search-direction should be either next or prev, got '{0}'")]
    UnknownDirection(String),
    #[error("invalid value '{value}' for parameter '{param}'")]
    InvalidValue { param: &'static str, value: String },
    #[error("missing required parameter '{0}'")]
    MissingParameter(&'static str),
}

pub type Result<T> = std::result::Result<T, QueryError>;
