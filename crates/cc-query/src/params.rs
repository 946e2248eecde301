//! # Parameter Normalizer
//!
//! Extracts the recognized subset of a multi-valued query-string map into
//! typed, optional fields. Unknown keys are ignored; a recognized key whose
//! value cannot be parsed is rejected with [`QueryError::InvalidValue`].

use std::collections::HashMap;
use std::str::FromStr;

use crate::error::{QueryError, Result};
use crate::plan::Window;
use crate::predicate::Field;

/// Recognized parameter names.
pub mod keys {
    pub const START_TIMESTAMP: &str = "start-timestamp";
    pub const END_TIMESTAMP: &str = "end-timestamp";
    pub const SEARCH_DIRECTION: &str = "search-direction";
    pub const PAGE_SIZE: &str = "page-size";
    pub const PAGE_NUMBER: &str = "page-number";
    pub const OFFSET: &str = "offset";
    pub const LIMIT: &str = "limit";
    pub const SEARCH_DEPTH: &str = "search-depth";
    pub const ID: &str = "id";
    pub const PARENT_ID: &str = "parent-id";
    pub const BODY: &str = "body";
    pub const STATUS: &str = "status";
    pub const STREAM: &str = "stream";
    pub const PROBE: &str = "probe";
}

/// Raw multi-valued request parameters.
///
/// Values keep their order within one name; the order across names is
/// irrelevant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchParameters {
    values: HashMap<String, Vec<String>>,
}

impl SearchParameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the map from query-string pairs; repeated keys append.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut params = Self::new();
        for (key, value) in pairs {
            params.append(key, value);
        }
        params
    }

    pub fn append(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.entry(key.into()).or_default().push(value.into());
    }

    pub fn first(&self, key: &str) -> Option<&str> {
        self.values
            .get(key)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    pub fn all(&self, key: &str) -> Option<&[String]> {
        self.values.get(key).map(Vec::as_slice)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// A flag is set only by the literal value `true`.
    pub fn flag(&self, key: &str) -> bool {
        self.first(key) == Some("true")
    }

    /// Probe mode turns "no rows" into an absent result instead of an error.
    /// Unlike other flags it ignores case.
    pub fn probe(&self) -> bool {
        self.first(keys::PROBE)
            .is_some_and(|value| value.eq_ignore_ascii_case("true"))
    }

    fn parse<T: FromStr>(&self, key: &'static str) -> Result<Option<T>> {
        match self.first(key) {
            None => Ok(None),
            Some(raw) => raw
                .trim()
                .parse::<T>()
                .map(Some)
                .map_err(|_| QueryError::InvalidValue {
                    param: key,
                    value: raw.to_string(),
                }),
        }
    }
}

// =============================================================================
// Direction
// =============================================================================

/// Scan direction over start time. `Forward` is ascending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Forward,
    Backward,
}

impl Direction {
    pub fn from_token(token: &str) -> Result<Self> {
        match token {
            "next" => Ok(Self::Forward),
            "prev" => Ok(Self::Backward),
            other => Err(QueryError::UnknownDirection(other.to_string())),
        }
    }
}

// =============================================================================
// Typed parameter groups
// =============================================================================

/// Start/end bounds plus the direction that anchors them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimeRange {
    pub start: Option<i64>,
    pub end: Option<i64>,
    pub direction: Option<Direction>,
}

impl TimeRange {
    /// Reads `start-timestamp`, `end-timestamp` and `search-direction`.
    ///
    /// A direction is only meaningful together with a start timestamp.
    pub fn from_params(params: &SearchParameters) -> Result<Self> {
        let direction = match params.first(keys::SEARCH_DIRECTION) {
            None => None,
            Some(_) if !params.contains(keys::START_TIMESTAMP) => {
                return Err(QueryError::MissingDependency {
                    dependent: keys::SEARCH_DIRECTION,
                    required: keys::START_TIMESTAMP,
                })
            }
            Some(token) => Some(Direction::from_token(token)?),
        };
        Ok(Self {
            start: params.parse(keys::START_TIMESTAMP)?,
            end: params.parse(keys::END_TIMESTAMP)?,
            direction,
        })
    }

    pub fn sort_direction(&self) -> Direction {
        self.direction.unwrap_or_default()
    }

    pub fn is_backward(&self) -> bool {
        self.direction == Some(Direction::Backward)
    }
}

/// The two repeatable text facets of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextFacet {
    Name,
    Type,
}

impl TextFacet {
    fn prefix(self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::Type => "type",
        }
    }

    pub fn field(self) -> Field {
        match self {
            Self::Name => Field::EventName,
            Self::Type => Field::EventType,
        }
    }
}

/// Values of a text facet with its independent modifiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextGroup {
    pub facet: TextFacet,
    pub values: Vec<String>,
    pub negate: bool,
    pub conjunct: bool,
    pub strict: bool,
}

impl TextGroup {
    /// Returns `None` when `<facet>-values` is absent.
    pub fn from_params(params: &SearchParameters, facet: TextFacet) -> Option<Self> {
        let prefix = facet.prefix();
        let values = params.all(&format!("{prefix}-values"))?;
        Some(Self {
            facet,
            values: values.to_vec(),
            negate: params.flag(&format!("{prefix}-negative")),
            conjunct: params.flag(&format!("{prefix}-conjunct")),
            strict: params.flag(&format!("{prefix}-strict")),
        })
    }
}

/// Filters shared by event search and children traversal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventFilters {
    pub range: TimeRange,
    pub name: Option<TextGroup>,
    pub kind: Option<TextGroup>,
}

impl EventFilters {
    pub fn from_params(params: &SearchParameters) -> Result<Self> {
        Ok(Self {
            range: TimeRange::from_params(params)?,
            name: TextGroup::from_params(params, TextFacet::Name),
            kind: TextGroup::from_params(params, TextFacet::Type),
        })
    }

    pub fn has_text_groups(&self) -> bool {
        self.name.is_some() || self.kind.is_some()
    }
}

/// Parameters of a flat, directed event search within one book.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventSearchParams {
    pub book: String,
    pub filters: EventFilters,
    pub parent_id: Option<String>,
    pub body: Option<String>,
    pub status: Option<bool>,
    pub limit: Option<u64>,
}

impl EventSearchParams {
    pub fn from_params(book: impl Into<String>, params: &SearchParameters) -> Result<Self> {
        Ok(Self {
            book: book.into(),
            filters: EventFilters::from_params(params)?,
            parent_id: params.first(keys::PARENT_ID).map(str::to_string),
            body: params.first(keys::BODY).map(str::to_string),
            status: params.parse(keys::STATUS)?,
            limit: params.parse(keys::LIMIT)?,
        })
    }
}

/// Parameters of a "children of event X" lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildrenParams {
    pub anchor: Option<String>,
    pub depth: u32,
    pub window: Window,
    pub filters: EventFilters,
}

impl ChildrenParams {
    pub fn from_params(params: &SearchParameters) -> Result<Self> {
        let depth = params.parse::<u32>(keys::SEARCH_DEPTH)?.unwrap_or(1);
        if depth == 0 {
            return Err(QueryError::InvalidValue {
                param: keys::SEARCH_DEPTH,
                value: depth.to_string(),
            });
        }
        Ok(Self {
            anchor: params.first(keys::ID).map(str::to_string),
            depth,
            window: Window {
                offset: params.parse(keys::OFFSET)?,
                limit: params.parse(keys::LIMIT)?,
            },
            filters: EventFilters::from_params(params)?,
        })
    }
}

/// Parameters of the streamed message search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageSearchParams {
    pub start: Option<i64>,
    pub end: Option<i64>,
    pub sessions: Vec<String>,
    pub window: Window,
}

impl MessageSearchParams {
    /// `stream` is repeatable and required. The bounds ignore
    /// `search-direction`, but it is still validated.
    pub fn from_params(params: &SearchParameters) -> Result<Self> {
        let sessions = params
            .all(keys::STREAM)
            .filter(|sessions| !sessions.is_empty())
            .ok_or(QueryError::MissingParameter(keys::STREAM))?
            .to_vec();
        let range = TimeRange::from_params(params)?;
        Ok(Self {
            start: range.start,
            end: range.end,
            sessions,
            window: page_window(params)?,
        })
    }
}

/// `page-size` alone caps rows; with a 1-based `page-number` it also skips
/// the preceding pages.
fn page_window(params: &SearchParameters) -> Result<Window> {
    let size: Option<u64> = params.parse(keys::PAGE_SIZE)?;
    let number: Option<u64> = params.parse(keys::PAGE_NUMBER)?;
    match (size, number) {
        (None, _) => Ok(Window::default()),
        (Some(size), None) => Ok(Window::limit(size)),
        (Some(_), Some(0)) => Err(QueryError::InvalidValue {
            param: keys::PAGE_NUMBER,
            value: "0".into(),
        }),
        (Some(size), Some(number)) => Ok(Window {
            offset: Some(size.saturating_mul(number - 1)),
            limit: Some(size),
        }),
    }
}
