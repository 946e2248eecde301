//! # Records
//!
//! Read-only projections of stored documents. Timestamps are stored as epoch
//! nanoseconds and rendered as RFC 3339.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

const NANOS_PER_SECOND: i64 = 1_000_000_000;

/// Converts epoch nanoseconds into a UTC instant.
pub fn instant_from_nanos(nanos: i64) -> Option<DateTime<Utc>> {
    let secs = nanos.div_euclid(NANOS_PER_SECOND);
    let subsec = nanos.rem_euclid(NANOS_PER_SECOND) as u32;
    DateTime::from_timestamp(secs, subsec)
}

fn nanos<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
    let raw = i64::deserialize(deserializer)?;
    instant_from_nanos(raw)
        .ok_or_else(|| serde::de::Error::custom(format!("timestamp {raw} is out of range")))
}

fn optional_nanos<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<DateTime<Utc>>, D::Error> {
    match Option::<i64>::deserialize(deserializer)? {
        None => Ok(None),
        Some(raw) => instant_from_nanos(raw)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("timestamp {raw} is out of range"))),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    pub event_id: String,
    pub book: String,
    pub scope: String,
    pub id: String,
    #[serde(default)]
    pub batch_id: Option<String>,
    #[serde(default)]
    pub is_batched: bool,
    pub event_name: String,
    #[serde(default)]
    pub event_type: Option<String>,
    #[serde(deserialize_with = "nanos")]
    pub start_timestamp: DateTime<Utc>,
    #[serde(default, deserialize_with = "optional_nanos")]
    pub end_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub parent_event_id: Option<String>,
    #[serde(default)]
    pub successful: bool,
    #[serde(default)]
    pub attached_message_ids: Option<BTreeSet<String>>,
    #[serde(default)]
    pub body: Option<String>,
}

impl EventRecord {
    pub fn from_document(doc: &Value) -> serde_json::Result<Self> {
        Self::deserialize(doc)
    }

    pub fn is_root(&self) -> bool {
        self.parent_event_id.as_deref().map_or(true, str::is_empty)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    #[serde(rename = "_key")]
    pub key: String,
    #[serde(default)]
    pub alias: Option<String>,
    #[serde(deserialize_with = "nanos")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub attached_event_ids: BTreeSet<String>,
    #[serde(default)]
    pub message: Option<Value>,
}

impl MessageRecord {
    pub fn from_document(doc: &Value) -> serde_json::Result<Self> {
        Self::deserialize(doc)
    }

    /// Session part of `<session>:<direction>:<sequence>`.
    pub fn session(&self) -> &str {
        self.key.split(':').next().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_record_renders_rfc3339() {
        let doc = json!({
            "_key": "k",
            "eventId": "b:s:1",
            "book": "b",
            "scope": "s",
            "id": "1",
            "eventName": "login",
            "startTimestamp": 1_500_000_000_123_000_000i64,
            "parentEventId": "",
            "successful": true,
        });
        let record = EventRecord::from_document(&doc).unwrap();
        assert!(record.is_root());
        assert!(record.end_timestamp.is_none());
        let rendered = serde_json::to_value(&record).unwrap();
        assert_eq!(rendered["startTimestamp"], "2017-07-14T02:40:00.123Z");
        assert_eq!(rendered["eventName"], "login");
    }

    #[test]
    fn test_event_record_requires_name() {
        let doc = json!({"eventId": "e", "book": "b", "scope": "s", "id": "1", "startTimestamp": 0});
        assert!(EventRecord::from_document(&doc).is_err());
    }

    #[test]
    fn test_message_session() {
        let doc = json!({"_key": "session-1:1:42", "timestamp": 5, "attachedEventIds": ["e1"]});
        let record = MessageRecord::from_document(&doc).unwrap();
        assert_eq!(record.session(), "session-1");
        assert!(record.attached_event_ids.contains("e1"));
    }

    #[test]
    fn test_negative_nanos() {
        let instant = instant_from_nanos(-1).unwrap();
        assert_eq!(instant.timestamp(), -1);
        assert_eq!(instant.timestamp_subsec_nanos(), 999_999_999);
    }
}
