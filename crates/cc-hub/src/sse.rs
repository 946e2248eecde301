//! # SSE Framing
//!
//! A frame is an optional `event:` line, one `data:` line per payload line,
//! an optional `id:` line and a terminating blank line.

use cc_query::traversal::document_key;
use serde_json::Value;
use std::fmt::Write;

use crate::error::ErrorInfo;

/// Payload of frames that carry nothing.
pub const EMPTY_DATA: &str = "empty data";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(dead_code)]
pub enum FrameKind {
    Message,
    Event,
    Close,
    Error,
    KeepAlive,
    MessageIds,
    PipelineStatus,
}

impl FrameKind {
    pub const ALL: [FrameKind; 7] = [
        Self::Message,
        Self::Event,
        Self::Close,
        Self::Error,
        Self::KeepAlive,
        Self::MessageIds,
        Self::PipelineStatus,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Message => "message",
            Self::Event => "event",
            Self::Close => "close",
            Self::Error => "error",
            Self::KeepAlive => "keep_alive",
            Self::MessageIds => "message_ids",
            Self::PipelineStatus => "pipeline_status",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    data: String,
    kind: Option<FrameKind>,
    id: Option<String>,
}

impl Default for SseFrame {
    fn default() -> Self {
        Self {
            data: EMPTY_DATA.into(),
            kind: None,
            id: None,
        }
    }
}

impl SseFrame {
    pub fn new(kind: FrameKind) -> Self {
        Self {
            kind: Some(kind),
            ..Self::default()
        }
    }

    pub fn with_data(mut self, data: impl Into<String>) -> Self {
        self.data = data.into();
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// One stored row; the document key becomes the frame id.
    pub fn message(row: &Value) -> Self {
        let frame = Self::new(FrameKind::Message).with_data(row.to_string());
        match document_key(row) {
            Some(key) => frame.with_id(key),
            None => frame,
        }
    }

    pub fn close() -> Self {
        Self::new(FrameKind::Close)
    }

    pub fn error(info: &ErrorInfo) -> Self {
        let data = serde_json::json!({
            "exceptionName": info.kind,
            "exceptionCause": info.cause,
        });
        Self::new(FrameKind::Error).with_data(data.to_string())
    }

    pub fn kind(&self) -> Option<FrameKind> {
        self.kind
    }

    pub fn encode(&self) -> String {
        let mut out = String::with_capacity(self.data.len() + 32);
        if let Some(kind) = self.kind {
            let _ = writeln!(out, "event: {}", kind.as_str());
        }
        for line in self.data.split('\n') {
            let line = line.strip_suffix('\r').unwrap_or(line);
            let _ = writeln!(out, "data: {line}");
        }
        if let Some(id) = &self.id {
            let _ = writeln!(out, "id: {id}");
        }
        out.push('\n');
        out
    }
}
