//! Response shaping: records and outcomes into wire frames.

use crate::record::Record;
use crate::request::TranslateError;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use thiserror::Error;

/// How the results of a request are shaped, taken from its `type` field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseKind {
    /// `{ display, value }` projection of the first two columns.
    CompoundSearch,
    /// Same projection as [`ResponseKind::CompoundSearch`].
    TargetSearch,
    /// Records pass through; completion is reported as `counts`.
    Counts,
    /// Records pass through; completion is reported as `done`.
    Passthrough(String),
}

impl ResponseKind {
    pub fn as_str(&self) -> &str {
        match self {
            ResponseKind::CompoundSearch => "compoundSearch",
            ResponseKind::TargetSearch => "targetSearch",
            ResponseKind::Counts => "counts",
            ResponseKind::Passthrough(kind) => kind,
        }
    }

    /// Whether records are projected to `{ display, value }`.
    pub fn is_projection(&self) -> bool {
        matches!(
            self,
            ResponseKind::CompoundSearch | ResponseKind::TargetSearch
        )
    }
}

impl From<String> for ResponseKind {
    fn from(kind: String) -> Self {
        match kind.as_str() {
            "compoundSearch" => ResponseKind::CompoundSearch,
            "targetSearch" => ResponseKind::TargetSearch,
            "counts" => ResponseKind::Counts,
            _ => ResponseKind::Passthrough(kind),
        }
    }
}

impl From<&str> for ResponseKind {
    fn from(kind: &str) -> Self {
        ResponseKind::from(kind.to_string())
    }
}

impl fmt::Display for ResponseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A record that cannot be projected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ShapeError {
    #[error("{kind} results need at least 2 fields, record has {found}")]
    MissingFields { kind: String, found: usize },
}

impl ShapeError {
    pub fn code(&self) -> &'static str {
        "ShapeError"
    }
}

/// Error payload of an `error` frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

impl From<&TranslateError> for ErrorInfo {
    fn from(err: &TranslateError) -> Self {
        ErrorInfo::new(err.code(), err.to_string())
    }
}

impl From<&ShapeError> for ErrorInfo {
    fn from(err: &ShapeError) -> Self {
        ErrorInfo::new(err.code(), err.to_string())
    }
}

/// A JSON frame sent from the bridge to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireResponse {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

impl WireResponse {
    /// A data frame tagged with the request's type.
    pub fn data(kind: &ResponseKind, data: Value) -> Self {
        Self {
            kind: kind.as_str().to_string(),
            data: Some(data),
            error: None,
        }
    }

    /// The terminal frame after the last record of a request.
    pub fn completion(kind: &ResponseKind) -> Self {
        let tag = match kind {
            ResponseKind::Counts => "counts",
            _ => "done",
        };
        Self {
            kind: tag.to_string(),
            data: None,
            error: None,
        }
    }

    pub fn error(error: ErrorInfo) -> Self {
        Self {
            kind: "error".to_string(),
            data: None,
            error: Some(error),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Whether this frame ends a request's stream.
    pub fn is_terminal(&self) -> bool {
        self.is_error() || (self.data.is_none() && matches!(self.kind.as_str(), "done" | "counts"))
    }
}

/// Shapes one record according to the request's kind.
pub fn shape(kind: &ResponseKind, record: Record) -> Result<Value, ShapeError> {
    if !kind.is_projection() {
        return Ok(record.to_value());
    }

    let found = record.len();
    let mut fields = record.into_fields().into_iter();
    match (fields.next(), fields.next()) {
        (Some(display), Some(value)) => Ok(json!({ "display": display, "value": value })),
        _ => Err(ShapeError::MissingFields {
            kind: kind.as_str().to_string(),
            found,
        }),
    }
}
