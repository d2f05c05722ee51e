//! Message translation: raw client frames into query requests.

use crate::response::ResponseKind;
use serde_json::{Map, Number, Value};
use thiserror::Error;

/// The one parameter that is converted to the database's native integer.
pub const INTEGER_PARAM: &str = "qParam";

/// Errors turning a client frame into a [`QueryRequest`].
#[derive(Error, Debug)]
pub enum TranslateError {
    #[error("invalid JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("malformed request: {0}")]
    Malformed(String),
}

impl TranslateError {
    /// Stable code reported to the client.
    pub fn code(&self) -> &'static str {
        match self {
            TranslateError::Parse(_) => "ParseError",
            TranslateError::Malformed(_) => "MalformedRequest",
        }
    }
}

/// A parsed client message: one Cypher query plus its parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    /// Cypher text, never empty.
    pub message: String,
    pub params: Map<String, Value>,
    pub kind: ResponseKind,
}

/// Parses a raw text frame into a [`QueryRequest`].
///
/// Expects `{ "message": string, "params"?: object, "type": string }`.
/// A numeric `params.qParam` is coerced with [`coerce_integer`]; every
/// other parameter is passed through untouched.
pub fn translate(raw: &str) -> Result<QueryRequest, TranslateError> {
    let value: Value = serde_json::from_str(raw)?;

    let Value::Object(mut obj) = value else {
        return Err(malformed("request must be a JSON object"));
    };

    let message = match obj.remove("message") {
        Some(Value::String(text)) if !text.trim().is_empty() => text,
        Some(Value::String(_)) => return Err(malformed("`message` must not be empty")),
        Some(_) => return Err(malformed("`message` must be a string")),
        None => return Err(malformed("missing `message`")),
    };

    let kind = match obj.remove("type") {
        Some(Value::String(kind)) => ResponseKind::from(kind),
        Some(_) => return Err(malformed("`type` must be a string")),
        None => return Err(malformed("missing `type`")),
    };

    let mut params = match obj.remove("params") {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(params)) => params,
        Some(_) => return Err(malformed("`params` must be an object")),
    };

    if let Some(Value::Number(n)) = params.get(INTEGER_PARAM) {
        let coerced = coerce_integer(n);
        params.insert(INTEGER_PARAM.to_string(), Value::from(coerced));
    }

    Ok(QueryRequest {
        message,
        params,
        kind,
    })
}

/// Converts a JSON number to a 64-bit signed integer.
///
/// Integers in range are kept as is. Fractions truncate toward zero and
/// out-of-range values saturate at the `i64` bounds.
pub fn coerce_integer(n: &Number) -> i64 {
    if let Some(i) = n.as_i64() {
        i
    } else if let Some(u) = n.as_u64() {
        i64::try_from(u).unwrap_or(i64::MAX)
    } else {
        n.as_f64().map(|f| f as i64).unwrap_or_default()
    }
}

fn malformed(reason: &str) -> TranslateError {
    TranslateError::Malformed(reason.to_string())
}
