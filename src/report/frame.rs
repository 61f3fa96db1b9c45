// src/report/frame.rs

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Tag of the end-of-stream sentinel.
pub const EOF_TAG: &str = "eof";
/// Tag of log line reports.
pub const LOG_TAG: &str = "logs";
/// Every tag starting with this prefix is an error report.
pub const ERROR_TAG: &str = "error";

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("envelope is not a JSON object")]
    NotAnObject,

    #[error("envelope has no string `type` field")]
    MissingType,
}

/// One decoded protocol message: its type tag plus the raw envelope text.
///
/// The payload stays as text until a callback asks for a concrete shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Frame {
    #[serde(rename = "type")]
    pub tag: String,
    #[serde(rename = "json")]
    pub raw_payload: String,
}

impl Frame {
    /// Parse a candidate envelope.
    ///
    /// Only JSON objects with a string `type` are frames.
    pub fn parse(candidate: &str) -> Result<Self, DecodeError> {
        let candidate = candidate.trim();
        let value: Value = serde_json::from_str(candidate)?;
        let Value::Object(map) = value else {
            return Err(DecodeError::NotAnObject);
        };
        let tag = map
            .get("type")
            .and_then(Value::as_str)
            .ok_or(DecodeError::MissingType)?;

        Ok(Self {
            tag: tag.to_string(),
            raw_payload: candidate.to_string(),
        })
    }

    pub fn is_eof(&self) -> bool {
        self.tag == EOF_TAG
    }

    pub fn is_log(&self) -> bool {
        self.tag == LOG_TAG
    }

    pub fn is_error(&self) -> bool {
        is_error_tag(&self.tag)
    }

    /// Deserialize the payload into `T`.
    ///
    /// Producers either nest the payload under `data` or spread it over the
    /// envelope's top level; both are accepted. `type` and `ts` never reach
    /// `T` in the second form, and an envelope with no payload at all reads
    /// as `{}`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<ReportDataPoint<T>, DecodeError> {
        let value: Value = serde_json::from_str(&self.raw_payload)?;
        let Value::Object(mut map) = value else {
            return Err(DecodeError::NotAnObject);
        };
        map.remove("type");
        let ts = map.remove("ts").and_then(|ts| ts.as_i64());

        let payload = match map.remove("data") {
            Some(data) if !data.is_null() => data,
            _ => Value::Object(map),
        };
        let data = serde_json::from_value(payload)?;

        Ok(ReportDataPoint {
            tag: self.tag.clone(),
            data,
            ts,
        })
    }
}

pub fn is_error_tag(tag: &str) -> bool {
    tag.starts_with(ERROR_TAG)
}

/// A frame decoded against a caller-declared payload shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportDataPoint<T> {
    #[serde(rename = "type")]
    pub tag: String,
    pub data: T,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ts: Option<i64>,
}

pub type ErrorReport = ReportDataPoint<ErrorOutput>;

/// Payload of an `error*` report.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorOutput {
    #[serde(default)]
    pub message: String,
    /// Producers use both numeric and string codes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_type_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,
}

impl ErrorOutput {
    pub fn code_str(&self) -> Option<String> {
        match self.code.as_ref()? {
            Value::String(code) => Some(code.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }
}

/// Payload of the end-of-stream sentinel. Carries nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EofOutput {}

/// Payload of a `logs` report.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogMessage {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub log_level: String,
    #[serde(default)]
    pub timestamp: Option<i64>,
}

impl LogMessage {
    pub fn new(level: impl Into<String>, message: impl Into<String>, timestamp: Option<i64>) -> Self {
        Self {
            message: message.into(),
            log_level: level.into(),
            timestamp,
        }
    }
}

/// Build a `{"type": tag, "data": ...}` envelope.
pub fn envelope(tag: &str, data: Value) -> Value {
    let mut map = Map::new();
    map.insert("type".to_string(), Value::String(tag.to_string()));
    map.insert("data".to_string(), data);
    Value::Object(map)
}
