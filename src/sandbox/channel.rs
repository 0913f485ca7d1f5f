//! The result side-channel.
//!
//! A confined script returns data only by writing one JSON document to its
//! result file. Console output is never parsed for the answer; the file's
//! existence is the success signal.

use std::io::ErrorKind;
use std::path::Path;

use serde_json::{Map, Value};
use tokio::io::AsyncReadExt;

use crate::error::Result;

/// What was found at the result path after the process exited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelContents {
    /// No result file was written.
    Absent,
    /// Raw bytes of the result file.
    Present(Vec<u8>),
    /// The file is larger than the accepted limit; it was not read.
    Oversized {
        /// The limit that was exceeded, in bytes.
        limit: u64,
    },
}

/// Why a present result file could not be accepted as a mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The bytes are not a JSON document.
    Malformed(String),
    /// Valid JSON, but not an object.
    NotAnObject(&'static str),
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::Malformed(detail) => write!(f, "result is not valid JSON: {detail}"),
            DecodeError::NotAnObject(kind) => write!(f, "result must be a JSON object, got {kind}"),
        }
    }
}

/// Reader for the file-based result channel.
pub struct ResultChannel;

impl ResultChannel {
    /// Collect whatever the process left at `path`, reading at most
    /// `max_bytes`.
    pub async fn collect(path: &Path, max_bytes: u64) -> Result<ChannelContents> {
        let file = match tokio::fs::File::open(path).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(ChannelContents::Absent),
            Err(e) => return Err(e.into()),
        };

        let mut bytes = Vec::new();
        file.take(max_bytes.saturating_add(1))
            .read_to_end(&mut bytes)
            .await?;
        if bytes.len() as u64 > max_bytes {
            tracing::warn!(limit = max_bytes, "result file exceeds size limit");
            return Ok(ChannelContents::Oversized { limit: max_bytes });
        }
        Ok(ChannelContents::Present(bytes))
    }

    /// Decode channel bytes into the structured mapping.
    pub fn decode(bytes: &[u8]) -> std::result::Result<Map<String, Value>, DecodeError> {
        let value: Value =
            serde_json::from_slice(bytes).map_err(|e| DecodeError::Malformed(e.to_string()))?;
        match value {
            Value::Object(map) => Ok(map),
            other => Err(DecodeError::NotAnObject(json_kind(&other))),
        }
    }
}

/// Check for `\n` or `\r` in any string of `value`, keys included.
pub fn contains_line_break(value: &Value) -> bool {
    match value {
        Value::String(s) => has_break(s),
        Value::Array(items) => items.iter().any(contains_line_break),
        Value::Object(map) => mapping_contains_line_break(map),
        Value::Null | Value::Bool(_) | Value::Number(_) => false,
    }
}

/// [`contains_line_break`] for a decoded result mapping.
pub fn mapping_contains_line_break(map: &Map<String, Value>) -> bool {
    map.iter()
        .any(|(key, item)| has_break(key) || contains_line_break(item))
}

fn has_break(s: &str) -> bool {
    s.contains(['\n', '\r'])
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
