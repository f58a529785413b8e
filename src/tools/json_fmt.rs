#![forbid(unsafe_code)]

use serde::Serialize as _;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatOptions {
    /// Spaces per level. 0 produces compact output.
    pub indent: usize,
    pub sort_keys: bool,
}

impl Default for FormatOptions {
    fn default() -> Self {
        Self {
            indent: 2,
            sort_keys: false,
        }
    }
}

#[derive(Debug, Error)]
pub enum JsonFormatError {
    #[error("invalid JSON at line {line}, column {column}: {message}")]
    Parse {
        line: usize,
        column: usize,
        message: String,
    },

    #[error("input is empty")]
    Empty,

    #[error("failed to write JSON: {0}")]
    Write(String),
}

pub fn format(input: &str, opts: FormatOptions) -> Result<String, JsonFormatError> {
    if input.trim().is_empty() {
        return Err(JsonFormatError::Empty);
    }

    let mut value: Value = serde_json::from_str(input).map_err(|e| JsonFormatError::Parse {
        line: e.line(),
        column: e.column(),
        message: strip_position(&e.to_string()),
    })?;

    if opts.sort_keys {
        value = sort_keys(value);
    }

    if opts.indent == 0 {
        return serde_json::to_string(&value).map_err(|e| JsonFormatError::Write(e.to_string()));
    }

    let indent = " ".repeat(opts.indent);
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(indent.as_bytes());
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    value
        .serialize(&mut ser)
        .map_err(|e| JsonFormatError::Write(e.to_string()))?;
    String::from_utf8(buf).map_err(|e| JsonFormatError::Write(e.to_string()))
}

fn sort_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, sort_keys(v)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sort_keys).collect()),
        other => other,
    }
}

// serde_json appends " at line X column Y"; we report those separately.
fn strip_position(msg: &str) -> String {
    match msg.rfind(" at line ") {
        Some(idx) => msg[..idx].to_owned(),
        None => msg.to_owned(),
    }
}
