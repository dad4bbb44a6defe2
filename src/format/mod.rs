//! Formatter contract and the field policy shared by the concrete formatters.
//!
//! A formatter renders a populated [`Record`] into a caller-supplied buffer.
//! It writes straight into that buffer, never builds the final byte sequence
//! elsewhere, and keeps no reference to the record once `format` returns.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::io::Write;
use std::sync::Arc;

use crate::efficient_clock::Timestamp;
use crate::error::FormatError;
use crate::record::Record;
use crate::value::{ErrorValue, Value};

pub mod csv;
pub mod json;
pub mod text;

pub use self::csv::CsvFormatter;
pub use self::json::JsonFormatter;
pub use self::text::TextFormatter;

/// Default `chrono` pattern for timestamps: RFC 3339 in UTC with milliseconds.
pub const DEFAULT_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

/// Default replacement for sensitive field values.
pub const DEFAULT_MASK: &[u8] = b"***";

/// Renders a record into bytes.
pub trait Formatter: Send + Sync {
    /// Appends the rendering of `record` to `buf`.
    fn format(&self, buf: &mut Vec<u8>, record: &Record) -> Result<(), FormatError>;
}

impl<F: Formatter + ?Sized> Formatter for Arc<F> {
    fn format(&self, buf: &mut Vec<u8>, record: &Record) -> Result<(), FormatError> {
        (**self).format(buf, record)
    }
}

/// Rewrites the value of a named field before it is emitted.
pub type Transformer = Arc<dyn Fn(&Value) -> Value + Send + Sync>;

/// How a single field value should be emitted after the policy is applied.
#[derive(Debug)]
pub enum Rendered<'a> {
    Masked(&'a [u8]),
    Value(&'a Value),
    Transformed(Value),
}

/// Field masking, transformation and renaming rules applied by every formatter.
///
/// Masking wins over transformation: a sensitive field always renders as the
/// mask bytes regardless of its type or any transformer registered for it.
#[derive(Clone)]
pub struct FieldPolicy {
    sensitive: HashSet<String>,
    mask: Vec<u8>,
    transformers: HashMap<String, Transformer>,
    key_map: HashMap<String, String>,
}

impl Default for FieldPolicy {
    fn default() -> Self {
        Self {
            sensitive: HashSet::new(),
            mask: DEFAULT_MASK.to_vec(),
            transformers: HashMap::new(),
            key_map: HashMap::new(),
        }
    }
}

impl fmt::Debug for FieldPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldPolicy")
            .field("sensitive", &self.sensitive)
            .field("mask", &String::from_utf8_lossy(&self.mask))
            .field("transformers", &self.transformers.keys().collect::<Vec<_>>())
            .field("key_map", &self.key_map)
            .finish()
    }
}

impl FieldPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sensitive_fields<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sensitive.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn with_mask(mut self, mask: impl Into<Vec<u8>>) -> Self {
        self.mask = mask.into();
        self
    }

    pub fn with_transformer<F>(mut self, field: impl Into<String>, transform: F) -> Self
    where
        F: Fn(&Value) -> Value + Send + Sync + 'static,
    {
        self.transformers.insert(field.into(), Arc::new(transform));
        self
    }

    /// Emits field `from` under the name `to`.
    pub fn with_key_alias(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.key_map.insert(from.into(), to.into());
        self
    }

    pub fn is_sensitive(&self, name: &str) -> bool {
        self.sensitive.contains(name)
    }

    pub fn mask(&self) -> &[u8] {
        &self.mask
    }

    pub fn is_passthrough(&self) -> bool {
        self.sensitive.is_empty() && self.transformers.is_empty() && self.key_map.is_empty()
    }

    pub fn key<'a>(&'a self, name: &'a str) -> &'a str {
        self.key_map.get(name).map(String::as_str).unwrap_or(name)
    }

    pub fn render<'a>(&'a self, name: &str, value: &'a Value) -> Rendered<'a> {
        if self.is_sensitive(name) {
            Rendered::Masked(&self.mask)
        } else if let Some(transform) = self.transformers.get(name) {
            Rendered::Transformed(transform(value))
        } else {
            Rendered::Value(value)
        }
    }

    /// Bytes to emit for a context identifier such as `trace_id`.
    pub fn render_bytes<'a>(&'a self, name: &str, value: &'a [u8]) -> &'a [u8] {
        if self.is_sensitive(name) {
            &self.mask
        } else {
            value
        }
    }
}

pub(crate) fn write_timestamp(
    buf: &mut Vec<u8>,
    ts: Timestamp,
    pattern: &str,
) -> Result<(), FormatError> {
    let pattern = if pattern.is_empty() { DEFAULT_TIMESTAMP_FORMAT } else { pattern };
    write!(buf, "{}", ts.to_datetime().format(pattern))?;
    Ok(())
}

const HEX: &[u8; 16] = b"0123456789abcdef";

/// Emitted in place of each invalid UTF-8 sequence.
const REPLACEMENT: &[u8] = b"\\ufffd";

fn needs_escape(b: u8) -> bool {
    b == b'"' || b == b'\\' || b < 0x20
}

fn push_escape(buf: &mut Vec<u8>, b: u8) {
    match b {
        b'"' => buf.extend_from_slice(b"\\\""),
        b'\\' => buf.extend_from_slice(b"\\\\"),
        b'\n' => buf.extend_from_slice(b"\\n"),
        b'\r' => buf.extend_from_slice(b"\\r"),
        b'\t' => buf.extend_from_slice(b"\\t"),
        0x08 => buf.extend_from_slice(b"\\b"),
        0x0c => buf.extend_from_slice(b"\\f"),
        _ => {
            buf.extend_from_slice(b"\\u00");
            buf.push(HEX[(b >> 4) as usize]);
            buf.push(HEX[(b & 0xf) as usize]);
        }
    }
}

/// Appends `data` as the body of a JSON string, escaping as required.
///
/// Invalid UTF-8 sequences become `\ufffd`, so the output always parses.
pub(crate) fn escape_json(buf: &mut Vec<u8>, data: &[u8]) {
    for chunk in data.utf8_chunks() {
        let valid = chunk.valid().as_bytes();
        let mut start = 0;
        for (i, &b) in valid.iter().enumerate() {
            if needs_escape(b) {
                buf.extend_from_slice(&valid[start..i]);
                push_escape(buf, b);
                start = i + 1;
            }
        }
        buf.extend_from_slice(&valid[start..]);
        if !chunk.invalid().is_empty() {
            buf.extend_from_slice(REPLACEMENT);
        }
    }
}

/// Turns the raw text at `buf[start..]` into a quoted JSON string, reusing `buf`.
fn quote_json_tail(buf: &mut Vec<u8>, start: usize) {
    let end = buf.len();
    buf.push(b'"');
    let mut pos = start;
    while pos < end {
        let (valid_end, next) = match std::str::from_utf8(&buf[pos..end]) {
            Ok(_) => (end, end),
            Err(e) => {
                let valid_end = pos + e.valid_up_to();
                (valid_end, e.error_len().map_or(end, |n| valid_end + n))
            }
        };
        let mut run = pos;
        for i in pos..valid_end {
            let b = buf[i];
            if needs_escape(b) {
                buf.extend_from_within(run..i);
                push_escape(buf, b);
                run = i + 1;
            }
        }
        buf.extend_from_within(run..valid_end);
        if next > valid_end {
            buf.extend_from_slice(REPLACEMENT);
        }
        pos = next;
    }
    buf.push(b'"');

    let quoted = buf.len() - end;
    buf.copy_within(end.., start);
    buf.truncate(start + quoted);
}

pub(crate) fn write_json_error(buf: &mut Vec<u8>, err: &ErrorValue) {
    let start = buf.len();
    err.write_to(buf);
    quote_json_tail(buf, start);
}

pub(crate) fn write_json_string(buf: &mut Vec<u8>, data: &[u8]) {
    buf.push(b'"');
    escape_json(buf, data);
    buf.push(b'"');
}

pub(crate) fn write_json_value(buf: &mut Vec<u8>, value: &Value) -> Result<(), FormatError> {
    match value {
        Value::Str(_) | Value::StaticStr(_) | Value::Bytes(_) => {
            write_json_string(buf, value.as_bytes().unwrap_or_default());
        }
        Value::Int(v) => write!(buf, "{}", v)?,
        Value::Uint(v) => write!(buf, "{}", v)?,
        Value::Float(v) if v.is_finite() => write!(buf, "{}", v)?,
        Value::Float(_) | Value::Null => buf.extend_from_slice(b"null"),
        Value::Bool(true) => buf.extend_from_slice(b"true"),
        Value::Bool(false) => buf.extend_from_slice(b"false"),
        Value::Error(err) => write_json_error(buf, err),
    }
    Ok(())
}

pub(crate) fn write_json_rendered(buf: &mut Vec<u8>, rendered: &Rendered<'_>) -> Result<(), FormatError> {
    match rendered {
        Rendered::Masked(mask) => {
            write_json_string(buf, mask);
            Ok(())
        }
        Rendered::Value(value) => write_json_value(buf, value),
        Rendered::Transformed(value) => write_json_value(buf, value),
    }
}

/// Appends a value in its bare textual form, without quoting.
pub(crate) fn write_plain_value(buf: &mut Vec<u8>, value: &Value) -> Result<(), FormatError> {
    match value {
        Value::Str(_) | Value::StaticStr(_) | Value::Bytes(_) => {
            buf.extend_from_slice(value.as_bytes().unwrap_or_default());
        }
        Value::Int(v) => write!(buf, "{}", v)?,
        Value::Uint(v) => write!(buf, "{}", v)?,
        Value::Float(v) => write!(buf, "{}", v)?,
        Value::Bool(true) => buf.extend_from_slice(b"true"),
        Value::Bool(false) => buf.extend_from_slice(b"false"),
        Value::Null => buf.extend_from_slice(b"null"),
        Value::Error(err) => err.write_to(buf),
    }
    Ok(())
}

pub(crate) fn write_plain_rendered(buf: &mut Vec<u8>, rendered: &Rendered<'_>) -> Result<(), FormatError> {
    match rendered {
        Rendered::Masked(mask) => {
            buf.extend_from_slice(mask);
            Ok(())
        }
        Rendered::Value(value) => write_plain_value(buf, value),
        Rendered::Transformed(value) => write_plain_value(buf, value),
    }
}
