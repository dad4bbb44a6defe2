use std::io::Write;

use super::{write_plain_rendered, write_plain_value, write_timestamp, FieldPolicy, Formatter, Rendered};
use crate::error::FormatError;
use crate::level::Level;
use crate::record::Record;
use crate::value::Value;

const RESET: &[u8] = b"\x1b[0m";

fn level_color(level: Level) -> &'static [u8] {
    match level {
        Level::Trace => b"\x1b[90m",
        Level::Debug => b"\x1b[36m",
        Level::Info => b"\x1b[32m",
        Level::Notice => b"\x1b[34m",
        Level::Warn => b"\x1b[33m",
        Level::Error => b"\x1b[31m",
        Level::Fatal | Level::Panic => b"\x1b[1;31m",
    }
}

/// Human-readable single-line output:
///
/// ```text
/// 2024-05-01T12:00:00.000Z INFO   src/main.rs:10 user logged in user_id=123 action=login
/// ```
///
/// Values containing spaces, quotes or `=` are double-quoted. A stack trace,
/// when present, follows on its own lines.
#[derive(Debug, Clone)]
pub struct TextFormatter {
    pub colors: bool,
    pub show_timestamp: bool,
    pub timestamp_format: String,
    pub show_caller: bool,
    pub show_stack_trace: bool,
    pub policy: FieldPolicy,
}

impl Default for TextFormatter {
    fn default() -> Self {
        Self {
            colors: false,
            show_timestamp: true,
            timestamp_format: String::new(),
            show_caller: true,
            show_stack_trace: true,
            policy: FieldPolicy::default(),
        }
    }
}

impl TextFormatter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_colors(mut self, colors: bool) -> Self {
        self.colors = colors;
        self
    }

    pub fn with_timestamp(mut self, show: bool) -> Self {
        self.show_timestamp = show;
        self
    }

    pub fn with_timestamp_format(mut self, pattern: impl Into<String>) -> Self {
        self.timestamp_format = pattern.into();
        self
    }

    pub fn with_caller(mut self, show: bool) -> Self {
        self.show_caller = show;
        self
    }

    pub fn with_stack_trace(mut self, show: bool) -> Self {
        self.show_stack_trace = show;
        self
    }

    pub fn with_policy(mut self, policy: FieldPolicy) -> Self {
        self.policy = policy;
        self
    }

    fn write_pair(&self, buf: &mut Vec<u8>, key: &str, rendered: &Rendered<'_>) -> Result<(), FormatError> {
        buf.push(b' ');
        buf.extend_from_slice(key.as_bytes());
        buf.push(b'=');
        let start = buf.len();
        write_plain_rendered(buf, rendered)?;
        quote_if_needed(buf, start);
        Ok(())
    }
}

/// Re-quotes `buf[start..]` in place when it would be ambiguous unquoted.
fn quote_if_needed(buf: &mut Vec<u8>, start: usize) {
    let needs_quotes = buf[start..].is_empty()
        || buf[start..]
            .iter()
            .any(|&b| b == b' ' || b == b'"' || b == b'=' || b == b'\n' || b == b'\t');
    if !needs_quotes {
        return;
    }
    let raw = buf.split_off(start);
    buf.push(b'"');
    for b in raw {
        match b {
            b'"' => buf.extend_from_slice(b"\\\""),
            b'\\' => buf.extend_from_slice(b"\\\\"),
            b'\n' => buf.extend_from_slice(b"\\n"),
            b'\t' => buf.extend_from_slice(b"\\t"),
            _ => buf.push(b),
        }
    }
    buf.push(b'"');
}

impl Formatter for TextFormatter {
    fn format(&self, buf: &mut Vec<u8>, record: &Record) -> Result<(), FormatError> {
        let policy = &self.policy;

        if self.show_timestamp {
            write_timestamp(buf, record.timestamp, &self.timestamp_format)?;
            buf.push(b' ');
        }

        if self.colors {
            buf.extend_from_slice(level_color(record.level));
        }
        write!(buf, "{:<6}", record.level.as_str())?;
        if self.colors {
            buf.extend_from_slice(RESET);
        }

        if self.show_caller {
            if let Some(caller) = record.caller {
                write!(buf, " {}:{}", caller.file, caller.line)?;
            }
        }

        buf.push(b' ');
        buf.extend_from_slice(&record.message);

        for (name, value) in record.fields.iter() {
            self.write_pair(buf, policy.key(name), &policy.render(name, value))?;
        }

        if !record.tags.is_empty() {
            buf.extend_from_slice(b" tags=[");
            for (i, tag) in record.tags.iter().enumerate() {
                if i > 0 {
                    buf.push(b',');
                }
                buf.extend_from_slice(tag.as_bytes());
            }
            buf.push(b']');
        }

        for (name, value) in &record.custom_metrics {
            self.write_pair(buf, name, &Rendered::Transformed(Value::Float(*value)))?;
        }

        for (name, id) in record.context.iter() {
            self.write_pair(buf, policy.key(name), &Rendered::Masked(policy.render_bytes(name, id)))?;
        }

        if let Some(err) = &record.error {
            buf.extend_from_slice(b" error=");
            let start = buf.len();
            write_plain_value(buf, &Value::Error(err.clone()))?;
            quote_if_needed(buf, start);
        }

        buf.push(b'\n');

        if self.show_stack_trace && record.has_stack_trace() {
            buf.extend_from_slice(&record.stack_trace);
            if !record.stack_trace.ends_with(b"\n") {
                buf.push(b'\n');
            }
        }
        Ok(())
    }
}
