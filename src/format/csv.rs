use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};

use super::{write_plain_rendered, write_plain_value, write_timestamp, FieldPolicy, Formatter, Rendered};
use crate::error::FormatError;
use crate::record::Record;
use crate::value::Value;

/// One comma-separated row per record, in a configurable column order.
///
/// Column names with special meaning: `timestamp`, `level`, `message`, `file`,
/// `line`, `caller`, `error`, `tags`, `stack_trace` and the context ids
/// (`trace_id`, `span_id`, `user_id`, `request_id`, `session_id`). Any other
/// name is looked up in the record's fields, then in its metrics; a missing
/// column is left empty. A record field shadows a context id of the same name.
///
/// Cells containing a comma, quote or line break are quoted as in RFC 4180.
#[derive(Debug)]
pub struct CsvFormatter {
    pub columns: Vec<String>,
    pub header: bool,
    pub timestamp_format: String,
    pub policy: FieldPolicy,
    header_written: AtomicBool,
}

impl Default for CsvFormatter {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_CSV_COLUMNS.iter().copied())
    }
}

impl CsvFormatter {
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            header: false,
            timestamp_format: String::new(),
            policy: FieldPolicy::default(),
            header_written: AtomicBool::new(false),
        }
    }

    /// Emits a header row before the first record.
    pub fn with_header(mut self, header: bool) -> Self {
        self.header = header;
        self
    }

    pub fn with_timestamp_format(mut self, pattern: impl Into<String>) -> Self {
        self.timestamp_format = pattern.into();
        self
    }

    pub fn with_policy(mut self, policy: FieldPolicy) -> Self {
        self.policy = policy;
        self
    }

    fn write_header(&self, buf: &mut Vec<u8>) {
        for (i, column) in self.columns.iter().enumerate() {
            if i > 0 {
                buf.push(b',');
            }
            let start = buf.len();
            buf.extend_from_slice(self.policy.key(column).as_bytes());
            quote_cell(buf, start);
        }
        buf.push(b'\n');
    }

    fn write_cell(&self, buf: &mut Vec<u8>, column: &str, record: &Record) -> Result<(), FormatError> {
        let policy = &self.policy;
        match column {
            "timestamp" => write_timestamp(buf, record.timestamp, &self.timestamp_format)?,
            "level" => buf.extend_from_slice(record.level.as_bytes()),
            "message" => buf.extend_from_slice(&record.message),
            "file" => {
                if let Some(caller) = record.caller {
                    buf.extend_from_slice(caller.file.as_bytes());
                }
            }
            "line" => {
                if let Some(caller) = record.caller {
                    write!(buf, "{}", caller.line)?;
                }
            }
            "caller" => {
                if let Some(caller) = record.caller {
                    write!(buf, "{}:{}", caller.file, caller.line)?;
                }
            }
            "error" => {
                if let Some(err) = &record.error {
                    err.write_to(buf);
                }
            }
            "tags" => {
                for (i, tag) in record.tags.iter().enumerate() {
                    if i > 0 {
                        buf.push(b';');
                    }
                    buf.extend_from_slice(tag.as_bytes());
                }
            }
            "stack_trace" => buf.extend_from_slice(&record.stack_trace),
            name => {
                if let Some(value) = record.fields.get(name) {
                    write_plain_rendered(buf, &policy.render(name, value))?;
                } else if let Some(id) = record.context.get(name) {
                    buf.extend_from_slice(policy.render_bytes(name, id));
                } else if let Some((_, metric)) = record.custom_metrics.iter().find(|(k, _)| k == name) {
                    write_plain_value(buf, &Value::Float(*metric))?;
                } else if policy.is_sensitive(name) {
                    write_plain_rendered(buf, &Rendered::Masked(policy.mask()))?;
                }
            }
        }
        Ok(())
    }
}

fn quote_cell(buf: &mut Vec<u8>, start: usize) {
    if !buf[start..].iter().any(|&b| matches!(b, b',' | b'"' | b'\n' | b'\r')) {
        return;
    }
    let raw = buf.split_off(start);
    buf.push(b'"');
    for b in raw {
        if b == b'"' {
            buf.push(b'"');
        }
        buf.push(b);
    }
    buf.push(b'"');
}

impl Formatter for CsvFormatter {
    fn format(&self, buf: &mut Vec<u8>, record: &Record) -> Result<(), FormatError> {
        if self.header && !self.header_written.swap(true, Ordering::AcqRel) {
            self.write_header(buf);
        }
        for (i, column) in self.columns.iter().enumerate() {
            if i > 0 {
                buf.push(b',');
            }
            let start = buf.len();
            self.write_cell(buf, column, record)?;
            quote_cell(buf, start);
        }
        buf.push(b'\n');
        Ok(())
    }
}
