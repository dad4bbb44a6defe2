use std::io::Write;

use super::{
    escape_json, write_json_error, write_json_rendered, write_json_string, write_json_value,
    write_timestamp, FieldPolicy, Formatter,
};
use crate::error::FormatError;
use crate::record::Record;
use crate::value::Value;

/// One JSON object per record, terminated by a newline.
///
/// Layout (compact):
///
/// ```text
/// {"timestamp":"…","level_name":"INFO","message":"…","caller":"src/main.rs:10",
///  "fields":{…},"tags":[…],"metrics":{…},"trace_id":"…","error":"…","stack_trace":"…"}
/// ```
///
/// Optional members are omitted when empty.
///
/// # Examples
///
/// ```
/// use pooled_logger::format::{Formatter, JsonFormatter};
/// use pooled_logger::record::Record;
///
/// let mut record = Record::default();
/// record.message.extend_from_slice(b"user logged in");
/// record.fields.insert("user_id", 123);
///
/// let mut buf = Vec::new();
/// JsonFormatter::new().format(&mut buf, &record).unwrap();
/// let line = String::from_utf8(buf).unwrap();
/// assert!(line.contains(r#""user_id":123"#));
/// ```
#[derive(Debug, Clone)]
pub struct JsonFormatter {
    pub pretty: bool,
    pub timestamp_format: String,
    pub show_caller: bool,
    pub show_context: bool,
    pub show_stack_trace: bool,
    pub policy: FieldPolicy,
}

impl Default for JsonFormatter {
    fn default() -> Self {
        Self {
            pretty: false,
            timestamp_format: String::new(),
            show_caller: true,
            show_context: true,
            show_stack_trace: true,
            policy: FieldPolicy::default(),
        }
    }
}

impl JsonFormatter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Two-space indented output, one member per line.
    pub fn pretty() -> Self {
        Self {
            pretty: true,
            ..Self::default()
        }
    }

    pub fn with_timestamp_format(mut self, pattern: impl Into<String>) -> Self {
        self.timestamp_format = pattern.into();
        self
    }

    pub fn with_caller(mut self, show: bool) -> Self {
        self.show_caller = show;
        self
    }

    pub fn with_context(mut self, show: bool) -> Self {
        self.show_context = show;
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
}

/// Tracks separators and indentation while an object is being written.
struct ObjectWriter<'b> {
    buf: &'b mut Vec<u8>,
    pretty: bool,
    depth: usize,
    first: bool,
}

impl<'b> ObjectWriter<'b> {
    fn open(buf: &'b mut Vec<u8>, pretty: bool) -> Self {
        buf.push(b'{');
        Self {
            buf,
            pretty,
            depth: 1,
            first: true,
        }
    }

    fn newline(&mut self) {
        if self.pretty {
            self.buf.push(b'\n');
            for _ in 0..self.depth {
                self.buf.extend_from_slice(b"  ");
            }
        }
    }

    fn key(&mut self, key: &str) -> &mut Vec<u8> {
        if !self.first {
            self.buf.push(b',');
        }
        self.first = false;
        self.newline();
        write_json_string(self.buf, key.as_bytes());
        self.buf.push(b':');
        if self.pretty {
            self.buf.push(b' ');
        }
        &mut *self.buf
    }

    fn begin_object(&mut self, key: &str) {
        self.key(key).push(b'{');
        self.depth += 1;
        self.first = true;
    }

    fn end_object(&mut self) {
        self.depth -= 1;
        self.newline();
        self.buf.push(b'}');
        self.first = false;
    }

    fn close(mut self) {
        self.depth = 0;
        self.newline();
        self.buf.extend_from_slice(b"}\n");
    }
}

impl Formatter for JsonFormatter {
    fn format(&self, buf: &mut Vec<u8>, record: &Record) -> Result<(), FormatError> {
        let policy = &self.policy;
        let mut obj = ObjectWriter::open(buf, self.pretty);

        let out = obj.key("timestamp");
        out.push(b'"');
        write_timestamp(out, record.timestamp, &self.timestamp_format)?;
        out.push(b'"');

        write_json_string(obj.key("level_name"), record.level.as_bytes());
        write_json_string(obj.key("message"), &record.message);

        if self.show_caller {
            if let Some(caller) = record.caller {
                let out = obj.key("caller");
                out.push(b'"');
                escape_json(out, caller.file.as_bytes());
                write!(out, ":{}\"", caller.line)?;
            }
        }

        if !record.fields.is_empty() {
            obj.begin_object("fields");
            for (name, value) in record.fields.iter() {
                let rendered = policy.render(name, value);
                write_json_rendered(obj.key(policy.key(name)), &rendered)?;
            }
            obj.end_object();
        }

        if !record.tags.is_empty() {
            let out = obj.key("tags");
            out.push(b'[');
            for (i, tag) in record.tags.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_json_string(out, tag.as_bytes());
            }
            out.push(b']');
        }

        if !record.custom_metrics.is_empty() {
            obj.begin_object("metrics");
            for (name, value) in &record.custom_metrics {
                write_json_value(obj.key(name), &Value::Float(*value))?;
            }
            obj.end_object();
        }

        if self.show_context {
            for (name, id) in record.context.iter() {
                write_json_string(obj.key(policy.key(name)), policy.render_bytes(name, id));
            }
        }

        if let Some(err) = &record.error {
            write_json_error(obj.key("error"), err);
        }

        if self.show_stack_trace && record.has_stack_trace() {
            write_json_string(obj.key("stack_trace"), &record.stack_trace);
        }

        obj.close();
        Ok(())
    }
}
