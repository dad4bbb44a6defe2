use crate::efficient_clock::Timestamp;
use crate::level::Level;
use crate::pool::Reusable;
use crate::value::{ErrorValue, FieldKey, Fields};

/// Buffers that grew beyond this many bytes are shrunk back on release.
pub const MAX_RETAINED_BUFFER: usize = 64 * 1024;

/// Source location of the emitting call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller {
    pub file: &'static str,
    pub line: u32,
}

/// Request-scoped identifiers copied from an [`ExecutionContext`](crate::context::ExecutionContext).
///
/// An empty buffer means the identifier is absent.
#[derive(Debug, Default)]
pub struct TraceContext {
    pub trace_id: Vec<u8>,
    pub span_id: Vec<u8>,
    pub user_id: Vec<u8>,
    pub request_id: Vec<u8>,
    pub session_id: Vec<u8>,
}

impl TraceContext {
    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }

    /// Present identifiers as `(name, value)` pairs in a fixed order.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &[u8])> {
        [
            ("trace_id", &self.trace_id),
            ("span_id", &self.span_id),
            ("user_id", &self.user_id),
            ("request_id", &self.request_id),
            ("session_id", &self.session_id),
        ]
        .into_iter()
        .filter(|(_, v)| !v.is_empty())
        .map(|(k, v)| (k, v.as_slice()))
    }

    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.iter().find(|(k, _)| *k == name).map(|(_, v)| v)
    }

    fn clear(&mut self) {
        for id in [
            &mut self.trace_id,
            &mut self.span_id,
            &mut self.user_id,
            &mut self.request_id,
            &mut self.session_id,
        ] {
            id.fill(0);
            id.clear();
        }
    }
}

/// One log event.
///
/// Records live inside pooled [`Entry`] slots and are reused: every collection
/// is cleared rather than deallocated when the slot goes back to the pool.
#[derive(Debug, Default)]
pub struct Record {
    pub timestamp: Timestamp,
    pub level: Level,
    pub message: Vec<u8>,
    pub fields: Fields,
    pub tags: Vec<FieldKey>,
    pub context: TraceContext,
    pub caller: Option<Caller>,
    pub stack_trace: Vec<u8>,
    pub custom_metrics: Vec<(FieldKey, f64)>,
    pub error: Option<ErrorValue>,
}

impl Record {
    pub fn message_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.message)
    }

    pub fn set_metric(&mut self, name: impl Into<FieldKey>, value: f64) {
        let name = name.into();
        match self.custom_metrics.iter_mut().find(|(k, _)| *k == name) {
            Some(slot) => slot.1 = value,
            None => self.custom_metrics.push((name, value)),
        }
    }

    pub fn has_stack_trace(&self) -> bool {
        !self.stack_trace.is_empty()
    }

    /// Returns the record to its empty state, zeroing byte payloads first.
    pub fn clear(&mut self) {
        self.timestamp = Timestamp::ZERO;
        self.level = Level::default();
        scrub(&mut self.message);
        self.fields.clear();
        self.tags.clear();
        self.context.clear();
        self.caller = None;
        scrub(&mut self.stack_trace);
        self.custom_metrics.clear();
        self.error = None;
    }

    pub fn is_clear(&self) -> bool {
        self.message.is_empty()
            && self.fields.is_empty()
            && self.tags.is_empty()
            && self.context.is_empty()
            && self.caller.is_none()
            && self.stack_trace.is_empty()
            && self.custom_metrics.is_empty()
            && self.error.is_none()
    }
}

/// Pooled slot: a record plus the buffer it is formatted into.
#[derive(Debug, Default)]
pub struct Entry {
    pub record: Record,
    pub buffer: Vec<u8>,
}

impl Reusable for Entry {
    fn reset(&mut self) {
        self.record.clear();
        scrub(&mut self.buffer);
    }
}

fn scrub(buf: &mut Vec<u8>) {
    buf.fill(0);
    buf.clear();
    if buf.capacity() > MAX_RETAINED_BUFFER {
        buf.shrink_to(MAX_RETAINED_BUFFER);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[test]
    fn test_clear_resets_everything() {
        let mut record = Record {
            level: Level::Error,
            message: b"secret token".to_vec(),
            caller: Some(Caller { file: "main.rs", line: 7 }),
            ..Record::default()
        };
        record.fields.insert("k", Value::from(1));
        record.tags.push("auth".into());
        record.context.trace_id.extend_from_slice(b"trace-1");
        record.set_metric("latency_ms", 3.5);

        record.clear();
        assert!(record.is_clear());
        assert_eq!(record.level, Level::Info);
    }

    #[test]
    fn test_oversized_buffers_are_shrunk() {
        let mut entry = Entry::default();
        entry.buffer.resize(MAX_RETAINED_BUFFER * 4, b'x');
        entry.reset();
        assert!(entry.buffer.is_empty());
        assert!(entry.buffer.capacity() < MAX_RETAINED_BUFFER * 4);
    }

    #[test]
    fn test_trace_context_iteration() {
        let mut ctx = TraceContext::default();
        assert!(ctx.is_empty());
        ctx.user_id.extend_from_slice(b"u-1");
        ctx.trace_id.extend_from_slice(b"t-1");

        let ids: Vec<_> = ctx.iter().collect();
        assert_eq!(ids, vec![("trace_id", &b"t-1"[..]), ("user_id", &b"u-1"[..])]);
        assert_eq!(ctx.get("user_id"), Some(&b"u-1"[..]));
    }

    #[test]
    fn test_set_metric_overwrites() {
        let mut record = Record::default();
        record.set_metric("bytes", 1.0);
        record.set_metric("bytes", 2.0);
        assert_eq!(record.custom_metrics.len(), 1);
        assert_eq!(record.custom_metrics[0].1, 2.0);
    }
}
