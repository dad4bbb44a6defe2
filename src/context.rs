use std::sync::Arc;

use crate::record::TraceContext;
use crate::value::{FieldKey, Fields, Value};

/// Request-scoped data passed to context-aware emission calls.
///
/// The identifiers are copied into the record's trace context. Everything
/// else reaches the record through the logger's [`ContextExtractor`].
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    pub trace_id: Option<Arc<str>>,
    pub span_id: Option<Arc<str>>,
    pub user_id: Option<Arc<str>>,
    pub request_id: Option<Arc<str>>,
    pub session_id: Option<Arc<str>>,
    pub values: Fields,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_trace_id(mut self, id: impl Into<Arc<str>>) -> Self {
        self.trace_id = Some(id.into());
        self
    }

    pub fn with_span_id(mut self, id: impl Into<Arc<str>>) -> Self {
        self.span_id = Some(id.into());
        self
    }

    pub fn with_user_id(mut self, id: impl Into<Arc<str>>) -> Self {
        self.user_id = Some(id.into());
        self
    }

    pub fn with_request_id(mut self, id: impl Into<Arc<str>>) -> Self {
        self.request_id = Some(id.into());
        self
    }

    pub fn with_session_id(mut self, id: impl Into<Arc<str>>) -> Self {
        self.session_id = Some(id.into());
        self
    }

    pub fn with_value(mut self, key: impl Into<FieldKey>, value: impl Into<Value>) -> Self {
        self.values.insert(key, value);
        self
    }

    /// Copies the identifiers into a record's (empty) trace context.
    pub(crate) fn copy_ids(&self, trace: &mut TraceContext) {
        let pairs = [
            (&self.trace_id, &mut trace.trace_id),
            (&self.span_id, &mut trace.span_id),
            (&self.user_id, &mut trace.user_id),
            (&self.request_id, &mut trace.request_id),
            (&self.session_id, &mut trace.session_id),
        ];
        for (src, dst) in pairs {
            if let Some(id) = src {
                dst.extend_from_slice(id.as_bytes());
            }
        }
    }
}

/// Maps an execution context to extra record fields.
///
/// Runs on the emitting thread and must not block.
pub trait ContextExtractor: Send + Sync {
    fn extract(&self, ctx: &ExecutionContext, fields: &mut Fields);
}

impl<F> ContextExtractor for F
where
    F: Fn(&ExecutionContext, &mut Fields) + Send + Sync,
{
    fn extract(&self, ctx: &ExecutionContext, fields: &mut Fields) {
        self(ctx, fields)
    }
}

/// Copies the context's free-form values into the record fields.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultExtractor;

impl ContextExtractor for DefaultExtractor {
    fn extract(&self, ctx: &ExecutionContext, fields: &mut Fields) {
        fields.merge(&ctx.values);
    }
}
