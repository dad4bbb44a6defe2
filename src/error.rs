use std::io;
use std::time::Duration;

/// Boxed error returned by hooks and other pluggable collaborators.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Every failure the logging core can report.
///
/// Only configuration errors (and, for the `try_*` emission methods, capacity
/// and closed errors) ever reach the caller. Everything else is recovered at
/// the dispatcher boundary and routed to the configured error handler.
#[derive(thiserror::Error, Debug)]
pub enum LogError {
    #[error("invalid log level: {0}")]
    InvalidLevel(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("async log queue full")]
    QueueFull,

    #[error("timed out after {0:?} waiting for space in the async log queue")]
    QueueTimeout(Duration),

    #[error("record pool exhausted")]
    PoolExhausted,

    #[error("logger is closed")]
    Closed,

    #[error("write to log sink failed: {0}")]
    Write(#[source] io::Error),

    #[error(transparent)]
    Format(#[from] FormatError),

    #[error("hook `{name}` failed: {source}")]
    Hook {
        name: String,
        #[source]
        source: BoxError,
    },

    #[error("record processing exceeded {0:?}, task abandoned")]
    TaskTimeout(Duration),

    #[error("shutdown deadline elapsed, {pending} queued records dropped")]
    ShutdownTimeout { pending: usize },

    #[error("panic in {stage}: {message}")]
    Panicked { stage: &'static str, message: String },

    #[error("failed to spawn logger thread: {0}")]
    Spawn(#[source] io::Error),
}

impl LogError {
    /// True for the capacity conditions raised when the pipeline cannot keep up.
    pub fn is_backpressure(&self) -> bool {
        matches!(
            self,
            LogError::QueueFull | LogError::QueueTimeout(_) | LogError::PoolExhausted
        )
    }

    pub(crate) fn panicked(stage: &'static str, payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "<non-string panic payload>".to_string()
        };
        LogError::Panicked { stage, message }
    }
}

/// Error produced by a [`Formatter`](crate::format::Formatter).
#[derive(thiserror::Error, Debug)]
pub enum FormatError {
    #[error("format failed: {0}")]
    Io(#[from] io::Error),

    #[error("format failed: {0}")]
    Message(String),
}
