use std::sync::Arc;

use crate::error::BoxError;
use crate::format::Formatter;
use crate::level::Level;
use crate::record::Record;
use crate::writer::Writer;

/// Side-channel receiver of dispatched records.
///
/// Hooks run after the main writer, in registration order, with the same
/// record. A failing hook is reported to the error handler and never stops
/// the other hooks or the writer. Retries, batching and backoff are the
/// hook's own business.
pub trait Hook: Send + Sync {
    fn fire(&self, record: &Record) -> Result<(), BoxError>;

    /// Called once when the logger closes, after the last `fire`.
    fn close(&self) -> Result<(), BoxError> {
        Ok(())
    }

    /// Records below this filter are not passed to `fire`.
    fn accepts(&self, _level: Level) -> bool {
        true
    }

    /// Name used when reporting failures.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

impl<H: Hook + ?Sized> Hook for Arc<H> {
    fn fire(&self, record: &Record) -> Result<(), BoxError> {
        (**self).fire(record)
    }

    fn close(&self) -> Result<(), BoxError> {
        (**self).close()
    }

    fn accepts(&self, level: Level) -> bool {
        (**self).accepts(level)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Hook backed by a closure.
///
/// # Examples
///
/// ```
/// use pooled_logger::hook::{FnHook, Hook};
/// use pooled_logger::level::Level;
///
/// let hook = FnHook::new("alerts", |record| {
///     assert!(record.level >= Level::Error);
///     Ok(())
/// })
/// .min_level(Level::Error);
/// assert!(!hook.accepts(Level::Info));
/// ```
pub struct FnHook<F> {
    name: String,
    min_level: Level,
    f: F,
}

impl<F> FnHook<F>
where
    F: Fn(&Record) -> Result<(), BoxError> + Send + Sync,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            min_level: Level::Trace,
            f,
        }
    }

    pub fn min_level(mut self, level: Level) -> Self {
        self.min_level = level;
        self
    }
}

impl<F> Hook for FnHook<F>
where
    F: Fn(&Record) -> Result<(), BoxError> + Send + Sync,
{
    fn fire(&self, record: &Record) -> Result<(), BoxError> {
        (self.f)(record)
    }

    fn accepts(&self, level: Level) -> bool {
        level >= self.min_level
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Formats matching records into a second writer, such as a dedicated error file.
pub struct WriterHook {
    name: String,
    min_level: Level,
    formatter: Box<dyn Formatter>,
    writer: Box<dyn Writer>,
}

impl WriterHook {
    pub fn new<F, W>(min_level: Level, formatter: F, writer: W) -> Self
    where
        F: Formatter + 'static,
        W: Writer + 'static,
    {
        Self {
            name: format!("writer-hook[{}]", min_level),
            min_level,
            formatter: Box::new(formatter),
            writer: Box::new(writer),
        }
    }
}

impl Hook for WriterHook {
    fn fire(&self, record: &Record) -> Result<(), BoxError> {
        let mut buf = Vec::with_capacity(256);
        self.formatter.format(&mut buf, record)?;
        self.writer.write_all(&buf)?;
        Ok(())
    }

    fn close(&self) -> Result<(), BoxError> {
        self.writer.close()?;
        Ok(())
    }

    fn accepts(&self, level: Level) -> bool {
        level >= self.min_level
    }

    fn name(&self) -> &str {
        &self.name
    }
}
