//! Formatting, writing and hook invocation for one record.
//!
//! The same [`Dispatcher`] serves the synchronous path (called on the emitting
//! thread) and the worker pool (called on a worker thread). Every stage runs
//! inside an unwind boundary, so a panicking formatter, writer or hook is
//! reported as [`LogError::Panicked`] instead of taking the caller down.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::config::ErrorHandler;
use crate::error::LogError;
use crate::format::Formatter;
use crate::hook::Hook;
use crate::pool::Pooled;
use crate::record::{Entry, Record};
use crate::writer::Writer;

/// Snapshot of a logger's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    /// Records that passed the gate and sampler and were handed to dispatch.
    pub emitted: u64,
    /// Records fully written to the main writer.
    pub written: u64,
    pub sampled_out: u64,
    /// Records released without being written: capacity errors, shutdown leftovers.
    pub dropped: u64,
    pub format_errors: u64,
    pub write_errors: u64,
    pub hook_errors: u64,
    pub task_timeouts: u64,
    /// Records currently waiting in the async queue.
    pub queued: usize,
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub(crate) emitted: AtomicU64,
    pub(crate) written: AtomicU64,
    pub(crate) sampled_out: AtomicU64,
    pub(crate) dropped: AtomicU64,
    pub(crate) format_errors: AtomicU64,
    pub(crate) write_errors: AtomicU64,
    pub(crate) hook_errors: AtomicU64,
    pub(crate) task_timeouts: AtomicU64,
}

impl Counters {
    #[inline]
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, queued: usize) -> Stats {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        Stats {
            emitted: load(&self.emitted),
            written: load(&self.written),
            sampled_out: load(&self.sampled_out),
            dropped: load(&self.dropped),
            format_errors: load(&self.format_errors),
            write_errors: load(&self.write_errors),
            hook_errors: load(&self.hook_errors),
            task_timeouts: load(&self.task_timeouts),
            queued,
        }
    }
}

/// Routes internal failures to the error handler, or to the error writer when none is set.
pub(crate) struct ErrorReporter {
    handler: Option<ErrorHandler>,
    sink: Arc<dyn Writer>,
}

impl ErrorReporter {
    pub(crate) fn new(handler: Option<ErrorHandler>, sink: Arc<dyn Writer>) -> Self {
        Self { handler, sink }
    }

    pub(crate) fn report(&self, err: &LogError) {
        tracing::debug!(error = %err, "log pipeline error");
        match &self.handler {
            Some(handler) => {
                if catch_unwind(AssertUnwindSafe(|| handler(err))).is_err() {
                    tracing::warn!("log error handler panicked");
                }
            }
            None => {
                let line = format!("log error: {}\n", err);
                if let Err(e) = self.sink.write_all(line.as_bytes()) {
                    tracing::warn!(error = %e, "failed to write to the error sink");
                }
            }
        }
    }
}

pub(crate) struct Dispatcher {
    formatter: Arc<dyn Formatter>,
    writer: Arc<dyn Writer>,
    hooks: Vec<Arc<dyn Hook>>,
    /// Serializes format + write. `None` when locking is disabled.
    lock: Option<Mutex<()>>,
    pub(crate) reporter: ErrorReporter,
    pub(crate) counters: Counters,
}

impl Dispatcher {
    pub(crate) fn new(
        formatter: Arc<dyn Formatter>,
        writer: Arc<dyn Writer>,
        hooks: Vec<Arc<dyn Hook>>,
        locking: bool,
        reporter: ErrorReporter,
    ) -> Self {
        Self {
            formatter,
            writer,
            hooks,
            lock: locking.then(|| Mutex::new(())),
            reporter,
            counters: Counters::default(),
        }
    }

    /// Formats and writes the entry, runs hooks, then releases the entry.
    pub(crate) fn dispatch(&self, mut entry: Pooled<Entry>) {
        let Entry { record, buffer } = &mut *entry;
        if let Err(err) = self.write_record(record, buffer) {
            self.reporter.report(&err);
        }
        self.run_hooks(record);
    }

    fn write_record(&self, record: &Record, buf: &mut Vec<u8>) -> Result<(), LogError> {
        buf.clear();
        let _guard = self.lock.as_ref().map(|lock| lock.lock());

        match catch_unwind(AssertUnwindSafe(|| self.formatter.format(buf, record))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                Counters::bump(&self.counters.format_errors);
                return Err(e.into());
            }
            Err(payload) => {
                Counters::bump(&self.counters.format_errors);
                return Err(LogError::panicked("formatter", payload));
            }
        }

        match catch_unwind(AssertUnwindSafe(|| self.writer.write_all(buf))) {
            Ok(Ok(())) => {
                Counters::bump(&self.counters.written);
                Ok(())
            }
            Ok(Err(e)) => {
                Counters::bump(&self.counters.write_errors);
                Err(LogError::Write(e))
            }
            Err(payload) => {
                Counters::bump(&self.counters.write_errors);
                Err(LogError::panicked("writer", payload))
            }
        }
    }

    fn run_hooks(&self, record: &Record) {
        for hook in &self.hooks {
            if !hook.accepts(record.level) {
                continue;
            }
            let err = match catch_unwind(AssertUnwindSafe(|| hook.fire(record))) {
                Ok(Ok(())) => continue,
                Ok(Err(source)) => LogError::Hook {
                    name: hook.name().to_string(),
                    source,
                },
                Err(payload) => LogError::panicked("hook", payload),
            };
            Counters::bump(&self.counters.hook_errors);
            self.reporter.report(&err);
        }
    }

    pub(crate) fn flush(&self) -> Result<(), LogError> {
        let _guard = self.lock.as_ref().map(|lock| lock.lock());
        self.writer.flush().map_err(LogError::Write)
    }

    /// Closes the writer and every hook. Failures are reported, not returned.
    ///
    /// Waits at most `wait` for an in-flight write to finish; past that the
    /// writer is left open.
    pub(crate) fn close(&self, wait: Duration) {
        let closed = match &self.lock {
            None => Some(self.writer.close()),
            Some(lock) => lock.try_lock_for(wait).map(|_guard| self.writer.close()),
        };
        match closed {
            Some(Ok(())) => {}
            Some(Err(e)) => self.reporter.report(&LogError::Write(e)),
            None => tracing::warn!(?wait, "log writer busy at close, leaving it open"),
        }
        for hook in &self.hooks {
            if let Err(source) = hook.close() {
                self.reporter.report(&LogError::Hook {
                    name: hook.name().to_string(),
                    source,
                });
            }
        }
    }
}
