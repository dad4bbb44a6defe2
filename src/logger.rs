use std::backtrace::Backtrace;
use std::fmt;
use std::io::{self, Write};
use std::panic::Location;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{Config, DispatchMode, LevelHandler, StackTraceConfig};
use crate::context::{ContextExtractor, ExecutionContext};
use crate::dispatch::{Counters, Dispatcher, ErrorReporter, Stats};
use crate::efficient_clock::{Clock, Timestamp};
use crate::error::{FormatError, LogError};
use crate::level::{Level, LevelGate};
use crate::pool::{Pool, PoolStats};
use crate::record::{Caller, Entry, Record};
use crate::sampler::Sampler;
use crate::value::{ErrorValue, FieldKey, Fields, Value};
use crate::worker::{PoolState, WorkerPool};

/// Text of a log event: a plain string or deferred format arguments.
#[derive(Debug, Clone, Copy)]
pub enum Message<'a> {
    Text(&'a str),
    Args(fmt::Arguments<'a>),
}

impl<'a> Message<'a> {
    fn write_to(&self, buf: &mut Vec<u8>) -> io::Result<()> {
        match self {
            Message::Text(s) => buf.extend_from_slice(s.as_bytes()),
            Message::Args(args) => match args.as_str() {
                Some(s) => buf.extend_from_slice(s.as_bytes()),
                None => buf.write_fmt(*args)?,
            },
        }
        Ok(())
    }
}

impl<'a> From<&'a str> for Message<'a> {
    fn from(s: &'a str) -> Self {
        Message::Text(s)
    }
}

impl<'a> From<&'a String> for Message<'a> {
    fn from(s: &'a String) -> Self {
        Message::Text(s)
    }
}

impl<'a> From<fmt::Arguments<'a>> for Message<'a> {
    fn from(args: fmt::Arguments<'a>) -> Self {
        Message::Args(args)
    }
}

/// Fields, tags, error and metrics a derived logger adds to each of its records.
///
/// Fixed once the view is built, so any number of threads may emit through it.
#[derive(Debug, Clone, Default)]
struct View {
    fields: Fields,
    tags: Vec<FieldKey>,
    error: Option<ErrorValue>,
    metrics: Vec<(FieldKey, f64)>,
}

struct LoggerCore {
    gate: LevelGate,
    pool: Pool<Entry>,
    dispatcher: Arc<Dispatcher>,
    workers: Option<WorkerPool>,
    show_caller: bool,
    stack_trace: Option<StackTraceConfig>,
    sampler: Option<Arc<dyn Sampler>>,
    extractor: Arc<dyn ContextExtractor>,
    precise_timestamps: bool,
    close_timeout: Duration,
    closed: AtomicBool,
    fatal_handler: Option<LevelHandler>,
    panic_handler: Option<LevelHandler>,
}

impl LoggerCore {
    fn now(&self) -> Timestamp {
        if self.precise_timestamps {
            Timestamp::now()
        } else {
            Clock::process().now()
        }
    }

    fn close(&self) -> Result<(), LogError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let drained = match &self.workers {
            Some(workers) => workers.close(self.close_timeout),
            None => Ok(()),
        };
        if let Err(e) = &drained {
            self.dispatcher.reporter.report(e);
        }
        self.dispatcher.close(self.close_timeout);
        tracing::debug!("logger closed");
        drained
    }

    fn report(&self, err: LogError) {
        match err {
            LogError::Closed => tracing::trace!("record emitted after close"),
            err => self.dispatcher.reporter.report(&err),
        }
    }

    /// Runs after a FATAL or PANIC record has been handed to dispatch.
    fn terminate(&self, level: Level, message: &str) {
        match level {
            Level::Fatal => {
                let _ = self.close();
                match &self.fatal_handler {
                    Some(handler) => handler(message),
                    None => std::process::exit(1),
                }
            }
            Level::Panic => match &self.panic_handler {
                Some(handler) => handler(message),
                None => panic!("{}", message),
            },
            _ => {}
        }
    }
}

impl Drop for LoggerCore {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// Structured event logger.
///
/// A `Logger` is a cheap handle: cloning it, or deriving a view with
/// [`with_fields`](Logger::with_fields) and friends, shares the same pool,
/// dispatcher and workers. The pipeline closes when [`close`](Logger::close)
/// is called or the last handle is dropped.
///
/// Each emission goes through the level gate, the optional sampler, then takes
/// a record from the pool, fills it and either dispatches it on the calling
/// thread (sync mode) or moves it into the worker queue (async mode). Records
/// below the level threshold cost one atomic load.
///
/// # Examples
///
/// ```
/// use pooled_logger::{Config, FormatKind, Level, Logger, MemoryWriter, Value};
///
/// let sink = MemoryWriter::new();
/// let logger = Logger::new(
///     Config::new()
///         .with_level(Level::Info)
///         .with_format(FormatKind::Json)
///         .with_writer(sink.clone()),
/// )
/// .unwrap();
///
/// logger.debug("not written");
/// logger.log_fields(Level::Info, "user logged in", [("user_id", Value::from(123)), ("action", Value::from("login"))]);
///
/// let lines = sink.lines();
/// assert_eq!(lines.len(), 1);
/// assert!(lines[0].contains(r#""user_id":123"#));
/// ```
#[derive(Clone)]
pub struct Logger {
    core: Arc<LoggerCore>,
    view: Arc<View>,
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("level", &self.level())
            .field("fields", &self.view.fields)
            .field("tags", &self.view.tags)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl Logger {
    /// Builds a logger and, in async mode, starts its worker threads.
    ///
    /// # Arguments
    ///
    /// * `config` - Complete configuration. It is validated first.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::Config`] for invalid option combinations and
    /// [`LogError::Spawn`] if a worker thread cannot be started.
    pub fn new(config: Config) -> Result<Self, LogError> {
        config.validate()?;

        let formatter = config.build_formatter();
        let reporter = ErrorReporter::new(config.error_handler.clone(), Arc::clone(&config.error_writer));
        let dispatcher = Arc::new(Dispatcher::new(
            formatter,
            Arc::clone(&config.writer),
            config.hooks.clone(),
            !config.disable_locking,
            reporter,
        ));

        let (pool_capacity, workers) = match &config.dispatch {
            DispatchMode::Sync => (config.pool_capacity, None),
            DispatchMode::Async(async_cfg) => {
                // Queued records stay checked out of the pool until a worker finishes them.
                let capacity = config
                    .pool_capacity
                    .max(async_cfg.queue_capacity + async_cfg.workers);
                let workers = WorkerPool::start(async_cfg, Arc::clone(&dispatcher))?;
                (capacity, Some(workers))
            }
        };

        let core = LoggerCore {
            gate: LevelGate::new(config.level),
            pool: Pool::new(pool_capacity, config.pool_exhaustion),
            dispatcher,
            workers,
            show_caller: config.show_caller,
            stack_trace: config.stack_trace,
            sampler: config.sampler.clone(),
            extractor: Arc::clone(&config.context_extractor),
            precise_timestamps: config.precise_timestamps,
            close_timeout: config.close_timeout,
            closed: AtomicBool::new(false),
            fatal_handler: config.fatal_handler.clone(),
            panic_handler: config.panic_handler.clone(),
        };
        tracing::debug!(level = %config.level, mode = ?config.dispatch, "logger created");

        Ok(Self {
            core: Arc::new(core),
            view: Arc::new(View {
                fields: config.fields,
                ..View::default()
            }),
        })
    }

    /// Builds a logger from `LOG_*` environment variables, see [`Config::from_env`].
    pub fn from_env() -> Result<Self, LogError> {
        Self::new(Config::from_env()?)
    }

    /// Current minimum level.
    pub fn level(&self) -> Level {
        self.core.gate.get()
    }

    /// Changes the minimum level for this logger and every handle sharing it.
    pub fn set_level(&self, level: Level) {
        self.core.gate.set(level);
    }

    #[inline]
    pub fn enabled(&self, level: Level) -> bool {
        self.core.gate.enabled(level)
    }

    pub fn is_closed(&self) -> bool {
        self.core.closed.load(Ordering::Acquire)
    }

    /// Lifecycle of the async worker pool, `None` in sync mode.
    pub fn worker_state(&self) -> Option<PoolState> {
        self.core.workers.as_ref().map(WorkerPool::state)
    }

    pub fn stats(&self) -> Stats {
        let queued = self.core.workers.as_ref().map_or(0, WorkerPool::queued);
        self.core.dispatcher.counters.snapshot(queued)
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.core.pool.stats()
    }

    /// Flushes the writer. Records still queued in async mode are not waited for.
    pub fn flush(&self) -> Result<(), LogError> {
        self.core.dispatcher.flush()
    }

    /// Stops accepting records, drains the async queue, then closes the writer and hooks.
    ///
    /// Blocks until every queued record has been written or the configured
    /// close timeout elapses. Later emissions are ignored (`try_*` methods
    /// return [`LogError::Closed`]). Calling `close` more than once is harmless.
    ///
    /// # Errors
    ///
    /// [`LogError::ShutdownTimeout`] if records were still queued at the deadline.
    pub fn close(&self) -> Result<(), LogError> {
        self.core.close()
    }

    // Derived views

    /// Returns a logger that adds `fields` to every record, on top of this logger's fields.
    ///
    /// `self` is unchanged. On a key collision the new value wins.
    ///
    /// # Examples
    ///
    /// ```
    /// use pooled_logger::{Config, Logger, MemoryWriter, Value};
    ///
    /// let sink = MemoryWriter::new();
    /// let logger = Logger::new(Config::new().with_writer(sink.clone())).unwrap();
    /// let request = logger.with_fields([("request_id", Value::from("r-1"))]);
    ///
    /// request.info("handled");
    /// logger.info("idle");
    ///
    /// let lines = sink.lines();
    /// assert!(lines[0].contains("request_id=r-1"));
    /// assert!(!lines[1].contains("request_id"));
    /// ```
    pub fn with_fields<I, K, V>(&self, fields: I) -> Logger
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<FieldKey>,
        V: Into<Value>,
    {
        self.derive(|view| view.fields.extend(fields))
    }

    pub fn with_field(&self, key: impl Into<FieldKey>, value: impl Into<Value>) -> Logger {
        self.derive(|view| view.fields.insert(key, value))
    }

    /// Appends tags, skipping ones already present.
    pub fn with_tags<I, T>(&self, tags: I) -> Logger
    where
        I: IntoIterator<Item = T>,
        T: Into<FieldKey>,
    {
        self.derive(|view| {
            for tag in tags {
                let tag = tag.into();
                if !view.tags.contains(&tag) {
                    view.tags.push(tag);
                }
            }
        })
    }

    /// Attaches `err` as the error of every record.
    pub fn with_error<E>(&self, err: E) -> Logger
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.with_error_value(ErrorValue::from_error(err))
    }

    pub fn with_error_value(&self, err: ErrorValue) -> Logger {
        self.derive(|view| view.error = Some(err))
    }

    pub fn with_metric(&self, name: impl Into<FieldKey>, value: f64) -> Logger {
        self.derive(|view| {
            let name = name.into();
            match view.metrics.iter_mut().find(|(k, _)| *k == name) {
                Some(slot) => slot.1 = value,
                None => view.metrics.push((name, value)),
            }
        })
    }

    fn derive(&self, update: impl FnOnce(&mut View)) -> Logger {
        let mut view = View::clone(&self.view);
        update(&mut view);
        Logger {
            core: Arc::clone(&self.core),
            view: Arc::new(view),
        }
    }

    // Emission

    #[track_caller]
    pub fn trace(&self, msg: &str) {
        self.log(Level::Trace, msg);
    }

    #[track_caller]
    pub fn debug(&self, msg: &str) {
        self.log(Level::Debug, msg);
    }

    #[track_caller]
    pub fn info(&self, msg: &str) {
        self.log(Level::Info, msg);
    }

    #[track_caller]
    pub fn notice(&self, msg: &str) {
        self.log(Level::Notice, msg);
    }

    #[track_caller]
    pub fn warn(&self, msg: &str) {
        self.log(Level::Warn, msg);
    }

    #[track_caller]
    pub fn error(&self, msg: &str) {
        self.log(Level::Error, msg);
    }

    /// Logs at FATAL, closes the logger, then runs the fatal handler.
    ///
    /// Without a handler the process exits with status 1.
    #[track_caller]
    pub fn fatal(&self, msg: &str) {
        self.log(Level::Fatal, msg);
    }

    /// Logs at PANIC, then runs the panic handler.
    ///
    /// Without a handler this panics with `msg`.
    #[track_caller]
    pub fn panic(&self, msg: &str) {
        self.log(Level::Panic, msg);
    }

    /// Logs `message` at `level`. Failures go to the error handler.
    #[track_caller]
    pub fn log<'m>(&self, level: Level, message: impl Into<Message<'m>>) {
        let result = self.emit(level, message.into(), Location::caller(), |_| {});
        self.settle(result);
    }

    /// Logs pre-formatted arguments, as produced by [`log_record!`](crate::log_record).
    #[track_caller]
    pub fn log_args(&self, level: Level, args: fmt::Arguments<'_>) {
        self.log(level, args);
    }

    /// Logs with extra fields for this record only.
    #[track_caller]
    pub fn log_fields<'m, I, K, V>(&self, level: Level, message: impl Into<Message<'m>>, fields: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<FieldKey>,
        V: Into<Value>,
    {
        let result = self.emit(level, message.into(), Location::caller(), |record| {
            record.fields.extend(fields)
        });
        self.settle(result);
    }

    /// Logs with identifiers and fields taken from an execution context.
    #[track_caller]
    pub fn log_ctx<'m>(&self, ctx: &ExecutionContext, level: Level, message: impl Into<Message<'m>>) {
        let result = self.emit_ctx(ctx, level, message.into(), Location::caller());
        self.settle(result);
    }

    /// Like [`log`](Logger::log) but reports capacity and closed errors to the caller.
    ///
    /// # Errors
    ///
    /// * [`LogError::QueueFull`] / [`LogError::QueueTimeout`] when the async queue is full
    /// * [`LogError::PoolExhausted`] under a non-allocating pool policy
    /// * [`LogError::Closed`] after [`close`](Logger::close)
    ///
    /// The record is released in every error case. Sink and hook failures are
    /// still routed to the error handler, never returned here.
    #[track_caller]
    pub fn try_log<'m>(&self, level: Level, message: impl Into<Message<'m>>) -> Result<(), LogError> {
        self.emit(level, message.into(), Location::caller(), |_| {})
    }

    #[track_caller]
    pub fn try_log_fields<'m, I, K, V>(
        &self,
        level: Level,
        message: impl Into<Message<'m>>,
        fields: I,
    ) -> Result<(), LogError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<FieldKey>,
        V: Into<Value>,
    {
        self.emit(level, message.into(), Location::caller(), |record| {
            record.fields.extend(fields)
        })
    }

    #[track_caller]
    pub fn try_log_ctx<'m>(
        &self,
        ctx: &ExecutionContext,
        level: Level,
        message: impl Into<Message<'m>>,
    ) -> Result<(), LogError> {
        self.emit_ctx(ctx, level, message.into(), Location::caller())
    }

    /// Emits with an explicit source location, for adapters such as the `log` bridge.
    pub(crate) fn log_at(&self, level: Level, message: Message<'_>, caller: Option<Caller>, fields: Fields) {
        let result = self.emit_inner(level, message, caller, |record| record.fields.merge(&fields));
        self.settle(result);
    }

    fn settle(&self, result: Result<(), LogError>) {
        if let Err(err) = result {
            self.core.report(err);
        }
    }

    fn emit_ctx(
        &self,
        ctx: &ExecutionContext,
        level: Level,
        message: Message<'_>,
        location: &'static Location<'static>,
    ) -> Result<(), LogError> {
        let extractor = &self.core.extractor;
        self.emit(level, message, location, |record| {
            ctx.copy_ids(&mut record.context);
            extractor.extract(ctx, &mut record.fields);
        })
    }

    fn emit<F>(
        &self,
        level: Level,
        message: Message<'_>,
        location: &'static Location<'static>,
        fill: F,
    ) -> Result<(), LogError>
    where
        F: FnOnce(&mut Record),
    {
        let caller = Caller {
            file: location.file(),
            line: location.line(),
        };
        self.emit_inner(level, message, Some(caller), fill)
    }

    fn emit_inner<F>(&self, level: Level, message: Message<'_>, caller: Option<Caller>, fill: F) -> Result<(), LogError>
    where
        F: FnOnce(&mut Record),
    {
        let core = &*self.core;
        if !core.gate.enabled(level) {
            return Ok(());
        }
        if core.closed.load(Ordering::Acquire) {
            return Err(LogError::Closed);
        }
        let counters = &core.dispatcher.counters;
        if let Some(sampler) = &core.sampler {
            if !sampler.should_log(level) {
                Counters::bump(&counters.sampled_out);
                return Ok(());
            }
        }

        let mut entry = core.pool.acquire().inspect_err(|_| Counters::bump(&counters.dropped))?;

        let record = &mut entry.record;
        record.timestamp = core.now();
        record.level = level;
        message
            .write_to(&mut record.message)
            .map_err(FormatError::from)?;
        self.populate(record);
        fill(record);
        if core.show_caller {
            record.caller = caller;
        }
        if let Some(stack) = core.stack_trace {
            if level >= stack.min_level {
                capture_stack(&mut record.stack_trace, stack.depth);
            }
        }

        let terminal = matches!(level, Level::Fatal | Level::Panic);
        let terminal_message = terminal.then(|| record.message_str().into_owned());

        Counters::bump(&counters.emitted);
        let result = match &core.workers {
            None => {
                core.dispatcher.dispatch(entry);
                Ok(())
            }
            Some(workers) => workers
                .enqueue(entry)
                .inspect_err(|_| Counters::bump(&counters.dropped)),
        };

        if let Some(message) = terminal_message {
            if let Err(err) = &result {
                tracing::debug!(error = %err, "terminal record was not queued");
            }
            core.terminate(level, &message);
        }
        result
    }

    fn populate(&self, record: &mut Record) {
        let view = &*self.view;
        record.fields.merge(&view.fields);
        record.tags.extend(view.tags.iter().cloned());
        for (name, value) in &view.metrics {
            record.set_metric(name.clone(), *value);
        }
        record.error = view.error.clone();
    }
}

/// Writes the current stack into `buf`, keeping at most `depth` frames.
fn capture_stack(buf: &mut Vec<u8>, depth: usize) {
    let trace = Backtrace::force_capture().to_string();
    let mut frames = 0;
    for line in trace.lines() {
        let is_frame = line
            .trim_start()
            .split(':')
            .next()
            .is_some_and(|n| n.parse::<usize>().is_ok());
        if is_frame {
            frames += 1;
            if frames > depth {
                break;
            }
        }
        buf.extend_from_slice(line.as_bytes());
        buf.push(b'\n');
    }
}

/// Logs a formatted message, optionally with `key => value` fields.
///
/// # Examples
///
/// ```
/// use pooled_logger::{log_record, Config, Level, Logger, MemoryWriter};
///
/// let sink = MemoryWriter::new();
/// let logger = Logger::new(Config::new().with_writer(sink.clone())).unwrap();
///
/// log_record!(logger, Level::Info, "Temperature: {} C", 25.5);
/// log_record!(logger, Level::Warn, "Disk {}% full", 91; "mount" => "/var", "critical" => false);
///
/// let lines = sink.lines();
/// assert!(lines[0].ends_with("Temperature: 25.5 C"));
/// assert!(lines[1].contains("Disk 91% full mount=/var critical=false"));
/// ```
#[macro_export]
macro_rules! log_record {
    ($logger:expr, $level:expr, $fmt:literal $(, $arg:expr)* ; $($key:expr => $value:expr),+ $(,)?) => {
        $logger.log_fields(
            $level,
            ::std::format_args!($fmt $(, $arg)*),
            [$(($key, $crate::value::Value::from($value))),+],
        )
    };
    ($logger:expr, $level:expr, $fmt:literal $(, $arg:expr)* $(,)?) => {
        $logger.log_args($level, ::std::format_args!($fmt $(, $arg)*))
    };
}
