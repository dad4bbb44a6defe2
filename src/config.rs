//! Logger configuration.
//!
//! [`Config`] is a plain struct with public fields and consuming `with_*`
//! setters. It can also be read from `LOG_*` environment variables, see
//! [`Config::from_env`].

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::context::{ContextExtractor, DefaultExtractor};
use crate::error::LogError;
use crate::format::{CsvFormatter, FieldPolicy, Formatter, JsonFormatter, TextFormatter};
use crate::hook::Hook;
use crate::level::Level;
use crate::pool::Exhaustion;
use crate::sampler::{RateSampler, Sampler};
use crate::value::{FieldKey, Fields, Value};
use crate::writer::{IoWriter, Writer};

pub const LOG_LEVEL_ENV: &str = "LOG_LEVEL";
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";
pub const LOG_ASYNC_ENV: &str = "LOG_ASYNC";
pub const LOG_WORKERS_ENV: &str = "LOG_WORKERS";
pub const LOG_QUEUE_CAPACITY_ENV: &str = "LOG_QUEUE_CAPACITY";
pub const LOG_ENQUEUE_TIMEOUT_MS_ENV: &str = "LOG_ENQUEUE_TIMEOUT_MS";
pub const LOG_SENSITIVE_FIELDS_ENV: &str = "LOG_SENSITIVE_FIELDS";
pub const LOG_MASK_ENV: &str = "LOG_MASK";
pub const LOG_SAMPLE_RATE_ENV: &str = "LOG_SAMPLE_RATE";
pub const LOG_CSV_FIELDS_ENV: &str = "LOG_CSV_FIELDS";

pub const DEFAULT_POOL_CAPACITY: usize = 256;
pub const DEFAULT_WORKERS: usize = 4;
pub const DEFAULT_QUEUE_CAPACITY: usize = 4096;
pub const DEFAULT_ENQUEUE_TIMEOUT: Duration = Duration::from_millis(100);
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_STACK_DEPTH: usize = 32;
pub const DEFAULT_CSV_COLUMNS: &[&str] = &["timestamp", "level", "message"];

/// Called with every internal failure (sink, hook, format, capacity, timeout).
pub type ErrorHandler = Arc<dyn Fn(&LogError) + Send + Sync>;

/// Called with the message of a FATAL or PANIC record after it was dispatched.
pub type LevelHandler = Arc<dyn Fn(&str) + Send + Sync>;

/// Built-in formatter selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FormatKind {
    #[default]
    Text,
    Json,
    Csv,
}

impl FromStr for FormatKind {
    type Err = LogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(FormatKind::Text),
            "json" => Ok(FormatKind::Json),
            "csv" => Ok(FormatKind::Csv),
            other => Err(LogError::Config(format!("unknown log format `{}`", other))),
        }
    }
}

/// What an async `emit` does when the queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueuePolicy {
    /// Wait up to the given duration for space, then give up with `QueueTimeout`.
    Block(Duration),
    /// Give up immediately with `QueueFull`.
    FailFast,
}

impl Default for EnqueuePolicy {
    fn default() -> Self {
        EnqueuePolicy::Block(DEFAULT_ENQUEUE_TIMEOUT)
    }
}

/// Worker pool sizing for asynchronous dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AsyncConfig {
    pub workers: usize,
    pub queue_capacity: usize,
    pub enqueue: EnqueuePolicy,
    /// Upper bound on formatting, writing and hooks for one record. Best effort:
    /// a stuck writer is abandoned, not interrupted.
    pub task_timeout: Option<Duration>,
}

impl Default for AsyncConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            enqueue: EnqueuePolicy::default(),
            task_timeout: None,
        }
    }
}

impl AsyncConfig {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_enqueue(mut self, policy: EnqueuePolicy) -> Self {
        self.enqueue = policy;
        self
    }

    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = Some(timeout);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatchMode {
    /// Format, write and run hooks on the emitting thread.
    #[default]
    Sync,
    Async(AsyncConfig),
}

/// Capture a stack trace for records at or above `min_level`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackTraceConfig {
    pub min_level: Level,
    /// Maximum number of frames kept.
    pub depth: usize,
}

impl Default for StackTraceConfig {
    fn default() -> Self {
        Self {
            min_level: Level::Error,
            depth: DEFAULT_STACK_DEPTH,
        }
    }
}

/// Everything a [`Logger`](crate::Logger) is built from.
#[derive(Clone)]
pub struct Config {
    pub level: Level,
    pub format: FormatKind,
    /// Overrides `format` when set. Carries its own field policy, so it
    /// cannot be combined with a non-empty `policy`.
    pub formatter: Option<Arc<dyn Formatter>>,
    pub policy: FieldPolicy,
    /// Column order for [`FormatKind::Csv`].
    pub csv_columns: Vec<String>,
    pub writer: Arc<dyn Writer>,
    /// Where internal failures are written when no error handler is set.
    pub error_writer: Arc<dyn Writer>,
    pub hooks: Vec<Arc<dyn Hook>>,
    pub dispatch: DispatchMode,
    pub pool_capacity: usize,
    pub pool_exhaustion: Exhaustion,
    pub show_caller: bool,
    pub stack_trace: Option<StackTraceConfig>,
    pub sampler: Option<Arc<dyn Sampler>>,
    pub context_extractor: Arc<dyn ContextExtractor>,
    /// Skip the dispatcher's lock around format and write; the writer must be thread-safe.
    pub disable_locking: bool,
    /// Read the system clock for every record instead of the shared refreshed clock.
    pub precise_timestamps: bool,
    pub fields: Fields,
    pub close_timeout: Duration,
    pub error_handler: Option<ErrorHandler>,
    pub fatal_handler: Option<LevelHandler>,
    pub panic_handler: Option<LevelHandler>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            level: Level::Info,
            format: FormatKind::Text,
            formatter: None,
            policy: FieldPolicy::default(),
            csv_columns: DEFAULT_CSV_COLUMNS.iter().map(|c| c.to_string()).collect(),
            writer: Arc::new(IoWriter::stdout()),
            error_writer: Arc::new(IoWriter::stderr()),
            hooks: Vec::new(),
            dispatch: DispatchMode::Sync,
            pool_capacity: DEFAULT_POOL_CAPACITY,
            pool_exhaustion: Exhaustion::Allocate,
            show_caller: false,
            stack_trace: None,
            sampler: None,
            context_extractor: Arc::new(DefaultExtractor),
            disable_locking: false,
            precise_timestamps: false,
            fields: Fields::new(),
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
            error_handler: None,
            fatal_handler: None,
            panic_handler: None,
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("level", &self.level)
            .field("format", &self.format)
            .field("custom_formatter", &self.formatter.is_some())
            .field("policy", &self.policy)
            .field("csv_columns", &self.csv_columns)
            .field("hooks", &self.hooks.len())
            .field("dispatch", &self.dispatch)
            .field("pool_capacity", &self.pool_capacity)
            .field("pool_exhaustion", &self.pool_exhaustion)
            .field("show_caller", &self.show_caller)
            .field("stack_trace", &self.stack_trace)
            .field("sampler", &self.sampler.is_some())
            .field("disable_locking", &self.disable_locking)
            .field("precise_timestamps", &self.precise_timestamps)
            .field("fields", &self.fields)
            .field("close_timeout", &self.close_timeout)
            .finish_non_exhaustive()
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads `LOG_*` variables from the process environment on top of the defaults.
    ///
    /// Unset variables keep their default; set but invalid ones are an error.
    pub fn from_env() -> Result<Self, LogError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a custom variable source.
    ///
    /// # Examples
    ///
    /// ```
    /// use pooled_logger::config::{Config, DispatchMode, FormatKind};
    /// use pooled_logger::level::Level;
    ///
    /// let config = Config::from_lookup(|key| match key {
    ///     "LOG_LEVEL" => Some("warn".to_string()),
    ///     "LOG_FORMAT" => Some("json".to_string()),
    ///     "LOG_ASYNC" => Some("true".to_string()),
    ///     "LOG_WORKERS" => Some("2".to_string()),
    ///     _ => None,
    /// })
    /// .unwrap();
    ///
    /// assert_eq!(config.level, Level::Warn);
    /// assert_eq!(config.format, FormatKind::Json);
    /// assert!(matches!(config.dispatch, DispatchMode::Async(a) if a.workers == 2));
    /// ```
    pub fn from_lookup<F>(lookup: F) -> Result<Self, LogError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();

        if let Some(level) = lookup(LOG_LEVEL_ENV) {
            config.level = level.parse()?;
        }
        if let Some(format) = lookup(LOG_FORMAT_ENV) {
            config.format = format.parse()?;
        }
        if let Some(list) = lookup(LOG_CSV_FIELDS_ENV) {
            config.csv_columns = split_list(&list);
        }

        let async_on = match lookup(LOG_ASYNC_ENV) {
            Some(v) => parse_bool(LOG_ASYNC_ENV, &v)?,
            None => false,
        };
        if async_on {
            let mut async_cfg = AsyncConfig::default();
            if let Some(v) = lookup(LOG_WORKERS_ENV) {
                async_cfg.workers = parse_num(LOG_WORKERS_ENV, &v)?;
            }
            if let Some(v) = lookup(LOG_QUEUE_CAPACITY_ENV) {
                async_cfg.queue_capacity = parse_num(LOG_QUEUE_CAPACITY_ENV, &v)?;
            }
            if let Some(v) = lookup(LOG_ENQUEUE_TIMEOUT_MS_ENV) {
                let ms: u64 = parse_num(LOG_ENQUEUE_TIMEOUT_MS_ENV, &v)?;
                async_cfg.enqueue = if ms == 0 {
                    EnqueuePolicy::FailFast
                } else {
                    EnqueuePolicy::Block(Duration::from_millis(ms))
                };
            }
            config.dispatch = DispatchMode::Async(async_cfg);
        }

        if let Some(list) = lookup(LOG_SENSITIVE_FIELDS_ENV) {
            config.policy = config.policy.with_sensitive_fields(split_list(&list));
        }
        if let Some(mask) = lookup(LOG_MASK_ENV) {
            config.policy = config.policy.with_mask(mask);
        }
        if let Some(v) = lookup(LOG_SAMPLE_RATE_ENV) {
            let rate: u64 = parse_num(LOG_SAMPLE_RATE_ENV, &v)?;
            if rate > 1 {
                config.sampler = Some(Arc::new(RateSampler::new(rate)));
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Checks option combinations that cannot work.
    pub fn validate(&self) -> Result<(), LogError> {
        if let DispatchMode::Async(a) = &self.dispatch {
            if a.workers == 0 {
                return Err(LogError::Config("async worker count must be at least 1".into()));
            }
            if a.queue_capacity == 0 {
                return Err(LogError::Config("async queue capacity must be at least 1".into()));
            }
            if a.task_timeout == Some(Duration::ZERO) {
                return Err(LogError::Config("task timeout must be non-zero".into()));
            }
        }
        if self.pool_capacity == 0 && self.pool_exhaustion != Exhaustion::Allocate {
            return Err(LogError::Config(
                "an empty record pool requires the Allocate exhaustion policy".into(),
            ));
        }
        if self.formatter.is_some() && !self.policy.is_passthrough() {
            return Err(LogError::Config(
                "sensitive fields, transformers and key aliases must be set on a custom formatter".into(),
            ));
        }
        if self.format == FormatKind::Csv && self.formatter.is_none() && self.csv_columns.is_empty() {
            return Err(LogError::Config("csv output needs at least one column".into()));
        }
        if let Some(st) = &self.stack_trace {
            if st.depth == 0 {
                return Err(LogError::Config("stack trace depth must be at least 1".into()));
            }
        }
        Ok(())
    }

    /// The formatter the logger will use.
    pub fn build_formatter(&self) -> Arc<dyn Formatter> {
        if let Some(formatter) = &self.formatter {
            return Arc::clone(formatter);
        }
        let policy = self.policy.clone();
        match self.format {
            FormatKind::Text => Arc::new(TextFormatter::new().with_caller(self.show_caller).with_policy(policy)),
            FormatKind::Json => Arc::new(JsonFormatter::new().with_caller(self.show_caller).with_policy(policy)),
            FormatKind::Csv => Arc::new(CsvFormatter::new(self.csv_columns.iter().cloned()).with_policy(policy)),
        }
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    pub fn with_format(mut self, format: FormatKind) -> Self {
        self.format = format;
        self
    }

    pub fn with_formatter<F: Formatter + 'static>(mut self, formatter: F) -> Self {
        self.formatter = Some(Arc::new(formatter));
        self
    }

    /// Column order used when `format` is [`FormatKind::Csv`].
    pub fn with_csv_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.csv_columns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_policy(mut self, policy: FieldPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_sensitive_fields<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.policy = self.policy.with_sensitive_fields(names);
        self
    }

    pub fn with_mask(mut self, mask: impl Into<Vec<u8>>) -> Self {
        self.policy = self.policy.with_mask(mask);
        self
    }

    pub fn with_transformer<F>(mut self, field: impl Into<String>, transform: F) -> Self
    where
        F: Fn(&Value) -> Value + Send + Sync + 'static,
    {
        self.policy = self.policy.with_transformer(field, transform);
        self
    }

    pub fn with_writer<W: Writer + 'static>(mut self, writer: W) -> Self {
        self.writer = Arc::new(writer);
        self
    }

    pub fn with_error_writer<W: Writer + 'static>(mut self, writer: W) -> Self {
        self.error_writer = Arc::new(writer);
        self
    }

    pub fn with_hook<H: Hook + 'static>(mut self, hook: H) -> Self {
        self.hooks.push(Arc::new(hook));
        self
    }

    pub fn with_async(mut self, config: AsyncConfig) -> Self {
        self.dispatch = DispatchMode::Async(config);
        self
    }

    pub fn with_sync(mut self) -> Self {
        self.dispatch = DispatchMode::Sync;
        self
    }

    pub fn with_pool(mut self, capacity: usize, exhaustion: Exhaustion) -> Self {
        self.pool_capacity = capacity;
        self.pool_exhaustion = exhaustion;
        self
    }

    pub fn with_caller(mut self, show: bool) -> Self {
        self.show_caller = show;
        self
    }

    pub fn with_stack_trace(mut self, config: StackTraceConfig) -> Self {
        self.stack_trace = Some(config);
        self
    }

    pub fn with_sampler<S: Sampler + 'static>(mut self, sampler: S) -> Self {
        self.sampler = Some(Arc::new(sampler));
        self
    }

    pub fn with_context_extractor<E: ContextExtractor + 'static>(mut self, extractor: E) -> Self {
        self.context_extractor = Arc::new(extractor);
        self
    }

    pub fn with_locking_disabled(mut self, disabled: bool) -> Self {
        self.disable_locking = disabled;
        self
    }

    pub fn with_precise_timestamps(mut self, precise: bool) -> Self {
        self.precise_timestamps = precise;
        self
    }

    pub fn with_field(mut self, key: impl Into<FieldKey>, value: impl Into<Value>) -> Self {
        self.fields.insert(key, value);
        self
    }

    pub fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    pub fn with_error_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&LogError) + Send + Sync + 'static,
    {
        self.error_handler = Some(Arc::new(handler));
        self
    }

    pub fn with_fatal_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.fatal_handler = Some(Arc::new(handler));
        self
    }

    pub fn with_panic_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.panic_handler = Some(Arc::new(handler));
        self
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, LogError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(LogError::Config(format!("{}: expected a boolean, got `{}`", key, other))),
    }
}

fn split_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_num<T: FromStr>(key: &str, value: &str) -> Result<T, LogError> {
    value
        .trim()
        .parse()
        .map_err(|_| LogError::Config(format!("{}: expected a number, got `{}`", key, value)))
}
