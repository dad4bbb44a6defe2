//! Adapter that routes records from the [`log`] facade into a [`Logger`].
//!
//! ```
//! use pooled_logger::{bridge::LogBridge, Config, Level, Logger, MemoryWriter};
//!
//! let sink = MemoryWriter::new();
//! let logger = Logger::new(Config::new().with_level(Level::Debug).with_writer(sink.clone())).unwrap();
//! LogBridge::init(logger).unwrap();
//!
//! log::info!(target: "db", "connected");
//! assert!(sink.to_string_lossy().contains("connected target=db"));
//! ```

use crate::level::Level;
use crate::logger::{Logger, Message};
use crate::record::Caller;
use crate::value::Fields;

/// `log::Log` implementation backed by a [`Logger`].
///
/// The `log` target becomes a `target` field and the source location comes
/// from the `log` record rather than from this adapter.
#[derive(Debug, Clone)]
pub struct LogBridge {
    logger: Logger,
}

impl LogBridge {
    pub fn new(logger: Logger) -> Self {
        Self { logger }
    }

    /// Installs the bridge as the global `log` logger.
    ///
    /// The `log` max level is opened to `Trace` and filtering is left to the
    /// logger, so a later [`Logger::set_level`] applies to `log` macros too.
    /// Can succeed only once per process.
    pub fn init(logger: Logger) -> Result<(), log::SetLoggerError> {
        let bridge: &'static LogBridge = Box::leak(Box::new(LogBridge::new(logger)));
        log::set_logger(bridge)?;
        log::set_max_level(log::LevelFilter::Trace);
        Ok(())
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }
}

impl log::Log for LogBridge {
    fn enabled(&self, metadata: &log::Metadata<'_>) -> bool {
        self.logger.enabled(from_log_level(metadata.level()))
    }

    fn log(&self, record: &log::Record<'_>) {
        let level = from_log_level(record.level());
        if !self.logger.enabled(level) {
            return;
        }
        let caller = match (record.file_static(), record.line()) {
            (Some(file), Some(line)) => Some(Caller { file, line }),
            _ => None,
        };
        let mut fields = Fields::with_capacity(1);
        fields.insert("target", record.target().to_string());
        self.logger.log_at(level, Message::Args(*record.args()), caller, fields);
    }

    fn flush(&self) {
        let _ = self.logger.flush();
    }
}

pub fn from_log_level(level: log::Level) -> Level {
    match level {
        log::Level::Error => Level::Error,
        log::Level::Warn => Level::Warn,
        log::Level::Info => Level::Info,
        log::Level::Debug => Level::Debug,
        log::Level::Trace => Level::Trace,
    }
}

/// Most verbose `log` filter that can still reach a logger at `level`.
pub fn to_level_filter(level: Level) -> log::LevelFilter {
    match level {
        Level::Trace => log::LevelFilter::Trace,
        Level::Debug => log::LevelFilter::Debug,
        Level::Info | Level::Notice => log::LevelFilter::Info,
        Level::Warn => log::LevelFilter::Warn,
        Level::Error | Level::Fatal | Level::Panic => log::LevelFilter::Error,
    }
}
