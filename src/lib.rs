//! # Pooled Logger
//!
//! A structured-event logging core built around reusable record slots:
//!
//! * **Cheap when disabled**: a record below the level threshold costs one atomic load
//! * **Bounded memory**: records come from a fixed pool and are cleared, not freed
//! * **Backpressure, not loss**: a full async queue is reported to the caller
//!
//! ## Key Features
//!
//! * Eight severity levels, changeable at runtime from any thread
//! * Synchronous dispatch or a bounded worker pool with graceful drain on close
//! * Text, JSON and CSV formatters with sensitive-field masking and value transformers
//! * Pluggable writers (stdout, files, daily rolling files, LZ4 frames, memory)
//! * Hooks that observe every record without being able to break the pipeline
//! * Rate sampling, execution-context extraction, caller and stack trace capture
//! * A [`log`] facade bridge
//!
//! ## Main Components
//!
//! * [`Logger`]: emission API, derived views and lifecycle
//! * [`Pool`]: bounded object pool handing out RAII [`Pooled`] slots
//! * [`format`]: the [`Formatter`] contract and the built-in formatters
//! * [`Writer`] / [`Hook`] / [`Sampler`]: extension points
//! * [`efficient_clock`]: coarse cached wall clock used for record timestamps
//!
//! ## Quick Start
//!
//! ```
//! use pooled_logger::{log_record, AsyncConfig, Config, FormatKind, Level, Logger, MemoryWriter};
//!
//! let sink = MemoryWriter::new();
//! let logger = Logger::new(
//!     Config::new()
//!         .with_level(Level::Info)
//!         .with_format(FormatKind::Json)
//!         .with_sensitive_fields(["password"])
//!         .with_writer(sink.clone())
//!         .with_async(AsyncConfig::default().with_workers(2)),
//! )
//! .unwrap();
//!
//! let auth = logger.with_field("service", "auth");
//! log_record!(auth, Level::Info, "login attempt {}", 3; "user" => "alice", "password" => "hunter2");
//! auth.debug("below threshold");
//!
//! // close drains the queue before returning
//! logger.close().unwrap();
//!
//! let lines = sink.lines();
//! assert_eq!(lines.len(), 1);
//! assert!(lines[0].contains(r#""password":"***""#));
//! assert!(lines[0].contains(r#""service":"auth""#));
//! ```

pub mod bridge;
pub mod config;
pub mod context;
mod dispatch;
pub mod efficient_clock;
pub mod error;
pub mod format;
pub mod hook;
pub mod level;
pub mod logger;
pub mod pool;
pub mod record;
pub mod sampler;
pub mod value;
mod worker;
pub mod writer;

pub use config::{AsyncConfig, Config, DispatchMode, EnqueuePolicy, FormatKind, StackTraceConfig};
pub use context::{ContextExtractor, DefaultExtractor, ExecutionContext};
pub use dispatch::Stats;
pub use efficient_clock::{Clock, Timestamp};
pub use error::{BoxError, FormatError, LogError};
pub use format::{CsvFormatter, FieldPolicy, Formatter, JsonFormatter, TextFormatter};
pub use hook::{FnHook, Hook, WriterHook};
pub use level::{Level, LevelGate};
pub use logger::{Logger, Message};
pub use pool::{Exhaustion, Pool, PoolStats, Pooled, Reusable};
pub use record::{Caller, Entry, Record, TraceContext};
pub use sampler::{RateSampler, Sampler};
pub use value::{ErrorAppender, ErrorValue, FieldKey, Fields, Value};
pub use worker::PoolState;
pub use writer::{DiscardWriter, IoWriter, Lz4Writer, MemoryWriter, Writer};
