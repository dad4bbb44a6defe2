use pooled_logger::{
    log_record, Config, CsvFormatter, ExecutionContext, Exhaustion, Fields, FnHook, FormatKind, Level,
    LogError, Logger, MemoryWriter, RateSampler, Record, Value, WriterHook,
};
use parking_lot::Mutex;
use serde_json::Value as Json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

fn json_logger(sink: &MemoryWriter, level: Level) -> Logger {
    Logger::new(
        Config::new()
            .with_level(level)
            .with_format(FormatKind::Json)
            .with_writer(sink.clone()),
    )
    .unwrap()
}

fn parse_lines(sink: &MemoryWriter) -> Vec<Json> {
    sink.lines()
        .iter()
        .map(|line| serde_json::from_str(line).expect("each line is a JSON document"))
        .collect()
}

#[test]
fn test_below_threshold_touches_nothing() {
    let sink = MemoryWriter::new();
    let fired = Arc::new(AtomicUsize::new(0));
    let fired_in_hook = fired.clone();
    let logger = Logger::new(
        Config::new()
            .with_level(Level::Warn)
            .with_writer(sink.clone())
            .with_hook(FnHook::new("count", move |_: &Record| {
                fired_in_hook.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })),
    )
    .unwrap();

    for _ in 0..100 {
        logger.info("ignored");
        logger.log_fields(Level::Debug, "ignored", [("k", Value::from(1))]);
        log_record!(logger, Level::Trace, "ignored {}", 42);
    }

    assert_eq!(sink.write_count(), 0, "No bytes should reach the writer");
    assert_eq!(fired.load(Ordering::SeqCst), 0, "No hook should fire");
    assert_eq!(logger.pool_stats().acquired, 0, "No record should leave the pool");
    assert_eq!(logger.stats().emitted, 0);
}

#[test]
fn test_json_end_to_end() {
    let sink = MemoryWriter::new();
    let logger = json_logger(&sink, Level::Info);

    logger.log_fields(
        Level::Info,
        "user logged in",
        [("user_id", Value::from(123)), ("action", Value::from("login"))],
    );

    let lines = sink.lines();
    assert_eq!(lines.len(), 1);
    assert!(lines[0].contains(r#""user_id":123"#));
    assert!(lines[0].contains(r#""action":"login""#));

    let doc = &parse_lines(&sink)[0];
    assert_eq!(doc["level_name"], "INFO");
    assert_eq!(doc["message"], "user logged in");
}

#[test]
fn test_csv_end_to_end() {
    let sink = MemoryWriter::new();
    let logger = Logger::new(
        Config::new()
            .with_formatter(CsvFormatter::new(["level", "message", "user_id", "action", "missing", "latency"]))
            .with_writer(sink.clone()),
    )
    .unwrap();

    logger
        .with_metric("latency", 9.0)
        .log_fields(Level::Info, "user logged in", [("user_id", Value::from(123)), ("action", Value::from("login"))]);

    assert_eq!(sink.to_string_lossy(), "INFO,user logged in,123,login,,9\n");
}

#[test]
fn test_csv_columns_from_config() {
    let sink = MemoryWriter::new();
    let logger = Logger::new(
        Config::new()
            .with_format(FormatKind::Csv)
            .with_csv_columns(["level", "message", "user_id", "action", "password"])
            .with_sensitive_fields(["password"])
            .with_writer(sink.clone()),
    )
    .unwrap();

    logger.log_fields(
        Level::Info,
        "login",
        [
            ("user_id", Value::from(123)),
            ("action", Value::from("login")),
            ("password", Value::from("hunter2")),
        ],
    );

    assert_eq!(sink.to_string_lossy(), "INFO,login,123,login,***\n");
}

#[test]
fn test_custom_formatter_with_masking_is_rejected() {
    let config = Config::new()
        .with_sensitive_fields(["password"])
        .with_formatter(pooled_logger::JsonFormatter::new())
        .with_writer(MemoryWriter::new());
    assert!(matches!(Logger::new(config), Err(LogError::Config(_))));

    // The policy belongs on the formatter itself
    let sink = MemoryWriter::new();
    let logger = Logger::new(
        Config::new()
            .with_formatter(
                pooled_logger::JsonFormatter::new()
                    .with_policy(pooled_logger::FieldPolicy::new().with_sensitive_fields(["password"])),
            )
            .with_writer(sink.clone()),
    )
    .unwrap();
    logger.log_fields(Level::Info, "login", [("password", Value::from("hunter2"))]);

    let doc = &parse_lines(&sink)[0];
    assert_eq!(doc["fields"]["password"], "***");
    assert!(!sink.to_string_lossy().contains("hunter2"));
}

#[test]
fn test_runtime_level_change() {
    let sink = MemoryWriter::new();
    let logger = json_logger(&sink, Level::Info);
    let clone = logger.clone();

    logger.debug("hidden");
    clone.set_level(Level::Debug);
    assert_eq!(logger.level(), Level::Debug, "Level is shared between handles");
    logger.debug("shown");

    let docs = parse_lines(&sink);
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0]["message"], "shown");
}

#[test]
fn test_field_layering() {
    let sink = MemoryWriter::new();
    let logger = Logger::new(
        Config::new()
            .with_format(FormatKind::Json)
            .with_field("service", "billing")
            .with_field("region", "eu")
            .with_writer(sink.clone()),
    )
    .unwrap();

    let child = logger.with_fields([("region", Value::from("us")), ("request_id", Value::from("r-1"))]);
    child.log_fields(Level::Info, "charged", [("request_id", Value::from("r-2"))]);
    logger.info("plain");

    let docs = parse_lines(&sink);
    let fields = &docs[0]["fields"];
    assert_eq!(fields["service"], "billing");
    assert_eq!(fields["region"], "us", "View overrides logger fields");
    assert_eq!(fields["request_id"], "r-2", "Call fields override view fields");
    assert_eq!(docs[1]["fields"]["region"], "eu", "Parent is unchanged");
    assert!(docs[1]["fields"].get("request_id").is_none());
}

#[test]
fn test_error_view() {
    let sink = MemoryWriter::new();
    let logger = json_logger(&sink, Level::Info);
    let failing = logger.with_error(std::io::Error::new(std::io::ErrorKind::NotFound, "config.toml missing"));
    failing.error("startup failed");

    let doc = &parse_lines(&sink)[0];
    assert_eq!(doc["error"], "config.toml missing");
}

#[test]
fn test_context_emission() {
    let sink = MemoryWriter::new();
    let logger = Logger::new(
        Config::new()
            .with_format(FormatKind::Json)
            .with_context_extractor(|ctx: &ExecutionContext, fields: &mut Fields| {
                fields.merge(&ctx.values);
                if ctx.user_id.is_some() {
                    fields.insert("authenticated", true);
                }
            })
            .with_writer(sink.clone()),
    )
    .unwrap();

    let ctx = ExecutionContext::new()
        .with_trace_id("trace-1")
        .with_request_id("req-9")
        .with_user_id("u-5")
        .with_value("tenant", "acme");
    logger.log_ctx(&ctx, Level::Info, "request handled");

    let doc = &parse_lines(&sink)[0];
    assert_eq!(doc["trace_id"], "trace-1");
    assert_eq!(doc["request_id"], "req-9");
    assert_eq!(doc["fields"]["tenant"], "acme");
    assert_eq!(doc["fields"]["authenticated"], true);
    assert!(doc.get("span_id").is_none());
}

#[test]
fn test_sampling() {
    let sink = MemoryWriter::new();
    let logger = Logger::new(
        Config::new()
            .with_sampler(RateSampler::new(10))
            .with_writer(sink.clone()),
    )
    .unwrap();

    for i in 0..100 {
        log_record!(logger, Level::Info, "event {}", i);
    }

    assert_eq!(sink.lines().len(), 10);
    let stats = logger.stats();
    assert_eq!(stats.sampled_out, 90);
    assert_eq!(stats.emitted, 10);
}

#[test]
fn test_error_hook_receives_only_errors() {
    let sink = MemoryWriter::new();
    let errors = MemoryWriter::new();
    let logger = Logger::new(
        Config::new()
            .with_writer(sink.clone())
            .with_hook(WriterHook::new(
                Level::Error,
                pooled_logger::JsonFormatter::new(),
                errors.clone(),
            )),
    )
    .unwrap();

    logger.info("fine");
    logger.warn("hmm");
    logger.error("broken");

    assert_eq!(sink.lines().len(), 3);
    let error_lines = errors.lines();
    assert_eq!(error_lines.len(), 1);
    assert!(error_lines[0].contains(r#""message":"broken""#));
}

#[test]
fn test_failing_hook_reported_not_returned() {
    let sink = MemoryWriter::new();
    let reported = Arc::new(Mutex::new(Vec::new()));
    let reported_in_handler = reported.clone();
    let logger = Logger::new(
        Config::new()
            .with_writer(sink.clone())
            .with_hook(FnHook::new("webhook", |_: &Record| Err("503 from endpoint".into())))
            .with_error_handler(move |e: &LogError| reported_in_handler.lock().push(e.to_string())),
    )
    .unwrap();

    assert!(logger.try_log(Level::Info, "still written").is_ok());
    assert_eq!(sink.lines().len(), 1);
    assert_eq!(reported.lock().as_slice(), ["hook `webhook` failed: 503 from endpoint"]);
    assert_eq!(logger.stats().hook_errors, 1);
}

#[test]
fn test_pool_configuration() {
    let logger = Logger::new(
        Config::new()
            .with_pool(0, Exhaustion::Allocate)
            .with_writer(MemoryWriter::new()),
    )
    .unwrap();
    assert!(logger.try_log(Level::Info, "ok").is_ok());

    let invalid = Config::new().with_pool(0, Exhaustion::Fail);
    assert!(matches!(Logger::new(invalid), Err(LogError::Config(_))));
}

#[test]
fn test_concurrent_sync_logging() {
    const THREADS: usize = 8;
    const PER_THREAD: usize = 500;

    let sink = MemoryWriter::new();
    let logger = json_logger(&sink, Level::Info);

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let logger = logger.with_field("thread", t);
            thread::spawn(move || {
                for i in 0..PER_THREAD {
                    log_record!(logger, Level::Info, "message {}", i; "seq" => i);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    // Locking keeps every line intact
    let docs = parse_lines(&sink);
    assert_eq!(docs.len(), THREADS * PER_THREAD);
    assert_eq!(logger.stats().written, (THREADS * PER_THREAD) as u64);
    assert_eq!(logger.pool_stats().in_use, 0);
}

#[test]
fn test_close_is_idempotent_and_final() {
    let sink = MemoryWriter::new();
    let logger = json_logger(&sink, Level::Info);
    logger.info("before");
    logger.close().unwrap();
    logger.close().unwrap();

    logger.info("after");
    assert!(matches!(logger.try_log(Level::Error, "after"), Err(LogError::Closed)));
    assert_eq!(sink.lines().len(), 1);
}

#[test]
fn test_from_env_lookup() {
    let config = Config::from_lookup(|key: &str| match key {
        "LOG_LEVEL" => Some("error".to_string()),
        "LOG_SENSITIVE_FIELDS" => Some("password, token".to_string()),
        _ => None,
    })
    .unwrap();
    let sink = MemoryWriter::new();
    let logger = Logger::new(config.with_format(FormatKind::Json).with_writer(sink.clone())).unwrap();

    logger.warn("dropped");
    logger.log_fields(Level::Error, "auth failed", [("token", Value::from("abc"))]);

    let docs = parse_lines(&sink);
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0]["fields"]["token"], "***");
}
