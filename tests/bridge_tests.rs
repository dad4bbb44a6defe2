use pooled_logger::bridge::LogBridge;
use pooled_logger::{Config, FormatKind, Level, Logger, MemoryWriter};
use serde_json::Value as Json;

// `log` accepts a single global logger per process, so everything lives in one test.
#[test]
fn test_log_facade_routes_into_logger() {
    let sink = MemoryWriter::new();
    let logger = Logger::new(
        Config::new()
            .with_level(Level::Info)
            .with_format(FormatKind::Json)
            .with_caller(true)
            .with_writer(sink.clone()),
    )
    .unwrap();
    LogBridge::init(logger.clone()).unwrap();
    assert_eq!(log::max_level(), log::LevelFilter::Trace);

    log::debug!("filtered by the facade");
    let line = line!() + 1;
    log::warn!(target: "payments", "retrying charge {}", 7);
    log::logger().flush();

    let docs: Vec<Json> = sink
        .lines()
        .iter()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0]["level_name"], "WARN");
    assert_eq!(docs[0]["message"], "retrying charge 7");
    assert_eq!(docs[0]["fields"]["target"], "payments");
    assert_eq!(docs[0]["caller"], format!("tests/bridge_tests.rs:{}", line));

    logger.set_level(Level::Debug);
    log::debug!("visible after lowering the level");
    log::trace!("still filtered");
    let lines = sink.lines();
    assert_eq!(lines.len(), 2);
    assert!(lines[1].contains("visible after lowering the level"));

    assert!(LogBridge::init(logger).is_err(), "Second install must fail");
}
