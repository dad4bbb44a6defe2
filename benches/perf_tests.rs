use criterion::{black_box, criterion_group, criterion_main, Criterion};
use log::{info, LevelFilter};
use log4rs::{
    append::file::FileAppender,
    config::{Appender, Config as Log4rsConfig, Root},
    encode::pattern::PatternEncoder,
};
use pooled_logger::{
    log_record, AsyncConfig, Config, DiscardWriter, EnqueuePolicy, FormatKind, IoWriter, Level, Logger,
};
use std::sync::Once;
use std::time::Duration;
use tempfile::tempdir;

const ITERATIONS: usize = 10_000;

static LOG4RS_INIT: Once = Once::new();

#[derive(Debug)]
struct TestEvent {
    id: i32,
    active: bool,
    large_number: u64,
    description: String,
}

impl std::fmt::Display for TestEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Event[id={}, active={}, large_number={}, desc={}]",
            self.id, self.active, self.large_number, self.description
        )
    }
}

fn event() -> TestEvent {
    TestEvent {
        id: 42,
        active: true,
        large_number: u64::MAX,
        description: "Disk pressure on /var with CPU: 95%, Memory: 2.5GB, Network: 1.2Gbps".to_string(),
    }
}

fn setup_log4rs(log_file: &str) {
    LOG4RS_INIT.call_once(|| {
        let logfile = FileAppender::builder()
            .encoder(Box::new(PatternEncoder::new("{d} {l} - {m}{n}")))
            .append(true)
            .build(log_file)
            .unwrap();

        let config = Log4rsConfig::builder()
            .appender(Appender::builder().build("logfile", Box::new(logfile)))
            .build(Root::builder().appender("logfile").build(LevelFilter::Info))
            .unwrap();

        log4rs::init_config(config).unwrap();
    });
}

fn bench_level_gate(c: &mut Criterion) {
    let logger = Logger::new(Config::new().with_level(Level::Warn).with_writer(DiscardWriter)).unwrap();
    c.bench_function("disabled_record", |b| {
        b.iter(|| log_record!(logger, Level::Debug, "value {}", black_box(7)))
    });
}

fn bench_logging_comparison(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    let event = event();

    let mut group = c.benchmark_group("Logging Comparison");
    group.sample_size(10);

    let sync_file = dir.path().join("sync.log");
    let sync_logger = Logger::new(
        Config::new()
            .with_format(FormatKind::Json)
            .with_writer(IoWriter::new(std::io::BufWriter::new(std::fs::File::create(&sync_file).unwrap()))),
    )
    .unwrap();
    group.bench_function("pooled_sync_json", |b| {
        b.iter(|| {
            for i in 0..ITERATIONS {
                log_record!(sync_logger, Level::Info, "Test perf: iteration={}, event={}", i, event; "iteration" => i);
            }
            sync_logger.flush().unwrap();
        })
    });

    let async_file = dir.path().join("async.log");
    let async_logger = Logger::new(
        Config::new()
            .with_format(FormatKind::Json)
            .with_writer(IoWriter::new(std::io::BufWriter::new(std::fs::File::create(&async_file).unwrap())))
            .with_async(
                AsyncConfig::default()
                    .with_workers(2)
                    .with_queue_capacity(ITERATIONS)
                    .with_enqueue(EnqueuePolicy::Block(Duration::from_secs(1))),
            ),
    )
    .unwrap();
    group.bench_function("pooled_async_json", |b| {
        b.iter(|| {
            for i in 0..ITERATIONS {
                log_record!(async_logger, Level::Info, "Test perf: iteration={}, event={}", i, event; "iteration" => i);
            }
        })
    });

    let traditional_file = dir.path().join("traditional.log");
    setup_log4rs(traditional_file.to_str().unwrap());
    group.bench_function("log4rs", |b| {
        b.iter(|| {
            for i in 0..ITERATIONS {
                info!("Test perf: iteration={}, event={}", i, event);
            }
        })
    });

    group.finish();

    let stats = async_logger.stats();
    async_logger.close().unwrap();
    println!(
        "async: emitted={} written={} dropped={}",
        stats.emitted, stats.written, stats.dropped
    );
}

criterion_group!(benches, bench_level_gate, bench_logging_comparison);
criterion_main!(benches);
