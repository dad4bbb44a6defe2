use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use pooled_logger::{
    log_record, AsyncConfig, Config, EnqueuePolicy, Level, LogError, Logger, MemoryWriter, PoolState, Writer,
};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Writer whose first write (or every write containing `trigger`) parks until released.
struct GateWriter {
    inner: MemoryWriter,
    trigger: Option<&'static str>,
    armed: AtomicBool,
    entered: Sender<()>,
    release: Receiver<()>,
}

struct Gate {
    entered: Receiver<()>,
    release: Sender<()>,
}

impl GateWriter {
    fn new(inner: MemoryWriter, trigger: Option<&'static str>) -> (Self, Gate) {
        let (entered_tx, entered_rx) = bounded(16);
        let (release_tx, release_rx) = bounded(16);
        let writer = Self {
            inner,
            trigger,
            armed: AtomicBool::new(true),
            entered: entered_tx,
            release: release_rx,
        };
        (writer, Gate { entered: entered_rx, release: release_tx })
    }

    fn should_park(&self, buf: &[u8]) -> bool {
        match self.trigger {
            Some(needle) => String::from_utf8_lossy(buf).contains(needle),
            None => self.armed.swap(false, Ordering::SeqCst),
        }
    }
}

impl Writer for GateWriter {
    fn write(&self, buf: &[u8]) -> io::Result<usize> {
        if self.should_park(buf) {
            let _ = self.entered.send(());
            let _ = self.release.recv();
        }
        self.inner.write(buf)
    }
}

impl Gate {
    fn wait_entered(&self) {
        self.entered
            .recv_timeout(Duration::from_secs(5))
            .expect("worker should reach the writer");
    }

    fn open(&self) {
        let _ = self.release.send(());
    }
}

/// Shows the crate's own diagnostics with `RUST_LOG=pooled_logger=debug`.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn async_logger(writer: impl Writer + 'static, async_cfg: AsyncConfig) -> Logger {
    init_tracing();
    Logger::new(Config::new().with_writer(writer).with_async(async_cfg)).unwrap()
}

#[test]
fn test_single_worker_preserves_order() {
    let sink = MemoryWriter::new();
    let logger = async_logger(sink.clone(), AsyncConfig::default().with_workers(1).with_queue_capacity(64));

    for i in 0..1000 {
        log_record!(logger, Level::Info, "seq {}", i);
    }
    logger.close().unwrap();

    let lines = sink.lines();
    assert_eq!(lines.len(), 1000);
    for (i, line) in lines.iter().enumerate() {
        assert!(line.ends_with(&format!("seq {}", i)), "out of order at {}: {}", i, line);
    }
}

#[test]
fn test_single_worker_orders_concurrent_producers() {
    const THREADS: usize = 6;
    const PER_THREAD: usize = 300;

    let sink = MemoryWriter::new();
    let logger = async_logger(
        sink.clone(),
        AsyncConfig::default()
            .with_workers(1)
            .with_queue_capacity(32)
            .with_enqueue(EnqueuePolicy::Block(Duration::from_secs(5))),
    );
    // Held across the enqueue, so sequence order is enqueue order
    let sequence = Arc::new(Mutex::new(0usize));

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let logger = logger.clone();
            let sequence = sequence.clone();
            thread::spawn(move || {
                for _ in 0..PER_THREAD {
                    let mut next = sequence.lock();
                    logger
                        .try_log(Level::Info, format!("producer {} seq {}", t, *next).as_str())
                        .unwrap();
                    *next += 1;
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    logger.close().unwrap();

    let seen: Vec<usize> = sink
        .lines()
        .iter()
        .map(|line| {
            line.rsplit(' ')
                .next()
                .and_then(|n| n.parse().ok())
                .expect("line ends with a sequence number")
        })
        .collect();
    assert_eq!(seen.len(), THREADS * PER_THREAD);
    assert!(seen.windows(2).all(|w| w[0] < w[1]), "Output must follow enqueue order");
}

#[test]
fn test_fail_fast_backpressure() {
    const CAPACITY: usize = 4;
    let sink = MemoryWriter::new();
    let (writer, gate) = GateWriter::new(sink.clone(), None);
    let logger = async_logger(
        writer,
        AsyncConfig::default()
            .with_workers(1)
            .with_queue_capacity(CAPACITY)
            .with_enqueue(EnqueuePolicy::FailFast),
    );

    // Task 0 occupies the only worker
    logger.try_log(Level::Info, "task 0").unwrap();
    gate.wait_entered();

    for i in 1..=CAPACITY {
        assert!(logger.try_log(Level::Info, format!("task {}", i).as_str()).is_ok());
    }
    assert_eq!(logger.stats().queued, CAPACITY);

    let overflow = logger.try_log(Level::Info, "overflow");
    assert!(matches!(overflow, Err(LogError::QueueFull)), "{:?}", overflow);
    assert!(overflow.unwrap_err().is_backpressure());
    assert_eq!(logger.stats().dropped, 1);

    gate.open();
    logger.close().unwrap();

    let lines = sink.lines();
    assert_eq!(lines.len(), CAPACITY + 1, "Every accepted record is written");
    assert!(lines.iter().all(|l| !l.contains("overflow")));
    // The rejected record went back to the pool
    assert_eq!(logger.pool_stats().in_use, 0);
}

#[test]
fn test_block_policy_times_out() {
    let sink = MemoryWriter::new();
    let (writer, gate) = GateWriter::new(sink.clone(), None);
    let timeout = Duration::from_millis(50);
    let logger = async_logger(
        writer,
        AsyncConfig::default()
            .with_workers(1)
            .with_queue_capacity(1)
            .with_enqueue(EnqueuePolicy::Block(timeout)),
    );

    logger.try_log(Level::Info, "busy").unwrap();
    gate.wait_entered();
    logger.try_log(Level::Info, "queued").unwrap();

    let start = Instant::now();
    let result = logger.try_log(Level::Info, "late");
    assert!(matches!(result, Err(LogError::QueueTimeout(t)) if t == timeout), "{:?}", result);
    assert!(start.elapsed() >= timeout);

    gate.open();
    logger.close().unwrap();
    assert_eq!(sink.lines().len(), 2);
}

#[test]
fn test_close_drains_queue() {
    const THREADS: usize = 4;
    const PER_THREAD: usize = 250;

    let sink = MemoryWriter::new();
    let logger = async_logger(
        sink.clone(),
        AsyncConfig::default()
            .with_workers(4)
            .with_queue_capacity(128)
            .with_enqueue(EnqueuePolicy::Block(Duration::from_secs(5))),
    );

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let logger = logger.clone();
            thread::spawn(move || {
                for i in 0..PER_THREAD {
                    log_record!(logger, Level::Info, "producer {} item {}", t, i);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    logger.close().unwrap();
    assert_eq!(logger.worker_state(), Some(PoolState::Closed));

    let stats = logger.stats();
    assert_eq!(sink.lines().len(), THREADS * PER_THREAD);
    assert_eq!(stats.written, (THREADS * PER_THREAD) as u64);
    assert_eq!(stats.dropped, 0);
    assert_eq!(stats.queued, 0);
    assert_eq!(logger.pool_stats().in_use, 0);

    assert!(matches!(logger.try_log(Level::Info, "after close"), Err(LogError::Closed)));
}

#[test]
fn test_drop_closes_pipeline() {
    let sink = MemoryWriter::new();
    {
        let logger = async_logger(sink.clone(), AsyncConfig::default().with_workers(2));
        for i in 0..100 {
            log_record!(logger, Level::Info, "n {}", i);
        }
    }
    assert_eq!(sink.lines().len(), 100);
}

#[test]
fn test_shutdown_deadline() {
    init_tracing();
    let sink = MemoryWriter::new();
    let (writer, gate) = GateWriter::new(sink.clone(), None);
    let logger = Logger::new(
        Config::new()
            .with_writer(writer)
            .with_close_timeout(Duration::from_millis(50))
            .with_error_handler(|_: &LogError| {})
            .with_async(AsyncConfig::default().with_workers(1).with_queue_capacity(8)),
    )
    .unwrap();

    logger.try_log(Level::Info, "stuck").unwrap();
    gate.wait_entered();
    for i in 0..4 {
        logger.try_log(Level::Info, format!("pending {}", i).as_str()).unwrap();
    }

    let result = logger.close();
    assert!(matches!(result, Err(LogError::ShutdownTimeout { pending: 4 })), "{:?}", result);
    assert_eq!(logger.stats().dropped, 4);
    assert_eq!(logger.pool_stats().in_use, 1, "Only the stuck record is still checked out");

    gate.open();
}

#[test]
fn test_task_timeout_abandons_stuck_record() {
    init_tracing();
    let sink = MemoryWriter::new();
    let (writer, gate) = GateWriter::new(sink.clone(), Some("stuck"));
    let reported = Arc::new(Mutex::new(Vec::new()));
    let reported_in_handler = reported.clone();
    let logger = Logger::new(
        Config::new()
            .with_writer(writer)
            .with_locking_disabled(true)
            .with_error_handler(move |e: &LogError| reported_in_handler.lock().push(e.to_string()))
            .with_async(
                AsyncConfig::default()
                    .with_workers(1)
                    .with_task_timeout(Duration::from_millis(50)),
            ),
    )
    .unwrap();

    logger.info("stuck");
    gate.wait_entered();
    logger.info("next");

    let deadline = Instant::now() + Duration::from_secs(5);
    while sink.lines().is_empty() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }

    let lines = sink.lines();
    assert_eq!(lines.len(), 1);
    assert!(lines[0].ends_with("next"));
    assert_eq!(logger.stats().task_timeouts, 1);
    assert!(reported.lock()[0].contains("task abandoned"));

    gate.open();
    logger.close().unwrap();
}

#[test]
fn test_invalid_async_config() {
    let zero_workers = Config::new().with_async(AsyncConfig::default().with_workers(0));
    assert!(matches!(Logger::new(zero_workers), Err(LogError::Config(_))));

    let zero_queue = Config::new().with_async(AsyncConfig::default().with_queue_capacity(0));
    assert!(matches!(Logger::new(zero_queue), Err(LogError::Config(_))));
}
