//! Bounded queue plus worker threads for asynchronous dispatch.
//!
//! Lifecycle: `Open -> Draining -> Closed`. While open, [`WorkerPool::enqueue`]
//! moves a pooled entry into the queue. [`WorkerPool::close`] drops the only
//! sender, so workers finish whatever is queued and then see a disconnected
//! channel and exit. Tasks are taken off the queue in FIFO order; with more
//! than one worker their completion order is not guaranteed.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{
    bounded, unbounded, Receiver, RecvTimeoutError, SendTimeoutError, Sender, TrySendError,
};
use parking_lot::{Mutex, RwLock};

use crate::config::{AsyncConfig, EnqueuePolicy};
use crate::dispatch::{Counters, Dispatcher};
use crate::error::LogError;
use crate::pool::Pooled;
use crate::record::Entry;

const OPEN: u8 = 0;
const DRAINING: u8 = 1;
const CLOSED: u8 = 2;

/// Lifecycle state of a [`WorkerPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    Open,
    Draining,
    Closed,
}

/// One queued record. Owns its pooled entry; dropping the task releases it.
pub(crate) struct DispatchTask(Pooled<Entry>);

pub(crate) struct WorkerPool {
    state: AtomicU8,
    sender: RwLock<Option<Sender<DispatchTask>>>,
    /// Kept to discard leftovers when the shutdown deadline elapses.
    receiver: Receiver<DispatchTask>,
    exits: Receiver<usize>,
    handles: Mutex<Vec<Option<JoinHandle<()>>>>,
    enqueue: EnqueuePolicy,
    dispatcher: Arc<Dispatcher>,
}

impl WorkerPool {
    pub(crate) fn start(config: &AsyncConfig, dispatcher: Arc<Dispatcher>) -> Result<Self, LogError> {
        let (tx, rx) = bounded(config.queue_capacity);
        let (exit_tx, exit_rx) = unbounded();

        let mut handles = Vec::with_capacity(config.workers);
        for index in 0..config.workers {
            let worker = Worker {
                index,
                queue: rx.clone(),
                dispatcher: Arc::clone(&dispatcher),
                task_timeout: config.task_timeout,
                exit: ExitSignal {
                    index,
                    tx: exit_tx.clone(),
                },
            };
            let spawned = thread::Builder::new()
                .name(format!("log-worker-{}", index))
                .spawn(move || worker.run());
            match spawned {
                Ok(handle) => handles.push(Some(handle)),
                Err(e) => {
                    // Disconnect the queue so the workers already running exit.
                    drop(tx);
                    for handle in handles.into_iter().flatten() {
                        let _ = handle.join();
                    }
                    return Err(LogError::Spawn(e));
                }
            }
        }
        tracing::debug!(
            workers = config.workers,
            queue_capacity = config.queue_capacity,
            "log worker pool started"
        );

        Ok(Self {
            state: AtomicU8::new(OPEN),
            sender: RwLock::new(Some(tx)),
            receiver: rx,
            exits: exit_rx,
            handles: Mutex::new(handles),
            enqueue: config.enqueue,
            dispatcher,
        })
    }

    pub(crate) fn state(&self) -> PoolState {
        match self.state.load(Ordering::Acquire) {
            OPEN => PoolState::Open,
            DRAINING => PoolState::Draining,
            _ => PoolState::Closed,
        }
    }

    pub(crate) fn queued(&self) -> usize {
        self.receiver.len()
    }

    /// Moves the entry into the queue.
    ///
    /// On failure the entry is released here and never reaches a worker.
    pub(crate) fn enqueue(&self, entry: Pooled<Entry>) -> Result<(), LogError> {
        let sender = self.sender.read();
        let tx = sender.as_ref().ok_or(LogError::Closed)?;
        let task = DispatchTask(entry);

        match self.enqueue {
            EnqueuePolicy::FailFast => tx.try_send(task).map_err(|e| match e {
                TrySendError::Full(_) => LogError::QueueFull,
                TrySendError::Disconnected(_) => LogError::Closed,
            }),
            EnqueuePolicy::Block(timeout) => tx.send_timeout(task, timeout).map_err(|e| match e {
                SendTimeoutError::Timeout(_) => LogError::QueueTimeout(timeout),
                SendTimeoutError::Disconnected(_) => LogError::Closed,
            }),
        }
    }

    /// Stops accepting tasks and waits up to `timeout` for the queue to drain.
    ///
    /// Workers that exit in time are joined. If the deadline passes first, the
    /// records still queued are released unwritten and `ShutdownTimeout` is
    /// returned; stuck workers are left detached. Calling `close` again is a no-op.
    pub(crate) fn close(&self, timeout: Duration) -> Result<(), LogError> {
        if self
            .state
            .compare_exchange(OPEN, DRAINING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(());
        }
        tracing::debug!(queued = self.queued(), "draining log worker pool");

        // Blocked producers hold the read lock for at most their enqueue timeout.
        drop(self.sender.write().take());

        let deadline = Instant::now() + timeout;
        let mut handles = self.handles.lock();
        let mut running = handles.iter().filter(|h| h.is_some()).count();
        while running > 0 {
            match self.exits.recv_deadline(deadline) {
                Ok(index) => {
                    if let Some(handle) = handles.get_mut(index).and_then(Option::take) {
                        if handle.join().is_err() {
                            tracing::warn!(worker = index, "log worker panicked");
                        }
                    }
                    running -= 1;
                }
                Err(_) => break,
            }
        }

        let result = if running == 0 {
            Ok(())
        } else {
            let mut pending = 0;
            while let Ok(task) = self.receiver.try_recv() {
                drop(task);
                pending += 1;
            }
            for _ in 0..pending {
                Counters::bump(&self.dispatcher.counters.dropped);
            }
            tracing::debug!(stuck = running, pending, "log worker pool shutdown deadline elapsed");
            Err(LogError::ShutdownTimeout { pending })
        };

        self.state.store(CLOSED, Ordering::Release);
        result
    }
}

/// Tells the pool a worker has exited, including when it unwinds.
struct ExitSignal {
    index: usize,
    tx: Sender<usize>,
}

impl Drop for ExitSignal {
    fn drop(&mut self) {
        let _ = self.tx.send(self.index);
    }
}

struct Worker {
    index: usize,
    queue: Receiver<DispatchTask>,
    dispatcher: Arc<Dispatcher>,
    task_timeout: Option<Duration>,
    exit: ExitSignal,
}

impl Worker {
    fn run(self) {
        tracing::debug!(worker = self.index, "log worker started");
        match self.task_timeout {
            None => {
                for DispatchTask(entry) in self.queue.iter() {
                    self.dispatcher.dispatch(entry);
                }
            }
            Some(timeout) => self.run_with_timeout(timeout),
        }
        tracing::debug!(worker = self.index, "log worker exiting");
        drop(self.exit);
    }

    /// Hands each task to an executor thread and waits at most `timeout` for it.
    ///
    /// An executor that overruns is abandoned: it keeps the task, releases it
    /// whenever the stuck call returns, and then exits. The next task gets a
    /// fresh executor.
    fn run_with_timeout(&self, timeout: Duration) {
        let mut executor: Option<Executor> = None;
        let mut generation = 0usize;

        for task in self.queue.iter() {
            if executor.is_none() {
                match Executor::spawn(self.index, generation, Arc::clone(&self.dispatcher)) {
                    Ok(spawned) => executor = Some(spawned),
                    Err(e) => {
                        self.dispatcher.reporter.report(&e);
                        self.dispatcher.dispatch(task.0);
                        continue;
                    }
                }
                generation += 1;
            }
            let Some(exec) = executor.as_ref() else {
                continue;
            };

            if let Err(returned) = exec.jobs.send(task) {
                // Executor thread is gone; run this one inline.
                executor = None;
                self.dispatcher.dispatch(returned.into_inner().0);
                continue;
            }

            match exec.done.recv_timeout(timeout) {
                Ok(()) => {}
                Err(RecvTimeoutError::Timeout) => {
                    tracing::debug!(worker = self.index, ?timeout, "abandoning stuck log task");
                    Counters::bump(&self.dispatcher.counters.task_timeouts);
                    self.dispatcher.reporter.report(&LogError::TaskTimeout(timeout));
                    executor = None;
                }
                Err(RecvTimeoutError::Disconnected) => executor = None,
            }
        }
    }
}

struct Executor {
    jobs: Sender<DispatchTask>,
    done: Receiver<()>,
}

impl Executor {
    fn spawn(worker: usize, generation: usize, dispatcher: Arc<Dispatcher>) -> Result<Self, LogError> {
        let (jobs_tx, jobs_rx) = bounded::<DispatchTask>(1);
        let (done_tx, done_rx) = bounded::<()>(1);
        thread::Builder::new()
            .name(format!("log-worker-{}-exec-{}", worker, generation))
            .spawn(move || {
                for DispatchTask(entry) in jobs_rx.iter() {
                    dispatcher.dispatch(entry);
                    if done_tx.send(()).is_err() {
                        break;
                    }
                }
            })
            .map_err(LogError::Spawn)?;
        Ok(Self {
            jobs: jobs_tx,
            done: done_rx,
        })
    }
}
