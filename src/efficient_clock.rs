//! Low-overhead wall-clock timestamps for log records.
//!
//! Reading the system clock on every event is one of the larger fixed costs
//! of a logging call. A [`Clock`] instead keeps the current time in an atomic
//! that a background thread refreshes at a fixed interval, so stamping a
//! record is a single relaxed load. Resolution is bounded by the refresh
//! interval.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;

/// Refresh interval of the process-wide clock.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_millis(1);

lazy_static! {
    static ref PROCESS_CLOCK: Clock = Clock::new(DEFAULT_REFRESH_INTERVAL);
}

/// Wall-clock instant stored as nanoseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp(u64);

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp(0);

    pub const fn from_nanos(nanos: u64) -> Self {
        Timestamp(nanos)
    }

    pub const fn as_nanos(self) -> u64 {
        self.0
    }

    pub fn now() -> Self {
        Timestamp(system_nanos())
    }

    pub fn as_system_time(self) -> SystemTime {
        UNIX_EPOCH + Duration::from_nanos(self.0)
    }

    pub fn to_datetime(self) -> DateTime<Utc> {
        DateTime::<Utc>::from(self.as_system_time())
    }
}

#[derive(Debug)]
struct ClockState {
    now: AtomicU64,
}

impl ClockState {
    fn refresh(&self) {
        self.now.store(system_nanos(), Ordering::Relaxed);
    }
}

/// Periodically refreshed timestamp source.
///
/// # Examples
///
/// ```
/// # use pooled_logger::efficient_clock::Clock;
/// # use std::time::Duration;
/// let clock = Clock::new(Duration::from_millis(5));
/// let first = clock.now();
/// std::thread::sleep(Duration::from_millis(20));
/// assert!(clock.now() > first);
/// ```
#[derive(Debug)]
pub struct Clock {
    state: Arc<ClockState>,
    interval: Duration,
    refreshed: bool,
}

impl Clock {
    /// Creates a clock refreshed every `interval` by a detached background thread.
    ///
    /// The refresher holds only a weak reference and exits once the clock is
    /// dropped. A zero interval, or a failure to spawn the refresher, yields a
    /// precise clock that reads the system time on every call.
    pub fn new(interval: Duration) -> Self {
        let state = Arc::new(ClockState {
            now: AtomicU64::new(system_nanos()),
        });
        if interval.is_zero() {
            return Self { state, interval, refreshed: false };
        }

        let weak: Weak<ClockState> = Arc::downgrade(&state);
        let spawned = thread::Builder::new()
            .name("log-clock".to_string())
            .spawn(move || {
                while let Some(state) = weak.upgrade() {
                    state.refresh();
                    drop(state);
                    thread::sleep(interval);
                }
            });

        let refreshed = match spawned {
            Ok(_) => true,
            Err(e) => {
                tracing::debug!(error = %e, "clock refresher unavailable, falling back to precise clock");
                false
            }
        };
        Self { state, interval, refreshed }
    }

    /// A clock that reads the system time on every call.
    pub fn precise() -> Self {
        Self::new(Duration::ZERO)
    }

    /// The shared process-wide clock.
    pub fn process() -> &'static Clock {
        &PROCESS_CLOCK
    }

    #[inline(always)]
    pub fn now(&self) -> Timestamp {
        if self.refreshed {
            Timestamp(self.state.now.load(Ordering::Relaxed))
        } else {
            Timestamp::now()
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_refreshed(&self) -> bool {
        self.refreshed
    }
}

fn system_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}
