//! Bounded store of reusable values handed out under exclusive ownership.
//!
//! [`Pool::acquire`] moves a value out of the free list into a [`Pooled`]
//! token. Whoever holds the token owns the value; the token can be moved
//! across threads (for example into the async queue) but never copied.
//! Dropping the token resets the value and returns it to the free list, so
//! a value cannot be used after release and cannot be released twice.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::LogError;

/// Values that can be returned to an empty state for reuse.
pub trait Reusable: Default + Send + 'static {
    /// Clears contents without giving back allocated capacity.
    fn reset(&mut self);
}

impl Reusable for Vec<u8> {
    fn reset(&mut self) {
        self.clear();
    }
}

/// What [`Pool::acquire`] does when every preallocated value is in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exhaustion {
    /// Allocate a fresh value. Surplus values are discarded on release so the
    /// pool never holds more than its capacity.
    Allocate,
    /// Wait up to the given duration for a release, then fail.
    Block(Duration),
    /// Fail immediately with [`LogError::PoolExhausted`].
    Fail,
}

/// Counters describing pool usage since creation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub capacity: usize,
    pub available: usize,
    pub in_use: usize,
    pub acquired: u64,
    pub allocated: u64,
    pub released: u64,
    pub discarded: u64,
}

struct Shared<T> {
    free: Mutex<Vec<Box<T>>>,
    returned: Condvar,
    capacity: usize,
    exhaustion: Exhaustion,
    in_use: AtomicUsize,
    acquired: AtomicU64,
    allocated: AtomicU64,
    released: AtomicU64,
    discarded: AtomicU64,
}

impl<T: Reusable> Shared<T> {
    fn put_back(&self, mut item: Box<T>) {
        item.reset();
        self.in_use.fetch_sub(1, Ordering::AcqRel);
        self.released.fetch_add(1, Ordering::Relaxed);

        let mut free = self.free.lock();
        if free.len() < self.capacity {
            free.push(item);
            drop(free);
            self.returned.notify_one();
        } else {
            drop(free);
            self.discarded.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Shared handle to a pool. Cloning is cheap and yields a handle to the same pool.
pub struct Pool<T: Reusable> {
    shared: Arc<Shared<T>>,
}

impl<T: Reusable> Clone for Pool<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Reusable> Pool<T> {
    /// Creates a pool with `capacity` preallocated values.
    pub fn new(capacity: usize, exhaustion: Exhaustion) -> Self {
        let free: Vec<Box<T>> = (0..capacity).map(|_| Box::<T>::default()).collect();
        Self {
            shared: Arc::new(Shared {
                free: Mutex::new(free),
                returned: Condvar::new(),
                capacity,
                exhaustion,
                in_use: AtomicUsize::new(0),
                acquired: AtomicU64::new(0),
                allocated: AtomicU64::new(0),
                released: AtomicU64::new(0),
                discarded: AtomicU64::new(0),
            }),
        }
    }

    /// Takes exclusive ownership of an empty value.
    pub fn acquire(&self) -> Result<Pooled<T>, LogError> {
        let shared = &self.shared;
        let mut free = shared.free.lock();

        let item = match free.pop() {
            Some(item) => item,
            None => match shared.exhaustion {
                Exhaustion::Allocate => {
                    drop(free);
                    shared.allocated.fetch_add(1, Ordering::Relaxed);
                    Box::<T>::default()
                }
                Exhaustion::Fail => return Err(LogError::PoolExhausted),
                Exhaustion::Block(timeout) => {
                    let deadline = Instant::now() + timeout;
                    loop {
                        if let Some(item) = free.pop() {
                            break item;
                        }
                        if shared.returned.wait_until(&mut free, deadline).timed_out() {
                            match free.pop() {
                                Some(item) => break item,
                                None => return Err(LogError::PoolExhausted),
                            }
                        }
                    }
                }
            },
        };

        shared.in_use.fetch_add(1, Ordering::AcqRel);
        shared.acquired.fetch_add(1, Ordering::Relaxed);
        Ok(Pooled {
            item: Some(item),
            shared: Arc::clone(shared),
        })
    }

    /// Returns a value to the pool. Equivalent to dropping the token.
    pub fn release(&self, item: Pooled<T>) {
        drop(item);
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    pub fn exhaustion(&self) -> Exhaustion {
        self.shared.exhaustion
    }

    pub fn stats(&self) -> PoolStats {
        let shared = &self.shared;
        PoolStats {
            capacity: shared.capacity,
            available: shared.free.lock().len(),
            in_use: shared.in_use.load(Ordering::Acquire),
            acquired: shared.acquired.load(Ordering::Relaxed),
            allocated: shared.allocated.load(Ordering::Relaxed),
            released: shared.released.load(Ordering::Relaxed),
            discarded: shared.discarded.load(Ordering::Relaxed),
        }
    }
}

impl<T: Reusable> fmt::Debug for Pool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool").field("stats", &self.stats()).finish()
    }
}

/// Exclusive ownership of one pooled value. Dropping it releases the value.
pub struct Pooled<T: Reusable> {
    item: Option<Box<T>>,
    shared: Arc<Shared<T>>,
}

impl<T: Reusable> Deref for Pooled<T> {
    type Target = T;

    fn deref(&self) -> &T {
        // `item` is only taken in `drop`.
        self.item.as_deref().unwrap_or_else(|| unreachable!())
    }
}

impl<T: Reusable> DerefMut for Pooled<T> {
    fn deref_mut(&mut self) -> &mut T {
        self.item.as_deref_mut().unwrap_or_else(|| unreachable!())
    }
}

impl<T: Reusable> Drop for Pooled<T> {
    fn drop(&mut self) {
        if let Some(item) = self.item.take() {
            self.shared.put_back(item);
        }
    }
}

impl<T: Reusable + fmt::Debug> fmt::Debug for Pooled<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Pooled").field(&**self).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_returns_empty_value() {
        let pool: Pool<Vec<u8>> = Pool::new(1, Exhaustion::Fail);
        {
            let mut buf = pool.acquire().unwrap();
            buf.extend_from_slice(b"dirty");
        }
        let buf = pool.acquire().unwrap();
        assert!(buf.is_empty());
        assert!(buf.capacity() >= 5, "capacity should be kept across reuse");
    }

    #[test]
    fn test_fail_policy() {
        let pool: Pool<Vec<u8>> = Pool::new(1, Exhaustion::Fail);
        let held = pool.acquire().unwrap();
        assert!(matches!(pool.acquire(), Err(LogError::PoolExhausted)));
        pool.release(held);
        assert!(pool.acquire().is_ok());
    }

    #[test]
    fn test_allocate_policy_discards_surplus() {
        let pool: Pool<Vec<u8>> = Pool::new(1, Exhaustion::Allocate);
        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        assert_eq!(pool.stats().allocated, 1);
        assert_eq!(pool.stats().in_use, 2);

        drop(a);
        drop(b);
        let stats = pool.stats();
        assert_eq!(stats.available, 1);
        assert_eq!(stats.discarded, 1);
        assert_eq!(stats.in_use, 0);
    }

    #[test]
    fn test_block_policy_times_out() {
        let pool: Pool<Vec<u8>> = Pool::new(1, Exhaustion::Block(Duration::from_millis(20)));
        let _held = pool.acquire().unwrap();
        let start = Instant::now();
        assert!(matches!(pool.acquire(), Err(LogError::PoolExhausted)));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_block_policy_wakes_on_release() {
        let pool: Pool<Vec<u8>> = Pool::new(1, Exhaustion::Block(Duration::from_secs(5)));
        let held = pool.acquire().unwrap();
        let other = pool.clone();
        let waiter = std::thread::spawn(move || other.acquire().is_ok());
        std::thread::sleep(Duration::from_millis(20));
        drop(held);
        assert!(waiter.join().unwrap());
    }
}
