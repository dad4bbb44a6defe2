use std::sync::atomic::{AtomicU64, Ordering};

use crate::level::Level;

/// Optional pre-gate deciding whether an event proceeds at all.
///
/// Consulted before a pooled entry is acquired; returning `false` drops the
/// event at no further cost.
pub trait Sampler: Send + Sync {
    fn should_log(&self, level: Level) -> bool;
}

impl<F> Sampler for F
where
    F: Fn(Level) -> bool + Send + Sync,
{
    fn should_log(&self, level: Level) -> bool {
        self(level)
    }
}

/// Keeps one event out of every `rate`, starting with the first.
///
/// A rate of 0 or 1 keeps everything.
///
/// # Examples
///
/// ```
/// use pooled_logger::level::Level;
/// use pooled_logger::sampler::{RateSampler, Sampler};
///
/// let sampler = RateSampler::new(3);
/// let kept: Vec<bool> = (0..6).map(|_| sampler.should_log(Level::Info)).collect();
/// assert_eq!(kept, [true, false, false, true, false, false]);
/// ```
#[derive(Debug)]
pub struct RateSampler {
    rate: u64,
    counter: AtomicU64,
}

impl RateSampler {
    pub fn new(rate: u64) -> Self {
        Self {
            rate,
            counter: AtomicU64::new(0),
        }
    }

    pub fn rate(&self) -> u64 {
        self.rate
    }
}

impl Sampler for RateSampler {
    fn should_log(&self, _level: Level) -> bool {
        if self.rate <= 1 {
            return true;
        }
        self.counter.fetch_add(1, Ordering::Relaxed) % self.rate == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_one_keeps_everything() {
        let sampler = RateSampler::new(1);
        assert!((0..10).all(|_| sampler.should_log(Level::Debug)));
        let sampler = RateSampler::new(0);
        assert!((0..10).all(|_| sampler.should_log(Level::Debug)));
    }

    #[test]
    fn test_rate_is_shared_across_threads() {
        let sampler = std::sync::Arc::new(RateSampler::new(10));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let sampler = sampler.clone();
                std::thread::spawn(move || (0..250).filter(|_| sampler.should_log(Level::Info)).count())
            })
            .collect();
        let kept: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(kept, 100);
    }

    #[test]
    fn test_closure_sampler() {
        let errors_only = |level: Level| level >= Level::Error;
        assert!(!errors_only.should_log(Level::Warn));
        assert!(errors_only.should_log(Level::Error));
    }
}
