//! Concurrency limiter: bounds in-flight events, not threads.
//!
//! At most `max_concurrency` events may be inside the pipeline body at any
//! instant; additional producers block in `acquire` until a permit frees.
//! This is the backpressure point, and it is deliberately distinct from
//! pool sizing: far more events than pool threads can be in flight when
//! stages are themselves handed off.

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

#[derive(Debug)]
struct LimiterInner {
    max: usize,
    in_flight: Mutex<usize>,
    released: Condvar,
}

/// Counting semaphore with RAII permits.
#[derive(Clone, Debug)]
pub struct ConcurrencyLimiter {
    inner: Arc<LimiterInner>,
}

impl ConcurrencyLimiter {
    /// Create a limiter allowing `max_concurrency` concurrent events.
    pub fn new(max_concurrency: usize) -> Self {
        Self {
            inner: Arc::new(LimiterInner {
                max: max_concurrency.max(1),
                in_flight: Mutex::new(0),
                released: Condvar::new(),
            }),
        }
    }

    /// Configured bound.
    pub fn max_concurrency(&self) -> usize {
        self.inner.max
    }

    /// Events currently holding a permit.
    pub fn in_flight(&self) -> usize {
        *self.inner.in_flight.lock()
    }

    /// Block until a permit is available.
    pub fn acquire(&self) -> Permit {
        let mut in_flight = self.inner.in_flight.lock();
        while *in_flight >= self.inner.max {
            self.inner.released.wait(&mut in_flight);
        }
        *in_flight += 1;
        Permit {
            inner: self.inner.clone(),
        }
    }

    /// Take a permit only if one is immediately available.
    pub fn try_acquire(&self) -> Option<Permit> {
        let mut in_flight = self.inner.in_flight.lock();
        if *in_flight >= self.inner.max {
            return None;
        }
        *in_flight += 1;
        Some(Permit {
            inner: self.inner.clone(),
        })
    }
}

/// Releases its slot back to the limiter when dropped.
pub struct Permit {
    inner: Arc<LimiterInner>,
}

impl Drop for Permit {
    fn drop(&mut self) {
        let mut in_flight = self.inner.in_flight.lock();
        *in_flight -= 1;
        drop(in_flight);
        self.inner.released.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_permits_bound_concurrency() {
        let limiter = ConcurrencyLimiter::new(2);

        let first = limiter.acquire();
        let second = limiter.acquire();
        assert_eq!(limiter.in_flight(), 2);
        assert!(limiter.try_acquire().is_none());

        drop(first);
        assert!(limiter.try_acquire().is_some());
        drop(second);
        assert_eq!(limiter.in_flight(), 0);
    }

    #[test]
    fn test_acquire_blocks_until_release() {
        let limiter = ConcurrencyLimiter::new(1);
        let permit = limiter.acquire();

        let observed_peak = Arc::new(AtomicUsize::new(0));
        let peak = observed_peak.clone();
        let limiter_clone = limiter.clone();
        let waiter = std::thread::spawn(move || {
            let _p = limiter_clone.acquire();
            peak.store(limiter_clone.in_flight(), Ordering::SeqCst);
        });

        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(limiter.in_flight(), 1, "waiter must still be blocked");
        drop(permit);

        waiter.join().unwrap();
        assert_eq!(observed_peak.load(Ordering::SeqCst), 1);
        assert_eq!(limiter.in_flight(), 0);
    }

    #[test]
    fn test_many_threads_never_exceed_bound() {
        const BOUND: usize = 4;
        let limiter = ConcurrencyLimiter::new(BOUND);
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let limiter = limiter.clone();
            let active = active.clone();
            let peak = peak.clone();
            handles.push(std::thread::spawn(move || {
                let _permit = limiter.acquire();
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(2));
                active.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= BOUND);
    }
}
