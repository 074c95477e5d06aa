//! Wait strategies for ring-buffer subscribers.
//!
//! A wait strategy governs what a consumer does when no slot is ready: burn
//! CPU for the lowest latency, or progressively back off towards a condvar
//! park. Each strategy is a pure latency/CPU tradeoff and is selectable by
//! name in configuration.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};

/// Spins before a strategy starts yielding or parking.
const SPIN_LIMIT: u32 = 128;

/// Yields before `phased` falls back to a condvar park.
const YIELD_LIMIT: u32 = 64;

/// Upper bound on the `sleeping` strategy's backoff nap.
const MAX_SLEEP: Duration = Duration::from_millis(1);

/// Bounded condvar wait so a missed signal can never hang a consumer.
const LITE_WAIT: Duration = Duration::from_millis(1);

/// What a ring subscriber does while the buffer is empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitStrategy {
    /// Park on a condvar until a producer signals. Lowest CPU, wake-up
    /// latency bounded by the signal path.
    Blocking,

    /// Spin briefly, then park with a bounded timeout. Producers only
    /// signal when a waiter is registered, keeping the publish path cheap.
    #[serde(alias = "liteBlocking")]
    LiteBlocking,

    /// Spin, yield, then sleep with exponential backoff up to 1ms.
    Sleeping,

    /// Busy-spin without ever blocking. Lowest latency, one core pinned
    /// at 100%.
    #[serde(alias = "busySpin")]
    BusySpin,

    /// Spin briefly, then `thread::yield_now` in a loop.
    Yielding,

    /// Short fixed parks between polls, no producer signalling.
    Parking,

    /// Spin window, yield window, then fall back to a condvar park.
    Phased,
}

impl WaitStrategy {
    /// All strategy names accepted in configuration.
    pub const NAMES: [&'static str; 7] = [
        "blocking",
        "lite_blocking",
        "sleeping",
        "busy_spin",
        "yielding",
        "parking",
        "phased",
    ];

    /// Whether producers must signal the monitor after publishing.
    /// Strategies that never park skip the signal entirely.
    pub fn needs_signal(&self) -> bool {
        matches!(
            self,
            WaitStrategy::Blocking | WaitStrategy::LiteBlocking | WaitStrategy::Phased
        )
    }

    /// Block the calling thread until `ready()` returns true.
    ///
    /// `ready` must become true eventually (publish, shutdown flag); the
    /// monitor is shared with producers for the signalling strategies.
    pub fn wait_for<F: Fn() -> bool>(&self, monitor: &RingMonitor, ready: F) {
        match self {
            WaitStrategy::BusySpin => {
                while !ready() {
                    core::hint::spin_loop();
                }
            }
            WaitStrategy::Yielding => {
                let mut spins = 0u32;
                while !ready() {
                    if spins < SPIN_LIMIT {
                        spins += 1;
                        core::hint::spin_loop();
                    } else {
                        std::thread::yield_now();
                    }
                }
            }
            WaitStrategy::Sleeping => {
                let mut spins = 0u32;
                let mut nap = Duration::from_micros(1);
                while !ready() {
                    if spins < SPIN_LIMIT {
                        spins += 1;
                        core::hint::spin_loop();
                    } else if spins < SPIN_LIMIT + YIELD_LIMIT {
                        spins += 1;
                        std::thread::yield_now();
                    } else {
                        std::thread::sleep(nap);
                        nap = (nap * 2).min(MAX_SLEEP);
                    }
                }
            }
            WaitStrategy::Parking => {
                while !ready() {
                    std::thread::park_timeout(Duration::from_micros(100));
                }
            }
            WaitStrategy::Blocking => {
                while !ready() {
                    monitor.wait(&ready, None);
                }
            }
            WaitStrategy::LiteBlocking => {
                let mut spins = 0u32;
                while !ready() {
                    if spins < SPIN_LIMIT {
                        spins += 1;
                        core::hint::spin_loop();
                    } else {
                        monitor.wait(&ready, Some(LITE_WAIT));
                    }
                }
            }
            WaitStrategy::Phased => {
                let mut spins = 0u32;
                while !ready() {
                    if spins < SPIN_LIMIT {
                        spins += 1;
                        core::hint::spin_loop();
                    } else if spins < SPIN_LIMIT + YIELD_LIMIT {
                        spins += 1;
                        std::thread::yield_now();
                    } else {
                        monitor.wait(&ready, None);
                    }
                }
            }
        }
    }
}

impl Default for WaitStrategy {
    fn default() -> Self {
        WaitStrategy::LiteBlocking
    }
}

impl fmt::Display for WaitStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WaitStrategy::Blocking => "blocking",
            WaitStrategy::LiteBlocking => "lite_blocking",
            WaitStrategy::Sleeping => "sleeping",
            WaitStrategy::BusySpin => "busy_spin",
            WaitStrategy::Yielding => "yielding",
            WaitStrategy::Parking => "parking",
            WaitStrategy::Phased => "phased",
        };
        f.write_str(name)
    }
}

impl FromStr for WaitStrategy {
    type Err = UnknownWaitStrategy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "blocking" => Ok(WaitStrategy::Blocking),
            "lite_blocking" | "liteBlocking" => Ok(WaitStrategy::LiteBlocking),
            "sleeping" => Ok(WaitStrategy::Sleeping),
            "busy_spin" | "busySpin" => Ok(WaitStrategy::BusySpin),
            "yielding" => Ok(WaitStrategy::Yielding),
            "parking" => Ok(WaitStrategy::Parking),
            "phased" => Ok(WaitStrategy::Phased),
            other => Err(UnknownWaitStrategy(other.to_string())),
        }
    }
}

/// Unknown wait strategy name in configuration
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
#[error("Unknown wait strategy '{0}' (expected one of: blocking, lite_blocking, sleeping, busy_spin, yielding, parking, phased)")]
pub struct UnknownWaitStrategy(pub String);

/// Shared signalling state between ring producers and parked subscribers.
///
/// Producers publish first, then signal. A waiter registers itself before
/// re-checking `ready` under the monitor lock, so a signal sent between the
/// caller's poll and the wait cannot be lost.
pub struct RingMonitor {
    waiters: AtomicUsize,
    lock: Mutex<()>,
    condvar: Condvar,
}

impl RingMonitor {
    pub fn new() -> Self {
        Self {
            waiters: AtomicUsize::new(0),
            lock: Mutex::new(()),
            condvar: Condvar::new(),
        }
    }

    /// Wake all parked waiters, if any. Cheap when nobody is parked.
    pub fn signal(&self) {
        if self.waiters.load(Ordering::Acquire) > 0 {
            let _guard = self.lock.lock();
            self.condvar.notify_all();
        }
    }

    /// Park until signalled (or `timeout`), re-checking `ready` under the
    /// lock first.
    fn wait<F: Fn() -> bool>(&self, ready: &F, timeout: Option<Duration>) {
        self.waiters.fetch_add(1, Ordering::SeqCst);
        let mut guard = self.lock.lock();
        if !ready() {
            match timeout {
                Some(t) => {
                    self.condvar.wait_for(&mut guard, t);
                }
                None => self.condvar.wait(&mut guard),
            }
        }
        drop(guard);
        self.waiters.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Default for RingMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    #[test]
    fn test_all_names_parse() {
        for name in WaitStrategy::NAMES {
            let strategy: WaitStrategy = name.parse().unwrap();
            assert_eq!(strategy.to_string(), name);
        }
    }

    #[test]
    fn test_camel_case_aliases_parse() {
        assert_eq!(
            "liteBlocking".parse::<WaitStrategy>().unwrap(),
            WaitStrategy::LiteBlocking
        );
        assert_eq!(
            "busySpin".parse::<WaitStrategy>().unwrap(),
            WaitStrategy::BusySpin
        );
    }

    #[test]
    fn test_unknown_name_is_rejected() {
        let err = "spinning".parse::<WaitStrategy>().unwrap_err();
        assert!(err.to_string().contains("spinning"));
    }

    #[test]
    fn test_needs_signal() {
        assert!(WaitStrategy::Blocking.needs_signal());
        assert!(WaitStrategy::LiteBlocking.needs_signal());
        assert!(WaitStrategy::Phased.needs_signal());
        assert!(!WaitStrategy::BusySpin.needs_signal());
        assert!(!WaitStrategy::Sleeping.needs_signal());
    }

    #[test]
    fn test_blocking_wait_wakes_on_signal() {
        let monitor = Arc::new(RingMonitor::new());
        let flag = Arc::new(AtomicBool::new(false));

        let m = monitor.clone();
        let f = flag.clone();
        let waiter = std::thread::spawn(move || {
            WaitStrategy::Blocking.wait_for(&m, || f.load(Ordering::Acquire));
        });

        std::thread::sleep(Duration::from_millis(20));
        flag.store(true, Ordering::Release);
        monitor.signal();
        waiter.join().unwrap();
    }

    #[test]
    fn test_nonblocking_strategies_observe_ready() {
        for strategy in [
            WaitStrategy::BusySpin,
            WaitStrategy::Yielding,
            WaitStrategy::Sleeping,
            WaitStrategy::Parking,
            WaitStrategy::LiteBlocking,
            WaitStrategy::Phased,
        ] {
            let monitor = Arc::new(RingMonitor::new());
            let flag = Arc::new(AtomicBool::new(false));

            let m = monitor.clone();
            let f = flag.clone();
            let waiter =
                std::thread::spawn(move || strategy.wait_for(&m, || f.load(Ordering::Acquire)));

            std::thread::sleep(Duration::from_millis(5));
            flag.store(true, Ordering::Release);
            monitor.signal();
            waiter.join().unwrap();
        }
    }

    #[test]
    fn test_serde_round_trip() {
        let strategy: WaitStrategy = serde_json::from_str("\"busySpin\"").unwrap();
        assert_eq!(strategy, WaitStrategy::BusySpin);
        let strategy: WaitStrategy = serde_json::from_str("\"lite_blocking\"").unwrap();
        assert_eq!(strategy, WaitStrategy::LiteBlocking);
    }
}
