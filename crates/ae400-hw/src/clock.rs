//! Host monotonic clock.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// Source of host time in nanoseconds.
pub trait HostClock: Send {
    fn now_ns(&self) -> i64;
}

/// `CLOCK_MONOTONIC`, the time base every published stamp is expressed in.
#[derive(Debug, Clone, Copy, Default)]
pub struct MonotonicClock;

impl HostClock for MonotonicClock {
    fn now_ns(&self) -> i64 {
        let mut ts = libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };
        // SAFETY: `ts` is a valid, writable timespec for the duration of the call.
        let ret = unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) };
        debug_assert_eq!(ret, 0, "CLOCK_MONOTONIC is always available on Linux");
        ts.tv_sec as i64 * 1_000_000_000 + ts.tv_nsec as i64
    }
}

/// Externally driven clock for replays and tests.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicI64>,
}

impl ManualClock {
    pub fn new(start_ns: i64) -> Self {
        Self {
            now: Arc::new(AtomicI64::new(start_ns)),
        }
    }

    pub fn set(&self, now_ns: i64) {
        self.now.store(now_ns, Ordering::SeqCst);
    }

    pub fn advance(&self, delta_ns: i64) {
        self.now.fetch_add(delta_ns, Ordering::SeqCst);
    }
}

impl HostClock for ManualClock {
    fn now_ns(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}
