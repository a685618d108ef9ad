// src/utils/time.rs
//! Injectable wall-clock source
//!
//! The scheduler's drain interval, the FOTA throttles, and the config
//! nonce fallback all measure wall-clock time. They read it through the
//! `Clock` trait so tests can step time by hand instead of sleeping.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const NANOS_PER_MILLI: u64 = 1_000_000;

/// Wall-clock time as nanoseconds since the Unix epoch
pub trait Clock: Send + Sync {
    fn now_nanos(&self) -> u64;

    fn now_millis(&self) -> u64 {
        self.now_nanos() / NANOS_PER_MILLI
    }
}

/// The real system clock
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_nanos(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_nanos() as u64)
            .unwrap_or(0)
    }
}

/// A clock that only moves when told to.
///
/// Starts at a fixed offset from the epoch and advances in explicit
/// steps, so interval logic can be exercised without real sleeps.
pub struct ManualClock {
    nanos: AtomicU64,
}

impl ManualClock {
    pub fn starting_at(offset: Duration) -> Self {
        Self {
            nanos: AtomicU64::new(offset.as_nanos() as u64),
        }
    }

    /// Step the clock forward
    pub fn advance(&self, step: Duration) {
        self.nanos
            .fetch_add(step.as_nanos() as u64, Ordering::Relaxed);
    }
}

impl Clock for ManualClock {
    fn now_nanos(&self) -> u64 {
        self.nanos.load(Ordering::Relaxed)
    }
}
