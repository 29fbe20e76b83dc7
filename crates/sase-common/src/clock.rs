//! Time sources for flow aging
//!
//! The cache never reads the wall clock directly; it asks a [`Clock`]. Production
//! code uses [`MonotonicClock`], tests drive a [`ManualClock`] by hand.

use crate::Timestamp;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Source of monotonic timestamps
pub trait Clock: Send + Sync + fmt::Debug {
    /// Current time
    fn now(&self) -> Timestamp;
}

/// Clock backed by [`Instant`], counting from its construction
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    /// Start a clock at zero
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    #[inline]
    fn now(&self) -> Timestamp {
        let nanos = u64::try_from(self.origin.elapsed().as_nanos()).unwrap_or(u64::MAX);
        Timestamp::from_nanos(nanos)
    }
}

/// Hand-driven clock
#[derive(Debug, Default)]
pub struct ManualClock {
    nanos: AtomicU64,
}

impl ManualClock {
    /// Clock stopped at zero
    pub const fn new() -> Self {
        Self {
            nanos: AtomicU64::new(0),
        }
    }

    /// Clock stopped at `ts`
    pub const fn at(ts: Timestamp) -> Self {
        Self {
            nanos: AtomicU64::new(ts.as_nanos()),
        }
    }

    /// Jump to an absolute time
    pub fn set(&self, ts: Timestamp) {
        self.nanos.store(ts.as_nanos(), Ordering::Release);
    }

    /// Jump to an absolute time in whole seconds
    pub fn set_secs(&self, secs: u64) {
        self.set(Timestamp::from_secs(secs));
    }

    /// Move forward by `d`
    pub fn advance(&self, d: Duration) {
        let nanos = u64::try_from(d.as_nanos()).unwrap_or(u64::MAX);
        self.nanos.fetch_add(nanos, Ordering::AcqRel);
    }
}

impl Clock for ManualClock {
    #[inline]
    fn now(&self) -> Timestamp {
        Timestamp::from_nanos(self.nanos.load(Ordering::Acquire))
    }
}
