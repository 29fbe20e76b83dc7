//! Global entry budget
//!
//! Both tables draw from one counter. A slot is reserved before an entry is
//! allocated and returned when the entry is released, so the count tracks
//! live entries plus inserts in flight.

use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug)]
pub(crate) struct CapacityPool {
    used: AtomicUsize,
    max: usize,
    pressure_at: usize,
}

impl CapacityPool {
    pub(crate) fn new(max: usize, pressure_at: usize) -> Self {
        Self {
            used: AtomicUsize::new(0),
            max,
            pressure_at,
        }
    }

    /// Claim one slot; false when the pool is exhausted
    #[inline]
    pub(crate) fn try_reserve(&self) -> bool {
        self.used
            .fetch_update(Ordering::AcqRel, Ordering::Relaxed, |used| {
                (used < self.max).then_some(used + 1)
            })
            .is_ok()
    }

    #[inline]
    pub(crate) fn release(&self, n: usize) {
        if n > 0 {
            self.used.fetch_sub(n, Ordering::AcqRel);
        }
    }

    #[inline]
    pub(crate) fn used(&self) -> usize {
        self.used.load(Ordering::Relaxed)
    }

    pub(crate) fn max(&self) -> usize {
        self.max
    }

    #[inline]
    pub(crate) fn under_pressure(&self) -> bool {
        self.used() >= self.pressure_at
    }
}
