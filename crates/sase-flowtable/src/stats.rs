//! Flow Cache Statistics
//!
//! Relaxed per-shard counters. Each shard owns its block, so the hot path
//! never writes a cache line another worker reads.

use crate::entry::EvictReason;
use crate::error::Uncached;
use sase_common::AtomicCounter;
use std::time::Duration;

/// Per-shard counters (cache-line aligned)
#[repr(C, align(64))]
#[derive(Debug, Default)]
pub struct ShardStats {
    pub lookups: AtomicCounter,
    pub hits: AtomicCounter,
    pub misses: AtomicCounter,
    pub inserts: AtomicCounter,
    pub duplicates: AtomicCounter,
    pub uncachable: AtomicCounter,
    pub pending: AtomicCounter,
    pub pool_exhausted: AtomicCounter,
    pub contended: AtomicCounter,
    pub disabled: AtomicCounter,
    pub free_checks: AtomicCounter,
    pub frees: AtomicCounter,
}

impl ShardStats {
    #[inline(always)]
    pub fn record_hit(&self) {
        self.lookups.inc();
        self.hits.inc();
    }

    #[inline(always)]
    pub fn record_miss(&self) {
        self.lookups.inc();
        self.misses.inc();
    }

    /// A lookup that found the shard held; reported as a miss
    #[inline(always)]
    pub fn record_contended_lookup(&self) {
        self.record_miss();
        self.contended.inc();
    }

    #[inline(always)]
    pub fn record_insert(&self) {
        self.inserts.inc();
    }

    #[inline(always)]
    pub fn record_duplicate(&self) {
        self.duplicates.inc();
    }

    #[inline]
    pub fn record_uncached(&self, reason: Uncached) {
        match reason {
            Uncached::Disabled => self.disabled.inc(),
            Uncached::Uncachable => self.uncachable.inc(),
            Uncached::ResolutionPending => self.pending.inc(),
            Uncached::PoolExhausted => self.pool_exhausted.inc(),
            Uncached::Contended => self.contended.inc(),
        };
    }

    pub fn snapshot(&self) -> ShardStatsSnapshot {
        ShardStatsSnapshot {
            lookups: self.lookups.get(),
            hits: self.hits.get(),
            misses: self.misses.get(),
            inserts: self.inserts.get(),
            duplicates: self.duplicates.get(),
            uncachable: self.uncachable.get(),
            pending: self.pending.get(),
            pool_exhausted: self.pool_exhausted.get(),
            contended: self.contended.get(),
            disabled: self.disabled.get(),
            free_checks: self.free_checks.get(),
            frees: self.frees.get(),
        }
    }
}

/// Stats snapshot (non-atomic)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShardStatsSnapshot {
    pub lookups: u64,
    pub hits: u64,
    pub misses: u64,
    pub inserts: u64,
    pub duplicates: u64,
    pub uncachable: u64,
    pub pending: u64,
    pub pool_exhausted: u64,
    pub contended: u64,
    pub disabled: u64,
    pub free_checks: u64,
    pub frees: u64,
}

impl ShardStatsSnapshot {
    /// Add another snapshot's counts into this one
    pub fn merge(&mut self, other: &Self) {
        self.lookups += other.lookups;
        self.hits += other.hits;
        self.misses += other.misses;
        self.inserts += other.inserts;
        self.duplicates += other.duplicates;
        self.uncachable += other.uncachable;
        self.pending += other.pending;
        self.pool_exhausted += other.pool_exhausted;
        self.contended += other.contended;
        self.disabled += other.disabled;
        self.free_checks += other.free_checks;
        self.frees += other.frees;
    }

    pub fn hit_rate(&self) -> f64 {
        if self.lookups == 0 {
            return 0.0;
        }
        self.hits as f64 / self.lookups as f64
    }
}

/// Whole-cache view
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlowCacheStats {
    pub ipv4: ShardStatsSnapshot,
    pub ipv6: ShardStatsSnapshot,
    /// Live entries across both tables
    pub entries: usize,
    pub max_flows: usize,
    pub under_pressure: bool,
    pub enabled: bool,
}

impl FlowCacheStats {
    /// Both families summed
    pub fn total(&self) -> ShardStatsSnapshot {
        let mut total = self.ipv4;
        total.merge(&self.ipv6);
        total
    }

    pub fn hit_rate(&self) -> f64 {
        self.total().hit_rate()
    }
}

/// Outcome of one maintenance pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Entries examined
    pub scanned: u64,
    pub route_down: u64,
    pub neighbor_invalid: u64,
    pub flagged: u64,
    pub idle: u64,
    pub flushed: u64,
    /// Idle limit the pass applied
    pub max_idle: Duration,
    pub under_pressure: bool,
}

impl SweepReport {
    #[inline]
    pub fn record(&mut self, reason: EvictReason) {
        match reason {
            EvictReason::RouteDown => self.route_down += 1,
            EvictReason::NeighborInvalid => self.neighbor_invalid += 1,
            EvictReason::Flagged => self.flagged += 1,
            EvictReason::Idle => self.idle += 1,
            EvictReason::Flushed => self.flushed += 1,
        }
    }

    /// Entries removed, all reasons
    pub fn evicted(&self) -> u64 {
        self.route_down + self.neighbor_invalid + self.flagged + self.idle + self.flushed
    }

    /// Per-reason counts, in classification order
    pub fn by_reason(&self) -> [(EvictReason, u64); 5] {
        [
            (EvictReason::RouteDown, self.route_down),
            (EvictReason::NeighborInvalid, self.neighbor_invalid),
            (EvictReason::Flagged, self.flagged),
            (EvictReason::Idle, self.idle),
            (EvictReason::Flushed, self.flushed),
        ]
    }
}
