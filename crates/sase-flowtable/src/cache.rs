//! Flow Cache
//!
//! The caller-facing facade: one IPv4 and one IPv6 [`FlowTable`] drawing on
//! a shared entry budget, plus the resolver and clock they need.

use crate::config::FlowTableConfig;
use crate::cpu;
use crate::entry::{CachedPath, EntrySnapshot, EvictReason, FlowEntry};
use crate::error::{FlowTableResult, Uncached};
use crate::hash::FlowHasher;
use crate::pool::CapacityPool;
use crate::resolver::{NeighborResolution, RouteEntry, RouteResolver};
use crate::shard::{Linked, Probe};
use crate::stats::{FlowCacheStats, SweepReport};
use crate::table::FlowTable;
use sase_common::{AddressFamily, Clock, FlowKey, FlowKeyResult, MonotonicClock, PacketMeta};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Route and neighbor cache keyed by flow
pub struct FlowCache<R: RouteResolver> {
    config: FlowTableConfig,
    resolver: R,
    clock: Arc<dyn Clock>,
    enabled: AtomicBool,
    pool: CapacityPool,
    ipv4: FlowTable<R>,
    ipv6: FlowTable<R>,
}

impl<R: RouteResolver> FlowCache<R> {
    /// Create a cache on the monotonic clock
    pub fn new(config: FlowTableConfig, resolver: R) -> FlowTableResult<Self> {
        Self::with_clock(config, resolver, Arc::new(MonotonicClock::new()))
    }

    /// Create a cache reading time from `clock`
    pub fn with_clock(
        config: FlowTableConfig,
        resolver: R,
        clock: Arc<dyn Clock>,
    ) -> FlowTableResult<Self> {
        config.validate()?;
        let shards = config.shard_count();

        let cache = Self {
            pool: CapacityPool::new(config.max_flows, config.pressure_threshold()),
            enabled: AtomicBool::new(config.enabled),
            ipv4: FlowTable::new(AddressFamily::Ipv4, shards, config.ipv4_buckets, FlowHasher::random()),
            ipv6: FlowTable::new(AddressFamily::Ipv6, shards, config.ipv6_buckets, FlowHasher::random()),
            config,
            resolver,
            clock,
        };

        tracing::info!(
            shards,
            ipv4_buckets = cache.ipv4.bucket_count(),
            ipv6_buckets = cache.ipv6.bucket_count(),
            max_flows = cache.config.max_flows,
            enabled = cache.config.enabled,
            "flow cache created"
        );
        Ok(cache)
    }

    pub fn config(&self) -> &FlowTableConfig {
        &self.config
    }

    pub fn resolver(&self) -> &R {
        &self.resolver
    }

    /// Shards per table
    pub fn shard_count(&self) -> usize {
        self.ipv4.shard_count()
    }

    /// Table serving `family`
    pub fn table(&self, family: AddressFamily) -> &FlowTable<R> {
        match family {
            AddressFamily::Ipv4 => &self.ipv4,
            AddressFamily::Ipv6 => &self.ipv6,
        }
    }

    /// Build the key for a parsed packet, honouring `hash_ports`
    pub fn flow_key(&self, meta: &PacketMeta, fib: u32) -> FlowKeyResult<FlowKey> {
        meta.flow_key(fib, self.config.hash_ports)
    }

    // =========================================================================
    // Fast path
    // =========================================================================

    /// Probe the calling worker's shard
    #[inline]
    pub fn lookup(&self, key: &FlowKey) -> Option<CachedPath<R>> {
        self.lookup_on(cpu::current_shard(self.shard_count()), key)
    }

    /// Probe a specific shard. Never blocks.
    #[inline]
    pub fn lookup_on(&self, shard: usize, key: &FlowKey) -> Option<CachedPath<R>> {
        if !self.is_enabled() {
            return None;
        }
        match self.table(key.family()).lookup(shard, key, self.clock.now()) {
            Probe::Hit(path) => Some(path),
            Probe::Miss | Probe::Contended => None,
        }
    }

    /// Resolve and cache a path on the calling worker's shard
    pub fn insert(&self, key: &FlowKey) -> Result<Option<CachedPath<R>>, R::Error> {
        self.insert_on(cpu::current_shard(self.shard_count()), key)
    }

    /// Resolve and cache a path on a specific shard.
    ///
    /// Returns the resolver's error when the route lookup or neighbor
    /// resolution fails; every other reason for not caching yields `Ok(None)`.
    pub fn insert_on(&self, shard: usize, key: &FlowKey) -> Result<Option<CachedPath<R>>, R::Error> {
        let table = self.table(key.family());
        match self.try_insert(table, shard, key)? {
            Ok(path) => Ok(Some(path)),
            Err(reason) => {
                table.shard_stats(shard).record_uncached(reason);
                tracing::trace!(reason = reason.as_str(), dst = %key.dst(), fib = key.fib(), "flow not cached");
                Ok(None)
            }
        }
    }

    /// Fast path first, then insert
    pub fn lookup_or_insert(&self, key: &FlowKey) -> Result<Option<CachedPath<R>>, R::Error> {
        self.lookup_or_insert_on(cpu::current_shard(self.shard_count()), key)
    }

    pub fn lookup_or_insert_on(
        &self,
        shard: usize,
        key: &FlowKey,
    ) -> Result<Option<CachedPath<R>>, R::Error> {
        if let Some(path) = self.lookup_on(shard, key) {
            return Ok(Some(path));
        }
        self.insert_on(shard, key)
    }

    fn try_insert(
        &self,
        table: &FlowTable<R>,
        shard: usize,
        key: &FlowKey,
    ) -> Result<Result<CachedPath<R>, Uncached>, R::Error> {
        if !self.is_enabled() {
            return Ok(Err(Uncached::Disabled));
        }
        if key.is_degenerate() {
            return Ok(Err(Uncached::Uncachable));
        }

        let dst = key.dst();
        let route = self.resolver.lookup_route(dst, key.fib())?;
        if route.is_loopback() || route.is_point_to_point() || route.is_local() {
            return Ok(Err(Uncached::Uncachable));
        }
        let neighbor = match self.resolver.resolve_neighbor(&route, dst) {
            NeighborResolution::Resolved(neighbor) => neighbor,
            NeighborResolution::Pending => return Ok(Err(Uncached::ResolutionPending)),
            NeighborResolution::Failed(err) => return Err(err),
        };

        if !self.pool.try_reserve() {
            return Ok(Err(Uncached::PoolExhausted));
        }
        let now = self.clock.now();
        let entry = table.build_entry(key, route, neighbor, now);
        let stats = table.shard_stats(shard);

        match table.link(shard, entry, now) {
            Linked::Inserted(path) => {
                stats.record_insert();
                Ok(Ok(path))
            }
            Linked::Existing(path, rejected) => {
                drop(rejected);
                self.pool.release(1);
                stats.record_duplicate();
                Ok(Ok(path))
            }
            Linked::Contended(rejected) => {
                drop(rejected);
                self.pool.release(1);
                Ok(Err(Uncached::Contended))
            }
        }
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Remove entries across both tables and return their pool slots
    fn evict<F>(&self, mut classify: F, report: &mut SweepReport) -> usize
    where
        F: FnMut(&FlowEntry<R>) -> Option<EvictReason>,
    {
        let freed = self.ipv4.evict(&mut classify, report) + self.ipv6.evict(&mut classify, report);
        self.pool.release(freed);
        metrics::gauge!("flowtable_entries").set(self.pool.used() as f64);
        freed
    }

    /// Drop every entry whose route is `route`.
    ///
    /// Synchronous: on return no shard holds an entry for it.
    pub fn flush_route(&self, route: &Arc<R::Route>) -> usize {
        let mut report = SweepReport::default();
        let freed = self.evict(
            |entry| Arc::ptr_eq(&entry.route, route).then_some(EvictReason::Flushed),
            &mut report,
        );
        metrics::counter!("flowtable_route_flushes_total").increment(1);
        metrics::counter!("flowtable_evictions_total", "reason" => EvictReason::Flushed.as_str())
            .increment(freed as u64);
        tracing::info!(freed, "route flushed from flow cache");
        freed
    }

    /// Drop every entry
    pub fn flush_all(&self) -> usize {
        let mut report = SweepReport::default();
        let freed = self.evict(|_| Some(EvictReason::Flushed), &mut report);
        metrics::counter!("flowtable_evictions_total", "reason" => EvictReason::Flushed.as_str())
            .increment(freed as u64);
        tracing::info!(freed, "flow cache flushed");
        freed
    }

    /// One full reaper pass over both tables
    pub fn sweep(&self) -> SweepReport {
        let now = self.clock.now();
        let under_pressure = self.pool.under_pressure();
        let max_idle = self.config.max_idle(under_pressure);

        let mut report = SweepReport {
            max_idle,
            under_pressure,
            ..SweepReport::default()
        };
        self.evict(|entry| entry.stale_reason(now, max_idle), &mut report);

        for (reason, count) in report.by_reason() {
            if count > 0 {
                metrics::counter!("flowtable_evictions_total", "reason" => reason.as_str())
                    .increment(count);
            }
        }
        metrics::gauge!("flowtable_pressure").set(if under_pressure { 1.0 } else { 0.0 });

        tracing::debug!(
            scanned = report.scanned,
            evicted = report.evicted(),
            route_down = report.route_down,
            neighbor_invalid = report.neighbor_invalid,
            flagged = report.flagged,
            idle = report.idle,
            under_pressure,
            remaining = self.pool.used(),
            "flow cache sweep"
        );
        report
    }

    /// Idle limit the next sweep will apply
    pub fn max_idle(&self) -> Duration {
        self.config.max_idle(self.under_pressure())
    }

    /// Pause the reaper should take after a pass
    pub fn sweep_interval(&self) -> Duration {
        self.config.sweep_interval(self.under_pressure())
    }

    /// Pool at or above 7/8 of `max_flows`
    pub fn under_pressure(&self) -> bool {
        self.pool.under_pressure()
    }

    // =========================================================================
    // Control and introspection
    // =========================================================================

    /// Switch caching on or off. Turning it off flushes everything.
    pub fn set_enabled(&self, enabled: bool) {
        let was = self.enabled.swap(enabled, Ordering::AcqRel);
        if was == enabled {
            return;
        }
        tracing::info!(enabled, "flow cache toggled");
        if !enabled {
            self.flush_all();
        }
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Entries held against the pool
    pub fn len(&self) -> usize {
        self.pool.used()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> FlowCacheStats {
        FlowCacheStats {
            ipv4: self.ipv4.stats(),
            ipv6: self.ipv6.stats(),
            entries: self.pool.used(),
            max_flows: self.pool.max(),
            under_pressure: self.pool.under_pressure(),
            enabled: self.is_enabled(),
        }
    }

    /// Every linked entry, IPv4 first
    pub fn snapshot(&self) -> Vec<EntrySnapshot> {
        let now = self.clock.now();
        let mut out = Vec::with_capacity(self.len());
        self.ipv4.snapshot_into(now, &mut out);
        self.ipv6.snapshot_into(now, &mut out);
        out
    }
}
