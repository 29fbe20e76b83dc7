//! Sharded Flow Table
//!
//! One table per address family. Each worker owns a shard with its own
//! bucket array; a key always hashes to the same bucket index, but which
//! shard is probed depends on the worker doing the probing.
//!
//! # Design
//!
//! - Chained buckets, new entries pushed at the head
//! - Power-of-two bucket count, index is `hash & mask`
//! - Seeded lookup3 hash, one seed per table
//! - Shards padded to their own cache lines

use crate::entry::{EntrySnapshot, EvictReason, FlowEntry};
use crate::hash::FlowHasher;
use crate::resolver::RouteResolver;
use crate::shard::{Linked, Probe, Shard};
use crate::stats::{ShardStats, ShardStatsSnapshot, SweepReport};
use crossbeam::utils::CachePadded;
use sase_common::{AddressFamily, FlowKey, Timestamp};
use std::sync::Arc;

/// Per-family flow table
pub struct FlowTable<R: RouteResolver> {
    family: AddressFamily,
    shards: Box<[CachePadded<Shard<R>>]>,
    /// Buckets per shard (power of 2)
    buckets: usize,
    mask: usize,
    hasher: FlowHasher,
}

impl<R: RouteResolver> FlowTable<R> {
    /// Create a table with `shards` shards of `buckets` buckets each
    pub fn new(family: AddressFamily, shards: usize, buckets: usize, hasher: FlowHasher) -> Self {
        let buckets = buckets.max(1).next_power_of_two();
        let shards = (0..shards.max(1))
            .map(|_| CachePadded::new(Shard::new(buckets)))
            .collect();

        Self {
            family,
            shards,
            buckets,
            mask: buckets - 1,
            hasher,
        }
    }

    /// Address family served
    pub fn family(&self) -> AddressFamily {
        self.family
    }

    /// Number of shards
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Buckets per shard
    pub fn bucket_count(&self) -> usize {
        self.buckets
    }

    /// Hash and bucket index for a key
    #[inline(always)]
    pub fn locate(&self, key: &FlowKey) -> (u32, usize) {
        let hash = self.hasher.hash(key);
        (hash, hash as usize & self.mask)
    }

    #[inline(always)]
    fn shard(&self, idx: usize) -> &Shard<R> {
        &self.shards[idx % self.shards.len()]
    }

    pub(crate) fn shard_stats(&self, idx: usize) -> &ShardStats {
        self.shard(idx).stats()
    }

    #[inline]
    pub(crate) fn lookup(&self, shard: usize, key: &FlowKey, now: Timestamp) -> Probe<R> {
        let (hash, bucket) = self.locate(key);
        let shard = self.shard(shard);
        let probe = shard.lookup(bucket, hash, key, now);
        match probe {
            Probe::Hit(_) => shard.stats().record_hit(),
            Probe::Miss => shard.stats().record_miss(),
            Probe::Contended => shard.stats().record_contended_lookup(),
        }
        probe
    }

    pub(crate) fn build_entry(
        &self,
        key: &FlowKey,
        route: Arc<R::Route>,
        neighbor: Arc<R::Neighbor>,
        now: Timestamp,
    ) -> Box<FlowEntry<R>> {
        let (hash, _) = self.locate(key);
        FlowEntry::new(hash, *key, route, neighbor, now)
    }

    pub(crate) fn link(&self, shard: usize, entry: Box<FlowEntry<R>>, now: Timestamp) -> Linked<R> {
        let bucket = entry.hash as usize & self.mask;
        self.shard(shard).link(bucket, entry, now)
    }

    /// Evict across every shard, one shard section at a time.
    ///
    /// Returns the number of entries released.
    pub(crate) fn evict<F>(&self, mut classify: F, report: &mut SweepReport) -> usize
    where
        F: FnMut(&FlowEntry<R>) -> Option<EvictReason>,
    {
        let mut freed = 0;
        for shard in self.shards.iter() {
            let free = shard.evict(&mut classify, report);
            let n = free.release();
            shard.stats().frees.add(n as u64);
            freed += n;
        }
        freed
    }

    /// Linked entries across all shards
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Occupied buckets across all shards
    pub fn occupied_buckets(&self) -> usize {
        self.shards.iter().map(|s| s.occupied_buckets()).sum()
    }

    /// Per-shard counters, in shard order
    pub fn shard_stats_snapshot(&self) -> Vec<ShardStatsSnapshot> {
        self.shards.iter().map(|s| s.stats().snapshot()).collect()
    }

    /// Counters summed over shards
    pub fn stats(&self) -> ShardStatsSnapshot {
        let mut total = ShardStatsSnapshot::default();
        for shard in self.shards.iter() {
            total.merge(&shard.stats().snapshot());
        }
        total
    }

    pub(crate) fn snapshot_into(&self, now: Timestamp, out: &mut Vec<EntrySnapshot>) {
        for (idx, shard) in self.shards.iter().enumerate() {
            shard.snapshot_into(idx, now, out);
        }
    }
}
