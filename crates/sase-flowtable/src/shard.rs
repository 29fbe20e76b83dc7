//! One worker's partition of a flow table
//!
//! The forwarding path only ever `try_lock`s a shard: if maintenance holds
//! it, the packet is simply not served from the cache. Maintenance takes the
//! lock outright, but never drops an entry while holding it.

use crate::entry::{EntrySnapshot, EvictReason, FlowEntry, FreeList, Link};
use crate::occupancy::{OccupancyMap, SetBits};
use crate::resolver::RouteResolver;
use crate::stats::{ShardStats, SweepReport};
use crate::CachedPath;
use parking_lot::Mutex;
use sase_common::{FlowKey, Timestamp};

/// Result of a fast-path probe
pub(crate) enum Probe<R: RouteResolver> {
    Hit(CachedPath<R>),
    Miss,
    Contended,
}

/// Result of linking a new entry
pub(crate) enum Linked<R: RouteResolver> {
    Inserted(CachedPath<R>),
    /// A live entry for the key already existed; the new one is handed back
    Existing(CachedPath<R>, Box<FlowEntry<R>>),
    Contended(Box<FlowEntry<R>>),
}

pub(crate) struct Shard<R: RouteResolver> {
    inner: Mutex<ShardInner<R>>,
    stats: ShardStats,
}

struct ShardInner<R: RouteResolver> {
    buckets: Box<[Link<R>]>,
    occupancy: OccupancyMap,
    len: usize,
}

impl<R: RouteResolver> Shard<R> {
    pub(crate) fn new(buckets: usize) -> Self {
        Self {
            inner: Mutex::new(ShardInner::new(buckets)),
            stats: ShardStats::default(),
        }
    }

    #[inline(always)]
    pub(crate) fn stats(&self) -> &ShardStats {
        &self.stats
    }

    /// Find a usable entry, refreshing it on a hit
    #[inline]
    pub(crate) fn lookup(&self, bucket: usize, hash: u32, key: &FlowKey, now: Timestamp) -> Probe<R> {
        let Some(mut inner) = self.inner.try_lock() else {
            return Probe::Contended;
        };
        match inner.touch_live(bucket, hash, key, now, key.stale_hint()) {
            Some(path) => Probe::Hit(path),
            None => Probe::Miss,
        }
    }

    /// Link `entry` at the head of its bucket unless a live duplicate exists.
    ///
    /// A rejected entry is returned so the caller drops it after the lock is
    /// released.
    pub(crate) fn link(&self, bucket: usize, entry: Box<FlowEntry<R>>, now: Timestamp) -> Linked<R> {
        let Some(mut inner) = self.inner.try_lock() else {
            return Linked::Contended(entry);
        };
        if let Some(path) = inner.touch_live(bucket, entry.hash, &entry.key, now, entry.stale) {
            return Linked::Existing(path, entry);
        }
        let path = entry.path();
        inner.push_head(bucket, entry);
        Linked::Inserted(path)
    }

    /// Unlink every entry `classify` names a reason for.
    ///
    /// The lock is held for the walk only; the unlinked entries come back
    /// on a free list for the caller to release.
    pub(crate) fn evict<F>(&self, mut classify: F, report: &mut SweepReport) -> FreeList<R>
    where
        F: FnMut(&FlowEntry<R>) -> Option<EvictReason>,
    {
        let mut free = FreeList::new();
        let scanned_before = report.scanned;
        {
            let mut inner = self.inner.lock();
            inner.evict_where(&mut classify, &mut free, report);
        }
        self.stats.free_checks.add(report.scanned - scanned_before);
        free
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.lock().len
    }

    pub(crate) fn occupied_buckets(&self) -> usize {
        self.inner.lock().occupancy.count()
    }

    pub(crate) fn snapshot_into(&self, shard: usize, now: Timestamp, out: &mut Vec<EntrySnapshot>) {
        let inner = self.inner.lock();
        for bucket in inner.occupancy.iter() {
            let mut cursor = inner.buckets[bucket].as_deref();
            while let Some(entry) = cursor {
                out.push(EntrySnapshot {
                    shard,
                    bucket,
                    key: entry.key,
                    idle: entry.idle_for(now),
                    stale: entry.stale,
                    usable: entry.is_usable(),
                });
                cursor = entry.next.as_deref();
            }
        }
    }
}

impl<R: RouteResolver> ShardInner<R> {
    fn new(buckets: usize) -> Self {
        Self {
            buckets: (0..buckets).map(|_| None).collect(),
            occupancy: OccupancyMap::new(buckets),
            len: 0,
        }
    }

    /// Refresh the first usable entry for the key and return its path
    #[inline]
    fn touch_live(
        &mut self,
        bucket: usize,
        hash: u32,
        key: &FlowKey,
        now: Timestamp,
        stale_hint: bool,
    ) -> Option<CachedPath<R>> {
        let mut cursor = self.buckets[bucket].as_deref_mut();
        while let Some(entry) = cursor {
            if entry.matches(hash, key) && entry.is_usable() {
                entry.touch(now, stale_hint);
                return Some(entry.path());
            }
            cursor = entry.next.as_deref_mut();
        }
        None
    }

    fn push_head(&mut self, bucket: usize, mut entry: Box<FlowEntry<R>>) {
        entry.next = self.buckets[bucket].take();
        self.buckets[bucket] = Some(entry);
        self.occupancy.set(bucket);
        self.len += 1;
    }

    fn evict_where<F>(&mut self, classify: &mut F, free: &mut FreeList<R>, report: &mut SweepReport)
    where
        F: FnMut(&FlowEntry<R>) -> Option<EvictReason>,
    {
        for w in 0..self.occupancy.word_count() {
            for bucket in SetBits::new(self.occupancy.word(w), w * 64) {
                self.evict_bucket(bucket, classify, free, report);
            }
        }
    }

    fn evict_bucket<F>(
        &mut self,
        bucket: usize,
        classify: &mut F,
        free: &mut FreeList<R>,
        report: &mut SweepReport,
    ) where
        F: FnMut(&FlowEntry<R>) -> Option<EvictReason>,
    {
        // Survivors collect in reverse, then get pushed back to restore order
        let mut rest = self.buckets[bucket].take();
        let mut kept: Link<R> = None;
        while let Some(mut entry) = rest {
            rest = entry.next.take();
            report.scanned += 1;
            match classify(&*entry) {
                Some(reason) => {
                    report.record(reason);
                    free.push(entry);
                    self.len -= 1;
                }
                None => {
                    entry.next = kept;
                    kept = Some(entry);
                }
            }
        }
        while let Some(mut entry) = kept {
            kept = entry.next.take();
            entry.next = self.buckets[bucket].take();
            self.buckets[bucket] = Some(entry);
        }
        if self.buckets[bucket].is_none() {
            self.occupancy.clear(bucket);
        }
    }
}

impl<R: RouteResolver> Drop for ShardInner<R> {
    fn drop(&mut self) {
        // Unlink chains one node at a time; recursive Box drops could overflow
        for bucket in self.buckets.iter_mut() {
            let mut cursor = bucket.take();
            while let Some(mut entry) = cursor {
                cursor = entry.next.take();
            }
        }
    }
}
