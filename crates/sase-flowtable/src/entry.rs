//! Cached flow entries
//!
//! An entry pins one route and one neighbor for a flow. It is linked into
//! exactly one bucket chain at a time; when evicted it moves onto a
//! [`FreeList`] and is only dropped once the shard section is released.

use crate::resolver::{NeighborEntry, RouteEntry, RouteResolver};
use sase_common::{FlowKey, Timestamp};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub(crate) type Link<R> = Option<Box<FlowEntry<R>>>;

/// A forwarding decision handed back on a hit
pub struct CachedPath<R: RouteResolver> {
    pub route: Arc<R::Route>,
    pub neighbor: Arc<R::Neighbor>,
}

impl<R: RouteResolver> CachedPath<R> {
    /// Same route and neighbor objects
    pub fn same_as(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.route, &other.route) && Arc::ptr_eq(&self.neighbor, &other.neighbor)
    }
}

impl<R: RouteResolver> Clone for CachedPath<R> {
    fn clone(&self) -> Self {
        Self {
            route: Arc::clone(&self.route),
            neighbor: Arc::clone(&self.neighbor),
        }
    }
}

impl<R: RouteResolver> fmt::Debug for CachedPath<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedPath")
            .field("route", &Arc::as_ptr(&self.route))
            .field("neighbor", &Arc::as_ptr(&self.neighbor))
            .finish()
    }
}

/// Why maintenance removed an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EvictReason {
    /// Route withdrawn or its interface went down
    RouteDown,
    /// Neighbor lost its link-layer address
    NeighborInvalid,
    /// Marked stale by a connection-closing segment
    Flagged,
    /// Unused for longer than the idle limit
    Idle,
    /// Removed by a route flush or a full flush
    Flushed,
}

impl EvictReason {
    /// Metric label
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RouteDown => "route_down",
            Self::NeighborInvalid => "neighbor_invalid",
            Self::Flagged => "flagged",
            Self::Idle => "idle",
            Self::Flushed => "flushed",
        }
    }
}

pub(crate) struct FlowEntry<R: RouteResolver> {
    pub(crate) hash: u32,
    pub(crate) key: FlowKey,
    pub(crate) last_used: Timestamp,
    pub(crate) route: Arc<R::Route>,
    pub(crate) neighbor: Arc<R::Neighbor>,
    pub(crate) stale: bool,
    pub(crate) next: Link<R>,
}

impl<R: RouteResolver> FlowEntry<R> {
    pub(crate) fn new(
        hash: u32,
        key: FlowKey,
        route: Arc<R::Route>,
        neighbor: Arc<R::Neighbor>,
        now: Timestamp,
    ) -> Box<Self> {
        Box::new(Self {
            hash,
            stale: key.stale_hint(),
            key,
            last_used: now,
            route,
            neighbor,
            next: None,
        })
    }

    #[inline(always)]
    pub(crate) fn matches(&self, hash: u32, key: &FlowKey) -> bool {
        self.hash == hash && self.key == *key
    }

    /// Route up and neighbor valid; a stale flag alone does not stop hits
    #[inline(always)]
    pub(crate) fn is_usable(&self) -> bool {
        self.route.is_up() && self.neighbor.is_valid()
    }

    #[inline(always)]
    pub(crate) fn touch(&mut self, now: Timestamp, stale_hint: bool) {
        self.last_used = now;
        self.stale |= stale_hint;
    }

    pub(crate) fn path(&self) -> CachedPath<R> {
        CachedPath {
            route: Arc::clone(&self.route),
            neighbor: Arc::clone(&self.neighbor),
        }
    }

    pub(crate) fn idle_for(&self, now: Timestamp) -> Duration {
        now.saturating_duration_since(self.last_used)
    }

    /// First matching reason in route, neighbor, flag, idle order
    pub(crate) fn stale_reason(&self, now: Timestamp, max_idle: Duration) -> Option<EvictReason> {
        if !self.route.is_up() {
            Some(EvictReason::RouteDown)
        } else if !self.neighbor.is_valid() {
            Some(EvictReason::NeighborInvalid)
        } else if self.stale {
            Some(EvictReason::Flagged)
        } else if self.idle_for(now) > max_idle {
            Some(EvictReason::Idle)
        } else {
            None
        }
    }
}

/// Read-only view of one entry, for diagnostics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntrySnapshot {
    pub shard: usize,
    pub bucket: usize,
    pub key: FlowKey,
    pub idle: Duration,
    pub stale: bool,
    pub usable: bool,
}

/// Evicted entries awaiting release.
///
/// Pushing reuses each entry's own `next` link, so collecting under the
/// shard lock never allocates. Dropping the list releases the route and
/// neighbor references.
pub(crate) struct FreeList<R: RouteResolver> {
    head: Link<R>,
    len: usize,
}

impl<R: RouteResolver> FreeList<R> {
    pub(crate) const fn new() -> Self {
        Self { head: None, len: 0 }
    }

    #[inline]
    pub(crate) fn push(&mut self, mut entry: Box<FlowEntry<R>>) {
        entry.next = self.head.take();
        self.head = Some(entry);
        self.len += 1;
    }

    /// Drop every entry and return how many there were
    pub(crate) fn release(mut self) -> usize {
        let freed = self.len;
        self.drain();
        freed
    }

    fn drain(&mut self) {
        // Iterative so a long chain cannot overflow the stack
        let mut cursor = self.head.take();
        while let Some(mut entry) = cursor {
            cursor = entry.next.take();
        }
        self.len = 0;
    }
}

impl<R: RouteResolver> Drop for FreeList<R> {
    fn drop(&mut self) {
        self.drain();
    }
}
