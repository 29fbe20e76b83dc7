//! OpenSASE Flow Cache
//!
//! Per-core cache of forwarding decisions. A packet whose flow has been seen
//! recently gets its route and link-layer neighbor from the worker's own
//! shard, skipping the routing table and neighbor lookups.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                          FLOW CACHE                                 │
//! │                                                                     │
//! │   Worker 0          Worker 1          Worker N        Reaper        │
//! │      │                 │                 │              │           │
//! │      ▼                 ▼                 ▼              │           │
//! │  ┌─────────┐       ┌─────────┐       ┌─────────┐        │           │
//! │  │ Shard 0 │       │ Shard 1 │       │ Shard N │◀───────┘           │
//! │  │try_lock │       │try_lock │       │try_lock │   lock, unlink,    │
//! │  ├─────────┤       ├─────────┤       ├─────────┤   release outside  │
//! │  │bucket 0 │──▶ e ──▶ e      │       │         │                    │
//! │  │bucket 1 │       │         │       │         │                    │
//! │  │   ...   │       │         │       │         │                    │
//! │  └─────────┘       └─────────┘       └─────────┘                    │
//! │       one table per address family, shared entry budget             │
//! └──────────┬───────────────────────────────────────┬──────────────────┘
//!            │ miss                                  │
//!            ▼                                       ▼
//!     RouteResolver::lookup_route         RouteResolver::resolve_neighbor
//! ```
//!
//! # Guarantees
//!
//! | Property | How |
//! |----------|-----|
//! | Fast path never blocks | `try_lock` only; contention is a miss |
//! | No duplicate live entries | bucket re-scan under the shard lock |
//! | No release inside a shard section | evicted entries go to a free list |
//! | Bounded memory | global budget, aggressive reaping above 7/8 |
//! | Flush is synchronous | every shard walked before `flush_route` returns |

pub mod cache;
pub mod config;
pub mod cpu;
pub mod entry;
pub mod error;
pub mod hash;
pub mod occupancy;
pub mod reaper;
pub mod resolver;
pub mod stats;
pub mod table;

mod pool;
mod shard;

pub use cache::FlowCache;
pub use config::FlowTableConfig;
pub use cpu::{bind_current_thread, bound_shard, current_shard, ShardBinding};
pub use entry::{CachedPath, EntrySnapshot, EvictReason};
pub use error::{FlowTableError, FlowTableResult, Uncached};
pub use hash::FlowHasher;
pub use reaper::{Reaper, REAPER_THREAD_NAME};
pub use resolver::{NeighborEntry, NeighborResolution, RouteEntry, RouteResolver};
pub use stats::{FlowCacheStats, ShardStats, ShardStatsSnapshot, SweepReport};
pub use table::FlowTable;

pub use sase_common::{AddressFamily, Clock, FlowKey, ManualClock, MonotonicClock, Timestamp};

/// Default buckets per shard, per family
pub const DEFAULT_BUCKETS: usize = 2048;

/// Default entry budget across both families
pub const DEFAULT_MAX_FLOWS: usize = 65536;
