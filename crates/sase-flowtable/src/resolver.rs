//! Contracts with the routing and neighbor subsystems
//!
//! The cache owns neither routes nor neighbors. It co-owns them through
//! `Arc`, probes their validity on every hit, and drops its references only
//! outside a shard's critical section.

use std::net::IpAddr;
use std::sync::Arc;

/// A forwarding decision (next hop, outgoing interface)
pub trait RouteEntry: Send + Sync {
    /// Route is still installed and its interface is up.
    ///
    /// Called inside the shard section: must not block.
    fn is_up(&self) -> bool;

    /// Outgoing interface is a loopback
    fn is_loopback(&self) -> bool {
        false
    }

    /// Outgoing interface is point-to-point
    fn is_point_to_point(&self) -> bool {
        false
    }

    /// Destination is an address owned by this host
    fn is_local(&self) -> bool {
        false
    }
}

/// A resolved link-layer address for a next hop
pub trait NeighborEntry: Send + Sync {
    /// Entry still holds a usable link-layer address.
    ///
    /// Called inside the shard section: must not block.
    fn is_valid(&self) -> bool;
}

/// Outcome of neighbor resolution
pub enum NeighborResolution<N, E> {
    /// Link-layer address known
    Resolved(Arc<N>),
    /// Resolution in flight; the path is not cacheable yet
    Pending,
    /// Resolution failed
    Failed(E),
}

/// Route and neighbor lookup, supplied by the host stack.
///
/// Both calls may block or allocate; the cache only makes them outside any
/// shard section.
pub trait RouteResolver: Send + Sync {
    /// Route handle
    type Route: RouteEntry;
    /// Neighbor handle
    type Neighbor: NeighborEntry;
    /// Resolution failure, handed back to the caller untouched
    type Error: std::error::Error + Send + Sync + 'static;

    /// Longest-prefix match for `dst` in routing table `fib`
    fn lookup_route(&self, dst: IpAddr, fib: u32) -> Result<Arc<Self::Route>, Self::Error>;

    /// Link-layer entry for the next hop of `route` towards `dst`
    fn resolve_neighbor(
        &self,
        route: &Arc<Self::Route>,
        dst: IpAddr,
    ) -> NeighborResolution<Self::Neighbor, Self::Error>;
}
