//! Shared fixtures: an in-memory routing table and neighbor cache.

#![allow(dead_code)]

use parking_lot::Mutex;
use sase_flowtable::{
    FlowCache, FlowKey, FlowTableConfig, ManualClock, NeighborEntry, NeighborResolution,
    RouteEntry, RouteResolver,
};
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::TRACE)
        .try_init();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteKind {
    Unicast,
    Loopback,
    PointToPoint,
    Local,
}

#[derive(Debug)]
pub struct MockRoute {
    pub name: &'static str,
    pub kind: RouteKind,
    up: AtomicBool,
}

impl MockRoute {
    pub fn new(name: &'static str) -> Arc<Self> {
        Self::with_kind(name, RouteKind::Unicast)
    }

    pub fn with_kind(name: &'static str, kind: RouteKind) -> Arc<Self> {
        Arc::new(Self {
            name,
            kind,
            up: AtomicBool::new(true),
        })
    }

    pub fn set_up(&self, up: bool) {
        self.up.store(up, Ordering::Release);
    }
}

impl RouteEntry for MockRoute {
    fn is_up(&self) -> bool {
        self.up.load(Ordering::Acquire)
    }

    fn is_loopback(&self) -> bool {
        self.kind == RouteKind::Loopback
    }

    fn is_point_to_point(&self) -> bool {
        self.kind == RouteKind::PointToPoint
    }

    fn is_local(&self) -> bool {
        self.kind == RouteKind::Local
    }
}

#[derive(Debug)]
pub struct MockNeighbor {
    valid: AtomicBool,
}

impl MockNeighbor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            valid: AtomicBool::new(true),
        })
    }

    pub fn set_valid(&self, valid: bool) {
        self.valid.store(valid, Ordering::Release);
    }
}

impl NeighborEntry for MockNeighbor {
    fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NeighborMode {
    Resolved,
    Pending,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MockError {
    #[error("no route to {0}")]
    NoRoute(IpAddr),
    #[error("neighbor resolution failed for {0}")]
    NeighborFailed(IpAddr),
}

/// Routes by exact destination, falling back to a default route
pub struct MockResolver {
    default_route: Mutex<Option<Arc<MockRoute>>>,
    routes: Mutex<HashMap<IpAddr, Arc<MockRoute>>>,
    neighbor: Mutex<Arc<MockNeighbor>>,
    mode: Mutex<NeighborMode>,
    pub route_lookups: AtomicUsize,
    pub neighbor_lookups: AtomicUsize,
}

impl MockResolver {
    pub fn new() -> Self {
        Self {
            default_route: Mutex::new(Some(MockRoute::new("default"))),
            routes: Mutex::new(HashMap::new()),
            neighbor: Mutex::new(MockNeighbor::new()),
            mode: Mutex::new(NeighborMode::Resolved),
            route_lookups: AtomicUsize::new(0),
            neighbor_lookups: AtomicUsize::new(0),
        }
    }

    pub fn default_route(&self) -> Option<Arc<MockRoute>> {
        self.default_route.lock().clone()
    }

    pub fn set_default_route(&self, route: Option<Arc<MockRoute>>) {
        *self.default_route.lock() = route;
    }

    pub fn add_route(&self, dst: IpAddr, route: Arc<MockRoute>) {
        self.routes.lock().insert(dst, route);
    }

    pub fn neighbor(&self) -> Arc<MockNeighbor> {
        self.neighbor.lock().clone()
    }

    pub fn replace_neighbor(&self) -> Arc<MockNeighbor> {
        let fresh = MockNeighbor::new();
        *self.neighbor.lock() = fresh.clone();
        fresh
    }

    pub fn set_mode(&self, mode: NeighborMode) {
        *self.mode.lock() = mode;
    }
}

impl RouteResolver for MockResolver {
    type Route = MockRoute;
    type Neighbor = MockNeighbor;
    type Error = MockError;

    fn lookup_route(&self, dst: IpAddr, _fib: u32) -> Result<Arc<MockRoute>, MockError> {
        self.route_lookups.fetch_add(1, Ordering::Relaxed);
        if let Some(route) = self.routes.lock().get(&dst) {
            return Ok(route.clone());
        }
        self.default_route().ok_or(MockError::NoRoute(dst))
    }

    fn resolve_neighbor(
        &self,
        _route: &Arc<MockRoute>,
        dst: IpAddr,
    ) -> NeighborResolution<MockNeighbor, MockError> {
        self.neighbor_lookups.fetch_add(1, Ordering::Relaxed);
        match *self.mode.lock() {
            NeighborMode::Resolved => NeighborResolution::Resolved(self.neighbor()),
            NeighborMode::Pending => NeighborResolution::Pending,
            NeighborMode::Failed => NeighborResolution::Failed(MockError::NeighborFailed(dst)),
        }
    }
}

pub fn small_config(shards: usize) -> FlowTableConfig {
    FlowTableConfig {
        shards,
        ipv4_buckets: 256,
        ipv6_buckets: 256,
        max_flows: 1024,
        ..Default::default()
    }
}

pub fn cache_with(config: FlowTableConfig) -> (Arc<FlowCache<MockResolver>>, Arc<ManualClock>) {
    init_tracing();
    let clock = Arc::new(ManualClock::new());
    let cache = FlowCache::with_clock(config, MockResolver::new(), clock.clone())
        .expect("valid config");
    (Arc::new(cache), clock)
}

pub fn v4(a: [u8; 4]) -> IpAddr {
    IpAddr::V4(Ipv4Addr::from(a))
}

/// Address-only IPv4 key in fib 0
pub fn v4_key(src: [u8; 4], dst: [u8; 4]) -> FlowKey {
    FlowKey::from_addrs(v4(src), v4(dst), 0).expect("same family")
}

/// Distinct keys 10.0.x.y -> 10.1.x.y
pub fn nth_key(i: u16) -> FlowKey {
    let [hi, lo] = i.to_be_bytes();
    v4_key([10, 0, hi, lo], [10, 1, hi, lo])
}

/// Ethernet + IPv4 + TCP frame with the given flags
pub fn tcp_frame(src: [u8; 4], dst: [u8; 4], sport: u16, dport: u16, flags: u8) -> Vec<u8> {
    let mut pkt = vec![0u8; 14 + 20 + 20];
    pkt[12] = 0x08;
    pkt[13] = 0x00;
    pkt[14] = 0x45;
    pkt[14 + 9] = 6;
    pkt[14 + 12..14 + 16].copy_from_slice(&src);
    pkt[14 + 16..14 + 20].copy_from_slice(&dst);
    pkt[34..36].copy_from_slice(&sport.to_be_bytes());
    pkt[36..38].copy_from_slice(&dport.to_be_bytes());
    pkt[34 + 12] = 0x50;
    pkt[34 + 13] = flags;
    pkt
}
