mod common;

use common::*;
use sase_common::{PacketMeta, TcpFlags};
use sase_flowtable::{AddressFamily, FlowKey, FlowTableConfig};
use std::net::{IpAddr, Ipv6Addr};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

#[test]
fn idle_flow_is_evicted_after_thirty_seconds() {
    let (cache, clock) = cache_with(small_config(2));
    let key = v4_key([10, 0, 0, 1], [10, 0, 0, 2]);

    clock.set_secs(0);
    assert!(cache.insert_on(0, &key).unwrap().is_some());

    clock.set_secs(5);
    assert!(cache.lookup_on(0, &key).is_some());

    clock.set_secs(40);
    let report = cache.sweep();
    assert_eq!(report.max_idle, Duration::from_secs(30));
    assert_eq!(report.idle, 1);

    clock.set_secs(41);
    assert!(cache.lookup_on(0, &key).is_none());
    assert!(cache.is_empty());
}

#[test]
fn recently_used_flow_survives_sweep() {
    let (cache, clock) = cache_with(small_config(1));
    let key = nth_key(1);

    cache.insert_on(0, &key).unwrap();
    clock.set_secs(30);
    assert_eq!(cache.sweep().evicted(), 0);
    assert!(cache.lookup_on(0, &key).is_some());
}

#[test]
fn rst_segment_marks_flow_for_next_sweep() {
    let (cache, _) = cache_with(small_config(1));
    let frame = tcp_frame([10, 0, 0, 1], [10, 0, 0, 2], 40000, 443, TcpFlags::RST | TcpFlags::ACK);
    let meta = PacketMeta::parse(&frame).unwrap();
    let key = cache.flow_key(&meta, 0).unwrap();
    assert!(key.stale_hint());
    assert_eq!(key.ports(), Some((40000, 443)));

    assert!(cache.insert_on(0, &key).unwrap().is_some());
    // Still served until the reaper gets to it
    assert!(cache.lookup_on(0, &key.with_stale_hint(false)).is_some());

    let report = cache.sweep();
    assert_eq!(report.flagged, 1);
    assert!(cache.is_empty());
}

#[test]
fn fin_on_hit_marks_existing_entry() {
    let (cache, _) = cache_with(small_config(1));
    let open = PacketMeta::parse(&tcp_frame([10, 0, 0, 1], [10, 0, 0, 2], 40000, 80, TcpFlags::ACK)).unwrap();
    let close = PacketMeta::parse(&tcp_frame([10, 0, 0, 1], [10, 0, 0, 2], 40000, 80, TcpFlags::FIN | TcpFlags::ACK)).unwrap();

    let key = cache.flow_key(&open, 0).unwrap();
    cache.lookup_or_insert_on(0, &key).unwrap();
    assert_eq!(cache.sweep().evicted(), 0);

    let closing = cache.flow_key(&close, 0).unwrap();
    assert!(cache.lookup_on(0, &closing).is_some());
    assert!(cache.snapshot()[0].stale);
    assert_eq!(cache.sweep().flagged, 1);
}

#[test]
fn address_only_keys_when_ports_disabled() {
    let config = FlowTableConfig {
        hash_ports: false,
        ..small_config(1)
    };
    let (cache, _) = cache_with(config);
    let a = PacketMeta::parse(&tcp_frame([10, 0, 0, 1], [10, 0, 0, 2], 1000, 80, TcpFlags::ACK)).unwrap();
    let b = PacketMeta::parse(&tcp_frame([10, 0, 0, 1], [10, 0, 0, 2], 2000, 443, TcpFlags::ACK)).unwrap();

    cache.insert_on(0, &cache.flow_key(&a, 0).unwrap()).unwrap();
    assert!(cache.lookup_on(0, &cache.flow_key(&b, 0).unwrap()).is_some());
    assert_eq!(cache.len(), 1);
}

#[test]
fn route_down_is_not_served_and_is_reaped() {
    let (cache, _) = cache_with(small_config(1));
    let key = nth_key(7);
    let path = cache.insert_on(0, &key).unwrap().unwrap();

    path.route.set_up(false);
    assert!(cache.lookup_on(0, &key).is_none());

    let report = cache.sweep();
    assert_eq!(report.route_down, 1);
    assert!(cache.is_empty());
}

#[test]
fn invalid_neighbor_is_not_served_and_is_reaped() {
    let (cache, _) = cache_with(small_config(1));
    let key = nth_key(8);
    cache.insert_on(0, &key).unwrap();

    cache.resolver().neighbor().set_valid(false);
    assert!(cache.lookup_on(0, &key).is_none());
    assert_eq!(cache.sweep().neighbor_invalid, 1);
}

#[test]
fn dead_entry_is_shadowed_by_fresh_insert() {
    let (cache, _) = cache_with(small_config(1));
    let key = nth_key(9);
    let old = cache.insert_on(0, &key).unwrap().unwrap();
    old.neighbor.set_valid(false);

    cache.resolver().replace_neighbor();
    let fresh = cache.insert_on(0, &key).unwrap().unwrap();
    assert!(!Arc::ptr_eq(&old.neighbor, &fresh.neighbor));

    let hit = cache.lookup_on(0, &key).unwrap();
    assert!(hit.same_as(&fresh));

    // Only the dead one goes
    assert_eq!(cache.sweep().neighbor_invalid, 1);
    assert_eq!(cache.len(), 1);
}

#[test]
fn pending_resolution_is_not_cached() {
    let (cache, _) = cache_with(small_config(1));
    cache.resolver().set_mode(NeighborMode::Pending);

    assert!(cache.insert_on(0, &nth_key(1)).unwrap().is_none());
    assert!(cache.is_empty());
    assert_eq!(cache.stats().ipv4.pending, 1);

    cache.resolver().set_mode(NeighborMode::Resolved);
    assert!(cache.insert_on(0, &nth_key(1)).unwrap().is_some());
}

#[test]
fn failed_resolution_is_returned_and_not_cached() {
    let (cache, _) = cache_with(small_config(1));
    let key = nth_key(2);

    cache.resolver().set_mode(NeighborMode::Failed);
    assert_eq!(
        cache.insert_on(0, &key).unwrap_err(),
        MockError::NeighborFailed(key.dst())
    );

    cache.resolver().set_default_route(None);
    assert_eq!(
        cache.lookup_or_insert_on(0, &key).unwrap_err(),
        MockError::NoRoute(key.dst())
    );
    assert!(cache.is_empty());
    assert!(cache.snapshot().is_empty());
}

#[test]
fn uncachable_destinations() {
    let (cache, _) = cache_with(small_config(1));

    let loopback_dst = v4_key([10, 0, 0, 1], [127, 0, 0, 1]);
    let multicast_dst = v4_key([10, 0, 0, 1], [224, 0, 0, 5]);
    let broadcast_dst = v4_key([10, 0, 0, 1], [255, 255, 255, 255]);
    for key in [loopback_dst, multicast_dst, broadcast_dst] {
        assert!(cache.insert_on(0, &key).unwrap().is_none());
    }
    assert_eq!(
        cache.resolver().route_lookups.load(Ordering::Relaxed),
        0
    );

    let resolver = cache.resolver();
    resolver.add_route(v4([10, 9, 0, 1]), MockRoute::with_kind("lo0", RouteKind::Loopback));
    resolver.add_route(v4([10, 9, 0, 2]), MockRoute::with_kind("tun0", RouteKind::PointToPoint));
    resolver.add_route(v4([10, 9, 0, 3]), MockRoute::with_kind("local", RouteKind::Local));
    for last in 1..=3 {
        let key = v4_key([10, 0, 0, 1], [10, 9, 0, last]);
        assert!(cache.insert_on(0, &key).unwrap().is_none());
    }

    assert!(cache.is_empty());
    assert_eq!(cache.stats().ipv4.uncachable, 6);
}

#[test]
fn flush_route_reaches_every_shard() {
    let (cache, _) = cache_with(small_config(4));
    let wan = MockRoute::new("wan");
    let lan = MockRoute::new("lan");

    for i in 0..64u16 {
        let key = nth_key(i);
        let route = if i % 2 == 0 { &wan } else { &lan };
        cache.resolver().add_route(key.dst(), route.clone());
        cache.insert_on(usize::from(i % 4), &key).unwrap().unwrap();
    }
    assert_eq!(cache.len(), 64);

    assert_eq!(cache.flush_route(&wan), 32);

    // Resolver map plus our handle, nothing held by the cache
    assert_eq!(Arc::strong_count(&wan), 33);
    for i in (0..64u16).step_by(2) {
        assert!(cache.lookup_on(usize::from(i % 4), &nth_key(i)).is_none());
    }
    for i in (1..64u16).step_by(2) {
        assert!(cache.lookup_on(usize::from(i % 4), &nth_key(i)).is_some());
    }
    assert_eq!(cache.len(), 32);
}

#[test]
fn flush_all_empties_both_families() {
    let (cache, _) = cache_with(small_config(2));
    let v6 = FlowKey::from_ports(
        IpAddr::V6(Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 1)),
        IpAddr::V6(Ipv6Addr::new(0x2001, 0xdb8, 1, 0, 0, 0, 0, 1)),
        5353,
        53,
        17,
        0,
    )
    .unwrap();

    cache.insert_on(0, &nth_key(1)).unwrap();
    cache.insert_on(1, &v6).unwrap();
    assert_eq!(cache.table(AddressFamily::Ipv6).len(), 1);

    assert_eq!(cache.flush_all(), 2);
    assert!(cache.is_empty());
    assert_eq!(cache.table(AddressFamily::Ipv4).occupied_buckets(), 0);
    assert_eq!(cache.table(AddressFamily::Ipv6).occupied_buckets(), 0);
}

#[test]
fn fib_separates_flows() {
    let (cache, _) = cache_with(small_config(1));
    let main = v4_key([10, 0, 0, 1], [10, 0, 0, 2]);
    let vrf = FlowKey::from_addrs(main.src(), main.dst(), 7).unwrap();

    cache.insert_on(0, &main).unwrap();
    assert!(cache.lookup_on(0, &vrf).is_none());
    cache.insert_on(0, &vrf).unwrap();
    assert_eq!(cache.len(), 2);
}

#[test]
fn pool_exhaustion_and_pressure() {
    let config = FlowTableConfig {
        max_flows: 8,
        ..small_config(2)
    };
    let (cache, clock) = cache_with(config);

    for i in 0..6 {
        cache.insert_on(usize::from(i % 2), &nth_key(i)).unwrap().unwrap();
    }
    assert!(!cache.under_pressure());
    assert_eq!(cache.sweep_interval(), Duration::from_secs(20));

    cache.insert_on(0, &nth_key(6)).unwrap().unwrap();
    assert!(cache.under_pressure());
    assert_eq!(cache.max_idle(), Duration::from_secs(5));
    assert_eq!(cache.sweep_interval(), Duration::from_secs(4));

    cache.insert_on(1, &nth_key(7)).unwrap().unwrap();
    assert!(cache.insert_on(0, &nth_key(8)).unwrap().is_none());
    assert_eq!(cache.stats().total().pool_exhausted, 1);

    // Keep two flows warm, let the rest age past the short limit
    clock.set_secs(4);
    cache.lookup_on(0, &nth_key(0)).unwrap();
    cache.lookup_on(1, &nth_key(1)).unwrap();
    clock.set_secs(8);

    let report = cache.sweep();
    assert!(report.under_pressure);
    assert_eq!(report.idle, 6);
    assert_eq!(cache.len(), 2);
    assert!(!cache.under_pressure());
    assert!(cache.insert_on(0, &nth_key(8)).unwrap().is_some());
}

#[test]
fn stats_track_outcomes() {
    let (cache, _) = cache_with(small_config(1));
    let key = nth_key(3);

    cache.lookup_or_insert_on(0, &key).unwrap();
    cache.lookup_or_insert_on(0, &key).unwrap();
    cache.insert_on(0, &key).unwrap();
    cache.flush_all();

    let stats = cache.stats();
    assert!(stats.enabled);
    assert_eq!(stats.entries, 0);
    assert_eq!(stats.ipv4.lookups, 2);
    assert_eq!(stats.ipv4.hits, 1);
    assert_eq!(stats.ipv4.inserts, 1);
    assert_eq!(stats.ipv4.duplicates, 1);
    assert_eq!(stats.ipv4.frees, 1);
    assert!((stats.hit_rate() - 0.5).abs() < f64::EPSILON);
}

#[test]
fn disabled_cache_serves_nothing() {
    let config = FlowTableConfig {
        enabled: false,
        ..small_config(1)
    };
    let (cache, _) = cache_with(config);

    assert!(!cache.is_enabled());
    assert!(cache.lookup_or_insert_on(0, &nth_key(1)).unwrap().is_none());
    assert_eq!(cache.resolver().route_lookups.load(Ordering::Relaxed), 0);

    cache.set_enabled(true);
    assert!(cache.lookup_or_insert_on(0, &nth_key(1)).unwrap().is_some());
    cache.set_enabled(false);
    assert!(cache.is_empty());
}

#[test]
fn config_from_toml_drives_cache() {
    let config = FlowTableConfig::from_toml_str(
        r#"
        shards = 3
        ipv4_buckets = 1000
        max_flows = 100
        idle_timeout_secs = 10
        pressure_idle_timeout_secs = 2
        "#,
    )
    .unwrap();
    let (cache, clock) = cache_with(config);
    assert_eq!(cache.shard_count(), 3);
    assert_eq!(cache.table(AddressFamily::Ipv4).bucket_count(), 1024);

    cache.insert_on(2, &nth_key(1)).unwrap();
    clock.set_secs(11);
    assert_eq!(cache.sweep().idle, 1);
}

#[test]
fn resolver_is_not_called_on_hit() {
    let (cache, _) = cache_with(small_config(1));
    let key = nth_key(4);
    cache.lookup_or_insert_on(0, &key).unwrap();
    for _ in 0..10 {
        cache.lookup_or_insert_on(0, &key).unwrap();
    }
    assert_eq!(cache.resolver().route_lookups.load(Ordering::Relaxed), 1);
    assert_eq!(cache.resolver().neighbor_lookups.load(Ordering::Relaxed), 1);
}
