//! Tests against the live kernel routing table.
//!
//! The router tests also need permission to enter PID 1's network namespace.
//! Run them with `cargo test -- --ignored` on a Linux host.

use std::net::{IpAddr, Ipv4Addr};

use mermin_route::{
    NetlinkRouter, RouteCache, Router, StatValue,
    netns,
    route::{NetlinkHandle, RouteGetOptions, RouteHandle},
};
use nix::net::if_::InterfaceFlags;

const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

#[test]
#[ignore = "requires a Linux network stack"]
fn handle_resolves_localhost_to_loopback() {
    let mut handle = NetlinkHandle::open().expect("open netlink handle");

    let routes = handle
        .route_get(LOCALHOST, &RouteGetOptions::default())
        .expect("route to localhost");
    assert_eq!(routes.len(), 1);
    assert_ne!(routes[0].link_index, 0);
    assert_eq!(routes[0].gateway, None);

    let name = handle
        .interface_name(routes[0].link_index)
        .expect("loopback interface name");
    assert_eq!(name, "lo");

    let flags = handle.interface_flags(&name).expect("loopback flags");
    assert!(flags.contains(InterfaceFlags::IFF_LOOPBACK));

    handle.close();
    assert!(handle.interface_name(routes[0].link_index).is_err());
    assert!(
        handle
            .route_get(LOCALHOST, &RouteGetOptions::default())
            .is_err()
    );
}

#[test]
#[ignore = "requires a Linux network stack"]
fn handle_reports_unknown_interface() {
    let handle = NetlinkHandle::open().expect("open netlink handle");

    assert!(handle.interface_name(u32::MAX).is_err());
    assert!(handle.interface_flags("mermin-nope0").is_err());
}

#[test]
#[ignore = "requires access to PID 1's network namespace"]
fn router_resolves_localhost_from_root_namespace() {
    let router = NetlinkRouter::new("/proc").expect("netlink router");
    let root = router.root_netns();
    assert_eq!(
        root,
        netns::netns_inode("/proc", netns::ROOT_PID).expect("root netns inode")
    );

    let cache = RouteCache::new(16, router);
    let first = cache
        .get(LOCALHOST, LOCALHOST, root)
        .expect("route to localhost");
    let second = cache
        .get(LOCALHOST, LOCALHOST, root)
        .expect("cached route to localhost");
    assert_eq!(first, second);

    let stats = cache.stats();
    let router_stats = stats
        .get("router")
        .and_then(StatValue::as_group)
        .expect("router stats");
    assert_eq!(
        router_stats.get("netlink_lookups").and_then(StatValue::as_counter),
        Some(1)
    );

    cache.close();
}

#[test]
#[ignore = "requires access to PID 1's network namespace"]
fn router_stats_start_at_zero() {
    let mut router = NetlinkRouter::new("/proc").expect("netlink router");

    let stats = router.stats();
    assert!(stats.values().all(|v| v.as_counter() == Some(0)));

    router.close();
}
