use std::{net::IpAddr, num::NonZeroUsize, sync::Arc};

use lru::LruCache;
use nix::net::if_::InterfaceFlags;
use tracing::trace;

use crate::route::netlink::{NetlinkStats, RouteGetOptions, RouteHandle};

/// Should comfortably fit every interface on a node.
pub const DEFAULT_INTERFACE_CACHE_CAPACITY: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InterfaceKey {
    pub source: IpAddr,
    pub netns: u32,
}

/// Host interface carrying traffic from a source address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterfaceEntry {
    pub index: u32,
    pub loopback: bool,
}

/// Resolves and caches the ingress interface of (source address, namespace) pairs.
///
/// Entries never expire: the interface bound to an address inside a namespace
/// is taken as stable for the life of the process. Only capacity eviction
/// drops them.
pub struct InterfaceResolver {
    cache: LruCache<InterfaceKey, InterfaceEntry>,
    stats: Arc<NetlinkStats>,
}

impl InterfaceResolver {
    pub fn new(capacity: usize, stats: Arc<NetlinkStats>) -> Self {
        let cache = match NonZeroUsize::new(capacity) {
            Some(cap) => LruCache::new(cap),
            None => LruCache::unbounded(),
        };
        Self { cache, stats }
    }

    /// Returns the interface traffic from `source` in `netns` arrives on, or
    /// `None` when the kernel cannot tell.
    pub fn resolve<H: RouteHandle + ?Sized>(
        &mut self,
        handle: &mut H,
        source: IpAddr,
        netns: u32,
    ) -> Option<InterfaceEntry> {
        self.stats.if_cache_lookups.inc();

        let key = InterfaceKey { source, netns };
        if let Some(entry) = self.cache.get(&key) {
            return Some(*entry);
        }
        self.stats.if_cache_misses.inc();

        // route towards the source itself: its egress link is our ingress
        self.stats.netlink_lookups.inc();
        let routes = match handle.route_get(source, &RouteGetOptions::default()) {
            Ok(routes) => routes,
            Err(e) => {
                self.stats.netlink_errors.inc();
                trace!(
                    event.name = "interface_resolver.route_error",
                    src = %source,
                    netns = netns,
                    error = %e,
                    "could not get route to source"
                );
                return None;
            }
        };
        if routes.len() != 1 {
            self.stats.netlink_misses.inc();
            return None;
        }
        let link_index = routes[0].link_index;

        // the name is needed to look up the flags
        let name = match handle.interface_name(link_index) {
            Ok(name) => name,
            Err(e) => {
                self.stats.if_cache_errors.inc();
                trace!(
                    event.name = "interface_resolver.name_error",
                    link_index = link_index,
                    error = %e,
                    "error getting interface name"
                );
                return None;
            }
        };
        let flags = match handle.interface_flags(&name) {
            Ok(flags) => flags,
            Err(e) => {
                self.stats.if_cache_errors.inc();
                trace!(
                    event.name = "interface_resolver.flags_error",
                    link_index = link_index,
                    iface = %name,
                    error = %e,
                    "error getting interface flags"
                );
                return None;
            }
        };

        let entry = InterfaceEntry {
            index: link_index,
            loopback: flags.contains(InterfaceFlags::IFF_LOOPBACK),
        };
        trace!(
            event.name = "interface_resolver.added",
            src = %source,
            netns = netns,
            iface = %name,
            ifindex = entry.index,
            loopback = entry.loopback,
            "adding interface entry"
        );

        if self.cache.push(key, entry).is_none() {
            self.stats.if_cache_size.inc();
        }
        Some(entry)
    }
}
