//! Route resolution for (source, destination, network namespace) tuples.
//!
//! [`RouteCache`] sits on the per-connection enrichment path and answers from
//! memory whenever it can. On a miss it delegates to a [`Router`], normally a
//! [`NetlinkRouter`] that asks the kernel routing table.
//!
//! ```text
//! RouteCache::get ──► LRU + TTL check ──miss──► Router::route
//!                                                  │
//!                           non-root netns ◄───────┤
//!                                 │                │
//!                                 ▼                ▼
//!                     InterfaceResolver   RTM_GETROUTE(dest, src, iif)
//! ```

pub mod cache;
pub mod iface;
pub mod netlink;

use std::{
    net::{IpAddr, Ipv4Addr},
    sync::Arc,
};

pub use cache::{Clock, RouteCache, SystemClock};
pub use iface::{InterfaceEntry, InterfaceResolver};
pub use netlink::{KernelRoute, NetlinkHandle, NetlinkRouter, RouteGetOptions, RouteHandle};

use crate::stats::{Stats, StatsReporter};

/// Address family of a routing key, derived from the destination address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressFamily {
    Inet,
    Inet6,
}

impl From<&IpAddr> for AddressFamily {
    fn from(addr: &IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => Self::Inet,
            IpAddr::V6(_) => Self::Inet6,
        }
    }
}

/// Gateway and egress interface for a resolved route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Route {
    /// Next hop. Unspecified when the destination is directly reachable.
    pub gateway: IpAddr,
    /// Egress interface index.
    pub ifindex: u32,
}

impl Default for Route {
    fn default() -> Self {
        Self {
            gateway: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            ifindex: 0,
        }
    }
}

/// Cache key for a routing tuple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RoutingKey {
    source: IpAddr,
    dest: IpAddr,
    netns: u32,
    family: AddressFamily,
}

impl RoutingKey {
    pub fn new(source: IpAddr, dest: IpAddr, netns: u32) -> Self {
        Self {
            source,
            dest,
            netns,
            family: AddressFamily::from(&dest),
        }
    }

    pub fn family(&self) -> AddressFamily {
        self.family
    }
}

/// Resolves the route for a (source, destination, network namespace) tuple.
///
/// Implementations are always driven through a [`RouteCache`], which
/// serializes every call, so `route` takes `&mut self` and implementations
/// need no locking of their own.
pub trait Router: Send {
    /// Returns the route, or `None` when it cannot be resolved.
    fn route(&mut self, source: IpAddr, dest: IpAddr, netns: u32) -> Option<Route>;

    /// Shared handle on this router's counters, readable without the cache lock.
    fn reporter(&self) -> Arc<dyn StatsReporter>;

    /// Snapshot of this router's counters.
    fn stats(&self) -> Stats {
        self.reporter().report()
    }

    /// Releases kernel resources held by the router.
    fn close(&mut self);
}
