//! Cached kernel route resolution.
//!
//! A [`RouteCache`] answers "which gateway and interface does traffic from
//! `source` to `dest`, originating in network namespace `netns`, leave
//! through?" by consulting a [`Router`] and remembering positive answers for
//! a bounded time. [`NetlinkRouter`] is the kernel-backed router: it queries
//! the root namespace's routing table over rtnetlink and, for traffic from
//! pods, pins the lookup to the host interface the traffic arrives on.

pub mod error;
pub mod netns;
pub mod route;
pub mod stats;

pub use error::RouteError;
pub use route::{NetlinkRouter, Route, RouteCache, Router, RoutingKey};
pub use stats::{StatValue, Stats, StatsReporter};
