use std::{
    net::IpAddr,
    num::NonZeroUsize,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use lru::LruCache;
use tracing::{debug, trace};

use crate::{
    route::{Route, Router, RoutingKey},
    stats::{self, Counter, StatValue, Stats, StatsReporter},
};

/// How long a resolved route is served from the cache.
pub const DEFAULT_TTL: Duration = Duration::from_secs(2 * 60);

/// Wall clock used for route expiry, expressed as time since the Unix epoch.
pub trait Clock: Send + Sync {
    fn now(&self) -> Duration;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy)]
struct CacheEntry {
    route: Route,
    /// Epoch second at which the entry stops being served.
    expires_at: u64,
}

#[derive(Debug, Default)]
struct RouteCacheStats {
    size: Counter,
    misses: Counter,
    lookups: Counter,
    expires: Counter,
}

impl StatsReporter for RouteCacheStats {
    fn report(&self) -> Stats {
        stats::collect([
            ("size", &self.size),
            ("misses", &self.misses),
            ("lookups", &self.lookups),
            ("expires", &self.expires),
        ])
    }
}

struct Inner {
    cache: LruCache<RoutingKey, CacheEntry>,
    router: Box<dyn Router>,
}

/// Bounded, TTL-aware cache of routes in front of a [`Router`].
///
/// ## Concurrency Model
///
/// - A single mutex guards the LRU and the wrapped router, including the
///   router call made on a miss. Concurrent misses on the same key resolve
///   once.
/// - Counters are atomics living outside the mutex, so [`RouteCache::stats`]
///   never waits for an in-flight kernel query.
pub struct RouteCache {
    inner: Mutex<Inner>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
    stats: Arc<RouteCacheStats>,
    router_stats: Arc<dyn StatsReporter>,
}

impl RouteCache {
    /// Creates a cache holding up to `capacity` routes for [`DEFAULT_TTL`].
    ///
    /// A capacity of zero leaves the cache unbounded.
    pub fn new(capacity: usize, router: impl Router + 'static) -> Self {
        Self::with_ttl(capacity, router, DEFAULT_TTL)
    }

    pub fn with_ttl(capacity: usize, router: impl Router + 'static, ttl: Duration) -> Self {
        let cache = match NonZeroUsize::new(capacity) {
            Some(cap) => LruCache::new(cap),
            None => LruCache::unbounded(),
        };
        let router_stats = router.reporter();

        debug!(
            event.name = "route_cache.initialized",
            cache_capacity = capacity,
            cache_ttl_secs = ttl.as_secs(),
            "route cache initialized"
        );

        Self {
            inner: Mutex::new(Inner {
                cache,
                router: Box::new(router),
            }),
            ttl,
            clock: Arc::new(SystemClock),
            stats: Arc::new(RouteCacheStats::default()),
            router_stats,
        }
    }

    /// Replaces the clock used to stamp and check entry expiry.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Returns the route for the tuple, resolving it through the router on a
    /// miss or after the cached entry expired.
    ///
    /// Unresolved tuples are never cached; the next lookup asks the router again.
    pub fn get(&self, source: IpAddr, dest: IpAddr, netns: u32) -> Option<Route> {
        let mut guard = self.lock();
        let inner = &mut *guard;

        self.stats.lookups.inc();
        let key = RoutingKey::new(source, dest, netns);

        let cached = inner.cache.get(&key).copied();
        match cached {
            Some(entry) if self.clock.now().as_secs() < entry.expires_at => {
                return Some(entry.route);
            }
            Some(_) => {
                self.stats.expires.inc();
                inner.cache.pop(&key);
                self.stats.size.dec();
                trace!(
                    event.name = "route_cache.expired",
                    src = %source,
                    dst = %dest,
                    netns = netns,
                    "removed expired route entry"
                );
            }
            None => self.stats.misses.inc(),
        }

        let route = inner.router.route(source, dest, netns)?;
        let entry = CacheEntry {
            route,
            expires_at: self
                .clock
                .now()
                .checked_add(self.ttl)
                .map_or(u64::MAX, |d| d.as_secs()),
        };

        match inner.cache.push(key, entry) {
            None => self.stats.size.inc(),
            Some((evicted, _)) => trace!(
                event.name = "route_cache.evicted",
                src = %evicted.source,
                dst = %evicted.dest,
                netns = evicted.netns,
                "evicted least recently used route entry"
            ),
        }

        Some(route)
    }

    /// Snapshot of the cache counters, with the router's counters nested
    /// under `"router"`.
    pub fn stats(&self) -> Stats {
        let mut stats = self.stats.report();
        stats.insert(
            "router".to_string(),
            StatValue::Group(self.router_stats.report()),
        );
        stats
    }

    /// Releases the wrapped router's kernel resources.
    pub fn close(&self) {
        self.lock().router.close();
        debug!(event.name = "route_cache.closed", "route cache closed");
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
