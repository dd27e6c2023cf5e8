mod runtime;

use mermin_route::{NetlinkRouter, RouteCache};
use tracing::{info, warn};
use tracing_subscriber::{
    EnvFilter, prelude::__tracing_subscriber_SubscriberExt, util::SubscriberInitExt,
};

use crate::runtime::{Runtime, conf::Conf};

fn main() -> anyhow::Result<()> {
    let Runtime { cli, conf } = Runtime::new()?;
    let Conf {
        log_level,
        capacity,
        ttl,
        interface_cache_capacity,
        proc_root,
        ..
    } = conf;

    let filter = EnvFilter::new(format!("warn,mermin_route={log_level}"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let router = NetlinkRouter::with_interface_capacity(&proc_root, interface_cache_capacity)?;
    let netns = cli.netns.unwrap_or_else(|| router.root_netns());
    info!(
        event.name = "route_cache.starting",
        capacity = capacity,
        ttl = %humantime::format_duration(ttl),
        proc_root = %proc_root.display(),
        netns = netns,
        "resolving routes"
    );

    let cache = RouteCache::with_ttl(capacity, router, ttl);
    for round in 0..cli.repeat {
        for dest in &cli.dest {
            match cache.get(cli.source, *dest, netns) {
                Some(route) => info!(
                    event.name = "route_cache.resolved",
                    round = round,
                    src = %cli.source,
                    dst = %dest,
                    netns = netns,
                    gateway = %route.gateway,
                    ifindex = route.ifindex,
                    "route resolved"
                ),
                None => warn!(
                    event.name = "route_cache.unresolved",
                    round = round,
                    src = %cli.source,
                    dst = %dest,
                    netns = netns,
                    "no route found"
                ),
            }
        }
    }

    let stats = cache.stats();
    println!("{}", serde_json::to_string_pretty(&stats)?);

    cache.close();
    Ok(())
}
