use std::{net::IpAddr, path::PathBuf};

use clap::Parser;
use serde::Serialize;
use tracing::Level;

use crate::runtime::conf::conf_serde::level;

/// Resolve routes through the kernel routing table via a TTL-bounded route cache.
#[derive(Parser, Debug, Serialize)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Set the path to the configuration file (e.g., "route.yaml").
    #[arg(short, long, value_name = "FILE", env = "MERMIN_ROUTE_CONFIG_PATH")]
    pub config: Option<PathBuf>,

    /// Set the application's log level (e.g., "debug", "trace").
    /// Overrides the configuration file; defaults to "info" when neither sets it.
    #[arg(short, long, value_name = "LEVEL", env = "MERMIN_ROUTE_LOG_LEVEL")]
    #[serde(
        serialize_with = "level::serialize_some",
        skip_serializing_if = "Option::is_none"
    )]
    pub log_level: Option<Level>,

    /// Source address of the traffic to route.
    #[arg(short, long, value_name = "ADDR")]
    #[serde(skip)]
    pub source: IpAddr,

    /// Destination address to resolve. May be given multiple times.
    #[arg(short, long, value_name = "ADDR", required = true)]
    #[serde(skip)]
    pub dest: Vec<IpAddr>,

    /// Network namespace inode of the source. Defaults to the root namespace.
    #[arg(short, long, value_name = "INODE")]
    #[serde(skip)]
    pub netns: Option<u32>,

    /// Number of times every destination is looked up.
    #[arg(short, long, default_value_t = 1)]
    #[serde(skip)]
    pub repeat: usize,
}
