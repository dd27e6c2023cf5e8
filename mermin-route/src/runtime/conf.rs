pub mod conf_serde;

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Yaml},
};
use mermin_route::route::{cache::DEFAULT_TTL, iface::DEFAULT_INTERFACE_CACHE_CAPACITY};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::Level;

use crate::runtime::{
    cli::Cli,
    conf::conf_serde::{duration, level},
};

/// Prefix of environment variables overriding configuration keys.
const ENV_PREFIX: &str = "MERMIN_ROUTE_";

/// Route cache configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Conf {
    #[serde(skip)]
    pub config_path: Option<PathBuf>,

    #[serde(with = "level")]
    pub log_level: Level,

    /// Maximum number of cached routes; 0 leaves the cache unbounded.
    /// - Default: 1024
    #[serde(default = "defaults::capacity")]
    pub capacity: usize,

    /// How long a resolved route is served before the kernel is asked again.
    /// - Default: 2m
    #[serde(default = "defaults::ttl", with = "duration")]
    pub ttl: Duration,

    /// Maximum number of cached ingress interfaces; should fit every interface on the node.
    /// - Default: 128
    #[serde(default = "defaults::interface_cache_capacity")]
    pub interface_cache_capacity: usize,

    /// procfs mount used to find the root network namespace (PID 1).
    /// - Default: /proc
    /// - Example: /host/proc when the host procfs is mounted into a container
    #[serde(default = "defaults::proc_root")]
    pub proc_root: PathBuf,
}

impl Default for Conf {
    fn default() -> Self {
        Self {
            config_path: None,
            log_level: Level::INFO,
            capacity: defaults::capacity(),
            ttl: defaults::ttl(),
            interface_cache_capacity: defaults::interface_cache_capacity(),
            proc_root: defaults::proc_root(),
        }
    }
}

mod defaults {
    use super::*;

    pub fn capacity() -> usize {
        1024
    }

    pub fn ttl() -> Duration {
        DEFAULT_TTL
    }

    pub fn interface_cache_capacity() -> usize {
        DEFAULT_INTERFACE_CACHE_CAPACITY
    }

    pub fn proc_root() -> PathBuf {
        PathBuf::from("/proc")
    }
}

impl Conf {
    /// Builds the configuration with priority
    /// Defaults < Configuration File < Environment Variables < CLI Arguments.
    pub fn new(cli: Cli) -> Result<(Self, Cli), ConfError> {
        let mut figment = Figment::new().merge(Serialized::defaults(Conf::default()));

        let config_path_to_store = if let Some(config_path) = &cli.config {
            validate_config_path(config_path)?;
            figment = figment.merge(Yaml::file(config_path));
            Some(config_path.clone())
        } else {
            None
        };

        figment = figment
            .merge(Env::prefixed(ENV_PREFIX))
            .merge(Serialized::defaults(&cli));

        let mut conf: Conf = figment.extract()?;

        conf.config_path = config_path_to_store;
        Ok((conf, cli))
    }
}

/// Validates that the given path points to an existing YAML file.
fn validate_config_path(path: &Path) -> Result<(), ConfError> {
    if !path.is_file() {
        if path.exists() {
            return Err(ConfError::InvalidConfigPath(
                path.to_string_lossy().into_owned(),
            ));
        } else {
            return Err(ConfError::NoConfigFile);
        }
    }

    match path.extension().and_then(|s| s.to_str()) {
        Some("yaml") | Some("yml") => Ok(()),
        Some(ext) => Err(ConfError::InvalidExtension(ext.to_string())),
        None => Err(ConfError::InvalidExtension("none".to_string())),
    }
}

#[derive(Debug, Error)]
pub enum ConfError {
    /// The specified configuration file does not exist.
    #[error("no config file provided")]
    NoConfigFile,
    /// The path exists but is not a file (e.g., it's a directory).
    #[error("config path '{0}' is not a valid file")]
    InvalidConfigPath(String),
    /// The file extension is not supported.
    #[error("invalid config file extension '{0}', expected yaml or yml")]
    InvalidExtension(String),
    /// The merged configuration could not be extracted.
    #[error("configuration error: {0}")]
    Extraction(#[from] Box<figment::Error>),
}

impl From<figment::Error> for ConfError {
    fn from(e: figment::Error) -> Self {
        ConfError::Extraction(Box::new(e))
    }
}

#[cfg(test)]
mod tests {
    use std::{path::PathBuf, time::Duration};

    use clap::Parser;
    use figment::Jail;
    use tracing::Level;

    use super::Conf;
    use crate::runtime::cli::Cli;

    const LOOKUP_ARGS: [&str; 5] = ["mermin-route", "-s", "10.0.0.1", "-d", "10.0.0.2"];

    fn cli_with(extra: &[&str]) -> Cli {
        Cli::parse_from(LOOKUP_ARGS.iter().chain(extra).copied())
    }

    #[test]
    fn default_impl_matches_route_cache_defaults() {
        let cfg = Conf::default();
        assert_eq!(cfg.config_path, None);
        assert_eq!(cfg.log_level, Level::INFO);
        assert_eq!(cfg.capacity, 1024);
        assert_eq!(cfg.ttl, Duration::from_secs(120));
        assert_eq!(cfg.interface_cache_capacity, 128);
        assert_eq!(cfg.proc_root, PathBuf::from("/proc"));
    }

    #[test]
    fn new_succeeds_without_config_file() {
        Jail::expect_with(|_| {
            let (cfg, _cli) = Conf::new(cli_with(&[])).expect("config should load without path");
            assert_eq!(cfg, Conf::default());

            Ok(())
        })
    }

    #[test]
    fn new_reads_yaml_file() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "route.yaml",
                r#"
capacity: 64
ttl: 30s
interface_cache_capacity: 16
proc_root: /host/proc
"#,
            )?;

            let (cfg, _cli) =
                Conf::new(cli_with(&["--config", "route.yaml"])).expect("config should load");
            assert_eq!(cfg.config_path, Some(PathBuf::from("route.yaml")));
            assert_eq!(cfg.capacity, 64);
            assert_eq!(cfg.ttl, Duration::from_secs(30));
            assert_eq!(cfg.interface_cache_capacity, 16);
            assert_eq!(cfg.proc_root, PathBuf::from("/host/proc"));

            Ok(())
        })
    }

    #[test]
    fn env_overrides_yaml_file() {
        Jail::expect_with(|jail| {
            jail.create_file("route.yaml", "capacity: 64\nttl: 30s\n")?;
            jail.set_env("MERMIN_ROUTE_CAPACITY", "256");
            jail.set_env("MERMIN_ROUTE_TTL", "5m");

            let (cfg, _cli) =
                Conf::new(cli_with(&["--config", "route.yaml"])).expect("config should load");
            assert_eq!(cfg.capacity, 256);
            assert_eq!(cfg.ttl, Duration::from_secs(300));

            Ok(())
        })
    }

    #[test]
    fn cli_log_level_wins() {
        Jail::expect_with(|jail| {
            jail.create_file("route.yaml", "log_level: error\n")?;

            let (cfg, _cli) = Conf::new(cli_with(&["--config", "route.yaml", "-l", "trace"]))
                .expect("config should load");
            assert_eq!(cfg.log_level, Level::TRACE);

            Ok(())
        })
    }

    #[test]
    fn yaml_log_level_applies_without_cli_flag() {
        Jail::expect_with(|jail| {
            jail.create_file("route.yaml", "log_level: error\n")?;

            let (cfg, _cli) =
                Conf::new(cli_with(&["--config", "route.yaml"])).expect("config should load");
            assert_eq!(cfg.log_level, Level::ERROR);

            Ok(())
        })
    }

    #[test]
    fn env_log_level_overrides_yaml() {
        Jail::expect_with(|jail| {
            jail.create_file("route.yaml", "log_level: error\n")?;
            jail.set_env("MERMIN_ROUTE_LOG_LEVEL", "debug");

            let (cfg, _cli) =
                Conf::new(cli_with(&["--config", "route.yaml"])).expect("config should load");
            assert_eq!(cfg.log_level, Level::DEBUG);

            Ok(())
        })
    }

    #[test]
    fn new_errors_with_nonexistent_config_file() {
        Jail::expect_with(|_| {
            let err = Conf::new(cli_with(&["--config", "nonexistent.yaml"]))
                .expect_err("expected error with nonexistent file");
            assert!(err.to_string().contains("no config file provided"));

            Ok(())
        })
    }

    #[test]
    fn new_errors_with_directory_as_config_path() {
        Jail::expect_with(|jail| {
            jail.create_dir("a_directory")?;

            let err = Conf::new(cli_with(&["--config", "a_directory"]))
                .expect_err("expected error with directory path");
            assert!(err.to_string().contains("is not a valid file"));

            Ok(())
        })
    }

    #[test]
    fn new_errors_with_invalid_config_extension() {
        Jail::expect_with(|jail| {
            jail.create_file("route.toml", "")?;

            let err = Conf::new(cli_with(&["--config", "route.toml"]))
                .expect_err("expected error with invalid extension");
            assert!(err.to_string().contains("invalid config file extension"));

            Ok(())
        })
    }

    #[test]
    fn new_errors_with_invalid_ttl() {
        Jail::expect_with(|jail| {
            jail.create_file("route.yaml", "ttl: soon\n")?;

            let err = Conf::new(cli_with(&["--config", "route.yaml"]))
                .expect_err("expected error with unparsable ttl");
            assert!(err.to_string().contains("configuration error"));

            Ok(())
        })
    }
}
