use clap::Parser;
use thiserror::Error;

use crate::runtime::{
    cli::Cli,
    conf::{Conf, ConfError},
};

pub mod cli;
pub mod conf;

/// Parsed command line plus the layered configuration built from it.
pub struct Runtime {
    pub cli: Cli,
    pub conf: Conf,
}

impl Runtime {
    /// Parses the process arguments and loads the configuration.
    pub fn new() -> Result<Self, RuntimeError> {
        Self::from_cli(Cli::parse())
    }

    pub fn from_cli(cli: Cli) -> Result<Self, RuntimeError> {
        let (conf, cli) = Conf::new(cli)?;
        Ok(Runtime { cli, conf })
    }
}

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Conf(#[from] ConfError),
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use clap::Parser;
    use figment::Jail;

    use super::{Runtime, RuntimeError};
    use crate::runtime::cli::Cli;

    #[test]
    fn from_cli_keeps_lookup_arguments() {
        Jail::expect_with(|jail| {
            jail.create_file("route.yaml", "ttl: 10s\n")?;

            let cli = Cli::parse_from([
                "mermin-route",
                "-c",
                "route.yaml",
                "-s",
                "10.0.0.1",
                "-d",
                "10.0.0.2",
                "-r",
                "4",
            ]);
            let runtime = Runtime::from_cli(cli).expect("runtime should load");
            assert_eq!(runtime.conf.ttl, Duration::from_secs(10));
            assert_eq!(runtime.cli.repeat, 4);
            assert_eq!(runtime.cli.dest.len(), 1);

            Ok(())
        })
    }

    #[test]
    fn conf_errors_surface_unchanged() {
        Jail::expect_with(|_| {
            let cli = Cli::parse_from([
                "mermin-route",
                "-c",
                "missing.yaml",
                "-s",
                "10.0.0.1",
                "-d",
                "10.0.0.2",
            ]);
            let err = match Runtime::from_cli(cli) {
                Err(e) => e,
                Ok(_) => panic!("missing config file should fail"),
            };
            assert!(matches!(err, RuntimeError::Conf(_)));
            assert_eq!(err.to_string(), "no config file provided");

            Ok(())
        })
    }
}
