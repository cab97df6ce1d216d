//! Server configuration: CLI surface and its validated form.

use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;

use crate::server::auth::Principal;

#[derive(Debug, Parser)]
#[command(name = "hail-server", version, about = "Duplex streaming greeting server")]
pub struct CliArgs {
    /// Socket address to listen on.
    #[arg(long, env = "HAIL_ADDR", default_value = "127.0.0.1:8888")]
    pub addr: SocketAddr,

    /// Milliseconds between consecutive greeting responses.
    #[arg(long, env = "HAIL_CADENCE_MS", default_value_t = 1_000)]
    pub cadence_ms: u64,

    /// Maximum number of responses emitted per greeting stream.
    #[arg(long, env = "HAIL_RESPONSE_CAP", default_value_t = 100)]
    pub response_cap: usize,

    /// Registered principal as `username:secret[:role]`. Repeatable.
    #[arg(
        long = "user",
        env = "HAIL_USERS",
        value_delimiter = ',',
        default_value = "jlong:pw:USER"
    )]
    pub users: Vec<String>,
}

/// Validated server configuration, written once at startup.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    pub cadence: Duration,
    pub response_cap: usize,
    pub principals: Vec<Principal>,
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.cadence_ms == 0 {
            anyhow::bail!("--cadence-ms must be greater than 0");
        }
        if args.response_cap == 0 {
            anyhow::bail!("--response-cap must be greater than 0");
        }
        let principals = args
            .users
            .iter()
            .map(|spec| Principal::parse(spec))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            addr: args.addr,
            cadence: Duration::from_millis(args.cadence_ms),
            response_cap: args.response_cap,
            principals,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(argv: &[&str]) -> CliArgs {
        CliArgs::parse_from(std::iter::once("hail-server").chain(argv.iter().copied()))
    }

    #[test]
    fn defaults_are_one_second_cadence_and_a_cap_of_100() {
        let config = ServerConfig::try_from(args(&[])).unwrap();
        assert_eq!(config.cadence, Duration::from_secs(1));
        assert_eq!(config.response_cap, 100);
        assert_eq!(config.principals.len(), 1);
        assert_eq!(config.principals[0].username, "jlong");
    }

    #[test]
    fn zero_cadence_is_rejected() {
        assert!(ServerConfig::try_from(args(&["--cadence-ms", "0"])).is_err());
    }

    #[test]
    fn multiple_users_parse() {
        let config =
            ServerConfig::try_from(args(&["--user", "alice:s3cret", "--user", "bob:pw2:ADMIN"]))
                .unwrap();
        assert_eq!(config.principals.len(), 2);
        assert_eq!(config.principals[1].roles, vec!["ADMIN".to_owned()]);
    }
}
