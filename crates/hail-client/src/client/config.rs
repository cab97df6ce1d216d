//! Client configuration: CLI surface and its validated form.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use hail_wire::Credentials;

use crate::client::health::HealthBehavior;

#[derive(Debug, Parser)]
#[command(
    name = "hail-client",
    version,
    about = "Greeting client: health responder plus the scheduled ingestion pipeline"
)]
pub struct CliArgs {
    /// Server host.
    #[arg(long, env = "HAIL_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Server port.
    #[arg(long, env = "HAIL_PORT", default_value_t = 8888)]
    pub port: u16,

    /// Handshake username.
    #[arg(long, env = "HAIL_USERNAME", default_value = "jlong")]
    pub username: String,

    /// Handshake secret.
    #[arg(long, env = "HAIL_SECRET", default_value = "pw")]
    pub secret: String,

    /// Milliseconds between ingestion polls.
    #[arg(long, env = "HAIL_POLL_MS", default_value_t = 1_000)]
    pub poll_ms: u64,

    /// In-memory ingestion record. Repeatable; consumed in order.
    #[arg(long = "name")]
    pub names: Vec<String>,

    /// Poll a directory instead: each new file's contents become one
    /// record.
    #[arg(long, env = "HAIL_INGEST_DIR", conflicts_with = "names")]
    pub ingest_dir: Option<PathBuf>,

    /// How the health responder behaves.
    #[arg(long, value_enum, env = "HAIL_HEALTH_MODE", default_value = "random")]
    pub health_mode: HealthMode,

    /// With `--health-mode unhealthy-after`: number of healthy samples
    /// before the first unhealthy one.
    #[arg(long, default_value_t = 4)]
    pub healthy_samples: u32,

    /// With `--health-mode random`: probability a sample is healthy.
    #[arg(long, default_value_t = 0.8)]
    pub healthy_probability: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum HealthMode {
    Always,
    Random,
    UnhealthyAfter,
}

/// Where ingestion records come from.
#[derive(Debug, Clone)]
pub enum SourceConfig {
    Memory(Vec<String>),
    Directory(PathBuf),
}

/// Validated client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub addr: String,
    pub credentials: Credentials,
    pub poll: Duration,
    pub source: SourceConfig,
    pub health: HealthBehavior,
}

impl TryFrom<CliArgs> for ClientConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.poll_ms == 0 {
            anyhow::bail!("--poll-ms must be greater than 0");
        }
        let health = match args.health_mode {
            HealthMode::Always => HealthBehavior::Always,
            HealthMode::UnhealthyAfter => HealthBehavior::UnhealthyAfter {
                healthy_samples: args.healthy_samples,
            },
            HealthMode::Random => {
                if !(0.0..=1.0).contains(&args.healthy_probability) {
                    anyhow::bail!("--healthy-probability must be within [0, 1]");
                }
                HealthBehavior::Random {
                    healthy_probability: args.healthy_probability,
                }
            }
        };
        let source = match args.ingest_dir {
            Some(dir) => SourceConfig::Directory(dir),
            // No source configured: a single record carrying the username
            // reproduces the plain one-shot greeting call.
            None if args.names.is_empty() => SourceConfig::Memory(vec![args.username.clone()]),
            None => SourceConfig::Memory(args.names),
        };
        Ok(Self {
            addr: format!("{}:{}", args.host, args.port),
            credentials: Credentials::new(args.username, args.secret),
            poll: Duration::from_millis(args.poll_ms),
            source,
            health,
        })
    }
}
