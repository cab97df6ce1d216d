//! Greeting client.
//!
//! Connects to the server with setup credentials, serves the reverse
//! `health` route, and runs the ingestion pipeline: one record per poll
//! tick, one independent greeting stream per record, every response fanned
//! out to the log sink.

mod client;

use std::sync::Arc;

use clap::Parser;
use client::config::{CliArgs, ClientConfig, SourceConfig};
use client::source::IngestionSource;
use client::{health, pipeline, scheduler};
use hail_wire::{Connection, Router};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = ClientConfig::try_from(args)?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let router = Arc::new(health::register(Router::new(), config.health));
    let socket = TcpStream::connect(&config.addr).await?;
    let connection = Connection::initiate(socket, config.credentials.clone(), router).await?;
    tracing::info!(
        connection = connection.session().connection_id(),
        principal = connection.session().principal(),
        addr = %config.addr,
        "session established"
    );

    let source = match config.source {
        SourceConfig::Memory(records) => IngestionSource::memory(records),
        SourceConfig::Directory(dir) => {
            tokio::fs::create_dir_all(&dir).await?;
            tracing::info!(dir = %dir.display(), "watching ingestion directory");
            IngestionSource::directory(dir)
        }
    };

    let shutdown = CancellationToken::new();
    let requester = connection.requester();
    let ingestion = tokio::spawn(scheduler::run_ingestion(
        source,
        config.poll,
        shutdown.clone(),
        move |record| {
            let requester = requester.clone();
            tokio::spawn(async move {
                let sequence = record.sequence;
                if let Err(e) = pipeline::deliver(requester, record, pipeline::log_consumer()).await
                {
                    tracing::warn!(record = sequence, error = %e, "greeting stream failed");
                }
            });
        },
    ));

    tokio::select! {
        _ = tokio::signal::ctrl_c() => tracing::info!("received Ctrl+C signal, shutting down"),
        result = connection.closed() => match result {
            Ok(()) => tracing::info!("server closed the connection"),
            Err(e) => tracing::warn!(error = %e, "connection ended with error"),
        },
    }

    shutdown.cancel();
    ingestion.await?;
    Ok(())
}
