//! Duplex streaming greeting server.
//!
//! Listens for connections, runs the authenticated handshake on each, and
//! serves the `greetings` route: a capped, cadence-paced response stream
//! raced against a reverse health subscription toward the caller.

mod server;

use std::sync::Arc;

use clap::Parser;
use hail_wire::{Authenticate, Connection, Router};
use server::auth::Authenticator;
use server::config::{CliArgs, ServerConfig};
use server::greeting::GreetingService;
use server::telemetry::init_tracing;
use tokio::net::TcpListener;
use tokio::signal;

// Using mimalloc for better performance under contention, especially in
// musl environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = ServerConfig::try_from(args)?;

    init_tracing();

    let authenticator: Arc<dyn Authenticate> =
        Arc::new(Authenticator::new(config.principals.clone()));
    let router = Arc::new(
        GreetingService::new(config.cadence, config.response_cap).register(Router::new()),
    );

    let listener = TcpListener::bind(config.addr).await?;
    tracing::info!(
        addr = %config.addr,
        cadence_ms = config.cadence.as_millis() as u64,
        response_cap = config.response_cap,
        "greeting server listening"
    );

    loop {
        tokio::select! {
            () = shutdown_signal() => {
                tracing::info!("shutdown signal received, terminating gracefully...");
                break;
            }
            accepted = listener.accept() => {
                let (socket, remote) = accepted?;
                let authenticator = Arc::clone(&authenticator);
                let router = Arc::clone(&router);
                tokio::spawn(async move {
                    serve_connection(socket, remote, authenticator, router).await;
                });
            }
        }
    }

    Ok(())
}

async fn serve_connection(
    socket: tokio::net::TcpStream,
    remote: std::net::SocketAddr,
    authenticator: Arc<dyn Authenticate>,
    router: Arc<Router>,
) {
    match Connection::accept(socket, authenticator, router).await {
        Ok(connection) => {
            tracing::info!(
                connection = connection.session().connection_id(),
                principal = connection.session().principal(),
                %remote,
                "session established"
            );
            match connection.closed().await {
                Ok(()) => tracing::info!(%remote, "connection closed"),
                Err(e) => tracing::warn!(%remote, error = %e, "connection ended with error"),
            }
        }
        Err(e) => tracing::warn!(%remote, error = %e, "handshake failed"),
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    tokio::select! {
        () = ctrl_c => tracing::info!("received Ctrl+C signal"),
        () = terminate => tracing::info!("received SIGTERM signal"),
    }
}
