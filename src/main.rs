//! frame-relay: a concurrent server for delimiter-framed text requests
//!
//! Clients send a text request terminated by `\r\n\r\n` and receive the
//! processor's response terminated the same way, on a connection that stays
//! open for further requests.
//!
//! Features:
//! - Fixed pool of worker threads, each with its own request processor
//! - 1 MiB chunked reads and writes for large payloads
//! - Per-connection read timeout and optional request size cap
//! - Graceful shutdown on Ctrl-C
//! - Configuration via CLI arguments or TOML file

mod config;
mod processor;
mod protocol;
mod protocols;
mod runtime;
mod server;

use config::Config;
use server::{Listener, Server};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        host = %config.host,
        port = config.port,
        workers = config.workers,
        processor = ?config.processor,
        read_timeout = ?config.connection.read_timeout,
        max_frame_size = ?config.connection.max_frame_size,
        "Starting frame-relay server"
    );

    // The accept loop is the only async part; connections are served on
    // worker threads.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    let result = runtime.block_on(async {
        let listener = Listener::bind(&config)?;
        info!(address = %listener.local_addr(), "Press Ctrl-C to stop");
        let factory = protocols::factory(config.processor);
        Server::new(config, factory).serve(listener, shutdown_signal()).await
    });

    // Don't wait on a worker drain that outlived the grace period.
    runtime.shutdown_background();

    result?;
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl-C, running until killed");
        std::future::pending::<()>().await;
    }
}
