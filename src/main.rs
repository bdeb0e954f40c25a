//! echoback: a line-based TCP echo server
//!
//! Each client sends one `\n`-terminated message and receives it back
//! behind a fixed prefix, after which the connection is closed.
//!
//! Features:
//! - Serialized dispatch: one connection handled at a time
//! - Bounded accept-to-dispatch handoff queue
//! - Graceful shutdown on Ctrl-C, propagated into in-flight handlers
//! - Configuration via CLI arguments or TOML file

mod config;
mod connection;
mod server;
mod shutdown;

use config::Config;
use server::Server;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(port = config.port, "starting echoback server");

    let (trigger, signal) = shutdown::channel();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("ctrl-c received, shutting down");
                trigger.fire();
            }
            Err(e) => error!(error = %e, "failed to listen for ctrl-c"),
        }
    });

    let server = Server::new(config);
    server.run(signal).await?;

    info!("server stopped");
    Ok(())
}
