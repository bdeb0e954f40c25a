//! TCP server: accept loop, handoff channel, and serialized dispatch.
//!
//! Connections are accepted concurrently but handled strictly one at a
//! time by the dispatch loop, which also watches the shutdown signal.

use crate::config::Config;
use crate::connection::{self, HandleError};
use crate::shutdown::Shutdown;
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, error, info, warn};

/// Port used when the configuration leaves the port unset (0).
pub const DEFAULT_PORT: u16 = 8080;

/// Capacity of the handoff queue between the accept loop and the
/// dispatcher. Connections accepted while the queue is full are dropped.
const HANDOFF_CAPACITY: usize = 64;

/// Server instance
pub struct Server {
    config: Config,
}

impl Server {
    /// Create a new server instance
    pub fn new(config: Config) -> Self {
        Server { config }
    }

    /// Bind the listening socket and serve until `shutdown` fires.
    ///
    /// Returns an error only when the bind fails; the shutdown signal is
    /// the one normal way out.
    pub async fn run(&self, shutdown: Shutdown) -> Result<(), ServerError> {
        let port = resolve_port(self.config.port);

        let listener = match TcpListener::bind(("0.0.0.0", port)).await {
            Ok(listener) => listener,
            Err(e) => {
                error!(port, error = %e, "failed to bind listening socket");
                return Err(ServerError::Bind(e));
            }
        };
        info!(port, "server listening");

        serve(listener, shutdown).await;
        Ok(())
    }
}

fn resolve_port(configured: u16) -> u16 {
    if configured == 0 {
        DEFAULT_PORT
    } else {
        configured
    }
}

/// Dispatch loop: receive accepted connections from the accept task and
/// handle them one at a time, stopping when `shutdown` fires.
async fn serve(listener: TcpListener, mut shutdown: Shutdown) {
    let (handoff_tx, mut handoff_rx) = mpsc::channel(HANDOFF_CAPACITY);
    let acceptor = tokio::spawn(accept_loop(listener, handoff_tx));

    loop {
        tokio::select! {
            // Once the signal fires nothing further may be dispatched,
            // even if connections are already queued
            biased;

            _ = shutdown.recv() => {
                info!("shutdown signal received");
                break;
            }
            received = handoff_rx.recv() => match received {
                Some((stream, peer)) => {
                    match connection::handle(stream, peer, shutdown.clone()).await {
                        Ok(()) => {}
                        Err(HandleError::Cancelled) => {
                            debug!(peer = %peer, "handling aborted by shutdown");
                        }
                        Err(e) => error!(peer = %peer, error = %e, "handling failed"),
                    }
                }
                // Accept task gone; nothing left to dispatch
                None => break,
            },
        }
    }

    // Stops the accept loop and closes the listening socket. Connections
    // still queued on the channel are dropped unread.
    acceptor.abort();
}

/// Accept loop: accept forever, handing each connection to the dispatcher.
///
/// A transient accept error is logged and the loop keeps going. A full
/// handoff queue drops the new connection rather than stalling accepts.
async fn accept_loop(listener: TcpListener, handoff: mpsc::Sender<(TcpStream, SocketAddr)>) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                info!(peer = %peer, "client connected");
                match handoff.try_send((stream, peer)) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        warn!(peer = %peer, "handoff queue full, dropping connection");
                    }
                    // Dispatcher gone; stop accepting
                    Err(TrySendError::Closed(_)) => return,
                }
            }
            Err(e) => error!(error = %e, "accept failed"),
        }
    }
}

/// Server startup errors
#[derive(Debug)]
pub enum ServerError {
    Bind(std::io::Error),
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerError::Bind(e) => write!(f, "Failed to bind listening socket: {}", e),
        }
    }
}

impl std::error::Error for ServerError {}
