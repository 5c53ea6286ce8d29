//! TCP acceptor: one task binds the listening socket and hands each accepted
//! connection to its own task (spec.md §4.1, §5).

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::core::ShutdownService;
use crate::engines::Engines;

use super::connection;

pub async fn run(host: String, port: u16, engines: Engines, shutdown: ShutdownService) -> Result<()> {
    let listener = TcpListener::bind((host.as_str(), port)).await.with_context(|| format!("failed to bind TCP listener on {host}:{port}"))?;
    info!(%host, port, "tcp listener bound");

    let mut shutdown_rx = shutdown.subscribe();
    loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((socket, peer)) => {
                        debug!(%peer, "accepted connection");
                        let engines = engines.clone();
                        let conn_shutdown = shutdown.subscribe();
                        tokio::spawn(connection::handle(socket, engines, conn_shutdown));
                    }
                    Err(err) => warn!(error = %err, "accept failed"),
                }
            }
        }
    }

    info!("tcp listener shutting down");
    Ok(())
}
