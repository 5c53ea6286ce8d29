//! Admin HTTP server initialization.
//!
//! Grounded on the teacher's `api::server::ApiServer::start`: bind a
//! `TcpListener`, nest route groups under one `Router`, serve with
//! `axum::serve(..).with_graceful_shutdown(shutdown.wait())`. Stripped of
//! auth/rate-limiting/CORS layering since this surface is read-only,
//! unauthenticated, and disabled outright in prod.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use axum::Router;
use axum::routing::get;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::core::ShutdownService;
use crate::engines::Engines;

use super::routes;

pub async fn run(host: &str, port: u16, engines: Engines, shutdown: ShutdownService) -> Result<()> {
    let addr: SocketAddr = format!("{host}:{port}").parse().with_context(|| format!("invalid admin bind address {host}:{port}"))?;

    let router = Router::new()
        .route("/api/store", get(routes::store_snapshot))
        .route("/api/queue", get(routes::queue_snapshot))
        .route("/api/queue/{name}/messages", get(routes::queue_messages))
        .route("/api/stream", get(routes::stream_snapshot))
        .route("/api/stream/{topic}/{partition}/messages", get(routes::stream_messages))
        .route("/api/pubsub", get(routes::pubsub_snapshot))
        .layer(TraceLayer::new_for_http())
        .with_state(engines);

    let listener = TcpListener::bind(addr).await.with_context(|| format!("failed to bind admin listener on {addr}"))?;
    info!(%addr, "admin http listener bound");

    axum::serve(listener, router).with_graceful_shutdown(shutdown.wait()).await?;

    info!("admin http listener shutting down");
    Ok(())
}
