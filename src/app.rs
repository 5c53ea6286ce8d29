//! Application wiring: parse configuration, boot and spawn every engine,
//! start the TCP wire-protocol listener and (outside prod) the admin HTTP
//! surface, then block until a shutdown signal drains everything.
//!
//! Grounded on the teacher's `app::CoreApp`: one struct bundling
//! `ShutdownService` + config + the long-lived services, a `run()` entry
//! point that installs signal handlers before anything blocking, and a
//! final `shutdown.shutdown().await` that waits for every registered task.

use anyhow::Result;
use clap::Parser;
use tracing::info;

use crate::core::constants::{APP_NAME_LOWER, ENV_LOG};
use crate::core::{AppConfig, Cli, ShutdownService};
use crate::engines::{Engines, pubsub, queue, store, stream};
use crate::{admin, net};

pub struct App {
    pub shutdown: ShutdownService,
    pub config: AppConfig,
    pub engines: Engines,
}

impl App {
    pub async fn run() -> Result<()> {
        dotenvy::dotenv().ok();
        Self::init_logging();

        let cli = Cli::parse();
        let app = Self::init(&cli).await?;
        app.start().await
    }

    /// Boot configuration and every engine without starting the listeners.
    /// Split out from `run()` so integration tests can supply a `Cli` with
    /// fixed ports instead of parsing the test binary's own arguments.
    pub async fn init(cli: &Cli) -> Result<Self> {
        let config = AppConfig::load(cli)?;
        let shutdown = ShutdownService::new();

        let store = store::spawn(shutdown.subscribe());
        let queue = queue::spawn(config.persistence.queue_root.clone(), shutdown.subscribe()).await?;
        let stream = stream::spawn(config.persistence.stream_root.clone(), shutdown.subscribe()).await?;
        let pubsub = pubsub::spawn(config.persistence.pubsub_root.clone(), shutdown.subscribe()).await?;

        Ok(Self { shutdown, config, engines: Engines { store, queue, stream, pubsub } })
    }

    pub async fn start(self) -> Result<()> {
        self.shutdown.install_signal_handlers();
        info!(config = %self.config, "{} starting", crate::core::constants::APP_NAME);

        let net_handle = tokio::spawn(net::run(
            self.config.server.host.clone(),
            self.config.server.port,
            self.engines.clone(),
            self.shutdown.clone(),
        ));
        self.shutdown.register(flatten(net_handle)).await;

        if self.config.server.admin_enabled {
            let host = self.config.server.host.clone();
            let port = self.config.server.dashboard_port;
            let engines = self.engines.clone();
            let shutdown = self.shutdown.clone();
            admin::run(&host, port, engines, shutdown).await?;
        } else {
            info!("admin http surface disabled (NEXO_ENV=prod)");
            self.shutdown.wait().await;
        }

        self.shutdown.shutdown().await;
        Ok(())
    }

    fn init_logging() {
        let default_filter = format!("info,{APP_NAME_LOWER}=debug");
        let filter = std::env::var(ENV_LOG).or_else(|_| std::env::var("RUST_LOG")).unwrap_or(default_filter);

        tracing_subscriber::fmt().with_target(false).with_level(true).compact().with_env_filter(filter).init();
    }
}

/// Adapts a `JoinHandle<Result<()>>` into the `JoinHandle<()>` shape
/// `ShutdownService::register` awaits, logging a spawned task's error
/// instead of losing it.
fn flatten(handle: tokio::task::JoinHandle<Result<()>>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => tracing::error!(error = %err, "tcp listener task failed"),
            Err(err) => tracing::error!(error = %err, "tcp listener task panicked"),
        }
    })
}
