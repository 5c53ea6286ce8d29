//! Layered configuration: environment variables and CLI flags only.
//!
//! Unlike the teacher's `core::config`, there is no JSON profile/local config
//! file layer here — spec.md §6 names environment variables as the only
//! configuration surface, and CLI flags exist solely as the `clap` `env`
//! fallback mechanism already wires up for free.

use std::fmt;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};

use super::cli::Cli;
use super::constants::{DEFAULT_DASHBOARD_PORT, DEFAULT_HOST, DEFAULT_PORT};

/// TCP + HTTP listener configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub dashboard_port: u16,
    /// `false` when `NEXO_ENV=prod`: the admin HTTP surface is not bound.
    pub admin_enabled: bool,
}

/// Where each durable engine may place its append-only segment files.
/// `None` until a queue/topic actually asks for `file_sync`/`file_async`
/// persistence; resolving a root that was never configured is a startup
/// failure (spec.md §6: "missing required variables cause startup failure").
#[derive(Debug, Clone, Default)]
pub struct PersistenceRootsConfig {
    pub queue_root: Option<PathBuf>,
    pub stream_root: Option<PathBuf>,
    pub pubsub_root: Option<PathBuf>,
}

impl PersistenceRootsConfig {
    pub fn require_queue_root(&self) -> Result<&PathBuf> {
        self.queue_root
            .as_ref()
            .context("QUEUE_ROOT_PERSISTENCE_PATH is required for file-backed queue persistence")
    }

    pub fn require_stream_root(&self) -> Result<&PathBuf> {
        self.stream_root.as_ref().context(
            "STREAM_ROOT_PERSISTENCE_PATH is required for file-backed stream persistence",
        )
    }

    pub fn require_pubsub_root(&self) -> Result<&PathBuf> {
        self.pubsub_root.as_ref().context(
            "PUBSUB_ROOT_PERSISTENCE_PATH is required for file-backed retained-value persistence",
        )
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub persistence: PersistenceRootsConfig,
}

impl fmt::Display for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "server={}:{} dashboard={} admin_enabled={}",
            self.server.host, self.server.port, self.server.dashboard_port, self.server.admin_enabled
        )
    }
}

impl AppConfig {
    /// Load configuration from CLI flags / environment variables.
    ///
    /// Priority: explicit CLI flag, then the flag's `env = ...` fallback
    /// (already resolved by `clap` into `Option<T>` at parse time), then the
    /// hardcoded default.
    pub fn load(cli: &Cli) -> Result<Self> {
        let host = cli.host.clone().unwrap_or_else(|| DEFAULT_HOST.to_string());
        let port = cli.port.unwrap_or(DEFAULT_PORT);
        let dashboard_port = cli.dashboard_port.unwrap_or(DEFAULT_DASHBOARD_PORT);

        let env = cli.env.clone().unwrap_or_default();
        let admin_enabled = env != "prod";

        if port == dashboard_port {
            bail!(
                "SERVER_PORT and SERVER_DASHBOARD_PORT must differ (both resolved to {})",
                port
            );
        }

        let persistence = PersistenceRootsConfig {
            queue_root: cli.queue_root.clone().map(PathBuf::from),
            stream_root: cli.stream_root.clone().map(PathBuf::from),
            pubsub_root: cli.pubsub_root.clone().map(PathBuf::from),
        };

        Ok(Self {
            server: ServerConfig {
                host,
                port,
                dashboard_port,
                admin_enabled,
            },
            persistence,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bare_cli() -> Cli {
        Cli {
            host: None,
            port: None,
            dashboard_port: None,
            env: None,
            queue_root: None,
            stream_root: None,
            pubsub_root: None,
        }
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = AppConfig::load(&bare_cli()).unwrap();
        assert_eq!(config.server.host, DEFAULT_HOST);
        assert_eq!(config.server.port, DEFAULT_PORT);
        assert_eq!(config.server.dashboard_port, DEFAULT_DASHBOARD_PORT);
        assert!(config.server.admin_enabled);
    }

    #[test]
    fn prod_env_disables_admin() {
        let mut cli = bare_cli();
        cli.env = Some("prod".to_string());
        let config = AppConfig::load(&cli).unwrap();
        assert!(!config.server.admin_enabled);
    }

    #[test]
    fn colliding_ports_fail_fast() {
        let mut cli = bare_cli();
        cli.dashboard_port = Some(DEFAULT_PORT);
        assert!(AppConfig::load(&cli).is_err());
    }
}
