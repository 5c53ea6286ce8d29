use clap::Parser;

use super::constants::{
    ENV_NEXO_ENV, ENV_PUBSUB_ROOT_PERSISTENCE_PATH, ENV_QUEUE_ROOT_PERSISTENCE_PATH,
    ENV_SERVER_DASHBOARD_PORT, ENV_SERVER_HOST, ENV_SERVER_PORT, ENV_STREAM_ROOT_PERSISTENCE_PATH,
};

#[derive(Parser)]
#[command(name = "nexo")]
#[command(version, about = "Store, Queue, Stream and PubSub broker", long_about = None)]
pub struct Cli {
    /// TCP host for the wire protocol listener
    #[arg(long, env = ENV_SERVER_HOST)]
    pub host: Option<String>,

    /// TCP port for the wire protocol listener
    #[arg(long, env = ENV_SERVER_PORT)]
    pub port: Option<u16>,

    /// HTTP port for the read-only admin/snapshot surface
    #[arg(long, env = ENV_SERVER_DASHBOARD_PORT)]
    pub dashboard_port: Option<u16>,

    /// Deployment environment; "prod" disables the admin HTTP surface
    #[arg(long, env = ENV_NEXO_ENV)]
    pub env: Option<String>,

    /// Root directory for queue segment files (required if any queue uses
    /// file persistence)
    #[arg(long, env = ENV_QUEUE_ROOT_PERSISTENCE_PATH)]
    pub queue_root: Option<String>,

    /// Root directory for stream partition segment files
    #[arg(long, env = ENV_STREAM_ROOT_PERSISTENCE_PATH)]
    pub stream_root: Option<String>,

    /// Root directory for pubsub retained-value segment files
    #[arg(long, env = ENV_PUBSUB_ROOT_PERSISTENCE_PATH)]
    pub pubsub_root: Option<String>,
}

pub fn parse() -> Cli {
    Cli::parse()
}
