//! Core application infrastructure: CLI, configuration, constants, shutdown,
//! and durable-unit storage layout.

pub mod cli;
pub mod config;
pub mod constants;
pub mod shutdown;
pub mod storage;

pub use cli::Cli;
pub use config::AppConfig;
pub use shutdown::ShutdownService;
