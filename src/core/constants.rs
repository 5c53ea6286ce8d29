//! Named constants: environment variables, defaults, and protocol limits.
//!
//! Centralized the way `sideseat-server`'s `core::constants` centralizes its
//! environment variable names, so every module reads the same name.

// =============================================================================
// Application identity
// =============================================================================

pub const APP_NAME: &str = "Nexo";
pub const APP_NAME_LOWER: &str = "nexo";

// =============================================================================
// Environment variables - server
// =============================================================================

pub const ENV_SERVER_HOST: &str = "SERVER_HOST";
pub const ENV_SERVER_PORT: &str = "SERVER_PORT";
pub const ENV_SERVER_DASHBOARD_PORT: &str = "SERVER_DASHBOARD_PORT";
pub const ENV_NEXO_ENV: &str = "NEXO_ENV";
pub const ENV_LOG: &str = "NEXO_LOG";

// =============================================================================
// Environment variables - persistence roots
// =============================================================================

pub const ENV_QUEUE_ROOT_PERSISTENCE_PATH: &str = "QUEUE_ROOT_PERSISTENCE_PATH";
pub const ENV_STREAM_ROOT_PERSISTENCE_PATH: &str = "STREAM_ROOT_PERSISTENCE_PATH";
pub const ENV_PUBSUB_ROOT_PERSISTENCE_PATH: &str = "PUBSUB_ROOT_PERSISTENCE_PATH";

// =============================================================================
// Defaults
// =============================================================================

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 7654;
pub const DEFAULT_DASHBOARD_PORT: u16 = 8080;

/// Bounded mailbox capacity for engine command channels. Matches the scale of
/// the teacher's `DEFAULT_TOPIC_CHANNEL_CAPACITY`.
pub const DEFAULT_ENGINE_MAILBOX_CAPACITY: usize = 1024;

/// Bounded outbound delivery channel per subscription (stream/pubsub push
/// frames). A full channel causes the delivery to be dropped, never blocks
/// the engine task.
pub const DEFAULT_DELIVERY_CHANNEL_CAPACITY: usize = 256;

// =============================================================================
// Store engine
// =============================================================================

pub const DEFAULT_STORE_MAX_VALUE_BYTES: usize = 1024 * 1024;

// =============================================================================
// Queue engine
// =============================================================================

pub const DEFAULT_QUEUE_VISIBILITY_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_QUEUE_MAX_RETRIES: u32 = 5;
pub const DEFAULT_QUEUE_MAX_PAYLOAD_BYTES: usize = 256 * 1024;
pub const DLQ_SUFFIX: &str = "_dlq";

// =============================================================================
// Stream engine
// =============================================================================

pub const DEFAULT_STREAM_PARTITIONS: u32 = 8;
pub const DEFAULT_STREAM_RETENTION_MAX_AGE_MS: u64 = 7 * 24 * 60 * 60 * 1000;
pub const DEFAULT_STREAM_RETENTION_MAX_BYTES: u64 = 512 * 1024 * 1024;

/// How long a consumer group member may go without a heartbeat before the
/// coordinator treats it as disconnected and triggers a rebalance. Resolved
/// in SPEC_FULL.md's Open Questions from the ≈3s the integration tests
/// tolerate.
pub const STREAM_MEMBER_HEARTBEAT_TIMEOUT_MS: u64 = 3_000;

// =============================================================================
// Persistence
// =============================================================================

pub const FILE_ASYNC_FLUSH_INTERVAL_MS: u64 = 50;
pub const FILE_ASYNC_FLUSH_THRESHOLD: usize = 5000;
pub const SEGMENT_ROTATE_BYTES: u64 = 64 * 1024 * 1024;
