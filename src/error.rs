//! Crate-wide error taxonomy.
//!
//! One enum carries every error kind the wire protocol can surface to a
//! client, modeled directly on `data::error::DataError` in the teacher: a
//! single `thiserror`-derived enum with `#[from]` conversions for the
//! low-level errors (`io::Error`, channel closures) that bubble up through
//! it, rather than a separate error type per engine.

use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum BrokerError {
    /// Queue/stream/topic/key missing in a context that required it.
    #[error("not found: {0}")]
    NotFound(String),

    /// Create conflicts with an existing entity of a different shape.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Create conflicts with an existing entity's policy.
    #[error("policy mismatch: {0}")]
    PolicyMismatch(String),

    /// Malformed pattern, wildcard in publish, oversized payload, bad ttl.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Stale generation id in a stream op.
    #[error("rebalance needed")]
    RebalanceNeeded,

    /// Bounded mailbox full and the caller opted to fail rather than wait.
    #[error("busy: {0}")]
    Busy(String),

    /// Unexpected internal error; logged with detail, opaque to the client.
    #[error("internal error")]
    Internal,
}

impl BrokerError {
    /// Wire status kind, per spec.md §7's enumerated taxonomy.
    pub fn kind(&self) -> &'static str {
        match self {
            BrokerError::NotFound(_) => "NotFound",
            BrokerError::AlreadyExists(_) => "AlreadyExists",
            BrokerError::PolicyMismatch(_) => "PolicyMismatch",
            BrokerError::InvalidArgument(_) => "InvalidArgument",
            BrokerError::RebalanceNeeded => "RebalanceNeeded",
            BrokerError::Busy(_) => "Busy",
            BrokerError::Internal => "Internal",
        }
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for BrokerError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        BrokerError::Internal
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for BrokerError {
    fn from(_: tokio::sync::oneshot::error::RecvError) -> Self {
        BrokerError::Internal
    }
}

pub type Result<T> = std::result::Result<T, BrokerError>;
