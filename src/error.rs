//! Error types for MeridianKV
//!
//! Provides a unified error type for all operations and the mapping from
//! internal errors to protocol error codes.

use thiserror::Error;

/// Result type alias using MeridianError
pub type Result<T> = std::result::Result<T, MeridianError>;

/// Unified error type for MeridianKV operations
#[derive(Debug, Error)]
pub enum MeridianError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Storage Errors
    // -------------------------------------------------------------------------
    #[error("corruption detected: {0}")]
    Corruption(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Network Errors
    // -------------------------------------------------------------------------
    #[error("network error: {0}")]
    Network(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    // -------------------------------------------------------------------------
    // Replication Errors
    // -------------------------------------------------------------------------
    /// Write sent to a node that is not the primary. Carries the primary's
    /// client-facing port when known, so clients can re-dial.
    #[error("not primary")]
    NotPrimary { kv_port: Option<u16> },

    /// No majority ack within the write timeout. Transient; clients may retry.
    #[error("unavailable: {0}")]
    Unavailable(String),

    // -------------------------------------------------------------------------
    // Feature / Configuration Errors
    // -------------------------------------------------------------------------
    #[error("indexes are disabled on this node")]
    IndexesDisabled,

    #[error("configuration error: {0}")]
    Config(String),
}

impl MeridianError {
    /// Protocol error code for this error (the `error` field of a response).
    pub fn code(&self) -> &'static str {
        match self {
            MeridianError::Protocol(_) => "protocol",
            MeridianError::NotPrimary { .. } => "not_primary",
            MeridianError::Unavailable(_) => "unavailable",
            MeridianError::IndexesDisabled => "indexes_disabled",
            // Corruption and serialization failures surface as IO: from the
            // client's point of view the write did not become durable.
            MeridianError::Io(_)
            | MeridianError::Corruption(_)
            | MeridianError::Serialization(_)
            | MeridianError::Network(_)
            | MeridianError::Config(_) => "io",
        }
    }
}

impl From<bincode::Error> for MeridianError {
    fn from(e: bincode::Error) -> Self {
        MeridianError::Serialization(e.to_string())
    }
}
