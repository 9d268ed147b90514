//! Error types for txgate

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === I/O Errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Request Errors ===
    #[error("malformed batch: {0}")]
    MalformedBatch(String),

    #[error("unknown operation: {0}")]
    UnknownOperation(String),

    #[error("malformed request: {0}")]
    MalformedRequest(String),

    // === Storage Errors ===
    #[error("{0}")]
    Storage(String),

    #[error("database is locked")]
    Contention,

    #[error("operation timeout: {0}")]
    Timeout(String),

    // === Cluster Errors ===
    #[error("unresolved node {address}: {reason}")]
    UnresolvedNode { address: String, reason: String },

    #[error("no node named {0}")]
    NodeNotFound(String),

    #[error("cluster has still only {actual} nodes (expected {expected})")]
    ClusterIncomplete { expected: usize, actual: usize },

    #[error("node {address} is still {role}")]
    NodeNotVoter { address: String, role: String },

    // === Network Errors ===
    #[error("HTTP error: {0}")]
    Http(String),

    // === Config Errors ===
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // === Generic ===
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Is this a retryable error?
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Contention | Error::Timeout(_))
    }

    /// Did the engine report a write conflict?
    pub fn is_contention(&self) -> bool {
        matches!(self, Error::Contention)
    }

    /// Short label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Io(_) => "io",
            Error::MalformedBatch(_) => "malformed_batch",
            Error::UnknownOperation(_) => "unknown_operation",
            Error::MalformedRequest(_) => "malformed_request",
            Error::Storage(_) => "storage",
            Error::Contention => "contention",
            Error::Timeout(_) => "timeout",
            Error::UnresolvedNode { .. } => "unresolved_node",
            Error::NodeNotFound(_) => "node_not_found",
            Error::ClusterIncomplete { .. } => "cluster_incomplete",
            Error::NodeNotVoter { .. } => "node_not_voter",
            Error::Http(_) => "http",
            Error::InvalidConfig(_) => "invalid_config",
            Error::Internal(_) => "internal",
            Error::Other(_) => "other",
        }
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Other(s.to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Other(s)
    }
}

impl From<anyhow::Error> for Error {
    fn from(e: anyhow::Error) -> Self {
        Error::Other(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Error::Timeout(e.to_string())
        } else {
            Error::Http(e.to_string())
        }
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Error::Timeout("deadline exceeded".into())
    }
}
