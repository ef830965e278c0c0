//! Error types for the Berth registry.

use thiserror::Error;

/// Result type alias for registry operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors that can occur during registry operations.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),

    #[error("host not found: {0}")]
    HostNotFound(String),

    /// The commit would push a host past its fixed capacity. Nothing was
    /// written.
    #[error(
        "reservation on host {host_id} would exceed capacity \
         ({requested_millicpus}m cpu / {requested_memory_mb}MB requested, \
         {reserved_millicpus}m / {reserved_memory_mb}MB already reserved)"
    )]
    Overcommit {
        host_id: String,
        requested_millicpus: u64,
        requested_memory_mb: u64,
        reserved_millicpus: u64,
        reserved_memory_mb: u64,
    },
}
