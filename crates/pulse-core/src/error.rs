//! Error types for the pulse telemetry surface.

use thiserror::Error;

/// Result type alias using pulse's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for pulse operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Operation requires a viewer identity and none is present
    #[error("Unauthenticated: a viewer identity is required")]
    Unauthenticated,

    /// Authenticated but lacking the required role
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Mutation target does not exist in durable storage
    #[error("Not found: {0}")]
    NotFound(String),

    /// Storage or channel call failed transiently
    #[error("Connectivity failure: {0}")]
    Connectivity(String),

    /// Malformed input rejected before any durable call
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether retrying the same call later could succeed.
    ///
    /// Only connectivity-class failures qualify. A `RowNotFound` or a
    /// constraint violation will fail the same way on every attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Connectivity(_) => true,
            Error::Database(e) => matches!(
                e,
                sqlx::Error::Io(_)
                    | sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::WorkerCrashed
                    | sqlx::Error::Tls(_)
            ),
            _ => false,
        }
    }

    /// Shorthand for a not-found error naming the resource kind and id.
    pub fn not_found(kind: &str, id: impl std::fmt::Display) -> Self {
        Error::NotFound(format!("{} {}", kind, id))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
