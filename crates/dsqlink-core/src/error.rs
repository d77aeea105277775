//! Error types for dsqlink

use thiserror::Error;

/// Core error type for dsqlink operations
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid or incomplete configuration. Surfaced at config-resolution
    /// time, never retried.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// IAM token generation failed. Wraps the underlying AWS SDK failure.
    #[error("failed to generate auth token: {0}")]
    Token(String),

    /// Connection establishment or transport failure.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A statement or query failed. `sqlstate` carries the server's SQLSTATE
    /// when the driver surfaced one; OCC classification prefers it over
    /// message matching.
    #[error("Query error: {message}")]
    Query {
        message: String,
        sqlstate: Option<String>,
    },

    /// No pool slot became free within the checkout timeout. Callers may
    /// treat this as retryable resource exhaustion.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// The retry budget was spent while still hitting commit conflicts.
    #[error("max retries ({retries}) exceeded, last error: {last_error}")]
    RetriesExhausted { retries: u32, last_error: String },
}

impl Error {
    /// Build a query error without a structured SQLSTATE.
    pub fn query(message: impl Into<String>) -> Self {
        Error::Query {
            message: message.into(),
            sqlstate: None,
        }
    }

    /// The structured SQLSTATE attached to this error, if any.
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            Error::Query { sqlstate, .. } => sqlstate.as_deref(),
            _ => None,
        }
    }
}

/// Result type alias for dsqlink operations
pub type Result<T> = std::result::Result<T, Error>;
