//! Common error types for meterlog.

use thiserror::Error;

/// Top-level error type for meterlog operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A required precondition was not met (e.g. no stored credential).
    #[error("Precondition failed: {0}")]
    Precondition(String),

    /// Authentication failed or the credential is no longer valid.
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// Network-level failure: the request never produced a structured response.
    #[error("Network error: {0}")]
    Network(String),

    /// The server responded, but with a non-success status.
    #[error("Server error: {0}")]
    Server(String),

    /// Local database operation failed.
    #[error("Database error: {0}")]
    Database(String),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Connectivity-class errors indicate the remote endpoint is unreachable;
    /// a push session stops early rather than hammering it batch after batch.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Error::Network(_))
    }

    /// Fatal errors abort the session and are never retried locally.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Precondition(_) | Error::Authentication(_) | Error::Database(_)
        )
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connectivity_classification() {
        assert!(Error::Network("connection refused".to_string()).is_connectivity());
        assert!(!Error::Server("500 internal error".to_string()).is_connectivity());
        assert!(!Error::Authentication("expired".to_string()).is_connectivity());
    }

    #[test]
    fn test_fatal_classification() {
        assert!(Error::Precondition("no credential".to_string()).is_fatal());
        assert!(Error::Authentication("expired".to_string()).is_fatal());
        assert!(Error::Database("locked".to_string()).is_fatal());
        assert!(!Error::Network("timeout".to_string()).is_fatal());
        assert!(!Error::Server("validation".to_string()).is_fatal());
    }
}
