//! Error types for event-reporter-core

use thiserror::Error;

/// Main error type for the event-reporter-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Device registration or login failed
    #[error("bootstrap failed: {0}")]
    Bootstrap(String),

    /// The local endpoint is owned by another daemon instance
    #[error("name already taken: {0}")]
    NameTaken(String),

    /// HTTP plumbing error outside of event delivery
    #[error("HTTP error: {0}")]
    Http(String),

    /// Error returned by the daemon to an IPC caller
    #[error("{code}: {message}")]
    Ipc { code: String, message: String },
}

impl Error {
    /// Whether this error comes from the queue's storage layer
    pub fn is_persistence(&self) -> bool {
        matches!(self, Error::Database(_) | Error::Io(_))
    }
}

/// Result type alias for event-reporter-core
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_persistence_class() {
        let io = Error::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk full"));
        assert!(io.is_persistence());
        assert!(Error::Database(rusqlite::Error::InvalidQuery).is_persistence());
        assert!(!Error::Bootstrap("nope".to_string()).is_persistence());
        assert!(!Error::NameTaken("sock".to_string()).is_persistence());
    }

    #[test]
    fn test_ipc_error_display() {
        let err = Error::Ipc {
            code: "queue_failed".to_string(),
            message: "database error: disk I/O error".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "queue_failed: database error: disk I/O error"
        );
    }
}
