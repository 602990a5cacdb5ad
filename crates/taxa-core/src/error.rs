//! Error types for taxa.

use thiserror::Error;

/// Result type alias using taxa's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for taxa operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Backing store could not be reached at all
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// A request exceeded a size limit of the receiving side
    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    /// Temporary failure that may succeed on retry (timeouts, 429, 5xx)
    #[error("Transient error: {0}")]
    Transient(String),

    /// Naming registry returned something we could not use
    #[error("Registry error: {0}")]
    Registry(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// HTTP/network request failed
    #[error("Request error: {0}")]
    Request(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether shrinking the request and retrying may succeed.
    pub fn is_payload_too_large(&self) -> bool {
        match self {
            Error::PayloadTooLarge(_) => true,
            // 54xxx: program_limit_exceeded class (statement too complex, too many columns, ...)
            Error::Database(sqlx::Error::Database(db)) => {
                db.code().is_some_and(|code| code.starts_with("54"))
                    || mentions_size_limit(db.message())
            }
            // bind-parameter overflow is raised client side
            Error::Database(sqlx::Error::Protocol(msg)) => mentions_size_limit(msg),
            _ => false,
        }
    }

    /// Whether the same request may succeed if repeated after a pause.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Transient(_) => true,
            Error::Database(e) => matches!(
                e,
                sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::WorkerCrashed
            ),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() {
            Error::Transient(e.to_string())
        } else {
            Error::Request(e.to_string())
        }
    }
}

fn mentions_size_limit(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    message.contains("too large") || message.contains("too many")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_not_found() {
        let err = Error::NotFound("Taxon.tsv".to_string());
        assert_eq!(err.to_string(), "Not found: Taxon.tsv");
    }

    #[test]
    fn test_error_display_payload_too_large() {
        let err = Error::PayloadTooLarge("414 Request-URI Too Large".to_string());
        assert_eq!(
            err.to_string(),
            "Payload too large: 414 Request-URI Too Large"
        );
    }

    #[test]
    fn test_error_display_store_unavailable() {
        let err = Error::StoreUnavailable("connection refused".to_string());
        assert_eq!(err.to_string(), "Store unavailable: connection refused");
    }

    #[test]
    fn test_payload_too_large_classification() {
        assert!(Error::PayloadTooLarge("x".into()).is_payload_too_large());
        assert!(!Error::Transient("x".into()).is_payload_too_large());
        assert!(!Error::Internal("x".into()).is_payload_too_large());
    }

    #[test]
    fn test_payload_too_large_from_store_message() {
        let overflow = sqlx::Error::Protocol("Too many arguments for query: 70000".into());
        assert!(Error::Database(overflow).is_payload_too_large());
        let oversized = sqlx::Error::Protocol("message too large".into());
        assert!(Error::Database(oversized).is_payload_too_large());
        let other = sqlx::Error::Protocol("unexpected message type".into());
        assert!(!Error::Database(other).is_payload_too_large());
        assert!(!Error::Database(sqlx::Error::RowNotFound).is_payload_too_large());
    }

    #[test]
    fn test_transient_classification() {
        assert!(Error::Transient("503".into()).is_transient());
        assert!(Error::Database(sqlx::Error::PoolTimedOut).is_transient());
        assert!(!Error::Database(sqlx::Error::RowNotFound).is_transient());
        assert!(!Error::Registry("bad json".into()).is_transient());
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<i32>("not a number").unwrap_err();
        let err: Error = json_err.into();
        match err {
            Error::Serialization(msg) => assert!(!msg.is_empty()),
            _ => panic!("Expected Serialization error"),
        }
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "no such file");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
        assert!(err.to_string().contains("no such file"));
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<Error>();
        assert_sync::<Error>();
    }
}
