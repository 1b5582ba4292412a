//! Error type shared by queries, mutations and the transport.

use serde_json::Value;
use thiserror::Error;

use crate::key::CacheKey;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, QueryError>;

/// Error type for query and mutation operations.
///
/// The type is `Clone` because a single fetch result is handed to every caller
/// that joined the same in-flight request.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueryError {
    /// The remote API could not be reached (connection refused, timeout, ...).
    #[error("Network error: {0}")]
    Network(String),

    /// The remote API answered with a non-2xx status.
    #[error("Server responded with HTTP {status}: {body}")]
    Server { status: u16, body: Value },

    /// Input was rejected before any request was sent.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The response body did not have the expected shape.
    #[error("Failed to decode response: {0}")]
    Decode(String),

    /// A cached value exists for the key but holds a different type.
    #[error("Cached value for {key} has an unexpected type")]
    TypeMismatch { key: CacheKey },

    /// The fetch task panicked or was cancelled before producing a value.
    #[error("Fetch aborted: {0}")]
    Aborted(String),

    /// The client was configured with invalid settings.
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl QueryError {
    /// HTTP status of a server error, if any.
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Server { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Returns `true` for a 401 response.
    pub const fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Server { status: 401, .. })
    }

    /// Check if the failure is worth retrying.
    ///
    /// Network failures, 5xx responses and 429 are retryable. Client errors
    /// (including 401) are not.
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::Server { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_display() {
        let err = QueryError::Network("connection refused".to_string());
        assert_eq!(err.to_string(), "Network error: connection refused");

        let err = QueryError::Server {
            status: 404,
            body: json!({"message": "not found"}),
        };
        assert_eq!(
            err.to_string(),
            r#"Server responded with HTTP 404: {"message":"not found"}"#
        );

        let err = QueryError::TypeMismatch {
            key: CacheKey::from(["cart"]),
        };
        assert_eq!(err.to_string(), r#"Cached value for ["cart"] has an unexpected type"#);
    }

    #[test]
    fn test_unauthorized() {
        let err = QueryError::Server {
            status: 401,
            body: Value::Null,
        };
        assert!(err.is_unauthorized());
        assert_eq!(err.status(), Some(401));
        assert!(!QueryError::Network("down".into()).is_unauthorized());
    }

    #[test]
    fn test_retryable() {
        assert!(QueryError::Network("reset".into()).is_retryable());
        assert!(
            QueryError::Server {
                status: 503,
                body: Value::Null
            }
            .is_retryable()
        );
        assert!(
            QueryError::Server {
                status: 429,
                body: Value::Null
            }
            .is_retryable()
        );
        assert!(
            !QueryError::Server {
                status: 401,
                body: Value::Null
            }
            .is_retryable()
        );
        assert!(!QueryError::Validation("bad".into()).is_retryable());
        assert!(!QueryError::Decode("eof".into()).is_retryable());
    }
}
