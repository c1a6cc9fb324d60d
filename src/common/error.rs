//! Error types for shardmesh

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === I/O Errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // === Configuration Errors ===
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Bootstrap secret rejected: {0}")]
    SecretRejected(String),

    #[error("Invalid service descriptor: {0}")]
    InvalidDescriptor(String),

    // === Connectivity Errors ===
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Shard {endpoint} failed: {reason}")]
    Shard { endpoint: String, reason: String },

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("HTTP error: {0}")]
    Http(String),

    // === Broadcast Errors ===
    #[error("Broadcast accepted by {} of {} shards (failed: {})", .succeeded.len(), .succeeded.len() + .failed.len(), .failed.join(", "))]
    PartialBroadcast {
        succeeded: Vec<String>,
        failed: Vec<String>,
    },

    #[error("No shard connections available")]
    NoShards,

    // === Sequence Errors ===
    #[error("Sequence {key} found no acceptable value after {attempts} attempts")]
    SequenceExhausted { key: String, attempts: usize },

    #[error("Sequence document {0} is corrupted")]
    SequenceCorrupted(String),

    // === Storage Errors ===
    #[cfg(feature = "sled-backend")]
    #[error("Sled error: {0}")]
    Sled(#[from] sled::Error),

    // === Generic ===
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Operation timeout: {0}")]
    Timeout(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Is this a retryable error?
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Timeout(_) | Error::ConnectionFailed(_) | Error::Shard { .. } | Error::NoShards
        )
    }

    /// Convert to HTTP status code
    pub fn to_http_status(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Error::InvalidConfig(_) | Error::InvalidDescriptor(_) | Error::Serialization(_) => {
                StatusCode::BAD_REQUEST
            }
            Error::SecretRejected(_) | Error::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Error::Timeout(_) => StatusCode::REQUEST_TIMEOUT,
            Error::NoShards | Error::ConnectionFailed(_) | Error::PartialBroadcast { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
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

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Error::Timeout(e.to_string())
        } else if e.is_connect() {
            Error::ConnectionFailed(e.to_string())
        } else {
            Error::Http(e.to_string())
        }
    }
}

impl From<anyhow::Error> for Error {
    fn from(e: anyhow::Error) -> Self {
        Error::Other(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn test_partial_broadcast_message() {
        let err = Error::PartialBroadcast {
            succeeded: vec!["10.0.0.1:27017".into(), "10.0.0.2:27017".into()],
            failed: vec!["10.0.0.3:27017".into()],
        };
        assert_eq!(
            err.to_string(),
            "Broadcast accepted by 2 of 3 shards (failed: 10.0.0.3:27017)"
        );
    }

    #[test]
    fn test_http_status_mapping() {
        assert_eq!(
            Error::SecretRejected("used".into()).to_http_status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            Error::InvalidConfig("port".into()).to_http_status(),
            StatusCode::BAD_REQUEST
        );
        assert!(Error::ConnectionFailed("x".into()).is_retryable());
        assert!(!Error::InvalidConfig("x".into()).is_retryable());
    }
}
