//! Error types for the keyring service.
//!
//! Every failure surfaced to a signing caller belongs to exactly one class of
//! the taxonomy below. All errors implement `ResponseError` for Actix-web
//! integration, converting domain errors into appropriate HTTP status codes.

use actix_web::{HttpResponse, ResponseError, http::StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Service error type with structured error responses.
#[derive(Error, Debug)]
pub enum KeyringError {
    // Lookup errors
    #[error("Not found: {0}")]
    NotFound(String),

    // Input validation errors
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // Remote peer, hardware bridge or relay errors
    #[error("Transport failure: {0}")]
    TransportFailure(String),

    // Explicit rejection by the user or by an account switch
    #[error("User rejected: {0}")]
    UserRejected(String),

    // Operation invalid in the current state of a session or queue
    #[error("State conflict: {0}")]
    StateConflict(String),

    // A signature was produced but its side effects could not be saved
    #[error("Persistence failure: {reason}")]
    PersistenceFailure {
        request_id: Option<Uuid>,
        reason: String,
    },

    // Authorization errors
    #[error("Origin not connected: {0}")]
    OriginNotPermitted(String),

    #[error("Unauthorized")]
    Unauthorized,

    // Storage errors
    #[error("Storage error: {0}")]
    Storage(String),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// User-facing message class for a signing request.
///
/// Each terminal error maps to exactly one class; in-flight requests report
/// `Sending` and successful ones `Submitted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignStatus {
    Sending,
    Submitted,
    Rejected,
    Failed,
}

impl std::fmt::Display for SignStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sending => write!(f, "sending"),
            Self::Submitted => write!(f, "submitted"),
            Self::Rejected => write!(f, "rejected"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// JSON error response body.
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<String>,
    #[serde(rename = "requestId", skip_serializing_if = "Option::is_none")]
    request_id: Option<Uuid>,
}

impl KeyringError {
    /// Shorthand for a rejection carrying a human-readable reason.
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::UserRejected(reason.into())
    }

    /// Get the error code for structured error responses.
    pub fn error_code(&self) -> Option<&'static str> {
        match self {
            Self::NotFound(_) => Some("NOT_FOUND"),
            Self::InvalidInput(_) => Some("INVALID_INPUT"),
            Self::TransportFailure(_) => Some("TRANSPORT_FAILURE"),
            Self::UserRejected(_) => Some("USER_REJECTED"),
            Self::StateConflict(_) => Some("STATE_CONFLICT"),
            Self::PersistenceFailure { .. } => Some("PERSISTENCE_FAILURE"),
            Self::OriginNotPermitted(_) => Some("ORIGIN_NOT_PERMITTED"),
            Self::Unauthorized => Some("UNAUTHORIZED"),
            Self::Storage(_) => Some("STORAGE_ERROR"),
            Self::Serialization(_) => Some("SERIALIZATION_ERROR"),
            Self::Deserialization(_) => Some("DESERIALIZATION_ERROR"),
            Self::Internal(_) => None, // Don't expose internal error codes
        }
    }

    /// Message class shown to the user for this error.
    pub fn sign_status(&self) -> SignStatus {
        match self {
            Self::UserRejected(_) => SignStatus::Rejected,
            _ => SignStatus::Failed,
        }
    }

    /// Whether retrying the same operation may succeed without new user input.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::TransportFailure(_) | Self::PersistenceFailure { .. }
        )
    }
}

impl ResponseError for KeyringError {
    fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request - Client errors
            Self::InvalidInput(_) | Self::Serialization(_) | Self::Deserialization(_) => {
                StatusCode::BAD_REQUEST
            }

            // 401 Unauthorized
            Self::Unauthorized => StatusCode::UNAUTHORIZED,

            // 403 Forbidden
            Self::OriginNotPermitted(_) => StatusCode::FORBIDDEN,

            // 404 Not Found
            Self::NotFound(_) => StatusCode::NOT_FOUND,

            // 409 Conflict - State conflicts
            Self::StateConflict(_) => StatusCode::CONFLICT,

            // 422 Unprocessable Entity - Rejected by the user
            Self::UserRejected(_) => StatusCode::UNPROCESSABLE_ENTITY,

            // 502 Bad Gateway - Downstream errors
            Self::TransportFailure(_) => StatusCode::BAD_GATEWAY,

            // 500 Internal Server Error - Everything else
            Self::PersistenceFailure { .. } | Self::Storage(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        let request_id = match self {
            Self::PersistenceFailure { request_id, .. } => *request_id,
            _ => None,
        };
        let body = ErrorResponse {
            error: self.to_string(),
            code: self.error_code().map(String::from),
            request_id,
        };

        HttpResponse::build(self.status_code()).json(body)
    }
}

// Conversion from common error types

impl From<std::io::Error> for KeyringError {
    fn from(err: std::io::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for KeyringError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() || err.is_syntax() || err.is_eof() {
            Self::Deserialization(err.to_string())
        } else {
            Self::Serialization(err.to_string())
        }
    }
}

impl From<redb::Error> for KeyringError {
    fn from(err: redb::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<redb::DatabaseError> for KeyringError {
    fn from(err: redb::DatabaseError) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<redb::TableError> for KeyringError {
    fn from(err: redb::TableError) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<redb::TransactionError> for KeyringError {
    fn from(err: redb::TransactionError) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<redb::CommitError> for KeyringError {
    fn from(err: redb::CommitError) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<redb::StorageError> for KeyringError {
    fn from(err: redb::StorageError) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<reqwest::Error> for KeyringError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::TransportFailure(format!("Request timed out: {err}"))
        } else if err.is_connect() {
            Self::TransportFailure(format!("Connection failed: {err}"))
        } else if err.is_decode() {
            Self::Deserialization(err.to_string())
        } else {
            Self::TransportFailure(err.to_string())
        }
    }
}

/// Result type alias for keyring operations.
pub type KeyringResult<T> = Result<T, KeyringError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(
            KeyringError::InvalidInput("test".to_string()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            KeyringError::Unauthorized.status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            KeyringError::NotFound("test".to_string()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            KeyringError::StateConflict("test".to_string()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            KeyringError::TransportFailure("test".to_string()).status_code(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(
            KeyringError::UserRejected("test".to_string()).error_code(),
            Some("USER_REJECTED")
        );
        assert_eq!(KeyringError::Internal("test".to_string()).error_code(), None);
    }

    #[test]
    fn test_each_error_maps_to_one_message_class() {
        assert_eq!(
            KeyringError::rejected("closed popup").sign_status(),
            SignStatus::Rejected
        );
        for err in [
            KeyringError::NotFound("x".into()),
            KeyringError::InvalidInput("x".into()),
            KeyringError::TransportFailure("x".into()),
            KeyringError::StateConflict("x".into()),
            KeyringError::PersistenceFailure {
                request_id: None,
                reason: "x".into(),
            },
        ] {
            assert_eq!(err.sign_status(), SignStatus::Failed, "{err}");
        }
    }

    #[test]
    fn test_retryable_classes() {
        assert!(KeyringError::TransportFailure("bridge down".into()).is_retryable());
        assert!(
            KeyringError::PersistenceFailure {
                request_id: Some(Uuid::new_v4()),
                reason: "disk full".into(),
            }
            .is_retryable()
        );
        assert!(!KeyringError::rejected("no").is_retryable());
        assert!(!KeyringError::StateConflict("busy".into()).is_retryable());
    }
}
