//! Error types for Mnemo operations

use crate::{Collection, MutationToken, Operations, RecordId};
use thiserror::Error;

/// Classified failure returned by a remote source.
///
/// The repository only needs this classification, never the raw transport
/// error, to decide whether to degrade to cached data or surface the failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteFailure {
    #[error("No network connectivity")]
    NoConnectivity,

    #[error("Remote call timed out")]
    Timeout,

    #[error("Server error {code}: {message}")]
    ServerError { code: u16, message: String },

    #[error("Response could not be decoded: {reason}")]
    DecodingError { reason: String },

    #[error("Credential rejected by server")]
    Unauthorized,
}

impl RemoteFailure {
    /// Failures that a read may hide behind a stale cached envelope.
    pub fn allows_stale_read(&self) -> bool {
        !matches!(self, Self::Unauthorized)
    }

    /// Failures caused by the link rather than by the server's answer.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::NoConnectivity | Self::Timeout)
    }
}

/// Disk and memory tier errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Failed to open record store at {path}: {reason}")]
    OpenFailed { path: String, reason: String },

    #[error("Transaction failed: {reason}")]
    TransactionFailed { reason: String },

    #[error("Failed to encode envelope for {key}: {reason}")]
    EncodeFailed { key: String, reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,

    #[error("Background task aborted: {reason}")]
    TaskAborted { reason: String },
}

/// Validation errors, raised before any I/O is attempted.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    RequiredFieldMissing { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Field {field} exceeds {max} characters")]
    TooLong { field: String, max: usize },

    #[error("Operation {operation} cannot be staged locally")]
    NotStageable { operation: String },

    #[error("Record {id} belongs to {actual:?}, not {expected:?}")]
    CollectionMismatch {
        id: RecordId,
        expected: Collection,
        actual: Collection,
    },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Failed to parse configuration: {reason}")]
    Parse { reason: String },

    #[error("Failed to install tracing subscriber: {reason}")]
    Subscriber { reason: String },
}

/// Authentication collaborator errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("Not signed in")]
    NotAuthenticated,

    #[error("Credential refresh failed: {reason}")]
    RefreshFailed { reason: String },
}

/// Master error type for all Mnemo errors.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum MnemoError {
    #[error("Remote error: {0}")]
    Remote(#[from] RemoteFailure),

    #[error("Auth error: {0}")]
    Auth(#[from] AuthError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("{collection:?} record {id} not found")]
    NotFound { collection: Collection, id: RecordId },

    #[error("Operation {operation:?} is not supported by the remote source")]
    Unsupported { operation: Operations },

    #[error("Mutation {token} was not confirmed by the server")]
    Unconfirmed { token: MutationToken },
}

/// Result type alias for Mnemo operations.
pub type MnemoResult<T> = Result<T, MnemoError>;

/// Stable error categories handed to the presentation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Connectivity,
    Authorization,
    ServerRejected,
    DecodeFailure,
    NotFound,
    ValidationFailure,
    Unsupported,
    Storage,
}

impl MnemoError {
    /// Collapse this error into one of the stable presentation categories.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Remote(RemoteFailure::NoConnectivity | RemoteFailure::Timeout) => {
                ErrorCategory::Connectivity
            }
            Self::Remote(RemoteFailure::Unauthorized) | Self::Auth(_) => {
                ErrorCategory::Authorization
            }
            Self::Remote(RemoteFailure::ServerError { .. }) | Self::Unconfirmed { .. } => {
                ErrorCategory::ServerRejected
            }
            Self::Remote(RemoteFailure::DecodingError { .. }) => ErrorCategory::DecodeFailure,
            Self::NotFound { .. } => ErrorCategory::NotFound,
            Self::Validation(_) | Self::Config(_) => ErrorCategory::ValidationFailure,
            Self::Unsupported { .. } => ErrorCategory::Unsupported,
            Self::Storage(_) => ErrorCategory::Storage,
        }
    }

    /// Optional human-readable message safe to show to the user.
    pub fn user_message(&self) -> Option<String> {
        match self {
            Self::Remote(RemoteFailure::ServerError { message, .. }) if !message.is_empty() => {
                Some(message.clone())
            }
            Self::Validation(err) => Some(err.to_string()),
            Self::NotFound { .. } => Some("This item no longer exists.".to_string()),
            _ => None,
        }
    }

    /// True when the caller should trigger re-authentication.
    pub fn is_authorization(&self) -> bool {
        self.category() == ErrorCategory::Authorization
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_failure_display_server_error() {
        let err = RemoteFailure::ServerError {
            code: 503,
            message: "maintenance".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("503"));
        assert!(msg.contains("maintenance"));
    }

    #[test]
    fn test_unauthorized_never_allows_stale_read() {
        assert!(!RemoteFailure::Unauthorized.allows_stale_read());
        assert!(RemoteFailure::NoConnectivity.allows_stale_read());
        assert!(RemoteFailure::Timeout.allows_stale_read());
        assert!(RemoteFailure::DecodingError {
            reason: "eof".to_string()
        }
        .allows_stale_read());
    }

    #[test]
    fn test_error_categories() {
        assert_eq!(
            MnemoError::from(RemoteFailure::Timeout).category(),
            ErrorCategory::Connectivity
        );
        assert_eq!(
            MnemoError::from(RemoteFailure::Unauthorized).category(),
            ErrorCategory::Authorization
        );
        assert_eq!(
            MnemoError::from(AuthError::NotAuthenticated).category(),
            ErrorCategory::Authorization
        );
        assert_eq!(
            MnemoError::from(RemoteFailure::DecodingError {
                reason: "bad".to_string()
            })
            .category(),
            ErrorCategory::DecodeFailure
        );
        assert_eq!(
            MnemoError::from(ValidationError::RequiredFieldMissing {
                field: "title".to_string()
            })
            .category(),
            ErrorCategory::ValidationFailure
        );
        assert_eq!(
            MnemoError::Unsupported {
                operation: Operations::DELETE
            }
            .category(),
            ErrorCategory::Unsupported
        );
        assert_eq!(
            MnemoError::Unconfirmed {
                token: MutationToken::nil()
            }
            .category(),
            ErrorCategory::ServerRejected
        );
    }

    #[test]
    fn test_user_message_hides_transport_details() {
        assert!(MnemoError::from(RemoteFailure::NoConnectivity)
            .user_message()
            .is_none());
        let rejected = MnemoError::from(RemoteFailure::ServerError {
            code: 422,
            message: "Title already exists".to_string(),
        });
        assert_eq!(
            rejected.user_message().as_deref(),
            Some("Title already exists")
        );
    }

    #[test]
    fn test_mnemo_error_from_variants() {
        let storage = MnemoError::from(StorageError::LockPoisoned);
        assert!(matches!(storage, MnemoError::Storage(_)));

        let config = MnemoError::from(ConfigError::MissingRequired {
            field: "store.path".to_string(),
        });
        assert!(matches!(config, MnemoError::Config(_)));

        let auth = MnemoError::from(AuthError::RefreshFailed {
            reason: "expired".to_string(),
        });
        assert!(auth.is_authorization());
    }
}
