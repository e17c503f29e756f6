//! Transfer error types.
//!
//! These errors are designed to be serializable and not depend on external
//! error types like `std::io::Error`. For I/O errors, we capture the kind
//! and message as strings.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for transfer and queue operations.
#[derive(Clone, Debug, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum TransferError {
    /// Network-level failure: DNS, refused, reset, truncated stream.
    #[error("Connection error: {message}")]
    Connection {
        /// Detailed error message.
        message: String,
    },

    /// The server answered with a status outside {200, 206}.
    #[error("Unexpected HTTP status {code}")]
    HttpStatus {
        /// The offending status code.
        code: u16,
    },

    /// Filesystem failure: cannot create directory, open or write the file.
    #[error("Filesystem error ({kind}): {message}")]
    Filesystem {
        /// The kind of I/O error (e.g., "NotFound", "PermissionDenied").
        kind: String,
        /// Detailed error message.
        message: String,
    },

    /// No live transfer or known task for this id.
    #[error("Task not found: {id}")]
    NotFound {
        /// The task id that wasn't found.
        id: String,
    },

    /// The task is already queued or downloading.
    #[error("Task already active: {id}")]
    AlreadyActive {
        /// The task id that's already in flight.
        id: String,
    },

    /// General/uncategorized error.
    #[error("{message}")]
    Other {
        /// Error message.
        message: String,
    },
}

impl TransferError {
    /// Create a connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Create an HTTP status error.
    #[must_use]
    pub const fn http_status(code: u16) -> Self {
        Self::HttpStatus { code }
    }

    /// Create a filesystem error from kind and message strings.
    pub fn filesystem(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Filesystem {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// Create a filesystem error from a `std::io::Error`.
    #[must_use]
    pub fn from_io_error(err: &std::io::Error) -> Self {
        let kind = err.kind();
        Self::Filesystem {
            kind: format!("{kind:?}"),
            message: err.to_string(),
        }
    }

    /// Create a not found error.
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }

    /// Create an already active error.
    pub fn already_active(id: impl Into<String>) -> Self {
        Self::AlreadyActive { id: id.into() }
    }

    /// Create a generic error.
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other {
            message: message.into(),
        }
    }

    /// Whether a retry with the same inputs could plausibly succeed.
    ///
    /// Only connection-level failures qualify: a bad status usually needs a
    /// corrected URL and a filesystem error needs operator intervention.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }
}

/// Convenience result type for transfer operations.
pub type TransferResult<T> = Result<T, TransferError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = TransferError::from_io_error(&io_err);

        match err {
            TransferError::Filesystem { kind, message } => {
                assert_eq!(kind, "NotFound");
                assert!(message.contains("file not found"));
            }
            _ => panic!("Expected Filesystem variant"),
        }
    }

    #[test]
    fn test_error_serialization() {
        let err = TransferError::http_status(404);
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("404"));

        let parsed: TransferError = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, err);
    }

    #[test]
    fn test_is_recoverable() {
        assert!(TransferError::connection("reset by peer").is_recoverable());
        assert!(!TransferError::http_status(404).is_recoverable());
        assert!(!TransferError::filesystem("PermissionDenied", "denied").is_recoverable());
        assert!(!TransferError::not_found("x").is_recoverable());
    }

    #[test]
    fn test_display_messages() {
        assert_eq!(
            TransferError::http_status(500).to_string(),
            "Unexpected HTTP status 500"
        );
        assert_eq!(
            TransferError::not_found("abc").to_string(),
            "Task not found: abc"
        );
    }
}
