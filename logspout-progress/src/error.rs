//! Progress tracking error types.

use thiserror::Error;

/// Result type for progress operations.
pub type ProgressResult<T> = Result<T, ProgressError>;

/// Errors that can occur tracking or persisting consumer progress.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProgressError {
    /// I/O error talking to the coordination store.
    #[error("I/O error: {operation}: {message}")]
    Io {
        /// The operation that failed.
        operation: &'static str,
        /// Error message.
        message: String,
    },

    /// The coordination store was closed.
    #[error("coordination store is closed")]
    Closed,

    /// A stored record could not be encoded or decoded.
    #[error("malformed record at {path}: {message}")]
    Codec {
        /// Store path of the record.
        path: String,
        /// Error message.
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ProgressError::Io {
            operation: "put",
            message: "connection lost".into(),
        };
        assert_eq!(err.to_string(), "I/O error: put: connection lost");

        let err = ProgressError::Codec {
            path: "/consumers/c1/events/0".into(),
            message: "missing offset".into(),
        };
        assert!(err.to_string().contains("/consumers/c1/events/0"));
    }

    #[test]
    fn test_error_equality() {
        assert_eq!(ProgressError::Closed, ProgressError::Closed);
        assert_ne!(
            ProgressError::Closed,
            ProgressError::Codec {
                path: "/a".into(),
                message: "x".into()
            }
        );
    }
}
