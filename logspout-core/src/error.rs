//! Error types for logspout core operations.
//!
//! Following `TigerStyle`: all errors must be handled explicitly.
//! Core errors describe invalid input; they are raised by configuration
//! validation before any partition is touched.

use std::fmt;

/// The result type for core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur validating logspout inputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A required value was not provided.
    Missing {
        /// The name of the missing value.
        name: &'static str,
    },

    /// An invalid argument was provided.
    InvalidArgument {
        /// The name of the argument.
        name: &'static str,
        /// Why it was invalid.
        reason: &'static str,
    },

    /// A value fell outside its allowed range.
    OutOfRange {
        /// The name of the value.
        name: &'static str,
        /// The maximum allowed value.
        max: u64,
        /// The actual value.
        actual: u64,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing { name } => write!(f, "missing required value '{name}'"),
            Self::InvalidArgument { name, reason } => {
                write!(f, "invalid argument '{name}': {reason}")
            }
            Self::OutOfRange { name, max, actual } => {
                write!(f, "'{name}' out of range (max={max}, actual={actual})")
            }
        }
    }
}

impl std::error::Error for Error {}
