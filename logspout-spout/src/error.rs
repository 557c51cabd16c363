//! Spout error types.

use logspout_broker::{DiscoveryError, FetchError};
use logspout_core::PartitionKey;
use logspout_progress::ProgressError;
use thiserror::Error;

/// Result type for spout operations.
pub type SpoutResult<T> = Result<T, SpoutError>;

/// Errors surfaced by the consumption engine.
#[derive(Debug, Error)]
pub enum SpoutError {
    /// The configuration was rejected before any partition was touched.
    #[error("invalid configuration: {0}")]
    Config(#[from] logspout_core::Error),

    /// A configuration file could not be read.
    #[error("failed to read config from {path}: {source}")]
    ConfigIo {
        /// File path.
        path: String,
        /// Underlying error.
        source: std::io::Error,
    },

    /// A configuration file could not be parsed.
    #[error("failed to parse config: {message}")]
    ConfigParse {
        /// Error message.
        message: String,
    },

    /// A broker call for one partition failed.
    #[error("fetch failed for {partition}: {source}")]
    Fetch {
        /// The partition being fetched.
        partition: PartitionKey,
        /// Underlying broker error.
        #[source]
        source: FetchError,
    },

    /// Progress tracking or the offset store failed.
    #[error("progress error: {0}")]
    Progress(#[from] ProgressError),

    /// Partition discovery failed.
    #[error("discovery error: {0}")]
    Discovery(#[from] DiscoveryError),
}

impl SpoutError {
    /// Wraps a broker error for `partition`.
    #[must_use]
    pub fn fetch(partition: PartitionKey, source: FetchError) -> Self {
        Self::Fetch { partition, source }
    }
}
