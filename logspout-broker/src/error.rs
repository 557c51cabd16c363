//! Broker and discovery error types.

use logspout_core::{BrokerHost, Offset, PartitionKey};
use thiserror::Error;

/// Result type for broker calls.
pub type FetchResult<T> = Result<T, FetchError>;

/// Result type for partition discovery.
pub type DiscoveryResult<T> = Result<T, DiscoveryError>;

/// Errors returned by broker connections.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// The broker could not be reached.
    #[error("broker {host} unreachable: {message}")]
    Unreachable {
        /// The broker that was contacted.
        host: BrokerHost,
        /// Error message.
        message: String,
    },

    /// The call did not complete in time.
    #[error("{operation} timed out after {waited_ms}ms")]
    Timeout {
        /// The operation that timed out.
        operation: &'static str,
        /// How long the caller waited.
        waited_ms: u64,
    },

    /// The requested offset is outside the broker's retained log.
    #[error("offset {offset} out of range for {partition}")]
    OffsetOutOfRange {
        /// The partition fetched.
        partition: PartitionKey,
        /// The offset requested.
        offset: Offset,
    },

    /// The contacted broker no longer leads the partition.
    #[error("{host} is not the leader for {partition}")]
    NotLeader {
        /// The partition fetched.
        partition: PartitionKey,
        /// The broker that was contacted.
        host: BrokerHost,
    },

    /// The broker rejected the request.
    #[error("protocol error: {message}")]
    Protocol {
        /// Error message.
        message: String,
    },

    /// The connection was closed.
    #[error("connection closed")]
    Closed,
}

impl FetchError {
    /// Returns true if the pooled connection should be discarded.
    #[must_use]
    pub const fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Unreachable { .. } | Self::Timeout { .. } | Self::NotLeader { .. } | Self::Closed
        )
    }
}

/// Errors listing a topic's partitions.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DiscoveryError {
    /// The discovery source could not be read.
    #[error("discovery source unavailable: {message}")]
    Unavailable {
        /// Error message.
        message: String,
    },

    /// Discovery data was present but malformed.
    #[error("malformed discovery data at {path}: {message}")]
    Malformed {
        /// Where the data was read from.
        path: String,
        /// Error message.
        message: String,
    },

    /// A partition names a leader broker that is not registered.
    #[error("partition {partition} led by unregistered broker {broker}")]
    UnknownBroker {
        /// The partition whose leader is missing.
        partition: PartitionKey,
        /// The broker id that could not be resolved.
        broker: u64,
    },
}

#[cfg(test)]
mod tests {
    use logspout_core::PartitionId;

    use super::*;

    #[test]
    fn test_connection_errors() {
        let key = PartitionKey::new("events", PartitionId::new(0));

        assert!(FetchError::Closed.is_connection_error());
        assert!(FetchError::Timeout {
            operation: "fetch",
            waited_ms: 10
        }
        .is_connection_error());
        assert!(FetchError::NotLeader {
            partition: key.clone(),
            host: BrokerHost::new("b", 1)
        }
        .is_connection_error());

        assert!(!FetchError::OffsetOutOfRange {
            partition: key,
            offset: Offset::new(3)
        }
        .is_connection_error());
        assert!(!FetchError::Protocol {
            message: "bad".into()
        }
        .is_connection_error());
    }

    #[test]
    fn test_error_display() {
        let err = FetchError::Unreachable {
            host: BrokerHost::new("kafka-1", 9092),
            message: "refused".into(),
        };
        assert_eq!(err.to_string(), "broker kafka-1:9092 unreachable: refused");
    }
}
