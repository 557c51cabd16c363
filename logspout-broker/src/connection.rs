//! Broker collaborator traits.
//!
//! Production code plugs a real log client in behind these traits; tests and
//! the simulator use [`crate::SimulatedBroker`].

use async_trait::async_trait;
use logspout_core::{BrokerHost, FetchedRecord, Offset, Partition};
use serde::{Deserialize, Serialize};

use crate::error::{DiscoveryResult, FetchResult};

/// Where to begin reading a partition with no usable committed offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartOffset {
    /// The oldest record the broker still retains.
    #[default]
    Earliest,
    /// The next record to be written.
    Latest,
}

/// A connection to one broker.
#[async_trait]
pub trait BrokerConnection: Send + Sync {
    /// Fetches records of `partition` starting at `from`.
    ///
    /// Returns records in ascending offset order whose total size is at most
    /// `max_bytes`, except that at least one record is returned when any is
    /// available. An empty result means `from` is the end of the log.
    ///
    /// # Errors
    ///
    /// Returns `OffsetOutOfRange` if `from` is outside the retained log, or a
    /// connection-level error.
    async fn fetch(
        &self,
        partition: &Partition,
        from: Offset,
        max_bytes: u32,
    ) -> FetchResult<Vec<FetchedRecord>>;

    /// Resolves a start policy to a concrete offset.
    ///
    /// # Errors
    ///
    /// Returns a connection-level error if the broker cannot answer.
    async fn offset_for(&self, partition: &Partition, start: StartOffset) -> FetchResult<Offset>;

    /// Closes the connection.
    async fn close(&self);
}

/// Opens connections to brokers.
#[async_trait]
pub trait BrokerConnector: Send + Sync {
    /// Connects to `host`.
    ///
    /// # Errors
    ///
    /// Returns `Unreachable` if the broker cannot be contacted.
    async fn connect(&self, host: &BrokerHost) -> FetchResult<Box<dyn BrokerConnection>>;
}

/// Lists the partitions of a topic and the brokers leading them.
#[async_trait]
pub trait PartitionDiscovery: Send + Sync {
    /// Returns every partition of `topic`, in any order.
    ///
    /// # Errors
    ///
    /// Returns an error if the discovery source cannot be read.
    async fn partitions(&self, topic: &str) -> DiscoveryResult<Vec<Partition>>;
}
