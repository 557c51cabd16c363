//! Partitions, broker hosts and message ids.
//!
//! A [`Partition`] carries the broker currently leading it, but two partitions
//! are equal when their topic and id match: the leader moves on failover while
//! the log stays the same. Code that cares about the leader compares it
//! explicitly through [`Partition::same_leader`].

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::record::Offset;
use crate::types::PartitionId;

/// Network location of a broker.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BrokerHost {
    /// Host name or address.
    pub host: String,
    /// TCP port.
    pub port: u16,
}

impl BrokerHost {
    /// Default broker port.
    pub const DEFAULT_PORT: u16 = 9092;

    /// Creates a broker host.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parses `host[:port]`, falling back to [`Self::DEFAULT_PORT`].
    ///
    /// Returns `None` for an empty host or an unparsable port.
    #[must_use]
    pub fn parse(spec: &str) -> Option<Self> {
        let (host, port) = match spec.rsplit_once(':') {
            Some((host, port)) => (host, port.parse().ok()?),
            None => (spec, Self::DEFAULT_PORT),
        };
        if host.is_empty() {
            return None;
        }
        Some(Self::new(host, port))
    }
}

impl fmt::Display for BrokerHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Identity of a partition independent of its leader.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PartitionKey {
    /// Topic name.
    pub topic: String,
    /// Partition within the topic.
    pub partition_id: PartitionId,
}

impl PartitionKey {
    /// Creates a new partition key.
    #[must_use]
    pub fn new(topic: impl Into<String>, partition_id: PartitionId) -> Self {
        Self {
            topic: topic.into(),
            partition_id,
        }
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.topic, self.partition_id.get())
    }
}

/// A log shard: topic, partition id and the broker currently leading it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Partition {
    /// Topic and partition id.
    #[serde(flatten)]
    pub key: PartitionKey,
    /// Broker leading the partition when it was discovered.
    pub leader: BrokerHost,
}

impl Partition {
    /// Creates a partition.
    #[must_use]
    pub fn new(topic: impl Into<String>, partition_id: PartitionId, leader: BrokerHost) -> Self {
        Self {
            key: PartitionKey::new(topic, partition_id),
            leader,
        }
    }

    /// Topic name.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.key.topic
    }

    /// Partition id within the topic.
    #[must_use]
    pub const fn id(&self) -> PartitionId {
        self.key.partition_id
    }

    /// Returns true if both refer to the same partition led by the same broker.
    #[must_use]
    pub fn same_leader(&self, other: &Self) -> bool {
        self.key == other.key && self.leader == other.leader
    }
}

impl PartialEq for Partition {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for Partition {}

impl Hash for Partition {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl PartialOrd for Partition {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Partition {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key.cmp(&other.key)
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.key, self.leader)
    }
}

/// Token handed to the pipeline with every emitted tuple.
///
/// Returned verbatim on ack or fail so the record can be resolved.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MessageId {
    /// Partition the record was fetched from, as known at emission time.
    pub partition: Partition,
    /// Offset of the record.
    pub offset: Offset,
}

impl MessageId {
    /// Creates a message id.
    #[must_use]
    pub const fn new(partition: Partition, offset: Offset) -> Self {
        Self { partition, offset }
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.partition.key, self.offset)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    fn partition(id: u64, host: &str) -> Partition {
        Partition::new("events", PartitionId::new(id), BrokerHost::new(host, 9092))
    }

    #[test]
    fn test_partition_equality_ignores_leader() {
        let a = partition(1, "broker-a");
        let b = partition(1, "broker-b");

        assert_eq!(a, b);
        assert!(!a.same_leader(&b));
        assert!(a.same_leader(&a.clone()));

        let set: HashSet<_> = [a, b].into_iter().collect();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_partition_ordering_by_key() {
        let mut partitions = vec![partition(3, "x"), partition(1, "z"), partition(2, "y")];
        partitions.sort();
        let ids: Vec<u64> = partitions.iter().map(|p| p.id().get()).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn test_broker_host_parse() {
        assert_eq!(
            BrokerHost::parse("kafka-1:9093"),
            Some(BrokerHost::new("kafka-1", 9093))
        );
        assert_eq!(
            BrokerHost::parse("kafka-2"),
            Some(BrokerHost::new("kafka-2", BrokerHost::DEFAULT_PORT))
        );
        assert_eq!(BrokerHost::parse(":9092"), None);
        assert_eq!(BrokerHost::parse("kafka:port"), None);
    }

    #[test]
    fn test_message_id_display() {
        let id = MessageId::new(partition(4, "h"), Offset::new(42));
        assert_eq!(format!("{id}"), "events/4#42");
    }
}
