//! Broker registry reader over the coordination store.
//!
//! Layout under the broker path:
//!
//! ```text
//! {broker_path}/ids/{broker_id}                          {"host": "...", "port": 9092}
//! {broker_path}/topics/{topic}/partitions/{id}/state     {"leader": 1}
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use logspout_broker::{DiscoveryError, DiscoveryResult, PartitionDiscovery};
use logspout_core::{BrokerHost, BrokerId, Partition, PartitionId, PartitionKey};
use logspout_progress::{CoordinationStore, ProgressResult};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Serialize, Deserialize)]
struct PartitionState {
    leader: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct BrokerRegistration {
    host: String,
    port: u16,
}

/// Discovers partitions from the broker registry in a coordination store.
#[derive(Clone)]
pub struct StoreBrokerReader {
    store: Arc<dyn CoordinationStore>,
    broker_path: String,
}

impl std::fmt::Debug for StoreBrokerReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreBrokerReader")
            .field("broker_path", &self.broker_path)
            .finish_non_exhaustive()
    }
}

impl StoreBrokerReader {
    /// Creates a reader for the registry rooted at `broker_path`.
    #[must_use]
    pub fn new(store: Arc<dyn CoordinationStore>, broker_path: impl Into<String>) -> Self {
        let broker_path = broker_path.into();
        Self {
            broker_path: broker_path.trim_end_matches('/').to_string(),
            store,
        }
    }

    async fn read_json<T: for<'de> Deserialize<'de>>(&self, path: &str) -> DiscoveryResult<Option<T>> {
        let data = self
            .store
            .get(path)
            .await
            .map_err(|e| DiscoveryError::Unavailable {
                message: e.to_string(),
            })?;
        data.map(|bytes| {
            serde_json::from_slice(&bytes).map_err(|e| DiscoveryError::Malformed {
                path: path.to_string(),
                message: e.to_string(),
            })
        })
        .transpose()
    }

    async fn broker_host(&self, partition: &PartitionKey, broker: BrokerId) -> DiscoveryResult<BrokerHost> {
        let path = format!("{}/ids/{}", self.broker_path, broker.get());
        let registration: BrokerRegistration =
            self.read_json(&path)
                .await?
                .ok_or_else(|| DiscoveryError::UnknownBroker {
                    partition: partition.clone(),
                    broker: broker.get(),
                })?;
        Ok(BrokerHost::new(registration.host, registration.port))
    }
}

#[async_trait]
impl PartitionDiscovery for StoreBrokerReader {
    async fn partitions(&self, topic: &str) -> DiscoveryResult<Vec<Partition>> {
        let partitions_path = format!("{}/topics/{}/partitions", self.broker_path, topic);
        let children = self
            .store
            .children(&partitions_path)
            .await
            .map_err(|e| DiscoveryError::Unavailable {
                message: e.to_string(),
            })?;

        let mut hosts: HashMap<BrokerId, BrokerHost> = HashMap::new();
        let mut partitions = Vec::with_capacity(children.len());
        for child in children {
            let id: PartitionId = child.parse().map_err(|_| DiscoveryError::Malformed {
                path: format!("{partitions_path}/{child}"),
                message: "partition id is not a number".into(),
            })?;
            let key = PartitionKey::new(topic, id);

            let state_path = format!("{partitions_path}/{}/state", id.get());
            let state: PartitionState =
                self.read_json(&state_path)
                    .await?
                    .ok_or_else(|| DiscoveryError::Malformed {
                        path: state_path.clone(),
                        message: "missing partition state".into(),
                    })?;

            let broker = BrokerId::new(state.leader);
            let leader = match hosts.get(&broker) {
                Some(host) => host.clone(),
                None => {
                    let host = self.broker_host(&key, broker).await?;
                    hosts.insert(broker, host.clone());
                    host
                }
            };
            partitions.push(Partition {
                key,
                leader,
            });
        }

        partitions.sort();
        debug!(topic, count = partitions.len(), "discovered partitions");
        Ok(partitions)
    }
}

/// Registers a broker in the registry.
///
/// # Errors
///
/// Returns an error if the store write fails.
pub async fn publish_broker(
    store: &dyn CoordinationStore,
    broker_path: &str,
    broker: BrokerId,
    host: &BrokerHost,
) -> ProgressResult<()> {
    let registration = BrokerRegistration {
        host: host.host.clone(),
        port: host.port,
    };
    let path = format!("{}/ids/{}", broker_path.trim_end_matches('/'), broker.get());
    store.put(&path, encode(&registration)).await
}

/// Records the leader of a partition in the registry.
///
/// # Errors
///
/// Returns an error if the store write fails.
pub async fn publish_partition_state(
    store: &dyn CoordinationStore,
    broker_path: &str,
    topic: &str,
    partition: PartitionId,
    leader: BrokerId,
) -> ProgressResult<()> {
    let state = PartitionState {
        leader: leader.get(),
    };
    let path = format!(
        "{}/topics/{}/partitions/{}/state",
        broker_path.trim_end_matches('/'),
        topic,
        partition.get()
    );
    store.put(&path, encode(&state)).await
}

fn encode<T: Serialize>(value: &T) -> Bytes {
    // Plain structs of strings and integers always serialize.
    Bytes::from(serde_json::to_vec(value).unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use logspout_progress::SimulatedCoordinationStore;

    use super::*;

    async fn registry() -> SimulatedCoordinationStore {
        let store = SimulatedCoordinationStore::new(5);
        publish_broker(&store, "/brokers", BrokerId::new(1), &BrokerHost::new("b1", 9092))
            .await
            .unwrap();
        publish_broker(&store, "/brokers", BrokerId::new(2), &BrokerHost::new("b2", 9093))
            .await
            .unwrap();
        for (id, leader) in [(0, 1), (1, 2), (2, 1)] {
            publish_partition_state(&store, "/brokers", "events", PartitionId::new(id), BrokerId::new(leader))
                .await
                .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_reads_partitions_and_leaders() {
        let store = registry().await;
        let reader = StoreBrokerReader::new(Arc::new(store), "/brokers/");

        let partitions = reader.partitions("events").await.unwrap();
        assert_eq!(partitions.len(), 3);
        assert_eq!(partitions[1].leader, BrokerHost::new("b2", 9093));
        assert_eq!(partitions[2].leader, BrokerHost::new("b1", 9092));

        assert!(reader.partitions("other").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_broker() {
        let store = registry().await;
        publish_partition_state(&store, "/brokers", "events", PartitionId::new(3), BrokerId::new(9))
            .await
            .unwrap();
        let reader = StoreBrokerReader::new(Arc::new(store), "/brokers");

        let err = reader.partitions("events").await.unwrap_err();
        assert!(matches!(err, DiscoveryError::UnknownBroker { broker: 9, .. }));
    }

    #[tokio::test]
    async fn test_malformed_state() {
        let store = registry().await;
        store.seed_node("/brokers/topics/events/partitions/7/state", "{");
        let reader = StoreBrokerReader::new(Arc::new(store), "/brokers");

        let err = reader.partitions("events").await.unwrap_err();
        assert!(matches!(err, DiscoveryError::Malformed { .. }));
    }

    #[tokio::test]
    async fn test_store_failure_is_unavailable() {
        let store = registry().await;
        store.fault_config().force_get_fail = true;
        let reader = StoreBrokerReader::new(Arc::new(store), "/brokers");

        let err = reader.partitions("events").await.unwrap_err();
        assert!(matches!(err, DiscoveryError::Unavailable { .. }));
    }
}
