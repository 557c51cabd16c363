//! Committed-offset persistence.
//!
//! One [`CommittedOffsetRecord`] is kept per partition per owner instance at
//! `{root}/{owner}/{topic}/partition_{id}`. Records are JSON so operators can
//! inspect them directly in the store. A new owner instance identity starts
//! from an empty subtree.

use std::sync::Arc;

use bytes::Bytes;
use logspout_core::{BrokerHost, Offset, Partition, PartitionId, Timestamp};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ProgressError, ProgressResult};
use crate::store::CoordinationStore;

/// Persisted progress of one partition.
///
/// `offset` is the resume offset: every record below it has been acked,
/// abandoned or skipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommittedOffsetRecord {
    /// Topic name.
    pub topic: String,
    /// Partition id.
    pub partition: PartitionId,
    /// First offset not yet safely processed.
    pub offset: Offset,
    /// Identity of the consumer instance that wrote the record.
    pub owner_instance_id: String,
    /// Wall-clock time of the write.
    pub written_at_ms: i64,
    /// Broker leading the partition when the record was written.
    pub leader: BrokerHost,
}

/// Reads and writes committed offsets through a coordination store.
#[derive(Clone)]
pub struct OffsetStore {
    store: Arc<dyn CoordinationStore>,
    root: String,
}

impl std::fmt::Debug for OffsetStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OffsetStore")
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

impl OffsetStore {
    /// Creates a client writing under `root`.
    ///
    /// # Panics
    ///
    /// Panics if `root` is not an absolute path.
    #[must_use]
    pub fn new(store: Arc<dyn CoordinationStore>, root: impl Into<String>) -> Self {
        let root = root.into();
        // `TigerStyle`: Assert precondition.
        assert!(root.starts_with('/'), "offset store root must be absolute: {root}");

        Self {
            root: root.trim_end_matches('/').to_string(),
            store,
        }
    }

    /// Returns the root path.
    #[must_use]
    pub fn root(&self) -> &str {
        &self.root
    }

    /// Returns the underlying coordination store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn CoordinationStore> {
        &self.store
    }

    /// Store path of the record for `partition` written by `owner`.
    #[must_use]
    pub fn path_for(&self, partition: &Partition, owner: &str) -> String {
        format!(
            "{}/{}/{}/partition_{}",
            self.root,
            owner,
            partition.topic(),
            partition.id().get()
        )
    }

    /// Reads the committed record, if one exists.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the store read fails, or `Codec` if the stored
    /// bytes are not a valid record.
    pub async fn read(
        &self,
        partition: &Partition,
        owner: &str,
    ) -> ProgressResult<Option<CommittedOffsetRecord>> {
        let path = self.path_for(partition, owner);
        let Some(data) = self.store.get(&path).await? else {
            return Ok(None);
        };

        let record: CommittedOffsetRecord =
            serde_json::from_slice(&data).map_err(|e| ProgressError::Codec {
                path: path.clone(),
                message: e.to_string(),
            })?;

        if record.topic != partition.topic() || record.partition != partition.id() {
            return Err(ProgressError::Codec {
                path,
                message: format!(
                    "record names {}/{}, expected {}",
                    record.topic,
                    record.partition.get(),
                    partition.key
                ),
            });
        }
        Ok(Some(record))
    }

    /// Overwrites the committed record with `offset`.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the store write fails.
    pub async fn write(
        &self,
        partition: &Partition,
        offset: Offset,
        owner: &str,
        now: Timestamp,
    ) -> ProgressResult<CommittedOffsetRecord> {
        let path = self.path_for(partition, owner);
        let record = CommittedOffsetRecord {
            topic: partition.topic().to_string(),
            partition: partition.id(),
            offset,
            owner_instance_id: owner.to_string(),
            written_at_ms: now.as_millis(),
            leader: partition.leader.clone(),
        };

        let data = serde_json::to_vec(&record).map_err(|e| ProgressError::Codec {
            path: path.clone(),
            message: e.to_string(),
        })?;
        self.store.put(&path, Bytes::from(data)).await?;

        debug!(path = %path, offset = offset.get(), "wrote committed offset");
        Ok(record)
    }

    /// Closes the underlying store.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails to close.
    pub async fn close(&self) -> ProgressResult<()> {
        self.store.close().await
    }
}
