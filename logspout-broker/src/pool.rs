//! Connection pool - one broker connection per owned partition.
//!
//! Connections are opened lazily on first use and reused across polls. A
//! pooled connection is discarded when a call fails at the connection level,
//! or when the partition is requested with a different leader than the one the
//! connection was opened to.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use logspout_core::{BrokerHost, FetchedRecord, Offset, Partition, PartitionKey};
use tracing::{debug, info};

use crate::connection::{BrokerConnection, BrokerConnector, StartOffset};
use crate::error::{FetchError, FetchResult};

/// Default bound on a single broker call in milliseconds.
pub const CONNECTION_TIMEOUT_MS_DEFAULT: u64 = 10_000;

struct PooledConnection {
    /// Leader the connection was opened to.
    leader: BrokerHost,
    connection: Box<dyn BrokerConnection>,
}

/// Pooled broker connections keyed by partition.
pub struct ConnectionPool {
    connector: Arc<dyn BrokerConnector>,
    /// Bound on every broker call.
    timeout_ms: u64,
    entries: HashMap<PartitionKey, PooledConnection>,
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("timeout_ms", &self.timeout_ms)
            .field("connections", &self.entries.len())
            .finish_non_exhaustive()
    }
}

impl ConnectionPool {
    /// Creates an empty pool.
    ///
    /// # Panics
    ///
    /// Panics if `timeout_ms` is zero.
    #[must_use]
    pub fn new(connector: Arc<dyn BrokerConnector>, timeout_ms: u64) -> Self {
        // `TigerStyle`: Assert precondition.
        assert!(timeout_ms > 0, "broker timeout must be positive");

        Self {
            connector,
            timeout_ms,
            entries: HashMap::new(),
        }
    }

    /// Number of pooled connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no connections are pooled.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the leader a pooled connection for `key` was opened to.
    #[must_use]
    pub fn leader_of(&self, key: &PartitionKey) -> Option<&BrokerHost> {
        self.entries.get(key).map(|entry| &entry.leader)
    }

    /// Fetches records of `partition` starting at `from`.
    ///
    /// # Errors
    ///
    /// Returns the broker's error, or `Timeout` if no answer arrived in time.
    /// Connection-level errors also drop the pooled connection.
    pub async fn fetch(
        &mut self,
        partition: &Partition,
        from: Offset,
        max_bytes: u32,
    ) -> FetchResult<Vec<FetchedRecord>> {
        let timeout_ms = self.timeout_ms;
        let connection = self.connection(partition).await?;
        let result = bounded(
            "fetch",
            timeout_ms,
            connection.fetch(partition, from, max_bytes),
        )
        .await;
        self.invalidate_on_error(&partition.key, &result).await;
        result
    }

    /// Resolves a start policy to a concrete offset for `partition`.
    ///
    /// # Errors
    ///
    /// Returns the broker's error, or `Timeout` if no answer arrived in time.
    pub async fn offset_for(
        &mut self,
        partition: &Partition,
        start: StartOffset,
    ) -> FetchResult<Offset> {
        let timeout_ms = self.timeout_ms;
        let connection = self.connection(partition).await?;
        let result = bounded(
            "offset_for",
            timeout_ms,
            connection.offset_for(partition, start),
        )
        .await;
        self.invalidate_on_error(&partition.key, &result).await;
        result
    }

    /// Closes and forgets the connection for `key`.
    ///
    /// Returns false if no connection was pooled.
    pub async fn release(&mut self, key: &PartitionKey) -> bool {
        let Some(entry) = self.entries.remove(key) else {
            return false;
        };
        entry.connection.close().await;
        debug!(partition = %key, leader = %entry.leader, "released broker connection");
        true
    }

    /// Closes every pooled connection.
    pub async fn close_all(&mut self) {
        let count = self.entries.len();
        for (_, entry) in self.entries.drain() {
            entry.connection.close().await;
        }
        info!(count, "closed broker connections");
    }

    /// Returns the pooled connection for `partition`, opening one if needed.
    async fn connection(&mut self, partition: &Partition) -> FetchResult<&dyn BrokerConnection> {
        let stale = self
            .entries
            .get(&partition.key)
            .is_some_and(|entry| entry.leader != partition.leader);
        if stale {
            info!(
                partition = %partition.key,
                leader = %partition.leader,
                "leader changed, reconnecting"
            );
            self.release(&partition.key).await;
        }

        if !self.entries.contains_key(&partition.key) {
            let connection = bounded(
                "connect",
                self.timeout_ms,
                self.connector.connect(&partition.leader),
            )
            .await?;
            debug!(partition = %partition.key, leader = %partition.leader, "opened broker connection");
            self.entries.insert(
                partition.key.clone(),
                PooledConnection {
                    leader: partition.leader.clone(),
                    connection,
                },
            );
        }

        self.entries
            .get(&partition.key)
            .map(|entry| entry.connection.as_ref())
            .ok_or(FetchError::Closed)
    }

    async fn invalidate_on_error<T>(&mut self, key: &PartitionKey, result: &FetchResult<T>) {
        if let Err(error) = result {
            if error.is_connection_error() {
                debug!(partition = %key, error = %error, "dropping broker connection");
                self.release(key).await;
            }
        }
    }
}

/// Runs a broker call with a timeout.
async fn bounded<T, F>(operation: &'static str, timeout_ms: u64, call: F) -> FetchResult<T>
where
    F: Future<Output = FetchResult<T>>,
{
    tokio::time::timeout(Duration::from_millis(timeout_ms), call)
        .await
        .unwrap_or(Err(FetchError::Timeout {
            operation,
            waited_ms: timeout_ms,
        }))
}
