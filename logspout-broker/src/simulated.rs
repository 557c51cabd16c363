//! In-memory simulated broker cluster for deterministic testing.
//!
//! Holds one append-only log per partition, tracks which host leads each
//! partition, and injects faults deterministically from a seed. Clones share
//! state, so a test can keep a handle to append records, move leaders or take
//! hosts down while the engine holds connections.

#![allow(clippy::significant_drop_tightening)]

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use logspout_core::{BrokerHost, FetchedRecord, Offset, Partition, PartitionId, PartitionKey};

use crate::connection::{BrokerConnection, BrokerConnector, PartitionDiscovery, StartOffset};
use crate::error::{DiscoveryError, DiscoveryResult, FetchError, FetchResult};

// -----------------------------------------------------------------------------
// Fault Configuration
// -----------------------------------------------------------------------------

/// Fault configuration for the simulated broker.
#[derive(Debug, Clone, Default)]
pub struct BrokerFaultConfig {
    /// Probability of a fetch failing (0.0 - 1.0).
    pub fetch_fail_rate: f64,
    /// Probability of a connect failing (0.0 - 1.0).
    pub connect_fail_rate: f64,
    /// Force next fetch to fail (one-shot).
    pub force_fetch_fail: bool,
    /// Force next connect to fail (one-shot).
    pub force_connect_fail: bool,
    /// Force next discovery call to fail (one-shot).
    pub force_discovery_fail: bool,
    /// Artificial latency added to every fetch.
    pub fetch_delay_ms: u64,
}

impl BrokerFaultConfig {
    /// No faults (all operations succeed).
    #[must_use]
    pub const fn none() -> Self {
        Self {
            fetch_fail_rate: 0.0,
            connect_fail_rate: 0.0,
            force_fetch_fail: false,
            force_connect_fail: false,
            force_discovery_fail: false,
            fetch_delay_ms: 0,
        }
    }

    /// Flaky configuration for stress testing.
    #[must_use]
    pub const fn flaky() -> Self {
        Self {
            fetch_fail_rate: 0.05,
            connect_fail_rate: 0.02,
            force_fetch_fail: false,
            force_connect_fail: false,
            force_discovery_fail: false,
            fetch_delay_ms: 0,
        }
    }

    /// Builder: set fetch fail rate.
    #[must_use]
    pub const fn with_fetch_fail_rate(mut self, rate: f64) -> Self {
        self.fetch_fail_rate = rate;
        self
    }

    /// Builder: set connect fail rate.
    #[must_use]
    pub const fn with_connect_fail_rate(mut self, rate: f64) -> Self {
        self.connect_fail_rate = rate;
        self
    }

    /// Builder: set fetch latency.
    #[must_use]
    pub const fn with_fetch_delay_ms(mut self, delay_ms: u64) -> Self {
        self.fetch_delay_ms = delay_ms;
        self
    }
}

// -----------------------------------------------------------------------------
// Cluster State
// -----------------------------------------------------------------------------

#[derive(Debug)]
struct PartitionLog {
    leader: BrokerHost,
    /// Offset of `records[0]`; records below it were deleted by retention.
    start: Offset,
    records: Vec<FetchedRecord>,
}

impl PartitionLog {
    fn end(&self) -> Offset {
        Offset::new(self.start.get() + self.records.len() as u64)
    }
}

#[derive(Debug, Default)]
struct ClusterState {
    logs: BTreeMap<PartitionKey, PartitionLog>,
    down: BTreeSet<BrokerHost>,
    fault_config: BrokerFaultConfig,
    open_connections: u64,
    fetch_calls: u64,
}

// -----------------------------------------------------------------------------
// Simulated Broker
// -----------------------------------------------------------------------------

/// In-memory broker cluster.
#[derive(Debug, Clone)]
pub struct SimulatedBroker {
    state: Arc<Mutex<ClusterState>>,
    /// RNG seed for deterministic faults.
    seed: u64,
    /// Operation counter for deterministic RNG.
    counter: Arc<AtomicU64>,
}

impl SimulatedBroker {
    /// Creates an empty cluster with no faults.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self::with_faults(seed, BrokerFaultConfig::none())
    }

    /// Creates an empty cluster with fault injection.
    #[must_use]
    pub fn with_faults(seed: u64, config: BrokerFaultConfig) -> Self {
        let state = ClusterState {
            fault_config: config,
            ..ClusterState::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
            seed,
            counter: Arc::new(AtomicU64::new(0)),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ClusterState> {
        self.state.lock().expect("cluster state lock poisoned")
    }

    /// Updates the fault config in place.
    ///
    /// # Panics
    ///
    /// Panics if the mutex is poisoned.
    pub fn set_faults(&self, update: impl FnOnce(&mut BrokerFaultConfig)) {
        update(&mut self.lock().fault_config);
    }

    /// Creates an empty partition led by `leader` and returns it.
    ///
    /// # Panics
    ///
    /// Panics if the partition already exists or the mutex is poisoned.
    pub fn create_partition(&self, topic: &str, id: u64, leader: BrokerHost) -> Partition {
        let partition = Partition::new(topic, PartitionId::new(id), leader.clone());
        let mut state = self.lock();
        let previous = state.logs.insert(
            partition.key.clone(),
            PartitionLog {
                leader,
                start: Offset::new(0),
                records: Vec::new(),
            },
        );
        assert!(previous.is_none(), "partition {} already exists", partition.key);
        partition
    }

    /// Appends a record and returns its offset.
    ///
    /// # Panics
    ///
    /// Panics if the partition does not exist or the mutex is poisoned.
    pub fn append(&self, key: &PartitionKey, value: impl Into<Bytes>) -> Offset {
        let mut state = self.lock();
        let log = state
            .logs
            .get_mut(key)
            .unwrap_or_else(|| panic!("unknown partition {key}"));
        let offset = log.end();
        log.records.push(FetchedRecord::new(offset, value));
        offset
    }

    /// Appends `count` records with values `"{key}:{offset}"`.
    pub fn append_many(&self, key: &PartitionKey, count: u64) {
        for _ in 0..count {
            let offset = self.end_offset(key);
            self.append(key, format!("{key}:{offset}"));
        }
    }

    /// Deletes every record below `offset`, as retention would.
    ///
    /// # Panics
    ///
    /// Panics if the partition does not exist or the mutex is poisoned.
    pub fn truncate_before(&self, key: &PartitionKey, offset: Offset) {
        let mut state = self.lock();
        let log = state
            .logs
            .get_mut(key)
            .unwrap_or_else(|| panic!("unknown partition {key}"));
        let offset = offset.min(log.end());
        if offset > log.start {
            #[allow(clippy::cast_possible_truncation)]
            let drop = offset.distance_from(log.start) as usize;
            log.records.drain(..drop);
            log.start = offset;
        }
    }

    /// Moves leadership of a partition to `leader`.
    ///
    /// # Panics
    ///
    /// Panics if the partition does not exist or the mutex is poisoned.
    pub fn move_leader(&self, key: &PartitionKey, leader: BrokerHost) {
        let mut state = self.lock();
        let log = state
            .logs
            .get_mut(key)
            .unwrap_or_else(|| panic!("unknown partition {key}"));
        log.leader = leader;
    }

    /// Marks a host as down (unreachable) or back up.
    pub fn set_host_down(&self, host: &BrokerHost, down: bool) {
        let mut state = self.lock();
        if down {
            state.down.insert(host.clone());
        } else {
            state.down.remove(host);
        }
    }

    /// First retained offset of a partition.
    #[must_use]
    pub fn start_offset(&self, key: &PartitionKey) -> Offset {
        self.lock().logs.get(key).map_or(Offset::new(0), |log| log.start)
    }

    /// Next offset to be written to a partition.
    #[must_use]
    pub fn end_offset(&self, key: &PartitionKey) -> Offset {
        self.lock().logs.get(key).map_or(Offset::new(0), PartitionLog::end)
    }

    /// Current partitions of `topic` with their leaders.
    #[must_use]
    pub fn partitions_of(&self, topic: &str) -> Vec<Partition> {
        self.lock()
            .logs
            .iter()
            .filter(|(key, _)| key.topic == topic)
            .map(|(key, log)| Partition::new(topic, key.partition_id, log.leader.clone()))
            .collect()
    }

    /// Number of connections opened and not yet closed.
    #[must_use]
    pub fn open_connections(&self) -> u64 {
        self.lock().open_connections
    }

    /// Total fetch calls received.
    #[must_use]
    pub fn fetch_calls(&self) -> u64 {
        self.lock().fetch_calls
    }

    /// Deterministic RNG: `(seed + counter) * M` for reproducible faults.
    fn should_inject_fault(&self, rate: f64) -> bool {
        if rate <= 0.0 {
            return false;
        }
        if rate >= 1.0 {
            return true;
        }
        let counter = self.counter.fetch_add(1, Ordering::Relaxed);
        let hash = self
            .seed
            .wrapping_add(counter)
            .wrapping_mul(0x9e37_79b9_7f4a_7c15);
        #[allow(clippy::cast_precision_loss)]
        let normalized = (hash as f64) / (u64::MAX as f64);
        normalized < rate
    }

    fn check_reachable(&self, host: &BrokerHost) -> FetchResult<()> {
        if self.lock().down.contains(host) {
            return Err(FetchError::Unreachable {
                host: host.clone(),
                message: "host down".into(),
            });
        }
        Ok(())
    }

    fn check_leader(&self, host: &BrokerHost, partition: &Partition) -> FetchResult<()> {
        let state = self.lock();
        let log = state.logs.get(&partition.key).ok_or_else(|| FetchError::Protocol {
            message: format!("unknown partition {}", partition.key),
        })?;
        if &log.leader != host {
            return Err(FetchError::NotLeader {
                partition: partition.key.clone(),
                host: host.clone(),
            });
        }
        Ok(())
    }

    fn read(
        &self,
        partition: &Partition,
        from: Offset,
        max_bytes: u32,
    ) -> FetchResult<Vec<FetchedRecord>> {
        let state = self.lock();
        let log = state.logs.get(&partition.key).ok_or_else(|| FetchError::Protocol {
            message: format!("unknown partition {}", partition.key),
        })?;
        if from < log.start || from > log.end() {
            return Err(FetchError::OffsetOutOfRange {
                partition: partition.key.clone(),
                offset: from,
            });
        }

        #[allow(clippy::cast_possible_truncation)]
        let first = from.distance_from(log.start) as usize;
        let mut used = 0_usize;
        let mut batch = Vec::new();
        for record in &log.records[first..] {
            used += record.size();
            if !batch.is_empty() && used > max_bytes as usize {
                break;
            }
            batch.push(record.clone());
        }
        Ok(batch)
    }
}

#[async_trait]
impl BrokerConnector for SimulatedBroker {
    async fn connect(&self, host: &BrokerHost) -> FetchResult<Box<dyn BrokerConnection>> {
        self.check_reachable(host)?;
        let (forced, rate) = {
            let mut state = self.lock();
            let forced = std::mem::take(&mut state.fault_config.force_connect_fail);
            (forced, state.fault_config.connect_fail_rate)
        };
        if forced || self.should_inject_fault(rate) {
            return Err(FetchError::Unreachable {
                host: host.clone(),
                message: "simulated connect failure".into(),
            });
        }

        self.lock().open_connections += 1;
        Ok(Box::new(SimulatedConnection {
            broker: self.clone(),
            host: host.clone(),
            closed: AtomicBool::new(false),
        }))
    }
}

#[async_trait]
impl PartitionDiscovery for SimulatedBroker {
    async fn partitions(&self, topic: &str) -> DiscoveryResult<Vec<Partition>> {
        let forced = std::mem::take(&mut self.lock().fault_config.force_discovery_fail);
        if forced {
            return Err(DiscoveryError::Unavailable {
                message: "simulated discovery failure".into(),
            });
        }
        Ok(self.partitions_of(topic))
    }
}

// -----------------------------------------------------------------------------
// Simulated Connection
// -----------------------------------------------------------------------------

/// Connection handed out by [`SimulatedBroker`].
#[derive(Debug)]
struct SimulatedConnection {
    broker: SimulatedBroker,
    host: BrokerHost,
    closed: AtomicBool,
}

impl SimulatedConnection {
    fn check_open(&self) -> FetchResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(FetchError::Closed);
        }
        self.broker.check_reachable(&self.host)
    }
}

#[async_trait]
impl BrokerConnection for SimulatedConnection {
    async fn fetch(
        &self,
        partition: &Partition,
        from: Offset,
        max_bytes: u32,
    ) -> FetchResult<Vec<FetchedRecord>> {
        let (forced, rate, delay_ms) = {
            let mut state = self.broker.lock();
            state.fetch_calls += 1;
            let forced = std::mem::take(&mut state.fault_config.force_fetch_fail);
            (
                forced,
                state.fault_config.fetch_fail_rate,
                state.fault_config.fetch_delay_ms,
            )
        };
        if delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }

        self.check_open()?;
        if forced || self.broker.should_inject_fault(rate) {
            return Err(FetchError::Unreachable {
                host: self.host.clone(),
                message: "simulated fetch failure".into(),
            });
        }
        self.broker.check_leader(&self.host, partition)?;
        self.broker.read(partition, from, max_bytes)
    }

    async fn offset_for(&self, partition: &Partition, start: StartOffset) -> FetchResult<Offset> {
        self.check_open()?;
        self.broker.check_leader(&self.host, partition)?;
        Ok(match start {
            StartOffset::Earliest => self.broker.start_offset(&partition.key),
            StartOffset::Latest => self.broker.end_offset(&partition.key),
        })
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            let mut state = self.broker.lock();
            state.open_connections = state.open_connections.saturating_sub(1);
        }
    }
}

// -----------------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------------
