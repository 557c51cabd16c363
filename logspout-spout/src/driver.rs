//! Consumption driver - the poll loop.
//!
//! The driver is called by a single scheduler: `poll`, `ack` and `fail` take
//! `&mut self` and are never re-entered. All periodic work (commits, dynamic
//! refreshes) is re-checked on each poll; there are no timers or background
//! tasks.

use std::sync::Arc;

use async_trait::async_trait;
use logspout_broker::{BrokerConnector, ConnectionPool, PartitionDiscovery};
use logspout_core::{Clock, MessageId, Partition, SystemClock, Timestamp};
use logspout_progress::{CoordinationStore, OffsetStore};
use tracing::{debug, info, warn};

use crate::config::{BrokerHosts, Parallelism, SpoutConfig};
use crate::coordinator::{DynamicCoordinator, PartitionCoordinator, StaticCoordinator};
use crate::decoder::RecordDecoder;
use crate::discovery::StoreBrokerReader;
use crate::emitter::PipelineEmitter;
use crate::error::SpoutResult;
use crate::manager::{EmitState, ManagerContext, ManagerMetrics, OffsetSnapshot, PartitionManager};

// ----------------------------------------------------------------------------
// Spout
// ----------------------------------------------------------------------------

/// Result of one [`Spout::poll`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// A tuple was emitted from `partition`.
    Emitted {
        /// The partition the tuple came from.
        partition: Partition,
    },
    /// No owned partition had anything to emit.
    Idle,
}

/// Lifecycle a scheduler drives a consumer through.
#[async_trait]
pub trait Spout: Send {
    /// Emits at most one tuple and runs any periodic work that is due.
    async fn poll(&mut self) -> PollOutcome;

    /// Reports that the tuple tagged `message_id` was processed.
    ///
    /// Returns false if no owned partition was waiting on it.
    fn ack(&mut self, message_id: &MessageId) -> bool;

    /// Reports that the tuple tagged `message_id` failed.
    ///
    /// Returns false if no owned partition was waiting on it.
    fn fail(&mut self, message_id: &MessageId) -> bool;

    /// Called when the spout is resumed after [`Self::deactivate`].
    async fn activate(&mut self);

    /// Called before the spout is suspended. Flushes commits.
    async fn deactivate(&mut self);

    /// Flushes commits and releases every connection.
    async fn close(&mut self);
}

// ----------------------------------------------------------------------------
// Collaborators
// ----------------------------------------------------------------------------

/// External systems the driver talks to.
#[derive(Clone)]
pub struct Collaborators {
    /// Opens broker connections.
    pub connector: Arc<dyn BrokerConnector>,
    /// Backs the offset store and, by default, dynamic discovery.
    pub store: Arc<dyn CoordinationStore>,
    /// Discovery source for dynamic mode. Defaults to reading the broker
    /// registry from `store`.
    pub discovery: Option<Arc<dyn PartitionDiscovery>>,
    /// Time source.
    pub clock: Arc<dyn Clock>,
}

impl Collaborators {
    /// Creates collaborators using the system clock.
    #[must_use]
    pub fn new(connector: Arc<dyn BrokerConnector>, store: Arc<dyn CoordinationStore>) -> Self {
        Self {
            connector,
            store,
            discovery: None,
            clock: Arc::new(SystemClock),
        }
    }

    /// Uses `discovery` instead of the store's broker registry.
    #[must_use]
    pub fn with_discovery(mut self, discovery: Arc<dyn PartitionDiscovery>) -> Self {
        self.discovery = Some(discovery);
        self
    }

    /// Uses `clock` instead of the system clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators")
            .field("discovery", &self.discovery.is_some())
            .finish_non_exhaustive()
    }
}

// ----------------------------------------------------------------------------
// Metrics
// ----------------------------------------------------------------------------

/// Read-only view of the driver's counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpoutMetrics {
    /// Counters per owned partition.
    pub partitions: Vec<(Partition, ManagerMetrics)>,
    /// Sum over the owned partitions.
    pub totals: ManagerMetrics,
    /// Polls that emitted a tuple.
    pub polls_emitted: u64,
    /// Polls that emitted nothing.
    pub polls_idle: u64,
    /// Manager errors caught by the poll loop.
    pub poll_errors: u64,
    /// Commit rounds run.
    pub commit_rounds: u64,
    /// Acks that matched no owned partition.
    pub dropped_acks: u64,
    /// Fails that matched no owned partition.
    pub dropped_fails: u64,
}

#[derive(Debug, Clone, Copy, Default)]
struct DriverCounters {
    polls_emitted: u64,
    polls_idle: u64,
    poll_errors: u64,
    commit_rounds: u64,
    dropped_acks: u64,
    dropped_fails: u64,
}

// ----------------------------------------------------------------------------
// SpoutDriver
// ----------------------------------------------------------------------------

/// Consumes this task's share of a topic.
pub struct SpoutDriver {
    config: Arc<SpoutConfig>,
    parallelism: Parallelism,
    coordinator: PartitionCoordinator,
    pool: ConnectionPool,
    offsets: OffsetStore,
    decoder: Box<dyn RecordDecoder>,
    emitter: Box<dyn PipelineEmitter>,
    clock: Arc<dyn Clock>,
    /// Manager tried first on the next poll.
    current_index: usize,
    last_commit: Timestamp,
    closed: bool,
    counters: DriverCounters,
}

impl std::fmt::Debug for SpoutDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpoutDriver")
            .field("topic", &self.config.topic)
            .field("parallelism", &self.parallelism)
            .field("coordinator", &self.coordinator)
            .field("current_index", &self.current_index)
            .field("last_commit", &self.last_commit)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl SpoutDriver {
    /// Validates the configuration and builds the driver.
    ///
    /// Nothing is fetched until the first poll. In dynamic mode the
    /// partition list is discovered here; a failed discovery is logged and
    /// retried on the next refresh.
    ///
    /// # Errors
    ///
    /// Returns [`crate::SpoutError::Config`] if the configuration or the
    /// parallelism is invalid.
    pub async fn open(
        config: SpoutConfig,
        parallelism: Parallelism,
        collaborators: Collaborators,
        decoder: Box<dyn RecordDecoder>,
        emitter: Box<dyn PipelineEmitter>,
    ) -> SpoutResult<Self> {
        config.validate()?;
        parallelism.validate()?;

        let config = Arc::new(config);
        let Collaborators {
            connector,
            store,
            discovery,
            clock,
        } = collaborators;
        let now = clock.now();

        let offsets = OffsetStore::new(Arc::clone(&store), config.store_root.clone());
        let mut pool = ConnectionPool::new(connector, config.fetch_timeout_ms);

        let coordinator = match &config.hosts {
            BrokerHosts::Static { .. } => PartitionCoordinator::Static(StaticCoordinator::new(
                &config.static_partitions(),
                &parallelism,
                &config,
            )),
            BrokerHosts::Dynamic {
                broker_path,
                refresh_interval_ms,
            } => {
                let discovery = discovery.unwrap_or_else(|| {
                    Arc::new(StoreBrokerReader::new(Arc::clone(&store), broker_path.clone()))
                });
                let mut coordinator = PartitionCoordinator::Dynamic(DynamicCoordinator::new(
                    discovery,
                    parallelism.clone(),
                    Arc::clone(&config),
                    *refresh_interval_ms,
                ));
                coordinator.refresh(&mut pool, &offsets, now).await;
                coordinator
            }
        };

        info!(
            topic = %config.topic,
            consumer = %config.consumer_id,
            instance = %parallelism.instance_id,
            task_index = parallelism.task_index,
            total_tasks = parallelism.total_tasks,
            owned = coordinator.managers().len(),
            "spout opened"
        );

        Ok(Self {
            config,
            parallelism,
            coordinator,
            pool,
            offsets,
            decoder,
            emitter,
            clock,
            current_index: 0,
            last_commit: now,
            closed: false,
            counters: DriverCounters::default(),
        })
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &SpoutConfig {
        &self.config
    }

    /// Returns this task's position among its peers.
    #[must_use]
    pub const fn parallelism(&self) -> &Parallelism {
        &self.parallelism
    }

    /// Returns true once [`Self::close`] has run.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.closed
    }

    /// Partitions currently owned, in poll order.
    #[must_use]
    pub fn owned_partitions(&self) -> Vec<Partition> {
        self.coordinator
            .managers()
            .iter()
            .map(|manager| manager.partition().clone())
            .collect()
    }

    // ---- Poll ----

    /// Emits at most one tuple, then commits if the interval elapsed.
    ///
    /// Starting from the rotating index, each owned manager gets one chance
    /// to emit. A manager that emitted with more buffered keeps the index so
    /// it is revisited next time; otherwise the index advances. A manager
    /// error is logged, triggers a coordinator refresh and moves on to the
    /// next manager.
    pub async fn poll(&mut self) -> PollOutcome {
        if self.closed {
            return PollOutcome::Idle;
        }
        let now = self.clock.now();

        let mut count = self
            .coordinator
            .managed_partitions(&mut self.pool, &self.offsets, now)
            .await
            .len();
        let mut remaining = count;
        let mut outcome = PollOutcome::Idle;

        while remaining > 0 {
            remaining -= 1;
            self.current_index %= count;

            let Some(manager) = self.coordinator.managers_mut().get_mut(self.current_index) else {
                break;
            };
            let mut ctx = ManagerContext {
                pool: &mut self.pool,
                offsets: &self.offsets,
                decoder: &*self.decoder,
                emitter: &mut *self.emitter,
                now,
            };
            let result = manager.next(&mut ctx).await;
            let partition = manager.partition().clone();

            match result {
                Ok(EmitState::EmittedMoreLeft) => {
                    outcome = PollOutcome::Emitted { partition };
                    break;
                }
                Ok(EmitState::EmittedEnd) => {
                    self.current_index += 1;
                    outcome = PollOutcome::Emitted { partition };
                    break;
                }
                Ok(EmitState::NoEmitted) => {
                    self.current_index += 1;
                }
                Err(error) => {
                    self.counters.poll_errors += 1;
                    warn!(
                        partition = %partition,
                        error = %error,
                        "failed to fetch from partition, refreshing assignment"
                    );
                    self.coordinator.refresh(&mut self.pool, &self.offsets, now).await;
                    count = self.coordinator.managers().len();
                    remaining = remaining.min(count);
                    self.current_index += 1;
                }
            }
        }
        if count > 0 {
            self.current_index %= count;
        } else {
            self.current_index = 0;
        }

        match outcome {
            PollOutcome::Emitted { .. } => self.counters.polls_emitted += 1,
            PollOutcome::Idle => self.counters.polls_idle += 1,
        }

        let elapsed = now.millis_since(self.last_commit);
        if elapsed < 0 || elapsed.unsigned_abs() >= self.config.commit_interval_ms {
            if elapsed < 0 {
                debug!(elapsed_ms = elapsed, "clock moved backwards, committing now");
            }
            self.commit_all().await;
        }

        outcome
    }

    // ---- Ack / Fail ----

    /// Resolves the manager for `partition`: exact match first, then by
    /// topic and partition id.
    fn manager_for(&mut self, partition: &Partition) -> Option<&mut PartitionManager> {
        if self.coordinator.get_manager(partition).is_some() {
            return self.coordinator.get_manager(partition);
        }
        let manager = self.coordinator.find_manager(partition)?;
        debug!(
            partition = %partition,
            owner_leader = %manager.partition().leader,
            "resolved message id by partition key"
        );
        Some(manager)
    }

    /// Acks `message_id`. Unknown ids are dropped.
    pub fn ack(&mut self, message_id: &MessageId) -> bool {
        let offset = message_id.offset;
        let acked = self
            .manager_for(&message_id.partition)
            .is_some_and(|manager| manager.ack(offset));
        if !acked {
            self.counters.dropped_acks += 1;
            debug!(
                partition = %message_id.partition,
                offset = offset.get(),
                "dropped ack for message not pending here"
            );
        }
        acked
    }

    /// Fails `message_id` so it is retried. Unknown ids are dropped.
    pub fn fail(&mut self, message_id: &MessageId) -> bool {
        let offset = message_id.offset;
        let now = self.clock.now();
        let failed = self
            .manager_for(&message_id.partition)
            .is_some_and(|manager| manager.fail(offset, now));
        if !failed {
            self.counters.dropped_fails += 1;
            debug!(
                partition = %message_id.partition,
                offset = offset.get(),
                "dropped fail for message not pending here"
            );
        }
        failed
    }

    // ---- Commit ----

    /// Commits every owned partition. Returns how many records were written.
    ///
    /// The commit timer restarts even if some writes failed; those are
    /// retried on the next round.
    pub async fn commit_all(&mut self) -> usize {
        let now = self.clock.now();
        let mut written = 0;
        for manager in self.coordinator.managers_mut() {
            if manager.commit(&self.offsets, now).await {
                written += 1;
            }
        }
        self.last_commit = now;
        self.counters.commit_rounds += 1;
        debug!(written, "commit round finished");
        written
    }

    // ---- Lifecycle ----

    /// Hook for resuming after [`Self::deactivate`]. Nothing to do.
    pub async fn activate(&mut self) {
        debug!(instance = %self.parallelism.instance_id, "spout activated");
    }

    /// Flushes commits before the spout is suspended.
    pub async fn deactivate(&mut self) {
        self.commit_all().await;
        info!(instance = %self.parallelism.instance_id, "spout deactivated");
    }

    /// Flushes commits, releases every connection and closes the store.
    /// Idempotent.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.commit_all().await;
        self.pool.close_all().await;
        if let Err(error) = self.offsets.close().await {
            warn!(error = %error, "failed to close coordination store");
        }
        self.closed = true;
        info!(instance = %self.parallelism.instance_id, "spout closed");
    }

    // ---- Observation ----

    /// Offsets of every initialized owned partition.
    #[must_use]
    pub fn offset_snapshots(&self) -> Vec<OffsetSnapshot> {
        self.coordinator
            .managers()
            .iter()
            .filter_map(PartitionManager::offset_snapshot)
            .collect()
    }

    /// Counters for the driver and every owned partition.
    #[must_use]
    pub fn metrics(&self) -> SpoutMetrics {
        let mut totals = ManagerMetrics::default();
        let partitions = self
            .coordinator
            .managers()
            .iter()
            .map(|manager| {
                let metrics = manager.metrics();
                totals.accumulate(&metrics);
                (manager.partition().clone(), metrics)
            })
            .collect();
        SpoutMetrics {
            partitions,
            totals,
            polls_emitted: self.counters.polls_emitted,
            polls_idle: self.counters.polls_idle,
            poll_errors: self.counters.poll_errors,
            commit_rounds: self.counters.commit_rounds,
            dropped_acks: self.counters.dropped_acks,
            dropped_fails: self.counters.dropped_fails,
        }
    }
}

#[async_trait]
impl Spout for SpoutDriver {
    async fn poll(&mut self) -> PollOutcome {
        Self::poll(self).await
    }

    fn ack(&mut self, message_id: &MessageId) -> bool {
        Self::ack(self, message_id)
    }

    fn fail(&mut self, message_id: &MessageId) -> bool {
        Self::fail(self, message_id)
    }

    async fn activate(&mut self) {
        Self::activate(self).await;
    }

    async fn deactivate(&mut self) {
        Self::deactivate(self).await;
    }

    async fn close(&mut self) {
        Self::close(self).await;
    }
}

#[cfg(test)]
mod tests {
    use logspout_broker::{BrokerFaultConfig, SimulatedBroker};
    use logspout_core::{BrokerHost, BrokerId, ManualClock, Offset, PartitionId};
    use logspout_progress::SimulatedCoordinationStore;

    use super::*;
    use crate::config::StaticPartition;
    use crate::decoder::RawDecoder;
    use crate::discovery::{publish_broker, publish_partition_state};
    use crate::emitter::RecordingEmitter;
    use crate::SpoutError;

    struct Fixture {
        broker: SimulatedBroker,
        store: SimulatedCoordinationStore,
        clock: ManualClock,
        emitter: RecordingEmitter,
    }

    impl Fixture {
        /// One partition per broker host, `records` records each.
        fn new(partitions: u64, records: u64) -> Self {
            let broker = SimulatedBroker::new(11);
            for id in 0..partitions {
                let partition = broker.create_partition("events", id, host(id));
                broker.append_many(&partition.key, records);
            }
            Self {
                broker,
                store: SimulatedCoordinationStore::new(11),
                clock: ManualClock::new(Timestamp::from_millis(10_000)),
                emitter: RecordingEmitter::new(),
            }
        }

        fn collaborators(&self) -> Collaborators {
            Collaborators::new(Arc::new(self.broker.clone()), Arc::new(self.store.clone()))
                .with_clock(Arc::new(self.clock.clone()))
        }

        async fn open(&self, config: SpoutConfig, parallelism: Parallelism) -> SpoutDriver {
            SpoutDriver::open(
                config,
                parallelism,
                self.collaborators(),
                Box::new(RawDecoder),
                Box::new(self.emitter.clone()),
            )
            .await
            .unwrap()
        }

        fn committed(&self, driver: &SpoutDriver, id: u64) -> Option<u64> {
            let partition = Partition::new("events", PartitionId::new(id), host(id));
            let path = driver.offsets.path_for(&partition, &driver.config.consumer_id);
            let data = self.store.snapshot(&path)?;
            let value: serde_json::Value = serde_json::from_slice(&data).unwrap();
            value["offset"].as_u64()
        }
    }

    fn host(id: u64) -> BrokerHost {
        BrokerHost::new(format!("b{id}"), 9092)
    }

    fn static_config(partitions: u64) -> SpoutConfig {
        SpoutConfig::for_testing(
            "events",
            (0..partitions).map(|id| StaticPartition::new(id, host(id))).collect(),
        )
    }

    fn emitted_partitions(emitter: &RecordingEmitter) -> Vec<u64> {
        emitter
            .take()
            .into_iter()
            .map(|e| e.message_id.partition.id().get())
            .collect()
    }

    #[tokio::test]
    async fn test_open_rejects_invalid_config() {
        let fixture = Fixture::new(1, 0);

        let err = SpoutDriver::open(
            static_config(0),
            Parallelism::single(),
            fixture.collaborators(),
            Box::new(RawDecoder),
            Box::new(RecordingEmitter::new()),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, SpoutError::Config(_)));

        let err = SpoutDriver::open(
            static_config(1),
            Parallelism::new(2, 2),
            fixture.collaborators(),
            Box::new(RawDecoder),
            Box::new(RecordingEmitter::new()),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, SpoutError::Config(_)));
    }

    #[tokio::test]
    async fn test_round_robin_across_partitions() {
        let fixture = Fixture::new(3, 1);
        let mut driver = fixture.open(static_config(3), Parallelism::single()).await;

        for _ in 0..3 {
            assert!(matches!(driver.poll().await, PollOutcome::Emitted { .. }));
        }
        assert_eq!(emitted_partitions(&fixture.emitter), vec![0, 1, 2]);
        assert_eq!(driver.poll().await, PollOutcome::Idle);
    }

    #[tokio::test]
    async fn test_hot_partition_is_revisited() {
        let fixture = Fixture::new(2, 3);
        let mut driver = fixture.open(static_config(2), Parallelism::single()).await;

        for _ in 0..6 {
            driver.poll().await;
        }
        // The whole fetched batch of partition 0 drains before partition 1.
        assert_eq!(emitted_partitions(&fixture.emitter), vec![0, 0, 0, 1, 1, 1]);
    }

    #[tokio::test]
    async fn test_failing_partition_does_not_stall_others() {
        let fixture = Fixture::new(3, 2);
        fixture.broker.set_host_down(&host(1), true);
        let mut driver = fixture.open(static_config(3), Parallelism::single()).await;

        let mut emitted = Vec::new();
        for _ in 0..6 {
            if let PollOutcome::Emitted { partition } = driver.poll().await {
                emitted.push(partition.id().get());
            }
        }
        assert!(emitted.contains(&0));
        assert!(emitted.contains(&2));
        assert!(!emitted.contains(&1));
        assert!(driver.metrics().poll_errors > 0);
    }

    #[tokio::test]
    async fn test_commit_on_interval_and_clock_regression() {
        let fixture = Fixture::new(1, 4);
        let mut driver = fixture.open(static_config(1), Parallelism::single()).await;

        driver.poll().await;
        for emission in fixture.emitter.take() {
            assert!(driver.ack(&emission.message_id));
        }
        assert_eq!(fixture.committed(&driver, 0), None);

        fixture.clock.advance(1_000);
        driver.poll().await;
        // Offset 0 acked, offset 1 pending.
        assert_eq!(fixture.committed(&driver, 0), Some(1));

        for emission in fixture.emitter.take() {
            driver.ack(&emission.message_id);
        }
        fixture.clock.set(Timestamp::from_millis(5_000));
        driver.poll().await;
        assert_eq!(fixture.committed(&driver, 0), Some(2));
        assert_eq!(driver.metrics().commit_rounds, 2);
    }

    #[tokio::test]
    async fn test_fail_is_redelivered() {
        let fixture = Fixture::new(1, 3);
        let mut driver = fixture.open(static_config(1), Parallelism::single()).await;

        driver.poll().await;
        let first = fixture.emitter.take().remove(0);
        assert!(driver.fail(&first.message_id));
        driver.poll().await;
        driver.poll().await;

        let offsets: Vec<u64> = fixture
            .emitter
            .take()
            .iter()
            .map(|e| e.message_id.offset.get())
            .collect();
        assert_eq!(offsets, vec![1, 2]);

        // Buffer drained, so the retry is fetched before anything new.
        driver.poll().await;
        assert_eq!(fixture.emitter.take()[0].message_id.offset, Offset::new(0));
    }

    #[tokio::test]
    async fn test_unknown_message_ids_are_dropped() {
        let fixture = Fixture::new(1, 1);
        let mut driver = fixture.open(static_config(1), Parallelism::single()).await;

        let foreign = MessageId::new(
            Partition::new("events", PartitionId::new(9), host(9)),
            Offset::new(0),
        );
        assert!(!driver.ack(&foreign));
        assert!(!driver.fail(&foreign));

        let metrics = driver.metrics();
        assert_eq!(metrics.dropped_acks, 1);
        assert_eq!(metrics.dropped_fails, 1);
    }

    #[tokio::test]
    async fn test_ack_falls_back_to_partition_key() {
        let fixture = Fixture::new(1, 2);
        let mut driver = fixture.open(static_config(1), Parallelism::single()).await;

        driver.poll().await;
        let emission = fixture.emitter.take().remove(0);
        let mut moved = emission.message_id.clone();
        moved.partition.leader = BrokerHost::new("elsewhere", 1);

        assert!(driver.ack(&moved));
        assert_eq!(driver.metrics().totals.acked, 1);
    }

    #[tokio::test]
    async fn test_deactivate_and_close_flush_commits() {
        let fixture = Fixture::new(2, 1);
        let mut driver = fixture.open(static_config(2), Parallelism::single()).await;

        driver.poll().await;
        driver.poll().await;
        for emission in fixture.emitter.take() {
            driver.ack(&emission.message_id);
        }
        driver.deactivate().await;
        assert_eq!(fixture.committed(&driver, 0), Some(1));
        assert_eq!(fixture.committed(&driver, 1), Some(1));

        driver.activate().await;
        driver.close().await;
        assert!(driver.is_closed());
        assert!(fixture.store.is_closed());
        assert_eq!(fixture.broker.open_connections(), 0);
        assert_eq!(driver.poll().await, PollOutcome::Idle);
    }

    #[tokio::test]
    async fn test_tasks_split_partitions() {
        let fixture = Fixture::new(5, 1);
        let first = fixture.open(static_config(5), Parallelism::new(0, 2)).await;
        let second = fixture.open(static_config(5), Parallelism::new(1, 2)).await;

        let ids = |driver: &SpoutDriver| -> Vec<u64> {
            driver.owned_partitions().iter().map(|p| p.id().get()).collect()
        };
        assert_eq!(ids(&first), vec![0, 1, 2]);
        assert_eq!(ids(&second), vec![3, 4]);
    }

    #[tokio::test]
    async fn test_dynamic_mode_reads_broker_registry() {
        let fixture = Fixture::new(2, 1);
        for id in 0..2 {
            publish_broker(&fixture.store, "/brokers", BrokerId::new(id), &host(id))
                .await
                .unwrap();
            publish_partition_state(
                &fixture.store,
                "/brokers",
                "events",
                PartitionId::new(id),
                BrokerId::new(id),
            )
            .await
            .unwrap();
        }
        let mut config = static_config(0);
        config.hosts = BrokerHosts::Dynamic {
            broker_path: "/brokers".into(),
            refresh_interval_ms: 60_000,
        };
        let mut driver = fixture.open(config, Parallelism::single()).await;

        assert_eq!(driver.owned_partitions().len(), 2);
        driver.poll().await;
        driver.poll().await;
        assert_eq!(emitted_partitions(&fixture.emitter), vec![0, 1]);
    }

    #[tokio::test]
    async fn test_fetch_faults_are_survivable() {
        let fixture = Fixture::new(2, 20);
        fixture
            .broker
            .set_faults(|faults| *faults = BrokerFaultConfig::flaky());
        let mut driver = fixture.open(static_config(2), Parallelism::single()).await;

        for _ in 0..200 {
            driver.poll().await;
            for emission in fixture.emitter.take() {
                driver.ack(&emission.message_id);
            }
        }
        fixture.broker.set_faults(|faults| *faults = BrokerFaultConfig::none());
        for _ in 0..50 {
            driver.poll().await;
            for emission in fixture.emitter.take() {
                driver.ack(&emission.message_id);
            }
        }
        driver.commit_all().await;

        assert_eq!(fixture.committed(&driver, 0), Some(20));
        assert_eq!(fixture.committed(&driver, 1), Some(20));
    }
}
