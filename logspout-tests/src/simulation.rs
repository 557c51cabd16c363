//! Multi-task simulation harness.
//!
//! A [`Simulation`] owns a simulated broker and coordination store, a manual
//! clock, and one [`SpoutDriver`] per task over a static partition list.
//! Each step polls every task once, then acks or fails whatever was emitted
//! according to the seeded RNG, feeding every observation to a
//! [`PropertyChecker`].

use std::sync::Arc;

use logspout_broker::{BrokerFaultConfig, SimulatedBroker};
use logspout_core::{BrokerHost, ManualClock, Offset, Partition, PartitionKey, Timestamp};
use logspout_progress::{CommittedOffsetRecord, SimulatedCoordinationStore, StoreFaultConfig};
use logspout_spout::{
    Collaborators, Emission, Parallelism, RawDecoder, RecordingEmitter, SpoutConfig, SpoutDriver,
    SpoutResult, StaticPartition,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::properties::PropertyChecker;

/// Topic every simulation consumes.
pub const TOPIC: &str = "events";

/// Parameters of one simulation run.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Seed for the broker, the store and ack/fail decisions.
    pub seed: u64,
    /// Number of partitions.
    pub partitions: u64,
    /// Records appended to every partition up front.
    pub records: u64,
    /// Number of parallel tasks.
    pub tasks: u32,
    /// Probability of failing an emitted tuple.
    pub fail_rate: f64,
    /// Broker faults.
    pub broker_faults: BrokerFaultConfig,
    /// Store faults.
    pub store_faults: StoreFaultConfig,
    /// Simulated milliseconds per step.
    pub tick_ms: i64,
    /// Engine configuration; hosts are filled in from `partitions`.
    pub spout: SpoutConfig,
}

impl SimConfig {
    /// A fault-free run of `partitions` partitions with `records` each.
    #[must_use]
    pub fn new(seed: u64, partitions: u64, records: u64) -> Self {
        let hosts = (0..partitions)
            .map(|id| StaticPartition::new(id, broker_host(id)))
            .collect();
        Self {
            seed,
            partitions,
            records,
            tasks: 1,
            fail_rate: 0.0,
            broker_faults: BrokerFaultConfig::none(),
            store_faults: StoreFaultConfig::none(),
            tick_ms: 50,
            spout: SpoutConfig::for_testing(TOPIC, hosts),
        }
    }

    /// Builder: set the number of tasks.
    #[must_use]
    pub fn with_tasks(mut self, tasks: u32) -> Self {
        self.tasks = tasks;
        self
    }

    /// Builder: set the fail probability.
    #[must_use]
    pub fn with_fail_rate(mut self, rate: f64) -> Self {
        self.fail_rate = rate;
        self
    }

    /// Builder: set broker faults.
    #[must_use]
    pub fn with_broker_faults(mut self, faults: BrokerFaultConfig) -> Self {
        self.broker_faults = faults;
        self
    }

    /// Builder: set store faults.
    #[must_use]
    pub fn with_store_faults(mut self, faults: StoreFaultConfig) -> Self {
        self.store_faults = faults;
        self
    }
}

/// Leader host of partition `id`: three brokers, round robin.
#[must_use]
pub fn broker_host(id: u64) -> BrokerHost {
    BrokerHost::new(format!("broker-{}", id % 3), 9092)
}

/// One task under simulation.
#[derive(Debug)]
pub struct SimTask {
    /// The engine.
    pub driver: SpoutDriver,
    /// Where the engine emits.
    pub emitter: RecordingEmitter,
}

/// A running simulation.
#[derive(Debug)]
pub struct Simulation {
    config: SimConfig,
    /// Simulated broker cluster.
    pub broker: SimulatedBroker,
    /// Simulated coordination store.
    pub store: SimulatedCoordinationStore,
    /// Simulated time.
    pub clock: ManualClock,
    /// Running tasks, by task index.
    pub tasks: Vec<SimTask>,
    /// Invariant checker fed by every step.
    pub checker: PropertyChecker,
    rng: StdRng,
    steps: u64,
}

impl Simulation {
    /// Creates the cluster and opens every task.
    ///
    /// # Errors
    ///
    /// Returns an error if a driver fails to open.
    pub async fn start(config: SimConfig) -> SpoutResult<Self> {
        let broker = SimulatedBroker::with_faults(config.seed, config.broker_faults.clone());
        for id in 0..config.partitions {
            let partition = broker.create_partition(TOPIC, id, broker_host(id));
            broker.append_many(&partition.key, config.records);
        }

        let mut sim = Self {
            broker,
            store: SimulatedCoordinationStore::with_faults(config.seed, config.store_faults.clone()),
            clock: ManualClock::new(Timestamp::from_millis(1_000_000)),
            tasks: Vec::new(),
            checker: PropertyChecker::new(),
            rng: StdRng::seed_from_u64(config.seed),
            steps: 0,
            config,
        };
        sim.open_tasks().await?;
        Ok(sim)
    }

    async fn open_tasks(&mut self) -> SpoutResult<()> {
        self.tasks.clear();
        for task_index in 0..self.config.tasks {
            let emitter = RecordingEmitter::new();
            let collaborators = Collaborators::new(
                Arc::new(self.broker.clone()),
                Arc::new(self.store.session()),
            )
            .with_clock(Arc::new(self.clock.clone()));
            let driver = SpoutDriver::open(
                self.config.spout.clone(),
                Parallelism::new(task_index, self.config.tasks),
                collaborators,
                Box::new(RawDecoder),
                Box::new(emitter.clone()),
            )
            .await?;
            self.tasks.push(SimTask { driver, emitter });
        }
        let all = self.config.spout.static_partitions();
        let owned: Vec<Vec<Partition>> = self
            .tasks
            .iter()
            .map(|task| task.driver.owned_partitions())
            .collect();
        self.checker.check_assignment(&all, &owned);
        Ok(())
    }

    /// Closes every task and opens fresh ones over the same store.
    ///
    /// # Errors
    ///
    /// Returns an error if a driver fails to open.
    pub async fn restart(&mut self) -> SpoutResult<()> {
        self.close().await;
        for key in self.partition_keys() {
            let resume_from = self
                .persisted(&key)
                .map_or(Offset::new(0), |record| record.offset);
            self.checker.reset_consumer_view(&key, resume_from);
        }
        self.open_tasks().await
    }

    /// Sets the probability of failing an emitted tuple.
    pub fn set_fail_rate(&mut self, rate: f64) {
        self.config.fail_rate = rate;
    }

    /// Polls every task once and resolves what they emitted.
    pub async fn step(&mut self) {
        self.steps += 1;
        for task in &mut self.tasks {
            task.driver.poll().await;
            for Emission { message_id, .. } in task.emitter.take() {
                self.checker.record_emission(&message_id);
                if self.rng.gen_bool(self.config.fail_rate) {
                    task.driver.fail(&message_id);
                } else if task.driver.ack(&message_id) {
                    self.checker.record_ack(&message_id);
                }
            }
            self.checker.record_snapshots(&task.driver.offset_snapshots());
        }
        self.clock.advance(self.config.tick_ms);
    }

    /// Runs `steps` steps, checking persisted offsets after each.
    pub async fn run(&mut self, steps: u64) {
        for _ in 0..steps {
            self.step().await;
            self.check_persisted();
        }
        debug!(steps = self.steps, "simulation ran");
    }

    /// Keeps stepping without failures until every record is acked or
    /// `max_steps` is reached. Returns true if everything was acked.
    pub async fn drain(&mut self, max_steps: u64) -> bool {
        self.set_fail_rate(0.0);
        for _ in 0..max_steps {
            if self.all_acked() {
                return true;
            }
            self.step().await;
            self.check_persisted();
        }
        self.all_acked()
    }

    fn all_acked(&self) -> bool {
        self.partition_keys().iter().all(|key| {
            u64::try_from(self.checker.acked_count(key)).is_ok_and(|n| n >= self.config.records)
        })
    }

    /// Feeds every persisted offset to the checker.
    pub fn check_persisted(&mut self) {
        for key in self.partition_keys() {
            if let Some(record) = self.persisted(&key) {
                self.checker.record_persisted(&key, Offset::new(0), record.offset);
            }
        }
    }

    /// Commits and closes every task.
    pub async fn close(&mut self) {
        for task in &mut self.tasks {
            task.driver.close().await;
        }
        self.check_persisted();
    }

    /// Keys of every partition in the topic.
    #[must_use]
    pub fn partition_keys(&self) -> Vec<PartitionKey> {
        self.config
            .spout
            .static_partitions()
            .into_iter()
            .map(|partition| partition.key)
            .collect()
    }

    /// Reads the persisted record for `key`, bypassing fault injection.
    #[must_use]
    pub fn persisted(&self, key: &PartitionKey) -> Option<CommittedOffsetRecord> {
        let path = format!(
            "{}/{}/{}/partition_{}",
            self.config.spout.store_root,
            self.config.spout.consumer_id,
            key.topic,
            key.partition_id.get()
        );
        let data = self.store.snapshot(&path)?;
        serde_json::from_slice(&data).ok()
    }

    /// Steps run so far.
    #[must_use]
    pub const fn steps(&self) -> u64 {
        self.steps
    }
}
