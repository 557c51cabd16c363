//! Scenario tests for the consumption driver.
//!
//! Each test builds a small cluster by hand and drives one or two tasks
//! through a specific situation: a partition whose fetch fails, a failed
//! record that must come back before new data, fairness across partitions,
//! and acks that arrive after their partition moved away.

use std::sync::Arc;

use logspout_broker::SimulatedBroker;
use logspout_core::{
    BrokerHost, BrokerId, ManualClock, Offset, Partition, PartitionId, Timestamp,
};
use logspout_progress::{OffsetStore, SimulatedCoordinationStore};
use logspout_spout::{
    publish_broker, publish_partition_state, BrokerHosts, Collaborators, Parallelism, PollOutcome,
    RawDecoder, RecordingEmitter, SpoutConfig, SpoutDriver, StaticPartition,
};

const TOPIC: &str = "events";
const BROKER_PATH: &str = "/brokers";

struct Cluster {
    broker: SimulatedBroker,
    store: SimulatedCoordinationStore,
    clock: ManualClock,
}

impl Cluster {
    /// Partition `i` gets `records[i]` records and its own leader host.
    fn new(records: &[u64]) -> Self {
        let broker = SimulatedBroker::new(3);
        for (id, &count) in (0_u64..).zip(records) {
            let partition = broker.create_partition(TOPIC, id, host(id));
            broker.append_many(&partition.key, count);
        }
        Self {
            broker,
            store: SimulatedCoordinationStore::new(3),
            clock: ManualClock::new(Timestamp::from_millis(50_000)),
        }
    }

    async fn open(
        &self,
        config: SpoutConfig,
        parallelism: Parallelism,
        emitter: &RecordingEmitter,
    ) -> SpoutDriver {
        let collaborators = Collaborators::new(
            Arc::new(self.broker.clone()),
            Arc::new(self.store.session()),
        )
        .with_clock(Arc::new(self.clock.clone()));
        SpoutDriver::open(
            config,
            parallelism,
            collaborators,
            Box::new(RawDecoder),
            Box::new(emitter.clone()),
        )
        .await
        .unwrap()
    }

    async fn persisted(&self, config: &SpoutConfig, id: u64) -> Option<u64> {
        let offsets = OffsetStore::new(Arc::new(self.store.clone()), config.store_root.clone());
        let partition = Partition::new(TOPIC, PartitionId::new(id), host(id));
        offsets
            .read(&partition, &config.consumer_id)
            .await
            .unwrap()
            .map(|record| record.offset.get())
    }

    async fn publish(&self, id: u64) {
        publish_broker(&self.store, BROKER_PATH, BrokerId::new(id), &host(id))
            .await
            .unwrap();
        publish_partition_state(
            &self.store,
            BROKER_PATH,
            TOPIC,
            PartitionId::new(id),
            BrokerId::new(id),
        )
        .await
        .unwrap();
    }
}

fn host(id: u64) -> BrokerHost {
    BrokerHost::new(format!("broker-{id}"), 9092)
}

fn static_config(partitions: u64) -> SpoutConfig {
    SpoutConfig::for_testing(
        TOPIC,
        (0..partitions).map(|id| StaticPartition::new(id, host(id))).collect(),
    )
}

fn dynamic_config(refresh_interval_ms: u64) -> SpoutConfig {
    let mut config = static_config(0);
    config.hosts = BrokerHosts::Dynamic {
        broker_path: BROKER_PATH.into(),
        refresh_interval_ms,
    };
    config
}

fn emitted(emitter: &RecordingEmitter) -> Vec<(u64, u64)> {
    emitter
        .take()
        .into_iter()
        .map(|e| (e.message_id.partition.id().get(), e.message_id.offset.get()))
        .collect()
}

// ============================================================================
// Failing Partition
// ============================================================================

/// Three partitions, one task, 1000 ms commit interval. The middle
/// partition's fetch fails once: the same poll moves on and emits from the
/// next partition, and the next commit covers the healthy partitions while
/// the failed one stays uncommitted.
#[tokio::test]
async fn test_driver_failing_partition_does_not_block_others() {
    let cluster = Cluster::new(&[3, 3, 3]);
    let config = static_config(3)
        .with_commit_interval_ms(1_000)
        .with_fetch_max_bytes(1);
    let emitter = RecordingEmitter::new();
    let mut driver = cluster.open(config.clone(), Parallelism::single(), &emitter).await;

    let first = driver.poll().await;
    assert!(matches!(first, PollOutcome::Emitted { ref partition } if partition.id().get() == 0));

    cluster.broker.set_faults(|faults| faults.force_fetch_fail = true);
    let second = driver.poll().await;
    assert!(matches!(second, PollOutcome::Emitted { ref partition } if partition.id().get() == 2));

    let metrics = driver.metrics();
    assert_eq!(metrics.poll_errors, 1);
    assert_eq!(metrics.partitions[1].1.fetch_failures, 1);

    for emission in emitter.take() {
        assert!(driver.ack(&emission.message_id));
    }
    cluster.clock.advance(1_000);
    driver.poll().await;

    assert_eq!(cluster.persisted(&config, 0).await, Some(1));
    assert_eq!(cluster.persisted(&config, 1).await, None);
    assert_eq!(cluster.persisted(&config, 2).await, Some(1));
}

/// A partition whose broker is down stays skipped pass after pass while the
/// rest of the topic drains.
#[tokio::test]
async fn test_driver_unreachable_partition_is_isolated() {
    let cluster = Cluster::new(&[5, 5, 5]);
    cluster.broker.set_host_down(&host(1), true);
    let emitter = RecordingEmitter::new();
    let mut driver = cluster.open(static_config(3), Parallelism::single(), &emitter).await;

    for _ in 0..20 {
        driver.poll().await;
        for emission in emitter.take() {
            assert_ne!(emission.message_id.partition.id().get(), 1);
            driver.ack(&emission.message_id);
        }
    }
    assert_eq!(driver.metrics().totals.acked, 10);

    cluster.broker.set_host_down(&host(1), false);
    for _ in 0..10 {
        driver.poll().await;
        for emission in emitter.take() {
            driver.ack(&emission.message_id);
        }
    }
    assert_eq!(driver.metrics().totals.acked, 15);
}

// ============================================================================
// Redelivery
// ============================================================================

/// Failed records come back before anything beyond the fetched range, then
/// new records follow in order.
#[tokio::test]
async fn test_driver_fail_redelivered_before_new_records() {
    let cluster = Cluster::new(&[5]);
    let emitter = RecordingEmitter::new();
    let mut driver = cluster.open(static_config(1), Parallelism::single(), &emitter).await;

    for _ in 0..5 {
        driver.poll().await;
    }
    let batch = emitter.take();
    assert_eq!(batch.len(), 5);
    for emission in &batch {
        let offset = emission.message_id.offset.get();
        if offset == 1 || offset == 3 {
            assert!(driver.fail(&emission.message_id));
        } else {
            assert!(driver.ack(&emission.message_id));
        }
    }

    let key = batch[0].message_id.partition.key.clone();
    cluster.broker.append_many(&key, 3);
    for _ in 0..5 {
        driver.poll().await;
    }
    let redelivered: Vec<u64> = emitted(&emitter).into_iter().map(|(_, offset)| offset).collect();
    assert_eq!(redelivered, vec![1, 3, 5, 6, 7]);

    let snapshot = &driver.offset_snapshots()[0];
    assert_eq!(snapshot.resume, Offset::new(1));
    assert_eq!(snapshot.fetch_cursor, Offset::new(8));
}

// ============================================================================
// Fairness
// ============================================================================

/// With one record per fetch, every pass emits from each partition once.
#[tokio::test]
async fn test_driver_round_robin_one_per_pass() {
    let cluster = Cluster::new(&[4, 4, 4]);
    let emitter = RecordingEmitter::new();
    let config = static_config(3).with_fetch_max_bytes(1);
    let mut driver = cluster.open(config, Parallelism::single(), &emitter).await;

    for _ in 0..12 {
        assert!(matches!(driver.poll().await, PollOutcome::Emitted { .. }));
    }
    let order: Vec<u64> = emitted(&emitter).into_iter().map(|(id, _)| id).collect();
    for pass in order.chunks(3) {
        assert_eq!(pass, &[0, 1, 2]);
    }
    assert_eq!(driver.poll().await, PollOutcome::Idle);
}

/// An empty partition does not cost a poll: the same call moves on to the
/// next partition with data.
#[tokio::test]
async fn test_driver_empty_partition_skipped_within_poll() {
    let cluster = Cluster::new(&[2, 0, 2]);
    let emitter = RecordingEmitter::new();
    let config = static_config(3).with_fetch_max_bytes(1);
    let mut driver = cluster.open(config, Parallelism::single(), &emitter).await;

    for _ in 0..4 {
        assert!(matches!(driver.poll().await, PollOutcome::Emitted { .. }));
    }
    assert_eq!(emitted(&emitter), vec![(0, 0), (2, 0), (0, 1), (2, 1)]);
    assert_eq!(driver.poll().await, PollOutcome::Idle);
}

// ============================================================================
// Retirement
// ============================================================================

/// Task 1 of 2 owns partition 2 until two partitions are added; then it
/// owns 3 and 4. Partition 2 gets a final commit on the way out, and a late
/// ack for it is dropped without error.
#[tokio::test]
async fn test_driver_ack_after_retirement_is_dropped() {
    let cluster = Cluster::new(&[2, 2, 2]);
    for id in 0..3 {
        cluster.publish(id).await;
    }
    let config = dynamic_config(1_000);
    let emitter = RecordingEmitter::new();
    let mut driver = cluster.open(config.clone(), Parallelism::new(1, 2), &emitter).await;
    assert_eq!(
        driver.owned_partitions().iter().map(|p| p.id().get()).collect::<Vec<_>>(),
        vec![2]
    );

    driver.poll().await;
    driver.poll().await;
    let emissions = emitter.take();
    assert_eq!(emissions.len(), 2);
    assert!(driver.ack(&emissions[0].message_id));

    for id in 3..5 {
        let partition = cluster.broker.create_partition(TOPIC, id, host(id));
        cluster.broker.append_many(&partition.key, 1);
        cluster.publish(id).await;
    }
    cluster.clock.advance(1_000);
    driver.poll().await;

    assert_eq!(
        driver.owned_partitions().iter().map(|p| p.id().get()).collect::<Vec<_>>(),
        vec![3, 4]
    );
    assert_eq!(cluster.persisted(&config, 2).await, Some(1));

    assert!(!driver.ack(&emissions[1].message_id));
    assert!(!driver.fail(&emissions[1].message_id));
    let metrics = driver.metrics();
    assert_eq!(metrics.dropped_acks, 1);
    assert_eq!(metrics.dropped_fails, 1);

    // Still consuming what it owns now.
    assert!(emitted(&emitter).iter().all(|&(id, _)| id == 3 || id == 4));
}

/// A leader change replaces the manager, which restarts from the committed
/// offset. Acks carrying the old leader resolve by partition key: one for a
/// record the new manager re-emitted is accepted, one for a record it has not
/// reached yet is dropped.
#[tokio::test]
async fn test_driver_leader_change_resolves_acks_by_key() {
    let cluster = Cluster::new(&[3]);
    cluster.publish(0).await;
    let config = dynamic_config(1_000);
    let emitter = RecordingEmitter::new();
    let mut driver = cluster.open(config, Parallelism::single(), &emitter).await;

    driver.poll().await;
    driver.poll().await;
    let old = emitter.take();
    assert_eq!(old.len(), 2);

    let moved = host(9);
    cluster.broker.move_leader(&old[0].message_id.partition.key, moved.clone());
    publish_broker(&cluster.store, BROKER_PATH, BrokerId::new(9), &moved)
        .await
        .unwrap();
    publish_partition_state(
        &cluster.store,
        BROKER_PATH,
        TOPIC,
        PartitionId::new(0),
        BrokerId::new(9),
    )
    .await
    .unwrap();
    cluster.clock.advance(1_000);
    driver.poll().await;

    assert_eq!(driver.owned_partitions()[0].leader, moved);
    let redelivered = emitter.take();
    assert_eq!(redelivered.len(), 1);
    assert_eq!(redelivered[0].message_id.offset, Offset::new(0));
    assert_eq!(redelivered[0].message_id.partition.leader, moved);

    assert!(!driver.ack(&old[1].message_id));
    assert!(driver.ack(&old[0].message_id));
    assert_eq!(driver.offset_snapshots()[0].pending, 0);
}
