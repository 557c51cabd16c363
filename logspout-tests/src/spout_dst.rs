//! Spout DST tests.
//!
//! Seeded runs of several tasks polling, acking and failing against the
//! simulated broker and store, with every observation checked by the
//! [`PropertyChecker`].

// Test-specific lint allowances.
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::uninlined_format_args)]

use logspout_core::Offset;
use logspout_progress::RetryPolicy;

use crate::scenarios::faults::{unreliable_broker, unreliable_store};
use crate::scenarios::seeds::REGRESSION_SEEDS;
use crate::simulation::{SimConfig, Simulation};

/// Steps a drain may take before the run counts as stuck.
const DRAIN_STEPS_MAX: u64 = 20_000;

fn assert_clean(sim: &Simulation, label: &str) {
    sim.checker.print_summary(label);
    assert!(
        sim.checker.is_clean(),
        "{}: {:?}",
        label,
        sim.checker
            .violations()
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
    );
}

/// Acks and fails at random without faults; invariants hold and every
/// partition ends fully committed.
#[tokio::test]
async fn test_dst_random_ack_fail() {
    for &seed in REGRESSION_SEEDS {
        let config = SimConfig::new(seed, 4, 60).with_fail_rate(0.25);
        let mut sim = Simulation::start(config).await.unwrap();

        sim.run(300).await;
        assert!(sim.drain(DRAIN_STEPS_MAX).await, "seed {}: not drained", seed);
        sim.close().await;

        for key in sim.partition_keys() {
            let record = sim.persisted(&key).unwrap();
            assert_eq!(record.offset, Offset::new(60), "seed {}: {}", seed, key);
        }
        assert_clean(&sim, &format!("seed {seed}"));
    }
}

/// Broker and store faults slow the run down but never break invariants.
#[tokio::test]
async fn test_dst_with_faults() {
    for &seed in REGRESSION_SEEDS {
        let config = SimConfig::new(seed, 5, 40)
            .with_tasks(2)
            .with_fail_rate(0.1)
            .with_broker_faults(unreliable_broker())
            .with_store_faults(unreliable_store());
        let mut sim = Simulation::start(config).await.unwrap();

        sim.run(400).await;
        assert!(sim.drain(DRAIN_STEPS_MAX).await, "seed {}: not drained", seed);

        let metrics: Vec<_> = sim.tasks.iter().map(|task| task.driver.metrics()).collect();
        assert!(
            metrics.iter().any(|m| m.poll_errors > 0),
            "seed {}: no fetch fault was injected",
            seed
        );

        // Keep committing until a write gets through for every partition.
        for _ in 0..50 {
            for task in &mut sim.tasks {
                task.driver.commit_all().await;
            }
            if sim
                .partition_keys()
                .iter()
                .all(|key| sim.persisted(key).is_some_and(|r| r.offset == Offset::new(40)))
            {
                break;
            }
        }
        sim.check_persisted();
        for key in sim.partition_keys() {
            assert_eq!(
                sim.persisted(&key).map(|r| r.offset),
                Some(Offset::new(40)),
                "seed {}: {}",
                seed,
                key
            );
        }
        assert_clean(&sim, &format!("seed {seed} with faults"));
    }
}

/// A restart resumes from the committed offsets; nothing below them is
/// delivered again.
#[tokio::test]
async fn test_dst_restart_resumes_from_commit() {
    for &seed in REGRESSION_SEEDS {
        let config = SimConfig::new(seed, 3, 80).with_tasks(2).with_fail_rate(0.2);
        let mut sim = Simulation::start(config).await.unwrap();

        sim.run(60).await;
        sim.restart().await.unwrap();
        let resumed: Vec<_> = sim
            .partition_keys()
            .iter()
            .map(|key| sim.persisted(key).map_or(0, |r| r.offset.get()))
            .collect();

        sim.step().await;
        for task in &sim.tasks {
            for snapshot in task.driver.offset_snapshots() {
                let id = usize::try_from(snapshot.partition.id().get()).unwrap();
                assert!(
                    snapshot.resume.get() >= resumed[id],
                    "seed {}: {} resumed below its commit",
                    seed,
                    snapshot.partition
                );
            }
        }

        assert!(sim.drain(DRAIN_STEPS_MAX).await, "seed {}: not drained", seed);
        sim.close().await;
        assert_clean(&sim, &format!("seed {seed} restart"));
    }
}

/// A retry limit abandons records instead of retrying forever; the frontier
/// still reaches the end of the log.
#[tokio::test]
async fn test_dst_retry_limit() {
    for &seed in REGRESSION_SEEDS {
        let mut config = SimConfig::new(seed, 2, 30).with_fail_rate(0.6);
        config.spout = config
            .spout
            .with_retry(RetryPolicy::default().with_retry_limit(2));
        let mut sim = Simulation::start(config).await.unwrap();

        sim.run(400).await;
        for task in &mut sim.tasks {
            task.driver.commit_all().await;
        }

        // Abandoned records are never acked, so only the frontier is checked.
        let metrics = sim.tasks[0].driver.metrics();
        assert!(metrics.totals.abandoned > 0, "seed {}: nothing abandoned", seed);
        for key in sim.partition_keys() {
            let record = sim.persisted(&key).unwrap();
            assert_eq!(record.offset, Offset::new(30), "seed {}: {}", seed, key);
        }
    }
}
