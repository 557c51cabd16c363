//! Logspout simulator binary.
//!
//! Runs one or more spout tasks against an in-memory broker and coordination
//! store, acking or failing every emitted tuple at random, then prints the
//! committed offsets.
//!
//! ```bash
//! # Four partitions, two tasks, 5% of tuples failed once or more.
//! logspout-sim --partitions 4 --tasks 2 --fail-rate 0.05
//!
//! # Dynamic discovery with a flaky broker.
//! logspout-sim --mode dynamic --fetch-fault-rate 0.1 --log-level debug
//!
//! # Tunables from a config file; topic and hosts are simulated.
//! logspout-sim --config spout.toml
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use logspout_broker::{BrokerFaultConfig, SimulatedBroker};
use logspout_core::{BrokerHost, BrokerId, ManualClock, PartitionId, Timestamp};
use logspout_progress::{SimulatedCoordinationStore, StoreFaultConfig};
use logspout_spout::{
    publish_broker, publish_partition_state, BrokerHosts, Collaborators, Parallelism,
    RecordingEmitter, SpoutConfig, SpoutDriver, StaticPartition, StringDecoder,
    REFRESH_INTERVAL_MS_DEFAULT,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// How the simulated tasks find their partitions.
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum Mode {
    /// Partitions listed in the configuration.
    #[default]
    Static,
    /// Partitions read from the broker registry in the store.
    Dynamic,
}

/// Broker registry root used in dynamic mode.
const BROKER_PATH: &str = "/brokers";

/// Logspout consumption simulator.
#[derive(Parser, Debug)]
#[command(name = "logspout-sim")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Seed for the broker, the store and the ack/fail decisions.
    #[arg(long, default_value = "42")]
    seed: u64,

    /// Partition discovery mode.
    #[arg(long, value_enum, default_value = "static")]
    mode: Mode,

    /// Number of partitions in the topic.
    #[arg(long, default_value = "4")]
    partitions: u64,

    /// Number of broker hosts partitions are spread over.
    #[arg(long, default_value = "3")]
    brokers: u64,

    /// Records appended to each partition before the run.
    #[arg(long, default_value = "1000")]
    records: u64,

    /// Number of parallel tasks.
    #[arg(long, default_value = "1")]
    tasks: u32,

    /// Polls per task.
    #[arg(long, default_value = "20000")]
    polls: u64,

    /// Simulated milliseconds between polls.
    #[arg(long, default_value = "1")]
    tick_ms: i64,

    /// Probability that an emitted tuple is failed instead of acked.
    #[arg(long, default_value = "0.05", value_parser = parse_rate)]
    fail_rate: f64,

    /// Probability that a broker fetch fails.
    #[arg(long, default_value = "0.0", value_parser = parse_rate)]
    fetch_fault_rate: f64,

    /// Probability that a store read or write fails.
    #[arg(long, default_value = "0.0", value_parser = parse_rate)]
    store_fault_rate: f64,

    /// TOML file with spout tunables. Hosts are replaced by the simulated
    /// cluster.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "warn")]
    log_level: Level,
}

/// Parses a probability in `[0, 1]`.
fn parse_rate(s: &str) -> Result<f64, String> {
    let rate: f64 = s.parse().map_err(|_| format!("invalid rate '{s}'"))?;
    if !(0.0..=1.0).contains(&rate) {
        return Err(format!("rate must be within [0, 1], got {rate}"));
    }
    Ok(rate)
}

fn broker_host(index: u64) -> BrokerHost {
    BrokerHost::new(format!("broker-{index}"), 9092)
}

/// Builds the config every task runs with.
fn spout_config(args: &Args) -> Result<SpoutConfig, Box<dyn std::error::Error>> {
    let mut config = match &args.config {
        Some(path) => SpoutConfig::from_file(path)?,
        None => SpoutConfig::new("events", "logspout-sim", BrokerHosts::default()),
    };
    config.hosts = match args.mode {
        Mode::Static => BrokerHosts::Static {
            partitions: (0..args.partitions)
                .map(|id| StaticPartition::new(id, broker_host(id % args.brokers)))
                .collect(),
        },
        Mode::Dynamic => BrokerHosts::Dynamic {
            broker_path: BROKER_PATH.to_string(),
            refresh_interval_ms: REFRESH_INTERVAL_MS_DEFAULT,
        },
    };
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    if args.brokers == 0 {
        return Err("--brokers must be positive".into());
    }

    // Logs go to stderr; the report goes to stdout.
    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .with_target(true)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = spout_config(&args)?;
    info!(
        seed = args.seed,
        mode = ?args.mode,
        topic = %config.topic,
        partitions = args.partitions,
        tasks = args.tasks,
        "starting simulation"
    );

    let broker = SimulatedBroker::with_faults(
        args.seed,
        BrokerFaultConfig::none().with_fetch_fail_rate(args.fetch_fault_rate),
    );
    let store = SimulatedCoordinationStore::with_faults(
        args.seed,
        StoreFaultConfig::none()
            .with_get_fail_rate(args.store_fault_rate)
            .with_put_fail_rate(args.store_fault_rate),
    );
    let clock = ManualClock::new(Timestamp::from_millis(0));

    for id in 0..args.partitions {
        let partition = broker.create_partition(&config.topic, id, broker_host(id % args.brokers));
        broker.append_many(&partition.key, args.records);
    }
    if matches!(args.mode, Mode::Dynamic) {
        // Publish without faults so every task starts from the same registry.
        let faults = std::mem::replace(&mut *store.fault_config(), StoreFaultConfig::none());
        for index in 0..args.brokers {
            publish_broker(&store, BROKER_PATH, BrokerId::new(index), &broker_host(index)).await?;
        }
        for id in 0..args.partitions {
            let leader = BrokerId::new(id % args.brokers);
            publish_partition_state(&store, BROKER_PATH, &config.topic, PartitionId::new(id), leader)
                .await?;
        }
        *store.fault_config() = faults;
    }

    let mut tasks = Vec::with_capacity(args.tasks as usize);
    for task_index in 0..args.tasks {
        let emitter = RecordingEmitter::new();
        let collaborators = Collaborators::new(Arc::new(broker.clone()), Arc::new(store.session()))
            .with_clock(Arc::new(clock.clone()));
        let driver = SpoutDriver::open(
            config.clone(),
            Parallelism::new(task_index, args.tasks),
            collaborators,
            Box::new(StringDecoder),
            Box::new(emitter.clone()),
        )
        .await?;
        tasks.push((driver, emitter));
    }

    let mut rng = StdRng::seed_from_u64(args.seed);
    for _ in 0..args.polls {
        for (driver, emitter) in &mut tasks {
            driver.poll().await;
            for emission in emitter.take() {
                if rng.gen_bool(args.fail_rate) {
                    driver.fail(&emission.message_id);
                } else {
                    driver.ack(&emission.message_id);
                }
            }
        }
        clock.advance(args.tick_ms);
    }

    let mut committed = BTreeMap::new();
    for (driver, _) in &mut tasks {
        driver.close().await;
        let metrics = driver.metrics();
        println!(
            "{}: fetched={} emitted={} acked={} failed={} abandoned={} lost={} commits={} poll_errors={}",
            driver.parallelism().instance_id,
            metrics.totals.fetched,
            metrics.totals.emitted,
            metrics.totals.acked,
            metrics.totals.failed,
            metrics.totals.abandoned,
            metrics.totals.lost,
            metrics.totals.commits,
            metrics.poll_errors,
        );
        for snapshot in driver.offset_snapshots() {
            committed.insert(snapshot.partition.key.clone(), snapshot);
        }
    }

    for (key, snapshot) in &committed {
        println!(
            "{key}: committed={} end={} pending={} waiting_retry={}",
            snapshot.committed.map_or(0, |offset| offset.get()),
            broker.end_offset(key),
            snapshot.pending,
            snapshot.waiting_retry,
        );
    }
    Ok(())
}
