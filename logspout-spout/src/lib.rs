//! Logspout Spout - Partitioned-log consumption engine.
//!
//! A [`SpoutDriver`] pulls records from this task's share of a topic's
//! partitions, hands each one downstream through a [`PipelineEmitter`], and
//! tracks acks and fails so it can periodically commit how far every
//! partition has been safely processed. Delivery is at-least-once: a failed
//! record is fetched again, and a restart resumes from the committed offsets.
//!
//! # Overview
//!
//! - [`SpoutDriver`]: the poll loop. Rotates over owned partitions, routes
//!   acks and fails, and commits on an interval.
//! - [`PartitionCoordinator`]: which partitions this task owns, from a fixed
//!   list or from discovery, split into contiguous ranges per task.
//! - [`PartitionManager`]: fetch, emit, ack, fail and commit for one
//!   partition.
//! - [`StoreBrokerReader`]: discovers partitions and leaders from the broker
//!   registry in the coordination store.
//!
//! # Example
//!
//! ```ignore
//! let config = SpoutConfig::from_file("spout.toml")?;
//! let collaborators = Collaborators::new(connector, store);
//! let mut driver = SpoutDriver::open(
//!     config,
//!     Parallelism::new(task_index, total_tasks),
//!     collaborators,
//!     Box::new(StringDecoder),
//!     Box::new(emitter),
//! )
//! .await?;
//!
//! loop {
//!     driver.poll().await;
//! }
//! ```
//!
//! # Threading
//!
//! One scheduler calls `poll`, `ack` and `fail`, never concurrently. They
//! take `&mut self`, so the engine holds no locks.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

mod config;
mod coordinator;
mod decoder;
mod discovery;
mod driver;
mod emitter;
mod error;
mod manager;

pub use config::{
    BrokerHosts, Parallelism, SpoutConfig, StaticPartition, COMMIT_INTERVAL_MS_DEFAULT,
    FETCH_MAX_BYTES_DEFAULT, FETCH_TIMEOUT_MS_DEFAULT, OUTPUT_STREAM_DEFAULT,
    REFRESH_INTERVAL_MS_DEFAULT,
};
pub use coordinator::{assign_partitions, DynamicCoordinator, PartitionCoordinator, StaticCoordinator};
pub use decoder::{Field, KeyValueDecoder, RawDecoder, RecordDecoder, StringDecoder, Tuple};
pub use discovery::{publish_broker, publish_partition_state, StoreBrokerReader};
pub use driver::{Collaborators, PollOutcome, Spout, SpoutDriver, SpoutMetrics};
pub use emitter::{Emission, PipelineEmitter, RecordingEmitter};
pub use error::{SpoutError, SpoutResult};
pub use manager::{EmitState, ManagerContext, ManagerMetrics, OffsetSnapshot, PartitionManager};
