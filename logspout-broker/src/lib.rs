//! Logspout Broker - Broker client seams and connection pooling.
//!
//! The consumer talks to the log's brokers only through the traits defined
//! here, so the engine can run against a real client or the in-memory
//! [`SimulatedBroker`].
//!
//! # Overview
//!
//! - [`BrokerConnector`] / [`BrokerConnection`]: fetch records and resolve
//!   start offsets for a partition from its leader broker.
//! - [`PartitionDiscovery`]: lists a topic's partitions and their leaders.
//! - [`ConnectionPool`]: one connection per owned partition, reused across
//!   polls, bounded by a timeout and invalidated on connection-level errors.
//!
//! # Design (`TigerStyle`)
//!
//! - **Explicit timeouts**: every broker call is bounded
//! - **Typed failures**: callers distinguish connection errors from data errors
//! - **Deterministic simulation**: faults derive from a seed

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

mod connection;
mod error;
mod pool;
mod simulated;

pub use connection::{BrokerConnection, BrokerConnector, PartitionDiscovery, StartOffset};
pub use error::{DiscoveryError, DiscoveryResult, FetchError, FetchResult};
pub use pool::{ConnectionPool, CONNECTION_TIMEOUT_MS_DEFAULT};
pub use simulated::{BrokerFaultConfig, SimulatedBroker};
